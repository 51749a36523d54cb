use std::{net::SocketAddr, time::Duration};

use clap::{Parser, Subcommand};

use crate::store::StoreOptions;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "featurevote",
    about = "Feature request voting API",
    version = crate::version::VERSION,
    disable_help_subcommand = true
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: Config,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Start the HTTP API server (default).
    Run,

    /// Apply database migrations and exit.
    Migrate,
}

#[derive(clap::Args, Debug, Clone)]
pub struct Config {
    #[arg(
        long,
        global = true,
        env = "FEATUREVOTE_BIND",
        value_name = "ADDR",
        default_value = "127.0.0.1:5000"
    )]
    pub bind: SocketAddr,

    #[arg(
        long,
        global = true,
        env = "FEATUREVOTE_DATABASE_URL",
        value_name = "URL",
        default_value = "sqlite://data/featurevote.db"
    )]
    pub database_url: String,

    #[arg(
        long = "db-max-connections",
        global = true,
        env = "FEATUREVOTE_DB_MAX_CONNECTIONS",
        value_name = "N",
        default_value_t = 5,
        value_parser = clap::value_parser!(u32).range(1..=64)
    )]
    pub db_max_connections: u32,

    #[arg(
        long = "db-busy-timeout-secs",
        global = true,
        env = "FEATUREVOTE_DB_BUSY_TIMEOUT_SECS",
        value_name = "SECS",
        default_value_t = 5,
        value_parser = clap::value_parser!(u64).range(1..=60)
    )]
    pub db_busy_timeout_secs: u64,

    #[arg(
        long = "vote-rate-limit-max",
        global = true,
        env = "FEATUREVOTE_VOTE_RATE_LIMIT_MAX",
        value_name = "N",
        default_value_t = 10,
        value_parser = clap::value_parser!(u32).range(1..=10000)
    )]
    pub vote_rate_limit_max: u32,

    #[arg(
        long = "vote-rate-limit-window-secs",
        global = true,
        env = "FEATUREVOTE_VOTE_RATE_LIMIT_WINDOW_SECS",
        value_name = "SECS",
        default_value_t = 900,
        value_parser = clap::value_parser!(u64).range(1..=86400)
    )]
    pub vote_rate_limit_window_secs: u64,
}

impl Config {
    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            database_url: self.database_url.clone(),
            max_connections: self.db_max_connections,
            busy_timeout: Duration::from_secs(self.db_busy_timeout_secs),
        }
    }

    pub fn vote_rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.vote_rate_limit_window_secs)
    }
}
