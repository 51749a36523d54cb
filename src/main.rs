use std::net::SocketAddr;

use anyhow::{Context as _, Result};
use clap::Parser;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt};

use featurevote::{
    config::{Cli, Command, Config},
    store::FeatureStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let cmd = cli.command.clone().unwrap_or(Command::Run);

    match cmd {
        Command::Run => run_server(cli.config).await,
        Command::Migrate => migrate(&cli.config).await,
    }
}

async fn open_store(config: &Config) -> Result<FeatureStore> {
    let store = FeatureStore::connect(&config.store_options())
        .await
        .context("open feature store")?;
    store.migrate().await.context("apply migrations")?;
    Ok(store)
}

async fn migrate(config: &Config) -> Result<()> {
    let store = open_store(config).await?;
    store.close().await;
    Ok(())
}

async fn run_server(config: Config) -> Result<()> {
    let store = open_store(&config).await?;

    let app = featurevote::http::build_router(config.clone(), store.clone())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    info!(
        bind = %config.bind,
        vote_rate_limit_max = config.vote_rate_limit_max,
        vote_rate_limit_window_secs = config.vote_rate_limit_window_secs,
        "starting featurevote"
    );
    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("bind {}", config.bind))?;
    let served = axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await;

    store.close().await;
    info!("feature store closed");
    served?;
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).compact().init();
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
