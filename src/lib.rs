pub mod config;
pub mod domain;
pub mod http;
pub mod rate_limit;
pub mod store;
pub mod version;
pub mod vote;
