//! Tasksync collab node entry point.
//!
//! Boots one stateless collab node: loads configuration from the
//! environment, connects both stores, starts the write worker and the
//! pub/sub listener, and serves the event socket plus the operational
//! surface. Fatal initialization failures (missing auth secret,
//! unreachable store) exit with code 1.

use std::sync::Arc;
use tasksync::{Config, Server};

#[tokio::main]
async fn main() {
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    log::info!("{} v{} starting", tasksync::NAME, tasksync::VERSION);

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            log::error!("configuration error: {}", err);
            std::process::exit(1);
        }
    };

    if config.debug {
        log::info!("debug mode enabled (env: {})", config.env);
    }

    let server = match Server::new(config).await {
        Ok(server) => Arc::new(server),
        Err(err) => {
            log::error!("initialization failed: {}", err);
            std::process::exit(1);
        }
    };

    if let Err(err) = server.run().await {
        log::error!("server error: {}", err);
        std::process::exit(1);
    }

    log::info!("{} shutdown complete", tasksync::NAME);
}
