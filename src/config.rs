//! # Configuration
//!
//! Environment-driven configuration for a collab node. Missing required
//! variables are fatal at boot (exit code 1); everything else has a
//! sensible default so a single node runs against local stores out of the
//! box.

use std::time::Duration;
use thiserror::Error;

/// Configuration failure at boot.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),

    #[error("environment variable {0} has an invalid value: {1}")]
    Invalid(&'static str, String),
}

/// Runtime configuration for one collab node.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind host
    pub host: String,
    /// Bind port
    pub port: u16,
    /// Deployment environment name (`dev`, `staging`, `prod`)
    pub env: String,
    /// Verbose diagnostics
    pub debug: bool,
    /// Shared store (Redis) URL
    pub shared_store_url: String,
    /// Durable store (Postgres) URL
    pub durable_store_url: String,
    /// Durable store service key, appended to the connection when present
    pub durable_store_key: Option<String>,
    /// HMAC secret shared with the auth service
    pub auth_secret: String,
    /// Write-behind queue capacity
    pub writer_queue_size: usize,
    /// How long shutdown waits for the write queue to drain
    pub writer_shutdown_drain: Duration,
    /// Fan-out bus channel name
    pub pubsub_channel: String,
    /// Allowed CORS origins for the operational surface (`*` for any)
    pub cors_origins: Vec<String>,
}

fn var(name: &'static str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::Invalid(name, raw)),
        None => Ok(default),
    }
}

impl Config {
    /// Load configuration from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: parse_var("PORT", 8080)?,
            env: var("ENV").unwrap_or_else(|| "dev".to_string()),
            debug: parse_var("DEBUG", false)?,
            shared_store_url: var("SHARED_STORE_URL")
                .unwrap_or_else(|| "redis://127.0.0.1:6379/0".to_string()),
            durable_store_url: var("DURABLE_STORE_URL")
                .ok_or(ConfigError::Missing("DURABLE_STORE_URL"))?,
            durable_store_key: var("DURABLE_STORE_KEY"),
            auth_secret: var("AUTH_SECRET").ok_or(ConfigError::Missing("AUTH_SECRET"))?,
            writer_queue_size: parse_var("WRITER_QUEUE_SIZE", 1024)?,
            writer_shutdown_drain: Duration::from_secs(parse_var(
                "WRITER_SHUTDOWN_DRAIN_SECONDS",
                5u64,
            )?),
            pubsub_channel: var("PUBSUB_CHANNEL").unwrap_or_else(|| "todo:updates".to_string()),
            cors_origins: var("CORS_ORIGINS")
                .map(|raw| {
                    raw.split(',')
                        .map(|origin| origin.trim().to_string())
                        .filter(|origin| !origin.is_empty())
                        .collect()
                })
                .unwrap_or_else(|| vec!["*".to_string()]),
        })
    }

    /// The socket address to bind.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
