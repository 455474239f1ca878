//! Startup helpers shared by the service binaries.

use crate::config::{BusConfig, Config, ServerConfig};
use crosstalk_core::bus::BusError;
use crosstalk_redpanda::RedpandaBus;
use crosstalk_runtime::ReconnectPolicy;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Log filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "info,crosstalk=debug,tower_http=info,rdkafka=warn";

/// Install the global `tracing` subscriber (env filter + fmt layer).
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| DEFAULT_LOG_FILTER.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Load `.env` (if present) and the configuration, and validate it.
///
/// # Errors
///
/// Returns the [`ConfigError`](crate::config::ConfigError) of an unusable
/// configuration.
pub fn load_config() -> Result<Config, crate::config::ConfigError> {
    let _ = dotenvy::dotenv();
    let config = Config::from_env();
    config.validate()?;
    Ok(config)
}

/// Connect to the brokers described by `config`.
///
/// # Errors
///
/// Returns [`BusError::ConnectionFailed`] if the client cannot be created.
pub fn connect_bus(config: &BusConfig) -> Result<Arc<RedpandaBus>, BusError> {
    let mut builder = RedpandaBus::builder()
        .brokers(config.brokers.clone())
        .auto_offset_reset(config.auto_offset_reset.clone());
    if let Some(group) = &config.consumer_group {
        builder = builder.consumer_group(group.clone());
    }

    let bus = builder.build()?;
    tracing::info!(brokers = %bus.brokers(), "Connected to message bus");
    Ok(Arc::new(bus))
}

/// Reconnect policy for the configured budget.
#[must_use]
pub fn reconnect_policy(config: &BusConfig) -> ReconnectPolicy {
    ReconnectPolicy::builder()
        .max_reconnects(config.max_reconnects)
        .initial_delay(Duration::from_millis(config.reconnect_delay_ms))
        .build()
}

/// Bind the HTTP listener.
///
/// # Errors
///
/// Returns the I/O error if the address cannot be bound.
pub async fn bind(config: &ServerConfig) -> std::io::Result<tokio::net::TcpListener> {
    tokio::net::TcpListener::bind(config.address()).await
}
