//! IoT platform service.
//!
//! Projects the CRM's connection mandate events and serves them over HTTP.
//! The projection lives in memory, so every start replays the mandates topic
//! from the beginning under a consumer group of its own.

use crosstalk_runtime::{Consumer, TopicRouter};
use crosstalk_services::iot_platform::{self, MandateProjection};
use crosstalk_services::{Application, bootstrap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    bootstrap::init_tracing();
    let config = bootstrap::load_config()?;
    tracing::info!(
        brokers = %config.bus.brokers,
        mandates = %config.topics.mandates,
        "Starting IoT platform"
    );

    let mut bus_config = config.bus.clone();
    bus_config.consumer_group = Some(format!("iot-platform-{}", uuid::Uuid::new_v4()));
    bus_config.auto_offset_reset = "earliest".to_string();
    let bus = bootstrap::connect_bus(&bus_config)?;

    let projection = Arc::new(MandateProjection::new());
    let mut mandates = TopicRouter::new();
    if let Some(timeout) = config.correlation.handler_timeout() {
        mandates = mandates.with_handler_timeout(timeout);
    }
    mandates.register(config.topics.mandates.clone(), projection.clone());

    let (shutdown_tx, _) = broadcast::channel(1);
    let listener = bootstrap::bind(&config.server).await?;
    Application::new("iot-platform", shutdown_tx.clone())
        .with_shutdown_timeout(Duration::from_secs(config.server.shutdown_timeout))
        .with_consumer(
            Consumer::new(
                "iot-mandates",
                bus,
                Arc::new(mandates),
                shutdown_tx.subscribe(),
            )
            .with_reconnect_policy(bootstrap::reconnect_policy(&config.bus)),
        )
        .with_http(listener, iot_platform::router(projection))
        .run()
        .await?;

    Ok(())
}
