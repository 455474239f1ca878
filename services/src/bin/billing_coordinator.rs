//! Billing coordinator service.
//!
//! Accepts `POST /billing-runs` and publishes one `bill-generation` order per
//! customer on the workflow topic. Runs no consumers.

use crosstalk_core::environment::SystemClock;
use crosstalk_runtime::WorkflowFanOut;
use crosstalk_services::{Application, bootstrap, coordinator};
use std::sync::Arc;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    bootstrap::init_tracing();
    let config = bootstrap::load_config()?;
    tracing::info!(
        brokers = %config.bus.brokers,
        workflow = %config.topics.workflow,
        "Starting billing coordinator"
    );

    let bus = bootstrap::connect_bus(&config.bus)?;
    let fan_out = Arc::new(WorkflowFanOut::new(
        bus,
        config.topics.workflow.clone(),
        Arc::new(SystemClock),
    ));

    let (shutdown_tx, _) = broadcast::channel(1);
    let listener = bootstrap::bind(&config.server).await?;
    Application::new("billing-coordinator", shutdown_tx)
        .with_http(listener, coordinator::router(fan_out))
        .run()
        .await?;

    Ok(())
}
