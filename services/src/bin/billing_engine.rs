//! Billing engine service.
//!
//! Consumes workflow orders and, on a separate subscription, the answers to
//! the questions it asks the CRM. Has no HTTP surface.

use crosstalk_runtime::{Consumer, CorrelationEngine, TopicRouter};
use crosstalk_services::{Application, BillingEngine, bootstrap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    bootstrap::init_tracing();
    let config = bootstrap::load_config()?;
    tracing::info!(
        brokers = %config.bus.brokers,
        workflow = %config.topics.workflow,
        answers = %config.topics.answers,
        "Starting billing engine"
    );

    let bus = bootstrap::connect_bus(&config.bus)?;

    // Every instance must see every answer, so answers get a group of their own.
    let mut answers_config = config.bus.clone();
    answers_config.consumer_group = Some(format!("billing-engine-answers-{}", uuid::Uuid::new_v4()));
    answers_config.auto_offset_reset = "latest".to_string();
    let answers_bus = bootstrap::connect_bus(&answers_config)?;

    let engine = CorrelationEngine::new(
        bus.clone(),
        config.topics.questions.clone(),
        config.topics.answers.clone(),
    );

    let mut workflow = TopicRouter::new();
    if let Some(timeout) = config.correlation.handler_timeout() {
        workflow = workflow.with_handler_timeout(timeout);
    }
    workflow.register(
        config.topics.workflow.clone(),
        Arc::new(BillingEngine::new(
            engine.clone(),
            config.correlation.answer_timeout(),
        )),
    );

    let mut answers = TopicRouter::new();
    answers.register(config.topics.answers.clone(), Arc::new(engine.answer_handler()));

    let (shutdown_tx, _) = broadcast::channel(1);
    let reconnect = bootstrap::reconnect_policy(&config.bus);
    Application::new("billing-engine", shutdown_tx.clone())
        .with_shutdown_timeout(Duration::from_secs(config.server.shutdown_timeout))
        .with_consumer(
            Consumer::new(
                "billing-workflow",
                bus,
                Arc::new(workflow),
                shutdown_tx.subscribe(),
            )
            .with_reconnect_policy(reconnect.clone()),
        )
        .with_consumer(
            Consumer::new(
                "billing-answers",
                answers_bus,
                Arc::new(answers),
                shutdown_tx.subscribe(),
            )
            .with_reconnect_policy(reconnect),
        )
        .run()
        .await?;

    Ok(())
}
