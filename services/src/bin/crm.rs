//! CRM service.
//!
//! - Serves customers over HTTP
//! - Publishes connection mandate changes on the mandates topic
//! - Answers `customer` questions from the questions topic
//! - Tallies names from the names topic when `NAMES_TOPIC` is set
//!
//! # Usage
//!
//! ```bash
//! BUS_BROKERS=localhost:9092 CRM_SEED_PATH=customer-database.csv cargo run --bin crm
//! ```

use crosstalk_runtime::{
    Consumer, CorrelationEngine, InMemoryStateStore, NameTally, RecordStore, TopicRouter,
    read_seed_file,
};
use crosstalk_services::crm::{CustomerDirectory, MandatePublisher};
use crosstalk_services::{Application, bootstrap, crm};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    bootstrap::init_tracing();
    let config = bootstrap::load_config()?;
    tracing::info!(
        brokers = %config.bus.brokers,
        questions = %config.topics.questions,
        answers = %config.topics.answers,
        mandates = %config.topics.mandates,
        "Starting CRM"
    );

    let bus = bootstrap::connect_bus(&config.bus)?;
    let store = Arc::new(RecordStore::new(config.crm.id_field.clone()));
    let directory = CustomerDirectory::new(store.clone()).with_mandate_publisher(
        MandatePublisher::new(bus.clone(), config.topics.mandates.clone()),
    );
    if let Some(path) = &config.crm.seed_path {
        directory.import(read_seed_file(path)?).await?;
    }

    let engine = CorrelationEngine::new(
        bus.clone(),
        config.topics.questions.clone(),
        config.topics.answers.clone(),
    );

    let mut questions = TopicRouter::new();
    if let Some(timeout) = config.correlation.handler_timeout() {
        questions = questions.with_handler_timeout(timeout);
    }
    questions.register(
        config.topics.questions.clone(),
        Arc::new(crm::question_handler(
            engine,
            store,
            config.correlation.answer_delay(),
        )),
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let reconnect = bootstrap::reconnect_policy(&config.bus);
    let mut app = Application::new("crm", shutdown_tx.clone())
        .with_shutdown_timeout(Duration::from_secs(config.server.shutdown_timeout))
        .with_consumer(
            Consumer::new("crm-questions", bus.clone(), Arc::new(questions), shutdown_tx.subscribe())
                .with_reconnect_policy(reconnect.clone()),
        );

    if let Some(names_topic) = &config.topics.names {
        let mut names = TopicRouter::new();
        names.register(
            names_topic.clone(),
            Arc::new(NameTally::new(Arc::new(InMemoryStateStore::new()))),
        );
        app = app.with_consumer(
            Consumer::new("crm-names", bus.clone(), Arc::new(names), shutdown_tx.subscribe())
                .with_reconnect_policy(reconnect),
        );
    }

    let listener = bootstrap::bind(&config.server).await?;
    app.with_http(listener, crm::router(directory)).run().await?;

    Ok(())
}
