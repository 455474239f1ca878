//! Customer registry (CRM).
//!
//! Holds customer records in a [`RecordStore`], answers `customer` questions
//! from it and serves it over HTTP. Every write that creates a customer or
//! changes their `connectionId` or `connectionMandate` is published as a
//! [`ConnectionMandate`] event for the IoT platform.
//!
//!
//! ```text
//! GET  /?customerId=<id>    one customer, or 404
//! GET  /                    every customer, keyed by id
//! POST /customers           create; the id is assigned
//! POST /customers/:id       replace an existing customer, or 404
//! GET  /health
//! ```

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
};
use crosstalk_core::bus::{BusError, MessageBus, publish_json};
use crosstalk_core::handler::HandlerError;
use crosstalk_core::message::{ConnectionMandate, Question};
use crosstalk_runtime::{
    CorrelationEngine, QuestionHandler, QuestionResponder, RecordError, RecordStore, Written,
};
use crosstalk_web::{AppError, JsonBody, WebResult, health_check, with_standard_layers};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Question category the CRM answers.
pub const CUSTOMER_CATEGORY: &str = "customer";

/// Payload field naming the customer a question is about.
pub const CUSTOMER_IDENTIFIER_FIELD: &str = "customerIdentifier";

/// Answers `customer` questions with the stored record, or `null`.
pub struct CustomerResponder {
    store: Arc<RecordStore>,
}

impl CustomerResponder {
    /// Create a responder reading from `store`.
    #[must_use]
    pub const fn new(store: Arc<RecordStore>) -> Self {
        Self { store }
    }
}

#[async_trait]
impl QuestionResponder for CustomerResponder {
    async fn respond(&self, question: &Question) -> Result<Value, HandlerError> {
        let id = match question.payload.get(CUSTOMER_IDENTIFIER_FIELD) {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                debug!(
                    qa_identifier = %question.qa_identifier,
                    "Customer question without an identifier"
                );
                return Ok(Value::Null);
            }
        };

        let customer = self.store.get(&id);
        debug!(
            qa_identifier = %question.qa_identifier,
            customer_id = %id,
            found = customer.is_some(),
            "Customer looked up"
        );
        Ok(customer.unwrap_or(Value::Null))
    }
}

/// Questions-topic handler answering `customer` questions from `store`.
#[must_use]
pub fn question_handler(
    engine: CorrelationEngine,
    store: Arc<RecordStore>,
    answer_delay: Duration,
) -> QuestionHandler {
    QuestionHandler::new(engine)
        .with_responder(CUSTOMER_CATEGORY, Arc::new(CustomerResponder::new(store)))
        .with_answer_delay(answer_delay)
}

/// The mandate event a customer write calls for.
///
/// `None` when the stored customer has no connection id, or when an update
/// left both `connectionId` and `connectionMandate` as they were.
#[must_use]
pub fn mandate_change(written: &Written) -> Option<ConnectionMandate> {
    let current = ConnectionMandate::of_record(&written.current);
    current.connection_key()?;

    match &written.previous {
        Some(previous) if ConnectionMandate::of_record(previous) == current => None,
        _ => Some(current),
    }
}

/// Publishes [`ConnectionMandate`] events, keyed by connection id.
#[derive(Clone)]
pub struct MandatePublisher {
    bus: Arc<dyn MessageBus>,
    topic: String,
}

impl MandatePublisher {
    /// Create a publisher writing to `topic`.
    #[must_use]
    pub fn new(bus: Arc<dyn MessageBus>, topic: impl Into<String>) -> Self {
        Self {
            bus,
            topic: topic.into(),
        }
    }

    /// Publish the mandate of `written` if [`mandate_change`] calls for it.
    /// Returns whether an event was published.
    ///
    /// # Errors
    ///
    /// Returns the [`BusError`] if the bus rejects the event.
    pub async fn publish_change(&self, written: &Written) -> Result<bool, BusError> {
        let Some(mandate) = mandate_change(written) else {
            return Ok(false);
        };
        let key = mandate.connection_key();

        publish_json(self.bus.as_ref(), &self.topic, key.as_deref(), &mandate).await?;
        info!(
            customer_id = %written.id,
            connection_id = ?key,
            topic = %self.topic,
            "Connection mandate published"
        );
        Ok(true)
    }
}

/// Customer writes: the store plus, when configured, mandate events.
#[derive(Clone)]
pub struct CustomerDirectory {
    store: Arc<RecordStore>,
    mandates: Option<MandatePublisher>,
}

impl CustomerDirectory {
    /// Create a directory over `store` that publishes nothing.
    #[must_use]
    pub const fn new(store: Arc<RecordStore>) -> Self {
        Self {
            store,
            mandates: None,
        }
    }

    /// Publish mandate changes through `publisher`.
    #[must_use]
    pub fn with_mandate_publisher(mut self, publisher: MandatePublisher) -> Self {
        self.mandates = Some(publisher);
        self
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// Store `record`, then publish its mandate change.
    ///
    /// The record stays stored when publishing fails; the failure is logged.
    ///
    /// # Errors
    ///
    /// Returns the [`RecordError`] if the record cannot be stored.
    pub async fn save(&self, record: Value) -> Result<Written, RecordError> {
        let written = self.store.write(record)?;

        if let Some(mandates) = &self.mandates {
            if let Err(e) = mandates.publish_change(&written).await {
                error!(
                    customer_id = %written.id,
                    error = %e,
                    "Failed to publish connection mandate"
                );
            }
        }
        Ok(written)
    }

    /// Save every record of an import, in order.
    ///
    /// # Errors
    ///
    /// Stops at the first record that cannot be stored.
    pub async fn import(&self, records: Vec<Value>) -> Result<usize, RecordError> {
        let count = records.len();
        for record in records {
            self.save(record).await?;
        }
        info!(count, "Customers imported");
        Ok(count)
    }
}

impl From<Arc<RecordStore>> for CustomerDirectory {
    fn from(store: Arc<RecordStore>) -> Self {
        Self::new(store)
    }
}

/// Shared state of the CRM routes.
#[derive(Clone)]
pub struct CrmState {
    directory: CustomerDirectory,
}

/// Query string of `GET /`.
#[derive(Debug, Deserialize)]
pub struct CustomerQuery {
    /// Customer to fetch; all customers when absent
    #[serde(rename = "customerId")]
    pub customer_id: Option<String>,
}

/// The CRM's HTTP routes over `directory`.
#[must_use]
pub fn router(directory: impl Into<CustomerDirectory>) -> Router {
    with_standard_layers(
        Router::new()
            .route("/", get(get_customers))
            .route("/customers", post(create_customer))
            .route("/customers/:id", post(update_customer))
            .route("/health", get(health_check))
            .with_state(CrmState {
                directory: directory.into(),
            }),
    )
}

async fn get_customers(
    State(state): State<CrmState>,
    Query(query): Query<CustomerQuery>,
) -> WebResult<Json<Value>> {
    match query.customer_id {
        Some(id) => state
            .directory
            .store()
            .get(&id)
            .map(Json)
            .ok_or_else(|| AppError::not_found("Customer", id)),
        None => Ok(Json(Value::Object(state.directory.store().snapshot()))),
    }
}

async fn create_customer(
    State(state): State<CrmState>,
    JsonBody(body): JsonBody<Value>,
) -> WebResult<(StatusCode, Json<Value>)> {
    let record = match body {
        Value::Object(mut fields) => {
            fields.remove(state.directory.store().id_field());
            Value::Object(fields)
        }
        other => other,
    };

    let written = state.directory.save(record).await?;
    info!(customer_id = %written.id, "Customer created");
    Ok((StatusCode::CREATED, Json(written.current)))
}

async fn update_customer(
    State(state): State<CrmState>,
    Path(id): Path<String>,
    JsonBody(body): JsonBody<Value>,
) -> WebResult<(StatusCode, Json<Value>)> {
    let store = state.directory.store();
    if !store.contains(&id) {
        return Err(AppError::not_found("Customer", id));
    }
    let Value::Object(mut fields) = body else {
        return Err(AppError::bad_request("Customer must be a JSON object"));
    };

    fields.insert(store.id_field().to_string(), Value::String(id));
    let written = state.directory.save(Value::Object(fields)).await?;
    info!(customer_id = %written.id, "Customer updated");
    Ok((StatusCode::CREATED, Json(written.current)))
}
