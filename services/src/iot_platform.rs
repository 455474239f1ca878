//! IoT platform: a read model of connection mandates.
//!
//! Consumes the CRM's [`ConnectionMandate`] events and keeps the latest one
//! per connection, served over HTTP:
//!
//! ```text
//! GET /?connectionId=<id>   the connection's mandate, 404 if unknown,
//!                           400 without a connectionId
//! GET /health
//! ```

use async_trait::async_trait;
use axum::{
    Json, Router,
    extract::{Query, State},
    routing::get,
};
use crosstalk_core::handler::{HandlerError, MessageHandler};
use crosstalk_core::message::{BusMessage, ConnectionMandate};
use crosstalk_web::{AppError, WebResult, health_check, with_standard_layers};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// Latest mandate per connection id.
#[derive(Debug, Default)]
pub struct MandateProjection {
    mandates: RwLock<HashMap<String, ConnectionMandate>>,
}

impl MandateProjection {
    /// Create an empty projection.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `mandate` as the latest for its connection, returning the
    /// connection id.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::Other`] if the event names no connection.
    pub fn apply(&self, mandate: ConnectionMandate) -> Result<String, HandlerError> {
        let Some(connection_id) = mandate.connection_key() else {
            return Err(HandlerError::Other(
                "Connection mandate without a connectionId".to_string(),
            ));
        };

        self.mandates
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(connection_id.clone(), mandate);
        Ok(connection_id)
    }

    /// The latest mandate of `connection_id`.
    #[must_use]
    pub fn get(&self, connection_id: &str) -> Option<ConnectionMandate> {
        self.mandates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(connection_id)
            .cloned()
    }

    /// Number of connections with a known mandate.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mandates
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no mandate is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl MessageHandler for MandateProjection {
    async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError> {
        let mandate: ConnectionMandate = message.decode()?;
        let connection_id = self.apply(mandate)?;
        debug!(connection_id = %connection_id, offset = ?message.offset, "Mandate projected");
        Ok(())
    }
}

/// Query string of `GET /`.
#[derive(Debug, Deserialize)]
pub struct MandateQuery {
    /// Connection to look up
    #[serde(rename = "connectionId")]
    pub connection_id: Option<String>,
}

/// The IoT platform's HTTP routes over `projection`.
#[must_use]
pub fn router(projection: Arc<MandateProjection>) -> Router {
    with_standard_layers(
        Router::new()
            .route("/", get(get_mandate))
            .route("/health", get(health_check))
            .with_state(projection),
    )
}

async fn get_mandate(
    State(projection): State<Arc<MandateProjection>>,
    Query(query): Query<MandateQuery>,
) -> WebResult<Json<ConnectionMandate>> {
    let Some(connection_id) = query.connection_id.filter(|id| !id.is_empty()) else {
        return Err(AppError::bad_request(
            "Query parameter connectionId is required",
        ));
    };

    projection
        .get(&connection_id)
        .map(Json)
        .ok_or_else(|| AppError::not_found("Connection mandate", connection_id))
}
