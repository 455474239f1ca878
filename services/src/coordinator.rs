//! Billing coordinator: turns one billing run request into one workflow order
//! per customer.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    routing::{get, post},
};
use crosstalk_runtime::{FanOutReport, WorkflowFanOut};
use crosstalk_web::{CorrelationId, JsonBody, WebResult, health_check, with_standard_layers};
use serde::Deserialize;
use std::sync::Arc;
use tracing::info;

/// Body of `POST /billing-runs`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingRunRequest {
    /// Customers to bill
    #[serde(alias = "customerIdentifiers")]
    pub subject_identifiers: Vec<String>,
}

/// The coordinator's HTTP routes.
#[must_use]
pub fn router(fan_out: Arc<WorkflowFanOut>) -> Router {
    with_standard_layers(
        Router::new()
            .route("/billing-runs", post(start_billing_run))
            .route("/health", get(health_check))
            .with_state(fan_out),
    )
}

async fn start_billing_run(
    State(fan_out): State<Arc<WorkflowFanOut>>,
    correlation_id: CorrelationId,
    JsonBody(request): JsonBody<BillingRunRequest>,
) -> WebResult<(StatusCode, Json<FanOutReport>)> {
    info!(
        correlation_id = %correlation_id.0,
        subjects = request.subject_identifiers.len(),
        "Billing run requested"
    );

    let report = fan_out.fan_out(&request.subject_identifiers).await;

    info!(
        correlation_id = %correlation_id.0,
        accepted = report.accepted,
        failed = report.failed.len(),
        "Billing run fanned out"
    );
    Ok((StatusCode::CREATED, Json(report)))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, header};
    use crosstalk_core::message::WorkflowOrder;
    use crosstalk_testing::{InMemoryBus, test_clock};
    use serde_json::Value;
    use tower::ServiceExt;

    fn app(bus: &InMemoryBus) -> Router {
        router(Arc::new(WorkflowFanOut::new(
            Arc::new(bus.clone()),
            "workflow-queue",
            Arc::new(test_clock()),
        )))
    }

    async fn post_run(app: Router, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/billing-runs")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn run_publishes_one_order_per_customer() {
        let bus = InMemoryBus::new();

        let (status, body) = post_run(app(&bus), r#"{"subjectIdentifiers":["23","32"]}"#).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["accepted"], 2);
        assert_eq!(body["workflowIds"].as_array().unwrap().len(), 2);

        let orders: Vec<WorkflowOrder> = bus.published_json("workflow-queue");
        let subjects: Vec<&str> = orders
            .iter()
            .map(|o| o.payload.subject_identifier.as_str())
            .collect();
        assert_eq!(subjects, vec!["23", "32"]);
        assert!(orders.iter().all(|o| o.workflow_type == "bill-generation"));
    }

    #[tokio::test]
    async fn customer_identifiers_alias_is_accepted() {
        let bus = InMemoryBus::new();

        let (status, _) = post_run(app(&bus), r#"{"customerIdentifiers":["23"]}"#).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(bus.published("workflow-queue").len(), 1);
    }

    #[tokio::test]
    async fn empty_run_is_accepted() {
        let bus = InMemoryBus::new();

        let (status, body) = post_run(app(&bus), r#"{"subjectIdentifiers":[]}"#).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["accepted"], 0);
        assert_eq!(bus.total_published(), 0);
    }

    #[tokio::test]
    async fn publish_failures_are_reported() {
        let bus = InMemoryBus::new();
        bus.fail_publishes_to("workflow-queue");

        let (status, body) = post_run(app(&bus), r#"{"subjectIdentifiers":["23"]}"#).await;

        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["accepted"], 0);
        assert_eq!(body["failed"][0], "23");
    }

    #[tokio::test]
    async fn wrong_shape_is_bad_request() {
        let bus = InMemoryBus::new();

        let (status, _) = post_run(app(&bus), r#"{"subjects":"23"}"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(bus.total_published(), 0);
    }
}
