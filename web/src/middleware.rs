//! Axum middleware for request tracking and observability.
//!
//! - **Correlation ID tracking**: take the `X-Correlation-ID` request header
//!   or generate a UUID, store it in the request extensions, run the request
//!   in a span carrying it and echo it in the response header
//! - **HTTP tracing**: `tower-http`'s trace layer for request/response logs
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::get};
//! use crosstalk_web::middleware::with_standard_layers;
//!
//! let app = with_standard_layers(
//!     Router::new().route("/", get(list_customers)),
//! );
//! ```

use axum::{
    Router,
    extract::Request,
    http::{HeaderMap, HeaderValue},
    middleware::{self, Next},
    response::Response,
};
use tower_http::trace::TraceLayer;
use tracing::Instrument;
use uuid::Uuid;

/// Header name for correlation ID.
pub const CORRELATION_ID_HEADER: &str = "X-Correlation-ID";

/// Wrap `router` in the layers every service front end uses: correlation
/// IDs and HTTP tracing.
pub fn with_standard_layers<S>(router: Router<S>) -> Router<S>
where
    S: Clone + Send + Sync + 'static,
{
    router
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(track_correlation_id))
}

/// The caller's correlation ID if it is a UUID, otherwise a fresh UUID v4.
#[must_use]
pub fn correlation_id_from(headers: &HeaderMap) -> Uuid {
    headers
        .get(CORRELATION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4)
}

/// Middleware function behind [`with_standard_layers`].
///
/// Stores the correlation ID in the request extensions, runs the rest of the
/// stack inside an `http_request` span carrying it and echoes it in the
/// response header.
pub async fn track_correlation_id(mut req: Request, next: Next) -> Response {
    let correlation_id = correlation_id_from(req.headers());
    req.extensions_mut().insert(correlation_id);

    let span = tracing::info_span!(
        "http_request",
        correlation_id = %correlation_id,
        method = %req.method(),
        path = %req.uri().path(),
    );
    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&correlation_id.to_string()) {
        response.headers_mut().insert(CORRELATION_ID_HEADER, value);
    }
    response
}

/// Extension trait for reading the correlation ID the middleware stored.
pub trait CorrelationIdExt {
    /// The correlation ID, or `None` if the middleware is not installed.
    fn correlation_id(&self) -> Option<Uuid>;
}

impl CorrelationIdExt for Request {
    fn correlation_id(&self) -> Option<Uuid> {
        self.extensions().get::<Uuid>().copied()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        routing::get,
    };
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/test", get(|| async { "ok" }))
            .layer(middleware::from_fn(track_correlation_id))
    }

    #[tokio::test]
    async fn correlation_id_generated_if_missing() {
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();

        let response = app().oneshot(request).await.unwrap();

        let correlation_id = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .expect("Correlation ID header should be present");
        assert!(Uuid::parse_str(correlation_id.to_str().unwrap()).is_ok());
    }

    #[tokio::test]
    async fn correlation_id_preserved_from_request() {
        let request_uuid = Uuid::new_v4();
        let request = Request::builder()
            .uri("/test")
            .header(CORRELATION_ID_HEADER, request_uuid.to_string())
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        let response_id = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .expect("Correlation ID header should be present")
            .to_str()
            .unwrap();
        assert_eq!(response_id, request_uuid.to_string());
    }

    #[tokio::test]
    async fn invalid_uuid_generates_new() {
        let request = Request::builder()
            .uri("/test")
            .header(CORRELATION_ID_HEADER, "not-a-uuid")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();

        let uuid_str = response
            .headers()
            .get(CORRELATION_ID_HEADER)
            .expect("Correlation ID header should be present")
            .to_str()
            .unwrap();
        assert!(Uuid::parse_str(uuid_str).is_ok());
        assert_ne!(uuid_str, "not-a-uuid");
    }

    #[tokio::test]
    async fn handlers_see_the_id_in_extensions() {
        async fn handler(req: axum::extract::Request) -> String {
            req.correlation_id()
                .map(|id| id.to_string())
                .unwrap_or_default()
        }

        let id = Uuid::new_v4();
        let app = Router::new()
            .route("/test", get(handler))
            .layer(middleware::from_fn(track_correlation_id));
        let request = Request::builder()
            .uri("/test")
            .header(CORRELATION_ID_HEADER, id.to_string())
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(body, id.to_string().as_bytes());
    }

    #[tokio::test]
    async fn standard_layers_add_the_header() {
        let app = with_standard_layers(Router::new().route("/test", get(|| async { "ok" })));
        let request = Request::builder().uri("/test").body(Body::empty()).unwrap();

        let response = app.oneshot(request).await.unwrap();

        assert!(response.headers().contains_key(CORRELATION_ID_HEADER));
    }
}
