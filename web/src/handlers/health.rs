//! Health check endpoint.
//!
//! Used by load balancers and container orchestrators to verify the process
//! is serving HTTP.

use axum::http::StatusCode;

/// Liveness check.
///
/// Returns 200 OK with the body `ok`. Does not check the message bus.
///
/// # Endpoint
///
/// ```text
/// GET /health
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_simple_health_check() {
        let (status, body) = health_check().await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, "ok");
    }
}
