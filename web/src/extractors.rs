//! Custom Axum extractors.
//!
//! - [`JsonBody`]: JSON request body whose rejections are [`AppError`]s
//! - [`CorrelationId`]: the request's correlation ID
//!
//! # Examples
//!
//! ```ignore
//! use crosstalk_web::extractors::{CorrelationId, JsonBody};
//!
//! async fn create_customer(
//!     correlation_id: CorrelationId,
//!     JsonBody(customer): JsonBody<serde_json::Value>,
//! ) -> Result<Json<Value>, AppError> {
//!     tracing::info!(correlation_id = %correlation_id.0, "Creating customer");
//!     ...
//! }
//! ```

use crate::error::AppError;
use crate::middleware::correlation_id_from;
use axum::{
    Json, async_trait,
    extract::{FromRequest, FromRequestParts, Request},
    http::request::Parts,
};
use serde::de::DeserializeOwned;
use uuid::Uuid;

/// JSON request body.
///
/// Behaves like [`axum::Json`] but every rejection (missing content type,
/// syntax error, wrong shape) becomes a 400 [`AppError`] with the usual error
/// body.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonBody<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonBody<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(AppError::bad_request(rejection.body_text())),
        }
    }
}

/// Correlation ID for request tracing.
///
/// Reads the ID the correlation middleware stored in the request extensions,
/// falls back to the `X-Correlation-ID` header, and generates a fresh UUID v4
/// if neither is present.
#[derive(Debug, Clone, Copy)]
pub struct CorrelationId(pub Uuid);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        if let Some(id) = parts.extensions.get::<Uuid>() {
            return Ok(Self(*id));
        }

        Ok(Self(correlation_id_from(&parts.headers)))
    }
}
