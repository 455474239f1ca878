//! Axum integration for Crosstalk service front ends.
//!
//! Services expose a small HTTP surface next to their bus consumers: the CRM
//! serves and accepts customer records, the billing coordinator accepts batch
//! runs. This crate holds what every front end shares.
//!
//! # Request Flow
//!
//! 1. **Correlation ID** is read from `X-Correlation-ID` or generated
//! 2. **Extract data** from the request (`JsonBody`, query, path)
//! 3. **Call the service** (record store, fan-out)
//! 4. **Map the result** to a response; failures are [`AppError`]s
//!
//! # Example
//!
//! ```ignore
//! use axum::{Router, routing::{get, post}};
//! use crosstalk_web::{health_check, with_standard_layers};
//!
//! let app = with_standard_layers(
//!     Router::new()
//!         .route("/billing-runs", post(start_billing_run))
//!         .route("/health", get(health_check))
//!         .with_state(state),
//! );
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;

// Re-export key types for convenience
pub use error::AppError;
pub use extractors::{CorrelationId, JsonBody};
pub use handlers::health_check;
pub use middleware::{
    CORRELATION_ID_HEADER, CorrelationIdExt, track_correlation_id, with_standard_layers,
};

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
