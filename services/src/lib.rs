//! # Crosstalk Services
//!
//! The services of the labs, built on `crosstalk-runtime`:
//!
//! - **crm**: customer registry; answers `customer` questions, serves
//!   customers over HTTP and publishes connection mandate changes
//! - **iot-platform**: read model of connection mandates, served over HTTP
//! - **billing-coordinator**: accepts billing runs over HTTP and fans them out
//!   as `bill-generation` workflow orders
//! - **billing-engine**: consumes workflow orders, asks the CRM about each
//!   customer and generates the bill line
//!
//! ```text
//!  POST /billing-runs
//!        │
//!  ┌─────▼───────┐ workflow-queue ┌────────────────┐ questions-topic ┌─────┐
//!  │ coordinator │ ─────────────► │ billing-engine │ ──────────────► │ crm │
//!  └─────────────┘                │                │ ◄────────────── │     │
//!                                 └────────────────┘  answers-topic  └──┬──┘
//!                                                                       │
//!  GET /?connectionId  ┌──────────────┐  connection-mandates-topic      │
//!  ──────────────────► │ iot-platform │ ◄───────────────────────────────┘
//!                      └──────────────┘
//! ```
//!
//! Each binary loads [`Config`] from the environment, connects to the bus
//! and runs an [`Application`] until Ctrl+C, SIGTERM or a lost bus.

pub mod billing_engine;
pub mod bootstrap;
pub mod config;
pub mod coordinator;
pub mod crm;
pub mod iot_platform;
pub mod lifecycle;

pub use billing_engine::{BillingEngine, BillingOutcome};
pub use config::{Config, ConfigError};
pub use lifecycle::{Application, LifecycleError};
