//! # Crosstalk Core
//!
//! Core traits and message types for services that coordinate over a
//! publish/subscribe message bus.
//!
//! Services in this architecture never call each other directly. They publish
//! JSON messages on named topics and consume the topics they care about:
//!
//! - **Questions** carry a correlation id (`qaIdentifier`) and a category
//! - **Answers** echo the correlation id of the question they answer
//! - **Workflow orders** are independent units of work fanned out from a batch
//!
//! ## Core Concepts
//!
//! - [`bus::MessageBus`]: publish and subscribe against named topics
//! - [`handler::MessageHandler`]: processes one consumed message
//! - [`message`]: the wire types shared by every service
//! - [`state::StateStore`]: key/value state store collaborator
//! - [`environment::Clock`]: injected time source
//!
//! ## Example
//!
//! ```ignore
//! use crosstalk_core::bus::{publish_json, MessageBus};
//! use crosstalk_core::message::Question;
//!
//! async fn ask(bus: &dyn MessageBus) -> Result<(), crosstalk_core::bus::BusError> {
//!     let question = Question::new("customer", serde_json::json!({ "customerIdentifier": "928" }));
//!     publish_json(bus, "questions-topic", Some("customer"), &question).await
//! }
//! ```

pub mod bus;
pub mod handler;
pub mod message;
pub mod state;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};

/// Environment traits - injected dependencies
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use crosstalk_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let _now = clock.now();
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}
