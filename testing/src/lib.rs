//! # Crosstalk Testing
//!
//! Testing utilities and in-memory collaborators for Crosstalk services.
//!
//! This crate provides:
//! - [`InMemoryBus`]: a fast, deterministic message bus
//! - [`FixedClock`]: deterministic time
//! - [`RecordingHandler`] / [`FailingHandler`]: handlers for router tests
//!
//! ## Example
//!
//! ```ignore
//! use crosstalk_testing::{InMemoryBus, test_clock};
//!
//! #[tokio::test]
//! async fn test_fan_out() {
//!     let bus = InMemoryBus::new();
//!     let fan_out = WorkflowFanOut::new(Arc::new(bus.clone()), "workflow-queue", Arc::new(test_clock()));
//!
//!     fan_out.fan_out(["23", "32"]).await;
//!
//!     assert_eq!(bus.published("workflow-queue").len(), 2);
//! }
//! ```

pub mod bus;
pub mod handlers;

use chrono::{DateTime, Utc};
use crosstalk_core::environment::Clock;

/// Mock implementations of Environment traits
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use crosstalk_testing::mocks::FixedClock;
    /// use crosstalk_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Install a `tracing` subscriber for test output.
///
/// Safe to call from every test; only the first call installs the subscriber.
/// Honours `RUST_LOG`, defaulting to `debug`.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use bus::InMemoryBus;
pub use handlers::{FailingHandler, RecordingHandler};
pub use mocks::{FixedClock, test_clock};
