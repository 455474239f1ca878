//! Reconnect policy for consumer loops.
//!
//! When a subscription ends (the broker connection dropped) a consumer either
//! gives up immediately or resubscribes after an exponential backoff, up to a
//! bounded number of attempts.
//!
//! # Example
//!
//! ```rust
//! use crosstalk_runtime::retry::ReconnectPolicy;
//! use std::time::Duration;
//!
//! let policy = ReconnectPolicy::builder()
//!     .max_reconnects(5)
//!     .initial_delay(Duration::from_millis(100))
//!     .max_delay(Duration::from_secs(10))
//!     .multiplier(2.0)
//!     .build();
//!
//! assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
//! ```

use std::time::Duration;

/// Reconnect policy with exponential backoff.
///
/// # Default Values
///
/// - `max_reconnects`: 0 (a lost connection is fatal)
/// - `initial_delay`: 500ms
/// - `max_delay`: 30 seconds
/// - `multiplier`: 2.0 (delay doubles each attempt)
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    /// Maximum number of consecutive reconnect attempts
    pub max_reconnects: usize,
    /// Delay before the first reconnect
    pub initial_delay: Duration,
    /// Maximum delay between reconnects (cap for exponential backoff)
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::fatal()
    }
}

impl ReconnectPolicy {
    /// A policy that never reconnects: losing the bus ends the consumer.
    #[must_use]
    pub const fn fatal() -> Self {
        Self {
            max_reconnects: 0,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }

    /// Create a new policy builder.
    #[must_use]
    pub const fn builder() -> ReconnectPolicyBuilder {
        ReconnectPolicyBuilder {
            policy: Self::fatal(),
        }
    }

    /// Whether another reconnect is allowed after `attempts` consecutive ones.
    #[must_use]
    pub const fn allows(&self, attempts: usize) -> bool {
        attempts < self.max_reconnects
    }

    /// Calculate delay for a given attempt number.
    ///
    /// Uses exponential backoff: `initial_delay * multiplier ^ attempt`,
    /// capped at `max_delay`.
    #[must_use]
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_possible_wrap
    )] // Millisecond delays are far below the lossy ranges
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return self.initial_delay;
        }

        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let delay_ms = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);

        if !delay_ms.is_finite() || delay_ms >= self.max_delay.as_millis() as f64 {
            return self.max_delay;
        }

        Duration::from_millis(delay_ms as u64)
    }
}

/// Builder for [`ReconnectPolicy`].
#[derive(Debug, Clone)]
pub struct ReconnectPolicyBuilder {
    policy: ReconnectPolicy,
}

impl ReconnectPolicyBuilder {
    /// Set maximum number of consecutive reconnects.
    #[must_use]
    pub const fn max_reconnects(mut self, max_reconnects: usize) -> Self {
        self.policy.max_reconnects = max_reconnects;
        self
    }

    /// Set delay before the first reconnect.
    #[must_use]
    pub const fn initial_delay(mut self, delay: Duration) -> Self {
        self.policy.initial_delay = delay;
        self
    }

    /// Set maximum delay (cap for exponential backoff).
    #[must_use]
    pub const fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = delay;
        self
    }

    /// Set multiplier for exponential backoff.
    #[must_use]
    pub const fn multiplier(mut self, multiplier: f64) -> Self {
        self.policy.multiplier = multiplier;
        self
    }

    /// Build the [`ReconnectPolicy`].
    #[must_use]
    pub fn build(self) -> ReconnectPolicy {
        self.policy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_policy_is_fatal() {
        let policy = ReconnectPolicy::default();
        assert!(!policy.allows(0));
    }

    #[test]
    fn bounded_policy_allows_up_to_max() {
        let policy = ReconnectPolicy::builder().max_reconnects(2).build();
        assert!(policy.allows(0));
        assert!(policy.allows(1));
        assert!(!policy.allows(2));
    }

    #[test]
    fn delay_grows_exponentially() {
        let policy = ReconnectPolicy::builder()
            .initial_delay(Duration::from_millis(100))
            .multiplier(2.0)
            .max_delay(Duration::from_secs(10))
            .build();

        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(800));
    }

    #[test]
    fn delay_is_capped() {
        let policy = ReconnectPolicy::builder()
            .initial_delay(Duration::from_millis(1000))
            .multiplier(10.0)
            .max_delay(Duration::from_secs(2))
            .build();

        assert_eq!(policy.delay_for_attempt(5), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(10_000), Duration::from_secs(2));
    }
}
