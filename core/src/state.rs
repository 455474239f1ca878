//! Key/value state store collaborator.
//!
//! Services that keep small pieces of state outside their own process (a
//! sidecar state store, a cache) talk to it through [`StateStore`]: plain
//! string keys, plain string values, `get` and `save`.

use async_trait::async_trait;
use thiserror::Error;

/// Errors returned by a state store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    /// The store could not be reached
    #[error("State store unavailable: {0}")]
    Unavailable(String),

    /// A stored value could not be interpreted
    #[error("Invalid value for key '{key}': {reason}")]
    InvalidValue {
        /// Key holding the value
        key: String,
        /// What was wrong with it
        reason: String,
    },
}

/// Key/value store with get/save semantics.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Fetch the value stored under `key`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Unavailable`] if the store cannot be reached.
    async fn get(&self, key: &str) -> Result<Option<String>, StateError>;

    /// Store `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Unavailable`] if the store cannot be reached.
    async fn save(&self, key: &str, value: String) -> Result<(), StateError>;
}
