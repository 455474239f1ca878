//! In-memory state store and the name tally handler.

use async_trait::async_trait;
use crosstalk_core::handler::{HandlerError, MessageHandler};
use crosstalk_core::message::BusMessage;
use crosstalk_core::state::{StateError, StateStore};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// [`StateStore`] backed by a map in process memory.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    values: RwLock<HashMap<String, String>>,
}

impl InMemoryStateStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StateStore for InMemoryStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StateError> {
        Ok(self
            .values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    async fn save(&self, key: &str, value: String) -> Result<(), StateError> {
        self.values
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), value);
        Ok(())
    }
}

/// Counts how often each name was seen on the names topic.
///
/// The message body is the name, either as a JSON string or as plain text.
/// Counts live in the state store under the name itself.
#[derive(Clone)]
pub struct NameTally {
    store: Arc<dyn StateStore>,
}

impl NameTally {
    /// Create a tally keeping its counts in `store`.
    #[must_use]
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self { store }
    }

    /// Record one more occurrence of `name` and return the new count.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::InvalidValue`] if the stored count is not a
    /// number, or the store's own error.
    pub async fn increment(&self, name: &str) -> Result<u64, StateError> {
        let current = match self.store.get(name).await? {
            None => 0,
            Some(raw) => raw.trim().parse::<u64>().map_err(|e| StateError::InvalidValue {
                key: name.to_string(),
                reason: e.to_string(),
            })?,
        };
        let count = current.saturating_add(1);
        self.store.save(name, count.to_string()).await?;
        Ok(count)
    }
}

#[async_trait]
impl MessageHandler for NameTally {
    async fn handle(&self, message: &BusMessage) -> Result<(), HandlerError> {
        let name = message
            .decode::<String>()
            .unwrap_or_else(|_| message.value_lossy());
        let name = name.trim();
        if name.is_empty() {
            return Err(HandlerError::Other("name message has an empty body".to_string()));
        }

        let count = self.increment(name).await?;
        info!(name = %name, count, "Name occurrence recorded");
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    fn tally() -> (NameTally, Arc<InMemoryStateStore>) {
        let store = Arc::new(InMemoryStateStore::new());
        (NameTally::new(store.clone()), store)
    }

    #[tokio::test]
    async fn first_occurrence_counts_one() {
        let (tally, store) = tally();

        assert_eq!(tally.increment("Molly").await.unwrap(), 1);
        assert_eq!(store.get("Molly").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn handler_increments_per_message() {
        let (tally, store) = tally();

        tally.handle(&BusMessage::new("names", "Molly")).await.unwrap();
        tally.handle(&BusMessage::new("names", "\"Molly\"")).await.unwrap();
        tally.handle(&BusMessage::new("names", "Peter")).await.unwrap();

        assert_eq!(store.get("Molly").await.unwrap().as_deref(), Some("2"));
        assert_eq!(store.get("Peter").await.unwrap().as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn corrupt_count_is_reported() {
        let (tally, store) = tally();
        store.save("Molly", "many".to_string()).await.unwrap();

        let result = tally.handle(&BusMessage::new("names", "Molly")).await;

        assert!(matches!(
            result,
            Err(HandlerError::State(StateError::InvalidValue { .. }))
        ));
    }

    #[tokio::test]
    async fn empty_body_is_rejected() {
        let (tally, _) = tally();
        assert!(tally.handle(&BusMessage::new("names", "  ")).await.is_err());
    }
}
