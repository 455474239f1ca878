//! In-memory message bus for fast, deterministic tests.
//!
//! Every subscription behaves like its own consumer group: it sees every
//! message published after it subscribed, in publish order. Published
//! messages are also kept in a log so tests can assert on what was sent
//! without subscribing at all.

#![allow(clippy::missing_panics_doc)] // Test infrastructure recovers poisoned locks

use chrono::Utc;
use crosstalk_core::bus::{BusError, MessageBus, MessageStream};
use crosstalk_core::message::{BusMessage, OutgoingMessage};
use serde::de::DeserializeOwned;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{Notify, mpsc};

type Delivery = Result<BusMessage, BusError>;

struct Subscriber {
    topics: HashSet<String>,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct State {
    log: Vec<BusMessage>,
    offsets: HashMap<String, i64>,
    subscribers: Vec<Subscriber>,
    failing_topics: HashSet<String>,
}

/// In-memory [`MessageBus`].
///
/// Cheap to clone; clones share the same log and subscribers.
///
/// # Example
///
/// ```
/// use crosstalk_core::bus::MessageBus;
/// use crosstalk_core::message::OutgoingMessage;
/// use crosstalk_testing::InMemoryBus;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryBus::new();
/// bus.publish("names", &OutgoingMessage::new("Molly")).await?;
/// assert_eq!(bus.published("names").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryBus {
    state: Arc<Mutex<State>>,
    published_signal: Arc<Notify>,
}

impl InMemoryBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// All messages published on `topic`, in publish order.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<BusMessage> {
        self.lock()
            .log
            .iter()
            .filter(|m| m.topic == topic)
            .cloned()
            .collect()
    }

    /// Decode every message published on `topic` as `T`, skipping bodies
    /// that do not decode.
    #[must_use]
    pub fn published_json<T: DeserializeOwned>(&self, topic: &str) -> Vec<T> {
        self.published(topic)
            .iter()
            .filter_map(|m| m.decode().ok())
            .collect()
    }

    /// Total number of messages published on any topic.
    #[must_use]
    pub fn total_published(&self) -> usize {
        self.lock().log.len()
    }

    /// Make every subsequent publish to `topic` fail.
    pub fn fail_publishes_to(&self, topic: impl Into<String>) {
        self.lock().failing_topics.insert(topic.into());
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        let mut state = self.lock();
        state.subscribers.retain(|s| !s.tx.is_closed());
        state.subscribers.len()
    }

    /// End every subscription stream, as a broker disconnect would.
    pub fn disconnect_all(&self) {
        self.lock().subscribers.clear();
    }

    /// Inject a delivery error into every subscription of `topic`.
    pub fn inject_error(&self, topic: &str, error: BusError) {
        let state = self.lock();
        for subscriber in state.subscribers.iter().filter(|s| s.topics.contains(topic)) {
            let _ = subscriber.tx.send(Err(error.clone()));
        }
    }

    /// Wait until at least `count` messages were published on `topic`.
    ///
    /// Returns the messages, or `None` if `timeout` elapsed first.
    pub async fn wait_for_published(
        &self,
        topic: &str,
        count: usize,
        timeout: Duration,
    ) -> Option<Vec<BusMessage>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let notified = self.published_signal.notified();
            let messages = self.published(topic);
            if messages.len() >= count {
                return Some(messages);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return None;
            }
        }
    }
}

impl MessageBus for InMemoryBus {
    fn publish(
        &self,
        topic: &str,
        message: &OutgoingMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let topic = topic.to_string();
        let message = message.clone();

        Box::pin(async move {
            {
                let mut state = self.lock();
                if state.failing_topics.contains(&topic) {
                    return Err(BusError::PublishFailed {
                        topic,
                        reason: "publishing disabled for topic".to_string(),
                    });
                }

                let offset = state.offsets.entry(topic.clone()).or_insert(0);
                let delivered = BusMessage {
                    topic: topic.clone(),
                    key: message.key,
                    value: message.value,
                    partition: Some(0),
                    offset: Some(*offset),
                    timestamp: Some(Utc::now()),
                };
                *offset += 1;

                state.subscribers.retain(|s| !s.tx.is_closed());
                for subscriber in state.subscribers.iter().filter(|s| s.topics.contains(&topic)) {
                    let _ = subscriber.tx.send(Ok(delivered.clone()));
                }
                state.log.push(delivered);
            }
            self.published_signal.notify_waiters();
            Ok(())
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>> {
        let topics: HashSet<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            if topics.is_empty() {
                return Err(BusError::SubscriptionFailed {
                    topics: Vec::new(),
                    reason: "no topics given".to_string(),
                });
            }

            let (tx, rx) = mpsc::unbounded_channel();
            self.lock().subscribers.push(Subscriber { topics, tx });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as MessageStream)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)] // Test code can use unwrap/expect
mod tests {
    use super::*;
    use futures::StreamExt;

    #[tokio::test]
    async fn subscribers_only_see_their_topics() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe(&["answers-topic"]).await.unwrap();

        bus.publish("questions-topic", &OutgoingMessage::new("q"))
            .await
            .unwrap();
        bus.publish("answers-topic", &OutgoingMessage::new("a"))
            .await
            .unwrap();

        let received = stream.next().await.unwrap().unwrap();
        assert_eq!(received.topic, "answers-topic");
        assert_eq!(received.value, b"a".to_vec());
        assert_eq!(received.offset, Some(0));
    }

    #[tokio::test]
    async fn offsets_increase_per_topic() {
        let bus = InMemoryBus::new();
        for _ in 0..3 {
            bus.publish("names", &OutgoingMessage::new("x")).await.unwrap();
        }
        let offsets: Vec<_> = bus.published("names").iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![Some(0), Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn failing_topic_rejects_publish() {
        let bus = InMemoryBus::new();
        bus.fail_publishes_to("workflow-queue");

        let result = bus
            .publish("workflow-queue", &OutgoingMessage::new("x"))
            .await;

        assert!(matches!(result, Err(BusError::PublishFailed { .. })));
        assert!(bus.published("workflow-queue").is_empty());
    }

    #[tokio::test]
    async fn disconnect_ends_streams() {
        let bus = InMemoryBus::new();
        let mut stream = bus.subscribe(&["names"]).await.unwrap();

        bus.disconnect_all();

        assert!(stream.next().await.is_none());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn wait_for_published_sees_later_publish() {
        let bus = InMemoryBus::new();
        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            publisher
                .publish("names", &OutgoingMessage::new("late"))
                .await
                .unwrap();
        });

        let messages = bus
            .wait_for_published("names", 1, Duration::from_secs(2))
            .await
            .expect("message should arrive");
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn subscribe_without_topics_fails() {
        let bus = InMemoryBus::new();
        assert!(bus.subscribe(&[]).await.is_err());
    }
}
