//! Message bus abstraction for cross-service communication.
//!
//! This module provides the [`MessageBus`] trait for publishing to and
//! subscribing from named topics. Services never talk to each other directly:
//! a requester publishes a question, a responder consumes it from its own
//! subscription and publishes the answer on another topic.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   questions-topic   ┌──────────────┐
//! │  Requester   │ ──────────────────► │  Responder   │
//! │ (billing)    │                     │  (CRM)       │
//! │              │ ◄────────────────── │              │
//! └──────────────┘    answers-topic    └──────────────┘
//! ```
//!
//! # Key Principles
//!
//! - **At-least-once delivery**: Messages may be delivered multiple times
//! - **Ordered within partition**: Messages with the same key keep their order
//! - **No order across topics**: Subscribers must not assume one
//! - **JSON bodies**: Every body is UTF-8 JSON
//!
//! # Implementations
//!
//! - `RedpandaBus` (crate `crosstalk-redpanda`) - Kafka-compatible brokers
//! - `InMemoryBus` (crate `crosstalk-testing`) - For tests
//!
//! # Example
//!
//! ```rust,ignore
//! use crosstalk_core::bus::{MessageBus, publish_json};
//! use futures::StreamExt;
//!
//! async fn example(bus: &dyn MessageBus) -> Result<(), BusError> {
//!     publish_json(bus, "workflow-queue", Some("23"), &order).await?;
//!
//!     let mut stream = bus.subscribe(&["answers-topic"]).await?;
//!     while let Some(result) = stream.next().await {
//!         match result {
//!             Ok(message) => println!("Received on {}", message.topic),
//!             Err(e) => eprintln!("Error: {e}"),
//!         }
//!     }
//!     Ok(())
//! }
//! ```

use crate::message::{BusMessage, OutgoingMessage};
use futures::Stream;
use serde::Serialize;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors that can occur during bus operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    /// Failed to connect to the bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to encode a message body
    #[error("Serialization failed: {0}")]
    SerializationFailed(String),

    /// Network or transport error while consuming
    #[error("Transport error: {0}")]
    TransportError(String),

    /// The subscription ended; the consumer lost its connection to the bus
    #[error("Disconnected from topics {topics:?}")]
    Disconnected {
        /// Topics of the subscription that ended
        topics: Vec<String>,
    },
}

/// Stream of messages from a subscription.
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<BusMessage, BusError>> + Send>>;

/// Trait for message bus implementations.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync` so one bus can be shared by the
/// HTTP handlers, the fan-out loop and every consumer task.
///
/// # Dyn Compatibility
///
/// This trait uses explicit `Pin<Box<dyn Future>>` returns instead of `async fn`
/// so it can be used as `Arc<dyn MessageBus>`.
pub trait MessageBus: Send + Sync {
    /// Publish a message to a topic.
    ///
    /// Success means the bus accepted the message, not that any subscriber
    /// processed it.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::PublishFailed`] if the bus rejects the message.
    fn publish(
        &self,
        topic: &str,
        message: &OutgoingMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>>;

    /// Subscribe to one or more topics and receive a stream of messages.
    ///
    /// Messages are yielded in delivery order per partition. The stream ends
    /// when the bus connection is lost.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::SubscriptionFailed`] if subscription fails.
    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>>;
}

/// Serialize `value` as JSON and publish it on `topic`.
///
/// # Errors
///
/// Returns [`BusError::SerializationFailed`] if `value` cannot be encoded, or
/// whatever [`MessageBus::publish`] returns.
pub async fn publish_json<T>(
    bus: &dyn MessageBus,
    topic: &str,
    key: Option<&str>,
    value: &T,
) -> Result<(), BusError>
where
    T: Serialize + ?Sized,
{
    let mut message = OutgoingMessage::json(value)
        .map_err(|e| BusError::SerializationFailed(e.to_string()))?;
    message.key = key.map(str::to_string);
    bus.publish(topic, &message).await
}
