//! Redpanda message bus for Crosstalk services.
//!
//! This crate provides [`RedpandaBus`], an implementation of the
//! [`MessageBus`] trait from `crosstalk-core` on top of rdkafka. Any
//! Kafka-compatible broker works: Redpanda, Apache Kafka, managed offerings.
//!
//! # Delivery Semantics
//!
//! **At-least-once delivery** with manual offset commits:
//! - Offsets are committed AFTER the message reached the subscriber's channel
//! - If the process crashes before commit, messages are redelivered
//! - Handlers must tolerate duplicates (answers are matched by `qaIdentifier`)
//! - Ordering is guaranteed within a partition; the message key picks the
//!   partition
//!
//! **Configuration options**:
//! - `consumer_group`: explicit consumer group shared by every subscription
//! - `buffer_size`: messages buffered between broker and consumer (default: 1000)
//! - `auto_offset_reset`: where a new group starts reading (default: "earliest")
//!
//! # Disconnects
//!
//! When every broker is down the subscription stream reports one
//! [`BusError::TransportError`] and then ends. The consumer loop treats the
//! end of the stream as a lost connection.
//!
//! # Example
//!
//! ```no_run
//! use crosstalk_core::bus::{MessageBus, publish_json};
//! use crosstalk_redpanda::RedpandaBus;
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaBus::new("localhost:9092")?;
//!
//! publish_json(&bus, "names", None, "Molly").await?;
//!
//! let mut stream = bus.subscribe(&["names"]).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(message) => println!("Received: {}", message.value_lossy()),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use crosstalk_core::bus::{BusError, MessageBus, MessageStream};
use crosstalk_core::message::{BusMessage, OutgoingMessage};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

const DEFAULT_BUFFER_SIZE: usize = 1000;
const DEFAULT_OFFSET_RESET: &str = "earliest";

/// Kafka-compatible [`MessageBus`].
///
/// Holds one producer shared by every publish. Every subscription creates its
/// own consumer owned by a background task.
///
/// # Example
///
/// ```no_run
/// use crosstalk_redpanda::RedpandaBus;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaBus::builder()
///     .brokers("kafka-1:19092,kafka-2:19093")
///     .consumer_group("customer-service")
///     .auto_offset_reset("earliest")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct RedpandaBus {
    /// Kafka producer for publishing messages
    producer: FutureProducer,
    /// Broker addresses (for creating consumers)
    brokers: String,
    /// Producer timeout
    timeout: Duration,
    /// Consumer group ID (if explicitly set)
    consumer_group: Option<String>,
    /// Message buffer size for subscribers
    buffer_size: usize,
    /// Auto offset reset policy
    auto_offset_reset: String,
}

impl RedpandaBus {
    /// Create a bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if the producer cannot be
    /// created (e.g. an invalid broker list).
    pub fn new(brokers: &str) -> Result<Self, BusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the bus.
    #[must_use]
    pub fn builder() -> RedpandaBusBuilder {
        RedpandaBusBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Consumer group a subscription to `topics` joins.
    ///
    /// The configured group if there is one, otherwise one derived from the
    /// sorted topic list so the same subscription always resumes its offsets.
    #[must_use]
    pub fn consumer_group_for(&self, topics: &[String]) -> String {
        self.consumer_group.clone().unwrap_or_else(|| {
            let mut sorted = topics.to_vec();
            sorted.sort();
            format!("crosstalk-{}", sorted.join("-"))
        })
    }
}

/// Builder for configuring a [`RedpandaBus`].
#[derive(Default)]
pub struct RedpandaBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    buffer_size: Option<usize>,
    auto_offset_reset: Option<String>,
}

impl RedpandaBusBuilder {
    /// Set the broker addresses (comma-separated, e.g. `"localhost:9092"`).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: `"0"`, `"1"` or `"all"`.
    ///
    /// Default: "1"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: `"none"`, `"gzip"`, `"snappy"`, `"lz4"`,
    /// `"zstd"`.
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID for subscriptions.
    ///
    /// Instances of one service sharing a group split the partitions between
    /// them. Without it the group is derived from the subscribed topics.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set how many messages may wait between the broker and the consumer.
    ///
    /// Default: 1000. Must be greater than zero.
    #[must_use]
    pub const fn buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = Some(buffer_size);
        self
    }

    /// Set where new consumer groups start reading: `"earliest"`, `"latest"`
    /// or `"error"`.
    ///
    /// Default: "earliest" (services replay the topic from the beginning)
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Build the [`RedpandaBus`].
    ///
    /// # Errors
    ///
    /// Returns [`BusError::ConnectionFailed`] if:
    /// - Brokers not set
    /// - `buffer_size` is zero
    /// - The producer cannot be created
    pub fn build(self) -> Result<RedpandaBus, BusError> {
        let brokers = self
            .brokers
            .ok_or_else(|| BusError::ConnectionFailed("Brokers not configured".to_string()))?;

        let buffer_size = self.buffer_size.unwrap_or(DEFAULT_BUFFER_SIZE);
        if buffer_size == 0 {
            return Err(BusError::ConnectionFailed(
                "buffer_size must be greater than 0".to_string(),
            ));
        }

        let acks = self.producer_acks.as_deref().unwrap_or("1");
        let compression = self.compression.as_deref().unwrap_or("none");
        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| DEFAULT_OFFSET_RESET.to_string());

        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| BusError::ConnectionFailed(format!("Failed to create producer: {e}")))?;

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            buffer_size,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaBus created"
        );

        Ok(RedpandaBus {
            producer,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            buffer_size,
            auto_offset_reset,
        })
    }
}

/// Errors after which the consumer will not recover on its own.
fn ends_subscription(error: &KafkaError) -> bool {
    matches!(
        error,
        KafkaError::MessageConsumption(RDKafkaErrorCode::AllBrokersDown)
    )
}

fn to_bus_message(message: &BorrowedMessage<'_>) -> BusMessage {
    BusMessage {
        topic: message.topic().to_string(),
        key: message
            .key()
            .map(|key| String::from_utf8_lossy(key).into_owned()),
        value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
        partition: Some(message.partition()),
        offset: Some(message.offset()),
        timestamp: message
            .timestamp()
            .to_millis()
            .and_then(DateTime::<Utc>::from_timestamp_millis),
    }
}

impl MessageBus for RedpandaBus {
    fn publish(
        &self,
        topic: &str,
        message: &OutgoingMessage,
    ) -> Pin<Box<dyn Future<Output = Result<(), BusError>> + Send + '_>> {
        let topic = topic.to_string();
        let message = message.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let mut record = FutureRecord::<str, [u8]>::to(&topic).payload(&message.value);
            if let Some(key) = message.key.as_deref() {
                record = record.key(key);
            }

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        key = ?message.key,
                        "Message published"
                    );
                    Ok(())
                }
                Err((kafka_error, _)) => {
                    tracing::error!(topic = %topic, error = %kafka_error, "Failed to publish message");
                    Err(BusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                }
            }
        })
    }

    fn subscribe(
        &self,
        topics: &[&str],
    ) -> Pin<Box<dyn Future<Output = Result<MessageStream, BusError>> + Send + '_>> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let brokers = self.brokers.clone();
        let consumer_group_id = self.consumer_group_for(&topics);
        let buffer_size = self.buffer_size;
        let auto_offset_reset = self.auto_offset_reset.clone();

        Box::pin(async move {
            if topics.is_empty() {
                return Err(BusError::SubscriptionFailed {
                    topics,
                    reason: "no topics given".to_string(),
                });
            }

            let consumer: StreamConsumer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &auto_offset_reset)
                .set("session.timeout.ms", "6000")
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| BusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| BusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                buffer_size,
                auto_offset_reset = %auto_offset_reset,
                manual_commit = true,
                "Subscribed to topics"
            );

            let (tx, rx) = tokio::sync::mpsc::channel(buffer_size);

            tokio::spawn(async move {
                use futures::StreamExt;
                use rdkafka::consumer::CommitMode;

                let mut stream = consumer.stream();

                while let Some(received) = stream.next().await {
                    match received {
                        Ok(message) => {
                            tracing::trace!(
                                topic = message.topic(),
                                partition = message.partition(),
                                offset = message.offset(),
                                "Received message"
                            );

                            // Commit only after the message reached the channel
                            if tx.send(Ok(to_bus_message(&message))).await.is_err() {
                                tracing::debug!("Subscriber dropped, exiting consumer task");
                                break;
                            }

                            if let Err(e) = consumer.commit_message(&message, CommitMode::Async) {
                                tracing::warn!(
                                    topic = message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "Failed to commit offset (message may be redelivered)"
                                );
                            }
                        }
                        Err(e) => {
                            let fatal = ends_subscription(&e);
                            let err = BusError::TransportError(format!(
                                "Failed to receive message: {e}"
                            ));
                            if tx.send(Err(err)).await.is_err() || fatal {
                                break;
                            }
                        }
                    }
                }

                tracing::warn!("Consumer task exiting");
            });

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
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;

    #[test]
    fn redpanda_bus_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<RedpandaBus>();
        assert_sync::<RedpandaBus>();
    }

    #[test]
    fn build_without_brokers_fails() {
        let result = RedpandaBus::builder().build();
        assert!(matches!(result, Err(BusError::ConnectionFailed(_))));
    }

    #[test]
    fn zero_buffer_is_rejected() {
        let result = RedpandaBus::builder()
            .brokers("localhost:9092")
            .buffer_size(0)
            .build();
        assert!(matches!(result, Err(BusError::ConnectionFailed(ref reason)) if reason.contains("buffer_size")));
    }

    #[test]
    fn derived_consumer_group_ignores_topic_order() {
        let bus = RedpandaBus::new("localhost:9092").unwrap();

        let a = bus.consumer_group_for(&["workflow-queue".to_string(), "answers-topic".to_string()]);
        let b = bus.consumer_group_for(&["answers-topic".to_string(), "workflow-queue".to_string()]);

        assert_eq!(a, "crosstalk-answers-topic-workflow-queue");
        assert_eq!(a, b);
    }

    #[test]
    fn explicit_consumer_group_wins() {
        let bus = RedpandaBus::builder()
            .brokers("localhost:9092")
            .consumer_group("customer-service")
            .build()
            .unwrap();

        assert_eq!(bus.consumer_group_for(&["questions-topic".to_string()]), "customer-service");
    }
}
