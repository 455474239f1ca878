//! Integration tests for [`RedpandaBus`] with a real Kafka instance.
//!
//! These tests use testcontainers to spin up Kafka and validate:
//! - Publish/subscribe round-trip with keys and JSON bodies
//! - Consumer groups and load balancing
//! - Per-key ordering
//! - Multi-topic subscriptions
//!
//! # Running These Tests
//!
//! These tests are marked as `#[ignore]` by default because they:
//! - Require Docker to be running (for testcontainers)
//! - Take 15-60 seconds per test to spin up Kafka
//!
//! To run explicitly:
//! ```bash
//! cargo test -p crosstalk-redpanda --test integration_tests -- --ignored
//! ```

#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use crosstalk_core::bus::{MessageBus, MessageStream, publish_json};
use crosstalk_core::message::{BusMessage, OutgoingMessage};
use crosstalk_redpanda::RedpandaBus;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::kafka::{KAFKA_PORT, Kafka};

const WARMUP: &[u8] = b"\"warmup\"";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Greeting {
    customer_id: String,
    text: String,
}

/// Start Kafka and return the container (kept alive by the caller) and its
/// broker address.
async fn start_kafka() -> (ContainerAsync<Kafka>, String) {
    let kafka = Kafka::default()
        .with_env_var("KAFKA_AUTO_CREATE_TOPICS_ENABLE", "true")
        .start()
        .await
        .expect("Failed to start Kafka container");

    let host = kafka.get_host().await.expect("Failed to get host");
    let port = kafka
        .get_host_port_ipv4(KAFKA_PORT)
        .await
        .expect("Failed to get port");
    let brokers = format!("{host}:{port}");
    wait_for_kafka_ready(&brokers).await;
    (kafka, brokers)
}

async fn wait_for_kafka_ready(brokers: &str) {
    let max_attempts = 60;
    for attempt in 1..=max_attempts {
        if let Ok(bus) = RedpandaBus::new(brokers) {
            if bus
                .publish("warmup-topic", &OutgoingMessage::new(WARMUP))
                .await
                .is_ok()
            {
                tokio::time::sleep(Duration::from_millis(500)).await;
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(
            attempt != max_attempts,
            "Kafka failed to become ready after {max_attempts} attempts"
        );
    }
}

/// Publish a warmup message so the topic is auto-created before subscribing.
async fn ensure_topic_exists(bus: &RedpandaBus, topic: &str) {
    for attempt in 1..=30 {
        if bus.publish(topic, &OutgoingMessage::new(WARMUP)).await.is_ok() {
            tokio::time::sleep(Duration::from_secs(3)).await;
            return;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(attempt != 30, "Failed to create topic {topic}");
    }
}

/// Collect `count` non-warmup messages from `stream`.
async fn collect(stream: &mut MessageStream, count: usize) -> Vec<BusMessage> {
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(15), async {
        while received.len() < count {
            if let Some(result) = stream.next().await {
                let message = result.expect("Failed to receive message");
                if message.value != WARMUP {
                    received.push(message);
                }
            }
        }
    })
    .await
    .expect("Timeout waiting for messages");
    received
}

#[tokio::test]
#[ignore]
async fn test_publish_and_subscribe_round_trip() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = RedpandaBus::builder()
        .brokers(&brokers)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create bus");
    ensure_topic_exists(&bus, "answers-topic").await;

    let mut stream = bus
        .subscribe(&["answers-topic"])
        .await
        .expect("Failed to subscribe");
    tokio::time::sleep(Duration::from_secs(2)).await;

    let greeting = Greeting {
        customer_id: "928".to_string(),
        text: "hello".to_string(),
    };
    publish_json(&bus, "answers-topic", Some("qa-1"), &greeting)
        .await
        .expect("Failed to publish");

    let received = collect(&mut stream, 1).await;

    assert_eq!(received[0].topic, "answers-topic");
    assert_eq!(received[0].key.as_deref(), Some("qa-1"));
    assert!(received[0].offset.is_some());
    assert!(received[0].timestamp.is_some());
    let decoded: Greeting = received[0].decode().expect("Body should decode");
    assert_eq!(decoded, greeting);
}

#[tokio::test]
#[ignore]
async fn test_consumer_groups_load_balancing() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = RedpandaBus::builder()
        .brokers(&brokers)
        .consumer_group("customer-service")
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create bus");
    ensure_topic_exists(&bus, "questions-topic").await;

    let mut stream1 = bus
        .subscribe(&["questions-topic"])
        .await
        .expect("Failed to subscribe consumer 1");
    let mut stream2 = bus
        .subscribe(&["questions-topic"])
        .await
        .expect("Failed to subscribe consumer 2");
    tokio::time::sleep(Duration::from_secs(3)).await;

    for i in 0..10 {
        bus.publish(
            "questions-topic",
            &OutgoingMessage::new(format!("\"q{i}\"")).with_key(format!("k{i}")),
        )
        .await
        .expect("Failed to publish");
    }

    let mut received1 = HashSet::new();
    let mut received2 = HashSet::new();
    tokio::time::timeout(Duration::from_secs(15), async {
        loop {
            tokio::select! {
                Some(Ok(message)) = stream1.next() => {
                    if message.value != WARMUP {
                        received1.insert(message.value_lossy());
                    }
                }
                Some(Ok(message)) = stream2.next() => {
                    if message.value != WARMUP {
                        received2.insert(message.value_lossy());
                    }
                }
            }
            if received1.len() + received2.len() >= 10 {
                break;
            }
        }
    })
    .await
    .expect("Timeout waiting for messages");

    assert!(
        received1.is_disjoint(&received2),
        "Consumers in one group should not both receive a message"
    );
    let total: HashSet<_> = received1.union(&received2).cloned().collect();
    assert_eq!(total.len(), 10, "Should have received all 10 messages");
}

#[tokio::test]
#[ignore]
async fn test_same_key_keeps_order() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = RedpandaBus::builder()
        .brokers(&brokers)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create bus");
    ensure_topic_exists(&bus, "workflow-queue").await;

    let mut stream = bus
        .subscribe(&["workflow-queue"])
        .await
        .expect("Failed to subscribe");
    tokio::time::sleep(Duration::from_secs(2)).await;

    for i in 0..5 {
        bus.publish(
            "workflow-queue",
            &OutgoingMessage::new(format!("{i}")).with_key("23"),
        )
        .await
        .expect("Failed to publish");
    }

    let received = collect(&mut stream, 5).await;
    let bodies: Vec<_> = received.iter().map(BusMessage::value_lossy).collect();
    assert_eq!(bodies, vec!["0", "1", "2", "3", "4"]);
}

#[tokio::test]
#[ignore]
async fn test_multiple_topics() {
    let (_kafka, brokers) = start_kafka().await;
    let bus = RedpandaBus::builder()
        .brokers(&brokers)
        .auto_offset_reset("earliest")
        .build()
        .expect("Failed to create bus");
    ensure_topic_exists(&bus, "workflow-queue").await;
    ensure_topic_exists(&bus, "answers-topic").await;

    let mut stream = bus
        .subscribe(&["workflow-queue", "answers-topic"])
        .await
        .expect("Failed to subscribe");
    tokio::time::sleep(Duration::from_secs(2)).await;

    bus.publish("workflow-queue", &OutgoingMessage::new("\"order\""))
        .await
        .expect("Failed to publish order");
    bus.publish("answers-topic", &OutgoingMessage::new("\"answer\""))
        .await
        .expect("Failed to publish answer");

    let received = collect(&mut stream, 2).await;
    let topics: HashSet<_> = received.iter().map(|m| m.topic.clone()).collect();
    assert!(topics.contains("workflow-queue"));
    assert!(topics.contains("answers-topic"));
}
