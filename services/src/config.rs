//! Configuration for the Crosstalk services.
//!
//! Loads configuration from environment variables with defaults that match
//! the local Compose setup. Every service reads the same [`Config`] and uses
//! the parts it needs.

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Broker list used when `BUS_BROKERS` is not set.
pub const DEFAULT_BROKERS: &str = "kafka-1:19092,kafka-2:19093,kafka-3:19094";

/// Configuration that cannot be used to start a service.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required value is empty
    #[error("{0} must not be empty")]
    Empty(&'static str),

    /// Questions and answers would share a topic
    #[error("questions and answers must use different topics (both are '{0}')")]
    SharedQaTopic(String),

    /// The handler timeout would cut off waiting for or composing answers
    #[error(
        "HANDLER_TIMEOUT_MS ({handler_timeout_ms}) must exceed ANSWER_TIMEOUT_MS and ANSWER_DELAY_MS ({required_ms})"
    )]
    HandlerTimeoutTooShort {
        /// Configured handler timeout
        handler_timeout_ms: u64,
        /// Larger of the answer timeout and the answer delay
        required_ms: u64,
    },
}

/// Service configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Message bus connection
    pub bus: BusConfig,
    /// Topic names
    pub topics: TopicsConfig,
    /// HTTP server
    pub server: ServerConfig,
    /// Question/answer timing
    pub correlation: CorrelationConfig,
    /// CRM record store
    pub crm: CrmConfig,
}

/// Message bus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Broker addresses (comma-separated)
    pub brokers: String,
    /// Consumer group; derived from the topics when unset
    pub consumer_group: Option<String>,
    /// Where a new consumer group starts reading (`earliest` or `latest`)
    pub auto_offset_reset: String,
    /// Resubscribe attempts after a lost connection (0 = exit)
    pub max_reconnects: usize,
    /// Delay before the first resubscribe, in milliseconds
    pub reconnect_delay_ms: u64,
}

/// Topic names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicsConfig {
    /// Topic questions are published on
    pub questions: String,
    /// Topic answers are published on
    pub answers: String,
    /// Topic workflow orders are published on
    pub workflow: String,
    /// Topic of names to tally; the tally is off when unset
    pub names: Option<String>,
    /// Topic connection mandate changes are published on
    pub mandates: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
    /// Seconds consumers get to stop after shutdown is signalled
    pub shutdown_timeout: u64,
}

/// Question/answer timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    /// How long a requester waits for an answer, in milliseconds
    pub answer_timeout_ms: u64,
    /// Delay before a responder composes an answer, in milliseconds
    pub answer_delay_ms: u64,
    /// Upper bound for a single handler invocation, in milliseconds
    pub handler_timeout_ms: Option<u64>,
}

/// CRM record store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrmConfig {
    /// Field holding a customer's id
    pub id_field: String,
    /// Customers loaded at startup: a CSV file with a header row, or a JSON
    /// array
    pub seed_path: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from `lookup`, which maps a variable name to its
    /// value.
    ///
    /// Unparseable numbers fall back to their default with a warning.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        Self {
            bus: BusConfig {
                brokers: text("BUS_BROKERS", DEFAULT_BROKERS),
                consumer_group: optional("BUS_CONSUMER_GROUP"),
                auto_offset_reset: text("BUS_AUTO_OFFSET_RESET", "earliest"),
                max_reconnects: parse_or(&lookup, "BUS_MAX_RECONNECTS", 0),
                reconnect_delay_ms: parse_or(&lookup, "BUS_RECONNECT_DELAY_MS", 500),
            },
            topics: TopicsConfig {
                questions: text("QUESTIONS_TOPIC", "questions-topic"),
                answers: text("ANSWERS_TOPIC", "answers-topic"),
                workflow: text("WORKFLOW_TOPIC", "workflow-queue"),
                names: optional("NAMES_TOPIC"),
                mandates: text("MANDATES_TOPIC", "connection-mandates-topic"),
            },
            server: ServerConfig {
                host: text("SERVER_HOST", "0.0.0.0"),
                port: parse_or(&lookup, "SERVER_PORT", 8080),
                shutdown_timeout: parse_or(&lookup, "SERVER_SHUTDOWN_TIMEOUT", 10),
            },
            correlation: CorrelationConfig {
                answer_timeout_ms: parse_or(&lookup, "ANSWER_TIMEOUT_MS", 10_000),
                answer_delay_ms: parse_or(&lookup, "ANSWER_DELAY_MS", 2_500),
                handler_timeout_ms: optional("HANDLER_TIMEOUT_MS")
                    .and_then(|value| parse_value("HANDLER_TIMEOUT_MS", &value)),
            },
            crm: CrmConfig {
                id_field: text("CRM_ID_FIELD", "customerId"),
                seed_path: optional("CRM_SEED_PATH"),
            },
        }
    }

    /// Check the values a service cannot start without.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("BUS_BROKERS", &self.bus.brokers),
            ("QUESTIONS_TOPIC", &self.topics.questions),
            ("ANSWERS_TOPIC", &self.topics.answers),
            ("WORKFLOW_TOPIC", &self.topics.workflow),
            ("MANDATES_TOPIC", &self.topics.mandates),
            ("CRM_ID_FIELD", &self.crm.id_field),
        ];
        if let Some((name, _)) = required.iter().find(|(_, value)| value.trim().is_empty()) {
            return Err(ConfigError::Empty(*name));
        }

        if self.topics.questions == self.topics.answers {
            return Err(ConfigError::SharedQaTopic(self.topics.questions.clone()));
        }

        if let Some(handler_timeout_ms) = self.correlation.handler_timeout_ms {
            let required_ms = self
                .correlation
                .answer_timeout_ms
                .max(self.correlation.answer_delay_ms);
            if handler_timeout_ms <= required_ms {
                return Err(ConfigError::HandlerTimeoutTooShort {
                    handler_timeout_ms,
                    required_ms,
                });
            }
        }

        Ok(())
    }
}

impl ServerConfig {
    /// `host:port` to bind the listener to.
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl CorrelationConfig {
    /// How long a requester waits for an answer.
    #[must_use]
    pub const fn answer_timeout(&self) -> Duration {
        Duration::from_millis(self.answer_timeout_ms)
    }

    /// Delay before a responder composes an answer.
    #[must_use]
    pub const fn answer_delay(&self) -> Duration {
        Duration::from_millis(self.answer_delay_ms)
    }

    /// Upper bound for a single handler invocation, if any.
    #[must_use]
    pub fn handler_timeout(&self) -> Option<Duration> {
        self.handler_timeout_ms.map(Duration::from_millis)
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|value| parse_value(key, &value))
        .unwrap_or(default)
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Option<T> {
    let parsed = value.trim().parse().ok();
    if parsed.is_none() {
        warn!(variable = %key, value = %value, "Ignoring unparseable configuration value");
    }
    parsed
}
