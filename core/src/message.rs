//! Wire types exchanged over the message bus.
//!
//! Every message body is UTF-8 JSON. Field names are camelCase on the wire
//! (`qaIdentifier`, `questionCategory`, `workflowId`, ...). Workflow orders
//! also accept the kebab-case spelling older producers emit
//! (`workflow-type`, `workflow-id`, `create-time`).
//!
//! [`ConnectionMandate`] events carry the CRM's mandate changes to the IoT
//! platform.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// A message as delivered by the bus.
///
/// Partition, offset and timestamp are assigned by the bus and are `None`
/// for transports that have no such notion (e.g. in-memory test buses).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    /// Topic the message was consumed from
    pub topic: String,
    /// Partitioning key, if the producer set one
    pub key: Option<String>,
    /// Raw body (JSON-encoded UTF-8)
    pub value: Vec<u8>,
    /// Partition the message was read from
    pub partition: Option<i32>,
    /// Offset within the partition
    pub offset: Option<i64>,
    /// Bus-assigned creation timestamp
    pub timestamp: Option<DateTime<Utc>>,
}

impl BusMessage {
    /// Create a message on `topic` with the given body and no bus metadata.
    #[must_use]
    pub fn new(topic: impl Into<String>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            key: None,
            value: value.into(),
            partition: None,
            offset: None,
            timestamp: None,
        }
    }

    /// Set the message key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Body as text, replacing invalid UTF-8 sequences.
    #[must_use]
    pub fn value_lossy(&self) -> String {
        String::from_utf8_lossy(&self.value).into_owned()
    }

    /// Decode the JSON body into `T`.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if the body is not valid JSON for `T`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.value)
    }
}

/// A message to be published. The bus fills in everything else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    /// Partitioning key
    pub key: Option<String>,
    /// Body (JSON-encoded UTF-8)
    pub value: Vec<u8>,
}

impl OutgoingMessage {
    /// Create an unkeyed message.
    #[must_use]
    pub fn new(value: impl Into<Vec<u8>>) -> Self {
        Self {
            key: None,
            value: value.into(),
        }
    }

    /// Set the message key.
    #[must_use]
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Serialize `value` as the JSON body.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if `value` cannot be serialized.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_vec(value)?))
    }
}

/// Correlation identifier linking a [`Question`] to its [`Answer`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QaIdentifier(String);

impl QaIdentifier {
    /// Generate a fresh identifier (UUID v4).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for QaIdentifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for QaIdentifier {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for QaIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A question published by a requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    /// Correlation id the answer must echo
    pub qa_identifier: QaIdentifier,
    /// Category responders route on (e.g. `customer`)
    pub question_category: String,
    /// Category-specific question body
    #[serde(default)]
    pub payload: Value,
}

impl Question {
    /// Create a question with a freshly generated correlation id.
    #[must_use]
    pub fn new(category: impl Into<String>, payload: Value) -> Self {
        Self {
            qa_identifier: QaIdentifier::generate(),
            question_category: category.into(),
            payload,
        }
    }
}

/// An answer to a previously published [`Question`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Answer {
    /// Correlation id copied from the question
    pub qa_identifier: QaIdentifier,
    /// Answer body; `null` when the responder knows nothing about the subject
    #[serde(default)]
    pub answer: Value,
}

impl Answer {
    /// Create an answer for the given correlation id.
    #[must_use]
    pub const fn new(qa_identifier: QaIdentifier, answer: Value) -> Self {
        Self {
            qa_identifier,
            answer,
        }
    }
}

/// Identifier of a single workflow order.
///
/// Serialized as a string. Decoding also accepts a JSON number, which
/// kebab-case producers emit (`1700000000000.4567`); the number is kept in
/// its decimal text form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct WorkflowId(String);

impl<'de> Deserialize<'de> for WorkflowId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(serde_json::Number),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Text(id) => Self(id),
            Raw::Number(id) => Self(id.to_string()),
        })
    }
}

impl WorkflowId {
    /// Wrap an identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payload of a workflow order: the subject the work is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowPayload {
    /// Subject identifier (e.g. a customer id)
    #[serde(alias = "customerIdentifier")]
    pub subject_identifier: String,
}

/// One unit of work produced by a fan-out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowOrder {
    /// Kind of workflow (e.g. `bill-generation`)
    #[serde(alias = "workflow-type")]
    pub workflow_type: String,
    /// Unique order id
    #[serde(alias = "workflow-id")]
    pub workflow_id: WorkflowId,
    /// When the order was created
    #[serde(alias = "create-time")]
    pub create_time: DateTime<Utc>,
    /// Order payload
    pub payload: WorkflowPayload,
}

/// Mandate setting of a metering connection.
///
/// The CRM publishes one whenever a customer is created or their
/// `connectionId` or `connectionMandate` changes; the IoT platform keeps the
/// latest per connection. Both fields are passed through as found on the
/// customer record (strings from CSV imports, whatever JSON the HTTP client
/// sent otherwise).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionMandate {
    /// Connection the mandate applies to
    #[serde(default)]
    pub connection_id: Value,
    /// Mandate level
    #[serde(default)]
    pub connection_mandate: Value,
}

impl ConnectionMandate {
    /// The mandate fields of a customer record; absent fields are `null`.
    #[must_use]
    pub fn of_record(record: &Value) -> Self {
        let field = |name: &str| record.get(name).cloned().unwrap_or(Value::Null);
        Self {
            connection_id: field("connectionId"),
            connection_mandate: field("connectionMandate"),
        }
    }

    /// The connection id as a lookup key: strings as they are, numbers in
    /// decimal form. `None` for a missing, empty or structured id.
    #[must_use]
    pub fn connection_key(&self) -> Option<String> {
        match &self.connection_id {
            Value::String(id) if !id.trim().is_empty() => Some(id.clone()),
            Value::Number(id) => Some(id.to_string()),
            _ => None,
        }
    }
}
