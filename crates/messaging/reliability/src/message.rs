//! Message envelope delivered by the transport.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// A message consumed from a queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Unique identifier, stable across retries and reprocessing.
    pub id: String,
    /// Logical name of the payload schema (e.g. "provider.registered").
    pub message_type: String,
    /// The message payload.
    pub payload: Value,
    /// Queue or topic the message was consumed from.
    pub source_queue: String,
    /// Routing key used when publishing.
    pub routing_key: String,
    /// Transport headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// When the message was first published.
    pub published_at: DateTime<Utc>,
}

impl Message {
    /// Creates a new message for a queue. The routing key defaults to the queue name.
    pub fn new(
        message_type: impl Into<String>,
        source_queue: impl Into<String>,
        payload: impl Serialize,
    ) -> Self {
        let source_queue = source_queue.into();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message_type: message_type.into(),
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
            routing_key: source_queue.clone(),
            source_queue,
            headers: HashMap::new(),
            published_at: Utc::now(),
        }
    }

    /// Overrides the generated id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Overrides the routing key.
    pub fn with_routing_key(mut self, routing_key: impl Into<String>) -> Self {
        self.routing_key = routing_key.into();
        self
    }

    /// Adds a transport header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Deserializes the payload to a specific type.
    pub fn payload_as<T: for<'de> Deserialize<'de>>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(self.payload.clone())
    }

    /// Serializes the whole envelope for quarantine.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Restores an envelope serialized with [`Message::to_json`].
    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}
