//! Test data builders
//!
//! Builders start from sensible defaults so a test only spells out what it
//! cares about.

use chrono::{DateTime, Utc};
use courier_core::{Message, MessageMetadata, Payload};
use serde_json::Value;

/// Builder for creating test messages
pub struct MessageBuilder {
    message: Message,
}

impl MessageBuilder {
    pub fn new() -> Self {
        let mut payload = Payload::new();
        payload.insert("event".to_string(), Value::from("test_event"));
        Self {
            message: Message::with_id(uuid::Uuid::new_v4().to_string(), payload),
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.message.id = id.to_string();
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.message.payload = match payload {
            Value::Object(map) => map,
            other => {
                let mut map = Payload::new();
                map.insert("value".to_string(), other);
                map
            }
        };
        self
    }

    pub fn with_field(mut self, key: &str, value: Value) -> Self {
        self.message.payload.insert(key.to_string(), value);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.message.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, metadata: MessageMetadata) -> Self {
        self.message.metadata = Some(metadata);
        self
    }

    pub fn with_priority(mut self, priority: u8) -> Self {
        self.message.metadata_mut().priority = Some(priority);
        self
    }

    pub fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.message.metadata_mut().delay_ms = Some(delay_ms);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: &str) -> Self {
        self.message.metadata_mut().correlation_id = Some(correlation_id.to_string());
        self
    }

    pub fn with_content_type(mut self, content_type: &str) -> Self {
        self.message.metadata_mut().content_type = Some(content_type.to_string());
        self
    }

    pub fn with_header(mut self, key: &str, value: Value) -> Self {
        self.message
            .metadata_mut()
            .headers
            .insert(key.to_string(), value);
        self
    }

    pub fn build(self) -> Message {
        self.message
    }
}

impl Default for MessageBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// `count` messages with ids `{prefix}-0`, `{prefix}-1`, ...
pub fn message_batch(prefix: &str, count: usize) -> Vec<Message> {
    (0..count)
        .map(|index| {
            MessageBuilder::new()
                .with_id(&format!("{prefix}-{index}"))
                .with_field("index", Value::from(index))
                .build()
        })
        .collect()
}
