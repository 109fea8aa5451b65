//! Domain event record.

use amber_relay_core::EventId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// An immutable domain event.
///
/// Events carry a hierarchical `topic` (e.g. `chat.message`), an arbitrary
/// JSON payload, and the name of the emitting component. Records are created
/// once and never mutated; the bus retains recent records in a bounded ring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique identifier for this event.
    pub id: EventId,
    /// Hierarchical topic string, matched with glob patterns.
    pub topic: String,
    /// Structured payload.
    #[serde(default)]
    pub payload: Map<String, JsonValue>,
    /// Name of the emitting component.
    pub source: String,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
}

impl EventRecord {
    /// Creates a new event with a fresh id and the current timestamp.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        payload: Map<String, JsonValue>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: EventId::new(),
            topic: topic.into(),
            payload,
            source: source.into(),
            timestamp: Utc::now(),
        }
    }

    /// Returns the payload value for `key` when it is a string.
    #[must_use]
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(JsonValue::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload_with(key: &str, value: JsonValue) -> Map<String, JsonValue> {
        let mut map = Map::new();
        map.insert(key.to_string(), value);
        map
    }

    #[test]
    fn new_event_has_fresh_identity() {
        let a = EventRecord::new("chat.message", Map::new(), "test");
        let b = EventRecord::new("chat.message", Map::new(), "test");
        assert_ne!(a.id, b.id);
        assert_eq!(a.topic, "chat.message");
        assert_eq!(a.source, "test");
    }

    #[test]
    fn payload_str_only_returns_strings() {
        let event = EventRecord::new("chat.message", payload_with("text", json!("hi")), "test");
        assert_eq!(event.payload_str("text"), Some("hi"));
        assert_eq!(event.payload_str("missing"), None);

        let event = EventRecord::new("chat.message", payload_with("count", json!(3)), "test");
        assert_eq!(event.payload_str("count"), None);
    }

    #[test]
    fn event_serde_roundtrip() {
        let event = EventRecord::new("system.tick", payload_with("n", json!(1)), "clock");
        let json = serde_json::to_string(&event).expect("serialize");
        let parsed: EventRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(event, parsed);
    }
}
