//! Event envelope wire type and helpers
//!
//! Every message on the work stream is a single-field entry
//! `{event: <json>}` whose JSON body is an [`EventEnvelope`]. The envelope
//! carries identity (`event_id`), lineage (`correlation_id`/`causation_id`)
//! and a type-tagged payload validated against the schema registry.

pub mod types;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Logical origin of an event: the emitting service and its running instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    pub service: String,
    pub instance: String,
}

/// Outer layer of every event on the transport.
///
/// All fields are required on the wire except `causation_id`, which is
/// nullable and names the immediate parent event. `correlation_id` is shared
/// by every event derived from one root request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    pub event_type: String,
    pub event_version: u32,
    pub timestamp: String,
    pub source: EventSource,
    pub correlation_id: String,
    pub causation_id: Option<String>,
    pub payload: Value,
}

impl EventEnvelope {
    /// Start building an envelope for `event_type` emitted by `service`.
    pub fn builder(event_type: &str, service: &str) -> EnvelopeBuilder {
        EnvelopeBuilder::new(event_type, service)
    }

    /// Serialize to the JSON string carried in the stream entry.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Builder minting `event_id`, `timestamp` and instance defaults.
pub struct EnvelopeBuilder {
    event_type: String,
    event_version: u32,
    service: String,
    instance: Option<String>,
    correlation_id: Option<String>,
    causation_id: Option<String>,
    payload: Value,
}

impl EnvelopeBuilder {
    pub fn new(event_type: &str, service: &str) -> Self {
        Self {
            event_type: event_type.to_string(),
            event_version: 1,
            service: service.to_string(),
            instance: None,
            correlation_id: None,
            causation_id: None,
            payload: Value::Object(Default::default()),
        }
    }

    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn causation_id(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }

    pub fn instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = Some(instance.into());
        self
    }

    pub fn event_version(mut self, version: u32) -> Self {
        self.event_version = version;
        self
    }

    pub fn build(self) -> EventEnvelope {
        let instance = self
            .instance
            .or_else(|| std::env::var("HOSTNAME").ok())
            .unwrap_or_else(|| format!("{}-1", self.service));
        EventEnvelope {
            event_id: Uuid::new_v4().to_string(),
            event_type: self.event_type,
            event_version: self.event_version,
            timestamp: now_iso(),
            source: EventSource {
                service: self.service,
                instance,
            },
            correlation_id: self
                .correlation_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            causation_id: self.causation_id,
            payload: self.payload,
        }
    }
}

/// Wire-format timestamp: UTC, second precision, trailing `Z`.
pub fn now_iso() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn builder_fills_identity_fields() {
        let env = EventEnvelope::builder(types::WORK_ITEM_STARTED, "test_worker")
            .payload(json!({"project_id": "p1"}))
            .correlation_id("corr-1")
            .causation_id("cause-1")
            .instance("test_worker-7")
            .build();
        assert_eq!(env.event_type, "WORK.ITEM_STARTED");
        assert_eq!(env.event_version, 1);
        assert_eq!(env.source.service, "test_worker");
        assert_eq!(env.source.instance, "test_worker-7");
        assert_eq!(env.correlation_id, "corr-1");
        assert_eq!(env.causation_id.as_deref(), Some("cause-1"));
        assert!(!env.event_id.is_empty());
        assert!(env.timestamp.ends_with('Z'));
    }

    #[test]
    fn causation_id_serializes_as_null_when_absent() {
        let env = EventEnvelope::builder(types::PROJECT_INITIAL_REQUEST_RECEIVED, "gateway")
            .payload(json!({"project_id": "p1", "request_text": "audit"}))
            .build();
        let raw = serde_json::to_value(&env).unwrap();
        assert!(raw.get("causation_id").unwrap().is_null());
    }

    #[test]
    fn envelope_round_trips() {
        let env = EventEnvelope::builder(types::USER_ANSWER_SUBMITTED, "gateway")
            .payload(json!({"project_id": "p1", "question_id": "q1", "answer": 42}))
            .build();
        let raw = env.to_json().unwrap();
        let back: EventEnvelope = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, env);
    }
}
