//! Dead-letter queue writer and reader
//!
//! Events that cannot be processed (contract failures, undecodable
//! entries, handlers that exhausted their retry budget) become structured
//! documents on a dedicated stream. The document always carries the raw
//! original fields so nothing is lost in translation.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use super::AttemptMeta;
use crate::backend::{BackendResult, KvBackend};
use crate::event::now_iso;

/// Stack traces and error chains are truncated to this many bytes.
const MAX_TRACE_BYTES: usize = 4000;

/// One dead-lettered failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DlqDocument {
    pub timestamp: String,
    pub event_id: Option<String>,
    pub event_type: Option<String>,
    pub reason: String,
    pub schema_id: Option<String>,
    pub consumer_group: Option<String>,
    pub attempts: Option<u32>,
    pub first_seen_at: Option<i64>,
    pub last_seen_at: Option<i64>,
    pub error_class: Option<String>,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub original_event: Option<Value>,
    pub original_fields: HashMap<String, String>,
}

/// Optional context attached to a DLQ publish.
#[derive(Debug, Default, Clone)]
pub struct DlqContext {
    pub schema_id: Option<String>,
    pub error_class: Option<String>,
    pub error_message: Option<String>,
    pub stack_trace: Option<String>,
    pub consumer_group: Option<String>,
    pub attempts: Option<AttemptMeta>,
}

impl DlqContext {
    pub fn with_schema_id(mut self, schema_id: Option<String>) -> Self {
        self.schema_id = schema_id;
        self
    }

    pub fn with_group(mut self, group: &str) -> Self {
        self.consumer_group = Some(group.to_string());
        self
    }

    pub fn with_attempts(mut self, attempts: AttemptMeta) -> Self {
        self.attempts = Some(attempts);
        self
    }

    /// Capture an error's class label, message and rendered chain.
    pub fn with_error(mut self, class: &str, error: &anyhow::Error) -> Self {
        self.error_class = Some(class.to_string());
        self.error_message = Some(error.to_string());
        self.stack_trace = Some(truncate_tail(&format!("{error:?}"), MAX_TRACE_BYTES));
        self
    }
}

/// Appends failure documents to the DLQ stream.
#[derive(Clone)]
pub struct DlqWriter {
    backend: Arc<dyn KvBackend>,
    stream: String,
}

impl DlqWriter {
    pub fn new(backend: Arc<dyn KvBackend>, stream: impl Into<String>) -> Self {
        Self {
            backend,
            stream: stream.into(),
        }
    }

    /// Publish one failure. Returns the stream entry id.
    pub async fn publish(
        &self,
        reason: &str,
        original_fields: &HashMap<String, String>,
        context: DlqContext,
    ) -> BackendResult<String> {
        let original_event = try_parse_event(original_fields);
        let document = DlqDocument {
            timestamp: now_iso(),
            event_id: original_event
                .as_ref()
                .and_then(|e| e.get("event_id"))
                .and_then(Value::as_str)
                .map(str::to_string),
            event_type: original_event
                .as_ref()
                .and_then(|e| e.get("event_type"))
                .and_then(Value::as_str)
                .map(str::to_string),
            reason: reason.to_string(),
            schema_id: context.schema_id,
            consumer_group: context.consumer_group,
            attempts: context.attempts.map(|a| a.attempts),
            first_seen_at: context.attempts.map(|a| a.first_seen_at),
            last_seen_at: context.attempts.map(|a| a.last_seen_at),
            error_class: context.error_class,
            error_message: context.error_message,
            stack_trace: context.stack_trace,
            original_event,
            original_fields: original_fields.clone(),
        };
        debug_assert!(!document.reason.is_empty());

        let encoded = serde_json::to_string(&document)?;
        warn!(reason, stream = %self.stream, "dead-lettering event");
        self.backend
            .stream_append(&self.stream, &[("dlq", &encoded)])
            .await
    }
}

/// Read-side access for inspection tooling.
pub struct DlqReader {
    backend: Arc<dyn KvBackend>,
    stream: String,
}

impl DlqReader {
    pub fn new(backend: Arc<dyn KvBackend>, stream: impl Into<String>) -> Self {
        Self {
            backend,
            stream: stream.into(),
        }
    }

    pub async fn len(&self) -> BackendResult<u64> {
        self.backend.stream_len(&self.stream).await
    }

    pub async fn is_empty(&self) -> BackendResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Oldest-first documents, at most `limit`.
    pub async fn list(&self, limit: usize) -> BackendResult<Vec<DlqDocument>> {
        let entries = self.backend.stream_range(&self.stream, limit).await?;
        let mut documents = Vec::new();
        for entry in entries {
            if let Some(raw) = entry.field("dlq") {
                match serde_json::from_str(raw) {
                    Ok(doc) => documents.push(doc),
                    Err(e) => warn!("skipping undecodable dlq entry {}: {e}", entry.id),
                }
            }
        }
        Ok(documents)
    }

    /// Failure counts grouped by reason, descending.
    pub async fn stats(&self, limit: usize) -> BackendResult<Vec<(String, usize)>> {
        let mut counts: HashMap<String, usize> = HashMap::new();
        for doc in self.list(limit).await? {
            *counts.entry(doc.reason).or_default() += 1;
        }
        let mut stats: Vec<(String, usize)> = counts.into_iter().collect();
        stats.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        Ok(stats)
    }
}

fn try_parse_event(original_fields: &HashMap<String, String>) -> Option<Value> {
    let raw = original_fields.get("event")?;
    serde_json::from_str(raw).ok()
}

fn truncate_tail(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }
    let mut start = text.len() - max_bytes;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use serde_json::json;

    fn fields_with_event(event: &Value) -> HashMap<String, String> {
        let mut fields = HashMap::new();
        fields.insert("event".to_string(), event.to_string());
        fields
    }

    #[tokio::test]
    async fn document_preserves_original_event_and_fields() {
        let backend = Arc::new(MemoryBackend::new());
        let writer = DlqWriter::new(backend.clone(), "audit:dlq");
        let event = json!({"event_id": "e1", "event_type": "WORK.ITEM_COMPLETED"});
        let fields = fields_with_event(&event);

        writer
            .publish(
                "invalid payload",
                &fields,
                DlqContext::default()
                    .with_schema_id(Some("urn:overture:payload.work_item_completed.v1".into()))
                    .with_group("orchestrator"),
            )
            .await
            .unwrap();

        let reader = DlqReader::new(backend, "audit:dlq");
        let docs = reader.list(10).await.unwrap();
        assert_eq!(docs.len(), 1);
        let doc = &docs[0];
        assert_eq!(doc.reason, "invalid payload");
        assert_eq!(doc.event_id.as_deref(), Some("e1"));
        assert_eq!(doc.event_type.as_deref(), Some("WORK.ITEM_COMPLETED"));
        assert_eq!(doc.consumer_group.as_deref(), Some("orchestrator"));
        assert_eq!(doc.original_event, Some(event));
        assert!(doc.original_fields.contains_key("event"));
    }

    #[tokio::test]
    async fn unparseable_event_keeps_raw_fields() {
        let backend = Arc::new(MemoryBackend::new());
        let writer = DlqWriter::new(backend.clone(), "audit:dlq");
        let mut fields = HashMap::new();
        fields.insert("event".to_string(), "{not json".to_string());

        writer
            .publish("invalid json", &fields, DlqContext::default())
            .await
            .unwrap();

        let docs = DlqReader::new(backend, "audit:dlq").list(10).await.unwrap();
        assert!(docs[0].original_event.is_none());
        assert_eq!(docs[0].original_fields["event"], "{not json");
    }

    #[tokio::test]
    async fn error_context_is_truncated() {
        let backend = Arc::new(MemoryBackend::new());
        let writer = DlqWriter::new(backend.clone(), "audit:dlq");
        let huge = "x".repeat(10_000);
        let error = anyhow::anyhow!("{huge}");

        writer
            .publish(
                "max attempts exceeded",
                &HashMap::new(),
                DlqContext::default().with_error("HandlerError", &error),
            )
            .await
            .unwrap();

        let docs = DlqReader::new(backend, "audit:dlq").list(10).await.unwrap();
        let trace = docs[0].stack_trace.as_ref().unwrap();
        assert!(trace.len() <= MAX_TRACE_BYTES);
        assert!(docs[0].error_message.is_some());
    }

    #[tokio::test]
    async fn stats_group_by_reason() {
        let backend = Arc::new(MemoryBackend::new());
        let writer = DlqWriter::new(backend.clone(), "audit:dlq");
        for reason in ["a", "b", "a"] {
            writer
                .publish(reason, &HashMap::new(), DlqContext::default())
                .await
                .unwrap();
        }
        let stats = DlqReader::new(backend, "audit:dlq").stats(100).await.unwrap();
        assert_eq!(stats[0], ("a".to_string(), 2));
        assert_eq!(stats[1], ("b".to_string(), 1));
    }
}
