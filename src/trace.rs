//! Per-agent decision trace
//!
//! Every consequential decision (a definition-of-done verdict, a dispatch,
//! a clarification) lands as one record on a per-agent append-only stream.
//! Without a backend the logger buffers in memory, which is what the unit
//! tests use.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::warn;

use crate::backend::KvBackend;

/// One logged decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceRecord {
    pub agent: String,
    pub event_type: String,
    pub decision: String,
    pub inputs: Value,
    pub outputs: Value,
    pub correlation_id: Option<String>,
}

/// Append-only decision log, one stream per agent.
pub struct TraceLogger {
    backend: Option<Arc<dyn KvBackend>>,
    prefix: String,
    buffer: Mutex<HashMap<String, Vec<String>>>,
}

impl TraceLogger {
    pub fn new(backend: Option<Arc<dyn KvBackend>>, prefix: impl Into<String>) -> Self {
        Self {
            backend,
            prefix: prefix.into(),
            buffer: Mutex::new(HashMap::new()),
        }
    }

    /// Buffer-only logger for tests.
    pub fn in_memory() -> Self {
        Self::new(None, "audit:trace")
    }

    fn stream_key(&self, agent: &str) -> String {
        format!("{}:{agent}", self.prefix)
    }

    /// Append one record. Trace failures are logged, never raised.
    pub async fn log(&self, record: &TraceRecord) {
        let encoded = match serde_json::to_string(record) {
            Ok(encoded) => encoded,
            Err(e) => {
                warn!("unable to encode trace record: {e}");
                return;
            }
        };

        match &self.backend {
            Some(backend) => {
                let key = self.stream_key(&record.agent);
                if let Err(e) = backend.stream_append(&key, &[("trace", &encoded)]).await {
                    warn!("unable to append trace record: {e}");
                }
            }
            None => {
                self.buffer
                    .lock()
                    .await
                    .entry(self.stream_key(&record.agent))
                    .or_default()
                    .push(encoded);
            }
        }
    }

    /// Read back up to 100 records for an agent.
    pub async fn fetch(&self, agent: &str) -> Vec<TraceRecord> {
        let key = self.stream_key(agent);
        match &self.backend {
            Some(backend) => match backend.stream_range(&key, 100).await {
                Ok(entries) => entries
                    .iter()
                    .filter_map(|entry| entry.field("trace"))
                    .filter_map(|raw| serde_json::from_str(raw).ok())
                    .collect(),
                Err(e) => {
                    warn!("unable to fetch trace records: {e}");
                    Vec::new()
                }
            },
            None => self
                .buffer
                .lock()
                .await
                .get(&key)
                .map(|records| {
                    records
                        .iter()
                        .filter_map(|raw| serde_json::from_str(raw).ok())
                        .collect()
                })
                .unwrap_or_default(),
        }
    }
}
