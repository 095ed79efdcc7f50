//! Worker template
//!
//! A worker is a stream consumer with its own group (`{agent}_workers`)
//! that reacts only to `WORK.ITEM_DISPATCHED` events addressed to it. Work
//! runs under the backlog-item lock; results surface purely as events
//! (`WORK.ITEM_STARTED`, `DELIVERABLE.PUBLISHED`, `WORK.ITEM_COMPLETED`) or
//! as a `CLARIFICATION.NEEDED` when required inputs are missing. Duplicate
//! suppression comes from the shared runtime, keyed on the worker group.

pub mod analysis;
pub mod processors;

pub use processors::{AnalysisProcessor, ReportProcessor, RequirementsProcessor};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::backend::KvBackend;
use crate::config::Settings;
use crate::event::{now_iso, types, EventEnvelope};
use crate::runtime::locks::backlog_lock_key;
use crate::runtime::{EventHandler, HandlerError, LockManager};
use crate::schema::SchemaRegistry;

/// Inputs handed to a work processor.
#[derive(Debug, Clone)]
pub struct WorkContext {
    pub project_id: String,
    pub backlog_item_id: String,
    pub work_context: Value,
}

/// Successful result of domain work.
#[derive(Debug, Clone)]
pub struct WorkProduct {
    pub deliverable_type: String,
    pub content: Value,
    pub confidence: f64,
    pub evidence: Value,
}

/// The processor cannot proceed without more input.
#[derive(Debug, Clone)]
pub struct WorkRejection {
    pub reason: String,
    pub missing_fields: Vec<String>,
}

/// Domain logic plugged into the worker template.
#[async_trait]
pub trait WorkProcessor: Send + Sync {
    async fn process(&self, context: &WorkContext) -> Result<WorkProduct, WorkRejection>;
}

#[async_trait]
impl WorkProcessor for Box<dyn WorkProcessor> {
    async fn process(&self, context: &WorkContext) -> Result<WorkProduct, WorkRejection> {
        (**self).process(context).await
    }
}

/// Consumer group name for an agent's workers.
pub fn worker_group(agent_name: &str) -> String {
    format!("{agent_name}_workers")
}

/// The generic worker loop, parameterized by agent name and processor.
pub struct Worker<P> {
    backend: Arc<dyn KvBackend>,
    registry: Arc<SchemaRegistry>,
    settings: Settings,
    agent_name: String,
    processor: P,
    locks: LockManager,
}

impl<P: WorkProcessor> Worker<P> {
    pub fn new(
        backend: Arc<dyn KvBackend>,
        registry: Arc<SchemaRegistry>,
        settings: Settings,
        agent_name: impl Into<String>,
        processor: P,
    ) -> Self {
        Self {
            locks: LockManager::new(backend.clone()),
            backend,
            registry,
            settings,
            agent_name: agent_name.into(),
            processor,
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let encoded = envelope.to_json()?;
        self.backend
            .stream_append(&self.settings.stream_name, &[("event", &encoded)])
            .await?;
        Ok(())
    }

    fn envelope(&self, event_type: &str, payload: Value, cause: &EventEnvelope) -> EventEnvelope {
        EventEnvelope::builder(event_type, &self.agent_name)
            .payload(payload)
            .correlation_id(cause.correlation_id.clone())
            .causation_id(cause.event_id.clone())
            .build()
    }

    async fn emit_started(
        &self,
        cause: &EventEnvelope,
        context: &WorkContext,
    ) -> Result<(), HandlerError> {
        if !self.registry.knows_event(types::WORK_ITEM_STARTED) {
            return Ok(());
        }
        self.publish(&self.envelope(
            types::WORK_ITEM_STARTED,
            json!({
                "project_id": context.project_id,
                "backlog_item_id": context.backlog_item_id,
                "started_at": now_iso(),
            }),
            cause,
        ))
        .await
    }

    async fn emit_product(
        &self,
        cause: &EventEnvelope,
        context: &WorkContext,
        product: WorkProduct,
    ) -> Result<(), HandlerError> {
        let deliverable = json!({
            "type": product.deliverable_type,
            "content": product.content,
            "timestamp": now_iso(),
            "confidence": product.confidence,
            "project_id": context.project_id,
            "backlog_item_id": context.backlog_item_id,
            "agent": self.agent_name,
        });
        self.publish(&self.envelope(
            types::DELIVERABLE_PUBLISHED,
            json!({
                "project_id": context.project_id,
                "backlog_item_id": context.backlog_item_id,
                "deliverable": deliverable,
            }),
            cause,
        ))
        .await?;

        // Completion evidence must never be empty; the agent name is the
        // floor when a processor returns nothing else.
        let mut evidence = match product.evidence {
            Value::Object(map) if !map.is_empty() => map,
            _ => Map::new(),
        };
        if evidence.is_empty() {
            evidence.insert("agent".to_string(), json!(self.agent_name));
        }
        self.publish(&self.envelope(
            types::WORK_ITEM_COMPLETED,
            json!({
                "project_id": context.project_id,
                "backlog_item_id": context.backlog_item_id,
                "evidence": Value::Object(evidence),
            }),
            cause,
        ))
        .await
    }

    async fn emit_clarification(
        &self,
        cause: &EventEnvelope,
        context: &WorkContext,
        rejection: WorkRejection,
    ) -> Result<(), HandlerError> {
        info!(
            agent = %self.agent_name,
            backlog_item_id = %context.backlog_item_id,
            reason = %rejection.reason,
            "requesting clarification"
        );
        self.publish(&self.envelope(
            types::CLARIFICATION_NEEDED,
            json!({
                "project_id": context.project_id,
                "backlog_item_id": context.backlog_item_id,
                "reason": rejection.reason,
                "missing_fields": rejection.missing_fields,
                "agent": self.agent_name,
            }),
            cause,
        ))
        .await
    }
}

#[async_trait]
impl<P: WorkProcessor> EventHandler for Worker<P> {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        if envelope.event_type != types::WORK_ITEM_DISPATCHED {
            return Ok(());
        }
        let payload = &envelope.payload;
        if payload.get("agent_target").and_then(Value::as_str) != Some(self.agent_name.as_str()) {
            return Ok(());
        }

        let context = WorkContext {
            project_id: payload
                .get("project_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            backlog_item_id: payload
                .get("backlog_item_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            work_context: payload.get("work_context").cloned().unwrap_or(json!({})),
        };

        let lock_key = backlog_lock_key(&context.backlog_item_id);
        let Some(token) = self
            .locks
            .acquire(
                &lock_key,
                Duration::from_secs(self.settings.backlog_lock_ttl_s),
            )
            .await?
        else {
            // Another worker of this group is on the item; the message is
            // acked, not re-delivered.
            debug!(
                backlog_item_id = %context.backlog_item_id,
                "backlog lock busy, skipping"
            );
            return Ok(());
        };

        let result = async {
            self.emit_started(envelope, &context).await?;
            match self.processor.process(&context).await {
                Ok(product) => self.emit_product(envelope, &context, product).await,
                Err(rejection) => self.emit_clarification(envelope, &context, rejection).await,
            }
        }
        .await;

        self.locks.release(&lock_key, &token).await?;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    struct EchoProcessor;

    #[async_trait]
    impl WorkProcessor for EchoProcessor {
        async fn process(&self, _context: &WorkContext) -> Result<WorkProduct, WorkRejection> {
            Ok(WorkProduct {
                deliverable_type: "echo".to_string(),
                content: json!({"ok": true}),
                confidence: 0.9,
                evidence: json!({"echo": true}),
            })
        }
    }

    struct RejectingProcessor;

    #[async_trait]
    impl WorkProcessor for RejectingProcessor {
        async fn process(&self, _context: &WorkContext) -> Result<WorkProduct, WorkRejection> {
            Err(WorkRejection {
                reason: "work_context.rows missing".to_string(),
                missing_fields: vec!["rows".to_string()],
            })
        }
    }

    fn dispatch(agent_target: &str) -> EventEnvelope {
        EventEnvelope::builder(types::WORK_ITEM_DISPATCHED, "orchestrator")
            .payload(json!({
                "project_id": "p1",
                "backlog_item_id": "b1",
                "item_type": "TASK",
                "agent_target": agent_target,
                "work_context": {"rows": []},
            }))
            .build()
    }

    async fn emitted(backend: &MemoryBackend) -> Vec<EventEnvelope> {
        backend
            .stream_range("audit:events", 100)
            .await
            .unwrap()
            .iter()
            .filter_map(|m| m.field("event"))
            .filter_map(|raw| serde_json::from_str(raw).ok())
            .collect()
    }

    fn worker<P: WorkProcessor>(backend: Arc<MemoryBackend>, processor: P) -> Worker<P> {
        let registry = Arc::new(SchemaRegistry::load("schemas").unwrap());
        Worker::new(
            backend,
            registry,
            Settings::default(),
            "dev_worker",
            processor,
        )
    }

    #[tokio::test]
    async fn matching_dispatch_produces_started_deliverable_completed() {
        let backend = Arc::new(MemoryBackend::new());
        let worker = worker(backend.clone(), EchoProcessor);
        worker.handle(&dispatch("dev_worker")).await.unwrap();

        let events = emitted(&backend).await;
        let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            kinds,
            vec![
                types::WORK_ITEM_STARTED,
                types::DELIVERABLE_PUBLISHED,
                types::WORK_ITEM_COMPLETED
            ]
        );

        let deliverable = &events[1].payload["deliverable"];
        assert_eq!(deliverable["type"], "echo");
        assert_eq!(deliverable["project_id"], "p1");
        assert_eq!(deliverable["confidence"], 0.9);

        let evidence = events[2].payload["evidence"].as_object().unwrap();
        assert!(!evidence.is_empty());
        // Lineage: everything points back at the dispatch.
        for event in &events {
            assert_eq!(event.causation_id.as_deref(), events[0].causation_id.as_deref());
        }
    }

    #[tokio::test]
    async fn other_agents_dispatches_are_ignored() {
        let backend = Arc::new(MemoryBackend::new());
        let worker = worker(backend.clone(), EchoProcessor);
        worker.handle(&dispatch("test_worker")).await.unwrap();
        assert!(emitted(&backend).await.is_empty());
    }

    #[tokio::test]
    async fn rejection_becomes_clarification_with_missing_fields() {
        let backend = Arc::new(MemoryBackend::new());
        let worker = worker(backend.clone(), RejectingProcessor);
        worker.handle(&dispatch("dev_worker")).await.unwrap();

        let events = emitted(&backend).await;
        let clarification = events
            .iter()
            .find(|e| e.event_type == types::CLARIFICATION_NEEDED)
            .expect("clarification emitted");
        assert_eq!(clarification.payload["missing_fields"][0], "rows");
        assert_eq!(clarification.payload["agent"], "dev_worker");
        assert!(!events
            .iter()
            .any(|e| e.event_type == types::WORK_ITEM_COMPLETED));
    }

    #[tokio::test]
    async fn busy_backlog_lock_skips_the_item() {
        let backend = Arc::new(MemoryBackend::new());
        let locks = LockManager::new(backend.clone());
        let _held = locks
            .acquire(&backlog_lock_key("b1"), Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        let worker = worker(backend.clone(), EchoProcessor);
        worker.handle(&dispatch("dev_worker")).await.unwrap();
        assert!(emitted(&backend).await.is_empty());
    }
}
