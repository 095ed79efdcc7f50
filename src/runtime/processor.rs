//! Reliable stream processor
//!
//! One tick: read new messages for the consumer group, fall back to
//! reclaiming messages a crashed peer left pending, then push each message
//! through the contract gauntlet (envelope field, JSON decode, envelope
//! schema, payload schema), attempt accounting, idempotence, and finally the
//! handler. Contract failures dead-letter and ack; handler failures leave
//! the message pending until the attempt budget is spent.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::dlq::{DlqContext, DlqWriter};
use super::idempotence::{is_processed, mark_if_new, processed_key};
use super::AttemptMeta;
use crate::backend::{BackendError, BackendResult, KvBackend, StreamMessage};
use crate::config::Settings;
use crate::event::EventEnvelope;
use crate::schema::SchemaRegistry;

/// Error surface of an event handler.
///
/// Anything returned here is treated as retryable: the message stays
/// pending and is re-delivered until the attempt budget runs out. Business
/// rejections (failed definition-of-done, illegal transitions) are not
/// errors; handlers emit their own failure events and return `Ok`.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        Self::Backend(BackendError::from(err))
    }
}

/// A consumer of validated envelopes.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError>;
}

/// What happened to one message.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Handler ran and the message was acknowledged
    Handled,
    /// Already processed by this group; acknowledged without invocation
    Duplicate,
    /// Envelope or payload failed its contract; dead-lettered and acknowledged
    ContractError {
        reason: String,
        schema_id: Option<String>,
    },
    /// Handler failed; pending below the budget, dead-lettered at it
    HandlerError { attempts: u32, reason: String },
}

/// Consumer-group read loop shared by the orchestrator and workers.
pub struct StreamProcessor<H> {
    backend: Arc<dyn KvBackend>,
    registry: Arc<SchemaRegistry>,
    settings: Settings,
    handler: H,
    dlq: DlqWriter,
}

impl<H: EventHandler> StreamProcessor<H> {
    /// Wire a processor and create its consumer group.
    pub async fn new(
        backend: Arc<dyn KvBackend>,
        registry: Arc<SchemaRegistry>,
        settings: Settings,
        handler: H,
    ) -> anyhow::Result<Self> {
        backend
            .ensure_group(&settings.stream_name, &settings.consumer_group)
            .await?;
        let dlq = DlqWriter::new(backend.clone(), settings.dlq_stream.clone());
        Ok(Self {
            backend,
            registry,
            settings,
            handler,
            dlq,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    /// Run one tick. Returns the outcome of every message seen.
    pub async fn consume_once(&self) -> anyhow::Result<Vec<ProcessOutcome>> {
        let messages = self.read_batch().await?;
        let mut outcomes = Vec::with_capacity(messages.len());
        for message in &messages {
            outcomes.push(self.process_single(message).await?);
        }
        Ok(outcomes)
    }

    /// Consume until the process is stopped.
    pub async fn run_forever(&self) -> anyhow::Result<()> {
        info!(
            stream = %self.settings.stream_name,
            group = %self.settings.consumer_group,
            consumer = %self.settings.consumer_name,
            "processor listening"
        );
        loop {
            let outcomes = self.consume_once().await?;
            if outcomes.is_empty() {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }
    }

    async fn read_batch(&self) -> anyhow::Result<Vec<StreamMessage>> {
        let new = self
            .backend
            .read_group(
                &self.settings.stream_name,
                &self.settings.consumer_group,
                &self.settings.consumer_name,
                Duration::from_millis(self.settings.block_ms),
                10,
            )
            .await?;
        if !new.is_empty() {
            return Ok(new);
        }

        // Nothing new: try to pick up messages a dead peer left pending.
        // Reclaim errors are never fatal; the next tick retries.
        match self
            .backend
            .auto_claim(
                &self.settings.stream_name,
                &self.settings.consumer_group,
                &self.settings.consumer_name,
                Duration::from_millis(self.settings.idle_reclaim_ms),
                self.settings.reclaim_count,
            )
            .await
        {
            Ok(claimed) => {
                if !claimed.is_empty() {
                    debug!(count = claimed.len(), "reclaimed pending messages");
                }
                Ok(claimed)
            }
            Err(e) => {
                warn!("failed to reclaim pending messages: {e}");
                Ok(Vec::new())
            }
        }
    }

    async fn process_single(&self, message: &StreamMessage) -> anyhow::Result<ProcessOutcome> {
        let Some(raw_event) = message.field("event") else {
            return self
                .contract_failure(message, "missing field 'event'", None, None)
                .await;
        };

        let parsed: Value = match serde_json::from_str(raw_event) {
            Ok(value) => value,
            Err(e) => {
                return self
                    .contract_failure(message, &format!("invalid json: {e}"), None, None)
                    .await;
            }
        };

        let envelope_check = self.registry.validate_envelope(&parsed);
        if !envelope_check.ok {
            let reason = envelope_check
                .error
                .unwrap_or_else(|| "invalid envelope".to_string());
            return self
                .contract_failure(message, &reason, envelope_check.schema_id, None)
                .await;
        }

        let envelope: EventEnvelope = match serde_json::from_value(parsed) {
            Ok(env) => env,
            Err(e) => {
                return self
                    .contract_failure(message, &format!("invalid envelope: {e}"), None, None)
                    .await;
            }
        };

        let payload_check = self
            .registry
            .validate_payload(&envelope.event_type, &envelope.payload);
        if !payload_check.ok {
            let reason = payload_check
                .error
                .unwrap_or_else(|| "invalid payload".to_string());
            return self
                .contract_failure(message, &reason, payload_check.schema_id, None)
                .await;
        }

        let attempts = self.increment_attempt(&message.id).await?;

        let dedup_key = processed_key(&self.settings.consumer_group, &envelope.event_id);
        if is_processed(self.backend.as_ref(), &dedup_key).await? {
            info!(
                event_id = %envelope.event_id,
                group = %self.settings.consumer_group,
                "skipping duplicate event"
            );
            self.ack(&message.id).await?;
            return Ok(ProcessOutcome::Duplicate);
        }

        if let Err(e) = self.handler.handle(&envelope).await {
            warn!(
                event_type = %envelope.event_type,
                message_id = %message.id,
                attempts = attempts.attempts,
                "handler error: {e}"
            );
            if attempts.attempts >= self.settings.max_attempts {
                let error = anyhow::Error::from(e);
                self.dlq
                    .publish(
                        "max attempts exceeded",
                        &message.fields,
                        DlqContext::default()
                            .with_group(&self.settings.consumer_group)
                            .with_attempts(attempts)
                            .with_error("HandlerError", &error),
                    )
                    .await?;
                self.ack(&message.id).await?;
                return Ok(ProcessOutcome::HandlerError {
                    attempts: attempts.attempts,
                    reason: error.to_string(),
                });
            }
            // Below the budget: leave the message pending so a later tick
            // (or a peer, via reclaim) retries it.
            return Ok(ProcessOutcome::HandlerError {
                attempts: attempts.attempts,
                reason: e.to_string(),
            });
        }

        mark_if_new(
            self.backend.as_ref(),
            &dedup_key,
            Duration::from_secs(self.settings.dedupe_ttl_s),
        )
        .await?;
        self.ack(&message.id).await?;
        Ok(ProcessOutcome::Handled)
    }

    async fn contract_failure(
        &self,
        message: &StreamMessage,
        reason: &str,
        schema_id: Option<String>,
        attempts: Option<AttemptMeta>,
    ) -> anyhow::Result<ProcessOutcome> {
        let mut context = DlqContext::default()
            .with_schema_id(schema_id.clone())
            .with_group(&self.settings.consumer_group);
        if let Some(meta) = attempts {
            context = context.with_attempts(meta);
        }
        self.dlq.publish(reason, &message.fields, context).await?;
        self.ack(&message.id).await?;
        Ok(ProcessOutcome::ContractError {
            reason: reason.to_string(),
            schema_id,
        })
    }

    async fn increment_attempt(&self, message_id: &str) -> BackendResult<AttemptMeta> {
        let key = format!(
            "attempts:{}:{}",
            self.settings.consumer_group, message_id
        );
        let attempts = self.backend.hash_incr(&key, "attempts", 1).await? as u32;
        let now = chrono::Utc::now().timestamp();
        let now_text = now.to_string();
        if attempts == 1 {
            self.backend
                .hash_set(
                    &key,
                    &[("first_seen_at", now_text.as_str()), ("last_seen_at", now_text.as_str())],
                )
                .await?;
        } else {
            self.backend
                .hash_set(&key, &[("last_seen_at", now_text.as_str())])
                .await?;
        }
        self.backend
            .expire(&key, Duration::from_secs(self.settings.dedupe_ttl_s))
            .await?;

        let data = self.backend.hash_get_all(&key).await?;
        let read = |field: &str| -> i64 {
            data.get(field).and_then(|v| v.parse().ok()).unwrap_or(now)
        };
        Ok(AttemptMeta {
            attempts,
            first_seen_at: read("first_seen_at"),
            last_seen_at: read("last_seen_at"),
        })
    }

    async fn ack(&self, message_id: &str) -> BackendResult<()> {
        self.backend
            .ack(
                &self.settings.stream_name,
                &self.settings.consumer_group,
                message_id,
            )
            .await
    }
}
