//! Orchestrator service
//!
//! Single consumer of the work stream. Turns initial requests into a
//! backlog, blocks ambiguous items behind clarification questions,
//! dispatches ready items to worker agents under a per-item lock, and gates
//! completions behind the definition-of-done registry.
//!
//! Business failures never dead-letter a message here: a failed
//! definition-of-done or an illegal transition becomes a `WORK.ITEM_FAILED`
//! plus a `CLARIFICATION.NEEDED` so a human can re-engage, and the message
//! is acknowledged.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::backend::KvBackend;
use crate::config::Settings;
use crate::dod::DodRegistry;
use crate::event::{types, EventEnvelope};
use crate::failures::{Failure, FailureCategory};
use crate::metrics::MetricsRecorder;
use crate::runtime::locks::dispatch_lock_key;
use crate::runtime::{EventHandler, HandlerError, LockManager};
use crate::state_machine::{assert_transition, BacklogStatus};
use crate::store::{AnswerType, BacklogItem, BacklogStore, ProjectStore, QuestionStore};
use crate::trace::{TraceLogger, TraceRecord};

const SERVICE_NAME: &str = "orchestrator";

/// The orchestrator state machine and its collaborators.
pub struct Orchestrator {
    backend: Arc<dyn KvBackend>,
    settings: Settings,
    backlog: BacklogStore,
    questions: QuestionStore,
    projects: ProjectStore,
    dod: DodRegistry,
    locks: LockManager,
    trace: TraceLogger,
    metrics: MetricsRecorder,
}

impl Orchestrator {
    pub fn new(backend: Arc<dyn KvBackend>, settings: Settings) -> Self {
        let prefix = settings.key_prefix.clone();
        Self {
            backlog: BacklogStore::new(backend.clone(), prefix.clone()),
            questions: QuestionStore::new(backend.clone(), prefix.clone()),
            projects: ProjectStore::new(backend.clone(), prefix),
            dod: DodRegistry::with_known_agents(),
            locks: LockManager::new(backend.clone()),
            trace: TraceLogger::new(Some(backend.clone()), settings.trace_prefix.clone()),
            metrics: MetricsRecorder::new(Some(backend.clone()), settings.metrics_prefix.clone()),
            backend,
            settings,
        }
    }

    pub fn backlog(&self) -> &BacklogStore {
        &self.backlog
    }

    pub fn questions(&self) -> &QuestionStore {
        &self.questions
    }

    pub fn projects(&self) -> &ProjectStore {
        &self.projects
    }

    pub fn dod_mut(&mut self) -> &mut DodRegistry {
        &mut self.dod
    }

    async fn publish(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let encoded = envelope.to_json()?;
        self.backend
            .stream_append(&self.settings.stream_name, &[("event", &encoded)])
            .await?;
        Ok(())
    }

    fn envelope(
        &self,
        event_type: &str,
        payload: Value,
        correlation_id: &str,
        causation_id: &str,
    ) -> EventEnvelope {
        EventEnvelope::builder(event_type, SERVICE_NAME)
            .payload(payload)
            .correlation_id(correlation_id)
            .causation_id(causation_id)
            .instance(self.settings.consumer_name.clone())
            .build()
    }

    /// Deterministic backlog template: three READY tasks per request.
    fn backlog_template(&self, project_id: &str) -> Vec<BacklogItem> {
        let task = |title: &str, description: &str| BacklogItem {
            id: uuid::Uuid::new_v4().to_string(),
            project_id: project_id.to_string(),
            item_type: "TASK".to_string(),
            title: title.to_string(),
            description: description.to_string(),
            status: BacklogStatus::Ready,
            evidence: json!({}),
        };
        vec![
            task("Collect requirements", "Clarify scope and KPIs"),
            task("Run checks", "Compute KPIs and anomalies"),
            task("Produce report", "Generate deliverable"),
        ]
    }

    /// Clarification heuristic over the originating request.
    fn needs_clarification(&self, request_text: &str) -> Option<String> {
        let text = request_text.trim();
        if text.len() < 12 {
            return Some("Request too short: specify scope and expected KPIs.".to_string());
        }
        if text.to_lowercase().contains("kpi") && !text.contains('?') {
            return Some(
                "Which KPIs do you want (SLA, MTTR, backlog aging, incident volume, etc.)?"
                    .to_string(),
            );
        }
        None
    }

    /// Route a backlog item title to its worker agent.
    fn agent_target_for(title: &str) -> &'static str {
        let lower = title.to_lowercase();
        if lower.contains("collect requirements") {
            "requirements_manager"
        } else if lower.contains("run checks") {
            "dev_worker"
        } else if lower.contains("produce report") || lower.contains("test") {
            "test_worker"
        } else {
            "dev_worker"
        }
    }

    /// Apply a status change through the transition authority.
    ///
    /// Returns false (without mutating) when the item is missing or the
    /// transition is illegal; already being at `target` counts as success.
    /// An illegal transition is logged and surfaced as `WORK.ITEM_FAILED`,
    /// never propagated.
    async fn apply_status_safe(
        &self,
        project_id: &str,
        item_id: &str,
        target: BacklogStatus,
        correlation_id: &str,
        causation_id: &str,
    ) -> Result<bool, HandlerError> {
        let Some(item) = self.backlog.get_item(project_id, item_id).await? else {
            warn!(item_id, "status change on missing backlog item");
            return Ok(false);
        };
        if item.status == target {
            return Ok(true);
        }
        if let Err(e) = assert_transition(item.status, target, Some(item_id)) {
            warn!("{e}");
            self.publish(&self.envelope(
                types::WORK_ITEM_FAILED,
                json!({
                    "project_id": project_id,
                    "backlog_item_id": item_id,
                    "failure": Failure::new(FailureCategory::ToolFailure, e.to_string())
                        .to_payload(),
                }),
                correlation_id,
                causation_id,
            ))
            .await?;
            return Ok(false);
        }
        self.backlog.set_status(project_id, item_id, target).await?;
        Ok(true)
    }

    async fn handle_initial_request(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let payload = &envelope.payload;
        let project_id = required_str(payload, "project_id")?;
        let request_text = payload
            .get("request_text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let correlation = &envelope.correlation_id;
        let causation = &envelope.event_id;

        if self.projects.get_project(project_id).await?.is_none() {
            let short_id: String = project_id.chars().take(8).collect();
            self.projects
                .create_project(
                    Some(project_id.to_string()),
                    &format!("Project {short_id}"),
                    request_text,
                    payload.get("requester").cloned().unwrap_or(json!({})),
                    payload.get("constraints").cloned().unwrap_or(json!({})),
                )
                .await?;
        }
        self.projects
            .add_interaction(project_id, "user_input", request_text, json!({}))
            .await?;

        let items = self.backlog_template(project_id);
        for item in &items {
            self.backlog.put_item(item).await?;
        }

        // Block anything the request cannot answer and open a question for it.
        for item in &items {
            let Some(reason) = self.needs_clarification(request_text) else {
                continue;
            };
            if !self
                .apply_status_safe(project_id, &item.id, BacklogStatus::Blocked, correlation, causation)
                .await?
            {
                continue;
            }

            let question = self
                .questions
                .create_question(
                    project_id,
                    &item.id,
                    &reason,
                    AnswerType::Text,
                    Some(correlation.clone()),
                )
                .await?;

            self.publish(&self.envelope(
                types::QUESTION_CREATED,
                json!({ "question": serde_json::to_value(&question)? }),
                correlation,
                causation,
            ))
            .await?;
            self.publish(&self.envelope(
                types::CLARIFICATION_NEEDED,
                json!({
                    "project_id": project_id,
                    "backlog_item_id": item.id,
                    "question_id": question.id,
                }),
                correlation,
                causation,
            ))
            .await?;
            self.projects
                .send_message_to_customer(
                    project_id,
                    "clarification",
                    &question.question_text,
                    Some(item.id.clone()),
                    true,
                )
                .await?;
        }

        self.dispatch_ready_tasks(correlation, causation).await?;
        self.projects
            .calculate_project_status(project_id, &self.backlog)
            .await?;
        Ok(())
    }

    async fn handle_answer_submitted(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let payload = &envelope.payload;
        let project_id = required_str(payload, "project_id")?;
        let question_id = required_str(payload, "question_id")?;
        let answer = payload.get("answer").cloned().unwrap_or(Value::Null);
        let correlation = &envelope.correlation_id;
        let causation = &envelope.event_id;

        self.questions
            .set_answer(project_id, question_id, &answer)
            .await?;
        self.questions
            .close_question(project_id, question_id)
            .await?;
        self.projects
            .add_interaction(project_id, "user_input", &answer.to_string(), json!({}))
            .await?;

        let question = self.questions.get_question(project_id, question_id).await?;
        if let Some(question) = question {
            self.apply_status_safe(
                project_id,
                &question.backlog_item_id,
                BacklogStatus::Ready,
                correlation,
                causation,
            )
            .await?;
            self.publish(&self.envelope(
                types::BACKLOG_ITEM_UNBLOCKED,
                json!({
                    "project_id": project_id,
                    "backlog_item_id": question.backlog_item_id,
                    "question_id": question_id,
                }),
                correlation,
                causation,
            ))
            .await?;
            self.dispatch_ready_tasks(correlation, causation).await?;
        }

        self.projects
            .calculate_project_status(project_id, &self.backlog)
            .await?;
        Ok(())
    }

    async fn handle_work_completed(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        let payload = &envelope.payload;
        let project_id = required_str(payload, "project_id")?;
        let item_id = required_str(payload, "backlog_item_id")?;
        let agent = envelope.source.service.as_str();
        let correlation = &envelope.correlation_id;
        let causation = &envelope.event_id;

        self.metrics.inc("work_item_completed_seen").await;
        let verdict = self.dod.validate(agent, payload);

        if !verdict.ok {
            let reason = verdict.reason.unwrap_or_else(|| "dod_failed".to_string());
            self.publish(&self.envelope(
                types::WORK_ITEM_FAILED,
                json!({
                    "project_id": project_id,
                    "backlog_item_id": item_id,
                    "failure": Failure::new(FailureCategory::DataInsufficiency, &reason)
                        .to_payload(),
                }),
                correlation,
                causation,
            ))
            .await?;
            self.publish(&self.envelope(
                types::CLARIFICATION_NEEDED,
                json!({
                    "project_id": project_id,
                    "backlog_item_id": item_id,
                    "reason": reason,
                    "agent": agent,
                }),
                correlation,
                causation,
            ))
            .await?;
            return Ok(());
        }

        self.apply_status_safe(project_id, item_id, BacklogStatus::Done, correlation, causation)
            .await?;
        self.trace
            .log(&TraceRecord {
                agent: agent.to_string(),
                event_type: envelope.event_type.clone(),
                decision: "definition_of_done_passed".to_string(),
                inputs: json!({ "payload": payload }),
                outputs: json!({ "status": "DONE" }),
                correlation_id: Some(correlation.clone()),
            })
            .await;
        self.projects
            .calculate_project_status(project_id, &self.backlog)
            .await?;
        Ok(())
    }

    async fn handle_approval_requested(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<(), HandlerError> {
        let payload = &envelope.payload;
        let project_id = required_str(payload, "project_id")?;
        let item_id = required_str(payload, "backlog_item_id")?;
        self.backend
            .set(&approval_key(project_id, item_id), "1")
            .await?;
        self.metrics.inc("human_approval_requested").await;
        Ok(())
    }

    async fn handle_approval_submitted(
        &self,
        envelope: &EventEnvelope,
    ) -> Result<(), HandlerError> {
        let payload = &envelope.payload;
        let project_id = required_str(payload, "project_id")?;
        let item_id = required_str(payload, "backlog_item_id")?;
        self.backend
            .delete(&approval_key(project_id, item_id))
            .await?;
        self.metrics.inc("human_approval_completed").await;
        self.dispatch_ready_tasks(&envelope.correlation_id, &envelope.event_id)
            .await?;
        Ok(())
    }

    /// Dispatch every READY item across all projects.
    ///
    /// Each item is dispatched under a short-TTL lock so concurrent
    /// orchestrator peers never double-dispatch; a busy lock means someone
    /// else is already on it.
    pub async fn dispatch_ready_tasks(
        &self,
        correlation_id: &str,
        causation_id: &str,
    ) -> Result<u32, HandlerError> {
        let mut dispatched = 0;
        for project_id in self.projects.list_projects().await? {
            let project = self.projects.get_project(&project_id).await?;
            let ready = self
                .backlog
                .items_by_status(&project_id, BacklogStatus::Ready)
                .await?;

            for item in ready {
                let agent_target = Self::agent_target_for(&item.title);
                let lock_key = dispatch_lock_key(&project_id, &item.id);
                let Some(token) = self
                    .locks
                    .acquire(
                        &lock_key,
                        Duration::from_secs(self.settings.dispatch_lock_ttl_s),
                    )
                    .await?
                else {
                    // A peer is already dispatching this item.
                    continue;
                };

                let rows = project
                    .as_ref()
                    .and_then(|p| p.metadata.get("rows"))
                    .cloned()
                    .unwrap_or_else(|| json!([]));
                let dispatch = self.envelope(
                    types::WORK_ITEM_DISPATCHED,
                    json!({
                        "project_id": project_id,
                        "backlog_item_id": item.id,
                        "item_type": item.item_type,
                        "agent_target": agent_target,
                        "work_context": { "rows": rows },
                    }),
                    correlation_id,
                    causation_id,
                );
                self.publish(&dispatch).await?;
                self.apply_status_safe(
                    &project_id,
                    &item.id,
                    BacklogStatus::InProgress,
                    correlation_id,
                    causation_id,
                )
                .await?;
                self.locks.release(&lock_key, &token).await?;

                info!(
                    %project_id,
                    item_id = %item.id,
                    agent_target,
                    "dispatched backlog item"
                );
                dispatched += 1;
            }
        }
        Ok(dispatched)
    }
}

#[async_trait]
impl EventHandler for Orchestrator {
    async fn handle(&self, envelope: &EventEnvelope) -> Result<(), HandlerError> {
        match envelope.event_type.as_str() {
            types::PROJECT_INITIAL_REQUEST_RECEIVED => self.handle_initial_request(envelope).await,
            types::USER_ANSWER_SUBMITTED => self.handle_answer_submitted(envelope).await,
            types::WORK_ITEM_COMPLETED => self.handle_work_completed(envelope).await,
            types::HUMAN_APPROVAL_REQUESTED => self.handle_approval_requested(envelope).await,
            types::HUMAN_APPROVAL_SUBMITTED => self.handle_approval_submitted(envelope).await,
            // Everything else on the shared stream is not ours to act on.
            _ => Ok(()),
        }
    }
}

fn approval_key(project_id: &str, item_id: &str) -> String {
    format!("approval:pending:{project_id}:{item_id}")
}

fn required_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str, HandlerError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::Other(anyhow::anyhow!("payload missing {field}")))
}
