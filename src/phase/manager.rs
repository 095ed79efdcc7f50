//! Phased agent manager
//!
//! Runs the fixed workflow for one message id, journaling progress before
//! each phase so a restart can resume from the last known position. A phase
//! timeout triggers one republish attempt; anything else escalates straight
//! to incident mode.

use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, warn};

use super::runner::{run_with_timeout, PhaseCommand};
use super::Phase;
use crate::config::Settings;
use crate::store::{PhaseState, StateJournal};

/// Called when a timed-out phase should be republished for a retry elsewhere.
pub type RepublishHandler = Box<dyn Fn(&str, Phase) -> anyhow::Result<()> + Send + Sync>;

/// Called when a phase failure cannot be recovered automatically.
pub type IncidentHandler = Box<dyn Fn(&str, Phase, &str) + Send + Sync>;

/// Sequences the ANALYZE -> ARCHITECTURE -> CODE -> REVIEW workflow.
pub struct AgentManager {
    settings: Settings,
    journal: StateJournal,
    republish_handler: Option<RepublishHandler>,
    incident_handler: Option<IncidentHandler>,
}

impl AgentManager {
    pub fn new(settings: Settings, journal: StateJournal) -> Self {
        Self {
            settings,
            journal,
            republish_handler: None,
            incident_handler: None,
        }
    }

    pub fn with_republish_handler(mut self, handler: RepublishHandler) -> Self {
        self.republish_handler = Some(handler);
        self
    }

    pub fn with_incident_handler(mut self, handler: IncidentHandler) -> Self {
        self.incident_handler = Some(handler);
        self
    }

    pub fn journal(&self) -> &StateJournal {
        &self.journal
    }

    fn timeout_for(&self, phase: Phase) -> Duration {
        let seconds = match phase {
            Phase::Analyze => self.settings.analyze_timeout_s,
            Phase::Architecture => self.settings.architecture_timeout_s,
            Phase::Code => self.settings.code_timeout_s,
            Phase::Review => self.settings.review_timeout_s,
        };
        Duration::from_secs(seconds)
    }

    /// Run every configured phase in order for `message_id`.
    ///
    /// Returns true only when all phases completed; the journal is cleared
    /// on full success and otherwise points at the failed phase.
    pub async fn run_workflow(
        &self,
        message_id: &str,
        phases: &HashMap<Phase, PhaseCommand>,
    ) -> bool {
        for phase in Phase::ORDERED {
            let Some(command) = phases.get(&phase) else {
                continue;
            };
            let succeeded = if phase == Phase::Review {
                self.run_review_with_retry(command, message_id).await
            } else {
                self.run_phase(phase, command, message_id).await
            };
            if !succeeded {
                return false;
            }
        }
        self.journal.clear().await;
        true
    }

    async fn run_phase(&self, phase: Phase, command: &PhaseCommand, message_id: &str) -> bool {
        self.journal
            .record(&PhaseState {
                phase,
                message_id: message_id.to_string(),
                timestamp: chrono::Utc::now().timestamp(),
            })
            .await;

        let outcome = run_with_timeout(command, self.timeout_for(phase)).await;
        if outcome.ok {
            return true;
        }
        let reason = outcome.reason.unwrap_or_else(|| "unknown error".to_string());
        self.handle_failure(phase, message_id, &reason);
        false
    }

    async fn run_review_with_retry(&self, command: &PhaseCommand, message_id: &str) -> bool {
        let max_attempts = self.settings.review_max_retries.max(1);
        for attempt in 1..=max_attempts {
            if self.run_phase(Phase::Review, command, message_id).await {
                return true;
            }
            warn!(
                message_id,
                attempt, max_attempts, "retrying review phase"
            );
        }
        self.handle_failure(Phase::Review, message_id, "all review attempts failed");
        false
    }

    fn handle_failure(&self, phase: Phase, message_id: &str, reason: &str) {
        if reason == "timeout" {
            if let Some(republish) = &self.republish_handler {
                warn!(message_id, %phase, "phase timed out, republishing");
                match republish(message_id, phase) {
                    Ok(()) => return,
                    Err(e) => {
                        error!(message_id, %phase, "republish handler failed: {e}");
                    }
                }
            }
        }

        error!(message_id, %phase, reason, "entering incident mode");
        if let Some(incident) = &self.incident_handler {
            incident(message_id, phase, reason);
        }
    }
}
