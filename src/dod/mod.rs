//! Definition-of-done validation
//!
//! Completion payloads pass through a per-agent validator before the
//! orchestrator advances the backlog. Unknown agents fall back to the
//! default rule: evidence must exist and be non-empty. Completions carrying
//! declarative facts and a deliverable are additionally screened by the
//! [`evaluation::OutcomeEvaluator`].

pub mod evaluation;

use serde_json::Value;
use std::collections::HashMap;

use evaluation::OutcomeEvaluator;

/// Result of a definition-of-done check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DodVerdict {
    pub ok: bool,
    pub reason: Option<String>,
}

impl DodVerdict {
    pub fn pass() -> Self {
        Self {
            ok: true,
            reason: None,
        }
    }

    pub fn fail(reason: impl Into<String>) -> Self {
        Self {
            ok: false,
            reason: Some(reason.into()),
        }
    }
}

/// A validator over a `WORK.ITEM_COMPLETED` payload.
pub type DodValidator = Box<dyn Fn(&Value) -> DodVerdict + Send + Sync>;

/// Per-agent registry of completion validators.
pub struct DodRegistry {
    validators: HashMap<String, DodValidator>,
}

impl DodRegistry {
    pub fn new() -> Self {
        Self {
            validators: HashMap::new(),
        }
    }

    /// Registry pre-wired with the default validator for the known agents.
    pub fn with_known_agents() -> Self {
        let mut registry = Self::new();
        for agent in [
            "requirements_manager",
            "dev_worker",
            "test_worker",
            "scenario_worker",
        ] {
            registry.register(agent, Box::new(default_validator));
        }
        registry
    }

    pub fn register(&mut self, agent_name: &str, validator: DodValidator) {
        self.validators.insert(agent_name.to_string(), validator);
    }

    /// Validate a completion payload for `agent_name`.
    ///
    /// Agents without a registered validator only need non-empty evidence.
    pub fn validate(&self, agent_name: &str, payload: &Value) -> DodVerdict {
        match self.validators.get(agent_name) {
            Some(validator) => validator(payload),
            None => {
                if nonempty_evidence(payload) {
                    DodVerdict::pass()
                } else {
                    DodVerdict::fail("missing evidence")
                }
            }
        }
    }
}

impl Default for DodRegistry {
    fn default() -> Self {
        Self::with_known_agents()
    }
}

/// Default rule: non-empty evidence, plus outcome evaluation when the
/// evidence carries facts or a deliverable.
pub fn default_validator(payload: &Value) -> DodVerdict {
    if !nonempty_evidence(payload) {
        return DodVerdict::fail("missing evidence");
    }
    let evidence = &payload["evidence"];
    let facts: Vec<Value> = evidence
        .get("facts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let deliverable = evidence
        .get("deliverable")
        .cloned()
        .unwrap_or_else(|| Value::Object(Default::default()));

    match OutcomeEvaluator::default().evaluate(&facts, &deliverable) {
        Err(contradiction) => DodVerdict::fail(contradiction.message),
        Ok(result) if !result.ok => DodVerdict::fail(result.alerts.join(";")),
        Ok(_) => DodVerdict::pass(),
    }
}

fn nonempty_evidence(payload: &Value) -> bool {
    payload
        .get("evidence")
        .and_then(Value::as_object)
        .map(|evidence| !evidence.is_empty())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unknown_agent_requires_nonempty_evidence() {
        let registry = DodRegistry::new();
        let pass = registry.validate("mystery_agent", &json!({"evidence": {"note": "done"}}));
        assert!(pass.ok);

        let fail = registry.validate("mystery_agent", &json!({"evidence": {}}));
        assert!(!fail.ok);
        assert_eq!(fail.reason.as_deref(), Some("missing evidence"));

        let absent = registry.validate("mystery_agent", &json!({}));
        assert!(!absent.ok);
    }

    #[test]
    fn default_validator_rejects_empty_evidence() {
        assert!(!default_validator(&json!({"evidence": {}})).ok);
        assert!(default_validator(&json!({"evidence": {"total_minutes": 90}})).ok);
    }

    #[test]
    fn default_validator_feeds_facts_to_evaluator() {
        let payload = json!({
            "evidence": {
                "facts": [
                    {"id": "f1", "field": "task_minutes", "value": 600, "provenance": {"unit": "minutes"}},
                    {"id": "f2", "field": "task_minutes", "value": 100, "provenance": {"unit": "minutes"}}
                ],
                "deliverable": {}
            }
        });
        let verdict = default_validator(&payload);
        assert!(!verdict.ok);
        assert!(verdict.reason.unwrap().contains("total_minutes_exceeds_cap"));
    }

    #[test]
    fn unverifiable_claims_fail_validation() {
        let payload = json!({
            "evidence": {
                "facts": [],
                "deliverable": {"claims": [{"text": "saves 40h/mo"}]}
            }
        });
        let verdict = default_validator(&payload);
        assert!(!verdict.ok);
        assert!(verdict.reason.unwrap().contains("unverifiable"));
    }

    #[test]
    fn registered_validator_takes_precedence() {
        let mut registry = DodRegistry::new();
        registry.register(
            "strict_agent",
            Box::new(|_payload| DodVerdict::fail("never good enough")),
        );
        let verdict = registry.validate("strict_agent", &json!({"evidence": {"a": 1}}));
        assert!(!verdict.ok);
    }
}
