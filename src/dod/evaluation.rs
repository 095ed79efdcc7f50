//! Outcome evaluation over facts and deliverables
//!
//! Sanity screens applied to completion evidence: a cap on total claimed
//! task minutes, a refusal of claims without sources, and a unit-mismatch
//! alert across fact provenance.

use serde_json::Value;
use std::collections::BTreeSet;

use crate::failures::ContradictionError;

/// Soft alerts plus an overall verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationResult {
    pub ok: bool,
    pub alerts: Vec<String>,
}

/// Screens facts and deliverables for obviously wrong outputs.
pub struct OutcomeEvaluator {
    max_minutes: f64,
    guard_unverifiable: bool,
}

impl Default for OutcomeEvaluator {
    fn default() -> Self {
        Self {
            // One working day.
            max_minutes: 8.0 * 60.0,
            guard_unverifiable: true,
        }
    }
}

impl OutcomeEvaluator {
    pub fn new(max_minutes: f64, guard_unverifiable: bool) -> Self {
        Self {
            max_minutes,
            guard_unverifiable,
        }
    }

    /// Evaluate completion evidence.
    ///
    /// Claims without sources are a hard refusal ([`ContradictionError`]);
    /// everything else surfaces as alerts in the result.
    pub fn evaluate(
        &self,
        facts: &[Value],
        deliverable: &Value,
    ) -> Result<EvaluationResult, ContradictionError> {
        let mut alerts = Vec::new();

        let total_minutes: f64 = facts
            .iter()
            .filter(|f| f.get("field").and_then(Value::as_str) == Some("task_minutes"))
            .filter_map(|f| f.get("value").and_then(Value::as_f64))
            .sum();
        if total_minutes > self.max_minutes {
            alerts.push(format!("total_minutes_exceeds_cap:{total_minutes}"));
        }

        if self.guard_unverifiable {
            if let Some(claims) = deliverable.get("claims").and_then(Value::as_array) {
                let unverifiable = claims.iter().any(|claim| {
                    claim
                        .get("sources")
                        .and_then(Value::as_array)
                        .map(|sources| sources.is_empty())
                        .unwrap_or(true)
                });
                if unverifiable {
                    return Err(ContradictionError::new("unverifiable claims detected"));
                }
            }
        }

        // Facts without provenance stay out of the unit comparison; a single
        // missing unit disables it entirely.
        let mut units = BTreeSet::new();
        let mut missing_unit = false;
        for fact in facts {
            let Some(provenance) = fact.get("provenance").filter(|p| !p.is_null()) else {
                continue;
            };
            match provenance.get("unit").and_then(Value::as_str) {
                Some(unit) => {
                    units.insert(unit.to_string());
                }
                None => missing_unit = true,
            }
        }
        if !missing_unit && units.len() > 1 {
            alerts.push("unit_mismatch".to_string());
        }

        Ok(EvaluationResult {
            ok: alerts.is_empty(),
            alerts,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minutes_fact(value: f64, unit: &str) -> Value {
        json!({
            "id": "f",
            "field": "task_minutes",
            "value": value,
            "provenance": {"unit": unit}
        })
    }

    #[test]
    fn clean_facts_pass() {
        let evaluator = OutcomeEvaluator::default();
        let facts = vec![minutes_fact(30.0, "minutes"), minutes_fact(60.0, "minutes")];
        let result = evaluator.evaluate(&facts, &json!({})).unwrap();
        assert!(result.ok);
        assert!(result.alerts.is_empty());
    }

    #[test]
    fn exceeding_the_minutes_cap_alerts() {
        let evaluator = OutcomeEvaluator::default();
        let facts = vec![minutes_fact(400.0, "minutes"), minutes_fact(200.0, "minutes")];
        let result = evaluator.evaluate(&facts, &json!({})).unwrap();
        assert!(!result.ok);
        assert_eq!(result.alerts, vec!["total_minutes_exceeds_cap:600"]);
    }

    #[test]
    fn claims_without_sources_are_refused() {
        let evaluator = OutcomeEvaluator::default();
        let deliverable = json!({"claims": [{"text": "30% faster"}]});
        assert!(evaluator.evaluate(&[], &deliverable).is_err());

        let sourced = json!({"claims": [{"text": "30% faster", "sources": ["report.csv"]}]});
        assert!(evaluator.evaluate(&[], &sourced).is_ok());
    }

    #[test]
    fn mixed_units_alert() {
        let evaluator = OutcomeEvaluator::default();
        let facts = vec![minutes_fact(10.0, "minutes"), minutes_fact(1.0, "hours")];
        let result = evaluator.evaluate(&facts, &json!({})).unwrap();
        assert_eq!(result.alerts, vec!["unit_mismatch"]);
    }

    #[test]
    fn missing_unit_disables_mismatch_alert() {
        let evaluator = OutcomeEvaluator::default();
        let facts = vec![
            minutes_fact(10.0, "minutes"),
            minutes_fact(1.0, "hours"),
            json!({"id": "f3", "field": "task_minutes", "value": 5, "provenance": {}}),
        ];
        let result = evaluator.evaluate(&facts, &json!({})).unwrap();
        assert!(result.ok);
    }

    #[test]
    fn guard_can_be_disabled() {
        let evaluator = OutcomeEvaluator::new(480.0, false);
        let deliverable = json!({"claims": [{"text": "unsourced"}]});
        assert!(evaluator.evaluate(&[], &deliverable).is_ok());
    }
}
