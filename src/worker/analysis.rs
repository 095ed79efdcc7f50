//! Work-context analysis math
//!
//! Pure functions over the `work_context.rows` payload: time totals and
//! per-category breakdowns, a confidence score, cost projection, recurring-
//! friction clustering, and the recovery scenario derived from them.

use serde_json::{json, Value};
use std::collections::BTreeMap;

/// Lowercase, strip punctuation, collapse whitespace.
pub fn normalize_text(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_ascii_punctuation())
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn rows(work_context: &Value) -> Vec<Value> {
    work_context
        .get("rows")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn row_minutes(row: &Value) -> f64 {
    match row.get("estimated_minutes") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Total minutes, total hours, and a per-category breakdown.
pub fn compute_time_metrics(work_context: &Value) -> (f64, f64, Vec<Value>) {
    let rows = rows(work_context);
    let mut total_minutes = 0.0;
    let mut category_minutes: BTreeMap<String, f64> = BTreeMap::new();

    for row in &rows {
        let minutes = row_minutes(row);
        total_minutes += minutes;
        let category = row
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or("uncategorized")
            .to_string();
        *category_minutes.entry(category).or_default() += minutes;
    }

    let total_hours = if total_minutes > 0.0 {
        total_minutes / 60.0
    } else {
        0.0
    };
    let breakdown = category_minutes
        .into_iter()
        .map(|(category, minutes)| {
            let share = if total_minutes > 0.0 {
                minutes / total_minutes * 100.0
            } else {
                0.0
            };
            json!({
                "category": category,
                "minutes": round2(minutes),
                "hours": round2(minutes / 60.0),
                "share_percent": round2(share),
            })
        })
        .collect();

    (round2(total_minutes), round2(total_hours), breakdown)
}

/// Heuristic confidence in the analysis, clamped to `[0, 1]`.
pub fn compute_confidence(work_context: &Value) -> f64 {
    let rows = rows(work_context);
    let mut confidence: f64 = 0.6;

    if work_context.get("hourly_rate").map(|v| !v.is_null()).unwrap_or(false) {
        confidence += 0.1;
    }
    if rows.len() > 5 {
        confidence += 0.05;
    }
    let categories: std::collections::BTreeSet<&str> = rows
        .iter()
        .filter_map(|r| r.get("category").and_then(Value::as_str))
        .collect();
    if categories.len() > 1 {
        confidence += 0.05;
    }
    let missing_estimates = rows
        .iter()
        .filter(|r| {
            matches!(
                r.get("estimated_minutes"),
                None | Some(Value::Null)
            ) || r.get("estimated_minutes").and_then(Value::as_str) == Some("")
        })
        .count();
    if missing_estimates > 2 {
        confidence -= 0.1;
    }

    round2(confidence.clamp(0.0, 1.0))
}

/// Monthly and annual cost projection; `None` without an hourly rate.
pub fn compute_costs(total_hours: f64, work_context: &Value) -> Option<Value> {
    let hourly_rate = work_context.get("hourly_rate").and_then(Value::as_f64)?;
    let monthly_cost = total_hours * hourly_rate;
    let annual_cost = monthly_cost * 12.0;
    Some(json!({
        "hourly_rate": hourly_rate,
        "monthly_cost": round2(monthly_cost),
        "annual_cost": round2(annual_cost),
    }))
}

/// Cluster recurring rows by normalized text and estimate avoidable share.
pub fn compute_friction(work_context: &Value) -> Value {
    let rows = rows(work_context);
    let mut buckets: BTreeMap<String, Vec<&Value>> = BTreeMap::new();
    for row in &rows {
        let text = row.get("text").and_then(Value::as_str).unwrap_or_default();
        let key: String = normalize_text(text).chars().take(48).collect();
        buckets.entry(key).or_default().push(row);
    }

    let recurring: BTreeMap<&String, &Vec<&Value>> = buckets
        .iter()
        .filter(|(key, group)| group.len() > 1 && !key.is_empty())
        .collect();
    let recurring_count: usize = recurring.values().map(|group| group.len()).sum();
    let total_rows = rows.len();
    let recurring_share = if total_rows > 0 {
        recurring_count as f64 / total_rows as f64 * 100.0
    } else {
        0.0
    };
    let avoidable_percent = round2(recurring_share * 1.25).min(60.0);

    let clusters: Vec<Value> = recurring
        .iter()
        .map(|(fingerprint, group)| {
            let sample: String = group[0]
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .chars()
                .take(120)
                .collect();
            json!({
                "fingerprint": fingerprint,
                "count": group.len(),
                "sample_text": sample,
            })
        })
        .collect();

    json!({
        "total_rows": total_rows,
        "recurring_count": recurring_count,
        "recurring_share": round2(recurring_share),
        "avoidable_percent": avoidable_percent,
        "clusters": clusters,
    })
}

/// What could be recovered if the avoidable share went away.
pub fn compute_scenario(total_hours: f64, costs: Option<&Value>, friction: &Value) -> Value {
    let avoidable_percent = friction
        .get("avoidable_percent")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let recovered_hours = total_hours * (avoidable_percent / 100.0);
    let hourly_rate = costs
        .and_then(|c| c.get("hourly_rate"))
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    let recovered_monthly_cost = recovered_hours * hourly_rate;
    let summary = format!(
        "Recover {}h ({avoidable_percent}% avoidable) worth ${} per month",
        round2(recovered_hours),
        round2(recovered_monthly_cost)
    );
    json!({
        "avoidable_percent": avoidable_percent,
        "recovered_hours": round2(recovered_hours),
        "recovered_monthly_cost": round2(recovered_monthly_cost),
        "summary": summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> Value {
        json!({
            "hourly_rate": 50.0,
            "rows": [
                {"text": "Weekly report", "estimated_minutes": 60, "category": "reporting"},
                {"text": "weekly report!", "estimated_minutes": 45, "category": "reporting"},
                {"text": "Triage inbox", "estimated_minutes": 30, "category": "comms"},
            ]
        })
    }

    #[test]
    fn normalize_strips_case_punctuation_and_whitespace() {
        assert_eq!(normalize_text("Weekly  Report!"), "weekly report");
        assert_eq!(normalize_text(""), "");
    }

    #[test]
    fn time_metrics_total_and_breakdown() {
        let (minutes, hours, breakdown) = compute_time_metrics(&context());
        assert_eq!(minutes, 135.0);
        assert_eq!(hours, 2.25);
        assert_eq!(breakdown.len(), 2);
        // Alphabetical by category.
        assert_eq!(breakdown[0]["category"], "comms");
        assert_eq!(breakdown[1]["minutes"], 105.0);
    }

    #[test]
    fn empty_rows_mean_zero_metrics() {
        let (minutes, hours, breakdown) = compute_time_metrics(&json!({"rows": []}));
        assert_eq!(minutes, 0.0);
        assert_eq!(hours, 0.0);
        assert!(breakdown.is_empty());
    }

    #[test]
    fn confidence_rewards_rate_and_category_diversity() {
        // 0.6 base + 0.1 rate + 0.05 categories
        assert_eq!(compute_confidence(&context()), 0.75);
        assert_eq!(compute_confidence(&json!({"rows": []})), 0.6);
    }

    #[test]
    fn costs_require_an_hourly_rate() {
        let costs = compute_costs(2.25, &context()).unwrap();
        assert_eq!(costs["monthly_cost"], 112.5);
        assert_eq!(costs["annual_cost"], 1350.0);
        assert!(compute_costs(2.25, &json!({"rows": []})).is_none());
    }

    #[test]
    fn friction_clusters_recurring_rows() {
        let friction = compute_friction(&context());
        assert_eq!(friction["total_rows"], 3);
        assert_eq!(friction["recurring_count"], 2);
        let clusters = friction["clusters"].as_array().unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0]["fingerprint"], "weekly report");
    }

    #[test]
    fn scenario_combines_the_pieces() {
        let friction = compute_friction(&context());
        let costs = compute_costs(2.25, &context());
        let scenario = compute_scenario(2.25, costs.as_ref(), &friction);
        assert!(scenario["recovered_hours"].as_f64().unwrap() > 0.0);
        assert!(scenario["summary"].as_str().unwrap().starts_with("Recover"));
    }
}
