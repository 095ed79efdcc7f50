//! Fact extraction from work-context rows
//!
//! A row must carry `text` and `estimated_minutes`; anything less is a data
//! insufficiency, which the worker turns into a clarification rather than a
//! failed project.

use serde_json::{json, Value};

use super::{Fact, FactLedger};
use crate::failures::MissingDataError;

/// Extracts grounded facts and records them to the ledger.
pub struct GroundingEngine {
    ledger: FactLedger,
}

impl GroundingEngine {
    pub fn new(ledger: FactLedger) -> Self {
        Self { ledger }
    }

    /// Extract facts from `rows` and append them to the project ledger.
    pub async fn extract(
        &self,
        project_id: &str,
        backlog_item_id: &str,
        rows: &[Value],
    ) -> Result<Vec<Fact>, MissingDataError> {
        if rows.is_empty() {
            return Err(MissingDataError::new(vec!["rows".to_string()]));
        }

        let mut facts = Vec::with_capacity(rows.len() * 2);
        for (index, row) in rows.iter().enumerate() {
            let missing: Vec<String> = ["text", "estimated_minutes"]
                .iter()
                .filter(|key| row.get(**key).is_none())
                .map(|key| key.to_string())
                .collect();
            if !missing.is_empty() {
                return Err(MissingDataError::new(missing));
            }

            let source_fields: Vec<String> = row
                .as_object()
                .map(|object| object.keys().cloned().collect())
                .unwrap_or_default();
            let provenance = json!({
                "row_id": row.get("id").cloned().unwrap_or_else(|| json!(index)),
                "source_fields": source_fields,
            });

            facts.push(Fact {
                id: format!("fact-{index}"),
                field: "task_minutes".to_string(),
                value: row["estimated_minutes"].clone(),
                provenance: provenance.clone(),
            });
            facts.push(Fact {
                id: format!("fact-text-{index}"),
                field: "task_text".to_string(),
                value: row["text"].clone(),
                provenance,
            });
        }

        if let Err(e) = self
            .ledger
            .record(
                project_id,
                backlog_item_id,
                facts.clone(),
                json!({"count": facts.len()}),
            )
            .await
        {
            tracing::warn!("unable to record facts to ledger: {e}");
        }
        Ok(facts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(dir: &tempfile::TempDir) -> GroundingEngine {
        GroundingEngine::new(FactLedger::new(dir.path()))
    }

    #[tokio::test]
    async fn extracts_minute_and_text_facts_per_row() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![
            json!({"id": "r1", "text": "weekly report", "estimated_minutes": 45, "category": "reporting"}),
            json!({"text": "standup", "estimated_minutes": 15}),
        ];

        let facts = engine(&dir).extract("p1", "b1", &rows).await.unwrap();
        assert_eq!(facts.len(), 4);
        assert_eq!(facts[0].field, "task_minutes");
        assert_eq!(facts[0].value, json!(45));
        assert_eq!(facts[0].provenance["row_id"], json!("r1"));
        assert_eq!(facts[1].field, "task_text");
        // Rows without an explicit id fall back to their index.
        assert_eq!(facts[2].provenance["row_id"], json!(1));
    }

    #[tokio::test]
    async fn empty_rows_are_a_data_insufficiency() {
        let dir = tempfile::tempdir().unwrap();
        let err = engine(&dir).extract("p1", "b1", &[]).await.unwrap_err();
        assert_eq!(err.fields, vec!["rows"]);
    }

    #[tokio::test]
    async fn missing_columns_name_the_fields() {
        let dir = tempfile::tempdir().unwrap();
        let rows = vec![json!({"text": "no estimate"})];
        let err = engine(&dir).extract("p1", "b1", &rows).await.unwrap_err();
        assert_eq!(err.fields, vec!["estimated_minutes"]);
    }

    #[tokio::test]
    async fn facts_land_in_the_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FactLedger::new(dir.path());
        let engine = GroundingEngine::new(FactLedger::new(dir.path()));
        let rows = vec![json!({"text": "t", "estimated_minutes": 10})];
        engine.extract("p1", "b1", &rows).await.unwrap();

        let entries = ledger.load_entries("p1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].facts.len(), 2);
        assert_eq!(entries[0].coefficients["count"], json!(2));
    }
}
