//! Append-only fact ledger
//!
//! One JSONL file per project under the ledger directory; each line links a
//! backlog item's outputs back to the input facts and coefficients.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::Fact;

/// One ledger line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub project_id: String,
    pub backlog_item_id: String,
    pub facts: Vec<Fact>,
    pub coefficients: Value,
}

/// Immutable append-only ledger on the local filesystem.
pub struct FactLedger {
    base_dir: PathBuf,
}

impl FactLedger {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn ledger_path(&self, project_id: &str) -> PathBuf {
        self.base_dir.join(format!("{project_id}_ledger.jsonl"))
    }

    /// Append one entry, creating the ledger directory on first use.
    pub async fn record(
        &self,
        project_id: &str,
        backlog_item_id: &str,
        facts: Vec<Fact>,
        coefficients: Value,
    ) -> std::io::Result<PathBuf> {
        use tokio::io::AsyncWriteExt;

        tokio::fs::create_dir_all(&self.base_dir).await?;
        let entry = LedgerEntry {
            project_id: project_id.to_string(),
            backlog_item_id: backlog_item_id.to_string(),
            facts,
            coefficients,
        };
        let mut line = serde_json::to_string(&entry).map_err(std::io::Error::other)?;
        line.push('\n');
        let path = self.ledger_path(project_id);
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        Ok(path)
    }

    /// All entries recorded for a project, in write order.
    pub async fn load_entries(&self, project_id: &str) -> std::io::Result<Vec<LedgerEntry>> {
        let path = self.ledger_path(project_id);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        let mut entries = Vec::new();
        for line in content.lines() {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                continue;
            }
            entries.push(serde_json::from_str(trimmed).map_err(std::io::Error::other)?);
        }
        Ok(entries)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn fact(id: &str, minutes: f64) -> Fact {
        Fact {
            id: id.to_string(),
            field: "task_minutes".to_string(),
            value: json!(minutes),
            provenance: json!({"row_id": 0}),
        }
    }

    #[tokio::test]
    async fn entries_append_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FactLedger::new(dir.path());

        ledger
            .record("p1", "b1", vec![fact("f1", 30.0)], json!({"count": 1}))
            .await
            .unwrap();
        ledger
            .record("p1", "b2", vec![fact("f2", 45.0)], json!({"count": 1}))
            .await
            .unwrap();

        let entries = ledger.load_entries("p1").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].backlog_item_id, "b1");
        assert_eq!(entries[1].backlog_item_id, "b2");
    }

    #[tokio::test]
    async fn projects_get_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FactLedger::new(dir.path());
        ledger
            .record("p1", "b1", vec![fact("f1", 30.0)], json!({}))
            .await
            .unwrap();

        assert_eq!(ledger.load_entries("p1").await.unwrap().len(), 1);
        assert!(ledger.load_entries("p2").await.unwrap().is_empty());
    }
}
