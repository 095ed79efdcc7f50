//! Persistent state journal
//!
//! Minimal durable record of the last `(phase, message_id)` a phased
//! workflow reached, written both to a backend hash and to a local JSONL
//! file so an operator can resume after a restart even when one of the two
//! is gone. All writes are best effort: failures log and never raise.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

use crate::backend::KvBackend;
use crate::phase::Phase;

/// Last known position of a phased workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseState {
    pub phase: Phase,
    pub message_id: String,
    pub timestamp: i64,
}

/// Dual-destination journal: backend hash plus local JSONL file.
pub struct StateJournal {
    backend: Option<Arc<dyn KvBackend>>,
    hash_key: String,
    journal_path: PathBuf,
}

impl StateJournal {
    pub fn new(
        backend: Option<Arc<dyn KvBackend>>,
        hash_key: impl Into<String>,
        journal_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            hash_key: hash_key.into(),
            journal_path: journal_path.into(),
        }
    }

    /// Record the state in both destinations, best effort.
    pub async fn record(&self, state: &PhaseState) {
        if let Some(backend) = &self.backend {
            let timestamp = state.timestamp.to_string();
            let entries = [
                ("phase", state.phase.as_str()),
                ("message_id", state.message_id.as_str()),
                ("timestamp", timestamp.as_str()),
            ];
            if let Err(e) = backend.hash_set(&self.hash_key, &entries).await {
                warn!("unable to persist journal state to backend: {e}");
            }
        }

        if let Err(e) = self.append_line(state).await {
            warn!("unable to persist journal state locally: {e}");
        }
    }

    async fn append_line(&self, state: &PhaseState) -> std::io::Result<()> {
        use tokio::io::AsyncWriteExt;

        if let Some(parent) = self.journal_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let mut line = serde_json::to_string(state).map_err(std::io::Error::other)?;
        line.push('\n');
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.journal_path)
            .await?;
        file.write_all(line.as_bytes()).await
    }

    /// Drop the journal from both destinations, best effort.
    pub async fn clear(&self) {
        if let Some(backend) = &self.backend {
            if let Err(e) = backend.delete(&self.hash_key).await {
                warn!("unable to clear backend journal state: {e}");
            }
        }
        match tokio::fs::remove_file(&self.journal_path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("unable to clear local journal state: {e}"),
        }
    }

    /// Last recorded state: the backend hash wins, the file is the fallback.
    pub async fn last_known_state(&self) -> Option<PhaseState> {
        if let Some(state) = self.from_backend().await {
            return Some(state);
        }
        self.from_file().await
    }

    async fn from_backend(&self) -> Option<PhaseState> {
        let backend = self.backend.as_ref()?;
        let data = backend.hash_get_all(&self.hash_key).await.ok()?;
        let phase: Phase = data.get("phase")?.parse().ok()?;
        let message_id = data.get("message_id")?.clone();
        let timestamp = data
            .get("timestamp")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0);
        Some(PhaseState {
            phase,
            message_id,
            timestamp,
        })
    }

    async fn from_file(&self) -> Option<PhaseState> {
        let content = tokio::fs::read_to_string(&self.journal_path).await.ok()?;
        content
            .lines()
            .rev()
            .find_map(|line| serde_json::from_str(line.trim()).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    fn state(phase: Phase, message_id: &str) -> PhaseState {
        PhaseState {
            phase,
            message_id: message_id.to_string(),
            timestamp: 1_700_000_000,
        }
    }

    #[tokio::test]
    async fn backend_state_is_preferred() {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        let journal = StateJournal::new(
            Some(backend),
            "agent_manager:state",
            dir.path().join("journal.jsonl"),
        );

        journal.record(&state(Phase::Analyze, "m1")).await;
        journal.record(&state(Phase::Code, "m1")).await;

        let last = journal.last_known_state().await.unwrap();
        assert_eq!(last.phase, Phase::Code);
        assert_eq!(last.message_id, "m1");
    }

    #[tokio::test]
    async fn file_fallback_returns_last_valid_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("journal.jsonl");
        let journal = StateJournal::new(None, "agent_manager:state", path.clone());

        journal.record(&state(Phase::Analyze, "m1")).await;
        journal.record(&state(Phase::Review, "m1")).await;

        // Corrupt tail lines are skipped.
        let mut content = tokio::fs::read_to_string(&path).await.unwrap();
        content.push_str("{broken\n");
        tokio::fs::write(&path, content).await.unwrap();

        let last = journal.last_known_state().await.unwrap();
        assert_eq!(last.phase, Phase::Review);
    }

    #[tokio::test]
    async fn clear_removes_both_destinations() {
        let dir = tempfile::tempdir().unwrap();
        let backend: Arc<dyn KvBackend> = Arc::new(MemoryBackend::new());
        let journal = StateJournal::new(
            Some(backend),
            "agent_manager:state",
            dir.path().join("journal.jsonl"),
        );

        journal.record(&state(Phase::Architecture, "m2")).await;
        journal.clear().await;
        assert!(journal.last_known_state().await.is_none());
    }

    #[tokio::test]
    async fn empty_journal_yields_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let journal = StateJournal::new(None, "k", dir.path().join("missing.jsonl"));
        assert!(journal.last_known_state().await.is_none());
    }
}
