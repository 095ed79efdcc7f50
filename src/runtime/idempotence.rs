//! Per-consumer-group duplicate suppression
//!
//! An event id is marked once per consumer group on first successful
//! handling. The mark carries a TTL so the key space stays bounded; the TTL
//! must exceed the worst-case pending-reclaim window, otherwise a reclaimed
//! duplicate could be applied twice.

use std::time::Duration;

use crate::backend::{BackendResult, KvBackend};

/// Key under which a handled event id is recorded for a group.
pub fn processed_key(group: &str, event_id: &str) -> String {
    format!("processed:{group}:{event_id}")
}

/// Mark `key` as seen. Returns true iff the key was newly set.
pub async fn mark_if_new(
    backend: &dyn KvBackend,
    key: &str,
    ttl: Duration,
) -> BackendResult<bool> {
    backend.set_if_absent(key, "1", ttl).await
}

/// Whether `key` has already been marked.
pub async fn is_processed(backend: &dyn KvBackend, key: &str) -> BackendResult<bool> {
    backend.key_exists(key).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;

    #[tokio::test]
    async fn first_mark_wins() {
        let backend = MemoryBackend::new();
        let key = processed_key("orchestrator", "evt-1");
        assert!(!is_processed(&backend, &key).await.unwrap());
        assert!(mark_if_new(&backend, &key, Duration::from_secs(60))
            .await
            .unwrap());
        assert!(is_processed(&backend, &key).await.unwrap());
        assert!(!mark_if_new(&backend, &key, Duration::from_secs(60))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn groups_do_not_share_marks() {
        let backend = MemoryBackend::new();
        let ttl = Duration::from_secs(60);
        assert!(
            mark_if_new(&backend, &processed_key("orchestrator", "evt-1"), ttl)
                .await
                .unwrap()
        );
        assert!(
            mark_if_new(&backend, &processed_key("dev_worker_workers", "evt-1"), ttl)
                .await
                .unwrap()
        );
    }
}
