//! Token-scoped TTL locks
//!
//! The stored value is a token minted by the acquirer. Release is a
//! compare-and-delete against that token, so a lock that expired and was
//! reacquired by another holder is never released by the stale one.

use std::time::Duration;
use uuid::Uuid;

use crate::backend::{BackendResult, KvBackend};

/// Proof of lock ownership; required to release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken(String);

impl LockToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Acquire/release interface over the backend's atomic primitives.
#[derive(Clone)]
pub struct LockManager {
    backend: std::sync::Arc<dyn KvBackend>,
}

impl LockManager {
    pub fn new(backend: std::sync::Arc<dyn KvBackend>) -> Self {
        Self { backend }
    }

    /// Try to take the lock. Non-blocking: `None` means another holder has it.
    pub async fn acquire(&self, key: &str, ttl: Duration) -> BackendResult<Option<LockToken>> {
        let token = Uuid::new_v4().to_string();
        if self.backend.set_if_absent(key, &token, ttl).await? {
            Ok(Some(LockToken(token)))
        } else {
            Ok(None)
        }
    }

    /// Release the lock if still held under `token`. Returns false when the
    /// lock expired or belongs to someone else.
    pub async fn release(&self, key: &str, token: &LockToken) -> BackendResult<bool> {
        self.backend.delete_if_equals(key, &token.0).await
    }
}

/// Lock key guarding dispatch of one backlog item.
pub fn dispatch_lock_key(project_id: &str, item_id: &str) -> String {
    format!("lock:project:{project_id}:item:{item_id}:dispatch")
}

/// Lock key serializing work on one backlog item.
pub fn backlog_lock_key(item_id: &str) -> String {
    format!("lock:backlog:{item_id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use std::sync::Arc;

    #[tokio::test]
    async fn lock_excludes_second_acquirer_until_release() {
        let locks = LockManager::new(Arc::new(MemoryBackend::new()));
        let ttl = Duration::from_secs(30);

        let token = locks.acquire("lock:test", ttl).await.unwrap().unwrap();
        assert!(locks.acquire("lock:test", ttl).await.unwrap().is_none());

        assert!(locks.release("lock:test", &token).await.unwrap());
        assert!(locks.acquire("lock:test", ttl).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn stale_token_does_not_release() {
        let backend = Arc::new(MemoryBackend::new());
        let locks = LockManager::new(backend.clone());
        let ttl = Duration::from_millis(20);

        let stale = locks.acquire("lock:test", ttl).await.unwrap().unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;

        // Expired; a new holder takes over.
        let fresh = locks
            .acquire("lock:test", Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        assert!(!locks.release("lock:test", &stale).await.unwrap());
        assert!(locks.acquire("lock:test", ttl).await.unwrap().is_none());
        assert!(locks.release("lock:test", &fresh).await.unwrap());
    }

    #[tokio::test]
    async fn expiry_frees_the_lock() {
        let locks = LockManager::new(Arc::new(MemoryBackend::new()));
        let _token = locks
            .acquire("lock:test", Duration::from_millis(15))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(25)).await;
        assert!(locks
            .acquire("lock:test", Duration::from_secs(1))
            .await
            .unwrap()
            .is_some());
    }
}
