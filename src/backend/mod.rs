//! Storage backend abstraction
//!
//! Every persistent structure in the system, from item documents and
//! secondary index sets to attempt hashes and the event streams themselves,
//! sits on the narrow [`KvBackend`] interface. Two
//! implementations are provided: [`redis::RedisBackend`] for production and
//! [`memory::MemoryBackend`] for tests. Stores and the stream runtime depend
//! only on the trait.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub use self::memory::MemoryBackend;
pub use self::redis::RedisBackend;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Backend error types.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connection to the backend failed or was lost
    #[error("connection error: {0}")]
    Connection(String),

    /// The backend rejected or failed the operation
    #[error("backend error: {0}")]
    Backend(String),

    /// Serialization/deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A referenced key or document does not exist
    #[error("not found: {0}")]
    NotFound(String),
}

impl BackendError {
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }

    pub fn not_found<E: std::fmt::Display>(what: E) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// One entry read from a stream: the server-assigned id plus its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamMessage {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamMessage {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Narrow interface over a key-value + set + hash + list + stream backend.
///
/// TTLs apply to whole keys. Stream reads follow consumer-group semantics:
/// delivered-but-unacknowledged entries stay pending per consumer and become
/// eligible for [`KvBackend::auto_claim`] once idle long enough.
#[async_trait]
pub trait KvBackend: Send + Sync {
    // ---- strings ----
    async fn get(&self, key: &str) -> BackendResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> BackendResult<()>;
    async fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> BackendResult<()>;
    /// Atomic set-if-absent with TTL. Returns true iff the key was set.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> BackendResult<bool>;
    async fn delete(&self, key: &str) -> BackendResult<()>;
    /// Atomic compare-and-delete. Returns true iff the stored value matched
    /// `expected` and the key was removed.
    async fn delete_if_equals(&self, key: &str, expected: &str) -> BackendResult<bool>;
    async fn key_exists(&self, key: &str) -> BackendResult<bool>;
    async fn expire(&self, key: &str, ttl: Duration) -> BackendResult<()>;

    // ---- hashes ----
    async fn hash_incr(&self, key: &str, field: &str, by: i64) -> BackendResult<i64>;
    async fn hash_set(&self, key: &str, entries: &[(&str, &str)]) -> BackendResult<()>;
    async fn hash_get_all(&self, key: &str) -> BackendResult<HashMap<String, String>>;

    // ---- sets ----
    async fn set_add(&self, key: &str, member: &str) -> BackendResult<()>;
    async fn set_remove(&self, key: &str, member: &str) -> BackendResult<()>;
    async fn set_members(&self, key: &str) -> BackendResult<Vec<String>>;

    // ---- lists ----
    async fn list_push(&self, key: &str, value: &str) -> BackendResult<()>;
    async fn list_range(&self, key: &str, start: isize, stop: isize) -> BackendResult<Vec<String>>;
    async fn list_set(&self, key: &str, index: isize, value: &str) -> BackendResult<()>;

    // ---- key scan ----
    async fn scan_keys(&self, pattern: &str) -> BackendResult<Vec<String>>;

    // ---- streams ----
    async fn stream_append(
        &self,
        stream: &str,
        fields: &[(&str, &str)],
    ) -> BackendResult<String>;
    /// Create the consumer group (and the stream, if missing) starting at
    /// `0-0`. Re-creating an existing group is not an error.
    async fn ensure_group(&self, stream: &str, group: &str) -> BackendResult<()>;
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        block: Duration,
        count: usize,
    ) -> BackendResult<Vec<StreamMessage>>;
    /// Reassign pending entries idle for at least `min_idle` to `consumer`.
    async fn auto_claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle: Duration,
        count: usize,
    ) -> BackendResult<Vec<StreamMessage>>;
    async fn ack(&self, stream: &str, group: &str, message_id: &str) -> BackendResult<()>;
    async fn pending_count(&self, stream: &str, group: &str) -> BackendResult<u64>;
    /// Oldest-first slice of the raw stream, at most `count` entries.
    async fn stream_range(&self, stream: &str, count: usize) -> BackendResult<Vec<StreamMessage>>;
    async fn stream_len(&self, stream: &str) -> BackendResult<u64>;
}
