//! Reliable stream-processing runtime
//!
//! Shared by the orchestrator and every worker: consumer-group reads with
//! pending reclaim, envelope and payload validation, per-group idempotence,
//! bounded retry with attempt accounting, and dead-letter routing.

pub mod dlq;
pub mod idempotence;
pub mod locks;
pub mod processor;

pub use dlq::{DlqContext, DlqDocument, DlqReader, DlqWriter};
pub use idempotence::{is_processed, mark_if_new, processed_key};
pub use locks::{LockManager, LockToken};
pub use processor::{EventHandler, HandlerError, ProcessOutcome, StreamProcessor};

use serde::{Deserialize, Serialize};

/// Delivery bookkeeping for one `(consumer_group, message_id)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttemptMeta {
    pub attempts: u32,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
}
