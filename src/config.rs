//! Runtime settings with environment-variable overrides
//!
//! Every recognized option can be overridden by the environment variable of
//! the same name in upper snake case (`stream_name` -> `STREAM_NAME`).
//! Defaults match a local single-node deployment.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Runtime configuration for every Overture service.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub redis_host: String,
    pub redis_port: u16,
    pub redis_db: i64,

    pub stream_name: String,
    pub dlq_stream: String,

    pub consumer_group: String,
    pub consumer_name: String,

    pub block_ms: u64,
    pub idle_reclaim_ms: u64,
    pub reclaim_count: usize,

    pub max_attempts: u32,
    pub dedupe_ttl_s: u64,

    pub log_level: String,
    pub key_prefix: String,

    pub schema_dir: String,
    pub trace_prefix: String,
    pub metrics_prefix: String,
    pub ledger_dir: String,
    pub journal_path: PathBuf,
    pub journal_hash_key: String,

    pub dispatch_lock_ttl_s: u64,
    pub backlog_lock_ttl_s: u64,

    pub analyze_timeout_s: u64,
    pub architecture_timeout_s: u64,
    pub code_timeout_s: u64,
    pub review_timeout_s: u64,
    pub review_max_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_host: "redis".to_string(),
            redis_port: 6379,
            redis_db: 0,
            stream_name: "audit:events".to_string(),
            dlq_stream: "audit:dlq".to_string(),
            consumer_group: "audit_stream_consumers".to_string(),
            consumer_name: "consumer-1".to_string(),
            block_ms: 2000,
            idle_reclaim_ms: 60_000,
            reclaim_count: 50,
            max_attempts: 5,
            dedupe_ttl_s: 86_400,
            log_level: "info".to_string(),
            key_prefix: "audit".to_string(),
            schema_dir: "schemas".to_string(),
            trace_prefix: "audit:trace".to_string(),
            metrics_prefix: "audit:metrics".to_string(),
            ledger_dir: "storage/audit_log".to_string(),
            journal_path: PathBuf::from(".overture_journal.jsonl"),
            journal_hash_key: "agent_manager:state".to_string(),
            dispatch_lock_ttl_s: 30,
            backlog_lock_ttl_s: 120,
            analyze_timeout_s: 300,
            architecture_timeout_s: 300,
            code_timeout_s: 600,
            review_timeout_s: 300,
            review_max_retries: 2,
        }
    }
}

impl Settings {
    /// Build settings from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            redis_host: env_or("REDIS_HOST", d.redis_host),
            redis_port: env_parse_or("REDIS_PORT", d.redis_port),
            redis_db: env_parse_or("REDIS_DB", d.redis_db),
            stream_name: env_or("STREAM_NAME", d.stream_name),
            dlq_stream: env_or("DLQ_STREAM", d.dlq_stream),
            consumer_group: env_or("CONSUMER_GROUP", d.consumer_group),
            consumer_name: env_or("CONSUMER_NAME", d.consumer_name),
            block_ms: env_parse_or("BLOCK_MS", d.block_ms),
            idle_reclaim_ms: env_parse_or("IDLE_RECLAIM_MS", d.idle_reclaim_ms),
            reclaim_count: env_parse_or("RECLAIM_COUNT", d.reclaim_count),
            max_attempts: env_parse_or("MAX_ATTEMPTS", d.max_attempts),
            dedupe_ttl_s: env_parse_or("DEDUPE_TTL_S", d.dedupe_ttl_s),
            log_level: env_or("LOG_LEVEL", d.log_level),
            key_prefix: env_or("KEY_PREFIX", d.key_prefix),
            schema_dir: env_or("SCHEMA_DIR", d.schema_dir),
            trace_prefix: env_or("TRACE_PREFIX", d.trace_prefix),
            metrics_prefix: env_or("METRICS_PREFIX", d.metrics_prefix),
            ledger_dir: env_or("LEDGER_DIR", d.ledger_dir),
            journal_path: PathBuf::from(env_or(
                "JOURNAL_PATH",
                d.journal_path.to_string_lossy().into_owned(),
            )),
            journal_hash_key: env_or("JOURNAL_HASH_KEY", d.journal_hash_key),
            dispatch_lock_ttl_s: env_parse_or("DISPATCH_LOCK_TTL_S", d.dispatch_lock_ttl_s),
            backlog_lock_ttl_s: env_parse_or("BACKLOG_LOCK_TTL_S", d.backlog_lock_ttl_s),
            analyze_timeout_s: env_parse_or("ANALYZE_TIMEOUT_S", d.analyze_timeout_s),
            architecture_timeout_s: env_parse_or("ARCHITECTURE_TIMEOUT_S", d.architecture_timeout_s),
            code_timeout_s: env_parse_or("CODE_TIMEOUT_S", d.code_timeout_s),
            review_timeout_s: env_parse_or("REVIEW_TIMEOUT_S", d.review_timeout_s),
            review_max_retries: env_parse_or("REVIEW_MAX_RETRIES", d.review_max_retries),
        }
    }

    /// Connection URL for the Redis backend.
    pub fn redis_url(&self) -> String {
        format!(
            "redis://{}:{}/{}",
            self.redis_host, self.redis_port, self.redis_db
        )
    }
}

fn env_or(name: &str, default: String) -> String {
    env::var(name).unwrap_or(default)
}

fn env_parse_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
