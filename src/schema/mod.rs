//! JSON-schema registry for envelopes and event payloads
//!
//! Schemas are plain files under a base directory: one envelope schema,
//! reusable object schemas (resolvable by `$ref` through their `$id`), and
//! one payload schema per event type discovered via the custom
//! `x_event_type` field.

mod registry;

pub use registry::{SchemaRegistry, Validation};

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading or compiling schemas.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("unable to locate schema directory from {0:?}")]
    BaseDirNotFound(PathBuf),

    #[error("failed to read schema file {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse schema file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("schema {0:?} missing x_event_type")]
    MissingEventType(PathBuf),

    #[error("duplicate schema for event_type={0}")]
    DuplicateEventType(String),

    #[error("failed to compile schema {schema_id}: {reason}")]
    Compile { schema_id: String, reason: String },
}
