//! Domain-level failure taxonomy
//!
//! Distinct from transport errors: these categories travel inside
//! `WORK.ITEM_FAILED` payloads and drive the recovery path (clarification
//! loop vs. terminal failure).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureCategory {
    /// Upstream dependency timed out or errored
    ToolFailure,
    /// Required input missing; recoverable via clarification
    DataInsufficiency,
    /// The evaluator refused the output
    ReasoningContradiction,
}

/// A typed failure carried in `WORK.ITEM_FAILED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub category: FailureCategory,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl Failure {
    pub fn new(category: FailureCategory, reason: impl Into<String>) -> Self {
        Self {
            category,
            reason: reason.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Event-payload form.
    pub fn to_payload(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Null)
    }
}

/// Required input fields are missing from the work context.
#[derive(Debug, Clone)]
pub struct MissingDataError {
    pub fields: Vec<String>,
}

impl std::fmt::Display for MissingDataError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "missing critical fields: {}", self.fields.join(","))
    }
}

impl std::error::Error for MissingDataError {}

impl MissingDataError {
    pub fn new(fields: Vec<String>) -> Self {
        Self { fields }
    }

    pub fn failure(&self) -> Failure {
        Failure::new(FailureCategory::DataInsufficiency, self.to_string())
    }
}

/// The outcome evaluator found an unverifiable or contradictory output.
#[derive(Error, Debug, Clone)]
#[error("{message}")]
pub struct ContradictionError {
    pub message: String,
}

impl ContradictionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn failure(&self) -> Failure {
        Failure::new(FailureCategory::ReasoningContradiction, &self.message)
    }
}
