//! Phased execution with hard wall-clock bounds
//!
//! A phase runs in its own OS process so a timeout can terminate it before
//! any late side effect escapes; cooperative cancellation cannot interrupt
//! an in-flight write. The [`manager::AgentManager`] sequences the fixed
//! ANALYZE -> ARCHITECTURE -> CODE -> REVIEW pipeline over that runner.

pub mod manager;
pub mod runner;

pub use manager::AgentManager;
pub use runner::{run_with_timeout, PhaseCommand, PhaseOutcome};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// The fixed workflow phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Analyze,
    Architecture,
    Code,
    Review,
}

impl Phase {
    /// Execution order of the workflow.
    pub const ORDERED: [Phase; 4] = [
        Phase::Analyze,
        Phase::Architecture,
        Phase::Code,
        Phase::Review,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Analyze => "analyze",
            Phase::Architecture => "architecture",
            Phase::Code => "code",
            Phase::Review => "review",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Phase {
    type Err = UnknownPhase;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analyze" => Ok(Phase::Analyze),
            "architecture" => Ok(Phase::Architecture),
            "code" => Ok(Phase::Code),
            "review" => Ok(Phase::Review),
            other => Err(UnknownPhase(other.to_string())),
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown phase {0:?}")]
pub struct UnknownPhase(pub String);
