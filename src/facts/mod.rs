//! Facts, the fact ledger, and grounding extraction
//!
//! Deliverables are only as good as the facts behind them. The grounding
//! engine turns raw work-context rows into typed facts with provenance and
//! writes them to an immutable per-project ledger, so every output can be
//! traced back to its inputs.

pub mod grounding;
pub mod ledger;

pub use grounding::GroundingEngine;
pub use ledger::{FactLedger, LedgerEntry};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One extracted fact with its provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    pub id: String,
    pub field: String,
    pub value: Value,
    pub provenance: Value,
}
