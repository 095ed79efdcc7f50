//! Backlog status transitions
//!
//! [`assert_transition`] is the only authority for status changes. Every
//! other mutation path goes through it so an illegal transition can never
//! leave an item in an unexpected state.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle states of a backlog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BacklogStatus {
    Created,
    Ready,
    Blocked,
    InProgress,
    Done,
    Failed,
}

impl BacklogStatus {
    /// States reachable from `self` in one legal transition.
    pub fn allowed(self) -> &'static [BacklogStatus] {
        use BacklogStatus::*;
        match self {
            Created => &[Ready, Blocked],
            Ready => &[InProgress, Blocked],
            Blocked => &[Ready],
            InProgress => &[Done, Failed, Blocked],
            Done => &[],
            Failed => &[],
        }
    }

    pub fn is_terminal(self) -> bool {
        self.allowed().is_empty()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BacklogStatus::Created => "CREATED",
            BacklogStatus::Ready => "READY",
            BacklogStatus::Blocked => "BLOCKED",
            BacklogStatus::InProgress => "IN_PROGRESS",
            BacklogStatus::Done => "DONE",
            BacklogStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for BacklogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BacklogStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(BacklogStatus::Created),
            "READY" => Ok(BacklogStatus::Ready),
            "BLOCKED" => Ok(BacklogStatus::Blocked),
            "IN_PROGRESS" => Ok(BacklogStatus::InProgress),
            "DONE" => Ok(BacklogStatus::Done),
            "FAILED" => Ok(BacklogStatus::Failed),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A status string outside the known set.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown backlog status {0:?}")]
pub struct UnknownStatus(pub String);

/// An adjacency-illegal transition, carrying the allowed set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalTransition {
    pub item_id: Option<String>,
    pub from: BacklogStatus,
    pub to: BacklogStatus,
    pub allowed: &'static [BacklogStatus],
}

impl fmt::Display for IllegalTransition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let allowed: Vec<&str> = self.allowed.iter().map(|s| s.as_str()).collect();
        match &self.item_id {
            Some(id) => write!(
                f,
                "illegal transition {} -> {} for item {id} (allowed: {})",
                self.from,
                self.to,
                allowed.join(", ")
            ),
            None => write!(
                f,
                "illegal transition {} -> {} (allowed: {})",
                self.from,
                self.to,
                allowed.join(", ")
            ),
        }
    }
}

impl std::error::Error for IllegalTransition {}

/// Whether `from -> to` is in the adjacency table.
pub fn is_allowed(from: BacklogStatus, to: BacklogStatus) -> bool {
    from.allowed().contains(&to)
}

/// Check a transition, failing with the allowed set on violation.
pub fn assert_transition(
    from: BacklogStatus,
    to: BacklogStatus,
    item_id: Option<&str>,
) -> Result<(), IllegalTransition> {
    if is_allowed(from, to) {
        return Ok(());
    }
    Err(IllegalTransition {
        item_id: item_id.map(str::to_string),
        from,
        to,
        allowed: from.allowed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use BacklogStatus::*;

    #[test]
    fn adjacency_table_is_exact() {
        let legal = [
            (Created, Ready),
            (Created, Blocked),
            (Ready, InProgress),
            (Ready, Blocked),
            (Blocked, Ready),
            (InProgress, Done),
            (InProgress, Failed),
            (InProgress, Blocked),
        ];
        let all = [Created, Ready, Blocked, InProgress, Done, Failed];
        for from in all {
            for to in all {
                let expected = legal.contains(&(from, to));
                assert_eq!(
                    is_allowed(from, to),
                    expected,
                    "{from} -> {to} should be {expected}"
                );
            }
        }
    }

    #[test]
    fn terminal_states_have_no_exits() {
        assert!(Done.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!InProgress.is_terminal());
    }

    #[test]
    fn illegal_transition_carries_allowed_set() {
        let err = assert_transition(Done, Ready, Some("item-1")).unwrap_err();
        assert_eq!(err.from, Done);
        assert_eq!(err.to, Ready);
        assert!(err.allowed.is_empty());
        assert_eq!(err.item_id.as_deref(), Some("item-1"));

        let err = assert_transition(Blocked, Done, None).unwrap_err();
        assert_eq!(err.allowed, &[Ready]);
        assert!(err.to_string().contains("READY"));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [Created, Ready, Blocked, InProgress, Done, Failed] {
            assert_eq!(status.as_str().parse::<BacklogStatus>().unwrap(), status);
            let json = serde_json::to_string(&status).unwrap();
            assert_eq!(json, format!("\"{}\"", status.as_str()));
        }
        assert!("SHIPPED".parse::<BacklogStatus>().is_err());
    }
}
