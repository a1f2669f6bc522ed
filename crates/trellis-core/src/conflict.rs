//! Conflict descriptors and resolution strategies.
//!
//! A conflict is detected when a mutation arrives with a stale
//! `knownVersion`. The descriptor snapshot taken at detection time is
//! both the payload surfaced to the client and the base state the
//! `merge` strategy diffs against.

use serde::{Deserialize, Serialize};

use crate::id::{ConflictId, TaskId, UserId};
use crate::task::Task;

/// Everything a client needs to drive conflict resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConflictDescriptor {
    /// Fresh identifier for this conflict; quoted back on resolve.
    pub conflict_id: ConflictId,
    /// The task in conflict.
    pub task_id: TaskId,
    /// Version the client believed it was editing.
    pub client_version: u64,
    /// Version the server actually holds.
    pub server_version: u64,
    /// Full current server state at detection time (the merge base).
    pub server_task: Task,
    /// Who produced the server's version.
    pub last_modified_by: UserId,
}

/// How the client wants a detected conflict settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionStrategy {
    /// Field-wise merge of both sides; client wins contested scalars,
    /// tags take the union, descriptions concatenate.
    Merge,
    /// Client will resend with the current version; the server only
    /// records the intent.
    TakeMine,
    /// Discard the client's changes and return server state.
    TakeTheirs,
}

impl ResolutionStrategy {
    /// Wire name, also used in activity descriptions.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Merge => "merge",
            Self::TakeMine => "take-mine",
            Self::TakeTheirs => "take-theirs",
        }
    }
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_wire_names() {
        assert_eq!(
            serde_json::to_string(&ResolutionStrategy::TakeTheirs).unwrap(),
            "\"take-theirs\""
        );
        let parsed: ResolutionStrategy = serde_json::from_str("\"take-mine\"").unwrap();
        assert_eq!(parsed, ResolutionStrategy::TakeMine);
    }
}
