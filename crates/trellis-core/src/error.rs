//! Error taxonomy for board operations.
//!
//! Every failure a client can observe is a [`BoardError`]; the gateway
//! surfaces it on the wire as `{code, message}` plus a structured
//! payload for validation and conflict failures.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conflict::ConflictDescriptor;
use crate::id::{ConflictId, TaskId, UserId};

/// A single schema violation inside a `Validation` failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Wire name of the offending field.
    pub field: String,
    /// Human-readable reason.
    pub reason: String,
}

impl FieldError {
    /// Build a field error.
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.reason)
    }
}

/// Failures surfaced by the board core.
#[derive(Debug, Error)]
pub enum BoardError {
    /// Credential rejected at handshake.
    #[error("unauthenticated: {reason}")]
    Unauthenticated {
        /// Why the credential was rejected.
        reason: String,
    },

    /// Caller lacks the authorisation the operation demands.
    #[error("forbidden: {reason}")]
    Forbidden {
        /// What was missing.
        reason: String,
    },

    /// Schema violation; one entry per offending field.
    #[error("validation failed: {}", join_errors(.errors))]
    Validation {
        /// The violations.
        errors: Vec<FieldError>,
    },

    /// Target does not exist, or is archived where the operation
    /// demands a live task.
    #[error("task not found: {task_id}")]
    NotFound {
        /// The missing task.
        task_id: TaskId,
    },

    /// Another non-archived task already holds this title.
    #[error("duplicate title: {title}")]
    DuplicateTitle {
        /// The offending title.
        title: String,
    },

    /// The title equals a reserved column name.
    #[error("reserved title: {title}")]
    ReservedTitle {
        /// The offending title.
        title: String,
    },

    /// Assignee is unknown or inactive.
    #[error("invalid assignee: {user_id}")]
    InvalidAssignee {
        /// The rejected user.
        user_id: UserId,
    },

    /// Version mismatch; the descriptor carries the resolution handle.
    #[error("version conflict on task {}: client {} vs server {}", .0.task_id, .0.client_version, .0.server_version)]
    Conflict(Box<ConflictDescriptor>),

    /// `conflictId` does not match any detected conflict.
    #[error("unknown conflict: {conflict_id}")]
    UnknownConflict {
        /// The unmatched id.
        conflict_id: ConflictId,
    },

    /// Smart-Assign found no active user.
    #[error("no eligible user for assignment")]
    NoEligibleUser,

    /// Unexpected failure; details are logged server-side.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BoardError {
    /// Stable wire code for the `{code, message}` error frame.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthenticated { .. } => "unauthenticated",
            Self::Forbidden { .. } => "forbidden",
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::DuplicateTitle { .. } => "duplicate_title",
            Self::ReservedTitle { .. } => "reserved_title",
            Self::InvalidAssignee { .. } => "invalid_assignee",
            Self::Conflict(_) => "conflict",
            Self::UnknownConflict { .. } => "unknown_conflict",
            Self::NoEligibleUser => "no_eligible_user",
            Self::Internal(_) => "internal",
        }
    }

    /// Build a single-field validation failure.
    pub fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            errors: vec![FieldError::new(field, reason)],
        }
    }
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Result type for board operations.
pub type BoardResult<T> = Result<T, BoardError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            BoardError::DuplicateTitle {
                title: "x".to_string()
            }
            .code(),
            "duplicate_title"
        );
        assert_eq!(BoardError::NoEligibleUser.code(), "no_eligible_user");
        assert_eq!(
            BoardError::Internal("boom".to_string()).code(),
            "internal"
        );
    }

    #[test]
    fn validation_display_joins_fields() {
        let err = BoardError::Validation {
            errors: vec![
                FieldError::new("title", "must not be empty"),
                FieldError::new("tags", "at most 10 tags"),
            ],
        };
        let text = err.to_string();
        assert!(text.contains("title: must not be empty"));
        assert!(text.contains("tags: at most 10 tags"));
    }
}
