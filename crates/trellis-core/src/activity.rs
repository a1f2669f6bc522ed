//! Activity records: the immutable trace of every state change.
//!
//! Each successful mutation and every auth event produces exactly one
//! record. Description text is generated from the per-action template
//! here and stored, so downstream consumers never need the table.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conflict::ResolutionStrategy;
use crate::id::{ActivityId, ConflictId, TaskId, Timestamp, UserId};
use crate::task::TaskStatus;

/// What kind of aggregate a record points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityCategory {
    /// Task mutations.
    Task,
    /// User lifecycle.
    User,
    /// Housekeeping (prune, startup).
    System,
    /// Auth events.
    Security,
}

/// How much an operator should care.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivitySeverity {
    /// Routine.
    Low,
    /// Notable.
    Medium,
    /// Needs attention.
    High,
    /// Incident.
    Critical,
}

/// The audited action, with the fields its description template needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActivityAction {
    /// A task was created.
    TaskCreated {
        /// Title of the new task.
        title: String,
    },
    /// Task fields were updated.
    TaskUpdated {
        /// Title after the update.
        title: String,
        /// Wire names of the changed fields.
        fields: Vec<String>,
    },
    /// A task changed column or position.
    TaskMoved {
        /// Title of the task.
        title: String,
        /// Source column.
        from: TaskStatus,
        /// Target column.
        to: TaskStatus,
        /// Landing position.
        position: u32,
    },
    /// A task was assigned.
    TaskAssigned {
        /// Title of the task.
        title: String,
        /// The assignee.
        assignee: UserId,
        /// Whether Smart-Assign picked the assignee.
        smart: bool,
    },
    /// A task's assignee was cleared.
    TaskUnassigned {
        /// Title of the task.
        title: String,
    },
    /// A comment was appended.
    TaskCommented {
        /// Title of the task.
        title: String,
    },
    /// A task was soft-deleted.
    TaskArchived {
        /// Title of the task.
        title: String,
    },
    /// An archived task was restored.
    TaskUnarchived {
        /// Title of the task.
        title: String,
    },
    /// A task was hard-deleted.
    TaskDeleted {
        /// Title of the task.
        title: String,
    },
    /// A stale write was rejected.
    ConflictDetected {
        /// Title of the task.
        title: String,
        /// Version the client held.
        client_version: u64,
        /// Version the server held.
        server_version: u64,
    },
    /// A conflict was settled.
    ConflictResolved {
        /// Title of the task.
        title: String,
        /// Chosen strategy.
        strategy: ResolutionStrategy,
    },
    /// A session authenticated.
    Login,
    /// A session ended.
    Logout,
    /// A user registered (recorded by the external user system).
    Registered,
    /// A credential changed (recorded by the external user system).
    PasswordChanged,
    /// Old low-severity records were pruned.
    ActivityPruned {
        /// How many records were removed.
        removed: u64,
    },
}

impl ActivityAction {
    /// Stable key of this action.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "task_created",
            Self::TaskUpdated { .. } => "task_updated",
            Self::TaskMoved { .. } => "task_moved",
            Self::TaskAssigned { .. } => "task_assigned",
            Self::TaskUnassigned { .. } => "task_unassigned",
            Self::TaskCommented { .. } => "task_commented",
            Self::TaskArchived { .. } => "task_archived",
            Self::TaskUnarchived { .. } => "task_unarchived",
            Self::TaskDeleted { .. } => "task_deleted",
            Self::ConflictDetected { .. } => "conflict_detected",
            Self::ConflictResolved { .. } => "conflict_resolved",
            Self::Login => "login",
            Self::Logout => "logout",
            Self::Registered => "registered",
            Self::PasswordChanged => "password_changed",
            Self::ActivityPruned { .. } => "activity_pruned",
        }
    }

    /// Render the description template for this action.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::TaskCreated { title } => format!("created task \"{title}\""),
            Self::TaskUpdated { title, fields } => {
                format!("updated {} on \"{title}\"", fields.join(", "))
            },
            Self::TaskMoved {
                title,
                from,
                to,
                position,
            } => format!("moved \"{title}\" from {from} to {to} at position {position}"),
            Self::TaskAssigned {
                title,
                assignee,
                smart: false,
            } => format!("assigned \"{title}\" to {assignee}"),
            Self::TaskAssigned {
                title,
                assignee,
                smart: true,
            } => format!("smart-assigned \"{title}\" to {assignee}"),
            Self::TaskUnassigned { title } => format!("unassigned \"{title}\""),
            Self::TaskCommented { title } => format!("commented on \"{title}\""),
            Self::TaskArchived { title } => format!("archived \"{title}\""),
            Self::TaskUnarchived { title } => format!("restored \"{title}\""),
            Self::TaskDeleted { title } => format!("deleted \"{title}\""),
            Self::ConflictDetected {
                title,
                client_version,
                server_version,
            } => format!(
                "edit conflict on \"{title}\": client version {client_version}, server version {server_version}"
            ),
            Self::ConflictResolved { title, strategy } => {
                format!("resolved conflict on \"{title}\" with {strategy}")
            },
            Self::Login => "logged in".to_string(),
            Self::Logout => "logged out".to_string(),
            Self::Registered => "registered".to_string(),
            Self::PasswordChanged => "changed password".to_string(),
            Self::ActivityPruned { removed } => {
                format!("pruned {removed} old activity records")
            },
        }
    }

    /// Default category for this action.
    #[must_use]
    pub fn category(&self) -> ActivityCategory {
        match self {
            Self::Login | Self::Logout | Self::PasswordChanged => ActivityCategory::Security,
            Self::Registered => ActivityCategory::User,
            Self::ActivityPruned { .. } => ActivityCategory::System,
            _ => ActivityCategory::Task,
        }
    }

    /// Default severity for this action.
    #[must_use]
    pub fn severity(&self) -> ActivitySeverity {
        match self {
            Self::TaskDeleted { .. }
            | Self::ConflictDetected { .. }
            | Self::PasswordChanged
            | Self::ActivityPruned { .. } => ActivitySeverity::Medium,
            _ => ActivitySeverity::Low,
        }
    }
}

/// One immutable entry in the activity log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    /// Unique record id.
    pub id: ActivityId,
    /// The audited action.
    pub action: ActivityAction,
    /// Who performed it.
    pub actor: UserId,
    /// The task acted on, when there is one.
    #[serde(default)]
    pub target: Option<TaskId>,
    /// Kind of the target ("task" today).
    #[serde(default)]
    pub target_kind: Option<String>,
    /// Rendered template text.
    pub description: String,
    /// Changed fields before the mutation.
    #[serde(default)]
    pub before: Option<Value>,
    /// Changed fields after the mutation.
    #[serde(default)]
    pub after: Option<Value>,
    /// Aggregate category.
    pub category: ActivityCategory,
    /// Operator severity.
    pub severity: ActivitySeverity,
    /// Conflict this record belongs to, for conflict activities.
    #[serde(default)]
    pub conflict_id: Option<ConflictId>,
    /// For conflict activities: whether the conflict has been settled.
    pub is_resolved: bool,
    /// Creation instant.
    pub created_at: Timestamp,
    /// Client address when the gateway knows it.
    #[serde(default)]
    pub ip: Option<String>,
    /// Client user agent when supplied at handshake.
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl ActivityRecord {
    /// Build a record from an action, rendering its template.
    #[must_use]
    pub fn new(action: ActivityAction, actor: UserId) -> Self {
        let description = action.description();
        let category = action.category();
        let severity = action.severity();
        let is_resolved = !matches!(action, ActivityAction::ConflictDetected { .. });
        Self {
            id: ActivityId::new(),
            action,
            actor,
            target: None,
            target_kind: None,
            description,
            before: None,
            after: None,
            category,
            severity,
            conflict_id: None,
            is_resolved,
            created_at: Timestamp::now(),
            ip: None,
            user_agent: None,
        }
    }

    /// Point the record at a task.
    #[must_use]
    pub fn with_target(mut self, task_id: TaskId) -> Self {
        self.target = Some(task_id);
        self.target_kind = Some("task".to_string());
        self
    }

    /// Attach before/after deltas.
    #[must_use]
    pub fn with_delta(mut self, before: Value, after: Value) -> Self {
        self.before = Some(before);
        self.after = Some(after);
        self
    }

    /// Link the record to a conflict.
    #[must_use]
    pub fn with_conflict(mut self, conflict_id: ConflictId) -> Self {
        self.conflict_id = Some(conflict_id);
        self
    }

    /// Attach client metadata from the session handshake.
    #[must_use]
    pub fn with_client(mut self, ip: Option<String>, user_agent: Option<String>) -> Self {
        self.ip = ip;
        self.user_agent = user_agent;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptions_come_from_templates() {
        let action = ActivityAction::TaskMoved {
            title: "Ship release".to_string(),
            from: TaskStatus::Todo,
            to: TaskStatus::Done,
            position: 0,
        };
        assert_eq!(
            action.description(),
            "moved \"Ship release\" from todo to done at position 0"
        );
    }

    #[test]
    fn conflict_detected_starts_unresolved() {
        let record = ActivityRecord::new(
            ActivityAction::ConflictDetected {
                title: "T".to_string(),
                client_version: 3,
                server_version: 4,
            },
            UserId::new(),
        );
        assert!(!record.is_resolved);
        assert_eq!(record.severity, ActivitySeverity::Medium);
        assert_eq!(record.category, ActivityCategory::Task);
    }

    #[test]
    fn auth_actions_are_security_category() {
        let record = ActivityRecord::new(ActivityAction::Login, UserId::new());
        assert_eq!(record.category, ActivityCategory::Security);
        assert!(record.is_resolved);
    }

    #[test]
    fn target_marks_kind() {
        let record = ActivityRecord::new(
            ActivityAction::TaskCreated {
                title: "x".to_string(),
            },
            UserId::new(),
        )
        .with_target(TaskId::new());
        assert_eq!(record.target_kind.as_deref(), Some("task"));
    }
}
