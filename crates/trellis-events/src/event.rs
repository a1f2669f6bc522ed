//! Domain events and their fan-out targeting.
//!
//! Every state-mutating operation emits one of these; the gateway
//! serializes them straight onto the wire as `{type, data}` frames.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use trellis_core::{
    ActivityRecord, Comment, ConflictId, ResolutionStrategy, Task, TaskId, TaskStatus, Timestamp,
    UserId,
};

use crate::room::Room;

/// One changed field of a `task.updated` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDelta {
    /// Wire name of the field.
    pub field: String,
    /// Value before the mutation.
    pub before: Value,
    /// Value after the mutation.
    pub after: Value,
}

/// A broadcast event, tagged with its wire kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum BoardEvent {
    /// A task was created.
    #[serde(rename = "task.created")]
    TaskCreated {
        /// The new task.
        task: Task,
    },

    /// Task fields changed.
    #[serde(rename = "task.updated")]
    TaskUpdated {
        /// State after the update.
        task: Task,
        /// Per-field before/after deltas.
        deltas: Vec<FieldDelta>,
    },

    /// A task changed column or position.
    #[serde(rename = "task.moved")]
    TaskMoved {
        /// State after the move.
        task: Task,
        /// Column the task left.
        #[serde(rename = "fromStatus")]
        from_status: TaskStatus,
        /// Position the task left.
        #[serde(rename = "fromPosition")]
        from_position: u32,
    },

    /// A task gained an assignee.
    #[serde(rename = "task.assigned")]
    TaskAssigned {
        /// State after the assignment.
        task: Task,
        /// The assignee.
        assignee: UserId,
    },

    /// A task lost its assignee.
    #[serde(rename = "task.unassigned")]
    TaskUnassigned {
        /// State after the unassignment.
        task: Task,
    },

    /// A task was soft-deleted.
    #[serde(rename = "task.archived")]
    TaskArchived {
        /// Final state of the archived task.
        task: Task,
    },

    /// A task was hard-deleted.
    #[serde(rename = "task.deleted")]
    TaskDeleted {
        /// The removed task.
        #[serde(rename = "taskId")]
        task_id: TaskId,
    },

    /// A comment was appended. Does not bump the task version.
    #[serde(rename = "task.commented")]
    TaskCommented {
        /// The task commented on.
        task: Task,
        /// The new comment.
        comment: Comment,
    },

    /// Someone opened an edit session on a task.
    #[serde(rename = "edit.started")]
    EditStarted {
        /// The task being edited.
        #[serde(rename = "taskId")]
        task_id: TaskId,
        /// Who is editing.
        editor: UserId,
        /// When the edit session began.
        #[serde(rename = "startedAt")]
        started_at: Timestamp,
    },

    /// An edit session ended (explicitly or by disconnect).
    #[serde(rename = "edit.ended")]
    EditEnded {
        /// The task no longer being edited.
        #[serde(rename = "taskId")]
        task_id: TaskId,
        /// Whose session ended.
        editor: UserId,
    },

    /// Informational: the task already has another editor. Sent only to
    /// the session that tried to start editing; never blocks anything.
    #[serde(rename = "edit.contended")]
    EditContended {
        /// The contested task.
        #[serde(rename = "taskId")]
        task_id: TaskId,
        /// Who was there first.
        #[serde(rename = "otherEditor")]
        other_editor: UserId,
    },

    /// Transient typing indicator.
    #[serde(rename = "typing")]
    Typing {
        /// The task the indicator belongs to.
        #[serde(rename = "taskId")]
        task_id: TaskId,
        /// Who is typing.
        #[serde(rename = "userId")]
        user_id: UserId,
        /// Whether typing started or stopped.
        #[serde(rename = "isTyping")]
        is_typing: bool,
    },

    /// Transient cursor position.
    #[serde(rename = "cursor")]
    Cursor {
        /// The task the cursor is in.
        #[serde(rename = "taskId")]
        task_id: TaskId,
        /// Whose cursor.
        #[serde(rename = "userId")]
        user_id: UserId,
        /// Opaque client-defined position.
        position: u32,
    },

    /// Presence changed: the distinct users currently connected.
    #[serde(rename = "users.updated")]
    UsersUpdated {
        /// Online user ids.
        users: Vec<UserId>,
    },

    /// A new activity record entered the feed.
    #[serde(rename = "activity.new")]
    ActivityNew {
        /// The record.
        record: ActivityRecord,
    },

    /// A stale write was rejected on this task.
    #[serde(rename = "conflict.detected")]
    ConflictDetected {
        /// The conflict handle and versions; the full server snapshot
        /// travels only in the error reply to the losing session.
        #[serde(rename = "taskId")]
        task_id: TaskId,
        /// The conflict id.
        #[serde(rename = "conflictId")]
        conflict_id: ConflictId,
        /// Version the losing client held.
        #[serde(rename = "clientVersion")]
        client_version: u64,
        /// Version the server holds.
        #[serde(rename = "serverVersion")]
        server_version: u64,
        /// Whose write lost.
        #[serde(rename = "detectedFor")]
        detected_for: UserId,
    },

    /// A conflict was settled.
    #[serde(rename = "conflict.resolved")]
    ConflictResolved {
        /// The task the conflict was on.
        #[serde(rename = "taskId")]
        task_id: TaskId,
        /// The settled conflict.
        #[serde(rename = "conflictId")]
        conflict_id: ConflictId,
        /// Chosen strategy.
        strategy: ResolutionStrategy,
        /// Server state after resolution, when the strategy changed it.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task: Option<Task>,
    },
}

impl BoardEvent {
    /// The wire kind of this event.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::TaskCreated { .. } => "task.created",
            Self::TaskUpdated { .. } => "task.updated",
            Self::TaskMoved { .. } => "task.moved",
            Self::TaskAssigned { .. } => "task.assigned",
            Self::TaskUnassigned { .. } => "task.unassigned",
            Self::TaskArchived { .. } => "task.archived",
            Self::TaskDeleted { .. } => "task.deleted",
            Self::TaskCommented { .. } => "task.commented",
            Self::EditStarted { .. } => "edit.started",
            Self::EditEnded { .. } => "edit.ended",
            Self::EditContended { .. } => "edit.contended",
            Self::Typing { .. } => "typing",
            Self::Cursor { .. } => "cursor",
            Self::UsersUpdated { .. } => "users.updated",
            Self::ActivityNew { .. } => "activity.new",
            Self::ConflictDetected { .. } => "conflict.detected",
            Self::ConflictResolved { .. } => "conflict.resolved",
        }
    }

    /// The rooms this event is delivered to.
    ///
    /// Task lifecycle events go to the board and the task's own room;
    /// assignments additionally notify the assignee's user room.
    /// Edit/typing/cursor/conflict traffic stays in the task room.
    /// `edit.contended` targets no room at all; it is sent directly
    /// to the contending session.
    #[must_use]
    pub fn rooms(&self) -> Vec<Room> {
        match self {
            Self::TaskCreated { task }
            | Self::TaskUpdated { task, .. }
            | Self::TaskMoved { task, .. }
            | Self::TaskUnassigned { task }
            | Self::TaskArchived { task }
            | Self::TaskCommented { task, .. } => vec![Room::Board, Room::Task(task.id)],
            Self::TaskAssigned { task, assignee } => {
                vec![Room::Board, Room::Task(task.id), Room::User(*assignee)]
            },
            Self::TaskDeleted { task_id } => vec![Room::Board, Room::Task(*task_id)],
            Self::EditStarted { task_id, .. }
            | Self::EditEnded { task_id, .. }
            | Self::Typing { task_id, .. }
            | Self::Cursor { task_id, .. }
            | Self::ConflictDetected { task_id, .. }
            | Self::ConflictResolved { task_id, .. } => vec![Room::Task(*task_id)],
            Self::EditContended { .. } => Vec::new(),
            Self::UsersUpdated { .. } => vec![Room::Board],
            Self::ActivityNew { .. } => vec![Room::Activity],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{TaskInput, UserId};

    fn task() -> Task {
        Task::create(
            TaskInput {
                title: "wire shape".to_string(),
                ..TaskInput::default()
            },
            UserId::new(),
            0,
        )
    }

    #[test]
    fn serializes_as_type_data() {
        let event = BoardEvent::TaskCreated { task: task() };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "task.created");
        assert_eq!(value["data"]["task"]["version"], 1);
    }

    #[test]
    fn event_type_matches_serde_tag() {
        let task = task();
        let event = BoardEvent::TaskDeleted { task_id: task.id };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], event.event_type());
    }

    #[test]
    fn task_events_target_board_and_task_room() {
        let t = task();
        let rooms = BoardEvent::TaskCreated { task: t.clone() }.rooms();
        assert_eq!(rooms, vec![Room::Board, Room::Task(t.id)]);
    }

    #[test]
    fn assignment_also_targets_assignee_room() {
        let t = task();
        let assignee = UserId::new();
        let rooms = BoardEvent::TaskAssigned {
            task: t.clone(),
            assignee,
        }
        .rooms();
        assert!(rooms.contains(&Room::User(assignee)));
    }

    #[test]
    fn contended_targets_no_room() {
        let rooms = BoardEvent::EditContended {
            task_id: TaskId::new(),
            other_editor: UserId::new(),
        }
        .rooms();
        assert!(rooms.is_empty());
    }

    #[test]
    fn round_trips_through_serde() {
        let event = BoardEvent::Typing {
            task_id: TaskId::new(),
            user_id: UserId::new(),
            is_typing: true,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: BoardEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, back);
    }
}
