//! The `{type, id?, data}` wire envelope and its typed bodies.
//!
//! Inbound frames parse into [`ClientCommand`]; outbound frames are
//! either a [`ServerMessage`] (replies, errors, close) or a
//! [`BoardEvent`] broadcast. Server-initiated frames omit `id`;
//! replies echo the request's correlation id.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use trellis_core::{
    ActivityRecord, BoardError, ConflictId, ResolutionStrategy, SessionId, Task, TaskFilter,
    TaskId, TaskInput, TaskPatch, TaskStatus, UserId,
};

use crate::event::BoardEvent;
use crate::room::RoomKind;

/// Frame parse failure.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Not valid JSON, or not a known frame shape.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// A correlation id plus a typed body.
///
/// On the wire the body's `type`/`data` fields sit next to `id` in one
/// object; the helpers below do the splitting so the typed enums stay
/// plain serde derives.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<T> {
    /// Client-chosen correlation id; echoed on the reply.
    pub id: Option<String>,
    /// The typed body.
    pub body: T,
}

impl<T: DeserializeOwned> Envelope<T> {
    /// Parse a frame from raw bytes.
    ///
    /// A missing `data` field is treated as an empty object so that
    /// argument-less commands need no payload.
    ///
    /// # Errors
    ///
    /// [`FrameError::Malformed`] on invalid JSON or an unknown kind.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, FrameError> {
        let mut value: Value = serde_json::from_slice(bytes)?;
        let id = value
            .get("id")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        if let Some(map) = value.as_object_mut() {
            map.remove("id");
            map.entry("data").or_insert_with(|| Value::Object(serde_json::Map::new()));
        }
        let body = serde_json::from_value(value)?;
        Ok(Self { id, body })
    }
}

impl<T: Serialize> Envelope<T> {
    /// Serialize to the wire object, merging `id` into the body's map.
    ///
    /// # Errors
    ///
    /// [`FrameError::Malformed`] if the body fails to serialize.
    pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
        let mut value = serde_json::to_value(&self.body)?;
        if let (Some(map), Some(id)) = (value.as_object_mut(), &self.id) {
            map.insert("id".to_string(), Value::String(id.clone()));
        }
        Ok(serde_json::to_vec(&value)?)
    }
}

/// Wrap a body without a correlation id (server-initiated frames).
pub fn server_frame<T>(body: T) -> Envelope<T> {
    Envelope { id: None, body }
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

/// Every message a client may send, tagged with its wire kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ClientCommand {
    /// Handshake: first frame on every connection.
    #[serde(rename = "hello", rename_all = "camelCase")]
    Hello {
        /// Bearer credential.
        token: String,
        /// Client-reported address, recorded on auth activities.
        #[serde(default)]
        ip: Option<String>,
        /// Client user agent.
        #[serde(default)]
        user_agent: Option<String>,
    },

    /// Subscribe to a task room or the activity feed.
    #[serde(rename = "room.join", rename_all = "camelCase")]
    RoomJoin {
        /// Which kind of room.
        room_kind: RoomKind,
        /// Room id for task/user rooms.
        #[serde(default)]
        id: Option<String>,
    },

    /// Leave a previously joined room.
    #[serde(rename = "room.leave", rename_all = "camelCase")]
    RoomLeave {
        /// Which kind of room.
        room_kind: RoomKind,
        /// Room id for task/user rooms.
        #[serde(default)]
        id: Option<String>,
    },

    /// Open an advisory edit session on a task.
    #[serde(rename = "edit.start", rename_all = "camelCase")]
    EditStart {
        /// The task.
        task_id: TaskId,
        /// Version the editor is looking at.
        known_version: u64,
    },

    /// Close an edit session.
    #[serde(rename = "edit.end", rename_all = "camelCase")]
    EditEnd {
        /// The task.
        task_id: TaskId,
    },

    /// Transient typing signal, relayed to the task room.
    #[serde(rename = "typing", rename_all = "camelCase")]
    Typing {
        /// The task.
        task_id: TaskId,
        /// Started or stopped.
        is_typing: bool,
    },

    /// Transient cursor position, relayed to the task room.
    #[serde(rename = "cursor", rename_all = "camelCase")]
    Cursor {
        /// The task.
        task_id: TaskId,
        /// Opaque client position.
        position: u32,
    },

    /// Settle a detected conflict.
    #[serde(rename = "conflict.resolve", rename_all = "camelCase")]
    ConflictResolve {
        /// The conflicted task.
        task_id: TaskId,
        /// The conflict to settle.
        conflict_id: ConflictId,
        /// How to settle it.
        strategy: ResolutionStrategy,
    },

    /// List non-archived tasks grouped by column.
    #[serde(rename = "task.list")]
    TaskList(TaskFilter),

    /// Fetch one live task.
    #[serde(rename = "task.get", rename_all = "camelCase")]
    TaskGet {
        /// The task.
        task_id: TaskId,
    },

    /// Create a task.
    #[serde(rename = "task.create")]
    TaskCreate(TaskInput),

    /// Update task fields under a version check.
    #[serde(rename = "task.update", rename_all = "camelCase")]
    TaskUpdate {
        /// The task.
        task_id: TaskId,
        /// The fields to change.
        patch: TaskPatch,
        /// Version the client read.
        known_version: u64,
    },

    /// Move a task to a column/position under a version check.
    #[serde(rename = "task.move", rename_all = "camelCase")]
    TaskMove {
        /// The task.
        task_id: TaskId,
        /// Target column.
        to_status: TaskStatus,
        /// Target position, clamped to the column length.
        to_position: u32,
        /// Version the client read.
        known_version: u64,
    },

    /// Assign or unassign a task under a version check.
    #[serde(rename = "task.assign", rename_all = "camelCase")]
    TaskAssign {
        /// The task.
        task_id: TaskId,
        /// The assignee, or `null` to unassign.
        #[serde(default)]
        assignee: Option<UserId>,
        /// Version the client read.
        known_version: u64,
    },

    /// Let the server pick the fairest assignee.
    #[serde(rename = "task.smartAssign", rename_all = "camelCase")]
    TaskSmartAssign {
        /// The task.
        task_id: TaskId,
        /// Version the client read.
        known_version: u64,
    },

    /// Append a comment. Never bumps the version.
    #[serde(rename = "task.comment", rename_all = "camelCase")]
    TaskComment {
        /// The task.
        task_id: TaskId,
        /// Comment body.
        text: String,
    },

    /// Soft-delete a task (creator or admin).
    #[serde(rename = "task.archive", rename_all = "camelCase")]
    TaskArchive {
        /// The task.
        task_id: TaskId,
    },

    /// Restore an archived task (creator or admin).
    #[serde(rename = "task.unarchive", rename_all = "camelCase")]
    TaskUnarchive {
        /// The task.
        task_id: TaskId,
    },

    /// Hard-delete a non-archived task (creator or admin).
    #[serde(rename = "task.delete", rename_all = "camelCase")]
    TaskDelete {
        /// The task.
        task_id: TaskId,
    },

    /// Read the rolling activity window.
    #[serde(rename = "activity.recent", rename_all = "camelCase")]
    ActivityRecent {
        /// Cap on returned records; defaults to the whole window.
        #[serde(default)]
        limit: Option<usize>,
    },

    /// Prune old low-severity activity records (admin).
    #[serde(rename = "activity.prune", rename_all = "camelCase")]
    ActivityPrune {
        /// Age threshold; defaults to the configured retention.
        #[serde(default)]
        older_than_days: Option<u32>,
    },

    /// Snapshot of who is online.
    #[serde(rename = "presence.list")]
    PresenceList {},
}

impl ClientCommand {
    /// The wire kind, for logging and reply construction.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::RoomJoin { .. } => "room.join",
            Self::RoomLeave { .. } => "room.leave",
            Self::EditStart { .. } => "edit.start",
            Self::EditEnd { .. } => "edit.end",
            Self::Typing { .. } => "typing",
            Self::Cursor { .. } => "cursor",
            Self::ConflictResolve { .. } => "conflict.resolve",
            Self::TaskList(_) => "task.list",
            Self::TaskGet { .. } => "task.get",
            Self::TaskCreate(_) => "task.create",
            Self::TaskUpdate { .. } => "task.update",
            Self::TaskMove { .. } => "task.move",
            Self::TaskAssign { .. } => "task.assign",
            Self::TaskSmartAssign { .. } => "task.smartAssign",
            Self::TaskComment { .. } => "task.comment",
            Self::TaskArchive { .. } => "task.archive",
            Self::TaskUnarchive { .. } => "task.unarchive",
            Self::TaskDelete { .. } => "task.delete",
            Self::ActivityRecent { .. } => "activity.recent",
            Self::ActivityPrune { .. } => "activity.prune",
            Self::PresenceList {} => "presence.list",
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Why the server is closing a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CloseReason {
    /// Handshake credential rejected.
    Unauthenticated,
    /// The session's outbound queue overflowed.
    SlowConsumer,
    /// Server shutdown in progress.
    ShuttingDown,
}

/// The three columns of `task.list.ok`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardColumns {
    /// Tasks in `todo`, by position.
    pub todo: Vec<Task>,
    /// Tasks in `in-progress`, by position.
    #[serde(rename = "in-progress")]
    pub in_progress: Vec<Task>,
    /// Tasks in `done`, by position.
    pub done: Vec<Task>,
}

/// Structured error payload, `{code, message, details?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Stable machine code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Conflict descriptor or field errors, when the code carries one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl From<&BoardError> for ErrorBody {
    fn from(err: &BoardError) -> Self {
        let details = match err {
            BoardError::Conflict(descriptor) => serde_json::to_value(descriptor).ok(),
            BoardError::Validation { errors } => serde_json::to_value(errors).ok(),
            _ => None,
        };
        Self {
            code: err.code().to_string(),
            message: err.to_string(),
            details,
        }
    }
}

/// Every server-initiated or reply frame that is not a broadcast event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ServerMessage {
    /// Handshake accepted.
    #[serde(rename = "hello.ok", rename_all = "camelCase")]
    HelloOk {
        /// The new session.
        session_id: SessionId,
        /// The authenticated user.
        user_id: UserId,
        /// Who else is online.
        users: Vec<UserId>,
    },

    /// Room joined.
    #[serde(rename = "room.join.ok")]
    RoomJoinOk {},
    /// Room left.
    #[serde(rename = "room.leave.ok")]
    RoomLeaveOk {},
    /// Edit session opened.
    #[serde(rename = "edit.start.ok")]
    EditStartOk {},
    /// Edit session closed.
    #[serde(rename = "edit.end.ok")]
    EditEndOk {},

    /// Reply to `task.list`.
    #[serde(rename = "task.list.ok")]
    TaskListOk(BoardColumns),
    /// Reply to `task.get`.
    #[serde(rename = "task.get.ok")]
    TaskGetOk {
        /// The task.
        task: Task,
    },
    /// Reply to `task.create`.
    #[serde(rename = "task.create.ok")]
    TaskCreateOk {
        /// The new task.
        task: Task,
    },
    /// Reply to `task.update`.
    #[serde(rename = "task.update.ok")]
    TaskUpdateOk {
        /// State after the update.
        task: Task,
    },
    /// Reply to `task.move`.
    #[serde(rename = "task.move.ok")]
    TaskMoveOk {
        /// State after the move.
        task: Task,
    },
    /// Reply to `task.assign`.
    #[serde(rename = "task.assign.ok")]
    TaskAssignOk {
        /// State after the (un)assignment.
        task: Task,
    },
    /// Reply to `task.smartAssign`.
    #[serde(rename = "task.smartAssign.ok")]
    TaskSmartAssignOk {
        /// State after the assignment.
        task: Task,
        /// Who Smart-Assign picked.
        assignee: UserId,
    },
    /// Reply to `task.comment`.
    #[serde(rename = "task.comment.ok")]
    TaskCommentOk {
        /// State after the comment (version unchanged).
        task: Task,
    },
    /// Reply to `task.archive`.
    #[serde(rename = "task.archive.ok")]
    TaskArchiveOk {
        /// Always true.
        archived: bool,
    },
    /// Reply to `task.unarchive`.
    #[serde(rename = "task.unarchive.ok")]
    TaskUnarchiveOk {
        /// State after restoration.
        task: Task,
    },
    /// Reply to `task.delete`.
    #[serde(rename = "task.delete.ok")]
    TaskDeleteOk {
        /// Always true.
        deleted: bool,
    },
    /// Reply to `conflict.resolve`.
    #[serde(rename = "conflict.resolve.ok")]
    ConflictResolveOk {
        /// Server state after resolution.
        task: Task,
    },
    /// Reply to `activity.recent`.
    #[serde(rename = "activity.recent.ok")]
    ActivityRecentOk {
        /// Newest first.
        records: Vec<ActivityRecord>,
    },
    /// Reply to `activity.prune`.
    #[serde(rename = "activity.prune.ok")]
    ActivityPruneOk {
        /// How many records were removed.
        removed: u64,
    },
    /// Reply to `presence.list`.
    #[serde(rename = "presence.list.ok")]
    PresenceListOk {
        /// Online user ids.
        users: Vec<UserId>,
    },

    /// Operation failed.
    #[serde(rename = "error")]
    Error(ErrorBody),

    /// The server is about to drop the connection.
    #[serde(rename = "close", rename_all = "camelCase")]
    Close {
        /// Why.
        reason: CloseReason,
    },
}

/// Union of everything the server writes, so the writer serializes one
/// shape. Untagged: each side already carries its own `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OutboundBody {
    /// A broadcast domain event.
    Event(BoardEvent),
    /// A reply, error or control frame.
    Message(ServerMessage),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_command_with_id() {
        let raw = br#"{"type":"task.comment","id":"req-1","data":{"taskId":"6b8f5f60-8c8e-4ee5-a9f5-0d6f7f6b2a11","text":"hi"}}"#;
        let envelope: Envelope<ClientCommand> = Envelope::from_slice(raw).unwrap();
        assert_eq!(envelope.id.as_deref(), Some("req-1"));
        assert!(matches!(
            envelope.body,
            ClientCommand::TaskComment { ref text, .. } if text == "hi"
        ));
    }

    #[test]
    fn missing_data_defaults_to_empty_object() {
        let raw = br#"{"type":"presence.list","id":"p"}"#;
        let envelope: Envelope<ClientCommand> = Envelope::from_slice(raw).unwrap();
        assert!(matches!(envelope.body, ClientCommand::PresenceList {}));

        let raw = br#"{"type":"task.list"}"#;
        let envelope: Envelope<ClientCommand> = Envelope::from_slice(raw).unwrap();
        assert!(matches!(envelope.body, ClientCommand::TaskList(_)));
    }

    #[test]
    fn unknown_kind_is_malformed() {
        let raw = br#"{"type":"task.explode","data":{}}"#;
        let err = Envelope::<ClientCommand>::from_slice(raw);
        assert!(err.is_err());
    }

    #[test]
    fn reply_carries_correlation_id() {
        let envelope = Envelope {
            id: Some("req-7".to_string()),
            body: ServerMessage::TaskDeleteOk { deleted: true },
        };
        let bytes = envelope.to_bytes().unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value["id"], "req-7");
        assert_eq!(value["type"], "task.delete.ok");
        assert_eq!(value["data"]["deleted"], true);
    }

    #[test]
    fn server_frames_omit_id() {
        let bytes = server_frame(ServerMessage::Close {
            reason: CloseReason::ShuttingDown,
        })
        .to_bytes()
        .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(value.get("id").is_none());
        assert_eq!(value["data"]["reason"], "shutting-down");
    }

    #[test]
    fn error_body_carries_validation_details() {
        let err = BoardError::validation("title", "must not be empty");
        let body = ErrorBody::from(&err);
        assert_eq!(body.code, "validation");
        assert!(body.details.is_some());
    }

    #[test]
    fn board_columns_wire_key() {
        let value = serde_json::to_value(BoardColumns::default()).unwrap();
        assert!(value.get("in-progress").is_some());
    }
}
