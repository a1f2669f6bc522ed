//! Room addressing.
//!
//! A room is a named set of subscribed sessions; it is the unit of
//! fan-out. Sessions join the board room and their own user room at
//! handshake; task rooms and the activity feed are joined on demand.

use serde::{Deserialize, Serialize};

use trellis_core::{TaskId, UserId};

/// Wire discriminator for `room.join` / `room.leave`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    /// The singleton board room.
    Board,
    /// A per-task room.
    Task,
    /// A per-user room.
    User,
    /// The activity feed.
    Activity,
}

/// A fan-out target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    /// Every connected session. Joined automatically at handshake.
    Board,
    /// Sessions watching one task.
    Task(TaskId),
    /// Sessions of one user. Joined automatically at handshake.
    User(UserId),
    /// Sessions subscribed to the activity feed.
    Activity,
}

impl Room {
    /// The wire kind of this room.
    #[must_use]
    pub fn kind(&self) -> RoomKind {
        match self {
            Self::Board => RoomKind::Board,
            Self::Task(_) => RoomKind::Task,
            Self::User(_) => RoomKind::User,
            Self::Activity => RoomKind::Activity,
        }
    }
}

impl std::fmt::Display for Room {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Board => f.write_str("board"),
            Self::Task(id) => write!(f, "task:{id}"),
            Self::User(id) => write!(f, "user:{id}"),
            Self::Activity => f.write_str("activity"),
        }
    }
}
