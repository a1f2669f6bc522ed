//! The injected broadcast seam.
//!
//! Services publish domain events through [`Fanout`] and never touch
//! sockets. The gateway's room router is the production implementation;
//! tests use [`RecordingFanout`].

use trellis_core::SessionId;

use crate::event::BoardEvent;
use crate::room::Room;

/// Delivers events to rooms and individual sessions.
///
/// Implementations must not block the caller on slow members: delivery
/// is an enqueue, and a member whose queue is full is dropped, not
/// waited on.
pub trait Fanout: Send + Sync {
    /// Deliver an event to every member of a room, optionally skipping
    /// one session (typically the originator of a transient signal).
    fn broadcast(&self, room: &Room, event: &BoardEvent, except: Option<SessionId>);

    /// Deliver an event to a single session, regardless of rooms.
    fn send_to_session(&self, session: SessionId, event: &BoardEvent);

    /// Publish an event to every room it targets (see
    /// [`BoardEvent::rooms`]), skipping none.
    fn publish(&self, event: &BoardEvent) {
        for room in event.rooms() {
            self.broadcast(&room, event, None);
        }
    }
}

/// Test double that remembers everything published through it.
#[derive(Debug, Default)]
pub struct RecordingFanout {
    broadcasts: std::sync::Mutex<Vec<(Room, BoardEvent)>>,
    direct: std::sync::Mutex<Vec<(SessionId, BoardEvent)>>,
}

impl RecordingFanout {
    /// Fresh, empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All `(room, event)` pairs broadcast so far.
    #[must_use]
    pub fn broadcasts(&self) -> Vec<(Room, BoardEvent)> {
        self.broadcasts
            .lock()
            .map(|g| g.clone())
            .unwrap_or_default()
    }

    /// All direct sends so far.
    #[must_use]
    pub fn direct(&self) -> Vec<(SessionId, BoardEvent)> {
        self.direct.lock().map(|g| g.clone()).unwrap_or_default()
    }

    /// Event kinds broadcast to a given room, in order.
    #[must_use]
    pub fn kinds_for(&self, room: &Room) -> Vec<&'static str> {
        self.broadcasts()
            .iter()
            .filter(|(r, _)| r == room)
            .map(|(_, e)| e.event_type())
            .collect()
    }
}

impl Fanout for RecordingFanout {
    fn broadcast(&self, room: &Room, event: &BoardEvent, _except: Option<SessionId>) {
        if let Ok(mut guard) = self.broadcasts.lock() {
            guard.push((*room, event.clone()));
        }
    }

    fn send_to_session(&self, session: SessionId, event: &BoardEvent) {
        if let Ok(mut guard) = self.direct.lock() {
            guard.push((session, event.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{Task, TaskInput, UserId};

    #[test]
    fn publish_hits_every_target_room() {
        let fanout = RecordingFanout::new();
        let task = Task::create(
            TaskInput {
                title: "fan out".to_string(),
                ..TaskInput::default()
            },
            UserId::new(),
            0,
        );
        let id = task.id;
        fanout.publish(&BoardEvent::TaskCreated { task });

        let rooms: Vec<Room> = fanout.broadcasts().iter().map(|(r, _)| *r).collect();
        assert_eq!(rooms, vec![Room::Board, Room::Task(id)]);
        assert_eq!(fanout.kinds_for(&Room::Board), vec!["task.created"]);
    }
}
