//! Room membership and broadcast delivery.
//!
//! Membership is a read-mostly map: joins and leaves take the write
//! lock briefly, broadcasts take the read lock and enqueue to every
//! member without ever blocking on one. A member whose queue is full
//! is expelled on the spot: dropped from every room and its session
//! removed from the registry, which lets its connection task run the
//! normal disconnect cleanup.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use tracing::{error, warn};

use trellis_core::SessionId;
use trellis_events::{BoardEvent, Fanout, OutboundBody, Room, server_frame};

use crate::session::{EnqueueOutcome, Outbound, SessionRegistry};

/// Maintains room → session membership and delivers fan-out frames.
#[derive(Debug)]
pub struct RoomRouter {
    registry: Arc<SessionRegistry>,
    rooms: RwLock<HashMap<Room, HashSet<SessionId>>>,
    joined: RwLock<HashMap<SessionId, HashSet<Room>>>,
}

impl RoomRouter {
    /// Build a router delivering through `registry`.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            rooms: RwLock::new(HashMap::new()),
            joined: RwLock::new(HashMap::new()),
        }
    }

    /// Add a session to a room. Idempotent.
    pub fn join(&self, session: SessionId, room: Room) {
        if let Ok(mut rooms) = self.rooms.write() {
            rooms.entry(room).or_default().insert(session);
        }
        if let Ok(mut joined) = self.joined.write() {
            joined.entry(session).or_default().insert(room);
        }
    }

    /// Remove a session from a room. Idempotent.
    pub fn leave(&self, session: SessionId, room: Room) {
        if let Ok(mut rooms) = self.rooms.write()
            && let Some(members) = rooms.get_mut(&room)
        {
            members.remove(&session);
            if members.is_empty() {
                rooms.remove(&room);
            }
        }
        if let Ok(mut joined) = self.joined.write()
            && let Some(set) = joined.get_mut(&session)
        {
            set.remove(&room);
        }
    }

    /// Current members of a room.
    #[must_use]
    pub fn members(&self, room: &Room) -> Vec<SessionId> {
        self.rooms
            .read()
            .ok()
            .and_then(|rooms| rooms.get(room).map(|m| m.iter().copied().collect()))
            .unwrap_or_default()
    }

    /// Atomically remove a session from every room.
    pub fn disconnect(&self, session: SessionId) {
        let rooms_of = self
            .joined
            .write()
            .ok()
            .and_then(|mut joined| joined.remove(&session));
        if let (Some(rooms_of), Ok(mut rooms)) = (rooms_of, self.rooms.write()) {
            for room in rooms_of {
                if let Some(members) = rooms.get_mut(&room) {
                    members.remove(&session);
                    if members.is_empty() {
                        rooms.remove(&room);
                    }
                }
            }
        }
    }

    /// Expel a slow consumer: out of every room, out of the registry.
    /// Dropping the registry handle closes the outbound queue, so the
    /// writer drains and the connection task cleans up.
    pub(crate) fn expel(&self, session: SessionId) {
        warn!(%session, "Expelling slow consumer");
        self.disconnect(session);
        let _ = self.registry.remove(session);
    }

    fn encode(event: &BoardEvent) -> Option<Arc<Vec<u8>>> {
        match server_frame(OutboundBody::Event(event.clone())).to_bytes() {
            Ok(bytes) => Some(Arc::new(bytes)),
            Err(e) => {
                error!(kind = event.event_type(), error = %e, "Failed to encode event frame");
                None
            },
        }
    }

    fn deliver(&self, targets: &[SessionId], bytes: &Arc<Vec<u8>>) {
        let mut slow = Vec::new();
        for session in targets {
            match self
                .registry
                .try_send(*session, Outbound::Frame(Arc::clone(bytes)))
            {
                EnqueueOutcome::Sent | EnqueueOutcome::Gone => {},
                EnqueueOutcome::Full => slow.push(*session),
            }
        }
        for session in slow {
            self.expel(session);
        }
    }
}

impl Fanout for RoomRouter {
    fn broadcast(&self, room: &Room, event: &BoardEvent, except: Option<SessionId>) {
        let Some(bytes) = Self::encode(event) else {
            return;
        };
        let targets: Vec<SessionId> = self
            .members(room)
            .into_iter()
            .filter(|s| Some(*s) != except)
            .collect();
        self.deliver(&targets, &bytes);
    }

    fn send_to_session(&self, session: SessionId, event: &BoardEvent) {
        let Some(bytes) = Self::encode(event) else {
            return;
        };
        self.deliver(&[session], &bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;
    use trellis_core::{Principal, Role, TaskId, UserId};
    use crate::session::SessionHandle;

    fn connect(
        registry: &SessionRegistry,
        depth: usize,
    ) -> (SessionId, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(depth);
        let handle = SessionHandle::new(
            SessionId::new(),
            Principal {
                user_id: UserId::new(),
                role: Role::Member,
            },
            tx,
        );
        let id = handle.session_id;
        registry.insert(handle);
        (id, rx)
    }

    fn typing_event() -> BoardEvent {
        BoardEvent::Typing {
            task_id: TaskId::new(),
            user_id: UserId::new(),
            is_typing: true,
        }
    }

    #[tokio::test]
    async fn broadcast_reaches_members_only() {
        let registry = Arc::new(SessionRegistry::new());
        let router = RoomRouter::new(Arc::clone(&registry));

        let (in_room, mut rx_in) = connect(&registry, 4);
        let (_outside, mut rx_out) = connect(&registry, 4);
        router.join(in_room, Room::Board);

        router.broadcast(&Room::Board, &typing_event(), None);

        assert!(rx_in.try_recv().is_ok());
        assert!(rx_out.try_recv().is_err());
    }

    #[tokio::test]
    async fn except_skips_the_originator() {
        let registry = Arc::new(SessionRegistry::new());
        let router = RoomRouter::new(Arc::clone(&registry));

        let (origin, mut rx_origin) = connect(&registry, 4);
        let (other, mut rx_other) = connect(&registry, 4);
        router.join(origin, Room::Board);
        router.join(other, Room::Board);

        router.broadcast(&Room::Board, &typing_event(), Some(origin));

        assert!(rx_origin.try_recv().is_err());
        assert!(rx_other.try_recv().is_ok());
    }

    #[tokio::test]
    async fn slow_consumer_is_expelled_without_blocking_others() {
        let registry = Arc::new(SessionRegistry::new());
        let router = RoomRouter::new(Arc::clone(&registry));

        let (slow, _rx_slow) = connect(&registry, 1);
        let (healthy, mut rx_healthy) = connect(&registry, 8);
        router.join(slow, Room::Board);
        router.join(healthy, Room::Board);

        // Two broadcasts: the second overflows the slow queue.
        router.broadcast(&Room::Board, &typing_event(), None);
        router.broadcast(&Room::Board, &typing_event(), None);

        assert!(rx_healthy.try_recv().is_ok());
        assert!(rx_healthy.try_recv().is_ok());
        assert!(registry.principal(slow).is_none(), "slow session removed");
        assert!(!router.members(&Room::Board).contains(&slow));
    }

    #[tokio::test]
    async fn disconnect_clears_every_room() {
        let registry = Arc::new(SessionRegistry::new());
        let router = RoomRouter::new(Arc::clone(&registry));

        let (session, _rx) = connect(&registry, 4);
        let task_room = Room::Task(TaskId::new());
        router.join(session, Room::Board);
        router.join(session, task_room);
        router.join(session, Room::Activity);

        router.disconnect(session);

        assert!(router.members(&Room::Board).is_empty());
        assert!(router.members(&task_room).is_empty());
        assert!(router.members(&Room::Activity).is_empty());
    }

    #[tokio::test]
    async fn join_is_eventually_visible_to_broadcasts() {
        let registry = Arc::new(SessionRegistry::new());
        let router = RoomRouter::new(Arc::clone(&registry));
        let (session, mut rx) = connect(&registry, 4);

        router.broadcast(&Room::Board, &typing_event(), None);
        router.join(session, Room::Board);
        router.broadcast(&Room::Board, &typing_event(), None);

        // Only the post-join frame arrives.
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }
}
