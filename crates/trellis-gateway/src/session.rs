//! Live sessions and their bounded outbound queues.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use trellis_core::{Principal, SessionId, Timestamp, UserId};
use trellis_events::{CloseReason, ServerMessage, server_frame, write_frame};

/// One item on a session's outbound queue.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A pre-serialized frame, shared across all recipients of a
    /// broadcast.
    Frame(Arc<Vec<u8>>),
    /// Tell the client why the connection is about to drop, then stop
    /// the writer.
    Close(CloseReason),
}

/// What became of an enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Queued.
    Sent,
    /// The queue is full: the session is a slow consumer.
    Full,
    /// The session is already gone.
    Gone,
}

/// Handle to one live session.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// The session id.
    pub session_id: SessionId,
    /// The authenticated principal.
    pub principal: Principal,
    /// Connection instant.
    pub connected_at: Timestamp,
    sender: mpsc::Sender<Outbound>,
}

impl SessionHandle {
    /// Build a handle around the session's outbound sender.
    #[must_use]
    pub fn new(session_id: SessionId, principal: Principal, sender: mpsc::Sender<Outbound>) -> Self {
        Self {
            session_id,
            principal,
            connected_at: Timestamp::now(),
            sender,
        }
    }

    /// The user behind this session.
    #[must_use]
    pub fn user_id(&self) -> UserId {
        self.principal.user_id
    }

    /// Non-blocking enqueue.
    #[must_use]
    pub fn try_enqueue(&self, item: Outbound) -> EnqueueOutcome {
        match self.sender.try_send(item) {
            Ok(()) => EnqueueOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => EnqueueOutcome::Full,
            Err(mpsc::error::TrySendError::Closed(_)) => EnqueueOutcome::Gone,
        }
    }
}

/// Process-wide map of live sessions.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<SessionId, SessionHandle>>,
}

impl SessionRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a freshly authenticated session.
    pub fn insert(&self, handle: SessionHandle) {
        if let Ok(mut sessions) = self.sessions.write() {
            sessions.insert(handle.session_id, handle);
        }
    }

    /// Remove a session, dropping its outbound sender. The writer
    /// drains whatever is queued, then stops.
    pub fn remove(&self, session: SessionId) -> Option<SessionHandle> {
        self.sessions.write().ok()?.remove(&session)
    }

    /// Enqueue to one session.
    #[must_use]
    pub fn try_send(&self, session: SessionId, item: Outbound) -> EnqueueOutcome {
        let Ok(sessions) = self.sessions.read() else {
            return EnqueueOutcome::Gone;
        };
        match sessions.get(&session) {
            Some(handle) => handle.try_enqueue(item),
            None => EnqueueOutcome::Gone,
        }
    }

    /// The principal of a session, if it is still live.
    #[must_use]
    pub fn principal(&self, session: SessionId) -> Option<Principal> {
        self.sessions
            .read()
            .ok()?
            .get(&session)
            .map(|h| h.principal)
    }

    /// Distinct users currently online.
    #[must_use]
    pub fn online_users(&self) -> Vec<UserId> {
        let Ok(sessions) = self.sessions.read() else {
            return Vec::new();
        };
        let mut users: Vec<UserId> = sessions.values().map(SessionHandle::user_id).collect();
        users.sort_unstable();
        users.dedup();
        users
    }

    /// Number of live sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    /// Whether nobody is connected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue a close to every session (server shutdown).
    pub fn close_all(&self, reason: CloseReason) {
        let Ok(sessions) = self.sessions.read() else {
            return;
        };
        for handle in sessions.values() {
            let _ = handle.try_enqueue(Outbound::Close(reason));
        }
    }
}

/// The per-session writer: the only code that touches the socket's
/// write half. Consumes the bounded queue until it closes or the
/// socket dies.
pub async fn run_writer<W>(mut rx: mpsc::Receiver<Outbound>, mut writer: W, session: SessionId)
where
    W: AsyncWrite + Unpin,
{
    while let Some(item) = rx.recv().await {
        let bytes = match item {
            Outbound::Frame(bytes) => bytes,
            Outbound::Close(reason) => {
                let close = server_frame(ServerMessage::Close { reason });
                match close.to_bytes() {
                    Ok(bytes) => {
                        if let Err(e) = write_frame(&mut writer, &bytes).await {
                            debug!(%session, error = %e, "Close frame not delivered");
                        }
                        break;
                    },
                    Err(e) => {
                        warn!(%session, error = %e, "Failed to encode close frame");
                        break;
                    },
                }
            },
        };
        if let Err(e) = write_frame(&mut writer, &bytes).await {
            debug!(%session, error = %e, "Session writer stopping on socket error");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::Role;

    fn handle(depth: usize) -> (SessionHandle, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(depth);
        let principal = Principal {
            user_id: UserId::new(),
            role: Role::Member,
        };
        (SessionHandle::new(SessionId::new(), principal, tx), rx)
    }

    #[tokio::test]
    async fn enqueue_reports_full_when_queue_overflows() {
        let (handle, _rx) = handle(1);
        let frame = Outbound::Frame(Arc::new(vec![1, 2, 3]));
        assert_eq!(handle.try_enqueue(frame.clone()), EnqueueOutcome::Sent);
        assert_eq!(handle.try_enqueue(frame), EnqueueOutcome::Full);
    }

    #[tokio::test]
    async fn registry_tracks_distinct_online_users() {
        let registry = SessionRegistry::new();
        let (first, _rx1) = handle(4);
        let user = first.user_id();
        registry.insert(first);

        // Second session of the same user.
        let (tx, _rx2) = mpsc::channel(4);
        registry.insert(SessionHandle::new(
            SessionId::new(),
            Principal {
                user_id: user,
                role: Role::Member,
            },
            tx,
        ));

        let (third, _rx3) = handle(4);
        registry.insert(third);

        assert_eq!(registry.len(), 3);
        assert_eq!(registry.online_users().len(), 2);
    }

    #[tokio::test]
    async fn removing_a_session_closes_its_queue() {
        let registry = SessionRegistry::new();
        let (handle, mut rx) = handle(4);
        let id = handle.session_id;
        registry.insert(handle);

        assert_eq!(
            registry.try_send(id, Outbound::Frame(Arc::new(vec![0]))),
            EnqueueOutcome::Sent
        );
        registry.remove(id);

        // Queued frames drain, then the channel reports closed.
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
        assert_eq!(
            registry.try_send(id, Outbound::Frame(Arc::new(vec![0]))),
            EnqueueOutcome::Gone
        );
    }

    #[tokio::test]
    async fn writer_emits_close_frame_then_stops() {
        let (tx, rx) = mpsc::channel(4);
        let mut out = Vec::new();
        tx.send(Outbound::Close(CloseReason::ShuttingDown))
            .await
            .unwrap();
        drop(tx);
        run_writer(rx, &mut out, SessionId::new()).await;

        let mut cursor = std::io::Cursor::new(out);
        let frame = trellis_events::read_frame(&mut cursor).await.unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_slice(&frame).unwrap();
        assert_eq!(value["type"], "close");
        assert_eq!(value["data"]["reason"], "shutting-down");
    }
}
