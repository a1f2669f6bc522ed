//! Connection acceptance, handshake and session lifecycle.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use trellis_activity::ActivityRecorder;
use trellis_board::TaskService;
use trellis_core::{
    ActivityAction, ActivityRecord, BoardError, CredentialVerifier, Principal, SessionId,
};
use trellis_events::{
    BoardEvent, ClientCommand, CloseReason, Envelope, ErrorBody, Fanout, OutboundBody, Room,
    ServerMessage, read_frame, server_frame, write_frame,
};

use crate::dispatch;
use crate::rooms::RoomRouter;
use crate::session::{EnqueueOutcome, Outbound, SessionHandle, SessionRegistry, run_writer};

/// Gateway tuning knobs, mirrored from the config file at startup.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Outbound frames a session may have queued before it is dropped
    /// as a slow consumer.
    pub outbound_queue_depth: usize,
    /// How long a fresh connection may take to present its hello.
    pub handshake_timeout: Duration,
    /// Default age threshold for `activity.prune`.
    pub activity_retention_days: u32,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            outbound_queue_depth: 64,
            handshake_timeout: Duration::from_secs(10),
            activity_retention_days: 90,
        }
    }
}

/// Terminates client connections and routes their traffic.
pub struct Gateway {
    pub(crate) service: Arc<TaskService>,
    pub(crate) recorder: Arc<ActivityRecorder>,
    pub(crate) verifier: Arc<dyn CredentialVerifier>,
    pub(crate) registry: Arc<SessionRegistry>,
    pub(crate) router: Arc<RoomRouter>,
    pub(crate) config: GatewayConfig,
}

impl Gateway {
    /// Wire the gateway to its collaborators.
    #[must_use]
    pub fn new(
        service: Arc<TaskService>,
        verifier: Arc<dyn CredentialVerifier>,
        registry: Arc<SessionRegistry>,
        router: Arc<RoomRouter>,
        config: GatewayConfig,
    ) -> Self {
        let recorder = service.recorder();
        Self {
            service,
            recorder,
            verifier,
            registry,
            router,
            config,
        }
    }

    /// Accept connections until shutdown is signalled, then close every
    /// session with `shutting-down`.
    pub async fn run(self: Arc<Self>, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "Gateway listening");
        }
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    info!("Gateway received shutdown signal");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let gateway = Arc::clone(&self);
                            let shutdown = shutdown.resubscribe();
                            tokio::spawn(async move {
                                gateway.handle_connection(stream, addr, shutdown).await;
                            });
                        },
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                        },
                    }
                }
            }
        }
        self.registry.close_all(CloseReason::ShuttingDown);
    }

    /// Enqueue a reply (or error) frame to one session. A full queue
    /// expels the session like any other slow consumer.
    pub(crate) fn reply(&self, session: SessionId, id: Option<String>, message: ServerMessage) {
        let envelope = Envelope {
            id,
            body: OutboundBody::Message(message),
        };
        match envelope.to_bytes() {
            Ok(bytes) => {
                if self.registry.try_send(session, Outbound::Frame(Arc::new(bytes)))
                    == EnqueueOutcome::Full
                {
                    self.router.expel(session);
                }
            },
            Err(e) => warn!(%session, error = %e, "Failed to encode reply frame"),
        }
    }

    /// Reply with a structured failure.
    pub(crate) fn fail(
        &self,
        session: SessionId,
        id: Option<String>,
        principal: Principal,
        err: &BoardError,
    ) {
        self.reply(session, id, ServerMessage::Error(ErrorBody::from(err)));

        // The losing session got the descriptor in its error reply;
        // watchers of the task room get the lightweight signal.
        if let BoardError::Conflict(descriptor) = err {
            self.router.publish(&BoardEvent::ConflictDetected {
                task_id: descriptor.task_id,
                conflict_id: descriptor.conflict_id,
                client_version: descriptor.client_version,
                server_version: descriptor.server_version,
                detected_for: principal.user_id,
            });
        }
    }

    /// Fan out a batch of derived events. Always called after the
    /// originating reply has been enqueued, preserving the ack-first
    /// ordering on the originator's FIFO.
    pub(crate) fn publish_all(&self, events: &[BoardEvent]) {
        for event in events {
            self.router.publish(event);
        }
    }

    async fn handle_connection(
        &self,
        stream: TcpStream,
        addr: SocketAddr,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        let (mut read_half, write_half) = stream.into_split();

        // Handshake: one hello frame within the timeout, then the
        // verifier. This await is the only thing that gates acceptance.
        let hello = match timeout(self.config.handshake_timeout, read_frame(&mut read_half)).await
        {
            Ok(Ok(Some(bytes))) => bytes,
            Ok(Ok(None)) | Ok(Err(_)) => return,
            Err(_) => {
                debug!(%addr, "Handshake timed out");
                return;
            },
        };
        let (hello_id, token, ip, user_agent) =
            match Envelope::<ClientCommand>::from_slice(&hello) {
                Ok(Envelope {
                    id,
                    body:
                        ClientCommand::Hello {
                            token,
                            ip,
                            user_agent,
                        },
                }) => (id, token, ip, user_agent),
                _ => {
                    refuse(
                        write_half,
                        &BoardError::Unauthenticated {
                            reason: "expected a hello frame".to_string(),
                        },
                    )
                    .await;
                    return;
                },
            };
        let principal = match self.verifier.verify(&token).await {
            Ok(principal) => principal,
            Err(err) => {
                debug!(%addr, error = %err, "Handshake rejected");
                refuse(write_half, &err).await;
                return;
            },
        };

        // Session setup: bounded queue, dedicated writer, automatic
        // board and user room membership.
        let session_id = SessionId::new();
        let (tx, rx) = mpsc::channel(self.config.outbound_queue_depth);
        let writer = tokio::spawn(run_writer(rx, write_half, session_id));
        self.registry
            .insert(SessionHandle::new(session_id, principal, tx));
        self.router.join(session_id, Room::Board);
        self.router.join(session_id, Room::User(principal.user_id));

        let users = self.registry.online_users();
        self.reply(
            session_id,
            hello_id,
            ServerMessage::HelloOk {
                session_id,
                user_id: principal.user_id,
                users: users.clone(),
            },
        );
        self.router
            .broadcast(&Room::Board, &BoardEvent::UsersUpdated { users }, None);
        self.recorder.record(
            ActivityRecord::new(ActivityAction::Login, principal.user_id)
                .with_client(ip.clone().or_else(|| Some(addr.ip().to_string())), user_agent.clone()),
        );
        info!(%session_id, user_id = %principal.user_id, %addr, "Session established");

        // Inbound loop. Each iteration also notices an expulsion done
        // by the broadcast path and stops reading for a dead session.
        loop {
            tokio::select! {
                biased;
                _ = shutdown.recv() => {
                    let _ = self
                        .registry
                        .try_send(session_id, Outbound::Close(CloseReason::ShuttingDown));
                    break;
                }
                frame = read_frame(&mut read_half) => {
                    match frame {
                        Ok(Some(bytes)) => {
                            match Envelope::<ClientCommand>::from_slice(&bytes) {
                                Ok(envelope) => {
                                    dispatch::handle(self, session_id, principal, envelope).await;
                                },
                                Err(e) => {
                                    self.reply(
                                        session_id,
                                        None,
                                        ServerMessage::Error(ErrorBody {
                                            code: "validation".to_string(),
                                            message: e.to_string(),
                                            details: None,
                                        }),
                                    );
                                },
                            }
                        },
                        Ok(None) => break,
                        Err(e) => {
                            debug!(%session_id, error = %e, "Inbound stream ended");
                            break;
                        },
                    }
                }
            }
            if self.registry.principal(session_id).is_none() {
                break;
            }
        }

        // Teardown: rooms, edit sessions, presence, activity, then
        // let the writer drain whatever is still queued.
        self.registry.remove(session_id);
        self.router.disconnect(session_id);
        for event in self.service.session_closed(session_id) {
            self.router.publish(&event);
        }
        self.router.broadcast(
            &Room::Board,
            &BoardEvent::UsersUpdated {
                users: self.registry.online_users(),
            },
            None,
        );
        self.recorder.record(
            ActivityRecord::new(ActivityAction::Logout, principal.user_id)
                .with_client(ip, user_agent),
        );
        info!(%session_id, "Session closed");
        let _ = writer.await;
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("sessions", &self.registry.len())
            .finish_non_exhaustive()
    }
}

/// Tell an unauthenticated peer why, then drop the socket.
async fn refuse(mut write_half: OwnedWriteHalf, err: &BoardError) {
    if let Ok(bytes) = server_frame(ServerMessage::Error(ErrorBody::from(err))).to_bytes() {
        let _ = write_frame(&mut write_half, &bytes).await;
    }
    if let Ok(bytes) = server_frame(ServerMessage::Close {
        reason: CloseReason::Unauthenticated,
    })
    .to_bytes()
    {
        let _ = write_frame(&mut write_half, &bytes).await;
    }
}
