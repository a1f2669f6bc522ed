//! Inbound command dispatch.
//!
//! One function per connection read loop iteration: map the command to
//! a service call, enqueue the reply to the originating session, then
//! broadcast the derived events. The reply always goes first so the
//! originator sees its acknowledgement before the matching broadcast.

use std::str::FromStr;

use tracing::debug;

use trellis_core::{
    ActivityAction, ActivityRecord, BoardError, Principal, SessionId, TaskId, UserId,
};
use trellis_events::{
    BoardEvent, ClientCommand, Envelope, Fanout, Room, RoomKind, ServerMessage,
};

use crate::server::Gateway;

/// Handle one parsed inbound frame.
#[allow(clippy::too_many_lines)]
pub(crate) async fn handle(
    gw: &Gateway,
    session: SessionId,
    principal: Principal,
    envelope: Envelope<ClientCommand>,
) {
    let Envelope { id, body: command } = envelope;
    debug!(%session, kind = command.kind(), "Dispatching command");

    match command {
        ClientCommand::Hello { .. } => {
            gw.fail(
                session,
                id,
                principal,
                &BoardError::validation("type", "session is already authenticated"),
            );
        },

        ClientCommand::RoomJoin { room_kind, id: room_id } => {
            match resolve_room(room_kind, room_id.as_deref(), principal) {
                Ok(room) => {
                    gw.router.join(session, room);
                    gw.reply(session, id, ServerMessage::RoomJoinOk {});
                },
                Err(err) => gw.fail(session, id, principal, &err),
            }
        },

        ClientCommand::RoomLeave { room_kind, id: room_id } => {
            match resolve_room(room_kind, room_id.as_deref(), principal) {
                Ok(room) => {
                    gw.router.leave(session, room);
                    gw.reply(session, id, ServerMessage::RoomLeaveOk {});
                },
                Err(err) => gw.fail(session, id, principal, &err),
            }
        },

        ClientCommand::EditStart {
            task_id,
            known_version,
        } => match gw
            .service
            .edit_start(task_id, principal, session, known_version)
            .await
        {
            Ok(outcome) => {
                gw.reply(session, id, ServerMessage::EditStartOk {});
                gw.publish_all(&outcome.events);
                if let Some(contended) = outcome.direct {
                    gw.router.send_to_session(session, &contended);
                }
            },
            Err(err) => gw.fail(session, id, principal, &err),
        },

        ClientCommand::EditEnd { task_id } => {
            let outcome = gw.service.edit_end(task_id, principal);
            gw.reply(session, id, ServerMessage::EditEndOk {});
            gw.publish_all(&outcome.events);
        },

        // Transient signals are relayed to the task room as-is, minus
        // the originator.
        ClientCommand::Typing { task_id, is_typing } => {
            gw.router.broadcast(
                &Room::Task(task_id),
                &BoardEvent::Typing {
                    task_id,
                    user_id: principal.user_id,
                    is_typing,
                },
                Some(session),
            );
        },
        ClientCommand::Cursor { task_id, position } => {
            gw.router.broadcast(
                &Room::Task(task_id),
                &BoardEvent::Cursor {
                    task_id,
                    user_id: principal.user_id,
                    position,
                },
                Some(session),
            );
        },

        ClientCommand::ConflictResolve {
            task_id,
            conflict_id,
            strategy,
        } => match gw
            .service
            .resolve_conflict(task_id, conflict_id, strategy, principal)
            .await
        {
            Ok(mutation) => {
                gw.reply(
                    session,
                    id,
                    ServerMessage::ConflictResolveOk {
                        task: mutation.task.clone(),
                    },
                );
                gw.publish_all(&mutation.events);
            },
            Err(err) => gw.fail(session, id, principal, &err),
        },

        ClientCommand::TaskList(filter) => match gw.service.list_tasks(filter).await {
            Ok(columns) => gw.reply(session, id, ServerMessage::TaskListOk(columns)),
            Err(err) => gw.fail(session, id, principal, &err),
        },

        ClientCommand::TaskGet { task_id } => match gw.service.get_task(task_id).await {
            Ok(task) => gw.reply(session, id, ServerMessage::TaskGetOk { task }),
            Err(err) => gw.fail(session, id, principal, &err),
        },

        ClientCommand::TaskCreate(input) => {
            match gw.service.create_task(input, principal).await {
                Ok(mutation) => {
                    gw.reply(
                        session,
                        id,
                        ServerMessage::TaskCreateOk {
                            task: mutation.task.clone(),
                        },
                    );
                    gw.publish_all(&mutation.events);
                },
                Err(err) => gw.fail(session, id, principal, &err),
            }
        },

        ClientCommand::TaskUpdate {
            task_id,
            patch,
            known_version,
        } => {
            match gw
                .service
                .update_task(task_id, patch, principal, Some(known_version))
                .await
            {
                Ok(mutation) => {
                    gw.reply(
                        session,
                        id,
                        ServerMessage::TaskUpdateOk {
                            task: mutation.task.clone(),
                        },
                    );
                    gw.publish_all(&mutation.events);
                },
                Err(err) => gw.fail(session, id, principal, &err),
            }
        },

        ClientCommand::TaskMove {
            task_id,
            to_status,
            to_position,
            known_version,
        } => {
            match gw
                .service
                .move_task(task_id, to_status, to_position, principal, Some(known_version))
                .await
            {
                Ok(mutation) => {
                    gw.reply(
                        session,
                        id,
                        ServerMessage::TaskMoveOk {
                            task: mutation.task.clone(),
                        },
                    );
                    gw.publish_all(&mutation.events);
                },
                Err(err) => gw.fail(session, id, principal, &err),
            }
        },

        ClientCommand::TaskAssign {
            task_id,
            assignee,
            known_version,
        } => {
            match gw
                .service
                .assign_task(task_id, assignee, principal, Some(known_version))
                .await
            {
                Ok(mutation) => {
                    gw.reply(
                        session,
                        id,
                        ServerMessage::TaskAssignOk {
                            task: mutation.task.clone(),
                        },
                    );
                    gw.publish_all(&mutation.events);
                },
                Err(err) => gw.fail(session, id, principal, &err),
            }
        },

        ClientCommand::TaskSmartAssign {
            task_id,
            known_version,
        } => {
            match gw
                .service
                .smart_assign_task(task_id, principal, Some(known_version))
                .await
            {
                Ok((mutation, assignee)) => {
                    gw.reply(
                        session,
                        id,
                        ServerMessage::TaskSmartAssignOk {
                            task: mutation.task.clone(),
                            assignee,
                        },
                    );
                    gw.publish_all(&mutation.events);
                },
                Err(err) => gw.fail(session, id, principal, &err),
            }
        },

        ClientCommand::TaskComment { task_id, text } => {
            match gw.service.add_comment(task_id, text, principal).await {
                Ok(mutation) => {
                    gw.reply(
                        session,
                        id,
                        ServerMessage::TaskCommentOk {
                            task: mutation.task.clone(),
                        },
                    );
                    gw.publish_all(&mutation.events);
                },
                Err(err) => gw.fail(session, id, principal, &err),
            }
        },

        ClientCommand::TaskArchive { task_id } => {
            match gw.service.archive_task(task_id, principal).await {
                Ok(mutation) => {
                    gw.reply(session, id, ServerMessage::TaskArchiveOk { archived: true });
                    gw.publish_all(&mutation.events);
                },
                Err(err) => gw.fail(session, id, principal, &err),
            }
        },

        ClientCommand::TaskUnarchive { task_id } => {
            match gw.service.unarchive_task(task_id, principal).await {
                Ok(mutation) => {
                    gw.reply(
                        session,
                        id,
                        ServerMessage::TaskUnarchiveOk {
                            task: mutation.task.clone(),
                        },
                    );
                    gw.publish_all(&mutation.events);
                },
                Err(err) => gw.fail(session, id, principal, &err),
            }
        },

        ClientCommand::TaskDelete { task_id } => {
            match gw.service.delete_task(task_id, principal).await {
                Ok(removal) => {
                    gw.reply(session, id, ServerMessage::TaskDeleteOk { deleted: true });
                    gw.publish_all(&removal.events);
                },
                Err(err) => gw.fail(session, id, principal, &err),
            }
        },

        ClientCommand::ActivityRecent { limit } => {
            let records = gw.recorder.recent(limit);
            gw.reply(session, id, ServerMessage::ActivityRecentOk { records });
        },

        ClientCommand::ActivityPrune { older_than_days } => {
            if !principal.is_admin() {
                gw.fail(
                    session,
                    id,
                    principal,
                    &BoardError::Forbidden {
                        reason: "pruning requires the admin role".to_string(),
                    },
                );
                return;
            }
            let days = older_than_days.unwrap_or(gw.config.activity_retention_days);
            match gw.recorder.prune(days).await {
                Ok(removed) => {
                    gw.recorder.record(ActivityRecord::new(
                        ActivityAction::ActivityPruned { removed },
                        principal.user_id,
                    ));
                    gw.reply(session, id, ServerMessage::ActivityPruneOk { removed });
                },
                Err(e) => {
                    gw.fail(
                        session,
                        id,
                        principal,
                        &BoardError::Internal(e.to_string()),
                    );
                },
            }
        },

        ClientCommand::PresenceList {} => {
            gw.reply(
                session,
                id,
                ServerMessage::PresenceListOk {
                    users: gw.registry.online_users(),
                },
            );
        },
    }
}

/// Map a `room.join`/`room.leave` argument pair onto a room.
///
/// Sessions may only address their own user room; the board and user
/// rooms are joined automatically at handshake anyway.
fn resolve_room(
    kind: RoomKind,
    id: Option<&str>,
    principal: Principal,
) -> Result<Room, BoardError> {
    match kind {
        RoomKind::Board => Ok(Room::Board),
        RoomKind::Activity => Ok(Room::Activity),
        RoomKind::Task => {
            let raw = id.ok_or_else(|| BoardError::validation("id", "task room needs an id"))?;
            let task_id = TaskId::from_str(raw)
                .map_err(|_| BoardError::validation("id", "not a valid task id"))?;
            Ok(Room::Task(task_id))
        },
        RoomKind::User => {
            let raw = id.ok_or_else(|| BoardError::validation("id", "user room needs an id"))?;
            let user_id = UserId::from_str(raw)
                .map_err(|_| BoardError::validation("id", "not a valid user id"))?;
            if user_id != principal.user_id {
                return Err(BoardError::Forbidden {
                    reason: "cannot subscribe to another user's room".to_string(),
                });
            }
            Ok(Room::User(user_id))
        },
    }
}
