//! Advisory edit sessions.
//!
//! An edit session marks a task as "being edited by X". It is a
//! proactive signal only: the mutation path never consults it, and a
//! contended start is answered with an informational event rather than
//! a rejection. First editor holds the marker until they end it or
//! their connection drops.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use trellis_core::{SessionId, TaskId, Timestamp, UserId};
use trellis_events::BoardEvent;

/// One live edit marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct EditSession {
    editor: UserId,
    session: SessionId,
    started_at: Timestamp,
}

/// What an edit signal produced.
#[derive(Debug, Default)]
pub struct EditOutcome {
    /// Events to broadcast to the task room.
    pub events: Vec<BoardEvent>,
    /// Informational event for the requesting session only.
    pub direct: Option<BoardEvent>,
}

/// Tracks the per-task edit markers.
#[derive(Debug, Default)]
pub struct EditSessions {
    inner: DashMap<TaskId, EditSession>,
}

impl EditSessions {
    /// Empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or refresh) an edit session on a task.
    ///
    /// If another user already holds the marker, the holder keeps it
    /// and the starter gets `edit.contended` directly.
    #[must_use]
    pub fn start(&self, task_id: TaskId, editor: UserId, session: SessionId) -> EditOutcome {
        let mut outcome = EditOutcome::default();
        match self.inner.entry(task_id) {
            Entry::Occupied(mut occupied) => {
                let current = *occupied.get();
                if current.editor == editor {
                    // Same user from a new session: refresh the marker.
                    occupied.insert(EditSession {
                        editor,
                        session,
                        started_at: current.started_at,
                    });
                } else {
                    outcome.direct = Some(BoardEvent::EditContended {
                        task_id,
                        other_editor: current.editor,
                    });
                }
            },
            Entry::Vacant(vacant) => {
                let started_at = Timestamp::now();
                vacant.insert(EditSession {
                    editor,
                    session,
                    started_at,
                });
                outcome.events.push(BoardEvent::EditStarted {
                    task_id,
                    editor,
                    started_at,
                });
            },
        }
        outcome
    }

    /// Close an edit session. Only the holder can clear the marker.
    #[must_use]
    pub fn end(&self, task_id: TaskId, editor: UserId) -> EditOutcome {
        let mut outcome = EditOutcome::default();
        let removed = self
            .inner
            .remove_if(&task_id, |_, held| held.editor == editor);
        if removed.is_some() {
            outcome.events.push(BoardEvent::EditEnded { task_id, editor });
        }
        outcome
    }

    /// Clear every marker held by a disconnecting session, returning
    /// one `edit.ended` per cleared task.
    #[must_use]
    pub fn clear_session(&self, session: SessionId) -> Vec<BoardEvent> {
        let held: Vec<(TaskId, UserId)> = self
            .inner
            .iter()
            .filter(|entry| entry.value().session == session)
            .map(|entry| (*entry.key(), entry.value().editor))
            .collect();

        held.into_iter()
            .filter_map(|(task_id, editor)| {
                self.inner
                    .remove_if(&task_id, |_, h| h.session == session)
                    .map(|_| BoardEvent::EditEnded { task_id, editor })
            })
            .collect()
    }

    /// Drop the marker of a deleted task, if any, returning the
    /// matching `edit.ended`.
    #[must_use]
    pub fn clear_task(&self, task_id: TaskId) -> Option<BoardEvent> {
        self.inner
            .remove(&task_id)
            .map(|(_, held)| BoardEvent::EditEnded {
                task_id,
                editor: held.editor,
            })
    }

    /// Current editor of a task, if any.
    #[must_use]
    pub fn editor_of(&self, task_id: TaskId) -> Option<UserId> {
        self.inner.get(&task_id).map(|held| held.editor)
    }
}
