//! The authoritative task service.
//!
//! Every mutation runs the same explicit sequence: take the per-task
//! lock, load current state, run the version check, validate, persist
//! with a bumped version, record the activity, and hand the derived
//! events back to the caller for fan-out. The caller (the gateway)
//! enqueues the reply to the originating session before broadcasting
//! the returned events, which keeps the acknowledgement ahead of the
//! broadcast on that session's FIFO.

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use trellis_activity::ActivityRecorder;
use trellis_core::{
    ActivityAction, ActivityRecord, BoardError, BoardResult, Comment, ConflictDescriptor,
    ConflictId, Limits, Principal, ResolutionStrategy, SessionId, Task, TaskFilter, TaskId,
    TaskInput, TaskPatch, TaskStatus, Timestamp, UserDirectory, UserId, dedup_tags, folded_title,
};
use trellis_events::{BoardColumns, BoardEvent, FieldDelta};
use trellis_storage::{StorageError, TaskStore};

use crate::assign::AssignmentEngine;
use crate::conflict::{ConflictRegistry, merge_patch};
use crate::edit::{EditOutcome, EditSessions};
use crate::locks::TaskLocks;

/// A successful mutation: the new task state plus the derived events.
#[derive(Debug, Clone)]
pub struct Mutation {
    /// State after the mutation.
    pub task: Task,
    /// Events to fan out, in emission order.
    pub events: Vec<BoardEvent>,
}

/// A successful hard delete.
#[derive(Debug, Clone)]
pub struct Removal {
    /// The removed task.
    pub task_id: TaskId,
    /// Events to fan out.
    pub events: Vec<BoardEvent>,
}

/// Authoritative CRUD for tasks plus the conflict controller and the
/// assignment engine.
pub struct TaskService {
    store: Arc<dyn TaskStore>,
    users: Arc<dyn UserDirectory>,
    recorder: Arc<ActivityRecorder>,
    assigner: AssignmentEngine,
    conflicts: ConflictRegistry,
    edits: EditSessions,
    locks: TaskLocks,
    limits: Limits,
}

impl TaskService {
    /// Wire the service to its collaborators.
    #[must_use]
    pub fn new(
        store: Arc<dyn TaskStore>,
        users: Arc<dyn UserDirectory>,
        recorder: Arc<ActivityRecorder>,
        limits: Limits,
    ) -> Self {
        let assigner = AssignmentEngine::new(Arc::clone(&users), Arc::clone(&store));
        Self {
            store,
            users,
            recorder,
            assigner,
            conflicts: ConflictRegistry::new(),
            edits: EditSessions::new(),
            locks: TaskLocks::new(),
            limits,
        }
    }

    /// The activity recorder, shared with the gateway for auth events.
    #[must_use]
    pub fn recorder(&self) -> Arc<ActivityRecorder> {
        Arc::clone(&self.recorder)
    }

    // -----------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------

    /// Non-archived tasks grouped by column, each column ordered by
    /// `(position asc, createdAt desc)`.
    ///
    /// # Errors
    ///
    /// `Internal` on a storage failure.
    pub async fn list_tasks(&self, filter: TaskFilter) -> BoardResult<BoardColumns> {
        let mut tasks = self.store.list(filter).await.map_err(storage_err)?;
        tasks.sort_by(|a, b| {
            a.position
                .cmp(&b.position)
                .then(b.created_at.cmp(&a.created_at))
        });

        let mut columns = BoardColumns::default();
        for task in tasks {
            match task.status {
                TaskStatus::Todo => columns.todo.push(task),
                TaskStatus::InProgress => columns.in_progress.push(task),
                TaskStatus::Done => columns.done.push(task),
            }
        }
        Ok(columns)
    }

    /// Fetch one live task. Archived tasks are invisible.
    ///
    /// # Errors
    ///
    /// `NotFound` when absent or archived.
    pub async fn get_task(&self, id: TaskId) -> BoardResult<Task> {
        self.load_live(id).await
    }

    // -----------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------

    /// Create a task at the tail of its column.
    ///
    /// # Errors
    ///
    /// `Validation`, `ReservedTitle`, `DuplicateTitle`,
    /// `InvalidAssignee`, `Internal`.
    pub async fn create_task(&self, input: TaskInput, actor: Principal) -> BoardResult<Mutation> {
        self.limits.validate_input(&input)?;
        if let Some(assignee) = input.assigned_to {
            self.ensure_assignable(assignee).await?;
        }
        self.ensure_unique_title(&input.title, None).await?;

        let column = self
            .store
            .list(TaskFilter {
                status: Some(input.status),
                ..TaskFilter::default()
            })
            .await
            .map_err(storage_err)?;
        #[allow(clippy::cast_possible_truncation)]
        let position = column.len() as u32;

        let task = Task::create(input, actor.user_id, position);
        self.store.put(task.clone()).await.map_err(storage_err)?;

        self.recorder.record(
            ActivityRecord::new(
                ActivityAction::TaskCreated {
                    title: task.title.clone(),
                },
                actor.user_id,
            )
            .with_target(task.id),
        );

        Ok(Mutation {
            task: task.clone(),
            events: vec![BoardEvent::TaskCreated { task }],
        })
    }

    /// Update task fields under the version check.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Conflict`, `Validation`, `DuplicateTitle`,
    /// `ReservedTitle`, `Internal`.
    pub async fn update_task(
        &self,
        id: TaskId,
        patch: TaskPatch,
        actor: Principal,
        known_version: Option<u64>,
    ) -> BoardResult<Mutation> {
        let _guard = self.locks.guard(id).await;
        let mut task = self.load_live(id).await?;
        self.check_version(&task, known_version, patch.clone(), actor.user_id)?;
        self.limits.validate_patch(&patch)?;
        if let Some(title) = &patch.title
            && folded_title(title) != folded_title(&task.title)
        {
            self.ensure_unique_title(title, Some(id)).await?;
        }

        let deltas = apply_patch(&mut task, &patch);
        task.touch(actor.user_id);
        self.store.put(task.clone()).await.map_err(storage_err)?;

        let (before, after) = delta_maps(&deltas);
        self.recorder.record(
            ActivityRecord::new(
                ActivityAction::TaskUpdated {
                    title: task.title.clone(),
                    fields: deltas.iter().map(|d| d.field.clone()).collect(),
                },
                actor.user_id,
            )
            .with_target(id)
            .with_delta(before, after),
        );

        Ok(Mutation {
            task: task.clone(),
            events: vec![BoardEvent::TaskUpdated { task, deltas }],
        })
    }

    /// Move a task to a column and position, renumbering only the
    /// affected neighbours. Repeating a move is a no-op.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Conflict`, `Internal`.
    pub async fn move_task(
        &self,
        id: TaskId,
        to_status: TaskStatus,
        to_position: u32,
        actor: Principal,
        known_version: Option<u64>,
    ) -> BoardResult<Mutation> {
        let _guard = self.locks.guard(id).await;
        let task = self.load_live(id).await?;
        self.check_version(&task, known_version, TaskPatch::default(), actor.user_id)?;

        let from_status = task.status;
        let from_position = task.position;

        let mut source = self.column(from_status).await?;
        let Some(index) = source.iter().position(|t| t.id == id) else {
            return Err(BoardError::Internal(format!(
                "task {id} missing from its own column"
            )));
        };
        let moved = source.remove(index);

        let mut target = if to_status == from_status {
            source.split_off(0)
        } else {
            self.column(to_status).await?
        };
        // The moved task keeps its old status here; renumber() below
        // detects the column change and touches it.
        let slot = (to_position as usize).min(target.len());
        target.insert(slot, moved);

        // Renumber both columns, touching only tasks whose placement
        // actually changed.
        let mut changed: Vec<Task> = Vec::new();
        if to_status != from_status {
            renumber(source, from_status, &mut changed, actor.user_id);
        }
        renumber(target, to_status, &mut changed, actor.user_id);

        if changed.is_empty() {
            // Same column, same slot: nothing moved.
            return Ok(Mutation {
                task,
                events: Vec::new(),
            });
        }

        let new_task = changed
            .iter()
            .find(|t| t.id == id)
            .cloned()
            .unwrap_or_else(|| task.clone());
        self.store.put_many(changed).await.map_err(storage_err)?;

        self.recorder.record(
            ActivityRecord::new(
                ActivityAction::TaskMoved {
                    title: new_task.title.clone(),
                    from: from_status,
                    to: to_status,
                    position: new_task.position,
                },
                actor.user_id,
            )
            .with_target(id),
        );

        Ok(Mutation {
            task: new_task.clone(),
            events: vec![BoardEvent::TaskMoved {
                task: new_task,
                from_status,
                from_position,
            }],
        })
    }

    /// Assign or unassign a task.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Conflict`, `InvalidAssignee`, `Internal`.
    pub async fn assign_task(
        &self,
        id: TaskId,
        assignee: Option<UserId>,
        actor: Principal,
        known_version: Option<u64>,
    ) -> BoardResult<Mutation> {
        self.apply_assign(id, assignee, actor, known_version, false)
            .await
    }

    /// Let Smart-Assign pick the least-loaded active user, then assign.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Conflict`, `NoEligibleUser`, `Internal`.
    pub async fn smart_assign_task(
        &self,
        id: TaskId,
        actor: Principal,
        known_version: Option<u64>,
    ) -> BoardResult<(Mutation, UserId)> {
        // Selection is advisory and lock-free; the assignment below
        // still runs the version check under the task lock.
        let choice = self.assigner.pick().await?;
        let mutation = self
            .apply_assign(id, Some(choice), actor, known_version, true)
            .await?;
        Ok((mutation, choice))
    }

    async fn apply_assign(
        &self,
        id: TaskId,
        assignee: Option<UserId>,
        actor: Principal,
        known_version: Option<u64>,
        smart: bool,
    ) -> BoardResult<Mutation> {
        let _guard = self.locks.guard(id).await;
        let mut task = self.load_live(id).await?;
        self.check_version(&task, known_version, TaskPatch::default(), actor.user_id)?;

        if let Some(user) = assignee {
            self.ensure_assignable(user).await?;
        }
        task.assigned_to = assignee;
        task.touch(actor.user_id);
        self.store.put(task.clone()).await.map_err(storage_err)?;

        let (action, event) = match assignee {
            Some(user) => (
                ActivityAction::TaskAssigned {
                    title: task.title.clone(),
                    assignee: user,
                    smart,
                },
                BoardEvent::TaskAssigned {
                    task: task.clone(),
                    assignee: user,
                },
            ),
            None => (
                ActivityAction::TaskUnassigned {
                    title: task.title.clone(),
                },
                BoardEvent::TaskUnassigned { task: task.clone() },
            ),
        };
        self.recorder
            .record(ActivityRecord::new(action, actor.user_id).with_target(id));

        Ok(Mutation {
            task,
            events: vec![event],
        })
    }

    /// Append a comment. Comments never bump the version.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Validation`, `Internal`.
    pub async fn add_comment(
        &self,
        id: TaskId,
        text: String,
        actor: Principal,
    ) -> BoardResult<Mutation> {
        self.limits.validate_comment(&text)?;

        let _guard = self.locks.guard(id).await;
        let mut task = self.load_live(id).await?;
        let comment = Comment {
            author: actor.user_id,
            text: text.trim().to_string(),
            created_at: Timestamp::now(),
        };
        task.comments.push(comment.clone());
        self.store.put(task.clone()).await.map_err(storage_err)?;

        self.recorder.record(
            ActivityRecord::new(
                ActivityAction::TaskCommented {
                    title: task.title.clone(),
                },
                actor.user_id,
            )
            .with_target(id),
        );

        Ok(Mutation {
            task: task.clone(),
            events: vec![BoardEvent::TaskCommented { task, comment }],
        })
    }

    /// Soft-delete a task. Creator or admin only.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden`, `Internal`.
    pub async fn archive_task(&self, id: TaskId, actor: Principal) -> BoardResult<Mutation> {
        let _guard = self.locks.guard(id).await;
        let mut task = self.load_live(id).await?;
        self.ensure_may_remove(&task, actor)?;

        task.is_archived = true;
        task.archived_at = Some(Timestamp::now());
        task.archived_by = Some(actor.user_id);
        task.touch(actor.user_id);

        // Close the hole the task leaves in its column.
        let mut remainder = self.column(task.status).await?;
        remainder.retain(|t| t.id != id);
        let mut changed = vec![task.clone()];
        renumber(remainder, task.status, &mut changed, actor.user_id);
        self.store.put_many(changed).await.map_err(storage_err)?;

        let mut events = Vec::new();
        if let Some(ended) = self.edits.clear_task(id) {
            events.push(ended);
        }
        events.push(BoardEvent::TaskArchived { task: task.clone() });

        self.recorder.record(
            ActivityRecord::new(
                ActivityAction::TaskArchived {
                    title: task.title.clone(),
                },
                actor.user_id,
            )
            .with_target(id),
        );

        Ok(Mutation { task, events })
    }

    /// Restore an archived task at the tail of its column. Creator or
    /// admin only; the title must still be unique among live tasks.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden`, `Validation`, `DuplicateTitle`,
    /// `Internal`.
    pub async fn unarchive_task(&self, id: TaskId, actor: Principal) -> BoardResult<Mutation> {
        let _guard = self.locks.guard(id).await;
        let Some(mut task) = self.store.get(id).await.map_err(storage_err)? else {
            return Err(BoardError::NotFound { task_id: id });
        };
        if !task.is_archived {
            return Err(BoardError::validation("taskId", "task is not archived"));
        }
        self.ensure_may_remove(&task, actor)?;
        self.ensure_unique_title(&task.title, Some(id)).await?;

        let column = self.column(task.status).await?;
        #[allow(clippy::cast_possible_truncation)]
        let tail = column.len() as u32;

        let before = serde_json::json!({ "isArchived": true });
        task.is_archived = false;
        task.archived_at = None;
        task.archived_by = None;
        task.position = tail;
        task.touch(actor.user_id);
        self.store.put(task.clone()).await.map_err(storage_err)?;

        self.recorder.record(
            ActivityRecord::new(
                ActivityAction::TaskUnarchived {
                    title: task.title.clone(),
                },
                actor.user_id,
            )
            .with_target(id),
        );

        let deltas = vec![FieldDelta {
            field: "isArchived".to_string(),
            before: before["isArchived"].clone(),
            after: Value::Bool(false),
        }];
        Ok(Mutation {
            task: task.clone(),
            events: vec![BoardEvent::TaskUpdated { task, deltas }],
        })
    }

    /// Hard-delete a non-archived task. Creator or admin only.
    ///
    /// # Errors
    ///
    /// `NotFound`, `Forbidden`, `Internal`.
    pub async fn delete_task(&self, id: TaskId, actor: Principal) -> BoardResult<Removal> {
        let removal = {
            let _guard = self.locks.guard(id).await;
            let task = self.load_live(id).await?;
            self.ensure_may_remove(&task, actor)?;

            self.store.remove(id).await.map_err(storage_err)?;
            let mut remainder = self.column(task.status).await?;
            remainder.retain(|t| t.id != id);
            let mut changed = Vec::new();
            renumber(remainder, task.status, &mut changed, actor.user_id);
            if !changed.is_empty() {
                self.store.put_many(changed).await.map_err(storage_err)?;
            }

            self.conflicts.clear_task(id);
            let mut events = Vec::new();
            if let Some(ended) = self.edits.clear_task(id) {
                events.push(ended);
            }
            events.push(BoardEvent::TaskDeleted { task_id: id });

            self.recorder.record(
                ActivityRecord::new(
                    ActivityAction::TaskDeleted {
                        title: task.title.clone(),
                    },
                    actor.user_id,
                )
                .with_target(id),
            );

            Removal {
                task_id: id,
                events,
            }
        };
        self.locks.forget(id);
        Ok(removal)
    }

    // -----------------------------------------------------------------
    // Conflict resolution
    // -----------------------------------------------------------------

    /// Settle a detected conflict.
    ///
    /// # Errors
    ///
    /// `UnknownConflict`, `NotFound`; `merge` may additionally fail
    /// like an update (including a fresh `Conflict` if yet another
    /// write landed since the resolve was sent).
    pub async fn resolve_conflict(
        &self,
        id: TaskId,
        conflict_id: ConflictId,
        strategy: ResolutionStrategy,
        actor: Principal,
    ) -> BoardResult<Mutation> {
        let pending = self.conflicts.take(id, conflict_id)?;
        let current = self.load_live(id).await?;

        let mut mutation = match strategy {
            ResolutionStrategy::TakeTheirs | ResolutionStrategy::TakeMine => Mutation {
                task: current.clone(),
                events: Vec::new(),
            },
            ResolutionStrategy::Merge => {
                let merged = merge_patch(&pending.descriptor.server_task, &current, &pending.patch);
                if merged.is_empty() {
                    Mutation {
                        task: current.clone(),
                        events: Vec::new(),
                    }
                } else {
                    self.update_task(id, merged, actor, Some(current.version))
                        .await?
                }
            },
        };

        let resolved_task = match strategy {
            ResolutionStrategy::TakeMine => None,
            _ => Some(mutation.task.clone()),
        };
        mutation.events.push(BoardEvent::ConflictResolved {
            task_id: id,
            conflict_id,
            strategy,
            task: resolved_task,
        });

        self.recorder.record(
            ActivityRecord::new(
                ActivityAction::ConflictResolved {
                    title: mutation.task.title.clone(),
                    strategy,
                },
                actor.user_id,
            )
            .with_target(id)
            .with_conflict(conflict_id),
        );
        self.recorder.mark_conflict_resolved(conflict_id);

        debug!(task_id = %id, conflict_id = %conflict_id, %strategy, "Conflict resolved");
        Ok(mutation)
    }

    // -----------------------------------------------------------------
    // Edit sessions
    // -----------------------------------------------------------------

    /// Open an advisory edit session on a live task.
    ///
    /// # Errors
    ///
    /// `NotFound` when the task is absent or archived.
    pub async fn edit_start(
        &self,
        id: TaskId,
        actor: Principal,
        session: SessionId,
        known_version: u64,
    ) -> BoardResult<EditOutcome> {
        let task = self.load_live(id).await?;
        if known_version < task.version {
            debug!(task_id = %id, known_version, server_version = task.version,
                "Edit session opened on a stale version");
        }
        Ok(self.edits.start(id, actor.user_id, session))
    }

    /// Close an edit session.
    #[must_use]
    pub fn edit_end(&self, id: TaskId, actor: Principal) -> EditOutcome {
        self.edits.end(id, actor.user_id)
    }

    /// Clear everything a disconnecting session held.
    #[must_use]
    pub fn session_closed(&self, session: SessionId) -> Vec<BoardEvent> {
        self.edits.clear_session(session)
    }

    // -----------------------------------------------------------------
    // Internal steps
    // -----------------------------------------------------------------

    async fn load_live(&self, id: TaskId) -> BoardResult<Task> {
        match self.store.get(id).await.map_err(storage_err)? {
            Some(task) if !task.is_archived => Ok(task),
            _ => Err(BoardError::NotFound { task_id: id }),
        }
    }

    async fn column(&self, status: TaskStatus) -> BoardResult<Vec<Task>> {
        let mut tasks = self
            .store
            .list(TaskFilter {
                status: Some(status),
                ..TaskFilter::default()
            })
            .await
            .map_err(storage_err)?;
        tasks.sort_by_key(|t| t.position);
        Ok(tasks)
    }

    async fn ensure_assignable(&self, user_id: UserId) -> BoardResult<()> {
        match self.users.get(user_id).await? {
            Some(user) if user.is_active => Ok(()),
            _ => Err(BoardError::InvalidAssignee { user_id }),
        }
    }

    async fn ensure_unique_title(&self, title: &str, exclude: Option<TaskId>) -> BoardResult<()> {
        let folded = folded_title(title);
        if let Some(other) = self
            .store
            .find_by_title(&folded)
            .await
            .map_err(storage_err)?
            && Some(other.id) != exclude
        {
            return Err(BoardError::DuplicateTitle {
                title: title.trim().to_string(),
            });
        }
        Ok(())
    }

    fn ensure_may_remove(&self, task: &Task, actor: Principal) -> BoardResult<()> {
        if actor.may_remove(task.created_by) {
            Ok(())
        } else {
            Err(BoardError::Forbidden {
                reason: "only the creator or an admin may do this".to_string(),
            })
        }
    }

    /// The version check of every `knownVersion`-carrying mutation.
    /// On mismatch: register the conflict, record the activity, fail.
    fn check_version(
        &self,
        task: &Task,
        known_version: Option<u64>,
        patch: TaskPatch,
        actor: UserId,
    ) -> BoardResult<()> {
        let Some(known) = known_version else {
            return Ok(());
        };
        if known == task.version {
            return Ok(());
        }

        let descriptor = ConflictDescriptor {
            conflict_id: ConflictId::new(),
            task_id: task.id,
            client_version: known,
            server_version: task.version,
            server_task: task.clone(),
            last_modified_by: task.last_modified_by,
        };
        self.conflicts.register(descriptor.clone(), patch, actor);

        self.recorder.record(
            ActivityRecord::new(
                ActivityAction::ConflictDetected {
                    title: task.title.clone(),
                    client_version: known,
                    server_version: task.version,
                },
                actor,
            )
            .with_target(task.id)
            .with_conflict(descriptor.conflict_id),
        );

        Err(BoardError::Conflict(Box::new(descriptor)))
    }
}

impl std::fmt::Debug for TaskService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskService")
            .field("pending_conflicts", &self.conflicts.len())
            .finish_non_exhaustive()
    }
}

fn storage_err(e: StorageError) -> BoardError {
    BoardError::Internal(e.to_string())
}

/// Apply a validated patch, returning one delta per field that
/// actually changed.
fn apply_patch(task: &mut Task, patch: &TaskPatch) -> Vec<FieldDelta> {
    let mut deltas = Vec::new();

    if let Some(title) = &patch.title {
        let title = title.trim().to_string();
        if title != task.title {
            deltas.push(delta("title", &task.title, &title));
            task.title = title;
        }
    }
    if let Some(description) = &patch.description
        && *description != task.description
    {
        deltas.push(delta("description", &task.description, description));
        task.description.clone_from(description);
    }
    if let Some(priority) = patch.priority
        && priority != task.priority
    {
        deltas.push(delta("priority", &task.priority, &priority));
        task.priority = priority;
    }
    if let Some(due) = patch.due_date
        && task.due_date != Some(due)
    {
        deltas.push(delta("dueDate", &task.due_date, &Some(due)));
        task.due_date = Some(due);
    }
    if let Some(tags) = &patch.tags {
        let tags = dedup_tags(tags.clone());
        if tags != task.tags {
            deltas.push(delta("tags", &task.tags, &tags));
            task.tags = tags;
        }
    }

    deltas
}

fn delta<B: serde::Serialize, A: serde::Serialize>(field: &str, before: &B, after: &A) -> FieldDelta {
    FieldDelta {
        field: field.to_string(),
        before: serde_json::to_value(before).unwrap_or(Value::Null),
        after: serde_json::to_value(after).unwrap_or(Value::Null),
    }
}

fn delta_maps(deltas: &[FieldDelta]) -> (Value, Value) {
    let mut before = serde_json::Map::new();
    let mut after = serde_json::Map::new();
    for d in deltas {
        before.insert(d.field.clone(), d.before.clone());
        after.insert(d.field.clone(), d.after.clone());
    }
    (Value::Object(before), Value::Object(after))
}

/// Re-index a column, touching every task whose position changed and
/// pushing it into `changed`. The moved task is matched by status as
/// well so a cross-column move bumps it even when it keeps its index.
fn renumber(column: Vec<Task>, status: TaskStatus, changed: &mut Vec<Task>, actor: UserId) {
    for (index, mut task) in column.into_iter().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let position = index as u32;
        let already = changed.iter().any(|t| t.id == task.id);
        if (task.position != position || task.status != status) && !already {
            task.position = position;
            task.status = status;
            task.touch(actor);
            changed.push(task);
        }
    }
}
