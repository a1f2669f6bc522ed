//! Conflict detection state and the field-wise merge.
//!
//! When a mutation loses the version check, the service registers the
//! rejected change here together with a snapshot of server state (the
//! merge base). Resolution consumes the entry: `take-theirs` answers
//! with current state, `take-mine` only records intent, `merge`
//! combines both sides field by field and reapplies.

use dashmap::DashMap;

use trellis_core::{
    BoardError, BoardResult, ConflictDescriptor, ConflictId, Task, TaskId, TaskPatch, Timestamp,
    UserId, dedup_tags,
};

/// A detected, not-yet-settled conflict.
#[derive(Debug, Clone)]
pub struct PendingConflict {
    /// The descriptor surfaced to the losing client.
    pub descriptor: ConflictDescriptor,
    /// The patch the client tried to apply, kept for `merge`.
    pub patch: TaskPatch,
    /// Whose write lost.
    pub detected_for: UserId,
    /// Detection instant.
    pub detected_at: Timestamp,
}

/// Registry of pending conflicts, keyed by conflict id.
#[derive(Debug, Default)]
pub struct ConflictRegistry {
    inner: DashMap<ConflictId, PendingConflict>,
}

impl ConflictRegistry {
    /// Empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a freshly detected conflict.
    pub fn register(&self, descriptor: ConflictDescriptor, patch: TaskPatch, detected_for: UserId) {
        self.inner.insert(
            descriptor.conflict_id,
            PendingConflict {
                descriptor,
                patch,
                detected_for,
                detected_at: Timestamp::now(),
            },
        );
    }

    /// Consume the entry for a resolve call.
    ///
    /// # Errors
    ///
    /// `UnknownConflict` if the id was never registered, was already
    /// settled, or belongs to a different task.
    pub fn take(&self, task_id: TaskId, conflict_id: ConflictId) -> BoardResult<PendingConflict> {
        let (_, pending) = self
            .inner
            .remove_if(&conflict_id, |_, p| p.descriptor.task_id == task_id)
            .ok_or(BoardError::UnknownConflict { conflict_id })?;
        Ok(pending)
    }

    /// Drop every pending conflict of a deleted task.
    pub fn clear_task(&self, task_id: TaskId) {
        self.inner.retain(|_, p| p.descriptor.task_id != task_id);
    }

    /// Number of pending conflicts (diagnostics).
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether no conflict is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

/// Separator inserted between two diverging descriptions on merge.
const DESCRIPTION_SEPARATOR: &str = "\n---\n";

/// Field-wise three-way merge of a rejected patch onto current server
/// state.
///
/// `base` is server state at detection time, `server` is server state
/// now. For each field: a side that did not change it loses to the
/// side that did; when both changed it, the client wins scalars, tags
/// take the union, and descriptions are concatenated when both are
/// non-empty and differ. The result is a patch to apply over `server`
/// with the current version.
#[must_use]
pub fn merge_patch(base: &Task, server: &Task, client: &TaskPatch) -> TaskPatch {
    let mut merged = TaskPatch::default();

    if let Some(title) = &client.title
        && title.trim() != base.title
    {
        // Client changed the title: client side wins.
        merged.title = Some(title.clone());
    }

    if let Some(priority) = client.priority
        && priority != base.priority
    {
        merged.priority = Some(priority);
    }

    if let Some(due) = client.due_date
        && base.due_date != Some(due)
    {
        merged.due_date = Some(due);
    }

    if let Some(tags) = &client.tags {
        let client_changed = *tags != base.tags;
        let server_changed = server.tags != base.tags;
        if client_changed && server_changed {
            let mut union = server.tags.clone();
            union.extend(tags.iter().cloned());
            merged.tags = Some(dedup_tags(union));
        } else if client_changed {
            merged.tags = Some(tags.clone());
        }
    }

    if let Some(description) = &client.description {
        let client_changed = *description != base.description;
        let server_changed = server.description != base.description;
        if client_changed && server_changed {
            if !server.description.is_empty()
                && !description.is_empty()
                && server.description != *description
            {
                merged.description =
                    Some(format!("{}{DESCRIPTION_SEPARATOR}{description}", server.description));
            } else {
                merged.description = Some(description.clone());
            }
        } else if client_changed {
            merged.description = Some(description.clone());
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{TaskInput, TaskPriority};

    fn base_task() -> Task {
        Task::create(
            TaskInput {
                title: "merge base".to_string(),
                description: "original".to_string(),
                tags: vec!["one".to_string()],
                ..TaskInput::default()
            },
            UserId::new(),
            0,
        )
    }

    #[test]
    fn untouched_fields_stay_server_side() {
        let base = base_task();
        let mut server = base.clone();
        server.priority = TaskPriority::High;

        let client = TaskPatch {
            title: Some("merge base".to_string()),
            ..TaskPatch::default()
        };
        let merged = merge_patch(&base, &server, &client);
        assert!(merged.is_empty());
    }

    #[test]
    fn client_wins_contested_scalars() {
        let base = base_task();
        let mut server = base.clone();
        server.priority = TaskPriority::High;

        let client = TaskPatch {
            priority: Some(TaskPriority::Urgent),
            ..TaskPatch::default()
        };
        let merged = merge_patch(&base, &server, &client);
        assert_eq!(merged.priority, Some(TaskPriority::Urgent));
    }

    #[test]
    fn contested_tags_take_the_union() {
        let base = base_task();
        let mut server = base.clone();
        server.tags = vec!["one".to_string(), "server".to_string()];

        let client = TaskPatch {
            tags: Some(vec!["one".to_string(), "client".to_string()]),
            ..TaskPatch::default()
        };
        let merged = merge_patch(&base, &server, &client);
        assert_eq!(
            merged.tags,
            Some(vec![
                "one".to_string(),
                "server".to_string(),
                "client".to_string()
            ])
        );
    }

    #[test]
    fn diverging_descriptions_concatenate() {
        let base = base_task();
        let mut server = base.clone();
        server.description = "server words".to_string();

        let client = TaskPatch {
            description: Some("client words".to_string()),
            ..TaskPatch::default()
        };
        let merged = merge_patch(&base, &server, &client);
        assert_eq!(
            merged.description.as_deref(),
            Some("server words\n---\nclient words")
        );
    }

    #[test]
    fn empty_server_description_is_not_concatenated() {
        let mut base = base_task();
        base.description = String::new();
        let server = base.clone();

        let client = TaskPatch {
            description: Some("client words".to_string()),
            ..TaskPatch::default()
        };
        let merged = merge_patch(&base, &server, &client);
        assert_eq!(merged.description.as_deref(), Some("client words"));
    }

    #[test]
    fn registry_take_is_single_shot_and_task_scoped() {
        let registry = ConflictRegistry::new();
        let base = base_task();
        let descriptor = ConflictDescriptor {
            conflict_id: ConflictId::new(),
            task_id: base.id,
            client_version: 1,
            server_version: 2,
            server_task: base.clone(),
            last_modified_by: UserId::new(),
        };
        let conflict_id = descriptor.conflict_id;
        registry.register(descriptor, TaskPatch::default(), UserId::new());

        // Wrong task: entry survives.
        assert!(registry.take(TaskId::new(), conflict_id).is_err());
        assert_eq!(registry.len(), 1);

        // Right task: consumed.
        assert!(registry.take(base.id, conflict_id).is_ok());
        assert!(matches!(
            registry.take(base.id, conflict_id),
            Err(BoardError::UnknownConflict { .. })
        ));
    }
}
