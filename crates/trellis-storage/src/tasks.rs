//! The task store contract and its in-memory implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;

use trellis_core::{Task, TaskFilter, TaskId, UserId, folded_title};

use crate::error::{StorageError, StorageResult};

/// CRUD/query contract of the external persistence store.
///
/// Reads and writes of a single task are linearisable. Multi-task
/// writes ([`TaskStore::put_many`]) carry no atomicity guarantee; the
/// board core orders them so that any prefix leaves the board usable.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Fetch a task by id, archived or not. `None` when absent.
    async fn get(&self, id: TaskId) -> StorageResult<Option<Task>>;

    /// Write a task, inserting or overwriting. This is the commit
    /// point of every mutation.
    async fn put(&self, task: Task) -> StorageResult<()>;

    /// Write several tasks (position renumbering after a move).
    async fn put_many(&self, tasks: Vec<Task>) -> StorageResult<()>;

    /// Hard-delete. Returns `true` if the task existed.
    async fn remove(&self, id: TaskId) -> StorageResult<bool>;

    /// Non-archived tasks passing the filter, in no particular order.
    async fn list(&self, filter: TaskFilter) -> StorageResult<Vec<Task>>;

    /// Non-archived task whose case-folded title equals `folded`.
    async fn find_by_title(&self, folded: &str) -> StorageResult<Option<Task>>;

    /// Number of non-archived tasks assigned to `user` in an open
    /// column (todo or in-progress). The Smart-Assign load metric.
    async fn count_open_assigned(&self, user: UserId) -> StorageResult<usize>;
}

/// In-memory task store for tests and the dev server.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl MemoryTaskStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> StorageResult<std::sync::RwLockReadGuard<'_, HashMap<TaskId, Task>>> {
        self.tasks
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))
    }

    fn write(&self) -> StorageResult<std::sync::RwLockWriteGuard<'_, HashMap<TaskId, Task>>> {
        self.tasks
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn get(&self, id: TaskId) -> StorageResult<Option<Task>> {
        Ok(self.read()?.get(&id).cloned())
    }

    async fn put(&self, task: Task) -> StorageResult<()> {
        self.write()?.insert(task.id, task);
        Ok(())
    }

    async fn put_many(&self, tasks: Vec<Task>) -> StorageResult<()> {
        let mut guard = self.write()?;
        for task in tasks {
            guard.insert(task.id, task);
        }
        Ok(())
    }

    async fn remove(&self, id: TaskId) -> StorageResult<bool> {
        Ok(self.write()?.remove(&id).is_some())
    }

    async fn list(&self, filter: TaskFilter) -> StorageResult<Vec<Task>> {
        Ok(self
            .read()?
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect())
    }

    async fn find_by_title(&self, folded: &str) -> StorageResult<Option<Task>> {
        Ok(self
            .read()?
            .values()
            .find(|t| !t.is_archived && folded_title(&t.title) == folded)
            .cloned())
    }

    async fn count_open_assigned(&self, user: UserId) -> StorageResult<usize> {
        Ok(self
            .read()?
            .values()
            .filter(|t| !t.is_archived && t.assigned_to == Some(user) && t.status.is_open())
            .count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_core::{TaskInput, TaskStatus};

    fn task(title: &str, status: TaskStatus, assignee: Option<UserId>) -> Task {
        Task::create(
            TaskInput {
                title: title.to_string(),
                status,
                assigned_to: assignee,
                ..TaskInput::default()
            },
            UserId::new(),
            0,
        )
    }

    #[tokio::test]
    async fn put_then_get() {
        let store = MemoryTaskStore::new();
        let t = task("alpha", TaskStatus::Todo, None);
        store.put(t.clone()).await.unwrap();
        assert_eq!(store.get(t.id).await.unwrap(), Some(t));
    }

    #[tokio::test]
    async fn find_by_title_is_case_folded_and_skips_archived() {
        let store = MemoryTaskStore::new();
        let mut t = task("Ship Release", TaskStatus::Todo, None);
        store.put(t.clone()).await.unwrap();

        let found = store.find_by_title("ship release").await.unwrap();
        assert!(found.is_some());

        t.is_archived = true;
        store.put(t).await.unwrap();
        assert!(store.find_by_title("ship release").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_load_excludes_done_and_archived() {
        let store = MemoryTaskStore::new();
        let user = UserId::new();
        store
            .put(task("one", TaskStatus::Todo, Some(user)))
            .await
            .unwrap();
        store
            .put(task("two", TaskStatus::InProgress, Some(user)))
            .await
            .unwrap();
        store
            .put(task("three", TaskStatus::Done, Some(user)))
            .await
            .unwrap();
        let mut archived = task("four", TaskStatus::Todo, Some(user));
        archived.is_archived = true;
        store.put(archived).await.unwrap();

        assert_eq!(store.count_open_assigned(user).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn list_applies_filter() {
        let store = MemoryTaskStore::new();
        let user = UserId::new();
        store
            .put(task("a", TaskStatus::Todo, Some(user)))
            .await
            .unwrap();
        store.put(task("b", TaskStatus::Done, None)).await.unwrap();

        let filter = TaskFilter {
            status: Some(TaskStatus::Todo),
            ..TaskFilter::default()
        };
        let listed = store.list(filter).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].title, "a");
    }

    #[tokio::test]
    async fn remove_reports_existence() {
        let store = MemoryTaskStore::new();
        let t = task("gone", TaskStatus::Todo, None);
        store.put(t.clone()).await.unwrap();
        assert!(store.remove(t.id).await.unwrap());
        assert!(!store.remove(t.id).await.unwrap());
    }
}
