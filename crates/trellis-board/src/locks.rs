//! Per-task serialisation.
//!
//! All mutations of a single task take this lock so that
//! read-validate-persist is atomic per task. Reads never take it, and
//! it is the only locking scope of the core.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use trellis_core::TaskId;

/// Registry of per-task mutexes, created on first use.
#[derive(Debug, Default)]
pub(crate) struct TaskLocks {
    inner: DashMap<TaskId, Arc<Mutex<()>>>,
}

impl TaskLocks {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Acquire the mutex for `id`, waiting behind earlier writers.
    pub(crate) async fn guard(&self, id: TaskId) -> OwnedMutexGuard<()> {
        let lock = self
            .inner
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Drop the mutex of a deleted task.
    pub(crate) fn forget(&self, id: TaskId) {
        self.inner.remove(&id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn serialises_writers_on_one_task() {
        let locks = Arc::new(TaskLocks::new());
        let id = TaskId::new();

        let held = locks.guard(id).await;
        let contender = {
            let locks = Arc::clone(&locks);
            tokio::spawn(async move {
                let _guard = locks.guard(id).await;
            })
        };
        // The second writer must wait until the first guard drops.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        drop(held);
        contender.await.unwrap();
    }

    #[tokio::test]
    async fn different_tasks_do_not_contend() {
        let locks = TaskLocks::new();
        let a = locks.guard(TaskId::new()).await;
        let b = locks.guard(TaskId::new()).await;
        drop((a, b));
    }
}
