//! Smart-Assign: fairest active-load assignee.

use std::sync::Arc;

use rand::Rng;

use trellis_core::{BoardError, BoardResult, UserDirectory, UserId};
use trellis_storage::TaskStore;

/// Picks assignees by load.
///
/// Load is the number of non-archived tasks assigned to a user in an
/// open column (todo or in-progress). The pick is uniform among the
/// minimum-load users and purely advisory: it is realised by a normal
/// assignment that still goes through the version check.
pub struct AssignmentEngine {
    users: Arc<dyn UserDirectory>,
    store: Arc<dyn TaskStore>,
}

impl AssignmentEngine {
    /// Build an engine over the user directory and task store.
    #[must_use]
    pub fn new(users: Arc<dyn UserDirectory>, store: Arc<dyn TaskStore>) -> Self {
        Self { users, store }
    }

    /// Pick a least-loaded active user, uniformly among ties.
    ///
    /// # Errors
    ///
    /// `NoEligibleUser` when no active user exists; `Internal` when a
    /// collaborator fails.
    pub async fn pick(&self) -> BoardResult<UserId> {
        let active = self.users.list_active().await?;
        if active.is_empty() {
            return Err(BoardError::NoEligibleUser);
        }

        let mut loads = Vec::with_capacity(active.len());
        for user in &active {
            let load = self
                .store
                .count_open_assigned(user.id)
                .await
                .map_err(|e| BoardError::Internal(e.to_string()))?;
            loads.push((user.id, load));
        }

        let min = loads
            .iter()
            .map(|(_, load)| *load)
            .min()
            .unwrap_or_default();
        let candidates: Vec<UserId> = loads
            .into_iter()
            .filter(|(_, load)| *load == min)
            .map(|(id, _)| id)
            .collect();

        let index = rand::thread_rng().gen_range(0..candidates.len());
        Ok(candidates[index])
    }
}

impl std::fmt::Debug for AssignmentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssignmentEngine").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use trellis_core::{Role, Task, TaskInput, TaskStatus, User};
    use trellis_storage::{MemoryTaskStore, MemoryUserDirectory};

    fn user(name: &str, active: bool) -> User {
        User {
            id: UserId::new(),
            display_name: name.to_string(),
            role: Role::Member,
            is_active: active,
        }
    }

    async fn seed_tasks(store: &MemoryTaskStore, assignee: UserId, open: usize) {
        for i in 0..open {
            let task = Task::create(
                TaskInput {
                    title: format!("{assignee}-{i}"),
                    status: TaskStatus::Todo,
                    assigned_to: Some(assignee),
                    ..TaskInput::default()
                },
                UserId::new(),
                0,
            );
            store.put(task).await.unwrap();
        }
    }

    #[tokio::test]
    async fn no_active_users_is_no_eligible_user() {
        let users = Arc::new(MemoryUserDirectory::new());
        users.seed(user("ghost", false)).unwrap();
        let engine = AssignmentEngine::new(users, Arc::new(MemoryTaskStore::new()));
        assert!(matches!(
            engine.pick().await,
            Err(BoardError::NoEligibleUser)
        ));
    }

    #[tokio::test]
    async fn picks_only_minimum_load_users() {
        let users = Arc::new(MemoryUserDirectory::new());
        let store = Arc::new(MemoryTaskStore::new());

        let a = user("a", true);
        let b = user("b", true);
        let c = user("c", true);
        let d = user("d", true);
        for u in [&a, &b, &c, &d] {
            users.seed(u.clone()).unwrap();
        }
        seed_tasks(&store, a.id, 2).await;
        seed_tasks(&store, d.id, 2).await;

        let engine = AssignmentEngine::new(users, store);
        for _ in 0..50 {
            let picked = engine.pick().await.unwrap();
            assert!(picked == b.id || picked == c.id);
        }
    }

    #[tokio::test]
    async fn ties_break_roughly_uniformly() {
        let users = Arc::new(MemoryUserDirectory::new());
        let store = Arc::new(MemoryTaskStore::new());

        let a = user("a", true);
        let b = user("b", true);
        users.seed(a.clone()).unwrap();
        users.seed(b.clone()).unwrap();

        let engine = AssignmentEngine::new(users, store);
        let mut counts: HashMap<UserId, u32> = HashMap::new();
        for _ in 0..1000 {
            let picked = engine.pick().await.unwrap();
            *counts.entry(picked).or_default() += 1;
        }

        let a_count = counts.get(&a.id).copied().unwrap_or(0);
        let b_count = counts.get(&b.id).copied().unwrap_or(0);
        assert!((450..=550).contains(&a_count), "a picked {a_count} times");
        assert!((450..=550).contains(&b_count), "b picked {b_count} times");
    }
}
