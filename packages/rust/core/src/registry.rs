//! In-memory task registry.
//!
//! Holds the [`Progress`] of every known task together with its cancellation
//! token. Readers always receive clones taken under the lock, so a poll never
//! observes a half-applied update.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use armory_shared::{ArmoryError, Progress, Result, TaskId, TaskStatus};

struct Entry {
    progress: Progress,
    cancel: CancellationToken,
}

/// Owned map from task id to its mutable progress record.
#[derive(Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Entry>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new task. Fails with `Conflict` if the id is already taken.
    pub async fn create(&self, progress: Progress, cancel: CancellationToken) -> Result<()> {
        let mut tasks = self.tasks.write().await;
        let task_id = progress.task_id;
        if tasks.contains_key(&task_id) {
            return Err(ArmoryError::Conflict(format!("task {task_id} already exists")));
        }
        tasks.insert(task_id, Entry { progress, cancel });
        Ok(())
    }

    /// Consistent snapshot of one task.
    pub async fn get(&self, task_id: TaskId) -> Result<Progress> {
        self.tasks
            .read()
            .await
            .get(&task_id)
            .map(|e| e.progress.clone())
            .ok_or_else(|| ArmoryError::NotFound(format!("task {task_id}")))
    }

    /// Snapshot of every task, oldest first.
    pub async fn list(&self) -> Vec<Progress> {
        let mut all: Vec<Progress> = self
            .tasks
            .read()
            .await
            .values()
            .map(|e| e.progress.clone())
            .collect();
        all.sort_by_key(|p| p.created_at);
        all
    }

    pub async fn len(&self) -> usize {
        self.tasks.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.tasks.read().await.is_empty()
    }

    /// Apply `mutate` under the write lock and stamp `updated_at`.
    ///
    /// Terminal entries are frozen: the mutation is rejected with `Conflict`.
    pub async fn update<F>(&self, task_id: TaskId, mutate: F) -> Result<()>
    where
        F: FnOnce(&mut Progress),
    {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(&task_id)
            .ok_or_else(|| ArmoryError::NotFound(format!("task {task_id}")))?;
        if entry.progress.is_terminal() {
            return Err(ArmoryError::Conflict(format!(
                "task {task_id} already finished as {:?}",
                entry.progress.status
            )));
        }
        mutate(&mut entry.progress);
        entry.progress.updated_at = Utc::now();
        Ok(())
    }

    /// Signal cancellation for a task and return its snapshot.
    ///
    /// A task that has not started yet is finished as `Cancelled` right away;
    /// a running one is finished by its runner once it observes the signal.
    /// Terminal tasks are left untouched.
    pub async fn cancel(&self, task_id: TaskId) -> Result<Progress> {
        let mut tasks = self.tasks.write().await;
        let entry = tasks
            .get_mut(&task_id)
            .ok_or_else(|| ArmoryError::NotFound(format!("task {task_id}")))?;

        if !entry.progress.is_terminal() {
            entry.cancel.cancel();
            if entry.progress.status == TaskStatus::Pending {
                let message = format!("pipeline cancelled for {}", entry.progress.country);
                entry.progress.cancel(message);
                entry.progress.updated_at = Utc::now();
            }
        }
        Ok(entry.progress.clone())
    }

    /// Remove terminal tasks that finished before `cutoff`. Returns how many
    /// entries were dropped.
    pub async fn evict_finished_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, e| {
            !(e.progress.is_terminal() && e.progress.finished_at.is_some_and(|t| t < cutoff))
        });
        let evicted = before - tasks.len();
        if evicted > 0 {
            debug!(evicted, remaining = tasks.len(), "evicted finished tasks");
        }
        evicted
    }
}
