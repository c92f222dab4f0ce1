//! Delayed task registry.

use crate::delayed_task::{DelayedTask, DelayedTaskOptions};
use async_trait::async_trait;
use dashmap::DashMap;
use latchkey_core::{LatchkeyResult, TaskError};
use std::sync::Arc;

/// Registry of delayed tasks keyed by task id.
///
/// Entries persist after firing so `last_run` stays queryable; only
/// cancellation or explicit removal drops them.
#[async_trait]
pub trait TaskRegistry: Send + Sync {
    /// Create a task and track it.
    async fn register(&self, options: DelayedTaskOptions) -> LatchkeyResult<Arc<DelayedTask>>;

    async fn count(&self) -> LatchkeyResult<usize>;

    async fn tasks(&self) -> LatchkeyResult<Vec<Arc<DelayedTask>>>;

    async fn task_by_id(&self, id: &str) -> LatchkeyResult<Option<Arc<DelayedTask>>>;

    /// Cancel and forget a running task. A task that is not running is
    /// left alone; an unknown id is `TaskError::NotFound`.
    async fn cancel_task_by_id(&self, id: &str) -> LatchkeyResult<()>;

    /// Start a task; no-op if it is already running.
    async fn start_task_by_id(&self, id: &str) -> LatchkeyResult<()>;

    /// Cancel if running, then forget the task whatever its state.
    /// Returns whether the id was known.
    async fn remove_task_by_id(&self, id: &str) -> LatchkeyResult<bool>;
}

/// In-process `TaskRegistry`.
#[derive(Debug, Default)]
pub struct DelayedTaskRegistry {
    tasks: DashMap<String, Arc<DelayedTask>>,
}

impl DelayedTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn require(&self, id: &str) -> LatchkeyResult<Arc<DelayedTask>> {
        self.tasks
            .get(id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| TaskError::NotFound { id: id.to_string() }.into())
    }
}

#[async_trait]
impl TaskRegistry for DelayedTaskRegistry {
    async fn register(&self, options: DelayedTaskOptions) -> LatchkeyResult<Arc<DelayedTask>> {
        let task = Arc::new(DelayedTask::new(options)?);
        self.tasks.insert(task.id().to_string(), Arc::clone(&task));
        tracing::trace!(task_id = %task.id(), "Delayed task registered");
        Ok(task)
    }

    async fn count(&self) -> LatchkeyResult<usize> {
        Ok(self.tasks.len())
    }

    async fn tasks(&self) -> LatchkeyResult<Vec<Arc<DelayedTask>>> {
        Ok(self
            .tasks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect())
    }

    async fn task_by_id(&self, id: &str) -> LatchkeyResult<Option<Arc<DelayedTask>>> {
        Ok(self.tasks.get(id).map(|entry| Arc::clone(entry.value())))
    }

    async fn cancel_task_by_id(&self, id: &str) -> LatchkeyResult<()> {
        let task = self.require(id)?;
        if !task.is_running() {
            return Ok(());
        }
        task.cancel();
        self.tasks.remove(id);
        Ok(())
    }

    async fn start_task_by_id(&self, id: &str) -> LatchkeyResult<()> {
        self.require(id)?.start()
    }

    async fn remove_task_by_id(&self, id: &str) -> LatchkeyResult<bool> {
        match self.tasks.remove(id) {
            Some((_, task)) => {
                task.cancel();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
