//! In-process task store.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::Mutex;

use crate::models::task::{Task, TaskStatus};
use crate::tasks::TaskStore;
use crate::{AppError, Result};

/// Task store holding its tasks in memory.
#[derive(Debug, Default)]
pub struct InMemoryTaskStore {
    tasks: Mutex<Vec<Task>>,
}

impl InMemoryTaskStore {
    /// Create a store seeded with `tasks`.
    #[must_use]
    pub fn new(tasks: Vec<Task>) -> Self {
        Self {
            tasks: Mutex::new(tasks),
        }
    }

    /// Add or replace a task.
    pub async fn upsert(&self, task: Task) {
        let mut tasks = self.tasks.lock().await;
        if let Some(existing) = tasks.iter_mut().find(|t| t.id == task.id) {
            *existing = task;
        } else {
            tasks.push(task);
        }
    }
}

impl TaskStore for InMemoryTaskStore {
    fn find(&self, id: &str) -> Pin<Box<dyn Future<Output = Result<Option<Task>>> + Send + '_>> {
        let id = id.to_owned();
        Box::pin(async move {
            let tasks = self.tasks.lock().await;
            Ok(tasks.iter().find(|t| t.id == id).cloned())
        })
    }

    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Task>>> + Send + '_>> {
        Box::pin(async move { Ok(self.tasks.lock().await.clone()) })
    }

    fn update_status(
        &self,
        id: &str,
        status: TaskStatus,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let id = id.to_owned();
        Box::pin(async move {
            let mut tasks = self.tasks.lock().await;
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| AppError::NotFound(format!("task {id} not found")))?;
            task.status = status;
            Ok(())
        })
    }
}
