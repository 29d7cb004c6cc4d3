//! Task store abstraction: the system of record for work items.

pub mod json_store;
pub mod memory;

use std::future::Future;
use std::pin::Pin;

use crate::models::task::{Task, TaskStatus};
use crate::Result;

pub use json_store::JsonTaskStore;
pub use memory::InMemoryTaskStore;

/// Read access to tasks plus status updates.
pub trait TaskStore: Send + Sync {
    /// Look up a task by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::TaskStore`](crate::AppError::TaskStore) if the
    /// store cannot be read.
    fn find(&self, id: &str) -> Pin<Box<dyn Future<Output = Result<Option<Task>>> + Send + '_>>;

    /// All tasks in store order.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::TaskStore`](crate::AppError::TaskStore) if the
    /// store cannot be read.
    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Task>>> + Send + '_>>;

    /// Set the workflow status of a task.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::NotFound`](crate::AppError::NotFound) for an
    /// unknown id, or [`AppError::TaskStore`](crate::AppError::TaskStore) if
    /// the change cannot be persisted.
    fn update_status(
        &self,
        id: &str,
        status: TaskStatus,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
