//! Task store backed by a JSON array file.
//!
//! The file is re-read on every query so edits made by other tools are
//! picked up without a restart. Writes go through a temporary file in the
//! same directory followed by an atomic rename.

use std::future::Future;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::pin::Pin;

use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::info;

use crate::models::task::{Task, TaskStatus};
use crate::tasks::TaskStore;
use crate::{AppError, Result};

/// JSON-file task store.
#[derive(Debug)]
pub struct JsonTaskStore {
    path: PathBuf,
    /// Serializes read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl JsonTaskStore {
    /// Create a store reading from and writing to `path`.
    ///
    /// A missing file is treated as an empty task list.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// File backing this store.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Vec<Task>> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) if raw.trim().is_empty() => Ok(Vec::new()),
            Ok(raw) => Ok(serde_json::from_str(&raw)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(err) => Err(AppError::TaskStore(format!(
                "failed to read {}: {err}",
                self.path.display()
            ))),
        }
    }

    async fn save(&self, tasks: Vec<Task>) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&path, &tasks))
            .await
            .map_err(|err| AppError::TaskStore(format!("task store write panicked: {err}")))?
    }
}

fn write_atomically(path: &Path, tasks: &[Task]) -> Result<()> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|err| {
        AppError::TaskStore(format!("failed to create {}: {err}", parent.display()))
    })?;

    let body = serde_json::to_string_pretty(tasks)?;
    let mut tmp = NamedTempFile::new_in(parent)
        .map_err(|err| AppError::TaskStore(format!("failed to create temporary file: {err}")))?;
    tmp.write_all(body.as_bytes())
        .and_then(|()| tmp.write_all(b"\n"))
        .map_err(|err| AppError::TaskStore(format!("failed to write temporary file: {err}")))?;
    tmp.persist(path).map_err(|err| {
        AppError::TaskStore(format!("failed to persist {}: {err}", path.display()))
    })?;
    Ok(())
}

impl TaskStore for JsonTaskStore {
    fn find(&self, id: &str) -> Pin<Box<dyn Future<Output = Result<Option<Task>>> + Send + '_>> {
        let id = id.to_owned();
        Box::pin(async move {
            let tasks = self.load().await?;
            Ok(tasks.into_iter().find(|t| t.id == id))
        })
    }

    fn list(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Task>>> + Send + '_>> {
        Box::pin(self.load())
    }

    fn update_status(
        &self,
        id: &str,
        status: TaskStatus,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let id = id.to_owned();
        Box::pin(async move {
            let _guard = self.write_lock.lock().await;
            let mut tasks = self.load().await?;
            let task = tasks
                .iter_mut()
                .find(|t| t.id == id)
                .ok_or_else(|| AppError::NotFound(format!("task {id} not found")))?;
            task.status = status;
            self.save(tasks).await?;
            info!(task_id = %id, ?status, "task status updated");
            Ok(())
        })
    }
}
