//! Per-session worktree lifecycle.
//!
//! Each session gets `<worktree_root>/<session_id>` checked out on branch
//! `<branch_prefix><session_id>`. A failed create leaves neither a
//! directory nor a registered worktree behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::models::worktree::WorktreeRecord;
use crate::vcs::VersionControl;
use crate::{AppError, Result};

/// Longest accepted session identifier.
const MAX_SESSION_ID_LEN: usize = 64;

/// Creates and destroys session worktrees through a [`VersionControl`].
pub struct WorktreeManager {
    vcs: Arc<dyn VersionControl>,
    root: PathBuf,
    branch_prefix: String,
}

impl std::fmt::Debug for WorktreeManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorktreeManager")
            .field("root", &self.root)
            .field("branch_prefix", &self.branch_prefix)
            .finish_non_exhaustive()
    }
}

impl WorktreeManager {
    /// Create a manager placing worktrees under `root`.
    #[must_use]
    pub fn new(
        vcs: Arc<dyn VersionControl>,
        root: impl Into<PathBuf>,
        branch_prefix: impl Into<String>,
    ) -> Self {
        Self {
            vcs,
            root: root.into(),
            branch_prefix: branch_prefix.into(),
        }
    }

    /// Directory holding all session worktrees.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Worktree path for `session_id`.
    #[must_use]
    pub fn path_for(&self, session_id: &str) -> PathBuf {
        self.root.join(session_id)
    }

    /// Branch name for `session_id`.
    #[must_use]
    pub fn branch_for(&self, session_id: &str) -> String {
        format!("{}{session_id}", self.branch_prefix)
    }

    /// Create the worktree for `session_id` from `base_branch`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Vcs` if the identifier is not a valid directory
    /// and branch name, the target path already holds files, or the VCS
    /// rejects the add. Partial state is cleaned up before returning.
    pub async fn create(&self, session_id: &str, base_branch: &str) -> Result<WorktreeRecord> {
        validate_session_id(session_id)?;
        let path = self.path_for(session_id);
        let branch = self.branch_for(session_id);

        if dir_has_entries(&path).await? {
            return Err(AppError::Vcs(format!(
                "worktree path {} already exists and is not empty",
                path.display()
            )));
        }
        let existed = tokio::fs::try_exists(&path).await.unwrap_or(false);

        tokio::fs::create_dir_all(&self.root).await.map_err(|err| {
            AppError::Vcs(format!("failed to create {}: {err}", self.root.display()))
        })?;

        if let Err(err) = self.vcs.add_worktree(&path, &branch, base_branch).await {
            warn!(session_id, %err, "worktree add failed, cleaning up");
            self.discard_partial(&path, existed).await;
            return Err(err);
        }

        info!(session_id, path = %path.display(), %branch, base_branch, "worktree created");
        Ok(WorktreeRecord {
            session_id: session_id.to_owned(),
            path,
            base_branch: base_branch.to_owned(),
            branch,
        })
    }

    /// Remove the worktree for `session_id`.
    ///
    /// With `preserve` set, removal refuses to discard local changes.
    /// Removing a worktree that does not exist is a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Vcs` if the identifier is invalid or the worktree
    /// could not be removed.
    pub async fn remove(&self, session_id: &str, preserve: bool) -> Result<()> {
        validate_session_id(session_id)?;
        let path = self.path_for(session_id);

        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            debug!(session_id, "worktree already gone");
            self.prune().await;
            return Ok(());
        }

        match self.vcs.remove_worktree(&path, !preserve).await {
            Ok(()) => {}
            Err(err) if preserve => return Err(err),
            Err(err) => {
                // Not a registered worktree (or git refused); drop the directory.
                warn!(session_id, %err, "worktree remove failed, deleting directory");
                tokio::fs::remove_dir_all(&path).await.map_err(|io_err| {
                    AppError::Vcs(format!(
                        "failed to delete {}: {io_err} (after: {err})",
                        path.display()
                    ))
                })?;
            }
        }

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            if let Err(err) = tokio::fs::remove_dir_all(&path).await {
                warn!(session_id, %err, "leftover worktree directory not removed");
            }
        }
        self.prune().await;

        info!(session_id, preserve, "worktree removed");
        Ok(())
    }

    async fn discard_partial(&self, path: &Path, existed: bool) {
        if let Err(err) = self.vcs.remove_worktree(path, true).await {
            debug!(%err, "no registered worktree to discard");
        }
        if !existed && tokio::fs::try_exists(path).await.unwrap_or(false) {
            if let Err(err) = tokio::fs::remove_dir_all(path).await {
                warn!(path = %path.display(), %err, "partial worktree directory not removed");
            }
        }
        self.prune().await;
    }

    /// Drop VCS registrations of worktrees whose directories are gone.
    pub async fn prune(&self) {
        if let Err(err) = self.vcs.prune_worktrees().await {
            debug!(%err, "worktree prune failed");
        }
    }
}

/// Check that `session_id` is usable as a directory, branch suffix and
/// multiplexer session name.
///
/// # Errors
///
/// Returns `AppError::Vcs` describing the offending identifier.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    if session_id.is_empty() {
        return Err(AppError::Vcs("session id must not be empty".into()));
    }
    if session_id.len() > MAX_SESSION_ID_LEN {
        return Err(AppError::Vcs(format!(
            "session id exceeds {MAX_SESSION_ID_LEN} characters"
        )));
    }
    if session_id.starts_with('-') {
        return Err(AppError::Vcs(format!(
            "session id {session_id:?} must not start with '-'"
        )));
    }
    if let Some(bad) = session_id
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
    {
        return Err(AppError::Vcs(format!(
            "session id {session_id:?} contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

async fn dir_has_entries(path: &Path) -> Result<bool> {
    let inspect_err =
        |err: std::io::Error| AppError::Vcs(format!("failed to inspect {}: {err}", path.display()));

    match tokio::fs::metadata(path).await {
        Ok(meta) if !meta.is_dir() => return Ok(true),
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(inspect_err(err)),
    }

    let mut entries = tokio::fs::read_dir(path).await.map_err(inspect_err)?;
    Ok(entries.next_entry().await.map_err(inspect_err)?.is_some())
}
