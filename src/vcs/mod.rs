//! Version control abstraction for worktree add/remove.

pub mod git;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::Result;

pub use git::GitCli;

/// Worktree operations the orchestrator needs from version control.
pub trait VersionControl: Send + Sync {
    /// Check out `branch` into a new worktree at `path`.
    ///
    /// The branch is created from `base_branch` when it does not exist yet.
    /// An existing branch is checked out as is and `base_branch` is only
    /// checked for existence.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Vcs`](crate::AppError::Vcs) if the base branch is
    /// unknown or the worktree cannot be added.
    fn add_worktree(
        &self,
        path: &Path,
        branch: &str,
        base_branch: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Remove the worktree at `path` and its registration.
    ///
    /// With `force`, local modifications are discarded.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Vcs`](crate::AppError::Vcs) if removal fails,
    /// including a dirty worktree when `force` is `false`.
    fn remove_worktree(
        &self,
        path: &Path,
        force: bool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Drop registrations of worktrees whose directories are gone.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Vcs`](crate::AppError::Vcs) if pruning fails.
    fn prune_worktrees(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}
