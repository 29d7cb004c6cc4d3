//! Worktree records handed out by the worktree manager.

use std::path::PathBuf;

use serde::Serialize;

/// An isolated checkout owned by one session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct WorktreeRecord {
    /// Session that owns the checkout.
    pub session_id: String,
    /// Absolute path of the checkout.
    pub path: PathBuf,
    /// Branch the session branch was cut from.
    pub base_branch: String,
    /// Branch checked out in the worktree.
    pub branch: String,
}
