//! Domain model module declarations.

pub mod session;
pub mod task;
pub mod worktree;
