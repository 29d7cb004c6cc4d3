#![forbid(unsafe_code)]

//! Orchestrates parallel coding-agent sessions, each bound to a task and
//! running in its own git worktree and tmux session, with session state
//! inferred from the pane's live terminal output.

pub mod config;
pub mod errors;
pub mod models;
pub mod mux;
pub mod notify;
pub mod orchestrator;
pub mod tasks;
pub mod vcs;

pub use config::GlobalConfig;
pub use errors::{AppError, Result};
