//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
#[derive(Debug)]
pub enum AppError {
    /// Requested session or task does not exist.
    NotFound(String),
    /// A live session already exists for the task.
    AlreadyExists(String),
    /// A bounded resource pool (ports) has no free slot left.
    ResourceExhausted(String),
    /// Git worktree operation failed.
    Vcs(String),
    /// Terminal multiplexer create/capture/send/kill failed.
    Multiplexer(String),
    /// Operation aborted because the session was torn down underneath it.
    Cancelled(String),
    /// Lifecycle command is not valid for the session's current state.
    InvalidTransition(String),
    /// Task store read or write failure.
    TaskStore(String),
    /// Configuration parsing or validation failure.
    Config(String),
    /// File-system or I/O operation failure.
    Io(String),
    /// One or more teardown steps failed; every step was still attempted.
    Teardown(Vec<AppError>),
}

impl AppError {
    /// Whether this error (or any error it aggregates) is a VCS failure.
    #[must_use]
    pub fn involves_vcs(&self) -> bool {
        match self {
            Self::Vcs(_) => true,
            Self::Teardown(errors) => errors.iter().any(Self::involves_vcs),
            _ => false,
        }
    }
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound(msg) => write!(f, "not found: {msg}"),
            Self::AlreadyExists(msg) => write!(f, "already exists: {msg}"),
            Self::ResourceExhausted(msg) => write!(f, "resource exhausted: {msg}"),
            Self::Vcs(msg) => write!(f, "vcs: {msg}"),
            Self::Multiplexer(msg) => write!(f, "multiplexer: {msg}"),
            Self::Cancelled(msg) => write!(f, "cancelled: {msg}"),
            Self::InvalidTransition(msg) => write!(f, "invalid transition: {msg}"),
            Self::TaskStore(msg) => write!(f, "task store: {msg}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
            Self::Teardown(errors) => {
                write!(f, "teardown: {} step(s) failed", errors.len())?;
                for err in errors {
                    write!(f, "; {err}")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::TaskStore(format!("invalid task file: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}
