//! Terminal multiplexer abstraction.
//!
//! The [`Multiplexer`] trait is the only way the orchestrator touches a
//! live terminal: sessions are created, fed keystrokes, captured and killed
//! by name. The session name always equals the bound task identifier.

pub mod tmux;

use std::future::Future;
use std::path::Path;
use std::pin::Pin;

use crate::Result;

pub use tmux::TmuxMultiplexer;

/// Interface to a persistent terminal multiplexer.
pub trait Multiplexer: Send + Sync {
    /// Whether a session with exactly this name exists.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Multiplexer`](crate::AppError::Multiplexer) if the
    /// multiplexer cannot be queried at all.
    fn has_session(&self, name: &str) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>>;

    /// Create a detached session whose first pane starts in `cwd`.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Multiplexer`](crate::AppError::Multiplexer) if the
    /// session cannot be created (name taken, bad directory, no binary).
    fn new_session(
        &self,
        name: &str,
        cwd: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Type `text` literally into the session's active pane, then press Enter.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Multiplexer`](crate::AppError::Multiplexer) if the
    /// keys cannot be delivered.
    fn send_keys(
        &self,
        name: &str,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Return the last `line_count` lines shown in the session's active pane.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Multiplexer`](crate::AppError::Multiplexer) if the
    /// pane does not exist (yet) or cannot be read.
    fn capture_pane(
        &self,
        name: &str,
        line_count: u32,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>>;

    /// Kill the session and every process running in it.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Multiplexer`](crate::AppError::Multiplexer) if the
    /// session exists but cannot be killed.
    fn kill_session(&self, name: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Hand the calling terminal to the session until the user detaches.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Multiplexer`](crate::AppError::Multiplexer) if the
    /// attach command fails or exits unsuccessfully.
    fn attach_session(&self, name: &str)
        -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Names of all existing sessions.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Multiplexer`](crate::AppError::Multiplexer) if the
    /// multiplexer cannot be queried.
    fn list_sessions(&self) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + '_>>;
}
