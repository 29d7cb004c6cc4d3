//! `tmux` implementation of [`Multiplexer`].
//!
//! Every call shells out to the configured tmux binary. Session targets use
//! the `=name` form so that tmux never falls back to prefix matching (a
//! session `t1` must not resolve to `t10`).

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::process::{Output, Stdio};

use tokio::process::Command;
use tracing::debug;

use crate::mux::Multiplexer;
use crate::{AppError, Result};

/// Multiplexer backed by the `tmux` CLI.
#[derive(Debug, Clone)]
pub struct TmuxMultiplexer {
    binary: String,
}

impl TmuxMultiplexer {
    /// Create a multiplexer that invokes `binary` (usually `tmux`).
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn run(&self, args: &[&str]) -> Result<Output> {
        debug!(binary = %self.binary, ?args, "running tmux");
        Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| AppError::Multiplexer(format!("failed to run {}: {err}", self.binary)))
    }

    async fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args).await?;
        if output.status.success() {
            Ok(output)
        } else {
            Err(AppError::Multiplexer(format!(
                "tmux {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            )))
        }
    }
}

impl Default for TmuxMultiplexer {
    fn default() -> Self {
        Self::new("tmux")
    }
}

/// Exact-match session target.
fn exact(name: &str) -> String {
    format!("={name}")
}

/// Exact-match target for the active pane of a session.
fn pane(name: &str) -> String {
    format!("={name}:")
}

/// tmux reports a missing server as an error; for listing it means "none".
fn is_no_server(stderr: &str) -> bool {
    stderr.contains("no server running") || stderr.contains("error connecting to")
}

impl Multiplexer for TmuxMultiplexer {
    fn has_session(&self, name: &str) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + '_>> {
        let target = exact(name);
        Box::pin(async move {
            let output = self.run(&["has-session", "-t", &target]).await?;
            Ok(output.status.success())
        })
    }

    fn new_session(
        &self,
        name: &str,
        cwd: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let name = name.to_owned();
        let cwd = cwd.to_string_lossy().into_owned();
        Box::pin(async move {
            self.run_checked(&["new-session", "-d", "-s", &name, "-c", &cwd])
                .await?;
            Ok(())
        })
    }

    fn send_keys(
        &self,
        name: &str,
        text: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let target = pane(name);
        let text = text.to_owned();
        Box::pin(async move {
            self.run_checked(&["send-keys", "-t", &target, "-l", &text])
                .await?;
            self.run_checked(&["send-keys", "-t", &target, "Enter"])
                .await?;
            Ok(())
        })
    }

    fn capture_pane(
        &self,
        name: &str,
        line_count: u32,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + '_>> {
        let target = pane(name);
        let start = format!("-{line_count}");
        Box::pin(async move {
            let output = self
                .run_checked(&["capture-pane", "-p", "-J", "-t", &target, "-S", &start])
                .await?;
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        })
    }

    fn kill_session(&self, name: &str) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let target = exact(name);
        Box::pin(async move {
            self.run_checked(&["kill-session", "-t", &target]).await?;
            Ok(())
        })
    }

    fn attach_session(
        &self,
        name: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let target = exact(name);
        Box::pin(async move {
            // Inside tmux a nested attach is refused; switch the client instead.
            let subcommand = if std::env::var_os("TMUX").is_some() {
                "switch-client"
            } else {
                "attach-session"
            };

            let status = Command::new(&self.binary)
                .args([subcommand, "-t", &target])
                .stdin(Stdio::inherit())
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .status()
                .await
                .map_err(|err| {
                    AppError::Multiplexer(format!("failed to run {}: {err}", self.binary))
                })?;

            if status.success() {
                Ok(())
            } else {
                Err(AppError::Multiplexer(format!(
                    "tmux {subcommand} exited with {status}"
                )))
            }
        })
    }

    fn list_sessions(&self) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + '_>> {
        Box::pin(async move {
            let output = self
                .run(&["list-sessions", "-F", "#{session_name}"])
                .await?;

            if !output.status.success() {
                let stderr = String::from_utf8_lossy(&output.stderr);
                if is_no_server(&stderr) {
                    return Ok(Vec::new());
                }
                return Err(AppError::Multiplexer(format!(
                    "tmux list-sessions failed: {}",
                    stderr.trim()
                )));
            }

            Ok(String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_owned)
                .collect())
        })
    }
}
