//! `git` CLI implementation of [`VersionControl`].

use std::ffi::OsStr;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::{Output, Stdio};
use std::time::Instant;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::vcs::VersionControl;
use crate::{AppError, Result};

/// Runs `git` inside one repository.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_root: PathBuf,
}

impl GitCli {
    /// Create a git driver rooted at `repo_root`.
    #[must_use]
    pub fn new(repo_root: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
        }
    }

    /// Repository the driver operates on.
    #[must_use]
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    async fn git<I, S>(&self, args: I) -> Result<Output>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        let start = Instant::now();
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_root)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|err| AppError::Vcs(format!("failed to run git: {err}")))?;
        debug!(
            elapsed_ms = start.elapsed().as_millis(),
            status = %output.status,
            "git command finished"
        );
        Ok(output)
    }

    async fn ref_exists(&self, reference: &str) -> Result<bool> {
        let output = self
            .git(["rev-parse", "--verify", "--quiet", reference])
            .await?;
        Ok(output.status.success())
    }
}

fn failure(what: &str, output: &Output) -> AppError {
    AppError::Vcs(format!(
        "{what} failed: {}",
        String::from_utf8_lossy(&output.stderr).trim()
    ))
}

impl VersionControl for GitCli {
    fn add_worktree(
        &self,
        path: &Path,
        branch: &str,
        base_branch: &str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let path = path.to_path_buf();
        let branch = branch.to_owned();
        let base_branch = base_branch.to_owned();
        Box::pin(async move {
            if !self.ref_exists(&format!("{base_branch}^{{commit}}")).await? {
                return Err(AppError::Vcs(format!(
                    "base branch {base_branch} does not exist"
                )));
            }

            // Reuse the session branch when a previous run left it behind so
            // committed work survives a kill/start cycle.
            let output = if self.ref_exists(&format!("refs/heads/{branch}")).await? {
                warn!(
                    %branch,
                    %base_branch,
                    "session branch already exists, reusing it; base branch ignored"
                );
                self.git([
                    OsStr::new("worktree"),
                    OsStr::new("add"),
                    path.as_os_str(),
                    OsStr::new(&branch),
                ])
                .await?
            } else {
                self.git([
                    OsStr::new("worktree"),
                    OsStr::new("add"),
                    OsStr::new("-b"),
                    OsStr::new(&branch),
                    path.as_os_str(),
                    OsStr::new(&base_branch),
                ])
                .await?
            };

            if output.status.success() {
                Ok(())
            } else {
                Err(failure("git worktree add", &output))
            }
        })
    }

    fn remove_worktree(
        &self,
        path: &Path,
        force: bool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let path = path.to_path_buf();
        Box::pin(async move {
            let mut args = vec![OsStr::new("worktree"), OsStr::new("remove")];
            if force {
                args.push(OsStr::new("--force"));
            }
            args.push(path.as_os_str());

            let output = self.git(args).await?;
            if output.status.success() {
                Ok(())
            } else {
                Err(failure("git worktree remove", &output))
            }
        })
    }

    fn prune_worktrees(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let output = self.git(["worktree", "prune"]).await?;
            if output.status.success() {
                Ok(())
            } else {
                Err(failure("git worktree prune", &output))
            }
        })
    }
}
