//! Global configuration parsing and validation.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Port allocation settings for session dev servers.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PortConfig {
    /// First candidate port scanned by the allocator.
    #[serde(default = "default_port_base")]
    pub base: u16,
    /// Number of candidate ports tried before giving up.
    #[serde(default = "default_port_attempts")]
    pub max_attempts: u32,
}

impl Default for PortConfig {
    fn default() -> Self {
        Self {
            base: default_port_base(),
            max_attempts: default_port_attempts(),
        }
    }
}

/// Pane polling settings for the session state monitor.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MonitorConfig {
    /// Delay between two pane captures.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Number of trailing pane lines captured per poll.
    #[serde(default = "default_capture_lines")]
    pub capture_lines: u32,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            capture_lines: default_capture_lines(),
        }
    }
}

impl MonitorConfig {
    /// Poll interval as a [`Duration`].
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Terminal multiplexer settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct MultiplexerConfig {
    /// Multiplexer binary (`tmux`).
    #[serde(default = "default_mux_binary")]
    pub binary: String,
    /// Command typed into a fresh pane to launch the agent; empty disables it.
    #[serde(default = "default_agent_command")]
    pub agent_command: String,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            binary: default_mux_binary(),
            agent_command: default_agent_command(),
        }
    }
}

/// Optional overrides for the pane classifier rule set.
///
/// Empty lists keep the built-in patterns for that state.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct ClassifierConfig {
    /// Regexes that mark a pane as waiting for user input.
    #[serde(default)]
    pub waiting_patterns: Vec<String>,
    /// Regexes that mark a pane as actively working.
    #[serde(default)]
    pub busy_patterns: Vec<String>,
}

fn default_port_base() -> u16 {
    3000
}

fn default_port_attempts() -> u32 {
    100
}

fn default_poll_interval_ms() -> u64 {
    500
}

fn default_capture_lines() -> u32 {
    100
}

fn default_mux_binary() -> String {
    "tmux".into()
}

fn default_agent_command() -> String {
    "claude".into()
}

fn default_repo_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_worktree_root() -> PathBuf {
    PathBuf::from(".foreman/worktrees")
}

fn default_task_file() -> PathBuf {
    PathBuf::from(".foreman/tasks.json")
}

fn default_base_branch() -> String {
    "main".into()
}

fn default_branch_prefix() -> String {
    "foreman/".into()
}

fn default_true() -> bool {
    true
}

/// Global configuration parsed from `agent-foreman.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Repository the session worktrees are cut from.
    #[serde(default = "default_repo_root")]
    pub repo_root: PathBuf,
    /// Directory holding one worktree per session.
    #[serde(default = "default_worktree_root")]
    pub worktree_root: PathBuf,
    /// JSON file backing the task store.
    #[serde(default = "default_task_file")]
    pub task_file: PathBuf,
    /// Branch new worktrees are created from.
    #[serde(default = "default_base_branch")]
    pub base_branch: String,
    /// Prefix for per-session branch names.
    #[serde(default = "default_branch_prefix")]
    pub branch_prefix: String,
    /// Whether `kill` removes the session's worktree by default.
    #[serde(default = "default_true")]
    pub remove_worktree_on_kill: bool,
    /// Whether sessions request a dev-server port by default.
    #[serde(default)]
    pub dev_server: bool,
    /// Port allocator settings.
    #[serde(default)]
    pub ports: PortConfig,
    /// State monitor settings.
    #[serde(default)]
    pub monitor: MonitorConfig,
    /// Terminal multiplexer settings.
    #[serde(default)]
    pub multiplexer: MultiplexerConfig,
    /// Classifier rule overrides.
    #[serde(default)]
    pub classifier: ClassifierConfig,
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// Relative `worktree_root` and `task_file` paths are resolved against
    /// the canonical `repo_root`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Canonical repository root.
    #[must_use]
    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    fn validate(&mut self) -> Result<()> {
        if self.ports.base == 0 {
            return Err(AppError::Config("ports.base must be greater than zero".into()));
        }

        if self.ports.max_attempts == 0 {
            return Err(AppError::Config(
                "ports.max_attempts must be greater than zero".into(),
            ));
        }

        if self.monitor.poll_interval_ms == 0 {
            return Err(AppError::Config(
                "monitor.poll_interval_ms must be greater than zero".into(),
            ));
        }

        if self.monitor.capture_lines == 0 {
            return Err(AppError::Config(
                "monitor.capture_lines must be greater than zero".into(),
            ));
        }

        if self.multiplexer.binary.trim().is_empty() {
            return Err(AppError::Config("multiplexer.binary must not be empty".into()));
        }

        if self.base_branch.trim().is_empty() {
            return Err(AppError::Config("base_branch must not be empty".into()));
        }

        for pattern in self
            .classifier
            .waiting_patterns
            .iter()
            .chain(&self.classifier.busy_patterns)
        {
            regex::Regex::new(pattern).map_err(|err| {
                AppError::Config(format!("invalid classifier pattern {pattern:?}: {err}"))
            })?;
        }

        let canonical_root = self
            .repo_root
            .canonicalize()
            .map_err(|err| AppError::Config(format!("repo_root invalid: {err}")))?;
        self.repo_root = canonical_root;

        if self.worktree_root.is_relative() {
            self.worktree_root = self.repo_root.join(&self.worktree_root);
        }
        if self.task_file.is_relative() {
            self.task_file = self.repo_root.join(&self.task_file);
        }

        Ok(())
    }
}
