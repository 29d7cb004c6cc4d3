//! Session model and lifecycle helpers.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of an orchestrated session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Not started, or unmonitored.
    #[default]
    Idle,
    /// Worktree and pane are being created.
    Starting,
    /// Pane is live; no recognizable activity on screen.
    Running,
    /// The agent is executing a tool or command.
    Busy,
    /// The agent is waiting for user input.
    Waiting,
    /// Monitoring suspended by the operator; worktree, port and pane kept.
    Paused,
    /// Teardown in progress.
    Stopping,
    /// Teardown finished.
    Stopped,
    /// Unrecoverable failure; terminal until retried or killed.
    Errored,
}

impl SessionState {
    /// Live sessions block a second `start` for the same task.
    #[must_use]
    pub fn is_live(self) -> bool {
        !matches!(self, Self::Stopped | Self::Errored)
    }

    /// States owned by the pane monitor once a session is up.
    #[must_use]
    pub fn is_monitored(self) -> bool {
        matches!(self, Self::Running | Self::Busy | Self::Waiting)
    }

    /// Lowercase label used in logs and CLI output.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Busy => "busy",
            Self::Waiting => "waiting",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Errored => "errored",
        }
    }
}

impl Display for SessionState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// One orchestrated unit of work bound to a task.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Session {
    /// Identifier of the bound task; also the multiplexer session name.
    pub id: String,
    /// Current lifecycle state.
    pub state: SessionState,
    /// Worktree owned by this session while it is active.
    pub worktree_path: PathBuf,
    /// Branch the worktree was cut from.
    pub base_branch: String,
    /// Dev-server port, when one was requested and granted.
    pub port: Option<u16>,
    /// When `start` was accepted.
    pub started_at: DateTime<Utc>,
    /// When `state` last changed.
    pub last_state_change_at: DateTime<Utc>,
    /// Failure that moved the session to `Errored`.
    pub last_error: Option<String>,
}

impl Session {
    /// Construct a session in the `Starting` state.
    #[must_use]
    pub fn starting(id: String, worktree_path: PathBuf, base_branch: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            state: SessionState::Starting,
            worktree_path,
            base_branch,
            port: None,
            started_at: now,
            last_state_change_at: now,
            last_error: None,
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::{
            Busy, Errored, Idle, Paused, Running, Starting, Stopped, Stopping, Waiting,
        };

        matches!(
            (self.state, next),
            (Idle | Stopped | Errored, Starting)
                | (Starting, Running | Errored | Stopping)
                | (
                    Running | Busy | Waiting,
                    Running | Busy | Waiting | Paused | Stopping | Errored
                )
                | (Paused, Running | Stopping)
                | (Errored, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// Move to `next`, stamping the change time. No-op when unchanged.
    ///
    /// Returns `false` when the transition is not permitted.
    pub fn transition_to(&mut self, next: SessionState) -> bool {
        if self.state == next {
            return true;
        }
        if !self.can_transition_to(next) {
            return false;
        }
        self.state = next;
        self.last_state_change_at = Utc::now();
        true
    }
}
