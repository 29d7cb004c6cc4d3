//! Task records read from the task store.

use serde::{Deserialize, Serialize};

/// Workflow status of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Not started.
    #[default]
    Todo,
    /// A session is (or was) working on it.
    InProgress,
    /// Finished.
    Done,
    /// Waiting on something outside the task.
    Blocked,
}

impl TaskStatus {
    /// Label matching the serialized form.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Todo => "todo",
            Self::InProgress => "in_progress",
            Self::Done => "done",
            Self::Blocked => "blocked",
        }
    }
}

/// Kind of work item.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// New functionality.
    #[default]
    Feature,
    /// Defect fix.
    Bug,
    /// Maintenance work.
    Chore,
    /// Container for child tasks.
    Epic,
}

/// A unit of work a session can be bound to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct Task {
    /// Stable identifier; doubles as the session and tmux session name.
    pub id: String,
    /// Short human-readable title.
    pub title: String,
    /// Current workflow status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Kind of work.
    #[serde(default, rename = "type")]
    pub kind: TaskKind,
    /// Parent task in the hierarchy, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Task {
    /// Construct a `Todo` feature task.
    #[must_use]
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            status: TaskStatus::Todo,
            kind: TaskKind::Feature,
            parent_id: None,
        }
    }
}
