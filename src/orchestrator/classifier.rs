//! Pane text classification.
//!
//! Maps a captured pane snapshot to a [`SessionState`]. The rule set is
//! heuristic and versioned so a change in agent UI can be met with a new
//! classifier without touching the monitor.
//!
//! Precedence on the trailing lines of the pane:
//!
//! 1. a confirmation prompt or input request with no activity marker below
//!    it ⇒ [`SessionState::Waiting`]
//! 2. a spinner, interrupt hint or running-command marker ⇒ [`SessionState::Busy`]
//! 3. nothing printable ⇒ [`SessionState::Idle`]
//! 4. anything else ⇒ [`SessionState::Running`]
//!
//! An answered prompt stays on screen while the agent works on, so a
//! prompt only counts while nothing busy has been printed after it.

use regex::Regex;

use crate::config::ClassifierConfig;
use crate::models::session::SessionState;
use crate::{AppError, Result};

/// Version label of the built-in rule set.
pub const PATTERNS_VERSION: &str = "patterns-v1";

/// Number of trailing non-empty lines the rules look at.
const TAIL_LINES: usize = 15;

/// Built-in input-request markers.
pub const DEFAULT_WAITING_PATTERNS: &[&str] = &[
    r"\[[Yy]/[Nn]\]",
    r"\([Yy]/[Nn]\)",
    r"(?i)\[yes/no\]",
    r"Do you want to",
    r"\bAllow\?",
    r"\bProceed\?",
    r"(?i)press enter to",
    r"❯\s*1\.\s*Yes",
    r"(?i)waiting for (your )?input",
];

/// Built-in activity markers.
pub const DEFAULT_BUSY_PATTERNS: &[&str] = &[
    r"(?i)esc to interrupt",
    r"[⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏]",
    r"Running…",
    r"\bRunning:",
    r"\bExecuting:",
];

/// ANSI CSI / OSC / charset sequences.
const ANSI_PATTERN: &str = r"\x1b\[[0-9;?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[()][A-Za-z0-9]";

/// Strategy turning pane text into a session state.
pub trait PaneClassifier: Send + Sync {
    /// Rule-set identifier, logged with every monitor.
    fn version(&self) -> &str;

    /// Classify a pane snapshot.
    fn classify(&self, pane_text: &str) -> SessionState;
}

/// Regex-driven classifier.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    version: String,
    waiting: Vec<Regex>,
    busy: Vec<Regex>,
    ansi: Option<Regex>,
}

impl PatternClassifier {
    /// Classifier using the built-in rule set.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: PATTERNS_VERSION.to_owned(),
            waiting: compile_builtin(DEFAULT_WAITING_PATTERNS),
            busy: compile_builtin(DEFAULT_BUSY_PATTERNS),
            ansi: Regex::new(ANSI_PATTERN).ok(),
        }
    }

    /// Classifier with custom patterns. An empty list keeps the built-in
    /// patterns for that state.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a pattern does not compile.
    pub fn with_patterns(waiting: &[String], busy: &[String]) -> Result<Self> {
        let mut classifier = Self::new();
        if !waiting.is_empty() {
            classifier.waiting = compile(waiting)?;
        }
        if !busy.is_empty() {
            classifier.busy = compile(busy)?;
        }
        if !waiting.is_empty() || !busy.is_empty() {
            classifier.version = format!("{PATTERNS_VERSION}+custom");
        }
        Ok(classifier)
    }

    /// Classifier from the `[classifier]` configuration section.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if a configured pattern does not compile.
    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        Self::with_patterns(&config.waiting_patterns, &config.busy_patterns)
    }

    /// Number of compiled waiting and busy rules.
    #[must_use]
    pub fn rule_counts(&self) -> (usize, usize) {
        (self.waiting.len(), self.busy.len())
    }

    fn strip_ansi<'a>(&self, text: &'a str) -> std::borrow::Cow<'a, str> {
        match &self.ansi {
            Some(ansi) => ansi.replace_all(text, ""),
            None => std::borrow::Cow::Borrowed(text),
        }
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl PaneClassifier for PatternClassifier {
    fn version(&self) -> &str {
        &self.version
    }

    fn classify(&self, pane_text: &str) -> SessionState {
        let clean = self.strip_ansi(pane_text);
        let mut tail: Vec<&str> = clean
            .lines()
            .rev()
            .filter(|line| !line.trim().is_empty())
            .take(TAIL_LINES)
            .collect();
        if tail.is_empty() {
            return SessionState::Idle;
        }
        tail.reverse();

        let last_match = |rules: &[Regex]| {
            tail.iter()
                .rposition(|line| rules.iter().any(|rule| rule.is_match(line)))
        };

        match (last_match(&self.waiting), last_match(&self.busy)) {
            (Some(prompt), Some(activity)) if activity > prompt => SessionState::Busy,
            (Some(_), _) => SessionState::Waiting,
            (None, Some(_)) => SessionState::Busy,
            (None, None) => SessionState::Running,
        }
    }
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|err| {
                AppError::Config(format!("invalid classifier pattern {pattern:?}: {err}"))
            })
        })
        .collect()
}

fn compile_builtin(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}
