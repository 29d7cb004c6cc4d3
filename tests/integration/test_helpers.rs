//! Shared fakes and harness for coordinator-level integration tests.
//!
//! `FakeMultiplexer` and `FakeVcs` record every call and can be told to
//! fail, so tests can drive the coordinator through its rollback paths
//! without tmux or git installed.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use agent_foreman::config::GlobalConfig;
use agent_foreman::models::session::SessionState;
use agent_foreman::models::task::Task;
use agent_foreman::mux::Multiplexer;
use agent_foreman::notify::{ChannelSink, StateNotification};
use agent_foreman::orchestrator::{Collaborators, Coordinator};
use agent_foreman::tasks::InMemoryTaskStore;
use agent_foreman::vcs::VersionControl;
use agent_foreman::{AppError, Result};
use tempfile::TempDir;
use tokio::sync::{mpsc, Notify};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

// ── Multiplexer ──────────────────────────────────────────

#[derive(Default)]
struct MuxState {
    sessions: HashMap<String, PathBuf>,
    screens: HashMap<String, String>,
    sent: Vec<(String, String)>,
    killed: Vec<String>,
    attached: Vec<String>,
    new_session_calls: usize,
    fail_new_session: bool,
    fail_send_keys: bool,
    new_session_gate: Option<Arc<Notify>>,
}

/// In-memory multiplexer with scriptable pane contents.
#[derive(Default)]
pub struct FakeMultiplexer {
    state: Mutex<MuxState>,
}

impl FakeMultiplexer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with<T>(&self, f: impl FnOnce(&mut MuxState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    /// Replace what `capture_pane` returns for `name`.
    pub fn set_screen(&self, name: &str, text: &str) {
        self.with(|s| s.screens.insert(name.to_owned(), text.to_owned()));
    }

    /// Register a session as if an earlier process had created it.
    pub fn add_existing(&self, name: &str, cwd: &Path) {
        self.with(|s| s.sessions.insert(name.to_owned(), cwd.to_path_buf()));
    }

    /// Make the pane disappear without going through `kill_session`.
    pub fn vanish(&self, name: &str) {
        self.with(|s| s.sessions.remove(name));
    }

    pub fn fail_new_session(&self, fail: bool) {
        self.with(|s| s.fail_new_session = fail);
    }

    pub fn fail_send_keys(&self, fail: bool) {
        self.with(|s| s.fail_send_keys = fail);
    }

    /// Hold every `new_session` call until `gate` is notified.
    pub fn gate_new_session(&self, gate: Arc<Notify>) {
        self.with(|s| s.new_session_gate = Some(gate));
    }

    pub fn has(&self, name: &str) -> bool {
        self.with(|s| s.sessions.contains_key(name))
    }

    pub fn cwd_of(&self, name: &str) -> Option<PathBuf> {
        self.with(|s| s.sessions.get(name).cloned())
    }

    pub fn sent_to(&self, name: &str) -> Vec<String> {
        self.with(|s| {
            s.sent
                .iter()
                .filter(|(n, _)| n == name)
                .map(|(_, text)| text.clone())
                .collect()
        })
    }

    pub fn killed(&self) -> Vec<String> {
        self.with(|s| s.killed.clone())
    }

    pub fn attached(&self) -> Vec<String> {
        self.with(|s| s.attached.clone())
    }

    pub fn new_session_calls(&self) -> usize {
        self.with(|s| s.new_session_calls)
    }
}

impl Multiplexer for FakeMultiplexer {
    fn has_session(&self, name: &str) -> BoxFuture<'_, Result<bool>> {
        let found = self.has(name);
        Box::pin(async move { Ok(found) })
    }

    fn new_session(&self, name: &str, cwd: &Path) -> BoxFuture<'_, Result<()>> {
        let name = name.to_owned();
        let cwd = cwd.to_path_buf();
        Box::pin(async move {
            let gate = self.with(|s| {
                s.new_session_calls += 1;
                s.new_session_gate.clone()
            });
            if let Some(gate) = gate {
                gate.notified().await;
            }
            self.with(|s| {
                if s.fail_new_session {
                    return Err(AppError::Multiplexer("new-session refused".into()));
                }
                if s.sessions.contains_key(&name) {
                    return Err(AppError::Multiplexer(format!("duplicate session: {name}")));
                }
                s.sessions.insert(name, cwd);
                Ok(())
            })
        })
    }

    fn send_keys(&self, name: &str, text: &str) -> BoxFuture<'_, Result<()>> {
        let name = name.to_owned();
        let text = text.to_owned();
        Box::pin(async move {
            self.with(|s| {
                if s.fail_send_keys {
                    return Err(AppError::Multiplexer("send-keys refused".into()));
                }
                if !s.sessions.contains_key(&name) {
                    return Err(AppError::Multiplexer(format!("can't find pane: {name}")));
                }
                s.sent.push((name, text));
                Ok(())
            })
        })
    }

    fn capture_pane(&self, name: &str, _line_count: u32) -> BoxFuture<'_, Result<String>> {
        let name = name.to_owned();
        Box::pin(async move {
            self.with(|s| {
                if !s.sessions.contains_key(&name) {
                    return Err(AppError::Multiplexer(format!("can't find pane: {name}")));
                }
                Ok(s.screens.get(&name).cloned().unwrap_or_default())
            })
        })
    }

    fn kill_session(&self, name: &str) -> BoxFuture<'_, Result<()>> {
        let name = name.to_owned();
        Box::pin(async move {
            self.with(|s| {
                if s.sessions.remove(&name).is_none() {
                    return Err(AppError::Multiplexer(format!("can't find session: {name}")));
                }
                s.killed.push(name);
                Ok(())
            })
        })
    }

    fn attach_session(&self, name: &str) -> BoxFuture<'_, Result<()>> {
        let name = name.to_owned();
        Box::pin(async move {
            self.with(|s| s.attached.push(name));
            Ok(())
        })
    }

    fn list_sessions(&self) -> BoxFuture<'_, Result<Vec<String>>> {
        Box::pin(async move {
            let mut names: Vec<String> = self.with(|s| s.sessions.keys().cloned().collect());
            names.sort();
            Ok(names)
        })
    }
}

// ── Version control ──────────────────────────────────────

#[derive(Default)]
struct VcsState {
    worktrees: HashSet<PathBuf>,
    dirty: HashSet<PathBuf>,
    fail_add: bool,
    adds: usize,
}

/// Version control fake that creates real directories on disk.
#[derive(Default)]
pub struct FakeVcs {
    state: Mutex<VcsState>,
}

impl FakeVcs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn with<T>(&self, f: impl FnOnce(&mut VcsState) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    /// Make `add_worktree` create the directory and then fail.
    pub fn fail_add(&self, fail: bool) {
        self.with(|s| s.fail_add = fail);
    }

    /// Give the worktree at `path` uncommitted changes.
    pub fn mark_dirty(&self, path: &Path) {
        self.with(|s| s.dirty.insert(path.to_path_buf()));
    }

    pub fn is_registered(&self, path: &Path) -> bool {
        self.with(|s| s.worktrees.contains(path))
    }

    pub fn adds(&self) -> usize {
        self.with(|s| s.adds)
    }
}

impl VersionControl for FakeVcs {
    fn add_worktree(
        &self,
        path: &Path,
        branch: &str,
        base_branch: &str,
    ) -> BoxFuture<'_, Result<()>> {
        let path = path.to_path_buf();
        let branch = branch.to_owned();
        let base_branch = base_branch.to_owned();
        Box::pin(async move {
            self.with(|s| s.adds += 1);
            if base_branch != "main" {
                return Err(AppError::Vcs(format!(
                    "base branch {base_branch} does not exist"
                )));
            }
            std::fs::create_dir_all(&path)?;
            if self.with(|s| s.fail_add) {
                return Err(AppError::Vcs(format!("could not check out {branch}")));
            }
            std::fs::write(path.join("README.md"), format!("branch {branch}\n"))?;
            self.with(|s| s.worktrees.insert(path));
            Ok(())
        })
    }

    fn remove_worktree(&self, path: &Path, force: bool) -> BoxFuture<'_, Result<()>> {
        let path = path.to_path_buf();
        Box::pin(async move {
            let outcome = self.with(|s| {
                if !s.worktrees.contains(&path) {
                    return Err(AppError::Vcs(format!(
                        "{} is not a working tree",
                        path.display()
                    )));
                }
                if !force && s.dirty.contains(&path) {
                    return Err(AppError::Vcs(format!(
                        "{} contains modified or untracked files",
                        path.display()
                    )));
                }
                s.worktrees.remove(&path);
                s.dirty.remove(&path);
                Ok(())
            });
            outcome?;
            std::fs::remove_dir_all(&path)?;
            Ok(())
        })
    }

    fn prune_worktrees(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

// ── Harness ──────────────────────────────────────────────

/// Build a `GlobalConfig` rooted at `root` with fast polling.
pub fn test_config(root: &Path, top_level: &str) -> GlobalConfig {
    test_config_with_agent(root, top_level, "claude")
}

/// Like [`test_config`] with a custom agent launch command.
pub fn test_config_with_agent(root: &Path, top_level: &str, agent_command: &str) -> GlobalConfig {
    let toml = format!(
        r#"
repo_root = '{root}'
worktree_root = "worktrees"
task_file = "tasks.json"
{top_level}

[ports]
base = 45100
max_attempts = 200

[monitor]
poll_interval_ms = 20
capture_lines = 50

[multiplexer]
binary = "tmux"
agent_command = "{agent_command}"
"#,
        root = root.display().to_string().replace('\\', "\\\\"),
    );
    GlobalConfig::from_toml_str(&toml).expect("valid test config")
}

/// A coordinator wired to fakes, plus handles on every fake.
pub struct Harness {
    pub coordinator: Arc<Coordinator>,
    pub mux: Arc<FakeMultiplexer>,
    pub vcs: Arc<FakeVcs>,
    pub tasks: Arc<InMemoryTaskStore>,
    pub notifications: mpsc::UnboundedReceiver<StateNotification>,
    pub config: GlobalConfig,
    _dir: TempDir,
}

impl Harness {
    /// Harness with tasks `t1`, `t2` and `t3`.
    pub fn new() -> Self {
        Self::with_config("", default_tasks())
    }

    /// Harness with extra top-level config keys and a custom task list.
    pub fn with_config(top_level: &str, tasks: Vec<Task>) -> Self {
        Self::build(top_level, "claude", tasks)
    }

    /// Harness whose panes are launched with `agent_command`.
    pub fn with_agent_command(agent_command: &str) -> Self {
        Self::build("", agent_command, default_tasks())
    }

    fn build(top_level: &str, agent_command: &str, tasks: Vec<Task>) -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = test_config_with_agent(dir.path(), top_level, agent_command);
        let mux = FakeMultiplexer::new();
        let vcs = FakeVcs::new();
        let store = Arc::new(InMemoryTaskStore::new(tasks));
        let (sink, notifications) = ChannelSink::new();

        let coordinator = Coordinator::from_config(
            &config,
            Collaborators {
                mux: Arc::clone(&mux) as Arc<dyn Multiplexer>,
                vcs: Arc::clone(&vcs) as Arc<dyn VersionControl>,
                tasks: Arc::clone(&store) as Arc<dyn agent_foreman::tasks::TaskStore>,
                sink: Arc::new(sink),
            },
        )
        .expect("coordinator");

        Self {
            coordinator: Arc::new(coordinator),
            mux,
            vcs,
            tasks: store,
            notifications,
            config,
            _dir: dir,
        }
    }

    pub fn worktree_path(&self, id: &str) -> PathBuf {
        self.config.worktree_root.join(id)
    }

    /// Current state of `id`, if registered.
    pub async fn state_of(&self, id: &str) -> Option<SessionState> {
        self.coordinator.session(id).await.map(|s| s.state)
    }

    /// Poll until `id` reaches `state` or `timeout` elapses.
    pub async fn wait_for_state(&self, id: &str, state: SessionState, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.state_of(id).await == Some(state) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Every notification delivered so far.
    pub fn drain_notifications(&mut self) -> Vec<StateNotification> {
        let mut all = Vec::new();
        while let Ok(n) = self.notifications.try_recv() {
            all.push(n);
        }
        all
    }
}

pub fn default_tasks() -> Vec<Task> {
    vec![
        Task::new("t1", "Add retry logic"),
        Task::new("t2", "Fix flaky login test"),
        Task::new("t3", "Bump dependencies"),
    ]
}

/// States notified for `id`, in delivery order.
pub fn states_for(notifications: &[StateNotification], id: &str) -> Vec<SessionState> {
    notifications
        .iter()
        .filter(|n| n.session_id == id)
        .map(|n| n.state)
        .collect()
}

pub const WAITING_SCREEN: &str = "Edit file src/main.rs\nDo you want to make this edit?\n❯ 1. Yes\n  2. No\n";
pub const BUSY_SCREEN: &str = "● Bash(cargo build)\n⠹ Compiling… (esc to interrupt)\n";
pub const RUNNING_SCREEN: &str = "● Done. All tests pass.\n>\n";
