//! Session lifecycle coordination.
//!
//! The coordinator is the single writer of the session registry. Commands
//! (`start`, `kill`, `pause`, `resume`, `attach`) and monitor-driven state
//! changes all serialize through it. Slow work (git, tmux) runs with the
//! registry unlocked; every command re-checks the entry after reacquiring
//! the lock, so a session killed mid-start is rolled back instead of
//! resurrected.
//!
//! Monitor callbacks never touch the registry directly. They push
//! `(session, epoch, state)` onto a channel drained by an event pump task;
//! the pump drops events whose epoch no longer matches the entry, which
//! discards anything a stopped or replaced monitor reported late.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::config::GlobalConfig;
use crate::models::session::{Session, SessionState};
use crate::models::task::TaskStatus;
use crate::mux::Multiplexer;
use crate::notify::NotificationSink;
use crate::orchestrator::classifier::{PaneClassifier, PatternClassifier};
use crate::orchestrator::port_allocator::PortAllocator;
use crate::orchestrator::state_monitor::{StateCallback, StateMonitor};
use crate::orchestrator::worktree_manager::{validate_session_id, WorktreeManager};
use crate::tasks::TaskStore;
use crate::vcs::VersionControl;
use crate::{AppError, Result};

/// Per-call options for [`Coordinator::start`].
#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Branch to cut the worktree from; the configured default when `None`.
    pub base_branch: Option<String>,
    /// Request a dev-server port; the configured default when `None`.
    pub dev_server: Option<bool>,
}

/// Per-call options for [`Coordinator::kill`].
#[derive(Debug, Clone, Copy, Default)]
pub struct KillOptions {
    /// Remove the worktree; the configured default when `None`.
    pub remove_worktree: Option<bool>,
    /// Refuse to discard uncommitted changes when removing the worktree.
    pub preserve_changes: bool,
}

/// Result of a successful [`Coordinator::start`].
#[derive(Debug, Clone)]
pub struct StartOutcome {
    /// Session snapshot right after it reached `Running`.
    pub session: Session,
    /// Non-fatal problems, such as no free dev-server port.
    pub warnings: Vec<String>,
}

/// External collaborators injected into the coordinator.
pub struct Collaborators {
    /// Terminal multiplexer hosting the agent panes.
    pub mux: Arc<dyn Multiplexer>,
    /// Version control used for worktrees.
    pub vcs: Arc<dyn VersionControl>,
    /// Source of tasks and sink for task status.
    pub tasks: Arc<dyn TaskStore>,
    /// Receiver of state change notifications.
    pub sink: Arc<dyn NotificationSink>,
}

/// Defaults applied when a command does not override them.
#[derive(Debug, Clone)]
struct Defaults {
    base_branch: String,
    agent_command: String,
    dev_server: bool,
    remove_worktree_on_kill: bool,
}

#[derive(Debug)]
struct RegistryEntry {
    session: Session,
    /// Monitor events carrying another epoch are stale.
    epoch: u64,
    /// Generation of the monitor loop owned by this entry.
    monitor_generation: Option<u64>,
    /// Token of the `start` call still working on this entry. A kill during
    /// start leaves the entry `Stopped` until that call has rolled back.
    start_token: Option<u64>,
}

impl RegistryEntry {
    fn owned_by(&self, token: u64) -> bool {
        self.start_token == Some(token)
    }

    /// Live, or still held by a start that has not finished rolling back.
    fn is_claimed(&self) -> bool {
        self.session.state.is_live() || self.start_token.is_some()
    }
}

type Registry = Arc<Mutex<HashMap<String, RegistryEntry>>>;

#[derive(Debug)]
struct MonitorEvent {
    session_id: String,
    epoch: u64,
    state: SessionState,
}

/// Owner of the session registry and of every session lifecycle command.
pub struct Coordinator {
    registry: Registry,
    next_epoch: AtomicU64,
    ports: PortAllocator,
    worktrees: WorktreeManager,
    monitor: StateMonitor,
    mux: Arc<dyn Multiplexer>,
    tasks: Arc<dyn TaskStore>,
    sink: Arc<dyn NotificationSink>,
    defaults: Defaults,
    events_tx: mpsc::UnboundedSender<MonitorEvent>,
    pump_cancel: CancellationToken,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("ports", &self.ports)
            .field("worktrees", &self.worktrees)
            .field("monitor", &self.monitor)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl Coordinator {
    /// Build a coordinator from configuration and collaborators.
    ///
    /// Spawns the event pump, so it must be called from within a Tokio
    /// runtime. Call [`shutdown`](Self::shutdown) before dropping it.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the classifier patterns do not compile.
    pub fn from_config(config: &GlobalConfig, collaborators: Collaborators) -> Result<Self> {
        let classifier = PatternClassifier::from_config(&config.classifier)?;
        Ok(Self::with_classifier(
            config,
            collaborators,
            Arc::new(classifier),
        ))
    }

    /// Build a coordinator with an explicit pane classifier.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn with_classifier(
        config: &GlobalConfig,
        collaborators: Collaborators,
        classifier: Arc<dyn PaneClassifier>,
    ) -> Self {
        let Collaborators {
            mux,
            vcs,
            tasks,
            sink,
        } = collaborators;

        let monitor = StateMonitor::new(
            Arc::clone(&mux),
            classifier,
            config.monitor.poll_interval(),
            config.monitor.capture_lines,
        );
        let worktrees =
            WorktreeManager::new(vcs, config.worktree_root.clone(), config.branch_prefix.clone());

        let registry: Registry = Arc::new(Mutex::new(HashMap::new()));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let pump_cancel = CancellationToken::new();
        let pump = tokio::spawn(
            pump_events(
                Arc::clone(&registry),
                Arc::clone(&sink),
                events_rx,
                pump_cancel.clone(),
            )
            .instrument(info_span!("event_pump")),
        );

        Self {
            registry,
            next_epoch: AtomicU64::new(1),
            ports: PortAllocator::from_config(&config.ports),
            worktrees,
            monitor,
            mux,
            tasks,
            sink,
            defaults: Defaults {
                base_branch: config.base_branch.clone(),
                agent_command: config.multiplexer.agent_command.clone(),
                dev_server: config.dev_server,
                remove_worktree_on_kill: config.remove_worktree_on_kill,
            },
            events_tx,
            pump_cancel,
            pump: Mutex::new(Some(pump)),
        }
    }

    /// Port allocator owned by this coordinator.
    #[must_use]
    pub fn ports(&self) -> &PortAllocator {
        &self.ports
    }

    /// State monitor owned by this coordinator.
    #[must_use]
    pub fn monitor(&self) -> &StateMonitor {
        &self.monitor
    }

    /// Worktree manager owned by this coordinator.
    #[must_use]
    pub fn worktrees(&self) -> &WorktreeManager {
        &self.worktrees
    }

    /// Start a session for `task_id`.
    ///
    /// Order: reserve the registry slot, verify the task, create the
    /// worktree, create the pane, allocate a port if requested, launch the
    /// agent, then commit `Running` and start monitoring. Any failure after
    /// the reservation leaves the session `Errored` with every resource
    /// acquired so far released. A missing port is only a warning.
    ///
    /// # Errors
    ///
    /// - `AppError::AlreadyExists` if a live session exists for the task, or
    ///   a start killed midway is still rolling back.
    /// - `AppError::NotFound` if the task store has no such task.
    /// - `AppError::Vcs` / `AppError::Multiplexer` if a step fails.
    /// - `AppError::Cancelled` if the session was killed while starting.
    pub async fn start(&self, task_id: &str, options: StartOptions) -> Result<StartOutcome> {
        self.start_inner(task_id, options)
            .instrument(info_span!("start_session", task_id))
            .await
    }

    #[allow(clippy::too_many_lines)] // Each acquired resource has its own rollback arm.
    async fn start_inner(&self, task_id: &str, options: StartOptions) -> Result<StartOutcome> {
        let base_branch = options
            .base_branch
            .unwrap_or_else(|| self.defaults.base_branch.clone());
        let dev_server = options.dev_server.unwrap_or(self.defaults.dev_server);

        let token = self.next_epoch();
        {
            let mut registry = self.registry.lock().await;
            if let Some(existing) = registry.get(task_id) {
                if existing.start_token.is_some() {
                    return Err(AppError::AlreadyExists(format!(
                        "session {task_id} has a start in progress"
                    )));
                }
                if existing.session.state.is_live() {
                    return Err(AppError::AlreadyExists(format!(
                        "session {task_id} is {}",
                        existing.session.state
                    )));
                }
            }
            let session = Session::starting(
                task_id.to_owned(),
                self.worktrees.path_for(task_id),
                base_branch.clone(),
            );
            registry.insert(
                task_id.to_owned(),
                RegistryEntry {
                    session,
                    epoch: token,
                    monitor_generation: None,
                    start_token: Some(token),
                },
            );
            self.sink.notify(task_id, SessionState::Starting);
        }

        match self.tasks.find(task_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.release_reservation(task_id, token, None).await;
                return Err(AppError::NotFound(format!("task {task_id} not found")));
            }
            Err(err) => {
                self.release_reservation(task_id, token, None).await;
                return Err(err);
            }
        }

        let worktree = match self.worktrees.create(task_id, &base_branch).await {
            Ok(record) => record,
            Err(err) => {
                self.release_reservation(task_id, token, Some(&err)).await;
                return Err(err);
            }
        };

        if let Err(err) = self.mux.new_session(task_id, &worktree.path).await {
            self.rollback_worktree(task_id).await;
            self.release_reservation(task_id, token, Some(&err)).await;
            return Err(err);
        }

        let mut warnings = Vec::new();
        let port = if dev_server {
            match self.ports.allocate(task_id) {
                Ok(port) => Some(port),
                Err(err) => {
                    warn!(task_id, %err, "continuing without a dev-server port");
                    warnings.push(err.to_string());
                    None
                }
            }
        } else {
            None
        };

        if let Some(command) = self.launch_command(port) {
            if let Err(err) = self.mux.send_keys(task_id, &command).await {
                self.rollback_pane(task_id).await;
                self.ports.release(task_id);
                self.rollback_worktree(task_id).await;
                self.release_reservation(task_id, token, Some(&err)).await;
                return Err(err);
            }
        }

        // Commit and start monitoring under one lock hold so a concurrent
        // kill either sees `Starting` (and we roll back) or a monitored entry.
        let committed = {
            let mut registry = self.registry.lock().await;
            match registry.get_mut(task_id) {
                Some(entry)
                    if entry.owned_by(token) && entry.session.state == SessionState::Starting =>
                {
                    let epoch = self.next_epoch();
                    entry.session.port = port;
                    entry.session.transition_to(SessionState::Running);
                    entry.epoch = epoch;
                    entry.start_token = None;
                    entry.monitor_generation =
                        Some(self.monitor.start(task_id, self.monitor_callback(epoch)));
                    self.sink.notify(task_id, SessionState::Running);
                    Some(entry.session.clone())
                }
                _ => None,
            }
        };

        let Some(session) = committed else {
            // The kill left this start's entry behind, so nobody else can
            // have claimed the id; everything named after it is ours.
            info!(task_id, "session killed while starting, rolling back");
            self.rollback_pane(task_id).await;
            self.ports.release(task_id);
            self.rollback_worktree(task_id).await;
            self.release_reservation(task_id, token, None).await;
            return Err(AppError::Cancelled(format!(
                "session {task_id} was stopped during start"
            )));
        };

        if let Err(err) = self.tasks.update_status(task_id, TaskStatus::InProgress).await {
            warn!(task_id, %err, "failed to mark task in progress");
        }

        info!(
            task_id,
            path = %session.worktree_path.display(),
            port = ?session.port,
            "session started"
        );
        Ok(StartOutcome { session, warnings })
    }

    /// Tear down the session for `task_id`.
    ///
    /// Every step runs even when an earlier one fails: stop monitoring,
    /// kill the pane, release the port, optionally remove the worktree. The
    /// session ends `Stopped` and leaves the registry either way.
    ///
    /// An unregistered id is still torn down when a pane or worktree named
    /// after it is left over, e.g. from an earlier kill that failed halfway.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if no session is registered for the task and
    ///   nothing named after it is left to clean up.
    /// - `AppError::InvalidTransition` if a kill is already in progress.
    /// - `AppError::Teardown` listing every failed step.
    pub async fn kill(&self, task_id: &str, options: KillOptions) -> Result<Session> {
        self.kill_inner(task_id, options)
            .instrument(info_span!("kill_session", task_id))
            .await
    }

    async fn kill_inner(&self, task_id: &str, options: KillOptions) -> Result<Session> {
        let remove_worktree = options
            .remove_worktree
            .unwrap_or(self.defaults.remove_worktree_on_kill);

        let registered = {
            let mut registry = self.registry.lock().await;
            if let Some(entry) = registry.get_mut(task_id) {
                if entry.session.state == SessionState::Stopping
                    || (entry.start_token.is_some()
                        && entry.session.state == SessionState::Stopped)
                {
                    return Err(AppError::InvalidTransition(format!(
                        "session {task_id} is already stopping"
                    )));
                }
                entry.session.transition_to(SessionState::Stopping);
                entry.epoch = self.next_epoch();
                entry.monitor_generation = None;
                self.sink.notify(task_id, SessionState::Stopping);
                true
            } else {
                // Unregistered: a pane, port or worktree may still be left
                // over from an interrupted teardown. Hold the id while we look.
                validate_session_id(task_id)
                    .map_err(|_| AppError::NotFound(format!("no session for {task_id}")))?;
                let mut session = Session::starting(
                    task_id.to_owned(),
                    self.worktrees.path_for(task_id),
                    self.defaults.base_branch.clone(),
                );
                session.transition_to(SessionState::Stopping);
                registry.insert(
                    task_id.to_owned(),
                    RegistryEntry {
                        session,
                        epoch: self.next_epoch(),
                        monitor_generation: None,
                        start_token: None,
                    },
                );
                false
            }
        };

        let mut failures = Vec::new();
        let mut found = registered;

        self.monitor.stop(task_id).await;

        match self.mux.has_session(task_id).await {
            Ok(true) => {
                found = true;
                if let Err(err) = self.mux.kill_session(task_id).await {
                    warn!(task_id, %err, "failed to kill pane");
                    failures.push(err);
                }
            }
            Ok(false) => debug!(task_id, "no pane to kill"),
            Err(err) => {
                warn!(task_id, %err, "failed to query pane");
                failures.push(err);
            }
        }

        found |= self.ports.get_port(task_id).is_some();
        self.ports.release(task_id);

        let worktree_path = self.worktrees.path_for(task_id);
        if remove_worktree && tokio::fs::try_exists(&worktree_path).await.unwrap_or(false) {
            found = true;
            if let Err(err) = self
                .worktrees
                .remove(task_id, options.preserve_changes)
                .await
            {
                warn!(
                    task_id,
                    %err,
                    path = %worktree_path.display(),
                    "worktree left behind"
                );
                failures.push(err);
            }
        } else if remove_worktree {
            self.worktrees.prune().await;
        }

        let session = {
            let mut registry = self.registry.lock().await;
            match registry.get_mut(task_id) {
                Some(_) if !found => {
                    registry.remove(task_id);
                    None
                }
                Some(entry) => {
                    entry.session.transition_to(SessionState::Stopped);
                    if let Some(first) = failures.first() {
                        entry.session.last_error = Some(first.to_string());
                    }
                    self.sink.notify(task_id, SessionState::Stopped);
                    let session = entry.session.clone();
                    // An in-flight start clears its own entry once rolled back.
                    if entry.start_token.is_none() {
                        registry.remove(task_id);
                    }
                    Some(session)
                }
                None => None,
            }
        };

        if !failures.is_empty() {
            return Err(AppError::Teardown(failures));
        }
        match session {
            Some(session) => {
                if registered {
                    info!(task_id, remove_worktree, "session killed");
                } else {
                    info!(task_id, remove_worktree, "leftover session resources cleaned up");
                }
                Ok(session)
            }
            None => Err(AppError::NotFound(format!("no session for {task_id}"))),
        }
    }

    /// Suspend monitoring of a running session, keeping its resources.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if no session is registered for the task.
    /// - `AppError::InvalidTransition` unless the session is `Running`,
    ///   `Busy` or `Waiting`.
    pub async fn pause(&self, task_id: &str) -> Result<Session> {
        let (session, generation) = {
            let mut registry = self.registry.lock().await;
            let entry = registry
                .get_mut(task_id)
                .ok_or_else(|| AppError::NotFound(format!("no session for {task_id}")))?;
            if !entry.session.state.is_monitored() {
                return Err(AppError::InvalidTransition(format!(
                    "cannot pause session {task_id} while {}",
                    entry.session.state
                )));
            }
            entry.session.transition_to(SessionState::Paused);
            entry.epoch = self.next_epoch();
            self.sink.notify(task_id, SessionState::Paused);
            (entry.session.clone(), entry.monitor_generation.take())
        };

        // A resume racing this pause owns a newer loop; leave that one alone.
        if let Some(generation) = generation {
            self.monitor.stop_generation(task_id, generation).await;
        }

        info!(task_id, "session paused");
        Ok(session)
    }

    /// Resume monitoring of a paused session.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if no session is registered for the task.
    /// - `AppError::InvalidTransition` unless the session is `Paused`.
    pub async fn resume(&self, task_id: &str) -> Result<Session> {
        let mut registry = self.registry.lock().await;
        let entry = registry
            .get_mut(task_id)
            .ok_or_else(|| AppError::NotFound(format!("no session for {task_id}")))?;
        if entry.session.state != SessionState::Paused {
            return Err(AppError::InvalidTransition(format!(
                "cannot resume session {task_id} while {}",
                entry.session.state
            )));
        }

        let epoch = self.next_epoch();
        entry.session.transition_to(SessionState::Running);
        entry.epoch = epoch;
        entry.monitor_generation = Some(self.monitor.start(task_id, self.monitor_callback(epoch)));
        self.sink.notify(task_id, SessionState::Running);
        let session = entry.session.clone();
        drop(registry);

        info!(task_id, "session resumed");
        Ok(session)
    }

    /// Hand the operator's terminal over to the session's pane.
    ///
    /// Blocks until the operator detaches.
    ///
    /// # Errors
    ///
    /// - `AppError::NotFound` if the session is not live or its pane is gone.
    /// - `AppError::Multiplexer` if attaching fails.
    pub async fn attach(&self, task_id: &str) -> Result<()> {
        {
            let registry = self.registry.lock().await;
            let attachable = registry.get(task_id).is_some_and(|entry| {
                entry.session.state.is_monitored() || entry.session.state == SessionState::Paused
            });
            if !attachable {
                return Err(AppError::NotFound(format!("no live session for {task_id}")));
            }
        }

        if !self.mux.has_session(task_id).await? {
            return Err(AppError::NotFound(format!("pane for {task_id} is gone")));
        }

        info!(task_id, "attaching to session");
        self.mux.attach_session(task_id).await
    }

    /// Snapshot of registered sessions, ordered by id.
    ///
    /// With `task_id`, only that session is returned (empty when unknown).
    pub async fn status(&self, task_id: Option<&str>) -> Vec<Session> {
        let registry = self.registry.lock().await;
        let mut sessions: Vec<Session> = registry
            .values()
            .filter(|entry| task_id.map_or(true, |id| entry.session.id == id))
            .map(|entry| entry.session.clone())
            .collect();
        drop(registry);
        sessions.sort_by(|a, b| a.id.cmp(&b.id));
        sessions
    }

    /// Snapshot of one session.
    pub async fn session(&self, task_id: &str) -> Option<Session> {
        self.registry
            .lock()
            .await
            .get(task_id)
            .map(|entry| entry.session.clone())
    }

    /// Register panes left running by an earlier process.
    ///
    /// Every multiplexer session whose name is a known task and which is
    /// not already registered is adopted with its current pane state and
    /// monitored from then on. Returns the adopted ids.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Multiplexer` if sessions cannot be listed, or
    /// `AppError::TaskStore` if tasks cannot be read.
    pub async fn adopt_live_sessions(&self) -> Result<Vec<String>> {
        let names = self.mux.list_sessions().await?;
        let mut adopted = Vec::new();

        for name in names {
            if self.tasks.find(&name).await?.is_none() {
                debug!(session = %name, "ignoring multiplexer session without a task");
                continue;
            }
            if self.is_claimed(&name).await {
                continue;
            }

            let observed = match self.monitor.probe(&name).await {
                Ok(state) if state.is_monitored() => state,
                Ok(_) => SessionState::Running,
                Err(err) => {
                    debug!(session = %name, %err, "probe failed, assuming running");
                    SessionState::Running
                }
            };

            let mut registry = self.registry.lock().await;
            if registry.get(&name).is_some_and(RegistryEntry::is_claimed) {
                continue;
            }
            let mut session = Session::starting(
                name.clone(),
                self.worktrees.path_for(&name),
                self.defaults.base_branch.clone(),
            );
            session.transition_to(SessionState::Running);
            session.transition_to(observed);

            let epoch = self.next_epoch();
            let generation = self.monitor.start(&name, self.monitor_callback(epoch));
            registry.insert(
                name.clone(),
                RegistryEntry {
                    session,
                    epoch,
                    monitor_generation: Some(generation),
                    start_token: None,
                },
            );
            self.sink.notify(&name, observed);
            drop(registry);

            info!(session = %name, state = %observed, "adopted live session");
            adopted.push(name);
        }

        Ok(adopted)
    }

    /// Stop every monitor and the event pump.
    ///
    /// Panes, worktrees and ports are left as they are, so a later process
    /// can adopt the sessions.
    pub async fn shutdown(&self) {
        self.monitor.stop_all().await;
        self.pump_cancel.cancel();
        let pump = self.pump.lock().await.take();
        if let Some(pump) = pump {
            if let Err(err) = pump.await {
                warn!(%err, "event pump ended abnormally");
            }
        }
        info!("coordinator shut down");
    }

    fn next_epoch(&self) -> u64 {
        self.next_epoch.fetch_add(1, Ordering::Relaxed)
    }

    fn monitor_callback(&self, epoch: u64) -> StateCallback {
        let tx = self.events_tx.clone();
        Arc::new(move |session_id: &str, state: SessionState| {
            // Closed only after shutdown, when nobody cares any more.
            let _ = tx.send(MonitorEvent {
                session_id: session_id.to_owned(),
                epoch,
                state,
            });
        })
    }

    fn launch_command(&self, port: Option<u16>) -> Option<String> {
        let command = self.defaults.agent_command.trim();
        if command.is_empty() {
            return None;
        }
        Some(match port {
            Some(port) => format!("PORT={port} {command}"),
            None => command.to_owned(),
        })
    }

    async fn is_claimed(&self, task_id: &str) -> bool {
        self.registry
            .lock()
            .await
            .get(task_id)
            .is_some_and(RegistryEntry::is_claimed)
    }

    /// Hand the entry reserved by start `token` back after a failed start.
    ///
    /// With `failure`, a still-`Starting` entry becomes `Errored`; without
    /// it the reservation is dropped. An entry a kill is still tearing down
    /// is left for that kill to finish; one it already finished is removed.
    /// Entries owned by anyone else are left alone.
    async fn release_reservation(&self, task_id: &str, token: u64, failure: Option<&AppError>) {
        let mut registry = self.registry.lock().await;
        let Some(entry) = registry.get_mut(task_id).filter(|entry| entry.owned_by(token)) else {
            return;
        };
        entry.start_token = None;

        match failure {
            Some(err) if entry.session.state == SessionState::Starting => {
                entry.session.transition_to(SessionState::Errored);
                entry.session.last_error = Some(err.to_string());
                self.sink.notify(task_id, SessionState::Errored);
                drop(registry);
                warn!(task_id, %err, "session start failed");
            }
            _ if entry.session.state == SessionState::Stopping => {}
            _ => {
                registry.remove(task_id);
            }
        }
    }

    async fn rollback_pane(&self, task_id: &str) {
        if let Err(err) = self.mux.kill_session(task_id).await {
            warn!(task_id, %err, "failed to kill pane during rollback");
        }
    }

    async fn rollback_worktree(&self, task_id: &str) {
        if let Err(err) = self.worktrees.remove(task_id, false).await {
            warn!(task_id, %err, "failed to remove worktree during rollback");
        }
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.pump_cancel.cancel();
    }
}

async fn pump_events(
    registry: Registry,
    sink: Arc<dyn NotificationSink>,
    mut events: mpsc::UnboundedReceiver<MonitorEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            () = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        apply_monitor_event(&registry, sink.as_ref(), event).await;
    }
    debug!("event pump stopped");
}

async fn apply_monitor_event(
    registry: &Mutex<HashMap<String, RegistryEntry>>,
    sink: &dyn NotificationSink,
    event: MonitorEvent,
) {
    // A blank pane under a live agent still counts as running.
    let state = if event.state == SessionState::Idle {
        SessionState::Running
    } else {
        event.state
    };

    let mut registry = registry.lock().await;
    let Some(entry) = registry.get_mut(&event.session_id) else {
        return;
    };
    if entry.epoch != event.epoch || !entry.session.state.is_monitored() {
        debug!(session_id = %event.session_id, %state, "dropping stale monitor event");
        return;
    }
    if entry.session.state == state {
        return;
    }
    if entry.session.transition_to(state) {
        sink.notify(&event.session_id, state);
    }
}
