//! Per-session pane polling.
//!
//! Each monitored session owns one background loop that captures the tail
//! of its pane, classifies it and invokes a callback when the classified
//! state differs from the previous one. Loops are stopped through a
//! per-session [`CancellationToken`] and awaited before `stop` returns, so a
//! stopped session never sees another callback.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};

use crate::models::session::SessionState;
use crate::mux::Multiplexer;
use crate::orchestrator::classifier::PaneClassifier;
use crate::Result;

/// Callback invoked with `(session_id, new_state)` on every classified change.
///
/// Runs on the monitor task and must not block.
pub type StateCallback = Arc<dyn Fn(&str, SessionState) + Send + Sync>;

struct MonitorEntry {
    generation: u64,
    cancel: CancellationToken,
    state: Arc<Mutex<SessionState>>,
    handle: JoinHandle<()>,
}

/// Everything one polling loop needs.
struct PollLoop {
    session_id: String,
    mux: Arc<dyn Multiplexer>,
    classifier: Arc<dyn PaneClassifier>,
    poll_interval: Duration,
    capture_lines: u32,
    state: Arc<Mutex<SessionState>>,
    callback: StateCallback,
    cancel: CancellationToken,
}

/// Owner of all session polling loops.
pub struct StateMonitor {
    mux: Arc<dyn Multiplexer>,
    classifier: Arc<dyn PaneClassifier>,
    poll_interval: Duration,
    capture_lines: u32,
    next_generation: AtomicU64,
    entries: Mutex<HashMap<String, MonitorEntry>>,
}

impl std::fmt::Debug for StateMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateMonitor")
            .field("classifier", &self.classifier.version())
            .field("poll_interval", &self.poll_interval)
            .field("capture_lines", &self.capture_lines)
            .field("active", &self.active_count())
            .finish_non_exhaustive()
    }
}

impl StateMonitor {
    /// Create a monitor polling through `mux` every `poll_interval`.
    #[must_use]
    pub fn new(
        mux: Arc<dyn Multiplexer>,
        classifier: Arc<dyn PaneClassifier>,
        poll_interval: Duration,
        capture_lines: u32,
    ) -> Self {
        Self {
            mux,
            classifier,
            poll_interval,
            capture_lines,
            next_generation: AtomicU64::new(1),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Start polling `session_id`, replacing any loop already running for it.
    ///
    /// The replacement loop waits for the old one to exit before its first
    /// capture, so two loops never report for the same session. The new
    /// loop starts from `Idle`, which makes its first classification count
    /// as a change.
    ///
    /// Must be called from within a Tokio runtime. Returns the generation
    /// of the new loop, usable with [`stop_generation`](Self::stop_generation).
    pub fn start(&self, session_id: &str, callback: StateCallback) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        let state = Arc::new(Mutex::new(SessionState::Idle));

        let poll = PollLoop {
            session_id: session_id.to_owned(),
            mux: Arc::clone(&self.mux),
            classifier: Arc::clone(&self.classifier),
            poll_interval: self.poll_interval,
            capture_lines: self.capture_lines,
            state: Arc::clone(&state),
            callback,
            cancel: cancel.clone(),
        };

        let mut entries = self.lock();
        let previous = entries.remove(session_id).map(|old| {
            old.cancel.cancel();
            old.handle
        });
        let replaced = previous.is_some();
        let handle = tokio::spawn(
            run(poll, previous).instrument(info_span!("state_monitor", session_id, generation)),
        );
        entries.insert(
            session_id.to_owned(),
            MonitorEntry {
                generation,
                cancel,
                state,
                handle,
            },
        );
        drop(entries);

        info!(
            session_id,
            generation,
            replaced,
            classifier = self.classifier.version(),
            "monitor started"
        );
        generation
    }

    /// Stop polling `session_id` and wait for the loop to exit.
    ///
    /// Stopping an unmonitored session is a no-op.
    pub async fn stop(&self, session_id: &str) {
        let entry = self.lock().remove(session_id);
        if let Some(entry) = entry {
            shut_down(session_id, entry).await;
        }
    }

    /// Stop polling `session_id` only if its loop is still `generation`.
    ///
    /// Returns `false` when a newer loop has replaced it (or none runs).
    pub async fn stop_generation(&self, session_id: &str, generation: u64) -> bool {
        let entry = {
            let mut entries = self.lock();
            match entries.get(session_id) {
                Some(entry) if entry.generation == generation => entries.remove(session_id),
                _ => None,
            }
        };
        match entry {
            Some(entry) => {
                shut_down(session_id, entry).await;
                true
            }
            None => false,
        }
    }

    /// Stop every loop and wait for all of them to exit.
    pub async fn stop_all(&self) {
        let drained: Vec<(String, MonitorEntry)> = self.lock().drain().collect();
        if drained.is_empty() {
            return;
        }
        let count = drained.len();
        for (_, entry) in &drained {
            entry.cancel.cancel();
        }
        futures_util::future::join_all(
            drained
                .into_iter()
                .map(|(session_id, entry)| async move { shut_down(&session_id, entry).await }),
        )
        .await;
        info!(count, "all monitors stopped");
    }

    /// Last classified state of `session_id`; `Idle` when unmonitored.
    #[must_use]
    pub fn get_state(&self, session_id: &str) -> SessionState {
        self.lock()
            .get(session_id)
            .map_or(SessionState::Idle, |entry| *lock_state(&entry.state))
    }

    /// Whether a loop is running for `session_id`.
    #[must_use]
    pub fn is_monitoring(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    /// Number of running loops.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }

    /// Capture and classify `session_id` once, without starting a loop.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Multiplexer` if the pane cannot be captured.
    pub async fn probe(&self, session_id: &str) -> Result<SessionState> {
        let text = self.mux.capture_pane(session_id, self.capture_lines).await?;
        Ok(self.classifier.classify(&text))
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, MonitorEntry>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for StateMonitor {
    /// Cancel any loop still running when the monitor goes away.
    fn drop(&mut self) {
        for entry in self.lock().values() {
            entry.cancel.cancel();
        }
    }
}

async fn shut_down(session_id: &str, entry: MonitorEntry) {
    entry.cancel.cancel();
    if let Err(err) = entry.handle.await {
        debug!(session_id, %err, "monitor task ended abnormally");
    }
    debug!(session_id, generation = entry.generation, "monitor stopped");
}

fn lock_state(state: &Mutex<SessionState>) -> MutexGuard<'_, SessionState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn run(poll: PollLoop, previous: Option<JoinHandle<()>>) {
    if let Some(previous) = previous {
        // Already cancelled; it exits at its next await point.
        let _ = previous.await;
    }

    let mut ticker = tokio::time::interval(poll.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = poll.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        let captured = tokio::select! {
            () = poll.cancel.cancelled() => break,
            captured = poll.mux.capture_pane(&poll.session_id, poll.capture_lines) => captured,
        };

        let text = match captured {
            Ok(text) => text,
            Err(err) => {
                debug!(session_id = %poll.session_id, %err, "pane capture failed, retrying");
                continue;
            }
        };

        let next = poll.classifier.classify(&text);
        let changed = {
            let mut current = lock_state(&poll.state);
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        };

        if changed && !poll.cancel.is_cancelled() {
            debug!(session_id = %poll.session_id, state = %next, "pane state changed");
            (poll.callback)(&poll.session_id, next);
        }
    }
}
