//! Notification sinks for session state changes.
//!
//! Delivery is fire-and-forget and at-least-once: a sink may see the same
//! `(session_id, state)` pair twice and must tolerate it.

use tokio::sync::mpsc;
use tracing::info;

use crate::models::session::SessionState;

/// A state change published by the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateNotification {
    /// Session whose state changed.
    pub session_id: String,
    /// State the session moved to.
    pub state: SessionState,
}

/// Receiver of session state changes (UI, external monitor, logs).
pub trait NotificationSink: Send + Sync {
    /// Publish a state change. Must not block.
    fn notify(&self, session_id: &str, state: SessionState);
}

/// Sink that writes every change to the tracing log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, session_id: &str, state: SessionState) {
        info!(session_id, %state, "session state changed");
    }
}

/// Sink that forwards changes into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<StateNotification>,
}

impl ChannelSink {
    /// Create a sink and the receiver its notifications arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<StateNotification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl NotificationSink for ChannelSink {
    fn notify(&self, session_id: &str, state: SessionState) {
        // A dropped receiver just means nobody is listening any more.
        let _ = self.tx.send(StateNotification {
            session_id: session_id.to_owned(),
            state,
        });
    }
}
