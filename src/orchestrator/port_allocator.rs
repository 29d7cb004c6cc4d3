//! Dev-server port allocation.
//!
//! Hands out one local TCP port per session. A candidate is granted only
//! if no other session holds it *and* a bind-and-release probe on the
//! loopback interface succeeds, which skips ports taken by processes
//! outside the orchestrator.

use std::collections::{HashMap, HashSet};
use std::net::{Ipv4Addr, TcpListener};
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tracing::{debug, info};

use crate::config::PortConfig;
use crate::{AppError, Result};

/// A port held by a session.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PortAllocation {
    /// Allocated port.
    pub port: u16,
    /// Owning session.
    pub session_id: String,
}

/// Sole owner of the port allocation table.
#[derive(Debug)]
pub struct PortAllocator {
    base: u16,
    max_attempts: u32,
    table: Mutex<HashMap<String, u16>>,
}

impl PortAllocator {
    /// Create an allocator scanning `max_attempts` ports upward from `base`.
    #[must_use]
    pub fn new(base: u16, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            table: Mutex::new(HashMap::new()),
        }
    }

    /// Create an allocator from the `[ports]` configuration section.
    #[must_use]
    pub fn from_config(config: &PortConfig) -> Self {
        Self::new(config.base, config.max_attempts)
    }

    /// Allocate a port for `session_id`, or return the one it already holds.
    ///
    /// The table lock is held across the scan and the live probes so two
    /// concurrent callers can never be granted the same port.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ResourceExhausted` when every candidate is either
    /// allocated or busy.
    pub fn allocate(&self, session_id: &str) -> Result<u16> {
        let mut table = self.lock();
        if let Some(&port) = table.get(session_id) {
            return Ok(port);
        }

        let taken: HashSet<u16> = table.values().copied().collect();
        for offset in 0..self.max_attempts {
            let Ok(candidate) = u16::try_from(u32::from(self.base) + offset) else {
                break;
            };
            if taken.contains(&candidate) {
                continue;
            }
            if !port_is_free(candidate) {
                debug!(port = candidate, "port busy outside orchestrator, skipping");
                continue;
            }

            table.insert(session_id.to_owned(), candidate);
            info!(session_id, port = candidate, "port allocated");
            return Ok(candidate);
        }

        Err(AppError::ResourceExhausted(format!(
            "no free port among {} candidates from {} for session {session_id}",
            self.max_attempts, self.base
        )))
    }

    /// Release the port held by `session_id`. Unknown sessions are a no-op.
    pub fn release(&self, session_id: &str) {
        if let Some(port) = self.lock().remove(session_id) {
            info!(session_id, port, "port released");
        }
    }

    /// Port held by `session_id`, if any.
    #[must_use]
    pub fn get_port(&self, session_id: &str) -> Option<u16> {
        self.lock().get(session_id).copied()
    }

    /// Snapshot of all allocations, ordered by port.
    #[must_use]
    pub fn allocations(&self) -> Vec<PortAllocation> {
        let mut all: Vec<PortAllocation> = self
            .lock()
            .iter()
            .map(|(session_id, &port)| PortAllocation {
                port,
                session_id: session_id.clone(),
            })
            .collect();
        all.sort_unstable_by_key(|a| a.port);
        all
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, u16>> {
        // The table is a plain map; a panic elsewhere cannot leave it torn.
        self.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Bind-and-release probe on the loopback interface.
fn port_is_free(port: u16) -> bool {
    TcpListener::bind((Ipv4Addr::LOCALHOST, port)).is_ok()
}
