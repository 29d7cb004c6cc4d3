//! Session orchestration.
//!
//! The [`Coordinator`](coordinator::Coordinator) owns the session registry
//! and drives the other components: the port allocator, the worktree
//! manager and the pane state monitor with its classifier.

pub mod classifier;
pub mod coordinator;
pub mod port_allocator;
pub mod state_monitor;
pub mod worktree_manager;

pub use classifier::{PaneClassifier, PatternClassifier};
pub use coordinator::{Collaborators, Coordinator, KillOptions, StartOptions, StartOutcome};
pub use port_allocator::PortAllocator;
pub use state_monitor::StateMonitor;
pub use worktree_manager::WorktreeManager;
