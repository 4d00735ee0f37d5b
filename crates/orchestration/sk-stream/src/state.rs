//! Pipeline lifecycle states.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// Lifecycle of one orchestrator run.
///
/// Transitions only move forward:
/// `Idle → Running → Draining → ShuttingDown → Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineState {
    /// Configured, nothing started
    Idle,
    /// Receiver, drones and publisher are running
    Running,
    /// Receiver stopped; drones finish the input queue
    Draining,
    /// Drones gone; publisher finishes the output queue
    ShuttingDown,
    /// Every thread joined
    Terminated,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::ShuttingDown => "shutting-down",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Shared view of the current [`PipelineState`].
#[derive(Debug, Clone)]
pub struct StateHandle {
    state: Arc<Mutex<PipelineState>>,
}

impl Default for StateHandle {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(PipelineState::Idle)),
        }
    }
}

impl StateHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> PipelineState {
        *self.state.lock()
    }

    pub fn is_terminated(&self) -> bool {
        self.get() == PipelineState::Terminated
    }

    /// Moves to `next`. Backward or repeated transitions are ignored.
    pub(crate) fn advance(&self, next: PipelineState) {
        let mut state = self.state.lock();
        if next > *state {
            info!(from = %*state, to = %next, "Pipeline state changed");
            *state = next;
        }
    }
}
