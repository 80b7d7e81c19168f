//! Execution state domain types

use serde::{Deserialize, Serialize};

/// Result of waiting on a step's container
///
/// Produced once per step and never mutated afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// Whether the runtime reported the container as no longer running
    pub exited: bool,

    /// Exit code of the container's main process
    pub exit_code: i64,

    /// Whether the kernel OOM killer terminated the container
    pub oom_killed: bool,
}

impl ExecutionState {
    /// Returns true if the step exited cleanly
    pub fn succeeded(&self) -> bool {
        self.exited && self.exit_code == 0 && !self.oom_killed
    }
}
