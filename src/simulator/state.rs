// src/simulator/state.rs
use std::fmt;

use serde::{Deserialize, Serialize};

/// Run state of the executor.
///
/// ```text
/// NotInitialized -> Initialized -> Starting -> Running -> Stopping -> Stopped
///                        ^                                              |
///                        +------------- initialize (new replication) ---+
/// ```
///
/// A `Stopped` simulator whose replication has not ended may also be started
/// again, which resumes the paused run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RunState {
    NotInitialized,
    Initialized,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl RunState {
    pub fn can_initialize(self) -> bool {
        matches!(self, RunState::NotInitialized | RunState::Stopped)
    }

    pub fn can_stop(self) -> bool {
        matches!(self, RunState::Starting | RunState::Running)
    }

    pub fn is_starting_or_running(self) -> bool {
        matches!(self, RunState::Starting | RunState::Running)
    }

    pub fn accepts_scheduling(self) -> bool {
        !matches!(self, RunState::NotInitialized)
    }
}

impl Default for RunState {
    fn default() -> Self {
        RunState::NotInitialized
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}
