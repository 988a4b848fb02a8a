//! The `Process` lifecycle state machine. See spec §4.3 for the full
//! transition table; this module only defines the states themselves and
//! their terminal/running classification, since the transition logic needs
//! `tokio`/`nix` and lives in the `procd` daemon crate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessState {
    Stopped,
    Starting,
    Running,
    Backoff,
    Stopping,
    Exited,
    Fatal,
    Unhealthy,
}

impl ProcessState {
    /// Invariant (ii): states in which no child is alive.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessState::Stopped
                | ProcessState::Exited
                | ProcessState::Fatal
                | ProcessState::Backoff
        )
    }

    /// States in which a live child is expected to exist (invariant (i), (v)).
    pub fn has_live_child(self) -> bool {
        matches!(
            self,
            ProcessState::Running | ProcessState::Stopping | ProcessState::Unhealthy
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessState::Stopped => "STOPPED",
            ProcessState::Starting => "STARTING",
            ProcessState::Running => "RUNNING",
            ProcessState::Backoff => "BACKOFF",
            ProcessState::Stopping => "STOPPING",
            ProcessState::Exited => "EXITED",
            ProcessState::Fatal => "FATAL",
            ProcessState::Unhealthy => "UNHEALTHY",
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_and_unhealthy_have_live_children() {
        assert!(ProcessState::Running.has_live_child());
        assert!(ProcessState::Unhealthy.has_live_child());
        assert!(ProcessState::Stopping.has_live_child());
    }

    #[test]
    fn terminal_states_have_no_live_child() {
        for s in
            [ProcessState::Stopped, ProcessState::Exited, ProcessState::Fatal, ProcessState::Backoff]
        {
            assert!(s.is_terminal());
            assert!(!s.has_live_child());
        }
    }
}
