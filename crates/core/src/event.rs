//! Event Bus payloads. See spec §4.1: events carry names, not handles — the
//! bus and its handlers never see a `Process` or `Supervisor` reference.

use serde::{Deserialize, Serialize};

use crate::ids::{GroupKey, ProcessKey};
use crate::state::ProcessState;

/// Tri-state health, per spec §3 (`is_healthy`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessHealth {
    Unknown,
    Healthy,
    Unhealthy,
}

/// An event published on the Event Bus. Payloads always include
/// `processname`/`groupname`; `from_state`, `pid`, `message`, and
/// `failures` are included where relevant, per spec §4.1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Event {
    StateChanged {
        processname: ProcessKey,
        groupname: GroupKey,
        from_state: ProcessState,
        to_state: ProcessState,
        pid: Option<u32>,
        message: Option<String>,
    },
    HealthCheckPassed {
        processname: ProcessKey,
        groupname: GroupKey,
    },
    HealthCheckFailed {
        processname: ProcessKey,
        groupname: GroupKey,
        failures: u32,
        message: String,
    },
}

impl Event {
    pub fn processname(&self) -> &ProcessKey {
        match self {
            Event::StateChanged { processname, .. }
            | Event::HealthCheckPassed { processname, .. }
            | Event::HealthCheckFailed { processname, .. } => processname,
        }
    }

    /// Whether this event represents a condition an operator should notice
    /// immediately (used by the default logging handler to pick a level).
    pub fn is_alarming(&self) -> bool {
        matches!(
            self,
            Event::StateChanged { to_state: ProcessState::Fatal | ProcessState::Unhealthy, .. }
                | Event::HealthCheckFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fatal_transition_is_alarming() {
        let event = Event::StateChanged {
            processname: ProcessKey::new("web"),
            groupname: GroupKey::new("web"),
            from_state: ProcessState::Backoff,
            to_state: ProcessState::Fatal,
            pid: None,
            message: None,
        };
        assert!(event.is_alarming());
    }

    #[test]
    fn running_transition_is_not_alarming() {
        let event = Event::StateChanged {
            processname: ProcessKey::new("web"),
            groupname: GroupKey::new("web"),
            from_state: ProcessState::Starting,
            to_state: ProcessState::Running,
            pid: Some(123),
            message: None,
        };
        assert!(!event.is_alarming());
    }
}
