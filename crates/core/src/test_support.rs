//! Test-only helpers: a controllable clock and config builders.
//!
//! Mirrors the `test-support` feature pattern used elsewhere in the
//! workspace so downstream crates can depend on `procd-core` with
//! `features = ["test-support"]` in `[dev-dependencies]` only.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::config::{HealthCheckConfig, HealthCheckType, ProgramConfig};

/// Fake clock with explicit, test-controlled advancement.
#[derive(Clone)]
pub struct FakeClock {
    current: Arc<Mutex<Instant>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self { current: Arc::new(Mutex::new(Instant::now())) }
    }

    /// Advances the clock by `duration`.
    pub fn advance(&self, duration: Duration) {
        *self.current.lock() += duration;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> Instant {
        *self.current.lock()
    }
}

/// Builds a minimal valid [`ProgramConfig`] for tests, with every optional
/// field at its spec-default.
pub fn test_program(name: &str, command: &[&str]) -> ProgramConfig {
    ProgramConfig {
        name: name.to_string(),
        command: command.iter().map(|s| s.to_string()).collect(),
        directory: None,
        user: None,
        environment: Default::default(),
        numprocs: 1,
        autostart: true,
        autorestart: true,
        startsecs: 1,
        startretries: 3,
        stopsignal: "TERM".to_string(),
        stopwaitsecs: 10,
        stdout_logfile: None,
        stderr_logfile: None,
        group: None,
        healthcheck: HealthCheckConfig {
            kind: HealthCheckType::None,
            interval: 1,
            timeout: 1,
            retries: 3,
            start_period: 0,
            host: None,
            port: None,
            command: None,
        },
    }
}
