// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! procd-core: shared data model for the process supervisor.
//!
//! Holds the types that are constructed once by configuration loading and
//! then shared, read-only, across the daemon: [`ProgramConfig`],
//! [`HealthCheckConfig`], process lifecycle [`ProcessState`], [`Event`]
//! payloads, and the [`Clock`] abstraction used to keep timing testable.

pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod ids;
pub mod state;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use clock::{Clock, SystemClock};
pub use config::{HealthCheckConfig, HealthCheckType, ProgramConfig};
pub use error::ConfigError;
pub use event::{Event, ProcessHealth};
pub use ids::{GroupKey, ProcessKey};
pub use state::ProcessState;
