//! Configuration validation errors.

use thiserror::Error;

/// Validation failures for [`crate::config::ProgramConfig`] and
/// [`crate::config::HealthCheckConfig`]. Surfaced at parse time (startup:
/// fatal) and at reload time (RPC error, no state change).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("program {name:?}: numprocs must be >= 1, got {numprocs}")]
    InvalidNumprocs { name: String, numprocs: u32 },

    #[error("program {name:?}: command must not be empty")]
    EmptyCommand { name: String },

    #[error("program {name:?}: healthcheck type 'tcp' requires a port")]
    TcpHealthCheckMissingPort { name: String },

    #[error("program {name:?}: healthcheck port {port} out of range 1..=65535")]
    HealthCheckPortOutOfRange { name: String, port: u32 },

    #[error("program {name:?}: healthcheck type 'script' requires a command")]
    ScriptHealthCheckMissingCommand { name: String },

    #[error("program {name:?}: unknown stopsignal {signal:?}")]
    UnknownSignal { name: String, signal: String },

    #[error("duplicate program name {name:?}")]
    DuplicateProgram { name: String },
}
