//! POSIX signal helpers: name resolution and process-group delivery. See
//! spec §4.3 (Kill/Force-kill primitives) and §6 ("Signals emitted to
//! children").

use std::str::FromStr;

use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SignalError {
    #[error("unknown signal name {0:?}")]
    UnknownName(String),
    #[error("failed to signal pid {pid}: {source}")]
    Send { pid: i32, source: nix::Error },
}

/// Resolves a POSIX signal name (`"TERM"`, `"SIGTERM"`, `"HUP"`, ...) to a
/// [`Signal`]. Accepts both the bare and `SIG`-prefixed spelling, per
/// spec §3's `stopsignal` field.
pub fn parse_signal(name: &str) -> Result<Signal, SignalError> {
    let canonical = name.strip_prefix("SIG").unwrap_or(name).to_ascii_uppercase();
    let with_prefix = format!("SIG{canonical}");
    Signal::from_str(&with_prefix).map_err(|_| SignalError::UnknownName(name.to_string()))
}

/// Sends `signal` to the process *group* led by `pid` (spawn always makes
/// the child a session/group leader, so `pid == pgid`; see spec §4.3).
/// `ESRCH` (no such process) is treated as already-dead, not an error.
pub fn signal_group(pid: u32, sig: Signal) -> Result<(), SignalError> {
    let pgid = Pid::from_raw(-(pid as i32));
    match signal::kill(pgid, sig) {
        Ok(()) => Ok(()),
        Err(nix::Error::ESRCH) => Ok(()),
        Err(source) => Err(SignalError::Send { pid: pid as i32, source }),
    }
}

/// Sends `SIGKILL` to the process group led by `pid`.
pub fn kill_group(pid: u32) -> Result<(), SignalError> {
    signal_group(pid, Signal::SIGKILL)
}
