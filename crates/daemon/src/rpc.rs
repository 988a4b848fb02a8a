//! RPC Server: a Unix-domain socket speaking the length-prefixed JSON
//! framing from `procd-wire`. See spec §4.5.

use std::path::Path;
use std::sync::Arc;

use procd_wire::{ErrorCode, ProtocolError, Request, Response};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, warn};

use crate::supervisor::Supervisor;

/// Binds the control socket at `path`, removing any stale socket left by a
/// prior run, and restricting it to owner-only access (mode 0o600) via a
/// restrictive umask held for the duration of the bind.
#[allow(unsafe_code)]
pub fn bind(path: &Path) -> std::io::Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    // Safety: `umask` is process-global but this daemon has no other
    // threads racing a bind at startup; the previous mask is restored
    // immediately after.
    let previous = unsafe { libc::umask(0o177) };
    let listener = UnixListener::bind(path);
    unsafe { libc::umask(previous) };
    listener
}

/// Accepts connections until `cancel` fires, spawning one task per
/// connection (spec §4.5: "Each accepted connection handles one or more
/// framed requests until the peer closes").
pub async fn serve(
    listener: UnixListener,
    supervisor: Arc<Supervisor>,
    cancel: tokio_util::sync::CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("rpc listener cancelled");
                return;
            }
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let supervisor = Arc::clone(&supervisor);
                        tokio::spawn(async move {
                            if let Err(error) = handle_connection(stream, supervisor).await {
                                warn!(%error, "rpc connection closed with an error");
                            }
                        });
                    }
                    Err(error) => {
                        error!(%error, "accept failed");
                    }
                }
            }
        }
    }
}

async fn handle_connection(mut stream: UnixStream, supervisor: Arc<Supervisor>) -> Result<(), ProtocolError> {
    loop {
        let request = match procd_wire::read_request(&mut stream).await {
            Ok(request) => request,
            Err(ProtocolError::Closed) => return Ok(()),
            Err(ProtocolError::InvalidJson(_)) => {
                procd_wire::write_response(
                    &mut stream,
                    &Response::error(ErrorCode::InvalidJson, "malformed JSON"),
                )
                .await?;
                continue;
            }
            Err(error @ (ProtocolError::TooLarge { .. } | ProtocolError::Io(_))) => return Err(error),
        };

        let response = dispatch(&supervisor, request).await;
        procd_wire::write_response(&mut stream, &response).await?;
    }
}

async fn dispatch(supervisor: &Supervisor, request: Request) -> Response {
    match request {
        Request::Status => Response::status(supervisor.status()),
        Request::Start { name } => match supervisor.start_process(&name).await {
            Ok(true) => Response::ok(format!("{name} started")),
            Ok(false) => Response::error(ErrorCode::InternalError, format!("{name} did not reach RUNNING")),
            Err(error) => Response::error(ErrorCode::InvalidRequest, error.to_string()),
        },
        Request::Stop { name } => match supervisor.stop_process(&name).await {
            Ok(true) => Response::ok(format!("{name} stopped")),
            Ok(false) => Response::error(ErrorCode::InternalError, format!("{name} did not reach a terminal state")),
            Err(error) => Response::error(ErrorCode::InvalidRequest, error.to_string()),
        },
        Request::Restart { name, force } => match supervisor.restart_process(&name, force).await {
            Ok(true) => Response::ok(format!("{name} restarted")),
            Ok(false) => Response::error(ErrorCode::InternalError, format!("{name} did not reach RUNNING")),
            Err(error) => Response::error(ErrorCode::InvalidRequest, error.to_string()),
        },
        Request::StartGroup { name } => match supervisor.start_group(&name).await {
            Ok(true) => Response::ok(format!("group {name} started")),
            Ok(false) => Response::error(ErrorCode::InternalError, format!("group {name} failed to start fully")),
            Err(error) => Response::error(ErrorCode::InvalidRequest, error.to_string()),
        },
        Request::StopGroup { name } => match supervisor.stop_group(&name).await {
            Ok(true) => Response::ok(format!("group {name} stopped")),
            Ok(false) => Response::error(ErrorCode::InternalError, format!("group {name} failed to stop fully")),
            Err(error) => Response::error(ErrorCode::InvalidRequest, error.to_string()),
        },
        Request::Reload => {
            let Some(path) = supervisor.config_path() else {
                return Response::error(
                    ErrorCode::InternalError,
                    "daemon was not started from a config file, nothing to reload from",
                );
            };
            let programs = match crate::config::DaemonConfig::load(path) {
                Ok(config) => config.programs,
                Err(error) => return Response::error(ErrorCode::InternalError, error.to_string()),
            };
            let diff = supervisor.reload(programs).await;
            match diff.error {
                Some(message) => Response::error(ErrorCode::InternalError, message),
                None => Response::reload(procd_wire::ReloadDiff {
                    added: diff.added,
                    removed: diff.removed,
                    changed: diff.changed,
                }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use procd_core::test_support::test_program;
    use std::time::Duration;

    async fn test_supervisor(dir: &std::path::Path) -> Arc<Supervisor> {
        let config = crate::config::DaemonConfig {
            socket_path: dir.join("procd.sock"),
            pidfile: dir.join("procd.pid"),
            shutdown_timeout: Duration::from_secs(5),
            event_bus_capacity: 64,
            programs: vec![test_program("web", &["/bin/sleep", "5"])],
            config_path: None,
        };
        Supervisor::start(config).await.expect("start")
    }

    #[tokio::test]
    async fn status_round_trips_over_the_socket() {
        let dir = tempfile::tempdir().expect("tempdir");
        let supervisor = test_supervisor(dir.path()).await;
        let socket_path = dir.path().join("rpc.sock");
        let listener = bind(&socket_path).expect("bind");

        let cancel = tokio_util::sync::CancellationToken::new();
        let server_cancel = cancel.clone();
        let server = tokio::spawn(serve(listener, Arc::clone(&supervisor), server_cancel));

        let mut client = UnixStream::connect(&socket_path).await.expect("connect");
        let frame = procd_wire::encode(&Request::Status).expect("encode");
        procd_wire::write_message(&mut client, &frame[4..]).await.expect("write");
        let response: Response = procd_wire::decode(&procd_wire::read_message(&mut client).await.expect("read")).expect("decode");
        assert!(response.is_ok());

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), server).await;
        supervisor.shutdown().await;
    }

    #[test]
    fn socket_mode_is_owner_only_after_bind() {
        use std::os::unix::fs::PermissionsExt as _;
        let dir = tempfile::tempdir().expect("tempdir");
        let socket_path = dir.path().join("mode.sock");
        let _listener = bind(&socket_path).expect("bind");
        let mode = std::fs::metadata(&socket_path).expect("metadata").permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
    }
}
