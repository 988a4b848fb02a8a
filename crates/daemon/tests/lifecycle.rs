//! End-to-end coverage of the process lifecycle, group operations, hot
//! reload, and the RPC surface, exercised against real `/bin/sleep` and
//! `/bin/false` subprocesses rather than mocks. See spec §8.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use procd::config::DaemonConfig;
use procd::supervisor::Supervisor;
use procd_core::test_support::test_program;
use procd_wire::{ErrorCode, Request, Response};
use tokio::net::UnixStream;

fn config_in(dir: &std::path::Path, programs: Vec<procd_core::ProgramConfig>) -> DaemonConfig {
    DaemonConfig {
        socket_path: dir.join("procd.sock"),
        pidfile: dir.join("procd.pid"),
        shutdown_timeout: Duration::from_secs(5),
        event_bus_capacity: 64,
        programs,
        config_path: None,
    }
}

#[tokio::test]
async fn start_stop_restart_round_trip_a_single_process() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = Supervisor::start(config_in(dir.path(), vec![test_program("web", &["/bin/sleep", "30"])]))
        .await
        .expect("start");

    assert!(supervisor.start_process("web").await.expect("start_process"));
    let running = supervisor.status().into_iter().find(|p| p.name == "web").expect("web row");
    assert_eq!(running.state, "RUNNING");
    assert!(running.pid.is_some());

    assert!(supervisor.restart_process("web", false).await.expect("restart"));
    let restarted = supervisor.status().into_iter().find(|p| p.name == "web").expect("web row");
    assert_eq!(restarted.state, "RUNNING");
    assert_ne!(restarted.pid, running.pid, "restart should spawn a new child");

    assert!(supervisor.stop_process("web").await.expect("stop"));
    let stopped = supervisor.status().into_iter().find(|p| p.name == "web").expect("web row");
    assert_eq!(stopped.state, "STOPPED");
    assert!(stopped.pid.is_none());

    supervisor.shutdown().await;
}

#[tokio::test]
async fn autostart_false_leaves_a_process_stopped() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut program = test_program("web", &["/bin/sleep", "30"]);
    program.autostart = false;
    let supervisor = Supervisor::start(config_in(dir.path(), vec![program])).await.expect("start");

    tokio::time::sleep(Duration::from_millis(50)).await;
    let row = supervisor.status().into_iter().find(|p| p.name == "web").expect("web row");
    assert_eq!(row.state, "STOPPED");

    supervisor.shutdown().await;
}

#[tokio::test]
async fn a_process_that_exits_immediately_and_repeatedly_reaches_fatal() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut program = test_program("flapping", &["/bin/false"]);
    program.startretries = 2;
    program.autorestart = true;
    let supervisor = Supervisor::start(config_in(dir.path(), vec![program])).await.expect("start");

    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let row = supervisor.status().into_iter().find(|p| p.name == "flapping").expect("row");
        if row.state == "FATAL" {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "never reached FATAL");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    supervisor.shutdown().await;
}

#[tokio::test]
async fn group_operations_fan_out_to_every_member() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut a = test_program("worker-a", &["/bin/sleep", "30"]);
    a.group = Some("workers".to_string());
    let mut b = test_program("worker-b", &["/bin/sleep", "30"]);
    b.group = Some("workers".to_string());
    let supervisor = Supervisor::start(config_in(dir.path(), vec![a, b])).await.expect("start");

    assert!(supervisor.start_group("workers").await.expect("start_group"));
    for name in ["worker-a", "worker-b"] {
        let row = supervisor.status().into_iter().find(|p| p.name == name).expect("row");
        assert_eq!(row.state, "RUNNING");
    }

    assert!(supervisor.stop_group("workers").await.expect("stop_group"));
    for name in ["worker-a", "worker-b"] {
        let row = supervisor.status().into_iter().find(|p| p.name == name).expect("row");
        assert_eq!(row.state, "STOPPED");
    }

    supervisor.shutdown().await;
}

#[tokio::test]
async fn unknown_process_and_group_names_are_rejected() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor = Supervisor::start(config_in(dir.path(), vec![test_program("web", &["/bin/sleep", "30"])]))
        .await
        .expect("start");

    assert!(supervisor.start_process("ghost").await.is_err());
    assert!(supervisor.start_group("ghosts").await.is_err());

    supervisor.shutdown().await;
}

#[tokio::test]
async fn reload_adds_removes_and_reports_changed_programs_without_restarting_them() {
    let dir = tempfile::tempdir().expect("tempdir");
    let unchanged = test_program("steady", &["/bin/sleep", "30"]);
    let to_remove = test_program("leaving", &["/bin/sleep", "30"]);
    let supervisor =
        Supervisor::start(config_in(dir.path(), vec![unchanged.clone(), to_remove])).await.expect("start");
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut changed = unchanged.clone();
    changed.startretries = unchanged.startretries + 1;
    let arriving = test_program("arriving", &["/bin/sleep", "30"]);

    let diff = supervisor.reload(vec![changed, arriving]).await;
    assert_eq!(diff.added, vec!["arriving".to_string()]);
    assert_eq!(diff.removed, vec!["leaving".to_string()]);
    assert_eq!(diff.changed, vec!["steady".to_string()]);
    assert!(diff.error.is_none());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let rows = supervisor.status();
    assert!(rows.iter().any(|p| p.name == "arriving" && p.state == "RUNNING"));
    assert!(!rows.iter().any(|p| p.name == "leaving"));

    supervisor.shutdown().await;
}

#[tokio::test]
async fn the_rpc_socket_answers_a_full_command_sequence() {
    let dir = tempfile::tempdir().expect("tempdir");
    let supervisor =
        Supervisor::start(config_in(dir.path(), vec![test_program("web", &["/bin/sleep", "30"])]))
            .await
            .expect("start");
    let socket_path = dir.path().join("rpc.sock");
    let listener = procd::rpc::bind(&socket_path).expect("bind");

    let cancel = tokio_util::sync::CancellationToken::new();
    let server = tokio::spawn(procd::rpc::serve(listener, Arc::clone(&supervisor), cancel.clone()));

    let mut client = UnixStream::connect(&socket_path).await.expect("connect");

    let response = roundtrip(&mut client, Request::Start { name: "web".to_string() }).await;
    assert!(response.is_ok());

    let response = roundtrip(&mut client, Request::Status).await;
    match response {
        Response::Ok { processes: Some(processes), .. } => {
            assert!(processes.iter().any(|p| p.name == "web" && p.state == "RUNNING"));
        }
        other => panic!("expected a process list, got {other:?}"),
    }

    let response = roundtrip(&mut client, Request::Stop { name: "ghost".to_string() }).await;
    match response {
        Response::Error { code, .. } => assert_eq!(code, ErrorCode::InvalidRequest),
        other => panic!("expected an error response, got {other:?}"),
    }

    cancel.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(1), server).await;
    supervisor.shutdown().await;
}

async fn roundtrip(stream: &mut UnixStream, request: Request) -> Response {
    let payload = serde_json::to_vec(&request).expect("encode");
    procd_wire::write_message(stream, &payload).await.expect("write");
    let payload = procd_wire::read_message(stream).await.expect("read");
    procd_wire::decode(&payload).expect("decode")
}
