mod common;

use std::sync::atomic::Ordering;

use common::{executor_with, key, FakeTransport};
use rdock_core::error::{ConnectionError, RemoteError};

#[tokio::test]
async fn test_execute_reuses_one_session() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    transport.respond("docker ps -q", 0, "abc123\n");
    let executor = executor_with(&transport, dir.path());
    let k = key("docker-1");

    let first = executor.execute(&k, "docker ps -q").await.unwrap();
    let second = executor.execute(&k, "uptime").await.unwrap();

    assert_eq!(&first[..], b"abc123\n");
    assert_eq!(&second[..], b"ok\n");
    assert_eq!(transport.starts(), 1);
    assert_eq!(
        transport.user_commands(),
        vec![
            (k.clone(), "docker ps -q".to_string()),
            (k, "uptime".to_string())
        ]
    );
}

#[tokio::test]
async fn test_nonzero_exit_keeps_session() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    transport.respond("docker start nope", 1, "Error: No such container: nope\n");
    let executor = executor_with(&transport, dir.path());
    let k = key("docker-1");

    let err = executor.execute(&k, "docker start nope").await.unwrap_err();

    match &err {
        RemoteError::Exit { status, output } => {
            assert_eq!(*status, Some(1));
            assert!(output.contains("No such container"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(err.to_string().contains("exit 1"));
    assert!(executor.pool().is_established(&k).await);
}

#[tokio::test]
async fn test_transport_failure_marks_session_for_reconnect() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    transport.respond("docker ps", 255, "mux_client_request_session: read from master failed\n");
    let executor = executor_with(&transport, dir.path());
    let k = key("docker-1");

    let err = executor.execute(&k, "docker ps").await.unwrap_err();
    assert!(err.is_transport());
    assert!(!executor.pool().is_established(&k).await);

    // Not re-run on its own
    assert_eq!(transport.user_commands().len(), 1);

    executor.execute(&k, "uptime").await.unwrap();
    assert_eq!(transport.starts(), 2);
}

#[tokio::test]
async fn test_connection_failure_is_surfaced_after_one_attempt() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    transport.liveness_fails.store(true, Ordering::SeqCst);
    let executor = executor_with(&transport, dir.path());

    let err = executor.execute(&key("down"), "uptime").await.unwrap_err();

    assert!(matches!(
        err,
        RemoteError::Connection(ConnectionError::ProbeFailed { .. })
    ));
    assert_eq!(transport.starts(), 1);
    assert!(transport.user_commands().is_empty());
}

#[tokio::test]
async fn test_command_waits_for_a_replacement_master() {
    let dir = tempfile::tempdir().unwrap();
    let transport = FakeTransport::new();
    let executor = executor_with(&transport, dir.path());
    let k = key("docker-1");

    executor.execute(&k, "uptime").await.unwrap();
    let control_path = transport.control_paths.lock().unwrap()[0].clone();
    transport.master_exits(&control_path);

    executor.execute(&k, "docker ps").await.unwrap();

    assert_eq!(transport.starts(), 2);
    assert!(control_path.exists());
    assert_eq!(transport.user_commands().len(), 2);
}
