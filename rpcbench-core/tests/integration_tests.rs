// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! End-to-end lifecycle tests.
//!
//! These tests bring real backends up through the coordinator, call them,
//! and verify that nothing is left behind after teardown or failed setup.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::StreamExt;
use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use tempfile::TempDir;

use rpcbench_core::lifecycle::BackendState;
use rpcbench_core::{
    BackendTarget, DirectoryServer, LifecycleCoordinator, LifecycleError, LifecycleSettings,
    Payload, TransportKind,
};

fn fast_settings() -> LifecycleSettings {
    let mut settings = LifecycleSettings::default();
    settings.ready_timeout = Duration::from_secs(2);
    settings.setup_timeout = Duration::from_secs(10);
    settings.shutdown_grace = Duration::from_secs(1);
    settings.call_timeout = Duration::from_secs(5);
    settings.directory.lookup_attempts = 3;
    settings.directory.lookup_backoff = Duration::from_millis(50);
    settings
}

async fn start_directory() -> DirectoryServer {
    DirectoryServer::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("Failed to start directory service")
}

/// Write an executable shell script standing in for the server program.
fn write_script(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("fake-server.sh");
    std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("Failed to write script");

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = std::fs::metadata(&path).unwrap().permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).unwrap();
    }
    path
}

fn read_pid(path: &Path) -> i32 {
    std::fs::read_to_string(path)
        .expect("Script did not record its pid")
        .trim()
        .parse()
        .expect("Invalid pid")
}

fn assert_no_process(pid: i32) {
    assert_eq!(
        kill(Pid::from_raw(pid), None),
        Err(Errno::ESRCH),
        "process {} is still alive",
        pid
    );
}

#[tokio::test]
async fn test_every_kind_serves_calls_in_process() {
    let mut directory = start_directory().await;
    let mut settings = fast_settings();
    settings.directory.address = directory.local_addr();
    let coordinator = LifecycleCoordinator::new(settings);

    for kind in TransportKind::ALL {
        let mut handle = coordinator
            .setup(&BackendTarget::new(kind, false))
            .await
            .unwrap_or_else(|e| panic!("{} setup failed: {}", kind, e));
        let transport = handle.transport().unwrap();

        assert_eq!(
            transport.simple_call(Payload::Int(42)).await.unwrap(),
            Payload::Int(84),
            "{}",
            kind
        );
        assert_eq!(
            transport
                .simple_call(Payload::text_of_len(1024))
                .await
                .unwrap()
                .len(),
            2048
        );

        let values: Vec<i64> = transport
            .stream_values(1000)
            .await
            .unwrap()
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(values, (0..1000).collect::<Vec<i64>>(), "{}", kind);

        let empty = transport.stream_values(0).await.unwrap().count().await;
        assert_eq!(empty, 0);

        coordinator.teardown(&mut handle).await;
        assert_eq!(handle.state(), BackendState::Terminated);
    }

    // Directory registrations are removed on teardown.
    assert!(directory.is_empty());
    directory.shutdown().await;
}

#[tokio::test]
async fn test_teardown_is_idempotent() {
    let coordinator = LifecycleCoordinator::new(fast_settings());
    let mut handle = coordinator
        .setup(&BackendTarget::new(TransportKind::MessageQueue, false))
        .await
        .unwrap();
    let transport = handle.transport().unwrap();

    coordinator.teardown(&mut handle).await;
    coordinator.teardown(&mut handle).await;

    assert_eq!(handle.state(), BackendState::Terminated);
    assert!(transport.simple_call(Payload::Int(1)).await.is_err());
}

#[tokio::test]
async fn test_concurrent_calls_share_multiplexed_connection() {
    let coordinator = LifecycleCoordinator::new(fast_settings());
    let mut handle = coordinator
        .setup(&BackendTarget::new(TransportKind::Broker, false))
        .await
        .unwrap();
    let transport = handle.transport().unwrap();

    let calls = (0..50).map(|i| {
        let transport = transport.clone();
        async move { transport.simple_call(Payload::Int(i)).await }
    });
    let results = futures::future::join_all(calls).await;
    for (i, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap(), Payload::Int(2 * i as i64));
    }

    coordinator.teardown(&mut handle).await;
}

#[tokio::test]
async fn test_never_ready_process_leaves_no_orphan() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let pid_file = temp_dir.path().join("server.pid");
    let script = write_script(
        temp_dir.path(),
        &format!("echo $$ > {}\necho 'still starting'\nexec sleep 30", pid_file.display()),
    );

    let mut settings = fast_settings();
    settings.ready_timeout = Duration::from_secs(1);
    settings.server_program = Some(script);
    let coordinator = LifecycleCoordinator::new(settings);

    let err = coordinator
        .setup(&BackendTarget::new(TransportKind::Framed, true))
        .await
        .unwrap_err();

    match &err {
        LifecycleError::BackendStartup { kind, output, .. } => {
            assert_eq!(*kind, TransportKind::Framed);
            assert!(output.iter().any(|line| line.contains("still starting")));
        }
        other => panic!("unexpected error: {}", other),
    }
    assert_no_process(read_pid(&pid_file));
}

#[tokio::test]
async fn test_failed_transport_setup_releases_process() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let pid_file = temp_dir.path().join("server.pid");
    // Announces readiness but never listens.
    let script = write_script(
        temp_dir.path(),
        &format!("echo $$ > {}\necho READY\nexec sleep 30", pid_file.display()),
    );

    let mut settings = fast_settings();
    settings.server_program = Some(script);
    let coordinator = LifecycleCoordinator::new(settings);

    let err = coordinator
        .setup(&BackendTarget::new(TransportKind::Threaded, true))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::BackendStartup { .. }));
    assert_no_process(read_pid(&pid_file));
}

#[tokio::test]
async fn test_directory_kind_without_directory_service() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let unused = listener.local_addr().unwrap();
    drop(listener);

    let mut settings = fast_settings();
    settings.directory.address = unused;
    let coordinator = LifecycleCoordinator::new(settings);

    let err = coordinator
        .setup(&BackendTarget::new(TransportKind::Directory, false))
        .await
        .unwrap_err();
    assert!(matches!(err, LifecycleError::BackendDiscovery { .. }));
}

#[tokio::test]
async fn test_directory_service_started_late() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let late_directory = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        DirectoryServer::bind(addr)
            .await
            .expect("Failed to start directory service")
    });

    let mut settings = fast_settings();
    settings.directory.address = addr;
    settings.directory.lookup_attempts = 10;
    settings.directory.lookup_backoff = Duration::from_millis(50);
    let coordinator = LifecycleCoordinator::new(settings);

    let mut handle = coordinator
        .setup(&BackendTarget::new(TransportKind::Directory, false))
        .await
        .expect("Setup should wait for the directory service");
    let transport = handle.transport().unwrap();
    assert_eq!(
        transport.simple_call(Payload::Int(21)).await.unwrap(),
        Payload::Int(42)
    );

    coordinator.teardown(&mut handle).await;
    let mut directory = late_directory.await.unwrap();
    assert!(directory.is_empty());
    directory.shutdown().await;
}

#[tokio::test]
async fn test_setup_timeout() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let pid_file = temp_dir.path().join("server.pid");
    let script = write_script(
        temp_dir.path(),
        &format!("echo $$ > {}\nexec sleep 30", pid_file.display()),
    );

    let mut settings = fast_settings();
    settings.ready_timeout = Duration::from_secs(5);
    settings.setup_timeout = Duration::from_millis(300);
    settings.server_program = Some(script);
    let coordinator = LifecycleCoordinator::new(settings);

    let err = coordinator
        .setup(&BackendTarget::new(TransportKind::Framed, true))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::BackendTimeout { phase: "setup", .. }
    ));
    assert_no_process(read_pid(&pid_file));
}
