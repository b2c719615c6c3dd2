//! Process lifecycle tests using plain system binaries.

use rodeos_harness::{
    supervisor::{ProcessHandle, Signal},
    Error,
};
use std::time::Duration;

#[tokio::test]
async fn stop_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let mut handle = ProcessHandle::launch(
        "sleeper",
        "sleep",
        vec!["30".into()],
        dir.path().join("sleeper"),
        true,
    )
    .await
    .unwrap();
    assert!(handle.is_running());
    handle.stop(Signal::Terminate).await.unwrap();
    assert!(!handle.is_running());
    // Stopping an already-stopped process is a no-op.
    handle.stop(Signal::Terminate).await.unwrap();
    handle.stop(Signal::Kill).await.unwrap();
}

#[tokio::test]
async fn sigkill_stops_a_process_that_ignores_term() {
    let dir = tempfile::tempdir().unwrap();
    let mut handle = ProcessHandle::launch(
        "stubborn",
        "sh",
        vec!["-c".into(), "trap '' TERM; sleep 30".into()],
        dir.path().join("stubborn"),
        true,
    )
    .await
    .unwrap();
    // Give the shell a moment to install the trap.
    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.stop(Signal::Kill).await.unwrap();
    assert!(!handle.is_running());
}

#[tokio::test]
async fn reaping_a_self_exited_process_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let mut handle = ProcessHandle::launch(
        "short",
        "sh",
        vec!["-c".into(), "true".into()],
        dir.path().join("short"),
        true,
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    // The child exited on its own; the signal finds no process but the
    // handle still reaps it cleanly.
    handle.stop(Signal::Interrupt).await.unwrap();
}

#[tokio::test]
async fn clean_restart_wipes_the_data_dir_and_warm_preserves_it() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("node");
    let mut handle = ProcessHandle::launch("node", "sleep", vec!["30".into()], &data_dir, true)
        .await
        .unwrap();
    let marker = data_dir.join("state.db");
    std::fs::write(&marker, "persisted").unwrap();

    handle.restart(false).await.unwrap();
    assert!(marker.exists(), "warm restart must keep on-disk state");

    handle.restart(true).await.unwrap();
    assert!(!marker.exists(), "clean restart must wipe on-disk state");
    handle.stop(Signal::Terminate).await.unwrap();
}

#[tokio::test]
async fn warm_restart_appends_to_logs_and_clean_truncates_them() {
    let dir = tempfile::tempdir().unwrap();
    let data_dir = dir.path().join("chatty");
    let mut handle = ProcessHandle::launch(
        "chatty",
        "sh",
        vec!["-c".into(), "echo run".into()],
        &data_dir,
        true,
    )
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    handle.restart(false).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let log = std::fs::read_to_string(data_dir.join("stdout.out")).unwrap();
    assert_eq!(log, "run\nrun\n");

    handle.restart(true).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    let log = std::fs::read_to_string(data_dir.join("stdout.out")).unwrap();
    assert_eq!(log, "run\n");
    handle.stop(Signal::Terminate).await.unwrap();
}

#[tokio::test]
async fn launching_a_missing_binary_fails_without_retry() {
    let dir = tempfile::tempdir().unwrap();
    let result = ProcessHandle::launch(
        "ghost",
        "/nonexistent/binary/for/this/test",
        vec![],
        dir.path().join("ghost"),
        true,
    )
    .await;
    let err = result.err().expect("expected launch failure");
    assert!(matches!(err, Error::LaunchFailed { ref name, .. } if name == "ghost"));
}
