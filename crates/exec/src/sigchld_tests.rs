// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! These tests fork real children, so they share the process-wide
//! reaper and must not run concurrently with each other.

use super::*;
use serial_test::serial;
use std::process::Command;
use std::time::Duration;
use tokio::sync::mpsc;

fn spawn_true() -> i32 {
    let child = Command::new("true").spawn().expect("spawn true");
    child.id() as i32
}

async fn recv_timeout<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("timed out waiting for SIGCHLD dispatch")
        .expect("channel closed")
}

#[tokio::test]
#[serial]
async fn reaps_and_dispatches_status() {
    initialize().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let pid = spawn_true();
    register(
        pid,
        Arc::new(move |p, status| {
            let _ = tx.send((p.as_raw(), status));
        }),
    )
    .unwrap();

    let (got_pid, status) = recv_timeout(&mut rx).await;
    assert_eq!(got_pid, pid);
    assert_eq!(status, WaitStatus::Exited(Pid::from_raw(pid), 0));

    unregister(pid);
    finalize();
}

#[tokio::test]
#[serial]
async fn fanout_to_many_children() {
    initialize().unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut pids = Vec::new();
    for _ in 0..8 {
        let pid = spawn_true();
        let tx = tx.clone();
        register(
            pid,
            Arc::new(move |p, status| {
                let _ = tx.send((p.as_raw(), status));
            }),
        )
        .unwrap();
        pids.push(pid);
    }

    let mut seen = Vec::new();
    for _ in 0..pids.len() {
        let (pid, status) = recv_timeout(&mut rx).await;
        assert!(matches!(status, WaitStatus::Exited(_, 0)));
        seen.push(pid);
    }
    seen.sort_unstable();
    pids.sort_unstable();
    assert_eq!(seen, pids, "exactly one callback per registered pid");

    for pid in pids {
        unregister(pid);
    }
    finalize();
}

#[tokio::test]
#[serial]
async fn exit_before_register_is_replayed() {
    initialize().unwrap();
    let pid = spawn_true();
    // let the child exit and the listener reap it first
    tokio::time::sleep(Duration::from_millis(200)).await;
    drain();

    let (tx, mut rx) = mpsc::unbounded_channel();
    register(
        pid,
        Arc::new(move |p, status| {
            let _ = tx.send((p.as_raw(), status));
        }),
    )
    .unwrap();
    let (got_pid, status) = recv_timeout(&mut rx).await;
    assert_eq!(got_pid, pid);
    assert!(matches!(status, WaitStatus::Exited(_, 0)));

    unregister(pid);
    finalize();
}

#[tokio::test]
#[serial]
async fn refcount_keeps_context_alive() {
    initialize().unwrap();
    initialize().unwrap();
    finalize();
    // still initialized: register succeeds
    let pid = spawn_true();
    register(pid, Arc::new(|_, _| {})).unwrap();
    unregister(pid);
    finalize();
    // now torn down
    assert_eq!(register(1, Arc::new(|_, _| {})), Err(Errnum::Inval));
}

#[tokio::test]
#[serial]
async fn register_rejects_bad_pid() {
    initialize().unwrap();
    assert_eq!(register(0, Arc::new(|_, _| {})), Err(Errnum::Inval));
    assert_eq!(register(-5, Arc::new(|_, _| {})), Err(Errnum::Inval));
    finalize();
}

#[test]
#[serial]
fn kill_missing_process_is_srch() {
    // pid 999999 should not exist
    assert_eq!(kill(999_999, Signal::SIGTERM), Err(Errnum::Srch));
}
