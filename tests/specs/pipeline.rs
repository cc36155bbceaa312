// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The exec pipeline: shells coordinate over the barrier, emit exec
//! events into the guest namespace, and watchers read them back.

use flux_core::eventlog::Event;
use flux_core::Jobid;
use flux_daemon::{JobInfo, JobManager};
use flux_shell::info::ShellInfo;
use flux_shell::Shell;
use flux_storage::Kvs;
use flux_wire::{Cred, Router, RpcFlags};
use serde_json::{json, Value};
use serial_test::serial;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const JOBID: u64 = 77;

fn jobspec() -> Value {
    json!({
        "version": 1,
        "tasks": [{"command": ["true"], "count": {"total": 2}}],
        "attributes": {"system": {"duration": 0}},
    })
}

fn resources() -> Value {
    json!({
        "version": 1,
        "execution": {"R_lite": [
            {"rank": "0", "children": {"core": "0"}},
            {"rank": "1", "children": {"core": "0"}},
        ]},
    })
}

/// The exec-system side of the barrier: collect `enter` from every
/// shell, then release all of them, for `rounds` rounds.
async fn run_barrier_peer(
    mut channels: Vec<(tokio::io::DuplexStream, tokio::io::DuplexStream)>,
    rounds: usize,
) {
    for _ in 0..rounds {
        for (reader, _) in channels.iter_mut() {
            let mut buf = [0u8; 6];
            reader.read_exact(&mut buf).await.expect("barrier enter");
            assert_eq!(&buf, b"enter\n");
        }
        for (_, writer) in channels.iter_mut() {
            writer.write_all(b"exit=0\n").await.expect("barrier release");
        }
    }
}

#[tokio::test]
#[serial]
async fn two_shells_barrier_and_emit_exec_events_once() {
    let kvs = Kvs::new();
    let router = Router::new();
    JobInfo::start(router.handle(Cred::owner(0)), kvs.clone());
    JobManager::start(router.handle(Cred::owner(0)), kvs.clone());

    // job on the books first, so guest watchers can authorize
    router
        .handle(Cred::owner(0))
        .rpc(
            "job-manager.submit",
            json!({"jobs": [{
                "id": JOBID, "userid": 1000, "urgency": 16, "t_submit": 0.0,
                "jobspec": jobspec(), "R": resources(),
            }]}),
            RpcFlags::default(),
        )
        .get()
        .await
        .unwrap();

    // a guest watcher subscribes before the shells start
    let watcher = router.handle(Cred::user(1000));
    let mut watch = watcher.rpc(
        "job-info.eventlog-watch",
        json!({"id": JOBID, "path": "guest.exec.eventlog", "flags": 1}),
        RpcFlags::STREAMING,
    );

    let info0 =
        ShellInfo::from_documents(Jobid(JOBID), 0, jobspec(), resources()).unwrap();
    let info1 =
        ShellInfo::from_documents(Jobid(JOBID), 1, jobspec(), resources()).unwrap();
    assert_eq!(info0.shell_size, 2);

    // leader first: it creates the guest namespace
    let mut shell0 = Shell::new(info0, kvs.clone(), 1000).unwrap();
    let mut shell1 = Shell::new(info1, kvs.clone(), 1000).unwrap();

    // the exec system announces the job start once the namespace exists
    let start = Event::build(2.0, "start", None).unwrap().encode().unwrap();
    let mut txn = flux_storage::Txn::new();
    txn.append(&Jobid(JOBID).kvs_key("eventlog"), &start);
    kvs.commit(None, txn).unwrap();

    // wire both shells to the barrier peer
    let (r0, peer_w0) = tokio::io::duplex(64);
    let (peer_r0, w0) = tokio::io::duplex(64);
    let (r1, peer_w1) = tokio::io::duplex(64);
    let (peer_r1, w1) = tokio::io::duplex(64);
    let peer = tokio::spawn(run_barrier_peer(
        vec![(peer_r0, peer_w0), (peer_r1, peer_w1)],
        2,
    ));

    let (rc0, rc1) = tokio::join!(shell0.run(r0, w0), shell1.run(r1, w1));
    peer.await.unwrap();
    assert_eq!(rc0.unwrap(), 0);
    assert_eq!(rc1.unwrap(), 0);

    // exec eventlog contains shell.init then shell.start, exactly once
    let log = kvs
        .lookup(Some(&Jobid(JOBID).guest_namespace()), "exec.eventlog")
        .unwrap();
    let names: Vec<String> = flux_core::eventlog::decode_log(&log)
        .unwrap()
        .into_iter()
        .map(|e| e.name)
        .collect();
    assert_eq!(names.iter().filter(|n| *n == "shell.init").count(), 1);
    assert_eq!(names.iter().filter(|n| *n == "shell.start").count(), 1);
    assert!(
        names.iter().position(|n| n == "shell.init").unwrap()
            < names.iter().position(|n| n == "shell.start").unwrap()
    );

    // the live guest watcher saw the same events
    let mut seen = Vec::new();
    while seen.len() < 2 {
        let reply = tokio::time::timeout(Duration::from_secs(5), watch.next())
            .await
            .expect("watch timed out")
            .expect("watch errored");
        let line = reply.get("event").and_then(Value::as_str).unwrap();
        let name = Event::decode(line).unwrap().name;
        if name.starts_with("shell.") {
            seen.push(name);
        }
    }
    assert_eq!(seen, vec!["shell.init", "shell.start"]);
}

#[tokio::test]
#[serial]
async fn released_guest_log_reaches_late_watchers() {
    let kvs = Kvs::new();
    let router = Router::new();
    JobInfo::start(router.handle(Cred::owner(0)), kvs.clone());
    JobManager::start(router.handle(Cred::owner(0)), kvs.clone());
    let client = router.handle(Cred::owner(0));

    let solo_r = json!({
        "version": 1,
        "execution": {"R_lite": [{"rank": "0", "children": {"core": "0"}}]},
    });
    let solo_spec = json!({
        "tasks": [{"command": ["echo", "payload"], "count": {"total": 1}}],
        "attributes": {"system": {}},
    });
    client
        .rpc(
            "job-manager.submit",
            json!({"jobs": [{
                "id": 78, "userid": 1000, "urgency": 16, "t_submit": 0.0,
                "jobspec": solo_spec, "R": solo_r,
            }]}),
            RpcFlags::default(),
        )
        .get()
        .await
        .unwrap();

    let info = ShellInfo::from_documents(
        Jobid(78),
        0,
        client
            .rpc("job-info.lookup", json!({"id": 78, "keys": ["jobspec"], "flags": 1}), RpcFlags::default())
            .get()
            .await
            .unwrap()
            .get("jobspec")
            .cloned()
            .unwrap(),
        client
            .rpc("job-info.lookup", json!({"id": 78, "keys": ["R"], "flags": 1}), RpcFlags::default())
            .get()
            .await
            .unwrap()
            .get("R")
            .cloned()
            .unwrap(),
    )
    .unwrap();
    let mut shell = Shell::new(info, kvs.clone(), 1000).unwrap();
    let rc = shell.run(tokio::io::empty(), tokio::io::sink()).await.unwrap();
    assert_eq!(rc, 0);
    shell.release_guest_namespace().await.unwrap();

    // after release the namespace is gone; watchers read the main copy
    assert!(!kvs.namespace_exists(&Jobid(78).guest_namespace()));
    let mut watch = router.handle(Cred::user(1000)).rpc(
        "job-info.eventlog-watch",
        json!({"id": 78, "path": "guest.output", "flags": 1}),
        RpcFlags::STREAMING,
    );
    let mut payload = Vec::new();
    // header + data events; stop once the task's stdout shows up
    for _ in 0..16 {
        let reply = tokio::time::timeout(Duration::from_secs(5), watch.next())
            .await
            .expect("watch timed out")
            .expect("watch errored");
        let line = reply.get("event").and_then(Value::as_str).unwrap();
        let event = Event::decode(line).unwrap();
        if event.name == "data" {
            let io = flux_core::ioencode::iodecode(event.context.as_ref().unwrap()).unwrap();
            if io.stream == "stdout" {
                if let Some(d) = io.data {
                    payload.extend_from_slice(&d);
                }
                if payload == b"payload\n" {
                    break;
                }
            }
        }
    }
    assert_eq!(payload, b"payload\n");
}
