// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Submit, taskmap, and update projection scenarios.

use flux_core::eventlog::{self, Event};
use flux_core::{Jobid, JobidForm, Taskmap, TaskmapEncoding};
use flux_daemon::{JobInfo, JobManager};
use flux_storage::Kvs;
use flux_wire::{Cred, Router, RpcFlags};
use serde_json::{json, Value};
use std::time::Duration;

struct Broker {
    kvs: Kvs,
    router: Router,
}

fn broker() -> Broker {
    let router = Router::new();
    let kvs = Kvs::new();
    JobInfo::start(router.handle(Cred::owner(0)), kvs.clone());
    JobManager::start(router.handle(Cred::owner(0)), kvs.clone());
    Broker { kvs, router }
}

async fn get(
    handle: &flux_wire::Handle,
    topic: &str,
    payload: Value,
) -> Result<Value, flux_wire::RpcError> {
    tokio::time::timeout(
        Duration::from_secs(5),
        handle.rpc(topic, payload, RpcFlags::default()).get(),
    )
    .await
    .expect("rpc timed out")
}

#[tokio::test]
async fn job_submit_echoes_jobid_into_eventlog() {
    let b = broker();
    let client = b.router.handle(Cred::owner(0));
    let reply = get(
        &client,
        "job-manager.submit",
        json!({"jobs": [{"id": 42, "userid": 1000, "urgency": 16, "t_submit": 0.0}]}),
    )
    .await
    .unwrap();
    assert_eq!(reply.get("ids"), Some(&json!([42])));

    let log = b.kvs.lookup(None, &Jobid(42).kvs_key("eventlog")).unwrap();
    let events = eventlog::decode_log(&log).unwrap();
    assert_eq!(events.len(), 1);
    let submit = &events[0];
    assert_eq!(submit.name, "submit");
    assert!(submit.timestamp > 0.0);
    let context = submit.context.as_ref().unwrap();
    assert_eq!(context.get("id"), Some(&json!(42)));
    assert_eq!(context.get("urgency"), Some(&json!(16)));
    assert_eq!(context.get("userid"), Some(&json!(1000)));
    assert_eq!(context.get("t_submit"), Some(&json!(0.0)));
}

#[test]
fn taskmap_identity_block_and_cyclic() {
    let block = Taskmap::decode("[[0,4,4,1]]").unwrap();
    assert_eq!(block.encode(TaskmapEncoding::Raw), "0-3;4-7;8-11;12-15");
    assert_eq!(block.encode(TaskmapEncoding::Pmi), "(vector,(0,4,4))");

    let cyclic = Taskmap::decode("[[0,4,1,4]]").unwrap();
    assert_eq!(
        cyclic.encode(TaskmapEncoding::Raw),
        "0,4,8,12;1,5,9,13;2,6,10,14;3,7,11,15"
    );
}

#[tokio::test]
async fn update_lookup_composes_base_and_updates() {
    let b = broker();
    let client = b.router.handle(Cred::owner(0));
    let id = Jobid(7);
    get(
        &client,
        "job-manager.submit",
        json!({"jobs": [{
            "id": 7, "userid": 1000, "urgency": 16, "t_submit": 0.0,
            "R": {"execution": {"expiration": 100.0}},
        }]}),
    )
    .await
    .unwrap();

    // a resource-update event lands in the eventlog
    let line = Event::build(2.0, "resource-update", match json!({"expiration": 200.0}) {
        Value::Object(m) => Some(m),
        _ => None,
    })
    .unwrap()
    .encode()
    .unwrap();
    let mut txn = flux_storage::Txn::new();
    txn.append(&id.kvs_key("eventlog"), &line);
    b.kvs.commit(None, txn).unwrap();

    let reply = get(
        &client,
        "job-info.lookup",
        json!({"id": 7, "keys": ["R"], "flags": 2}),
    )
    .await
    .unwrap();
    assert_eq!(reply.pointer("/R/execution/expiration"), Some(&json!(200.0)));
}

#[tokio::test]
async fn update_watch_delivers_to_both_subscribers() {
    let b = broker();
    let client = b.router.handle(Cred::owner(0));
    let id = Jobid(8);
    get(
        &client,
        "job-manager.submit",
        json!({"jobs": [{
            "id": 8, "userid": 1000, "urgency": 16, "t_submit": 0.0,
            "R": {"execution": {"expiration": 100.0}},
        }]}),
    )
    .await
    .unwrap();

    let sub_a = b.router.handle(Cred::user(1000));
    let sub_b = b.router.handle(Cred::user(1000));
    let mut a = sub_a.rpc(
        "job-info.update-watch",
        json!({"id": 8, "key": "R", "flags": 0}),
        RpcFlags::STREAMING,
    );
    let mut b_rpc = sub_b.rpc(
        "job-info.update-watch",
        json!({"id": 8, "key": "R", "flags": 0}),
        RpcFlags::STREAMING,
    );
    assert_eq!(
        next_update(&mut a).await.pointer("/R/execution/expiration"),
        Some(&json!(100.0))
    );
    assert_eq!(
        next_update(&mut b_rpc).await.pointer("/R/execution/expiration"),
        Some(&json!(100.0))
    );

    let line = Event::build(2.0, "resource-update", match json!({"expiration": 300.0}) {
        Value::Object(m) => Some(m),
        _ => None,
    })
    .unwrap()
    .encode()
    .unwrap();
    let mut txn = flux_storage::Txn::new();
    txn.append(&id.kvs_key("eventlog"), &line);
    b.kvs.commit(None, txn).unwrap();

    assert_eq!(
        next_update(&mut a).await.pointer("/R/execution/expiration"),
        Some(&json!(300.0))
    );
    assert_eq!(
        next_update(&mut b_rpc).await.pointer("/R/execution/expiration"),
        Some(&json!(300.0))
    );

    // one subscriber leaves; the other keeps receiving updates
    sub_a.disconnect();
    let line = Event::build(3.0, "resource-update", match json!({"expiration": 400.0}) {
        Value::Object(m) => Some(m),
        _ => None,
    })
    .unwrap()
    .encode()
    .unwrap();
    let mut txn = flux_storage::Txn::new();
    txn.append(&id.kvs_key("eventlog"), &line);
    b.kvs.commit(None, txn).unwrap();
    assert_eq!(
        next_update(&mut b_rpc).await.pointer("/R/execution/expiration"),
        Some(&json!(400.0))
    );
}

async fn next_update(rpc: &mut flux_wire::Rpc) -> Value {
    tokio::time::timeout(Duration::from_secs(5), rpc.next())
        .await
        .expect("update-watch timed out")
        .expect("update-watch errored")
}

#[test]
fn jobid_forms_render_consistently() {
    let id = Jobid(0x1234000000000000);
    assert_eq!(id.encode(JobidForm::Dec), "1311673391471656960");
    assert_eq!(id.encode(JobidForm::Hex), "0x1234000000000000");
    assert_eq!(id.encode(JobidForm::DotHex), "1234.0000.0000.0000");
    let f58 = id.encode(JobidForm::F58);
    assert!(f58.starts_with('\u{0192}'));
    assert!(f58[2..].bytes().all(|b| {
        b"123456789ABCDEFGHJKLMNPQRSTUVWXYZabcdefghijkmnopqrstuvwxyz".contains(&b)
    }));
    for form in [JobidForm::Dec, JobidForm::Hex, JobidForm::DotHex, JobidForm::F58] {
        assert_eq!(Jobid::parse(&id.encode(form)).unwrap(), id);
    }
}
