// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `job-info.update-watch`: stream the current value of `R` or
//! `jobspec` as update events land in the job eventlog.
//!
//! Watchers are shared: one `(id, key)` watcher serves every
//! subscriber, and late subscribers get the cached object immediately.
//! `resource-update` may only move `execution.expiration`; any other
//! key is ignored with a warning. `jobspec-update` context keys are
//! dotted paths applied with jpath semantics.

use super::{InfoCtx, UpdateShared, UpdateState};
use flux_core::eventlog::{self, Event};
use flux_core::{jpath, Errnum, Jobid};
use flux_storage::{Kvs, KvsError, WatchFlags};
use flux_wire::Message;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Update event applied onto a given lookup key, if any.
pub(crate) fn update_event_name(key: &str) -> Option<&'static str> {
    match key {
        "R" => Some("resource-update"),
        "jobspec" => Some("jobspec-update"),
        _ => None,
    }
}

pub(crate) fn apply_update(key: &str, object: &mut Value, context: &Map<String, Value>) {
    match key {
        "R" => {
            for (k, v) in context {
                if k == "expiration" {
                    if let Err(e) = jpath::set(object, "execution.expiration", v.clone()) {
                        warn!(error = %e, "cannot apply resource-update expiration");
                    }
                } else {
                    warn!(key = %k, "ignoring unsupported resource-update field");
                }
            }
        }
        _ => {
            for (k, v) in context {
                if let Err(e) = jpath::set(object, k, v.clone()) {
                    warn!(path = %k, error = %e, "cannot apply jobspec-update field");
                }
            }
        }
    }
}

pub(crate) struct Projection {
    pub object: Value,
    pub userid: u32,
    pub update_count: usize,
    pub ended: bool,
}

/// Base object plus every update event currently in the eventlog.
pub(crate) fn project_current(kvs: &Kvs, id: Jobid, key: &str) -> Result<Projection, Errnum> {
    let update_name = update_event_name(key).ok_or(Errnum::Inval)?;
    let raw = kvs.lookup(None, &id.kvs_key(key)).map_err(|e| e.errnum())?;
    let log = kvs.lookup(None, &id.kvs_key("eventlog")).map_err(|e| e.errnum())?;

    let mut object: Value = serde_json::from_str(&raw).map_err(|_| Errnum::Inval)?;
    let events = eventlog::decode_log(&log).map_err(|_| Errnum::Inval)?;

    let mut userid = None;
    let mut update_count = 0;
    let mut ended = false;
    for event in &events {
        match event.name.as_str() {
            "submit" => {
                userid = event.context_i64("userid").and_then(|v| u32::try_from(v).ok());
            }
            "clean" => ended = true,
            name if name == update_name => {
                if let Some(context) = &event.context {
                    apply_update(key, &mut object, context);
                    update_count += 1;
                }
            }
            _ => {}
        }
    }
    // the first event of a well-formed eventlog is submit
    let userid = userid.ok_or(Errnum::Proto)?;
    Ok(Projection { object, userid, update_count, ended })
}

#[derive(serde::Deserialize)]
struct UpdateWatchRequest {
    id: u64,
    key: String,
    #[serde(default)]
    flags: u32,
}

pub(crate) fn handle_update_watch(ctx: &Arc<InfoCtx>, msg: Message) {
    let req: UpdateWatchRequest = match msg.unpack() {
        Ok(r) => r,
        Err(e) => {
            ctx.handle.respond_error(&msg, e.errnum, e.text.as_deref());
            return;
        }
    };
    if req.flags != 0 {
        ctx.handle.respond_error(
            &msg,
            Errnum::Proto,
            Some("update-watch request rejected with invalid flag"),
        );
        return;
    }
    if !msg.streaming {
        ctx.handle.respond_error(
            &msg,
            Errnum::Proto,
            Some("update-watch request rejected without streaming RPC flag"),
        );
        return;
    }
    if update_event_name(&req.key).is_none() {
        ctx.handle
            .respond_error(&msg, Errnum::Inval, Some("update-watch unsupported key specified"));
        return;
    }
    let id = Jobid(req.id);
    let index = (id, req.key.clone());

    let mut updates = ctx.updates.lock();
    if let Some(shared) = updates.get(&index) {
        let mut state = shared.lock();
        if let Some(object) = &state.object {
            // initial lookup already done: snapshot now
            let userid = state.userid.unwrap_or(0);
            if let Err(e) = msg.cred.authorize(userid) {
                ctx.handle.respond_error(&msg, e.errnum, None);
                return;
            }
            ctx.handle.respond(&msg, keyed(&req.key, object.clone()));
        }
        // otherwise the pending initial lookup authorizes and snapshots
        state.subscribers.push(msg);
        return;
    }

    let shared: UpdateShared = Arc::new(Mutex::new(UpdateState {
        userid: None,
        object: None,
        initial_count: 0,
        watch_count: 0,
        subscribers: vec![msg],
        token: CancellationToken::new(),
    }));
    updates.insert(index.clone(), Arc::clone(&shared));
    drop(updates);

    let ctx = Arc::clone(ctx);
    tokio::spawn(async move { run_update_watcher(ctx, id, index.1, shared).await });
}

async fn run_update_watcher(ctx: Arc<InfoCtx>, id: Jobid, key: String, shared: UpdateShared) {
    let token = shared.lock().token.clone();
    let result = tokio::select! {
        r = watch_updates(&ctx, id, &key, &shared) => r,
        _ = token.cancelled() => Err((Errnum::Nodata, None)),
    };
    let (errnum, text) = match result {
        Ok(()) => (Errnum::Nodata, None),
        Err(e) => e,
    };
    let subscribers = {
        let mut state = shared.lock();
        std::mem::take(&mut state.subscribers)
    };
    for sub in subscribers {
        ctx.handle.respond_error(&sub, errnum, text.as_deref());
    }
    ctx.updates.lock().remove(&(id, key));
}

async fn watch_updates(
    ctx: &Arc<InfoCtx>,
    id: Jobid,
    key: &str,
    shared: &UpdateShared,
) -> Result<(), (Errnum, Option<String>)> {
    let update_name = update_event_name(key).ok_or((Errnum::Inval, None))?;
    let projection = project_current(&ctx.kvs, id, key).map_err(|e| (e, None))?;

    // Populate the cache and snapshot every early subscriber, dropping
    // the ones that fail the access check. The denial is per-subscriber
    // and not fatal to the watcher.
    {
        let mut state = shared.lock();
        state.userid = Some(projection.userid);
        state.object = Some(projection.object.clone());
        state.initial_count = projection.update_count;
        let mut kept = Vec::new();
        for sub in std::mem::take(&mut state.subscribers) {
            match sub.cred.authorize(projection.userid) {
                Ok(()) => {
                    ctx.handle.respond(&sub, keyed(key, projection.object.clone()));
                    kept.push(sub);
                }
                Err(e) => ctx.handle.respond_error(&sub, e.errnum, None),
            }
        }
        state.subscribers = kept;
        if state.subscribers.is_empty() {
            return Ok(());
        }
    }
    if projection.ended {
        return Ok(()); // job already reached clean: terminal Nodata
    }

    let mut watch = ctx
        .kvs
        .watch_append(None, &id.kvs_key("eventlog"), WatchFlags::default())
        .map_err(|e| (e.errnum(), Some(e.to_string())))?;

    loop {
        let chunk = match watch.next().await {
            Ok(chunk) => chunk,
            Err(KvsError::Nodata) => return Ok(()),
            Err(e) => return Err((e.errnum(), Some(e.to_string()))),
        };
        let events = eventlog::decode_log(&chunk)
            .map_err(|e| (Errnum::Inval, Some(e.to_string())))?;
        for event in events {
            if event.name == "clean" {
                watch.cancel();
                return Ok(());
            }
            if event.name != update_name {
                continue;
            }
            let Some(context) = event.context.clone() else {
                continue;
            };
            apply_one(ctx, key, shared, &event, &context);
        }
        if shared.lock().subscribers.is_empty() {
            watch.cancel();
            return Ok(());
        }
    }
}

fn apply_one(
    ctx: &Arc<InfoCtx>,
    key: &str,
    shared: &UpdateShared,
    _event: &Event,
    context: &Map<String, Value>,
) {
    let mut state = shared.lock();
    state.watch_count += 1;
    // updates already folded into the initial lookup are not reapplied
    if state.watch_count <= state.initial_count {
        return;
    }
    if let Some(object) = state.object.as_mut() {
        apply_update(key, object, context);
    }
    let object = state.object.clone().unwrap_or(Value::Null);
    for sub in &state.subscribers {
        ctx.handle.respond(sub, keyed(key, object.clone()));
    }
}

/// `{"<key>": value}` response payload.
fn keyed(key: &str, value: Value) -> Value {
    let mut payload = Map::new();
    payload.insert(key.to_string(), value);
    Value::Object(payload)
}

/// Remove matching subscribers; `is_cancel` matches `(sender,
/// matchtag)` from the cancel payload, disconnect matches sender alone.
/// Emptied watchers are cancelled.
pub(crate) fn cancel(ctx: &Arc<InfoCtx>, msg: &Message, is_cancel: bool) {
    let updates = ctx.updates.lock();
    for shared in updates.values() {
        let mut state = shared.lock();
        let mut kept = Vec::new();
        for sub in std::mem::take(&mut state.subscribers) {
            let matched =
                if is_cancel { msg.cancel_match(&sub) } else { msg.disconnect_match(&sub) };
            if matched {
                if is_cancel {
                    ctx.handle.respond_error(&sub, Errnum::Nodata, None);
                }
            } else {
                kept.push(sub);
            }
        }
        state.subscribers = kept;
        if state.subscribers.is_empty() {
            state.token.cancel();
        }
    }
}
