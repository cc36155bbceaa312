// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `job-info.lookup`: read per-job KVS values, optionally decoded and
//! optionally projected to their current value by applying the job's
//! update events.

use super::update::{project_current, update_event_name};
use super::{allow, InfoCtx};
use flux_core::{Errnum, Jobid};
use flux_storage::KvsError;
use flux_wire::Message;
use serde_json::{json, Map, Value};
use std::sync::Arc;

pub const JSON_DECODE: u32 = 1;
pub const CURRENT: u32 = 2;

#[derive(serde::Deserialize)]
struct LookupRequest {
    id: u64,
    keys: Vec<String>,
    #[serde(default)]
    flags: u32,
}

pub(crate) fn handle_lookup(ctx: &Arc<InfoCtx>, msg: &Message) {
    if let Err((errnum, text)) = lookup(ctx, msg) {
        ctx.handle.respond_error(msg, errnum, text.as_deref());
    }
}

fn lookup(ctx: &Arc<InfoCtx>, msg: &Message) -> Result<(), (Errnum, Option<String>)> {
    let req: LookupRequest = msg
        .unpack()
        .map_err(|e| (e.errnum, e.text))?;
    let id = Jobid(req.id);
    ctx.stats.lock().lookups += 1;

    authorize(ctx, msg, id)?;

    let mut result = Map::new();
    result.insert("id".to_string(), json!(req.id));
    for key in &req.keys {
        let value = lookup_key(ctx, id, key, req.flags)?;
        result.insert(key.clone(), value);
    }
    ctx.handle.respond(msg, Value::Object(result));
    Ok(())
}

fn authorize(
    ctx: &Arc<InfoCtx>,
    msg: &Message,
    id: Jobid,
) -> Result<(), (Errnum, Option<String>)> {
    if msg.cred.rolemask.has(flux_wire::RoleMask::OWNER) {
        return Ok(());
    }
    {
        let mut lru = ctx.lru.lock();
        if allow::eventlog_allow_lru(&mut lru, msg, id).map_err(|e| (e, None))? {
            return Ok(());
        }
    }
    let log = ctx
        .kvs
        .lookup(None, &id.kvs_key("eventlog"))
        .map_err(map_kvs)?;
    let mut lru = ctx.lru.lock();
    allow::eventlog_allow(&mut lru, msg, id, &log).map_err(|e| (e, None))
}

fn lookup_key(
    ctx: &Arc<InfoCtx>,
    id: Jobid,
    key: &str,
    flags: u32,
) -> Result<Value, (Errnum, Option<String>)> {
    let current = flags & CURRENT != 0 && update_event_name(key).is_some();
    if current {
        // A live update watcher already holds the projected object.
        if let Some(shared) = ctx.updates.lock().get(&(id, key.to_string())) {
            let state = shared.lock();
            if let Some(object) = &state.object {
                ctx.stats.lock().update_lookups += 1;
                return Ok(object.clone());
            }
        }
        let projection = project_current(&ctx.kvs, id, key).map_err(|e| (e, None))?;
        return Ok(projection.object);
    }

    let raw = ctx.kvs.lookup(None, &id.kvs_key(key)).map_err(map_kvs)?;
    if flags & JSON_DECODE != 0 {
        serde_json::from_str(&raw)
            .map_err(|_| (Errnum::Inval, Some(format!("{key} value cannot be parsed"))))
    } else {
        Ok(json!(raw))
    }
}

fn map_kvs(e: KvsError) -> (Errnum, Option<String>) {
    (e.errnum(), Some(e.to_string()))
}
