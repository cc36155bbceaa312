// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `job-info.eventlog-watch`: stream a job eventlog to a subscriber.
//!
//! Three locations are handled transparently. The primary eventlog
//! lives at `job.<id>.eventlog` in the main namespace. Job-private
//! eventlogs live in the per-job guest namespace while the job runs,
//! and are copied back under `job.<id>.guest.*` when the shell releases
//! the namespace. A `guest.`-prefixed path runs the state machine:
//!
//! ```text
//! INIT -> GET_MAIN_EVENTLOG
//!    released? -> MAIN_NAMESPACE_WATCH   (path = "guest." + path)
//!    started?  -> GUEST_NAMESPACE_WATCH  (namespace = job ns)
//!    else      -> WAIT_GUEST_NAMESPACE   (watch main log for "start")
//! GUEST_NAMESPACE_WATCH -> MAIN_NAMESPACE_WATCH when the namespace was
//! removed before any event was delivered; with events already sent the
//! watch ends in Nodata and the race window's events are lost.
//! ```

use super::{allow, InfoCtx, WatchRec};
use flux_core::eventlog::Event;
use flux_core::{Errnum, Jobid};
use flux_storage::{KvsError, Watch, WatchFlags};
use flux_wire::Message;
use serde_json::json;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub const WAITCREATE: u32 = 1;

#[derive(serde::Deserialize)]
struct WatchRequest {
    id: u64,
    path: String,
    #[serde(default)]
    flags: u32,
    #[serde(default)]
    guest: bool,
}

type Terminal = (Errnum, Option<String>);

pub(crate) fn handle_watch(ctx: &Arc<InfoCtx>, msg: Message) {
    let req: WatchRequest = match msg.unpack() {
        Ok(r) => r,
        Err(e) => {
            ctx.handle.respond_error(&msg, e.errnum, e.text.as_deref());
            return;
        }
    };
    if !msg.streaming {
        ctx.handle.respond_error(
            &msg,
            Errnum::Proto,
            Some("eventlog-watch request rejected without streaming RPC flag"),
        );
        return;
    }
    let token = CancellationToken::new();
    ctx.watches.lock().push(WatchRec {
        sender: msg.sender.clone(),
        matchtag: msg.matchtag,
        token: token.clone(),
    });

    let ctx = Arc::clone(ctx);
    tokio::spawn(async move {
        let id = Jobid(req.id);
        let waitcreate = req.flags & WAITCREATE != 0;
        let result = match req.path.strip_prefix("guest.") {
            Some(subpath) => {
                *ctx.guest_watches.lock() += 1;
                let r =
                    guest_watch(&ctx, &msg, id, subpath, waitcreate, &token).await;
                *ctx.guest_watches.lock() -= 1;
                r
            }
            None => watch(&ctx, &msg, id, &req.path, waitcreate, req.guest, &token).await,
        };
        let (errnum, text) = result.err().unwrap_or((Errnum::Nodata, None));
        ctx.handle.respond_error(&msg, errnum, text.as_deref());
        ctx.watches
            .lock()
            .retain(|r| !(r.sender == msg.sender && r.matchtag == msg.matchtag));
    });
}

/// Direct watch of `path` in the main namespace (or, with the guest
/// request flag, in the job's guest namespace).
async fn watch(
    ctx: &Arc<InfoCtx>,
    msg: &Message,
    id: Jobid,
    path: &str,
    waitcreate: bool,
    guest: bool,
    token: &CancellationToken,
) -> Result<(), Terminal> {
    let mut allowed = preauthorized(ctx, msg, id)?;
    // A non-primary path cannot carry its own access information, so
    // consult the main eventlog first.
    if !allowed && path != "eventlog" {
        authorize_from_main_eventlog(ctx, msg, id)?;
        allowed = true;
    }

    let ns = guest.then(|| id.guest_namespace());
    let key = if guest { path.to_string() } else { id.kvs_key(path) };
    let primary = !guest && path == "eventlog";

    let mut watch = ctx
        .kvs
        .watch_append(ns.as_deref(), &key, WatchFlags { waitcreate })
        .map_err(map_kvs)?;
    stream_events(ctx, msg, id, &mut watch, primary, allowed, token).await
}

/// Pump one watch-append stream to the subscriber as `{event}` frames.
async fn stream_events(
    ctx: &Arc<InfoCtx>,
    msg: &Message,
    id: Jobid,
    watch: &mut Watch,
    primary: bool,
    mut allowed: bool,
    token: &CancellationToken,
) -> Result<(), Terminal> {
    loop {
        let chunk = tokio::select! {
            chunk = watch.next() => chunk,
            _ = token.cancelled() => {
                watch.cancel();
                return Err((Errnum::Nodata, None));
            }
        };
        let content = match chunk {
            Ok(content) => content,
            Err(e) => return Err(map_kvs(e)),
        };
        // A zero-length append means the eventlog was clobbered; do not
        // hide the corruption.
        if content.is_empty() {
            return Err((Errnum::Inval, Some("illegal append of zero bytes".to_string())));
        }
        if !allowed {
            let mut lru = ctx.lru.lock();
            allow::eventlog_allow(&mut lru, msg, id, &content).map_err(|e| {
                watch.cancel();
                (e, None)
            })?;
            allowed = true;
        }
        for line in content.split_inclusive('\n') {
            ctx.handle.respond(msg, json!({"event": line}));
            // The primary eventlog ends at the clean event; anything a
            // user appends after it is not streamed.
            if primary && is_clean(line) {
                watch.cancel();
                return Err((Errnum::Nodata, None));
            }
        }
    }
}

/// State machine for `guest.`-prefixed paths.
async fn guest_watch(
    ctx: &Arc<InfoCtx>,
    msg: &Message,
    id: Jobid,
    subpath: &str,
    waitcreate: bool,
    token: &CancellationToken,
) -> Result<(), Terminal> {
    // GET_MAIN_EVENTLOG: access check plus job progress.
    let log = ctx
        .kvs
        .lookup(None, &id.kvs_key("eventlog"))
        .map_err(map_kvs)?;
    if !preauthorized(ctx, msg, id)? {
        let mut lru = ctx.lru.lock();
        allow::eventlog_allow(&mut lru, msg, id, &log).map_err(|e| (e, None))?;
    }
    let events = flux_core::eventlog::decode_log(&log)
        .map_err(|e| (Errnum::Inval, Some(e.to_string())))?;
    let released = events.iter().any(|e| {
        e.name == "release"
            && e.context
                .as_ref()
                .and_then(|c| c.get("final"))
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false)
    });
    let started = events.iter().any(|e| e.name == "start");

    if released {
        return main_namespace_watch(ctx, msg, id, subpath, token).await;
    }
    if started {
        return guest_namespace_watch(ctx, msg, id, subpath, waitcreate, token).await;
    }
    wait_guest_namespace(ctx, id, token).await?;
    guest_namespace_watch(ctx, msg, id, subpath, waitcreate, token).await
}

/// WAIT_GUEST_NAMESPACE: follow the main eventlog until `start`.
async fn wait_guest_namespace(
    ctx: &Arc<InfoCtx>,
    id: Jobid,
    token: &CancellationToken,
) -> Result<(), Terminal> {
    let mut watch = ctx
        .kvs
        .watch_append(None, &id.kvs_key("eventlog"), WatchFlags::default())
        .map_err(map_kvs)?;
    loop {
        let chunk = tokio::select! {
            chunk = watch.next() => chunk,
            _ = token.cancelled() => {
                watch.cancel();
                return Err((Errnum::Nodata, None));
            }
        };
        let content = chunk.map_err(map_kvs)?;
        for line in content.split_inclusive('\n') {
            match Event::decode(line) {
                Ok(e) if e.name == "start" => {
                    watch.cancel();
                    return Ok(());
                }
                Ok(e) if e.name == "clean" => {
                    // job ended without ever starting: nothing to watch
                    watch.cancel();
                    return Err((Errnum::Nodata, None));
                }
                Ok(_) => {}
                Err(e) => {
                    return Err((Errnum::Inval, Some(e.to_string())));
                }
            }
        }
    }
}

/// GUEST_NAMESPACE_WATCH, falling back to the main namespace when the
/// namespace vanished before any event was delivered.
async fn guest_namespace_watch(
    ctx: &Arc<InfoCtx>,
    msg: &Message,
    id: Jobid,
    subpath: &str,
    waitcreate: bool,
    token: &CancellationToken,
) -> Result<(), Terminal> {
    let ns = id.guest_namespace();
    let mut watch = match ctx.kvs.watch_append(Some(&ns), subpath, WatchFlags { waitcreate }) {
        Ok(w) => w,
        Err(KvsError::NoNamespace(_)) => {
            // removed before we began: the released copy has everything
            return main_namespace_watch(ctx, msg, id, subpath, token).await;
        }
        Err(e) => return Err(map_kvs(e)),
    };

    let mut delivered = false;
    loop {
        let chunk = tokio::select! {
            chunk = watch.next() => chunk,
            _ = token.cancelled() => {
                watch.cancel();
                return Err((Errnum::Nodata, None));
            }
        };
        let content = match chunk {
            Ok(content) => content,
            Err(KvsError::Notsup) if !delivered => {
                // namespace removed before we saw anything
                return main_namespace_watch(ctx, msg, id, subpath, token).await;
            }
            // events were already delivered: the subscriber gets
            // end-of-stream, and events in the removal window are lost
            Err(KvsError::Notsup) => return Err((Errnum::Nodata, None)),
            Err(e) => return Err(map_kvs(e)),
        };
        if content.is_empty() {
            return Err((Errnum::Inval, Some("illegal append of zero bytes".to_string())));
        }
        for line in content.split_inclusive('\n') {
            delivered = true;
            ctx.handle.respond(msg, json!({"event": line}));
        }
    }
}

/// MAIN_NAMESPACE_WATCH: the released copy under `job.<id>.guest.*`.
async fn main_namespace_watch(
    ctx: &Arc<InfoCtx>,
    msg: &Message,
    id: Jobid,
    subpath: &str,
    token: &CancellationToken,
) -> Result<(), Terminal> {
    let key = id.kvs_key(&format!("guest.{subpath}"));
    let mut watch = ctx
        .kvs
        .watch_append(None, &key, WatchFlags { waitcreate: true })
        .map_err(map_kvs)?;
    stream_events(ctx, msg, id, &mut watch, false, true, token).await
}

/// Read the primary eventlog and authorize against its submit userid.
fn authorize_from_main_eventlog(
    ctx: &Arc<InfoCtx>,
    msg: &Message,
    id: Jobid,
) -> Result<(), Terminal> {
    let log = ctx
        .kvs
        .lookup(None, &id.kvs_key("eventlog"))
        .map_err(map_kvs)?;
    let mut lru = ctx.lru.lock();
    allow::eventlog_allow(&mut lru, msg, id, &log).map_err(|e| (e, None))
}

/// Owner role or cached owner match; `Ok(false)` means the eventlog
/// must be consulted.
fn preauthorized(ctx: &Arc<InfoCtx>, msg: &Message, id: Jobid) -> Result<bool, Terminal> {
    if msg.cred.rolemask.has(flux_wire::RoleMask::OWNER) {
        return Ok(true);
    }
    let mut lru = ctx.lru.lock();
    allow::eventlog_allow_lru(&mut lru, msg, id).map_err(|e| (e, None))
}

fn is_clean(line: &str) -> bool {
    Event::decode(line).map(|e| e.name == "clean").unwrap_or(false)
}

fn map_kvs(e: KvsError) -> Terminal {
    (e.errnum(), Some(e.to_string()))
}
