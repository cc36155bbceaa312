// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The job-info service: eventlog lookup, streaming eventlog watch and
//! live update projection, all gated by per-job owner access checks.

mod allow;
mod lookup;
mod update;
mod watch;

pub(crate) use allow::OwnerLru;

use flux_core::Jobid;
use flux_storage::Kvs;
use flux_wire::{Handle, Message, ServiceHandle};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

pub(crate) const SERVICE: &str = "job-info";

/// Jobs the eventlog-watch allow cache remembers.
const OWNER_LRU_SIZE: usize = 1000;

/// One active eventlog watch, for cancel/disconnect matching.
pub(crate) struct WatchRec {
    pub sender: String,
    pub matchtag: u32,
    pub token: CancellationToken,
}

/// Shared state of one `(id, key)` update watcher.
pub(crate) struct UpdateState {
    pub userid: Option<u32>,
    pub object: Option<serde_json::Value>,
    pub initial_count: usize,
    pub watch_count: usize,
    pub subscribers: Vec<Message>,
    pub token: CancellationToken,
}

pub(crate) type UpdateShared = Arc<Mutex<UpdateState>>;

#[derive(Default)]
pub(crate) struct Stats {
    pub lookups: u64,
    pub update_lookups: u64,
}

pub(crate) struct InfoCtx {
    pub handle: Handle,
    pub kvs: Kvs,
    pub lru: Mutex<OwnerLru>,
    pub watches: Mutex<Vec<WatchRec>>,
    pub guest_watches: Mutex<usize>,
    pub updates: Mutex<HashMap<(Jobid, String), UpdateShared>>,
    pub stats: Mutex<Stats>,
}

/// Service host. Dropping the returned handle does not stop the
/// service; it runs for the life of the router registration.
pub struct JobInfo {
    ctx: Arc<InfoCtx>,
}

impl JobInfo {
    pub fn start(handle: Handle, kvs: Kvs) -> JobInfo {
        let svc = handle.service(SERVICE);
        let ctx = Arc::new(InfoCtx {
            handle,
            kvs,
            lru: Mutex::new(OwnerLru::new(OWNER_LRU_SIZE)),
            watches: Mutex::new(Vec::new()),
            guest_watches: Mutex::new(0),
            updates: Mutex::new(HashMap::new()),
            stats: Mutex::new(Stats::default()),
        });
        let run_ctx = Arc::clone(&ctx);
        tokio::spawn(async move { run(run_ctx, svc).await });
        JobInfo { ctx }
    }

    /// Watch bookkeeping snapshot, exposed for tests.
    pub fn active_watchers(&self) -> usize {
        self.ctx.watches.lock().len()
    }
}

async fn run(ctx: Arc<InfoCtx>, mut svc: ServiceHandle) {
    while let Some(msg) = svc.recv().await {
        match msg.method(SERVICE) {
            Some("lookup") => lookup::handle_lookup(&ctx, &msg),
            Some("eventlog-watch") => watch::handle_watch(&ctx, msg),
            Some("eventlog-watch-cancel") => cancel_watches(&ctx, &msg, true),
            Some("update-watch") => update::handle_update_watch(&ctx, msg),
            Some("update-watch-cancel") => update::cancel(&ctx, &msg, true),
            Some("stats-get") => handle_stats(&ctx, &msg),
            Some("disconnect") => {
                cancel_watches(&ctx, &msg, false);
                update::cancel(&ctx, &msg, false);
            }
            _ => ctx
                .handle
                .respond_error(&msg, flux_core::Errnum::Nosys, Some("unknown method")),
        }
    }
}

/// Cancel matching eventlog watches: by `(sender, matchtag)` for an
/// explicit cancel, by sender alone for a disconnect.
fn cancel_watches(ctx: &InfoCtx, msg: &Message, cancel: bool) {
    let watches = ctx.watches.lock();
    for rec in watches.iter() {
        let matched = if cancel {
            msg.sender == rec.sender
                && msg.payload.get("matchtag").and_then(serde_json::Value::as_u64)
                    == Some(rec.matchtag as u64)
        } else {
            msg.sender == rec.sender
        };
        if matched {
            rec.token.cancel();
        }
    }
}

fn handle_stats(ctx: &InfoCtx, msg: &Message) {
    let stats = ctx.stats.lock();
    let watchers = ctx.watches.lock().len();
    let guest_watchers = *ctx.guest_watches.lock();
    let update_watchers: usize = ctx
        .updates
        .lock()
        .values()
        .map(|u| u.lock().subscribers.len())
        .sum();
    ctx.handle.respond(
        msg,
        json!({
            "lookups": stats.lookups,
            "watchers": watchers,
            "guest_watchers": guest_watchers,
            "update_watchers": update_watchers,
            "update_lookups": stats.update_lookups,
        }),
    );
}

#[cfg(test)]
#[path = "jobinfo_tests.rs"]
mod tests;
