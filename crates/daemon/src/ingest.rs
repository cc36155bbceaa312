// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The job-manager surface the control plane exposes: ingest of
//! submitted jobs into their eventlogs, exception raising, annotation
//! and purge of inactive jobs. Scheduling itself lives elsewhere.

use flux_core::eventlog;
use flux_core::{Errnum, Jobid};
use flux_storage::{AppendFlags, EventLogger, EventLoggerOps, Kvs, Txn};
use flux_wire::{Handle, Message, ServiceHandle};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub(crate) const SERVICE: &str = "job-manager";

/// Batching window for eventlog appends.
const BATCH_TIMEOUT: Duration = Duration::from_millis(10);

pub struct JobManager {
    handle: Handle,
    kvs: Kvs,
    logger: EventLogger,
    /// Submitted jobids in submission order.
    jobs: parking_lot::Mutex<Vec<u64>>,
}

impl JobManager {
    pub fn start(handle: Handle, kvs: Kvs) -> Arc<JobManager> {
        let svc = handle.service(SERVICE);
        let logger = EventLogger::new(kvs.clone(), BATCH_TIMEOUT, EventLoggerOps::default());
        let manager =
            Arc::new(JobManager { handle, kvs, logger, jobs: parking_lot::Mutex::new(Vec::new()) });
        let run = Arc::clone(&manager);
        tokio::spawn(async move { run.run(svc).await });
        manager
    }

    async fn run(self: Arc<Self>, mut svc: ServiceHandle) {
        while let Some(msg) = svc.recv().await {
            let result = match msg.method(SERVICE) {
                Some("submit") => self.handle_submit(&msg).await,
                Some("raise") => self.handle_raise(&msg).await,
                Some("memo") => self.handle_memo(&msg).await,
                Some("urgency") => self.handle_urgency(&msg).await,
                Some("purge") => self.handle_purge(&msg),
                Some("list") => self.handle_list(&msg),
                Some("disconnect") => continue,
                _ => Err((Errnum::Nosys, Some("unknown method".to_string()))),
            };
            if let Err((errnum, text)) = result {
                self.handle.respond_error(&msg, errnum, text.as_deref());
            }
        }
    }

    /// Record newly submitted jobs: base documents first, then the
    /// `submit` event that makes the job visible to watchers.
    async fn handle_submit(&self, msg: &Message) -> Result<(), (Errnum, Option<String>)> {
        #[derive(serde::Deserialize)]
        struct SubmitJob {
            id: u64,
            userid: u32,
            urgency: i32,
            t_submit: f64,
            #[serde(default)]
            jobspec: Option<Value>,
            #[serde(default)]
            #[serde(rename = "R")]
            resources: Option<Value>,
        }
        #[derive(serde::Deserialize)]
        struct SubmitRequest {
            jobs: Vec<SubmitJob>,
        }
        let req: SubmitRequest = msg.unpack().map_err(|e| (e.errnum, e.text))?;
        let mut ids = Vec::new();
        for job in &req.jobs {
            let id = Jobid(job.id);
            let mut txn = Txn::new();
            if let Some(jobspec) = &job.jobspec {
                txn.put(&id.kvs_key("jobspec"), &jobspec.to_string());
            }
            if let Some(r) = &job.resources {
                txn.put(&id.kvs_key("R"), &r.to_string());
            }
            if !txn.is_empty() {
                self.kvs.commit(None, txn).map_err(|e| (e.errnum(), Some(e.to_string())))?;
            }

            let mut context = Map::new();
            context.insert("id".to_string(), json!(job.id));
            context.insert("urgency".to_string(), json!(job.urgency));
            context.insert("userid".to_string(), json!(job.userid));
            context.insert("t_submit".to_string(), json!(job.t_submit));
            self.logger
                .append(AppendFlags::WAIT, &id.kvs_key("eventlog"), "submit", Some(context))
                .await
                .map_err(|e| (e.errnum(), Some(e.to_string())))?;
            ids.push(job.id);
        }
        self.jobs.lock().extend(&ids);
        self.handle.respond(msg, json!({"ids": ids}));
        Ok(())
    }

    /// Jobids in submission order.
    fn handle_list(&self, msg: &Message) -> Result<(), (Errnum, Option<String>)> {
        let jobs = self.jobs.lock().clone();
        self.handle.respond(msg, json!({"jobs": jobs}));
        Ok(())
    }

    /// Raise an exception on a job (severity 0 is fatal by convention).
    async fn handle_raise(&self, msg: &Message) -> Result<(), (Errnum, Option<String>)> {
        #[derive(serde::Deserialize)]
        struct RaiseRequest {
            id: u64,
            #[serde(rename = "type")]
            kind: String,
            severity: i32,
            #[serde(default)]
            note: String,
        }
        let req: RaiseRequest = msg.unpack().map_err(|e| (e.errnum, e.text))?;
        let id = Jobid(req.id);
        self.authorize(msg, id)?;
        if !(0..=7).contains(&req.severity) {
            return Err((Errnum::Inval, Some("severity must be 0-7".to_string())));
        }
        let mut context = Map::new();
        context.insert("type".to_string(), json!(req.kind));
        context.insert("severity".to_string(), json!(req.severity));
        context.insert("note".to_string(), json!(req.note));
        self.logger
            .append(AppendFlags::WAIT, &id.kvs_key("eventlog"), "exception", Some(context))
            .await
            .map_err(|e| (e.errnum(), Some(e.to_string())))?;
        self.handle.respond(msg, json!({}));
        Ok(())
    }

    async fn handle_memo(&self, msg: &Message) -> Result<(), (Errnum, Option<String>)> {
        #[derive(serde::Deserialize)]
        struct MemoRequest {
            id: u64,
            memo: Map<String, Value>,
        }
        let req: MemoRequest = msg.unpack().map_err(|e| (e.errnum, e.text))?;
        let id = Jobid(req.id);
        self.authorize(msg, id)?;
        self.logger
            .append(AppendFlags::WAIT, &id.kvs_key("eventlog"), "memo", Some(req.memo))
            .await
            .map_err(|e| (e.errnum(), Some(e.to_string())))?;
        self.handle.respond(msg, json!({}));
        Ok(())
    }

    async fn handle_urgency(&self, msg: &Message) -> Result<(), (Errnum, Option<String>)> {
        #[derive(serde::Deserialize)]
        struct UrgencyRequest {
            id: u64,
            urgency: i32,
        }
        let req: UrgencyRequest = msg.unpack().map_err(|e| (e.errnum, e.text))?;
        let id = Jobid(req.id);
        self.authorize(msg, id)?;
        if !(0..=31).contains(&req.urgency) {
            return Err((Errnum::Inval, Some("urgency must be 0-31".to_string())));
        }
        let old = self.submit_context(id)?.get("urgency").and_then(Value::as_i64).unwrap_or(16);
        let mut context = Map::new();
        context.insert("urgency".to_string(), json!(req.urgency));
        self.logger
            .append(AppendFlags::WAIT, &id.kvs_key("eventlog"), "urgency", Some(context))
            .await
            .map_err(|e| (e.errnum(), Some(e.to_string())))?;
        self.handle.respond(msg, json!({"old_urgency": old}));
        Ok(())
    }

    /// Drop the KVS footprint of inactive jobs.
    fn handle_purge(&self, msg: &Message) -> Result<(), (Errnum, Option<String>)> {
        #[derive(serde::Deserialize)]
        struct PurgeRequest {
            #[serde(default)]
            ids: Vec<u64>,
            #[serde(default)]
            all: bool,
        }
        let req: PurgeRequest = msg.unpack().map_err(|e| (e.errnum, e.text))?;
        let ids = if req.all { self.jobs.lock().clone() } else { req.ids };
        let mut count = 0;
        let mut errors = 0;
        for raw in ids {
            let id = Jobid(raw);
            match self.kvs.lookup(None, &id.kvs_key("eventlog")) {
                Ok(log) if eventlog::log_contains(&log, "clean").unwrap_or(false) => {
                    let _ = self.kvs.unlink(&id.encode(flux_core::JobidForm::Kvs));
                    self.jobs.lock().retain(|&j| j != raw);
                    count += 1;
                }
                // active or unknown jobs are skipped, not fatal
                _ => errors += 1,
            }
        }
        self.handle.respond(msg, json!({"count": count, "errors": errors}));
        Ok(())
    }

    fn submit_context(&self, id: Jobid) -> Result<Map<String, Value>, (Errnum, Option<String>)> {
        let log = self
            .kvs
            .lookup(None, &id.kvs_key("eventlog"))
            .map_err(|e| (e.errnum(), Some(e.to_string())))?;
        let events =
            eventlog::decode_log(&log).map_err(|e| (Errnum::Inval, Some(e.to_string())))?;
        events
            .into_iter()
            .find(|e| e.name == "submit")
            .and_then(|e| e.context)
            .ok_or((Errnum::Proto, Some("eventlog has no submit event".to_string())))
    }

    fn authorize(&self, msg: &Message, id: Jobid) -> Result<(), (Errnum, Option<String>)> {
        if msg.cred.rolemask.has(flux_wire::RoleMask::OWNER) {
            return Ok(());
        }
        let context = self.submit_context(id)?;
        let userid = context
            .get("userid")
            .and_then(Value::as_u64)
            .ok_or((Errnum::Proto, None))?;
        msg.cred.authorize(userid as u32).map_err(|e| (e.errnum, None))
    }
}
