// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Batched eventlog appends.
//!
//! Appends accumulate into the current batch, which carries one KVS
//! transaction. A timer set at batch creation commits the batch when it
//! fires; callers may force a commit earlier. The owner is told when the
//! logger goes busy (first pending batch) and idle again (none left),
//! and once per failed entry when a commit fails. Failed batches are not
//! retried.

use crate::kvs::{Kvs, KvsError, Txn};
use flux_core::eventlog::Event;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Owner callbacks. All optional.
#[derive(Default)]
pub struct EventLoggerOps {
    pub busy: Option<Box<dyn Fn() + Send + Sync>>,
    pub idle: Option<Box<dyn Fn() + Send + Sync>>,
    pub err: Option<Box<dyn Fn(&Event, &KvsError) + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AppendFlags {
    /// Commit synchronously; return only after the entry is durable.
    pub wait: bool,
}

impl AppendFlags {
    pub const WAIT: AppendFlags = AppendFlags { wait: true };
}

struct Batch {
    seq: u64,
    txn: Txn,
    entries: Vec<(String, Event)>,
}

struct Inner {
    ns: Option<String>,
    current: Option<Batch>,
    next_seq: u64,
    pending: usize,
    // path -> encoded lines appended through this logger, for reconnect
    journal: HashMap<String, Vec<String>>,
}

/// Shared append batcher over one KVS namespace.
#[derive(Clone)]
pub struct EventLogger {
    kvs: Kvs,
    batch_timeout: Duration,
    ops: Arc<EventLoggerOps>,
    inner: Arc<Mutex<Inner>>,
}

impl EventLogger {
    pub fn new(kvs: Kvs, batch_timeout: Duration, ops: EventLoggerOps) -> Self {
        EventLogger {
            kvs,
            batch_timeout,
            ops: Arc::new(ops),
            inner: Arc::new(Mutex::new(Inner {
                ns: None,
                current: None,
                next_seq: 0,
                pending: 0,
                journal: HashMap::new(),
            })),
        }
    }

    /// Direct subsequent commits at a different namespace.
    pub fn set_namespace(&self, ns: Option<&str>) {
        self.inner.lock().ns = ns.map(str::to_string);
    }

    /// Append an event to the log at `path`. With [`AppendFlags::WAIT`]
    /// the current batch is committed before returning.
    pub async fn append(
        &self,
        flags: AppendFlags,
        path: &str,
        name: &str,
        context: Option<Map<String, Value>>,
    ) -> Result<(), KvsError> {
        let event = Event::build(0.0, name, context)
            .map_err(|e| KvsError::Inval(e.to_string()))?;
        self.append_entry(flags, path, event).await
    }

    pub async fn append_entry(
        &self,
        flags: AppendFlags,
        path: &str,
        event: Event,
    ) -> Result<(), KvsError> {
        let line = event.encode().map_err(|e| KvsError::Inval(e.to_string()))?;
        let went_busy = {
            let mut inner = self.inner.lock();
            let went_busy = self.ensure_batch(&mut inner);
            if let Some(batch) = inner.current.as_mut() {
                batch.txn.append(path, &line);
                batch.entries.push((path.to_string(), event));
            }
            inner.journal.entry(path.to_string()).or_default().push(line);
            went_busy
        };
        if went_busy {
            if let Some(busy) = &self.ops.busy {
                busy();
            }
        }
        if flags.wait {
            self.commit().await?;
        }
        Ok(())
    }

    // Lazily create the current batch; returns true on the 0->1 busy edge.
    fn ensure_batch(&self, inner: &mut Inner) -> bool {
        if inner.current.is_some() {
            return false;
        }
        inner.next_seq += 1;
        let seq = inner.next_seq;
        inner.current = Some(Batch { seq, txn: Txn::new(), entries: Vec::new() });
        inner.pending += 1;
        let went_busy = inner.pending == 1;

        let logger = self.clone();
        let timeout = self.batch_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            if let Err(e) = logger.commit_seq(Some(seq)).await {
                debug!(seq, error = %e, "batch timer commit failed");
            }
        });
        went_busy
    }

    /// Commit the current batch now.
    pub async fn commit(&self) -> Result<(), KvsError> {
        self.commit_seq(None).await
    }

    /// Synchronous flush of the current batch.
    pub async fn flush(&self) -> Result<(), KvsError> {
        self.commit().await
    }

    // Commit the current batch; with `Some(seq)`, only if the current
    // batch is still the one the timer was armed for.
    async fn commit_seq(&self, seq: Option<u64>) -> Result<(), KvsError> {
        let (batch, ns) = {
            let mut inner = self.inner.lock();
            match (&inner.current, seq) {
                (Some(batch), Some(want)) if batch.seq != want => return Ok(()),
                (None, _) => return Ok(()),
                _ => {}
            }
            let Some(batch) = inner.current.take() else {
                return Ok(());
            };
            (batch, inner.ns.clone())
        };

        let result = self.kvs.commit(ns.as_deref(), batch.txn.clone());

        let went_idle = {
            let mut inner = self.inner.lock();
            inner.pending -= 1;
            result.is_ok() && inner.pending == 0
        };

        match &result {
            Ok(()) => {
                if went_idle {
                    if let Some(idle) = &self.ops.idle {
                        idle();
                    }
                }
            }
            Err(e) => {
                if let Some(err) = &self.ops.err {
                    for (_, event) in &batch.entries {
                        err(event, e);
                    }
                }
            }
        }
        result
    }

    /// After a connection loss, compare the journal against the durable
    /// logs and re-append every entry that did not make it.
    pub async fn reconnect(&self) -> Result<usize, KvsError> {
        let (journal, ns) = {
            let inner = self.inner.lock();
            (inner.journal.clone(), inner.ns.clone())
        };
        let mut reemitted = 0;
        let mut txn = Txn::new();
        for (path, lines) in journal {
            let durable = match self.kvs.lookup(ns.as_deref(), &path) {
                Ok(content) => content,
                Err(KvsError::Noent(_)) => String::new(),
                Err(e) => return Err(e),
            };
            for line in lines {
                let found = durable
                    .split_terminator('\n')
                    .any(|l| line.strip_suffix('\n') == Some(l));
                if !found {
                    debug!(path, "re-emitting lost eventlog entry");
                    txn.append(&path, &line);
                    reemitted += 1;
                }
            }
        }
        if !txn.is_empty() {
            self.kvs.commit(ns.as_deref(), txn)?;
        }
        Ok(reemitted)
    }

    /// Number of batches created and not yet resolved.
    pub fn pending(&self) -> usize {
        self.inner.lock().pending
    }
}

#[cfg(test)]
#[path = "eventlogger_tests.rs"]
mod tests;
