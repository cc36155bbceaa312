// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Namespaced in-memory key-value store.
//!
//! Guarantees the watchers rely on:
//! - appends are atomic at commit granularity, and a commit's appends to
//!   one key are delivered to watchers as one chunk, in commit order
//! - removing a namespace ends every watch in it with `Notsup`
//! - cancelling a watch ends it with `Nodata`

use flux_core::Errnum;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

pub const PRIMARY_NAMESPACE: &str = "primary";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum KvsError {
    #[error("key not found: {0}")]
    Noent(String),

    #[error("namespace not found: {0}")]
    NoNamespace(String),

    #[error("namespace already exists: {0}")]
    NamespaceExists(String),

    #[error("operation not supported")]
    Notsup,

    #[error("no more data")]
    Nodata,

    #[error("invalid argument: {0}")]
    Inval(String),
}

impl KvsError {
    pub fn errnum(&self) -> Errnum {
        match self {
            KvsError::Noent(_) | KvsError::NoNamespace(_) => Errnum::Noent,
            KvsError::NamespaceExists(_) => Errnum::Exist,
            KvsError::Notsup => Errnum::Notsup,
            KvsError::Nodata => Errnum::Nodata,
            KvsError::Inval(_) => Errnum::Inval,
        }
    }
}

/// A transaction: an ordered list of put/append operations applied
/// atomically by [`Kvs::commit`].
#[derive(Debug, Default, Clone)]
pub struct Txn {
    ops: Vec<TxnOp>,
}

#[derive(Debug, Clone)]
enum TxnOp {
    Put { key: String, value: String },
    Append { key: String, value: String },
}

impl Txn {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: &str, value: &str) {
        self.ops.push(TxnOp::Put { key: key.to_string(), value: value.to_string() });
    }

    pub fn append(&mut self, key: &str, value: &str) {
        self.ops.push(TxnOp::Append { key: key.to_string(), value: value.to_string() });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Merge consecutive appends to the same key (commit compaction).
    fn compact(self) -> Vec<TxnOp> {
        let mut out: Vec<TxnOp> = Vec::new();
        for op in self.ops {
            match (&op, out.last_mut()) {
                (
                    TxnOp::Append { key, value },
                    Some(TxnOp::Append { key: last_key, value: last_value }),
                ) if key == last_key => last_value.push_str(value),
                _ => out.push(op),
            }
        }
        out
    }
}

/// Delivery behavior for [`Kvs::watch_append`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WatchFlags {
    /// Wait for the key to appear instead of failing with `Noent`.
    pub waitcreate: bool,
}

type WatchTx = mpsc::UnboundedSender<Result<String, KvsError>>;

#[derive(Debug)]
struct WatcherRec {
    id: u64,
    key: String,
    tx: WatchTx,
    /// Still waiting for the key to be created; nothing delivered yet.
    pending_create: bool,
}

#[derive(Debug, Default)]
struct NamespaceData {
    keys: HashMap<String, String>,
    watchers: Vec<WatcherRec>,
    owner: u32,
}

#[derive(Debug, Default)]
struct KvsInner {
    namespaces: HashMap<String, NamespaceData>,
    next_watch_id: u64,
}

/// Shared handle to the store.
#[derive(Debug, Clone)]
pub struct Kvs {
    inner: Arc<Mutex<KvsInner>>,
}

impl Default for Kvs {
    fn default() -> Self {
        Self::new()
    }
}

impl Kvs {
    pub fn new() -> Self {
        let mut inner = KvsInner::default();
        inner.namespaces.insert(PRIMARY_NAMESPACE.to_string(), NamespaceData::default());
        Kvs { inner: Arc::new(Mutex::new(inner)) }
    }

    /// Read a key. `ns = None` means the primary namespace.
    pub fn lookup(&self, ns: Option<&str>, key: &str) -> Result<String, KvsError> {
        let ns = ns.unwrap_or(PRIMARY_NAMESPACE);
        let inner = self.inner.lock();
        let data = inner
            .namespaces
            .get(ns)
            .ok_or_else(|| KvsError::NoNamespace(ns.to_string()))?;
        data.keys
            .get(key)
            .cloned()
            .ok_or_else(|| KvsError::Noent(key.to_string()))
    }

    /// Apply a transaction atomically and wake watchers.
    pub fn commit(&self, ns: Option<&str>, txn: Txn) -> Result<(), KvsError> {
        let ns = ns.unwrap_or(PRIMARY_NAMESPACE);
        let mut inner = self.inner.lock();
        let data = inner
            .namespaces
            .get_mut(ns)
            .ok_or_else(|| KvsError::NoNamespace(ns.to_string()))?;
        for op in txn.compact() {
            match op {
                TxnOp::Put { key, value } => {
                    data.keys.insert(key.clone(), value.clone());
                    notify(data, &key, &value);
                }
                TxnOp::Append { key, value } => {
                    data.keys.entry(key.clone()).or_default().push_str(&value);
                    notify(data, &key, &value);
                }
            }
        }
        Ok(())
    }

    /// Watch a key for appends. The first delivery is the key's current
    /// contents; each following delivery is one committed append chunk.
    pub fn watch_append(
        &self,
        ns: Option<&str>,
        key: &str,
        flags: WatchFlags,
    ) -> Result<Watch, KvsError> {
        let ns_name = ns.unwrap_or(PRIMARY_NAMESPACE).to_string();
        let mut inner = self.inner.lock();
        let id = {
            inner.next_watch_id += 1;
            inner.next_watch_id
        };
        let data = inner
            .namespaces
            .get_mut(&ns_name)
            .ok_or(KvsError::NoNamespace(ns_name.clone()))?;
        let (tx, rx) = mpsc::unbounded_channel();
        let pending_create = match data.keys.get(key) {
            Some(value) => {
                let _ = tx.send(Ok(value.clone()));
                false
            }
            None if flags.waitcreate => true,
            None => return Err(KvsError::Noent(key.to_string())),
        };
        data.watchers.push(WatcherRec { id, key: key.to_string(), tx, pending_create });
        Ok(Watch { kvs: self.clone(), ns: ns_name, id, rx, done: false })
    }

    fn cancel_watch(&self, ns: &str, id: u64) {
        let mut inner = self.inner.lock();
        if let Some(data) = inner.namespaces.get_mut(ns) {
            if let Some(pos) = data.watchers.iter().position(|w| w.id == id) {
                let w = data.watchers.swap_remove(pos);
                let _ = w.tx.send(Err(KvsError::Nodata));
            }
        }
    }

    /// Remove every key under `prefix.` (and `prefix` itself) in the
    /// primary namespace. Returns how many keys went away.
    pub fn unlink(&self, prefix: &str) -> Result<usize, KvsError> {
        let mut inner = self.inner.lock();
        let data = inner
            .namespaces
            .get_mut(PRIMARY_NAMESPACE)
            .ok_or_else(|| KvsError::NoNamespace(PRIMARY_NAMESPACE.to_string()))?;
        let doomed: Vec<String> = data
            .keys
            .keys()
            .filter(|k| *k == prefix || k.starts_with(&format!("{prefix}.")))
            .cloned()
            .collect();
        for key in &doomed {
            data.keys.remove(key);
        }
        Ok(doomed.len())
    }

    pub fn namespace_create(&self, name: &str, owner: u32) -> Result<(), KvsError> {
        let mut inner = self.inner.lock();
        if inner.namespaces.contains_key(name) {
            return Err(KvsError::NamespaceExists(name.to_string()));
        }
        inner
            .namespaces
            .insert(name.to_string(), NamespaceData { owner, ..Default::default() });
        Ok(())
    }

    /// Remove a namespace. Every active watch in it ends with `Notsup`.
    pub fn namespace_remove(&self, name: &str) -> Result<(), KvsError> {
        if name == PRIMARY_NAMESPACE {
            return Err(KvsError::Inval("cannot remove primary namespace".to_string()));
        }
        let mut inner = self.inner.lock();
        let data = inner
            .namespaces
            .remove(name)
            .ok_or_else(|| KvsError::NoNamespace(name.to_string()))?;
        for w in data.watchers {
            let _ = w.tx.send(Err(KvsError::Notsup));
        }
        Ok(())
    }

    pub fn namespace_exists(&self, name: &str) -> bool {
        self.inner.lock().namespaces.contains_key(name)
    }

    pub fn namespace_owner(&self, name: &str) -> Result<u32, KvsError> {
        let inner = self.inner.lock();
        inner
            .namespaces
            .get(name)
            .map(|d| d.owner)
            .ok_or_else(|| KvsError::NoNamespace(name.to_string()))
    }

    /// Copy every key of `ns` into the primary namespace under
    /// `dest_prefix.`; used when a guest namespace is released.
    pub fn namespace_copy_to_primary(&self, ns: &str, dest_prefix: &str) -> Result<(), KvsError> {
        let mut inner = self.inner.lock();
        let keys: Vec<(String, String)> = inner
            .namespaces
            .get(ns)
            .ok_or_else(|| KvsError::NoNamespace(ns.to_string()))?
            .keys
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let primary = inner
            .namespaces
            .get_mut(PRIMARY_NAMESPACE)
            .ok_or_else(|| KvsError::NoNamespace(PRIMARY_NAMESPACE.to_string()))?;
        for (key, value) in keys {
            let dest = format!("{dest_prefix}.{key}");
            primary.keys.insert(dest.clone(), value.clone());
            notify(primary, &dest, &value);
        }
        Ok(())
    }
}

fn notify(data: &mut NamespaceData, key: &str, chunk: &str) {
    for w in data.watchers.iter_mut().filter(|w| w.key == key) {
        if w.pending_create {
            w.pending_create = false;
        }
        let _ = w.tx.send(Ok(chunk.to_string()));
    }
}

/// An active watch-append subscription.
#[derive(Debug)]
pub struct Watch {
    kvs: Kvs,
    ns: String,
    id: u64,
    rx: mpsc::UnboundedReceiver<Result<String, KvsError>>,
    done: bool,
}

impl Watch {
    /// Next chunk. Terminal errors: `Nodata` after cancel, `Notsup`
    /// after namespace removal.
    pub async fn next(&mut self) -> Result<String, KvsError> {
        if self.done {
            return Err(KvsError::Nodata);
        }
        match self.rx.recv().await {
            Some(Ok(chunk)) => Ok(chunk),
            Some(Err(e)) => {
                self.done = true;
                Err(e)
            }
            None => {
                self.done = true;
                Err(KvsError::Nodata)
            }
        }
    }

    /// End the watch; the stream yields `Nodata` and stops.
    pub fn cancel(&self) {
        self.kvs.cancel_watch(&self.ns, self.id);
    }
}

impl Drop for Watch {
    fn drop(&mut self) {
        self.kvs.cancel_watch(&self.ns, self.id);
    }
}

#[cfg(test)]
#[path = "kvs_tests.rs"]
mod tests;
