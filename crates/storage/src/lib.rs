// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! flux-storage: the key-value store the control plane records into.
//!
//! The store is namespaced, append-aware and watchable: eventlogs are
//! values that only ever grow, and watchers receive committed appends in
//! commit order. [`EventLogger`] batches eventlog appends into
//! transactions on top of it.

pub mod eventlogger;
pub mod kvs;

pub use eventlogger::{AppendFlags, EventLogger, EventLoggerOps};
pub use kvs::{Kvs, KvsError, Txn, Watch, WatchFlags};
