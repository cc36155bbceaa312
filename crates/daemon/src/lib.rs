// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! flux-daemon: broker-side services of the execution control plane.
//!
//! Hosts the job-info service (eventlog lookup, streaming watch with
//! guest-namespace handling, live update projection), the job-manager
//! ingest surface, resource eventlog truncation and the socket listener
//! the CLI talks to.

pub mod drainset;
pub mod ingest;
pub mod jobinfo;
pub mod listener;
pub mod truncate;

pub use drainset::Drainset;
pub use ingest::JobManager;
pub use jobinfo::JobInfo;
pub use truncate::TruncateInfo;
