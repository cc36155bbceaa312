// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! flux-shell: the per-node job shell.
//!
//! One shell runs per node per job. It maps tasks to local resources,
//! launches and supervises them, forwards their stdio into the job's
//! output eventlog, coordinates with its peers over the barrier
//! protocol, and gives plugins a say at every hook point.

pub mod barrier;
pub mod info;
pub mod mustache;
pub mod plugstack;
pub mod shell;
pub mod task;

pub use barrier::{barrier, BarrierError};
pub use info::{RankInfo, ShellInfo};
pub use mustache::{render, RenderContext};
pub use plugstack::{Plugin, Plugstack};
pub use shell::Shell;
pub use task::{exec_failure_exit_code, exit_code_from_status, ShellTask};
