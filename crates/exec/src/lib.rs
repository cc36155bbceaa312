// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! flux-exec: remote subprocess execution.
//!
//! The subprocess server executes, multiplexes I/O for, signals, waits
//! on and reaps child processes on behalf of remote clients. The sdexec
//! variant launches each command as a systemd transient unit instead of
//! forking directly.

pub mod channel;
pub mod cmd;
pub mod local;
pub mod sdexec;
pub mod server;
pub mod sigchld;

pub use channel::{InputChannel, OutputChannel, OutputChunk, DEFAULT_BUFSIZE};
pub use cmd::Cmd;
pub use local::{exit_code, status_code, term_signal, LocalProcess, ProcessState, SpawnError};
pub use sdexec::{SdBus, SdexecFds, SdexecServer, UnitProperties};
pub use server::{ExecFlags, SubprocessServer};
