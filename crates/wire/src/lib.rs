// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Messaging for the control plane.
//!
//! Two layers live here: the in-process message router that services and
//! clients share (request envelopes, matchtags, streaming responses,
//! cancel/disconnect matching), and the socket framing used between the
//! CLI and the daemon.
//!
//! Wire format: 4-byte length prefix (big-endian) + JSON payload

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

mod client;
mod frame;
mod message;
mod router;

pub use client::{ClientReply, ClientRequest};
pub use frame::{decode, encode, read_message, read_message_timeout, write_message, FrameError};
pub use message::{Cred, Message, RoleMask, RpcError};
pub use router::{Handle, Router, Rpc, RpcFlags, ServiceHandle};
