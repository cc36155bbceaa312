// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error kinds carried on the wire.
//!
//! Streaming RPCs end with [`Errnum::Nodata`]; everything else signals a
//! real failure. The kinds are deliberately coarse so that services on
//! different nodes agree on them.

use serde::{Deserialize, Serialize};

/// Wire-level error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "kebab-case")]
pub enum Errnum {
    /// Malformed payload, schema violation, codec failure
    #[error("invalid argument")]
    Inval,

    /// Unknown jobid or missing key
    #[error("not found")]
    Noent,

    /// Missing pid or label
    #[error("no such process")]
    Srch,

    /// Sender not authorized
    #[error("permission denied")]
    Perm,

    /// Transient failure, caller should retry
    #[error("resource temporarily unavailable")]
    Again,

    /// Duplicate label, duplicate drain without overwrite
    #[error("already exists")]
    Exist,

    /// Streaming RPC reached its natural end
    #[error("no more data")]
    Nodata,

    /// Service is shutting down or not loaded
    #[error("function not implemented")]
    Nosys,

    /// Operation not supported (e.g. namespace removed mid-watch)
    #[error("operation not supported")]
    Notsup,

    /// Buffer or limit exceeded
    #[error("overflow")]
    Overflow,

    /// Deadline reached
    #[error("timed out")]
    Timedout,

    /// Peer misbehaved
    #[error("protocol error")]
    Proto,

    /// Escalation exhausted; caller should give up
    #[error("resource deadlock avoided")]
    Deadlk,
}

impl Errnum {
    /// True for the distinguished end-of-stream "error".
    pub fn is_eof(self) -> bool {
        self == Errnum::Nodata
    }
}

#[cfg(test)]
#[path = "errnum_tests.rs"]
mod tests;
