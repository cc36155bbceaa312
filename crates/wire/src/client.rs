// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI ⇄ daemon request/reply frames.
//!
//! A connection carries one request; the daemon streams replies until a
//! terminal `Error` frame (`nodata` for a stream's natural end). Sender
//! identity is assigned daemon-side from the connection, never taken
//! from the frame.

use flux_core::Errnum;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientRequest {
    pub topic: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub streaming: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientReply {
    Response {
        payload: Value,
    },
    Error {
        errnum: Errnum,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
