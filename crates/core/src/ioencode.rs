// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Envelope for per-stream byte fragments.
//!
//! `{stream, rank, data?: base64, eof?: true}` — `data` is present only
//! when non-empty, `eof` only when true. Rank travels as a string so a
//! rank set ("0-3") can stand in for a single rank.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{json, Map, Value};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum IoencodeError {
    #[error("io object requires data or eof")]
    Empty,

    #[error("invalid io object: {0}")]
    Invalid(String),
}

/// Decoded io object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoData {
    pub stream: String,
    pub rank: String,
    pub data: Option<Vec<u8>>,
    pub eof: bool,
}

/// Encode data and/or EOF for one stream. It is an error to provide
/// neither data nor EOF.
pub fn ioencode(
    stream: &str,
    rank: &str,
    data: Option<&[u8]>,
    eof: bool,
) -> Result<Map<String, Value>, IoencodeError> {
    let data = data.filter(|d| !d.is_empty());
    if data.is_none() && !eof {
        return Err(IoencodeError::Empty);
    }
    let mut obj = Map::new();
    obj.insert("stream".to_string(), json!(stream));
    obj.insert("rank".to_string(), json!(rank));
    if let Some(bytes) = data {
        obj.insert("data".to_string(), json!(BASE64.encode(bytes)));
    }
    if eof {
        obj.insert("eof".to_string(), json!(true));
    }
    Ok(obj)
}

pub fn iodecode(obj: &Map<String, Value>) -> Result<IoData, IoencodeError> {
    let field = |key: &str| {
        obj.get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| IoencodeError::Invalid(format!("missing {key}")))
    };
    let stream = field("stream")?.to_string();
    let rank = field("rank")?.to_string();
    let data = match obj.get("data") {
        None => None,
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| IoencodeError::Invalid("data must be a string".to_string()))?;
            Some(
                BASE64
                    .decode(s)
                    .map_err(|e| IoencodeError::Invalid(format!("bad base64: {e}")))?,
            )
        }
    };
    let eof = obj.get("eof").and_then(Value::as_bool).unwrap_or(false);
    if data.is_none() && !eof {
        return Err(IoencodeError::Empty);
    }
    Ok(IoData { stream, rank, data, eof })
}

#[cfg(test)]
#[path = "ioencode_tests.rs"]
mod tests;
