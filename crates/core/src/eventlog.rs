// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Line-delimited JSON eventlog codec.
//!
//! An eventlog is an append-only sequence of entries, one compact JSON
//! object per line, each terminated by a single `\n`. The encoded line is
//! the entry's stable identity: it is what gets appended to the KVS, what
//! watchers stream back, and what reconnect reconciliation compares.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum EventlogError {
    #[error("invalid event name")]
    InvalidName,

    #[error("event context must be an object")]
    InvalidContext,

    #[error("invalid timestamp")]
    InvalidTimestamp,

    #[error("entry must be a single line terminated by newline")]
    InvalidFraming,

    #[error("entry is not valid JSON: {0}")]
    Parse(String),
}

/// One eventlog entry.
///
/// Field order matters for the encoded form: timestamp, name, context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: f64,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<Map<String, Value>>,
}

impl Event {
    /// Build an entry, substituting the current realtime clock when
    /// `timestamp` is 0.0.
    pub fn build(
        timestamp: f64,
        name: &str,
        context: Option<Map<String, Value>>,
    ) -> Result<Self, EventlogError> {
        if timestamp < 0.0 || !timestamp.is_finite() {
            return Err(EventlogError::InvalidTimestamp);
        }
        validate_name(name)?;
        let timestamp = if timestamp == 0.0 { timestamp_now() } else { timestamp };
        Ok(Event { timestamp, name: name.to_string(), context })
    }

    /// Encode to one compact JSON line with trailing newline.
    pub fn encode(&self) -> Result<String, EventlogError> {
        validate_name(&self.name)?;
        if self.timestamp < 0.0 || !self.timestamp.is_finite() {
            return Err(EventlogError::InvalidTimestamp);
        }
        let mut s = serde_json::to_string(self).map_err(|e| EventlogError::Parse(e.to_string()))?;
        s.push('\n');
        Ok(s)
    }

    /// Decode a single line. Requires exactly one trailing `\n` and no
    /// embedded newline.
    pub fn decode(line: &str) -> Result<Self, EventlogError> {
        let Some(body) = line.strip_suffix('\n') else {
            return Err(EventlogError::InvalidFraming);
        };
        if body.is_empty() || body.contains('\n') {
            return Err(EventlogError::InvalidFraming);
        }
        decode_body(body)
    }

    /// Fetch an integer field from the context.
    pub fn context_i64(&self, key: &str) -> Option<i64> {
        self.context.as_ref()?.get(key)?.as_i64()
    }

    /// Fetch a string field from the context.
    pub fn context_str(&self, key: &str) -> Option<&str> {
        self.context.as_ref()?.get(key)?.as_str()
    }
}

fn validate_name(name: &str) -> Result<(), EventlogError> {
    if name.is_empty() || name.chars().any(|c| c.is_whitespace()) {
        return Err(EventlogError::InvalidName);
    }
    Ok(())
}

fn decode_body(body: &str) -> Result<Event, EventlogError> {
    let value: Value =
        serde_json::from_str(body).map_err(|e| EventlogError::Parse(e.to_string()))?;
    let Value::Object(obj) = value else {
        return Err(EventlogError::Parse("entry is not an object".to_string()));
    };
    let timestamp = obj
        .get("timestamp")
        .and_then(Value::as_f64)
        .ok_or(EventlogError::InvalidTimestamp)?;
    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .ok_or(EventlogError::InvalidName)?
        .to_string();
    validate_name(&name)?;
    let context = match obj.get("context") {
        None => None,
        Some(Value::Object(map)) => Some(map.clone()),
        Some(_) => return Err(EventlogError::InvalidContext),
    };
    Ok(Event { timestamp, name, context })
}

/// Decode a whole log. The empty string yields an empty vector; any
/// malformed line fails the whole decode.
pub fn decode_log(s: &str) -> Result<Vec<Event>, EventlogError> {
    if s.is_empty() {
        return Ok(Vec::new());
    }
    if !s.ends_with('\n') {
        return Err(EventlogError::InvalidFraming);
    }
    s.split_terminator('\n')
        .map(|line| {
            if line.is_empty() {
                return Err(EventlogError::InvalidFraming);
            }
            decode_body(line)
        })
        .collect()
}

/// Encode an event array back to log form. The empty array encodes to the
/// empty string, not `"\n"`.
pub fn encode_log(events: &[Event]) -> Result<String, EventlogError> {
    let mut out = String::new();
    for event in events {
        out.push_str(&event.encode()?);
    }
    Ok(out)
}

/// True if the log contains an event with the given name.
pub fn log_contains(s: &str, name: &str) -> Result<bool, EventlogError> {
    Ok(decode_log(s)?.iter().any(|e| e.name == name))
}

/// Realtime clock as double seconds, matching eventlog timestamps.
pub fn timestamp_now() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}

#[cfg(test)]
#[path = "eventlog_tests.rs"]
mod tests;
