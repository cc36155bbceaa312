// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Typed views of the job eventlog contexts referenced by the core.
//!
//! [`JobEvent`] is a tagged sum over the event names the control plane
//! reacts to, with a `Raw` variant for everything else so unknown events
//! round-trip untouched. Unknown fields inside a known context are
//! preserved through the flattened `extra` maps.

use crate::eventlog::{Event, EventlogError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

fn is_empty_map(m: &Map<String, Value>) -> bool {
    m.is_empty()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitContext {
    pub userid: u32,
    pub urgency: i32,
    pub t_submit: f64,
    #[serde(flatten, skip_serializing_if = "is_empty_map", default)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExceptionContext {
    #[serde(rename = "type")]
    pub kind: String,
    pub severity: i32,
    #[serde(default)]
    pub note: String,
    #[serde(flatten, skip_serializing_if = "is_empty_map", default)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinishContext {
    pub status: i32,
    #[serde(flatten, skip_serializing_if = "is_empty_map", default)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseContext {
    pub ranks: String,
    #[serde(rename = "final")]
    pub is_final: bool,
    #[serde(flatten, skip_serializing_if = "is_empty_map", default)]
    pub extra: Map<String, Value>,
}

/// Decoded job eventlog entry.
#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    Submit(SubmitContext),
    Exception(ExceptionContext),
    Start,
    Finish(FinishContext),
    Release(ReleaseContext),
    Clean,
    /// `resource-update`; may only carry `expiration`
    ResourceUpdate(Map<String, Value>),
    /// `jobspec-update`; keys are dotted paths
    JobspecUpdate(Map<String, Value>),
    /// Any other event, context preserved verbatim
    Raw { name: String, context: Option<Map<String, Value>> },
}

impl JobEvent {
    /// Classify a decoded entry. Contexts that fail their schema are a
    /// protocol violation, not a `Raw` fallback: a corrupt `submit` must
    /// not be silently ignored.
    pub fn from_event(event: &Event) -> Result<Self, EventlogError> {
        let ctx = || {
            event
                .context
                .clone()
                .map(Value::Object)
                .ok_or(EventlogError::InvalidContext)
        };
        fn parse<T: serde::de::DeserializeOwned>(v: Value) -> Result<T, EventlogError> {
            serde_json::from_value(v).map_err(|e| EventlogError::Parse(e.to_string()))
        }
        Ok(match event.name.as_str() {
            "submit" => JobEvent::Submit(parse(ctx()?)?),
            "exception" => JobEvent::Exception(parse(ctx()?)?),
            "start" => JobEvent::Start,
            "finish" => JobEvent::Finish(parse(ctx()?)?),
            "release" => JobEvent::Release(parse(ctx()?)?),
            "clean" => JobEvent::Clean,
            "resource-update" => {
                JobEvent::ResourceUpdate(event.context.clone().unwrap_or_default())
            }
            "jobspec-update" => {
                JobEvent::JobspecUpdate(event.context.clone().unwrap_or_default())
            }
            _ => JobEvent::Raw { name: event.name.clone(), context: event.context.clone() },
        })
    }

    pub fn name(&self) -> &str {
        match self {
            JobEvent::Submit(_) => "submit",
            JobEvent::Exception(_) => "exception",
            JobEvent::Start => "start",
            JobEvent::Finish(_) => "finish",
            JobEvent::Release(_) => "release",
            JobEvent::Clean => "clean",
            JobEvent::ResourceUpdate(_) => "resource-update",
            JobEvent::JobspecUpdate(_) => "jobspec-update",
            JobEvent::Raw { name, .. } => name,
        }
    }

    /// Rebuild an eventlog entry with the given timestamp (0.0 = now).
    pub fn to_event(&self, timestamp: f64) -> Result<Event, EventlogError> {
        let obj = |v: Value| match v {
            Value::Object(m) => Ok(m),
            _ => Err(EventlogError::InvalidContext),
        };
        let context = match self {
            JobEvent::Submit(c) => Some(obj(to_value(c)?)?),
            JobEvent::Exception(c) => Some(obj(to_value(c)?)?),
            JobEvent::Start | JobEvent::Clean => None,
            JobEvent::Finish(c) => Some(obj(to_value(c)?)?),
            JobEvent::Release(c) => Some(obj(to_value(c)?)?),
            JobEvent::ResourceUpdate(m) | JobEvent::JobspecUpdate(m) => Some(m.clone()),
            JobEvent::Raw { context, .. } => context.clone(),
        };
        Event::build(timestamp, self.name(), context)
    }
}

fn to_value<T: Serialize>(v: &T) -> Result<Value, EventlogError> {
    serde_json::to_value(v).map_err(|e| EventlogError::Parse(e.to_string()))
}

#[cfg(test)]
#[path = "event_tests.rs"]
mod tests;
