// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Folding a resource eventlog prefix into one `truncate` event.
//!
//! Online and torpid ranks and the drainset are tracked directly; every
//! other context field rides along in the held context object and is
//! simply overwritten by later events (last writer wins).

use crate::drainset::Drainset;
use flux_core::eventlog::Event;
use flux_core::{Errnum, Idset};
use serde_json::{json, Map, Value};

pub struct TruncateInfo {
    timestamp: f64,
    online: Idset,
    torpid: Idset,
    drainset: Drainset,
    context: Map<String, Value>,
}

impl Default for TruncateInfo {
    fn default() -> Self {
        Self::new()
    }
}

impl TruncateInfo {
    pub fn new() -> Self {
        TruncateInfo {
            timestamp: 0.0,
            online: Idset::new(),
            torpid: Idset::new(),
            drainset: Drainset::new(),
            context: Map::new(),
        }
    }

    /// Fold one event into the truncate state. Unknown event names fail
    /// with `Noent`; processing a log prefix in order is idempotent.
    pub fn update(&mut self, event: &Event) -> Result<(), Errnum> {
        self.timestamp = event.timestamp;
        let context = event.context.as_ref();
        match event.name.as_str() {
            "restart" => self.process_restart(context.ok_or(Errnum::Proto)?),
            "truncate" => self.process_truncate(context.ok_or(Errnum::Proto)?),
            "resource-define" => self.process_resource_define(context.ok_or(Errnum::Proto)?),
            "drain" => self.process_drain(context.ok_or(Errnum::Proto)?),
            "undrain" => self.process_undrain(context.ok_or(Errnum::Proto)?),
            "online" => add_idset(&mut self.online, "idset", context),
            "offline" => subtract_idset(&mut self.online, "idset", context),
            "torpid" => add_idset(&mut self.torpid, "idset", context),
            "lively" => subtract_idset(&mut self.torpid, "idset", context),
            _ => Err(Errnum::Noent),
        }
    }

    // restart resets both idsets, merges the context (ranks, nodelist,
    // online), then reloads online from it.
    fn process_restart(&mut self, context: &Map<String, Value>) -> Result<(), Errnum> {
        for (k, v) in context {
            self.context.insert(k.clone(), v.clone());
        }
        self.online.clear();
        self.torpid.clear();
        add_idset(&mut self.online, "online", Some(context))
    }

    fn process_truncate(&mut self, context: &Map<String, Value>) -> Result<(), Errnum> {
        for (k, v) in context {
            self.context.insert(k.clone(), v.clone());
        }
        self.online.clear();
        self.torpid.clear();
        add_idset(&mut self.online, "online", Some(context))?;
        add_idset(&mut self.torpid, "torpid", Some(context))?;
        let drain = context.get("drain").ok_or(Errnum::Proto)?;
        self.drainset = Drainset::from_json(drain)?;
        Ok(())
    }

    fn process_resource_define(&mut self, context: &Map<String, Value>) -> Result<(), Errnum> {
        let method = context.get("method").ok_or(Errnum::Proto)?;
        self.context.insert("discovery-method".to_string(), method.clone());
        Ok(())
    }

    fn process_drain(&mut self, context: &Map<String, Value>) -> Result<(), Errnum> {
        let ids = context.get("idset").and_then(Value::as_str).ok_or(Errnum::Proto)?;
        let reason = context.get("reason").and_then(Value::as_str).unwrap_or("");
        let overwrite = context
            .get("overwrite")
            .and_then(Value::as_i64)
            .ok_or(Errnum::Proto)? as i32;
        if !(0..=2).contains(&overwrite) {
            return Err(Errnum::Inval);
        }
        let ranks = Idset::decode(ids).map_err(|_| Errnum::Inval)?;
        for rank in ranks.iter() {
            // a rank already drained is not an error while folding
            match self.drainset.drain(rank, self.timestamp, reason, overwrite) {
                Ok(()) | Err(Errnum::Exist) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn process_undrain(&mut self, context: &Map<String, Value>) -> Result<(), Errnum> {
        let ids = context.get("idset").and_then(Value::as_str).ok_or(Errnum::Proto)?;
        let ranks = Idset::decode(ids).map_err(|_| Errnum::Inval)?;
        for rank in ranks.iter() {
            self.drainset.undrain(rank);
        }
        Ok(())
    }

    /// The single `truncate` event replacing the folded prefix.
    pub fn to_event(&self) -> Result<Event, Errnum> {
        let mut context = self.context.clone();
        context.insert("online".to_string(), json!(self.online.encode()));
        context.insert("torpid".to_string(), json!(self.torpid.encode()));
        context.insert("drain".to_string(), self.drainset.to_json());
        Event::build(self.timestamp, "truncate", Some(context)).map_err(|_| Errnum::Inval)
    }
}

fn add_idset(
    idset: &mut Idset,
    key: &str,
    context: Option<&Map<String, Value>>,
) -> Result<(), Errnum> {
    let ids = context
        .and_then(|c| c.get(key))
        .and_then(Value::as_str)
        .ok_or(Errnum::Proto)?;
    idset.decode_add(ids).map_err(|_| Errnum::Inval)
}

fn subtract_idset(
    idset: &mut Idset,
    key: &str,
    context: Option<&Map<String, Value>>,
) -> Result<(), Errnum> {
    let ids = context
        .and_then(|c| c.get(key))
        .and_then(Value::as_str)
        .ok_or(Errnum::Proto)?;
    idset.decode_subtract(ids).map_err(|_| Errnum::Inval)
}

#[cfg(test)]
#[path = "truncate_tests.rs"]
mod tests;
