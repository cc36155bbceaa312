// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Drained-rank bookkeeping for the resource eventlog.

use flux_core::{Errnum, Idset};
use indexmap::IndexMap;
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct DrainInfo {
    pub timestamp: f64,
    pub reason: String,
}

/// Map of drained rank to `{timestamp, reason}`, insertion-ordered.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Drainset {
    ranks: IndexMap<u32, DrainInfo>,
}

impl Drainset {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain one rank. `overwrite` semantics:
    /// - `0`: fail with `Exist` if the rank is already drained with a
    ///   reason (a reason-less prior entry is overwritten silently)
    /// - `1`: overwrite unconditionally
    /// - `2`: append the new reason to the existing one
    pub fn drain(
        &mut self,
        rank: u32,
        timestamp: f64,
        reason: &str,
        overwrite: i32,
    ) -> Result<(), Errnum> {
        if !(0..=2).contains(&overwrite) {
            return Err(Errnum::Inval);
        }
        match self.ranks.get_mut(&rank) {
            None => {
                self.ranks.insert(rank, DrainInfo { timestamp, reason: reason.to_string() });
                Ok(())
            }
            Some(existing) => match overwrite {
                0 if !existing.reason.is_empty() => Err(Errnum::Exist),
                2 => {
                    existing.timestamp = timestamp;
                    if existing.reason.is_empty() {
                        existing.reason = reason.to_string();
                    } else if !reason.is_empty() {
                        existing.reason = format!("{}, {}", existing.reason, reason);
                    }
                    Ok(())
                }
                _ => {
                    *existing = DrainInfo { timestamp, reason: reason.to_string() };
                    Ok(())
                }
            },
        }
    }

    pub fn undrain(&mut self, rank: u32) {
        self.ranks.shift_remove(&rank);
    }

    pub fn contains(&self, rank: u32) -> bool {
        self.ranks.contains_key(&rank)
    }

    pub fn ranks(&self) -> Idset {
        self.ranks.keys().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.ranks.is_empty()
    }

    /// JSON form: ranks with identical `(timestamp, reason)` fold into
    /// one idset-keyed entry.
    pub fn to_json(&self) -> Value {
        let mut groups: IndexMap<(u64, String), Idset> = IndexMap::new();
        for (&rank, info) in &self.ranks {
            groups
                .entry((info.timestamp.to_bits(), info.reason.clone()))
                .or_default()
                .insert(rank);
        }
        let mut obj = Map::new();
        for ((ts_bits, reason), idset) in groups {
            obj.insert(
                idset.encode(),
                json!({"timestamp": f64::from_bits(ts_bits), "reason": reason}),
            );
        }
        Value::Object(obj)
    }

    /// Rebuild from the JSON form.
    pub fn from_json(value: &Value) -> Result<Self, Errnum> {
        let obj = value.as_object().ok_or(Errnum::Proto)?;
        let mut ds = Drainset::new();
        for (ids, info) in obj {
            let idset = Idset::decode(ids).map_err(|_| Errnum::Proto)?;
            let timestamp = info
                .get("timestamp")
                .and_then(Value::as_f64)
                .ok_or(Errnum::Proto)?;
            let reason = info
                .get("reason")
                .and_then(Value::as_str)
                .unwrap_or_default();
            for rank in idset.iter() {
                ds.ranks.insert(rank, DrainInfo { timestamp, reason: reason.to_string() });
            }
        }
        ds.ranks.sort_keys();
        Ok(ds)
    }
}

#[cfg(test)]
#[path = "drainset_tests.rs"]
mod tests;
