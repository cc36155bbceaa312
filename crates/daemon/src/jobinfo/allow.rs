// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Eventlog access checks.
//!
//! The first entry of every job eventlog is `submit`, whose context
//! carries the submitting userid. A subscriber is allowed when it is
//! the instance owner or its userid matches. Resolved owners go into a
//! small LRU so later watches skip the eventlog read.

use flux_core::eventlog::Event;
use flux_core::{Errnum, Jobid};
use flux_wire::Message;
use std::collections::HashMap;

/// Fixed-capacity owner cache with least-recently-used eviction.
pub(crate) struct OwnerLru {
    capacity: usize,
    map: HashMap<Jobid, u32>,
    order: Vec<Jobid>,
}

impl OwnerLru {
    pub fn new(capacity: usize) -> Self {
        OwnerLru { capacity, map: HashMap::new(), order: Vec::new() }
    }

    pub fn get(&mut self, id: Jobid) -> Option<u32> {
        let userid = self.map.get(&id).copied()?;
        self.touch(id);
        Some(userid)
    }

    pub fn put(&mut self, id: Jobid, userid: u32) {
        if self.map.insert(id, userid).is_none() && self.map.len() > self.capacity {
            if let Some(oldest) = self.order.first().copied() {
                self.map.remove(&oldest);
                self.order.remove(0);
            }
        }
        self.touch(id);
    }

    fn touch(&mut self, id: Jobid) {
        if let Some(pos) = self.order.iter().position(|&x| x == id) {
            self.order.remove(pos);
        }
        self.order.push(id);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

/// Extract the submit userid from the first eventlog entry.
pub(crate) fn eventlog_get_userid(log: &str) -> Result<u32, Errnum> {
    let first = log.split_inclusive('\n').next().ok_or(Errnum::Proto)?;
    let event = Event::decode(first).map_err(|_| Errnum::Proto)?;
    if event.name != "submit" {
        return Err(Errnum::Proto);
    }
    event
        .context_i64("userid")
        .and_then(|v| u32::try_from(v).ok())
        .ok_or(Errnum::Proto)
}

/// Authorize `msg` against the log's submit userid, caching the owner.
pub(crate) fn eventlog_allow(
    lru: &mut OwnerLru,
    msg: &Message,
    id: Jobid,
    log: &str,
) -> Result<(), Errnum> {
    let userid = eventlog_get_userid(log)?;
    lru.put(id, userid);
    msg.cred.authorize(userid).map_err(|e| e.errnum)
}

/// Fast path: authorize from the cache alone. `Ok(true)` means allowed,
/// `Ok(false)` means unknown job (read the log), `Err` means denied.
pub(crate) fn eventlog_allow_lru(
    lru: &mut OwnerLru,
    msg: &Message,
    id: Jobid,
) -> Result<bool, Errnum> {
    match lru.get(id) {
        Some(userid) => {
            msg.cred.authorize(userid).map_err(|e| e.errnum)?;
            Ok(true)
        }
        None => Ok(false),
    }
}

#[cfg(test)]
#[path = "allow_tests.rs"]
mod tests;
