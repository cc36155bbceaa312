// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dotted-path access into JSON objects.
//!
//! Paths follow `seg("." seg)*`; leading, trailing and doubled dots are
//! invalid. `set` creates missing intermediate objects; `del` removes the
//! leaf and prunes parent objects that become empty.

use crate::Errnum;
use serde_json::{Map, Value};

fn split_path(path: &str) -> Result<Vec<&str>, Errnum> {
    if path.is_empty() {
        return Err(Errnum::Inval);
    }
    let segs: Vec<&str> = path.split('.').collect();
    if segs.iter().any(|s| s.is_empty()) {
        return Err(Errnum::Inval);
    }
    Ok(segs)
}

/// Look up the value at `path`. `Noent` when any segment is missing.
pub fn get<'a>(obj: &'a Value, path: &str) -> Result<&'a Value, Errnum> {
    let segs = split_path(path)?;
    let mut cur = obj;
    for seg in segs {
        cur = cur.as_object().and_then(|m| m.get(seg)).ok_or(Errnum::Noent)?;
    }
    Ok(cur)
}

/// Set the value at `path`, creating intermediate objects as needed. An
/// intermediate that exists but is not an object is replaced.
pub fn set(obj: &mut Value, path: &str, value: Value) -> Result<(), Errnum> {
    let segs = split_path(path)?;
    if !obj.is_object() {
        return Err(Errnum::Inval);
    }
    let mut cur = obj;
    let (leaf, parents) = segs.split_last().ok_or(Errnum::Inval)?;
    for seg in parents {
        let map = cur.as_object_mut().ok_or(Errnum::Inval)?;
        let entry = map.entry(seg.to_string()).or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        cur = entry;
    }
    let map = cur.as_object_mut().ok_or(Errnum::Inval)?;
    map.insert(leaf.to_string(), value);
    Ok(())
}

/// Delete the value at `path`, pruning now-empty parent objects upward.
/// Deleting a nonexistent path is not an error.
pub fn del(obj: &mut Value, path: &str) -> Result<(), Errnum> {
    let segs = split_path(path)?;
    if !obj.is_object() {
        return Err(Errnum::Inval);
    }
    del_segs(obj, &segs);
    Ok(())
}

// Returns true if the leaf (or a parent) was removed and the containing
// object is now empty, asking the caller to prune it too.
fn del_segs(cur: &mut Value, segs: &[&str]) -> bool {
    let Some(map) = cur.as_object_mut() else {
        return false;
    };
    let (seg, rest) = match segs.split_first() {
        Some(v) => v,
        None => return false,
    };
    if rest.is_empty() {
        map.remove(*seg);
    } else if let Some(child) = map.get_mut(*seg) {
        if del_segs(child, rest) {
            map.remove(*seg);
        }
    }
    map.is_empty()
}

#[cfg(test)]
#[path = "jpath_tests.rs"]
mod tests;
