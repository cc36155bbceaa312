// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compact sets of non-negative integers.
//!
//! The textual form is the usual `"0,3-5,9"`: comma-separated members and
//! inclusive ranges, in any order. Encoding always emits ascending order,
//! range-folded unless asked otherwise.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum IdsetError {
    #[error("error parsing range {0:?}")]
    Range(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Idset {
    ids: BTreeSet<u32>,
}

impl Idset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(s: &str) -> Result<Self, IdsetError> {
        let mut set = Idset::new();
        set.decode_add(s)?;
        Ok(set)
    }

    /// Add the members of an encoded idset to this one.
    pub fn decode_add(&mut self, s: &str) -> Result<(), IdsetError> {
        for (lo, hi) in parse_ranges(s)? {
            for id in lo..=hi {
                self.ids.insert(id);
            }
        }
        Ok(())
    }

    /// Remove the members of an encoded idset from this one.
    pub fn decode_subtract(&mut self, s: &str) -> Result<(), IdsetError> {
        for (lo, hi) in parse_ranges(s)? {
            for id in lo..=hi {
                self.ids.remove(&id);
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, id: u32) {
        self.ids.insert(id);
    }

    pub fn remove(&mut self, id: u32) {
        self.ids.remove(&id);
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    pub fn contains(&self, id: u32) -> bool {
        self.ids.contains(&id)
    }

    pub fn count(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn first(&self) -> Option<u32> {
        self.ids.iter().next().copied()
    }

    pub fn is_subset(&self, other: &Idset) -> bool {
        self.ids.is_subset(&other.ids)
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ids.iter().copied()
    }

    /// Range-folded encoding: `"0-3,8"`.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (lo, hi) in self.ranges() {
            if !out.is_empty() {
                out.push(',');
            }
            if lo == hi {
                out.push_str(&lo.to_string());
            } else {
                out.push_str(&format!("{lo}-{hi}"));
            }
        }
        out
    }

    /// Unfolded encoding: every member spelled out.
    pub fn encode_unfolded(&self) -> String {
        self.ids.iter().map(u32::to_string).collect::<Vec<_>>().join(",")
    }

    fn ranges(&self) -> Vec<(u32, u32)> {
        let mut out: Vec<(u32, u32)> = Vec::new();
        for &id in &self.ids {
            match out.last_mut() {
                Some((_, hi)) if *hi + 1 == id => *hi = id,
                _ => out.push((id, id)),
            }
        }
        out
    }
}

impl fmt::Display for Idset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode())
    }
}

impl FromStr for Idset {
    type Err = IdsetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Idset::decode(s)
    }
}

impl FromIterator<u32> for Idset {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Idset { ids: iter.into_iter().collect() }
    }
}

fn parse_ranges(s: &str) -> Result<Vec<(u32, u32)>, IdsetError> {
    let mut out = Vec::new();
    if s.is_empty() {
        return Ok(out);
    }
    for part in s.split(',') {
        let err = || IdsetError::Range(part.to_string());
        let (lo, hi) = match part.split_once('-') {
            Some((a, b)) => {
                (a.parse::<u32>().map_err(|_| err())?, b.parse::<u32>().map_err(|_| err())?)
            }
            None => {
                let v = part.parse::<u32>().map_err(|_| err())?;
                (v, v)
            }
        };
        if lo > hi {
            return Err(err());
        }
        out.push((lo, hi));
    }
    Ok(out)
}

#[cfg(test)]
#[path = "idset_tests.rs"]
mod tests;
