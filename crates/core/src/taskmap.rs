// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Task-to-node maps.
//!
//! A taskmap is a run-length encoded assignment of taskids to nodeids,
//! stored as blocks `[nodeid, nnodes, ppn, repeat]`. Two maps are
//! equivalent when they induce the same task→node function; a plugin may
//! substitute one for the other only when they are equivalent.

use crate::idset::Idset;
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TaskmapError {
    #[error("{0}")]
    Decode(String),

    #[error("{0}")]
    Check(String),

    #[error("taskmap is unknown")]
    Unknown,

    #[error("taskid {0} is not in the map")]
    NoSuchTask(u32),
}

fn decode_err(msg: impl Into<String>) -> TaskmapError {
    TaskmapError::Decode(msg.into())
}

/// Output encodings. Exactly one per encode call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskmapEncoding {
    /// Internal JSON form: `[[nodeid,nnodes,ppn,repeat],…]`
    Json,
    /// Range-folded idsets, one per node: `"0-3;4-7"`
    Raw,
    /// Unfolded idsets: `"0,1,2,3;4,5,6,7"`
    RawDeranged,
    /// PMI process mapping: `"(vector,(0,4,4))"`
    Pmi,
    /// One `taskid: nodeid` line per task
    Multiline,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Block {
    nodeid: u32,
    nnodes: u32,
    ppn: u32,
    repeat: u32,
}

impl Block {
    fn ntasks(&self) -> u64 {
        self.nnodes as u64 * self.ppn as u64 * self.repeat as u64
    }

    fn shape_eq(&self, other: &Block) -> bool {
        self.nodeid == other.nodeid && self.nnodes == other.nnodes && self.ppn == other.ppn
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Taskmap {
    blocks: Vec<Block>,
}

impl Taskmap {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when the map carries no assignment at all.
    pub fn unknown(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Append a block, merging with the trailing block where the shape
    /// allows: an identical block bumps the repeat count, and a block
    /// that continues the previous node range extends it. When an
    /// extension makes the last block identical to the one before it,
    /// the two fold into a repeat.
    pub fn append(&mut self, nodeid: u32, nnodes: u32, ppn: u32) {
        if let Some(last) = self.blocks.last_mut() {
            if last.nodeid == nodeid && last.nnodes == nnodes && last.ppn == ppn {
                last.repeat += 1;
                return;
            }
            if last.ppn == ppn && last.repeat == 1 && nodeid == last.nodeid + last.nnodes {
                last.nnodes += nnodes;
                if self.blocks.len() >= 2 {
                    let len = self.blocks.len();
                    let last = self.blocks[len - 1];
                    let prev = &mut self.blocks[len - 2];
                    if prev.shape_eq(&last) {
                        prev.repeat += 1;
                        self.blocks.pop();
                    }
                }
                return;
            }
        }
        self.blocks.push(Block { nodeid, nnodes, ppn, repeat: 1 });
    }

    pub fn total_ntasks(&self) -> u64 {
        self.blocks.iter().map(Block::ntasks).sum()
    }

    pub fn nnodes(&self) -> usize {
        let mut nodes = BTreeSet::new();
        for b in &self.blocks {
            for n in b.nodeid..b.nodeid + b.nnodes {
                nodes.insert(n);
            }
        }
        nodes.len()
    }

    /// Node assignment of one taskid.
    pub fn nodeid(&self, taskid: u32) -> Result<u32, TaskmapError> {
        if self.unknown() {
            return Err(TaskmapError::Unknown);
        }
        let mut offset = taskid as u64;
        for b in &self.blocks {
            if offset < b.ntasks() {
                let per_repeat = b.nnodes as u64 * b.ppn as u64;
                let within = offset % per_repeat;
                return Ok(b.nodeid + (within / b.ppn as u64) as u32);
            }
            offset -= b.ntasks();
        }
        Err(TaskmapError::NoSuchTask(taskid))
    }

    pub fn ntasks(&self, nodeid: u32) -> u64 {
        self.blocks
            .iter()
            .filter(|b| nodeid >= b.nodeid && nodeid < b.nodeid + b.nnodes)
            .map(|b| b.ppn as u64 * b.repeat as u64)
            .sum()
    }

    /// All taskids assigned to one node.
    pub fn taskids(&self, nodeid: u32) -> Idset {
        let mut set = Idset::new();
        let mut offset: u64 = 0;
        for b in &self.blocks {
            let per_repeat = b.nnodes as u64 * b.ppn as u64;
            if nodeid >= b.nodeid && nodeid < b.nodeid + b.nnodes {
                let node_off = (nodeid - b.nodeid) as u64 * b.ppn as u64;
                for rep in 0..b.repeat as u64 {
                    let start = offset + rep * per_repeat + node_off;
                    for t in start..start + b.ppn as u64 {
                        set.insert(t as u32);
                    }
                }
            }
            offset += b.ntasks();
        }
        set
    }

    /// Decode either the internal JSON form or the RAW form, autodetected.
    pub fn decode(s: &str) -> Result<Self, TaskmapError> {
        if s.trim_start().starts_with('[') {
            Self::decode_json(s)
        } else {
            Self::decode_raw(s)
        }
    }

    fn decode_json(s: &str) -> Result<Self, TaskmapError> {
        let value: Value =
            serde_json::from_str(s).map_err(|e| decode_err(format!("parse error: {e}")))?;
        let Value::Array(rows) = value else {
            return Err(decode_err("taskmap must be an array of arrays"));
        };
        let mut map = Taskmap::new();
        for row in rows {
            let Value::Array(cells) = row else {
                return Err(decode_err("block must be an array"));
            };
            if cells.len() != 4 {
                return Err(decode_err("block must have 4 elements"));
            }
            let mut nums = [0u64; 4];
            for (i, cell) in cells.iter().enumerate() {
                nums[i] = cell
                    .as_u64()
                    .ok_or_else(|| decode_err("block elements must be non-negative integers"))?;
            }
            let [nodeid, nnodes, ppn, repeat] = nums;
            if nnodes < 1 || ppn < 1 || repeat < 1 {
                return Err(decode_err("invalid block"));
            }
            if nodeid > u32::MAX as u64 || nnodes > u32::MAX as u64 {
                return Err(decode_err("invalid block"));
            }
            map.blocks.push(Block {
                nodeid: nodeid as u32,
                nnodes: nnodes as u32,
                ppn: ppn as u32,
                repeat: repeat as u32,
            });
        }
        Ok(map)
    }

    /// Decode the RAW form: semicolon-separated taskid idsets, one per
    /// node. Taskids must cover `[0, total)` exactly.
    pub fn decode_raw(s: &str) -> Result<Self, TaskmapError> {
        if s.is_empty() {
            return Ok(Taskmap::new());
        }
        let mut assignment: std::collections::BTreeMap<u32, u32> = Default::default();
        let mut duplicates = Idset::new();

        for (nodeid, part) in s.split(';').enumerate() {
            let mut prev: Option<u32> = None;
            for range in part.split(',') {
                let (lo, hi) = parse_raw_range(range)?;
                if let Some(p) = prev {
                    if lo <= p {
                        return Err(decode_err(format!("range '{range}' is out of order")));
                    }
                }
                prev = Some(hi);
                for task in lo..=hi {
                    if assignment.insert(task, nodeid as u32).is_some() {
                        duplicates.insert(task);
                    }
                }
            }
        }

        if !duplicates.is_empty() {
            let noun = if duplicates.count() == 1 { "taskid" } else { "taskids" };
            return Err(decode_err(format!(
                "duplicate {noun} specified: {}",
                duplicates.encode()
            )));
        }

        let max = assignment.keys().next_back().copied().unwrap_or(0);
        let mut missing = Idset::new();
        for task in 0..=max {
            if !assignment.contains_key(&task) {
                missing.insert(task);
            }
        }
        if !missing.is_empty() {
            let noun = if missing.count() == 1 { "taskid" } else { "taskids" };
            return Err(decode_err(format!("missing {noun}: {}", missing.encode())));
        }

        let mut map = Taskmap::new();
        let mut run: Option<(u32, u32)> = None; // (nodeid, ppn)
        for (_, &node) in assignment.iter() {
            match run {
                Some((n, ppn)) if n == node => run = Some((n, ppn + 1)),
                Some((n, ppn)) => {
                    map.append(n, 1, ppn);
                    run = Some((node, 1));
                }
                None => run = Some((node, 1)),
            }
        }
        if let Some((n, ppn)) = run {
            map.append(n, 1, ppn);
        }
        Ok(map)
    }

    /// Decode the PMI `process mapping` form, e.g. `"(vector,(0,4,4))"`.
    /// Interior whitespace and a trailing comma are tolerated.
    pub fn decode_pmi(s: &str) -> Result<Self, TaskmapError> {
        let mut rest = s.trim_start();
        if let Some(r) = rest.strip_prefix('(') {
            rest = r.trim_start();
        }
        rest = rest
            .strip_prefix("vector")
            .ok_or_else(|| decode_err("vector prefix must precede blocklist"))?;

        let mut map = Taskmap::new();
        loop {
            rest = rest.trim_start_matches(|c: char| c == ',' || c.is_whitespace());
            if rest.is_empty() || rest.starts_with(')') {
                break;
            }
            if !rest.starts_with('(') {
                return Err(decode_err(format!("unable to parse block: {rest}")));
            }
            let close =
                rest.find(')').ok_or_else(|| decode_err(format!("unable to parse block: {rest}")))?;
            let inner = &rest[1..close];
            let nums: Vec<i64> = inner
                .split(',')
                .map(|t| t.trim().parse::<i64>())
                .collect::<Result<_, _>>()
                .map_err(|_| decode_err(format!("unable to parse block: {rest}")))?;
            if nums.len() != 3 {
                return Err(decode_err(format!("unable to parse block: {rest}")));
            }
            let (nodeid, nnodes, ppn) = (nums[0], nums[1], nums[2]);
            if nodeid < 0 || nnodes < 1 || ppn < 1 {
                return Err(decode_err(format!("invalid number in block: {rest}")));
            }
            map.append(nodeid as u32, nnodes as u32, ppn as u32);
            rest = &rest[close + 1..];
        }
        Ok(map)
    }

    pub fn encode(&self, encoding: TaskmapEncoding) -> String {
        match encoding {
            TaskmapEncoding::Json => self.encode_json(),
            TaskmapEncoding::Raw => self.encode_raw(false),
            TaskmapEncoding::RawDeranged => self.encode_raw(true),
            TaskmapEncoding::Pmi => self.encode_pmi(),
            TaskmapEncoding::Multiline => self.encode_multiline(),
        }
    }

    fn encode_json(&self) -> String {
        let rows: Vec<Value> = self
            .blocks
            .iter()
            .map(|b| {
                Value::Array(vec![
                    b.nodeid.into(),
                    b.nnodes.into(),
                    b.ppn.into(),
                    b.repeat.into(),
                ])
            })
            .collect();
        Value::Array(rows).to_string()
    }

    fn encode_raw(&self, deranged: bool) -> String {
        let max = self
            .blocks
            .iter()
            .map(|b| b.nodeid + b.nnodes)
            .max()
            .unwrap_or(0);
        (0..max)
            .map(|node| {
                let set = self.taskids(node);
                if deranged {
                    set.encode_unfolded()
                } else {
                    set.encode()
                }
            })
            .collect::<Vec<_>>()
            .join(";")
    }

    fn encode_pmi(&self) -> String {
        let mut parts = Vec::new();
        for b in &self.blocks {
            for _ in 0..b.repeat {
                parts.push(format!("({},{},{})", b.nodeid, b.nnodes, b.ppn));
            }
        }
        format!("(vector,{})", parts.join(","))
    }

    fn encode_multiline(&self) -> String {
        let total = self.total_ntasks();
        let mut out = String::new();
        for task in 0..total {
            let node = self.nodeid(task as u32).unwrap_or(0);
            out.push_str(&format!("{task}: {node}\n"));
        }
        out
    }

    /// Equivalence check: same task→node function.
    pub fn check(&self, other: &Taskmap) -> Result<(), TaskmapError> {
        let (a, b) = (self.total_ntasks(), other.total_ntasks());
        if a != b {
            return Err(TaskmapError::Check(format!("got ntasks={b}, expected {a}")));
        }
        let (a, b) = (self.nnodes(), other.nnodes());
        if a != b {
            return Err(TaskmapError::Check(format!("got nnodes={b}, expected {a}")));
        }
        for task in 0..self.total_ntasks() {
            let a = self.nodeid(task as u32)?;
            let b = other.nodeid(task as u32)?;
            if a != b {
                return Err(TaskmapError::Check(format!(
                    "task {task} is on node {b}, expected {a}"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Taskmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.encode(TaskmapEncoding::Json))
    }
}

fn parse_raw_range(range: &str) -> Result<(u32, u32), TaskmapError> {
    let err = || decode_err(format!("error parsing range '{range}'"));
    match range.split_once('-') {
        Some((a, b)) => {
            let lo = a.parse::<u32>().map_err(|_| err())?;
            let hi = b.parse::<u32>().map_err(|_| err())?;
            if lo > hi {
                return Err(err());
            }
            Ok((lo, hi))
        }
        None => {
            let v = range.parse::<u32>().map_err(|_| err())?;
            Ok((v, v))
        }
    }
}

#[cfg(test)]
#[path = "taskmap_tests.rs"]
mod tests;
