// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shell info: everything a shell learns before building tasks.
//!
//! Derived from the job's two base documents. `R.execution.R_lite`
//! assigns cores/gpus per broker rank; the jobspec carries the command,
//! the task count and the shell options. The default taskmap is block
//! distribution; plugins may substitute an equivalent map later.

use flux_core::{jpath, Idset, Jobid, Taskmap};
use serde_json::{json, Value};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ShellInfoError {
    #[error("missing or malformed {0}")]
    Missing(&'static str),

    #[error("shell rank {0} is not in R")]
    RankNotInR(u32),

    #[error("invalid idset in R: {0}")]
    BadIdset(String),
}

/// Resources assigned to this shell's rank.
#[derive(Debug, Clone, PartialEq)]
pub struct RankInfo {
    pub id: u32,
    pub cores: String,
    pub gpus: String,
    pub ncores: usize,
}

impl RankInfo {
    /// The object `node.*` mustache tags index into.
    pub fn to_json(&self) -> Value {
        json!({
            "id": self.id,
            "resources": {
                "cores": self.cores,
                "gpus": self.gpus,
                "ncores": self.ncores,
            },
        })
    }
}

#[derive(Debug)]
pub struct ShellInfo {
    pub jobid: Jobid,
    /// This shell's rank, 0..shell_size.
    pub rank: u32,
    /// Number of shells (== nodes with tasks).
    pub shell_size: u32,
    pub total_ntasks: u64,
    pub taskmap: Taskmap,
    pub local_taskids: Idset,
    pub rankinfo: RankInfo,
    pub command: Vec<String>,
    pub name: String,
    pub jobspec: Value,
    pub resources: Value,
}

impl ShellInfo {
    pub fn from_documents(
        jobid: Jobid,
        rank: u32,
        jobspec: Value,
        resources: Value,
    ) -> Result<ShellInfo, ShellInfoError> {
        let r_lite = resources
            .pointer("/execution/R_lite")
            .and_then(Value::as_array)
            .ok_or(ShellInfoError::Missing("R.execution.R_lite"))?;

        let mut all_ranks = Idset::new();
        let mut rankinfo = None;
        for entry in r_lite {
            let ranks = entry
                .get("rank")
                .and_then(Value::as_str)
                .ok_or(ShellInfoError::Missing("R_lite rank"))?;
            let ranks =
                Idset::decode(ranks).map_err(|_| ShellInfoError::BadIdset(ranks.to_string()))?;
            let cores = entry
                .pointer("/children/core")
                .and_then(Value::as_str)
                .unwrap_or("");
            let gpus = entry
                .pointer("/children/gpu")
                .and_then(Value::as_str)
                .unwrap_or("");
            for r in ranks.iter() {
                all_ranks.insert(r);
            }
            if ranks.contains(rank) {
                let ncores = Idset::decode(cores)
                    .map(|s| s.count())
                    .map_err(|_| ShellInfoError::BadIdset(cores.to_string()))?;
                rankinfo = Some(RankInfo {
                    id: rank,
                    cores: cores.to_string(),
                    gpus: gpus.to_string(),
                    ncores,
                });
            }
        }
        let rankinfo = rankinfo.ok_or(ShellInfoError::RankNotInR(rank))?;
        let shell_size = all_ranks.count() as u32;

        let command: Vec<String> = jobspec
            .pointer("/tasks/0/command")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .filter(|v: &Vec<String>| !v.is_empty())
            .ok_or(ShellInfoError::Missing("tasks[0].command"))?;

        let total_ntasks = task_count(&jobspec, shell_size)?;
        let taskmap = block_taskmap(total_ntasks, shell_size);
        let local_taskids = taskmap.taskids(rank);

        let name = jobspec
            .pointer("/attributes/system/job/name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                command
                    .first()
                    .map(|c| c.rsplit('/').next().unwrap_or(c).to_string())
            })
            .unwrap_or_else(|| "unknown".to_string());

        Ok(ShellInfo {
            jobid,
            rank,
            shell_size,
            total_ntasks,
            taskmap,
            local_taskids,
            rankinfo,
            command,
            name,
            jobspec,
            resources,
        })
    }

    /// Shell option from `attributes.system.shell.options.<name>`.
    pub fn option(&self, name: &str) -> Option<&Value> {
        jpath::get(&self.jobspec, &format!("attributes.system.shell.options.{name}")).ok()
    }

    /// Replace the taskmap; only an equivalent map is accepted.
    pub fn set_taskmap(&mut self, map: Taskmap) -> Result<(), flux_core::TaskmapError> {
        self.taskmap.check(&map)?;
        self.local_taskids = map.taskids(self.rank);
        self.taskmap = map;
        Ok(())
    }

    pub fn is_leader(&self) -> bool {
        self.rank == 0
    }
}

fn task_count(jobspec: &Value, nnodes: u32) -> Result<u64, ShellInfoError> {
    let count = jobspec
        .pointer("/tasks/0/count")
        .ok_or(ShellInfoError::Missing("tasks[0].count"))?;
    if let Some(total) = count.get("total").and_then(Value::as_u64) {
        if total == 0 {
            return Err(ShellInfoError::Missing("tasks[0].count.total"));
        }
        return Ok(total);
    }
    if let Some(per_slot) = count.get("per_slot").and_then(Value::as_u64) {
        if per_slot == 0 {
            return Err(ShellInfoError::Missing("tasks[0].count.per_slot"));
        }
        return Ok(per_slot * nnodes as u64);
    }
    Err(ShellInfoError::Missing("tasks[0].count"))
}

/// Block distribution: ranks 0..(ntasks % n) take the extra task.
fn block_taskmap(ntasks: u64, nnodes: u32) -> Taskmap {
    let mut map = Taskmap::new();
    if nnodes == 0 {
        return map;
    }
    let base = ntasks / nnodes as u64;
    let extra = (ntasks % nnodes as u64) as u32;
    for node in 0..nnodes {
        let ppn = base + if node < extra { 1 } else { 0 };
        if ppn > 0 {
            map.append(node, 1, ppn as u32);
        }
    }
    map
}

#[cfg(test)]
#[path = "info_tests.rs"]
mod tests;
