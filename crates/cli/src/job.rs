// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `flux job` plumbing subcommands.

use crate::client::{rpc, Client};
use anyhow::{anyhow, bail, Context, Result};
use clap::Subcommand;
use flux_core::eventlog::Event;
use flux_core::{Jobid, JobidForm, Taskmap, TaskmapEncoding};
use serde_json::{json, Map, Value};
use std::io::Read;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Subcommand)]
pub enum JobCmd {
    /// Submit a job from a jobspec file (or stdin)
    Submit {
        /// Jobspec JSON file; "-" or absent reads stdin
        jobspec: Option<PathBuf>,
        #[arg(long, default_value_t = 16)]
        urgency: i32,
        /// Resource set JSON file (defaults to one node, one core)
        #[arg(long)]
        resources: Option<PathBuf>,
    },
    /// Attach to a job: print its output, exit with its status
    Attach { id: String },
    /// Wait for job completion
    Wait {
        id: Option<String>,
        #[arg(long)]
        all: bool,
    },
    /// Raise a cancel exception on one or more jobs
    Cancel {
        ids: Vec<String>,
        #[arg(short, long, default_value = "")]
        message: String,
    },
    /// Send a signal to a running job
    Kill {
        id: String,
        #[arg(short, long, default_value = "15")]
        signal: String,
    },
    /// Decode or convert a taskmap
    Taskmap {
        taskmap: String,
        /// Output encoding: raw, deranged, pmi, multiline
        #[arg(long)]
        to: Option<String>,
        /// Print the nodeid of this taskid
        #[arg(long)]
        nodeid: Option<u32>,
        /// Print the taskids of this nodeid
        #[arg(long)]
        taskids: Option<u32>,
        /// Print the task count of this nodeid
        #[arg(long)]
        ntasks: Option<u32>,
    },
    /// Display job information from the KVS
    Info { id: String, keys: Vec<String> },
    /// Display a job eventlog
    Eventlog {
        id: String,
        #[arg(short, long, default_value = "eventlog")]
        path: String,
    },
    /// Wait for an event in a job eventlog
    WaitEvent {
        id: String,
        event: String,
        #[arg(short, long, default_value = "eventlog")]
        path: String,
        /// Seconds before giving up
        #[arg(short, long)]
        timeout: Option<f64>,
    },
    /// Print the most recently submitted jobid
    Last,
    /// Purge inactive jobs from the KVS
    Purge {
        ids: Vec<String>,
        #[arg(long)]
        all: bool,
    },
    /// Attach key=value annotations to a job
    Memo { id: String, entries: Vec<String> },
    /// Change a job's urgency
    Urgency { id: String, urgency: i32 },
    /// Convert jobids between representations
    Id {
        ids: Vec<String>,
        #[arg(long, default_value = "dec")]
        to: String,
    },
    /// Print the guest KVS namespace of one or more jobs
    Namespace { ids: Vec<String> },
    /// Print seconds remaining before job expiration
    Timeleft { id: String },
}

pub async fn run(cmd: JobCmd) -> Result<i32> {
    match cmd {
        JobCmd::Submit { jobspec, urgency, resources } => submit(jobspec, urgency, resources).await,
        JobCmd::Attach { id } => attach(&id).await,
        JobCmd::Wait { id, all } => wait(id.as_deref(), all).await,
        JobCmd::Cancel { ids, message } => cancel(&ids, &message).await,
        JobCmd::Kill { id, signal } => kill(&id, &signal).await,
        JobCmd::Taskmap { taskmap, to, nodeid, taskids, ntasks } => {
            taskmap_cmd(&taskmap, to.as_deref(), nodeid, taskids, ntasks)
        }
        JobCmd::Info { id, keys } => info(&id, &keys).await,
        JobCmd::Eventlog { id, path } => eventlog(&id, &path).await,
        JobCmd::WaitEvent { id, event, path, timeout } => {
            wait_event(&id, &event, &path, timeout).await
        }
        JobCmd::Last => last().await,
        JobCmd::Purge { ids, all } => purge(&ids, all).await,
        JobCmd::Memo { id, entries } => memo(&id, &entries).await,
        JobCmd::Urgency { id, urgency } => urgency_cmd(&id, urgency).await,
        JobCmd::Id { ids, to } => id_cmd(&ids, &to),
        JobCmd::Namespace { ids } => namespace(&ids),
        JobCmd::Timeleft { id } => timeleft(&id).await,
    }
}

fn parse_jobid(s: &str) -> Result<Jobid> {
    Jobid::parse(s).map_err(|e| anyhow!("{e}"))
}

fn read_json(path: Option<&PathBuf>) -> Result<Value> {
    let text = match path {
        Some(p) if p.as_os_str() != "-" => std::fs::read_to_string(p)
            .with_context(|| format!("cannot read {}", p.display()))?,
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };
    serde_json::from_str(&text).context("input is not valid JSON")
}

/// FLUID for a new job: wall-clock milliseconds in the upper 40 bits.
fn generate_jobid() -> Jobid {
    let ms = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0);
    Jobid((ms & 0xff_ffff_ffff) << 24)
}

async fn submit(jobspec: Option<PathBuf>, urgency: i32, resources: Option<PathBuf>) -> Result<i32> {
    let jobspec = read_json(jobspec.as_ref())?;
    let resources = match resources {
        Some(p) => read_json(Some(&p))?,
        None => json!({
            "version": 1,
            "execution": {"R_lite": [{"rank": "0", "children": {"core": "0"}}]},
        }),
    };
    let id = generate_jobid();
    let userid = nix::unistd::geteuid().as_raw();
    let t_submit = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    rpc(
        "job-manager.submit",
        json!({"jobs": [{
            "id": id.0,
            "userid": userid,
            "urgency": urgency,
            "t_submit": t_submit,
            "jobspec": jobspec,
            "R": resources,
        }]}),
    )
    .await?;
    println!("{id}");
    Ok(0)
}

/// Follow the primary eventlog to completion, returning the finish
/// status (`None` when the job ended without running).
async fn follow_to_clean(id: Jobid) -> Result<Option<i32>> {
    let mut watch = Client::request(
        "job-info.eventlog-watch",
        json!({"id": id.0, "path": "eventlog", "flags": 1}),
        true,
    )
    .await?;
    let mut status = None;
    while let Some(reply) = watch.next().await? {
        let line = reply.get("event").and_then(Value::as_str).unwrap_or("");
        let Ok(event) = Event::decode(line) else {
            continue;
        };
        if event.name == "finish" {
            status = event.context_i64("status").map(|s| s as i32);
        }
    }
    Ok(status)
}

fn status_to_exit_code(status: Option<i32>) -> i32 {
    match status {
        None => 1,
        Some(s) => {
            if let Some(code) = (s & 0x7f == 0).then(|| (s >> 8) & 0xff) {
                code
            } else {
                128 + (s & 0x7f)
            }
        }
    }
}

async fn attach(id: &str) -> Result<i32> {
    let id = parse_jobid(id)?;

    // print output as it lands, while following the primary eventlog
    let output_id = id;
    let printer = tokio::spawn(async move {
        let Ok(mut watch) = Client::request(
            "job-info.eventlog-watch",
            json!({"id": output_id.0, "path": "guest.output", "flags": 1}),
            true,
        )
        .await
        else {
            return;
        };
        while let Ok(Some(reply)) = watch.next().await {
            let line = reply.get("event").and_then(Value::as_str).unwrap_or("");
            let Ok(event) = Event::decode(line) else { continue };
            if event.name != "data" {
                continue;
            }
            let Some(context) = &event.context else { continue };
            let Ok(io) = flux_core::ioencode::iodecode(context) else { continue };
            if let Some(data) = io.data {
                use std::io::Write;
                if io.stream == "stderr" {
                    let _ = std::io::stderr().write_all(&data);
                } else {
                    let _ = std::io::stdout().write_all(&data);
                }
            }
        }
    });

    let status = follow_to_clean(id).await?;
    printer.abort();
    Ok(status_to_exit_code(status))
}

async fn wait(id: Option<&str>, all: bool) -> Result<i32> {
    let ids: Vec<Jobid> = match (id, all) {
        (Some(id), false) => vec![parse_jobid(id)?],
        (None, true) => {
            let reply = rpc("job-manager.list", json!({})).await?;
            reply
                .get("jobs")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(Value::as_u64).map(Jobid).collect())
                .unwrap_or_default()
        }
        // nothing to wait for behaves like wait(2) with no children
        _ => return Ok(2),
    };
    if ids.is_empty() {
        return Ok(2);
    }
    let mut rc = 0;
    for id in ids {
        let status = follow_to_clean(id).await?;
        rc = rc.max(status_to_exit_code(status));
    }
    Ok(rc)
}

async fn cancel(ids: &[String], message: &str) -> Result<i32> {
    let mut errors = 0;
    for id in ids {
        let id = parse_jobid(id)?;
        let result = rpc(
            "job-manager.raise",
            json!({"id": id.0, "type": "cancel", "severity": 0, "note": message}),
        )
        .await;
        if let Err(e) = result {
            eprintln!("{id}: {e}");
            errors += 1;
        }
    }
    Ok(if errors > 0 { 1 } else { 0 })
}

async fn kill(id: &str, signal: &str) -> Result<i32> {
    let id = parse_jobid(id)?;
    let signum = parse_signal(signal)?;
    rpc(
        "rexec.kill",
        json!({"label": format!("job-{}", id.0), "signum": signum}),
    )
    .await?;
    Ok(0)
}

fn parse_signal(s: &str) -> Result<i32> {
    if let Ok(n) = s.parse::<i32>() {
        return Ok(n);
    }
    let name = s.strip_prefix("SIG").unwrap_or(s);
    let signum = match name {
        "HUP" => 1,
        "INT" => 2,
        "QUIT" => 3,
        "KILL" => 9,
        "USR1" => 10,
        "USR2" => 12,
        "TERM" => 15,
        "CONT" => 18,
        "STOP" => 19,
        _ => bail!("unknown signal {s:?}"),
    };
    Ok(signum)
}

fn taskmap_cmd(
    input: &str,
    to: Option<&str>,
    nodeid: Option<u32>,
    taskids: Option<u32>,
    ntasks: Option<u32>,
) -> Result<i32> {
    let map = Taskmap::decode(input).map_err(|e| anyhow!("{e}"))?;
    if let Some(task) = nodeid {
        println!("{}", map.nodeid(task).map_err(|e| anyhow!("{e}"))?);
        return Ok(0);
    }
    if let Some(node) = taskids {
        println!("{}", map.taskids(node).encode());
        return Ok(0);
    }
    if let Some(node) = ntasks {
        println!("{}", map.ntasks(node));
        return Ok(0);
    }
    let encoding = match to {
        None => TaskmapEncoding::Json,
        Some("raw") => TaskmapEncoding::Raw,
        Some("deranged") => TaskmapEncoding::RawDeranged,
        Some("pmi") => TaskmapEncoding::Pmi,
        Some("multiline") => TaskmapEncoding::Multiline,
        Some(other) => bail!("unknown encoding {other:?}"),
    };
    let out = map.encode(encoding);
    if encoding == TaskmapEncoding::Multiline {
        print!("{out}");
    } else {
        println!("{out}");
    }
    Ok(0)
}

async fn info(id: &str, keys: &[String]) -> Result<i32> {
    let id = parse_jobid(id)?;
    let keys = if keys.is_empty() {
        vec!["jobspec".to_string(), "R".to_string()]
    } else {
        keys.to_vec()
    };
    let reply = rpc(
        "job-info.lookup",
        json!({"id": id.0, "keys": keys, "flags": 0}),
    )
    .await?;
    for key in &keys {
        match reply.get(key) {
            Some(Value::String(s)) => println!("{s}"),
            Some(v) => println!("{v}"),
            None => {}
        }
    }
    Ok(0)
}

async fn eventlog(id: &str, path: &str) -> Result<i32> {
    let id = parse_jobid(id)?;
    let reply = rpc(
        "job-info.lookup",
        json!({"id": id.0, "keys": [path], "flags": 0}),
    )
    .await?;
    let log = reply.get(path).and_then(Value::as_str).unwrap_or("");
    print!("{log}");
    Ok(0)
}

async fn wait_event(id: &str, name: &str, path: &str, timeout: Option<f64>) -> Result<i32> {
    let id = parse_jobid(id)?;
    let wait = async {
        let mut watch = Client::request(
            "job-info.eventlog-watch",
            json!({"id": id.0, "path": path, "flags": 1}),
            true,
        )
        .await?;
        while let Some(reply) = watch.next().await? {
            let line = reply.get("event").and_then(Value::as_str).unwrap_or("");
            if let Ok(event) = Event::decode(line) {
                if event.name == name {
                    print!("{line}");
                    return Ok::<i32, anyhow::Error>(0);
                }
            }
        }
        eprintln!("flux-job: wait-event: event {name:?} never occurred");
        Ok(1)
    };
    match timeout {
        None => wait.await,
        Some(sec) => match tokio::time::timeout(Duration::from_secs_f64(sec), wait).await {
            Ok(result) => result,
            Err(_) => {
                eprintln!("flux-job: wait-event: timed out");
                Ok(1)
            }
        },
    }
}

async fn last() -> Result<i32> {
    let reply = rpc("job-manager.list", json!({})).await?;
    let last = reply
        .get("jobs")
        .and_then(Value::as_array)
        .and_then(|a| a.last())
        .and_then(Value::as_u64);
    match last {
        Some(id) => {
            println!("{}", Jobid(id));
            Ok(0)
        }
        None => {
            eprintln!("flux-job: no jobs");
            Ok(1)
        }
    }
}

async fn purge(ids: &[String], all: bool) -> Result<i32> {
    let ids: Vec<u64> = ids
        .iter()
        .map(|s| parse_jobid(s).map(|id| id.0))
        .collect::<Result<_>>()?;
    let reply = rpc("job-manager.purge", json!({"ids": ids, "all": all})).await?;
    let count = reply.get("count").and_then(Value::as_u64).unwrap_or(0);
    println!("purged {count} inactive jobs");
    Ok(0)
}

async fn memo(id: &str, entries: &[String]) -> Result<i32> {
    let id = parse_jobid(id)?;
    let mut memo = Map::new();
    for entry in entries {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| anyhow!("memo entries take the form key=value"))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| json!(value));
        memo.insert(key.to_string(), value);
    }
    rpc("job-manager.memo", json!({"id": id.0, "memo": memo})).await?;
    Ok(0)
}

async fn urgency_cmd(id: &str, urgency: i32) -> Result<i32> {
    let id = parse_jobid(id)?;
    let reply = rpc("job-manager.urgency", json!({"id": id.0, "urgency": urgency})).await?;
    if let Some(old) = reply.get("old_urgency").and_then(Value::as_i64) {
        println!("{old}");
    }
    Ok(0)
}

fn id_cmd(ids: &[String], to: &str) -> Result<i32> {
    let form: JobidForm = to.parse().map_err(|e| anyhow!("{e}"))?;
    let mut inputs = ids.to_vec();
    if inputs.is_empty() {
        let mut buf = String::new();
        std::io::stdin().read_to_string(&mut buf)?;
        inputs = buf.split_whitespace().map(str::to_string).collect();
    }
    for input in inputs {
        let id = parse_jobid(&input)?;
        println!("{}", id.encode(form));
    }
    Ok(0)
}

fn namespace(ids: &[String]) -> Result<i32> {
    for id in ids {
        let id = parse_jobid(id)?;
        println!("{}", id.guest_namespace());
    }
    Ok(0)
}

async fn timeleft(id: &str) -> Result<i32> {
    let id = parse_jobid(id)?;
    let reply = rpc("job-info.lookup", json!({"id": id.0, "keys": ["R"], "flags": 2})).await?;
    let expiration = reply
        .pointer("/R/execution/expiration")
        .and_then(Value::as_f64)
        .unwrap_or(0.0);
    if expiration == 0.0 {
        println!("infinity");
        return Ok(0);
    }
    let now = flux_core::eventlog::timestamp_now();
    println!("{:.0}", (expiration - now).max(0.0));
    Ok(0)
}

#[cfg(test)]
#[path = "job_tests.rs"]
mod tests;
