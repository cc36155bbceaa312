// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The shell core: plugin hooks, barriers, exec events, task launch
//! and reaping.
//!
//! Hook order per run:
//! `shell.init` → barrier → `shell.init` event → `shell.post-init` →
//! taskmap remap chain → barrier → `shell.start` event → per task
//! (`task.init`, `task.exec`, spawn, `task.fork`, `task.exit`) →
//! `shell.exit`.
//!
//! The shell's exit code is the max over task codes, with signal deaths
//! mapped to `128 + signo` and exec failures to 126/127.

use crate::barrier::{barrier, BarrierError};
use crate::info::ShellInfo;
use crate::mustache;
use crate::plugstack::Plugstack;
use crate::task::{exec_failure_exit_code, exit_code_from_status, ShellTask};
use flux_core::ioencode::ioencode;
use flux_core::{Taskmap, TaskmapEncoding};
use flux_exec::{sigchld, status_code, LocalProcess, OutputChunk};
use flux_storage::{AppendFlags, EventLogger, EventLoggerOps, Kvs};
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, warn};

const EXEC_EVENTLOG: &str = "exec.eventlog";
const OUTPUT_LOG: &str = "output";

/// Batching window for exec eventlog appends.
const BATCH_TIMEOUT: Duration = Duration::from_millis(10);

#[derive(Debug, thiserror::Error)]
pub enum ShellError {
    #[error(transparent)]
    Barrier(#[from] BarrierError),

    #[error("plugin hook {0} failed with {1}")]
    Hook(String, i32),

    #[error("taskmap remap produced a non-equivalent map: {0}")]
    Remap(flux_core::TaskmapError),

    #[error("task {0} command cannot be rendered: {1}")]
    Render(u32, flux_core::Errnum),

    #[error("storage error: {0}")]
    Storage(#[from] flux_storage::KvsError),
}

pub struct Shell {
    pub info: ShellInfo,
    pub plugins: Plugstack,
    kvs: Kvs,
    logger: EventLogger,
    userid: u32,
    broker_uri: String,
}

impl Shell {
    /// Create a shell over the given store. The leader shell creates
    /// the job's guest namespace; every shell logs into it.
    pub fn new(info: ShellInfo, kvs: Kvs, userid: u32) -> Result<Shell, ShellError> {
        let ns = info.jobid.guest_namespace();
        if info.is_leader() && !kvs.namespace_exists(&ns) {
            kvs.namespace_create(&ns, userid)?;
        }
        let logger = EventLogger::new(kvs.clone(), BATCH_TIMEOUT, EventLoggerOps::default());
        logger.set_namespace(Some(&ns));
        let broker_uri =
            format!("local://{}", std::env::temp_dir().join("fluxd.sock").display());
        Ok(Shell { info, plugins: Plugstack::new(), kvs, logger, userid, broker_uri })
    }

    /// Point tasks' `FLUX_URI` at the local broker.
    pub fn set_broker_uri(&mut self, uri: &str) {
        self.broker_uri = uri.to_string();
    }

    pub fn kvs(&self) -> &Kvs {
        &self.kvs
    }

    /// Run the job on this node. `reader`/`writer` are the protocol
    /// fds toward the barrier peer; with `shell_size == 1` they are
    /// never touched.
    pub async fn run<R, W>(&mut self, reader: R, mut writer: W) -> Result<i32, ShellError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut reader = Some(reader);

        self.hook("shell.init")?;
        self.enter_barrier(&mut reader, &mut writer).await?;

        if self.info.is_leader() {
            let mut context = Map::new();
            context.insert("leader-rank".to_string(), json!(0));
            context.insert("size".to_string(), json!(self.info.shell_size));
            self.logger
                .append(AppendFlags::WAIT, EXEC_EVENTLOG, "shell.init", Some(context))
                .await?;
        }

        self.hook("shell.post-init")?;
        self.remap_taskmap()?;

        self.enter_barrier(&mut reader, &mut writer).await?;
        if self.info.is_leader() {
            let taskmap: Value = serde_json::from_str(
                &self.info.taskmap.encode(TaskmapEncoding::Json),
            )
            .unwrap_or(Value::Null);
            let mut context = Map::new();
            context.insert("taskmap".to_string(), json!({"map": taskmap}));
            self.logger
                .append(AppendFlags::WAIT, EXEC_EVENTLOG, "shell.start", Some(context))
                .await?;
        }

        let rc = self.run_tasks().await?;
        self.hook("shell.exit")?;
        self.logger.flush().await?;
        Ok(rc)
    }

    /// Re-establish state after a broker connection loss: replay the
    /// reconnect hooks and reconcile the eventlogs.
    pub async fn reconnect(&mut self) -> Result<(), ShellError> {
        self.hook("shell.reconnect")?;
        let n = self.logger.reconnect().await?;
        if n > 0 {
            debug!(reemitted = n, "eventlog entries re-emitted after reconnect");
        }
        Ok(())
    }

    fn hook(&mut self, topic: &str) -> Result<(), ShellError> {
        let mut args = Map::new();
        let rc = self.plugins.call(topic, &mut args);
        if rc != 0 {
            return Err(ShellError::Hook(topic.to_string(), rc));
        }
        Ok(())
    }

    async fn enter_barrier<R, W>(
        &self,
        reader: &mut Option<R>,
        writer: &mut W,
    ) -> Result<(), ShellError>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if self.info.shell_size <= 1 {
            return Ok(());
        }
        let r = reader.as_mut().ok_or(BarrierError::Eof)?;
        barrier(self.info.shell_size, r, writer).await?;
        Ok(())
    }

    /// Offer the taskmap to the remap chain. The scheme comes from the
    /// shell options; `block` (the default) is a no-op. Whatever a
    /// plugin returns must be equivalent to the original map.
    fn remap_taskmap(&mut self) -> Result<(), ShellError> {
        let scheme = self
            .info
            .option("taskmap")
            .and_then(Value::as_str)
            .unwrap_or("block")
            .to_string();
        if scheme == "block" {
            return Ok(());
        }
        let mut args = Map::new();
        args.insert(
            "taskmap".to_string(),
            json!(self.info.taskmap.encode(TaskmapEncoding::Json)),
        );
        let topic = format!("taskmap.{scheme}");
        match self.plugins.call_checked(&topic, &mut args) {
            Some(0) => {
                let encoded = args
                    .get("taskmap")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let map = Taskmap::decode(&encoded).map_err(ShellError::Remap)?;
                self.info.set_taskmap(map).map_err(ShellError::Remap)
            }
            Some(rc) => Err(ShellError::Hook(topic, rc)),
            None => {
                warn!(scheme, "no plugin handles taskmap scheme");
                Ok(())
            }
        }
    }

    async fn run_tasks(&mut self) -> Result<i32, ShellError> {
        // Render every command line first: a tag nobody renders rejects
        // the job before anything is launched or logged.
        let taskids: Vec<u32> = self.info.local_taskids.iter().collect();
        let mut tasks = Vec::new();
        for (index, &rank) in taskids.iter().enumerate() {
            let task =
                ShellTask::build(&self.info, &mut self.plugins, &self.broker_uri, rank, index as u32)
                    .map_err(|e| ShellError::Render(rank, e))?;
            tasks.push(task);
        }

        sigchld::initialize().map_err(|_| {
            ShellError::Storage(flux_storage::KvsError::Inval("no signal context".to_string()))
        })?;

        // output log header precedes any task data
        let mut header = Map::new();
        header.insert("version".to_string(), json!(1));
        header.insert("encoding".to_string(), json!({"stdout": "base64", "stderr": "base64"}));
        self.logger.append(AppendFlags::WAIT, OUTPUT_LOG, "header", Some(header)).await?;

        let mut running = Vec::new();
        let mut max_rc = 0;

        for task in tasks {
            let rank = task.rank;
            self.task_hook("task.init", rank)?;
            // stdio is wired up; last word before exec
            self.task_hook("task.exec", rank)?;
            match LocalProcess::spawn(&task.cmd) {
                Ok(proc) => {
                    debug!(rank, pid = proc.pid, "task started");
                    self.task_hook("task.fork", rank)?;
                    running.push((task, proc));
                }
                Err(e) => {
                    warn!(rank, error = %e, "task exec failed");
                    max_rc = max_rc.max(exec_failure_exit_code(&e));
                    self.task_hook("task.exit", rank)?;
                }
            }
        }

        for (task, mut proc) in running {
            let rc = self.supervise(&task, &mut proc).await?;
            max_rc = max_rc.max(rc);
            self.task_hook("task.exit", task.rank)?;
        }

        sigchld::finalize();
        Ok(max_rc)
    }

    /// Forward one task's output into the output eventlog and collect
    /// its exit status.
    async fn supervise(
        &mut self,
        task: &ShellTask,
        proc: &mut LocalProcess,
    ) -> Result<i32, ShellError> {
        let rank = task.rank.to_string();
        let mut stdout_open = true;
        let mut stderr_open = true;
        let mut status = None;
        while stdout_open || stderr_open || status.is_none() {
            tokio::select! {
                chunk = proc.stdout.recv(), if stdout_open => {
                    stdout_open = self.emit_data("stdout", &rank, chunk).await?;
                }
                chunk = proc.stderr.recv(), if stderr_open => {
                    stderr_open = self.emit_data("stderr", &rank, chunk).await?;
                }
                s = proc.status_rx.recv(), if status.is_none() => {
                    match s {
                        Some(s) if matches!(s, nix::sys::wait::WaitStatus::Exited(..)
                            | nix::sys::wait::WaitStatus::Signaled(..)) => {
                            sigchld::unregister(proc.pid);
                            status = Some(status_code(&s));
                        }
                        Some(_) => {}
                        None => status = Some(0),
                    }
                }
            }
        }
        Ok(exit_code_from_status(status.unwrap_or(0)))
    }

    async fn emit_data(
        &mut self,
        stream: &str,
        rank: &str,
        chunk: Option<OutputChunk>,
    ) -> Result<bool, ShellError> {
        let (data, eof) = match chunk {
            Some(OutputChunk::Data(data)) => (Some(data), false),
            Some(OutputChunk::ReadError(e)) => {
                warn!(stream, error = %e, "task read error");
                return Ok(true);
            }
            Some(OutputChunk::Eof) | None => (None, true),
        };
        let io = ioencode(stream, rank, data.as_deref(), eof)
            .map_err(|e| flux_storage::KvsError::Inval(e.to_string()))?;
        self.logger.append(AppendFlags::WAIT, OUTPUT_LOG, "data", Some(io)).await?;
        Ok(!eof)
    }

    fn task_hook(&mut self, topic: &str, rank: u32) -> Result<(), ShellError> {
        let mut args = Map::new();
        args.insert("rank".to_string(), json!(rank));
        let rc = self.plugins.call(topic, &mut args);
        if rc != 0 {
            return Err(ShellError::Hook(topic.to_string(), rc));
        }
        Ok(())
    }

    /// Register the shell's service endpoint on the message fabric:
    /// `shell-<jobid>.<method>` requests dispatch into the plugin stack
    /// as `shell.service.<method>` topics. Only the job owner and the
    /// instance owner get through; the registration is repeated on
    /// reconnect.
    pub fn serve(shell: &Arc<parking_lot::Mutex<Shell>>, handle: flux_wire::Handle) -> String {
        let (name, userid) = {
            let s = shell.lock();
            (format!("shell-{}", s.info.jobid.0), s.userid)
        };
        let mut svc = handle.service(&name);
        let service_name = name.clone();
        let shell = Arc::clone(shell);
        tokio::spawn(async move {
            while let Some(msg) = svc.recv().await {
                let Some(method) = msg.method(&name) else {
                    continue;
                };
                if method == "disconnect" {
                    continue;
                }
                if msg.cred.authorize(userid).is_err() {
                    handle.respond_error(&msg, flux_core::Errnum::Perm, None);
                    continue;
                }
                let mut args = match &msg.payload {
                    Value::Object(map) => map.clone(),
                    _ => Map::new(),
                };
                let rc = shell
                    .lock()
                    .plugins
                    .call_checked(&format!("shell.service.{method}"), &mut args);
                match rc {
                    Some(0) => handle.respond(&msg, Value::Object(args)),
                    Some(_) => handle.respond_error(&msg, flux_core::Errnum::Inval, None),
                    None => handle.respond_error(&msg, flux_core::Errnum::Noent, None),
                }
            }
        });
        service_name
    }

    /// Release the guest namespace: copy it under the job directory in
    /// the primary namespace and remove it. Leader only.
    pub async fn release_guest_namespace(&mut self) -> Result<(), ShellError> {
        if !self.info.is_leader() {
            return Ok(());
        }
        self.logger.flush().await?;
        let ns = self.info.jobid.guest_namespace();
        let dest = self.info.jobid.encode(flux_core::JobidForm::Kvs);
        self.kvs.namespace_copy_to_primary(&ns, &format!("{dest}.guest"))?;
        self.kvs.namespace_remove(&ns)?;
        Ok(())
    }

    /// Render a string in this shell's job context (no task tags).
    /// `Noent` when the template holds a tag nobody renders.
    pub fn render(&mut self, template: &str) -> Result<String, flux_core::Errnum> {
        let node = self.info.rankinfo.to_json();
        let ctx = mustache::RenderContext {
            jobid: self.info.jobid,
            name: &self.info.name,
            nnodes: self.info.shell_size as usize,
            ntasks: self.info.total_ntasks,
            task: None,
            node: &node,
        };
        mustache::render(template, &ctx, Some(&mut self.plugins))
    }

    pub fn userid(&self) -> u32 {
        self.userid
    }
}

#[cfg(test)]
#[path = "shell_tests.rs"]
mod tests;
