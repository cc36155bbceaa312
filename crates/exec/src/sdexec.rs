// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Subprocess execution via systemd transient units.
//!
//! Same request surface as [`crate::server`], but each command becomes a
//! transient unit started over the `sdbus` call interface. Unit life is
//! tracked through `(ActiveState, SubState)` property updates:
//!
//! - `active.running`: first sight of `ExecMainPID` emits `started`
//! - `active.exited`: emit `finished{status}`, then `StopUnit(fail)` to
//!   drain stdio toward `inactive.dead`
//! - `deactivating.*`: arm the stop timer; `KillUnit(main, SIGKILL)`
//!   after T seconds and give up with `Deadlk` after 2T
//! - `failed.failed`: begin output so EOF can propagate, then
//!   `ResetFailedUnit`
//! - `inactive.dead`: terminal once stdout and stderr have hit EOF
//!
//! The stop timer is disabled unless the command opts in with
//! `SDEXEC_STOP_TIMER_SEC`.

use crate::channel::{InputChannel, OutputChannel, OutputChunk, DEFAULT_BUFSIZE};
use crate::cmd::Cmd;
use crate::local::ProcessState;
use async_trait::async_trait;
use flux_core::ioencode::{iodecode, ioencode};
use flux_core::Errnum;
use flux_wire::{Handle, Message, ServiceHandle};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::os::fd::OwnedFd;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

/// One `(ActiveState, SubState)` observation plus the main-pid fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitProperties {
    pub active_state: String,
    pub sub_state: String,
    pub exec_main_pid: Option<i32>,
    pub exec_main_status: Option<i32>,
    /// systemd `Result` property, carried into exec error text.
    pub result: Option<String>,
}

/// Stdio fds handed to the unit at start.
pub struct SdexecFds {
    pub stdin: OwnedFd,
    pub stdout: OwnedFd,
    pub stderr: OwnedFd,
}

/// The slice of the sd-bus call surface the server uses. The production
/// implementation forwards to the `sdbus` broker service; tests supply
/// a fake that simulates units.
#[async_trait]
pub trait SdBus: Send + Sync {
    async fn start_transient_unit(
        &self,
        name: &str,
        mode: &str,
        cmd: &Cmd,
        fds: SdexecFds,
    ) -> Result<(), String>;
    async fn stop_unit(&self, name: &str, mode: &str) -> Result<(), String>;
    async fn kill_unit(&self, name: &str, who: &str, signum: i32) -> Result<(), String>;
    async fn reset_failed_unit(&self, name: &str) -> Result<(), String>;
    /// Subscribe to PropertiesChanged for one unit.
    fn subscribe(&self, name: &str) -> mpsc::UnboundedReceiver<UnitProperties>;
}

enum InputAction {
    Write(Vec<u8>),
    Eof,
}

struct UnitEntry {
    unit: String,
    pid: Option<i32>,
    label: Option<String>,
    arg0: String,
    state: ProcessState,
    sender: String,
    exec_matchtag: u32,
    input_tx: mpsc::UnboundedSender<InputAction>,
}

#[derive(Default)]
struct SdexecInner {
    units: HashMap<String, UnitEntry>,
    next_seq: u64,
}

/// Transient-unit flavored subprocess server.
pub struct SdexecServer {
    handle: Handle,
    service: String,
    rank: u32,
    bus: Arc<dyn SdBus>,
    inner: Arc<Mutex<SdexecInner>>,
}

impl SdexecServer {
    pub fn start(handle: Handle, service: &str, rank: u32, bus: Arc<dyn SdBus>) -> Arc<Self> {
        let svc = handle.service(service);
        let server = Arc::new(SdexecServer {
            handle,
            service: service.to_string(),
            rank,
            bus,
            inner: Arc::new(Mutex::new(SdexecInner::default())),
        });
        let run = Arc::clone(&server);
        tokio::spawn(async move { run.run(svc).await });
        server
    }

    async fn run(self: Arc<Self>, mut svc: ServiceHandle) {
        while let Some(msg) = svc.recv().await {
            match msg.method(&self.service) {
                Some("exec") => Self::handle_exec(&self, msg),
                Some("write") => self.handle_write(&msg),
                Some("kill") => Self::handle_kill(&self, msg),
                Some("list") => self.handle_list(&msg),
                Some("disconnect") => {}
                _ => self.handle.respond_error(&msg, Errnum::Nosys, Some("unknown method")),
            }
        }
    }

    fn handle_exec(server: &Arc<SdexecServer>, msg: Message) {
        #[derive(serde::Deserialize)]
        struct ExecRequest {
            cmd: Cmd,
        }
        let req: ExecRequest = match msg.unpack() {
            Ok(r) => r,
            Err(e) => {
                server.handle.respond_error(&msg, e.errnum, e.text.as_deref());
                return;
            }
        };
        if req.cmd.cmdline.is_empty() {
            server.handle.respond_error(&msg, Errnum::Proto, Some("command string is empty"));
            return;
        }
        let unit = {
            let mut inner = server.inner.lock();
            inner.next_seq += 1;
            format!("{}-{}.service", server.service, inner.next_seq)
        };
        let server = Arc::clone(server);
        tokio::spawn(async move { server.drive(unit, req.cmd, msg).await });
    }

    async fn drive(self: Arc<Self>, unit: String, cmd: Cmd, msg: Message) {
        let mut props_rx = self.bus.subscribe(&unit);

        let channels = (|| -> std::io::Result<_> {
            let mut stdin = InputChannel::new("stdin")?;
            let mut stdout = OutputChannel::new(
                "stdout",
                cmd.line_buffered("stdout"),
                cmd.buffer_size("stdout", DEFAULT_BUFSIZE),
            )?;
            let mut stderr = OutputChannel::new(
                "stderr",
                cmd.line_buffered("stderr"),
                cmd.buffer_size("stderr", DEFAULT_BUFSIZE),
            )?;
            let fds = SdexecFds {
                stdin: stdin.take_remote_fd()?.ok_or(std::io::ErrorKind::BrokenPipe)?,
                stdout: stdout.take_remote_fd()?.ok_or(std::io::ErrorKind::BrokenPipe)?,
                stderr: stderr.take_remote_fd()?.ok_or(std::io::ErrorKind::BrokenPipe)?,
            };
            Ok((stdin, stdout, stderr, fds))
        })();
        let (mut stdin, stdout, stderr, fds) = match channels {
            Ok(c) => c,
            Err(e) => {
                self.handle.respond_error(&msg, Errnum::Inval, Some(&e.to_string()));
                return;
            }
        };

        let (input_tx, mut input_rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.inner.lock();
            inner.units.insert(
                unit.clone(),
                UnitEntry {
                    unit: unit.clone(),
                    pid: None,
                    label: cmd.label.clone(),
                    arg0: cmd.command_name().to_string(),
                    state: ProcessState::Starting,
                    sender: msg.sender.clone(),
                    exec_matchtag: msg.matchtag,
                    input_tx,
                },
            );
        }

        // Queue writes that race the start acknowledgment.
        let mut queued: Vec<InputAction> = Vec::new();

        // StartTransientUnit consumes the child fds; our copies are
        // gone once it returns, so stdio EOF can propagate.
        if let Err(e) = self.bus.start_transient_unit(&unit, "fail", &cmd, fds).await {
            self.handle.respond_error(&msg, Errnum::Noent, Some(&e));
            self.inner.lock().units.remove(&unit);
            return;
        }

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<(String, OutputChunk)>();
        for mut ch in [stdout, stderr] {
            let tx = out_tx.clone();
            let name = ch.name().to_string();
            tokio::spawn(async move {
                while let Some(chunk) = ch.recv().await {
                    if tx.send((name.clone(), chunk)).is_err() {
                        return;
                    }
                }
            });
        }
        drop(out_tx);

        let stop_timer_sec = cmd.stop_timer_sec();
        let mut stop_deadline: Option<tokio::time::Instant> = None;
        let mut killed = false;

        let mut started = false;
        let mut finished = false;
        let mut failed = false;
        let mut dead = false;
        let mut eofs = 0;
        let fg = msg.streaming;

        while !(dead && eofs >= 2) {
            let stop_sleep = async {
                match stop_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            };
            tokio::select! {
                props = props_rx.recv(), if !dead => {
                    let Some(props) = props else {
                        dead = true;
                        continue;
                    };
                    match (props.active_state.as_str(), props.sub_state.as_str()) {
                        ("active", "running") => {
                            if !started {
                                if let Some(pid) = props.exec_main_pid {
                                    started = true;
                                    self.set_unit_state(&unit, ProcessState::Running, Some(pid));
                                    if fg {
                                        self.handle.respond(&msg, json!({"type": "started", "pid": pid}));
                                    }
                                    // flush writes that raced the start
                                    for action in queued.drain(..) {
                                        apply_input(&mut stdin, action).await;
                                    }
                                }
                            }
                        }
                        ("active", "exited") => {
                            if !finished {
                                finished = true;
                                let status = props.exec_main_status.unwrap_or(0) << 8;
                                self.set_unit_state(&unit, ProcessState::Exited, None);
                                if fg {
                                    self.handle.respond(&msg, json!({"type": "finished", "status": status}));
                                }
                                // Drain stdio and move the unit to inactive.dead.
                                if let Err(e) = self.bus.stop_unit(&unit, "fail").await {
                                    warn!(unit, error = %e, "StopUnit failed");
                                }
                            }
                        }
                        ("deactivating", _) => {
                            if stop_deadline.is_none() {
                                if let Some(sec) = stop_timer_sec {
                                    stop_deadline = Some(
                                        tokio::time::Instant::now()
                                            + Duration::from_secs_f64(sec),
                                    );
                                }
                            }
                        }
                        ("failed", "failed") => {
                            failed = true;
                            self.set_unit_state(&unit, ProcessState::Failed, None);
                            if !started {
                                let text = format!(
                                    "unit failed: {}",
                                    props.result.as_deref().unwrap_or("unknown")
                                );
                                self.handle.respond_error(&msg, Errnum::Noent, Some(&text));
                            }
                            if let Err(e) = self.bus.reset_failed_unit(&unit).await {
                                warn!(unit, error = %e, "ResetFailedUnit failed");
                            }
                        }
                        ("inactive", "dead") => {
                            dead = true;
                            self.set_unit_state(&unit, ProcessState::Exited, None);
                        }
                        (active, sub) => {
                            debug!(unit, active, sub, "unit state ignored");
                        }
                    }
                }
                item = out_rx.recv(), if eofs < 2 => {
                    let Some((stream, chunk)) = item else {
                        eofs = 2;
                        continue;
                    };
                    match chunk {
                        OutputChunk::Data(data) => {
                            if fg && !failed {
                                self.emit_output(&msg, &stream, Some(&data));
                            }
                        }
                        OutputChunk::Eof => {
                            eofs += 1;
                            if fg {
                                self.emit_output(&msg, &stream, None);
                            }
                        }
                        OutputChunk::ReadError(e) => {
                            error!(unit, stream, error = %e, "unit output read error");
                        }
                    }
                }
                action = input_rx.recv() => {
                    if let Some(action) = action {
                        if started || finished {
                            apply_input(&mut stdin, action).await;
                        } else {
                            queued.push(action);
                        }
                    }
                }
                _ = stop_sleep => {
                    if !killed {
                        // first escalation: kill the main process
                        killed = true;
                        if let Err(e) = self.bus.kill_unit(&unit, "main", 9).await {
                            warn!(unit, error = %e, "KillUnit failed");
                        }
                        stop_deadline = stop_deadline
                            .map(|d| d + Duration::from_secs_f64(stop_timer_sec.unwrap_or(0.0)));
                    } else {
                        // second escalation: abandon the unit
                        if fg {
                            self.handle.respond_error(
                                &msg,
                                Errnum::Deadlk,
                                Some("giving up waiting for unit to stop"),
                            );
                        }
                        self.inner.lock().units.remove(&unit);
                        return;
                    }
                }
            }
        }

        if fg && (started || finished || !failed) {
            self.handle.respond_error(&msg, Errnum::Nodata, None);
        }
        self.inner.lock().units.remove(&unit);
    }

    fn set_unit_state(&self, unit: &str, state: ProcessState, pid: Option<i32>) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.units.get_mut(unit) {
            entry.state = state;
            if pid.is_some() {
                entry.pid = pid;
            }
        }
    }

    fn emit_output(&self, msg: &Message, stream: &str, data: Option<&[u8]>) {
        let rank = self.rank.to_string();
        let io = match data {
            Some(d) => ioencode(stream, &rank, Some(d), false),
            None => ioencode(stream, &rank, None, true),
        };
        match io {
            Ok(io) => self.handle.respond(msg, json!({"type": "output", "io": io})),
            Err(e) => error!(stream, error = %e, "ioencode failed"),
        }
    }

    fn handle_write(&self, msg: &Message) {
        #[derive(serde::Deserialize)]
        struct WriteRequest {
            matchtag: u32,
            io: serde_json::Map<String, Value>,
        }
        let Ok(req) = msg.unpack::<WriteRequest>() else {
            warn!("error decoding {}.write request", self.service);
            return;
        };
        let Ok(io) = iodecode(&req.io) else {
            warn!("error decoding {}.write io", self.service);
            return;
        };
        let inner = self.inner.lock();
        let Some(entry) = inner
            .units
            .values()
            .find(|e| e.sender == msg.sender && e.exec_matchtag == req.matchtag)
        else {
            return;
        };
        if let Some(data) = io.data {
            let _ = entry.input_tx.send(InputAction::Write(data));
        }
        if io.eof {
            let _ = entry.input_tx.send(InputAction::Eof);
        }
    }

    fn handle_kill(server: &Arc<SdexecServer>, msg: Message) {
        #[derive(serde::Deserialize)]
        struct KillRequest {
            #[serde(default)]
            pid: Option<i32>,
            #[serde(default)]
            label: Option<String>,
            signum: i32,
        }
        let req: KillRequest = match msg.unpack() {
            Ok(r) => r,
            Err(e) => {
                server.handle.respond_error(&msg, e.errnum, e.text.as_deref());
                return;
            }
        };
        let unit = {
            let inner = server.inner.lock();
            inner
                .units
                .values()
                .find(|e| {
                    req.label.as_deref().is_some_and(|l| e.label.as_deref() == Some(l))
                        || (req.pid.is_some() && e.pid == req.pid)
                })
                .map(|e| e.unit.clone())
        };
        let Some(unit) = unit else {
            server.handle.respond_error(&msg, Errnum::Srch, Some("no matching unit"));
            return;
        };
        let server = Arc::clone(server);
        tokio::spawn(async move {
            match server.bus.kill_unit(&unit, "main", req.signum).await {
                Ok(()) => server.handle.respond(&msg, json!({})),
                Err(e) => server.handle.respond_error(&msg, Errnum::Inval, Some(&e)),
            }
        });
    }

    fn handle_list(&self, msg: &Message) {
        let inner = self.inner.lock();
        let procs: Vec<Value> = inner
            .units
            .values()
            .map(|e| {
                json!({
                    "pid": e.pid.unwrap_or(0),
                    "cmd": e.arg0,
                    "label": e.label.clone().unwrap_or_default(),
                    "state": e.state.list_char(),
                })
            })
            .collect();
        self.handle.respond(msg, json!({"rank": self.rank, "procs": procs}));
    }

    /// Number of live units.
    pub fn count(&self) -> usize {
        self.inner.lock().units.len()
    }
}

async fn apply_input(stdin: &mut InputChannel, action: InputAction) {
    match action {
        InputAction::Write(data) => {
            if let Err(e) = stdin.write(&data).await {
                warn!(error = %e, "error writing to unit stdin");
            }
        }
        InputAction::Eof => stdin.close(),
    }
}

#[cfg(test)]
#[path = "sdexec_tests.rs"]
mod tests;
