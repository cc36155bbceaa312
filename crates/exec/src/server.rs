// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote subprocess execution service.
//!
//! RPC surface: `exec`, `write`, `kill`, `list`, `wait`, `disconnect`.
//! A streaming exec request is a foreground process: output and final
//! status stream back to the client, ending with `Nodata`. A
//! non-streaming request runs in the background: one `started{pid}`
//! response, output logged locally, and the request reference dropped.
//! A background process marked waitable stays in the list as a zombie
//! ("Z") after exit until its status is collected with `wait`.
//!
//! On client disconnect, that client's foreground processes get SIGKILL
//! and its pending waits are cancelled; background processes go on.

use crate::channel::OutputChunk;
use crate::cmd::Cmd;
use crate::local::{status_code, LocalProcess, ProcessState};
use crate::sigchld;
use flux_core::ioencode::ioencode;
use flux_core::Errnum;
use flux_wire::{Handle, Message, ServiceHandle};
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};
use tracing::{error, info, warn};

/// Exec request flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecFlags(pub u32);

impl ExecFlags {
    pub const STDOUT: u32 = 1;
    pub const STDERR: u32 = 2;
    pub const CHANNEL: u32 = 4;
    pub const WRITE_CREDIT: u32 = 8;
    pub const WAITABLE: u32 = 16;

    pub fn has(self, flag: u32) -> bool {
        self.0 & flag != 0
    }
}

type AuthCallback = Box<dyn Fn(&Message) -> Result<(), String> + Send + Sync>;

enum InputAction {
    Write { stream: String, data: Vec<u8> },
    Eof { stream: String },
}

struct ProcEntry {
    pid: i32,
    label: Option<String>,
    arg0: String,
    bg: bool,
    waitable: bool,
    waiter: Option<Message>,
    state: ProcessState,
    status: Option<i32>,
    /// Exec request; cleared for background processes once started.
    exec_msg: Option<Message>,
    /// Route of the originating client, kept for disconnect handling.
    sender: String,
    input_tx: mpsc::UnboundedSender<InputAction>,
}

impl ProcEntry {
    fn is_active(&self) -> bool {
        !matches!(self.state, ProcessState::Exited | ProcessState::Failed)
    }

    fn is_waitable(&self) -> bool {
        self.bg && self.waitable
    }
}

#[derive(Default)]
struct ServerInner {
    procs: HashMap<i32, ProcEntry>,
    labels: HashMap<String, i32>,
    shutting_down: bool,
    auth: Option<AuthCallback>,
}

/// Subprocess server bound to one service name.
pub struct SubprocessServer {
    handle: Handle,
    service: String,
    local_uri: String,
    rank: u32,
    inner: Arc<Mutex<ServerInner>>,
    empty: Arc<Notify>,
}

impl SubprocessServer {
    /// Register the service and start dispatching requests.
    pub fn start(
        handle: Handle,
        service: &str,
        local_uri: &str,
        rank: u32,
    ) -> Result<Arc<Self>, Errnum> {
        sigchld::initialize()?;
        let svc = handle.service(service);
        let server = Arc::new(SubprocessServer {
            handle,
            service: service.to_string(),
            local_uri: local_uri.to_string(),
            rank,
            inner: Arc::new(Mutex::new(ServerInner::default())),
            empty: Arc::new(Notify::new()),
        });
        let run = Arc::clone(&server);
        tokio::spawn(async move { run.run(svc).await });
        Ok(server)
    }

    /// Install an authorization callback consulted on every request.
    pub fn set_auth_cb(&self, cb: AuthCallback) {
        self.inner.lock().auth = Some(cb);
    }

    async fn run(self: Arc<Self>, mut svc: ServiceHandle) {
        while let Some(msg) = svc.recv().await {
            match msg.method(&self.service) {
                Some("exec") => Self::handle_exec(&self, msg),
                Some("write") => self.handle_write(&msg),
                Some("kill") => self.handle_kill(&msg),
                Some("list") => self.handle_list(&msg),
                Some("wait") => self.handle_wait(&msg),
                Some("disconnect") => self.handle_disconnect(&msg),
                _ => {
                    self.handle.respond_error(&msg, Errnum::Nosys, Some("unknown method"));
                }
            }
        }
    }

    fn check_auth(&self, msg: &Message) -> Result<(), String> {
        let inner = self.inner.lock();
        match &inner.auth {
            Some(cb) => cb(msg),
            None => Ok(()),
        }
    }

    fn handle_exec(server: &Arc<SubprocessServer>, msg: Message) {
        #[derive(serde::Deserialize)]
        struct ExecRequest {
            cmd: Cmd,
            flags: u32,
        }
        let req: ExecRequest = match msg.unpack() {
            Ok(r) => r,
            Err(e) => {
                server.handle.respond_error(&msg, e.errnum, e.text.as_deref());
                return;
            }
        };
        let flags = ExecFlags(req.flags);
        // Per protocol, a non-streaming exec request runs in background.
        let bg = !msg.streaming;

        if server.inner.lock().shutting_down {
            server.handle
                .respond_error(&msg, Errnum::Nosys, Some("subprocess server is shutting down"));
            return;
        }
        if let Err(text) = server.check_auth(&msg) {
            server.handle.respond_error(&msg, Errnum::Perm, Some(&text));
            return;
        }
        if flags.has(ExecFlags::WAITABLE) && !bg {
            server.handle
                .respond_error(&msg, Errnum::Inval, Some("waitable flag only supported in background mode"));
            return;
        }

        let mut cmd = req.cmd;
        if cmd.cmdline.is_empty() {
            server.handle.respond_error(&msg, Errnum::Proto, Some("command string is empty"));
            return;
        }
        if let Some(label) = &cmd.label {
            if server.inner.lock().labels.contains_key(label) {
                server.handle.respond_error(&msg, Errnum::Exist, Some("command label is not unique"));
                return;
            }
        }

        // An empty environment means the server's own, then the local
        // broker URI always wins and notify sockets never propagate.
        if cmd.env.is_empty() {
            cmd.env = std::env::vars().collect();
        }
        cmd.setenv("FLUX_URI", &server.local_uri);
        cmd.unsetenv("FLUX_PROXY_REMOTE");
        cmd.unsetenv("NOTIFY_SOCKET");
        if !flags.has(ExecFlags::CHANNEL) {
            cmd.channels.clear();
        }

        let proc = match LocalProcess::spawn(&cmd) {
            Ok(p) => p,
            Err(e) => {
                server.handle.respond_error(&msg, e.errnum(), Some(&e.to_string()));
                return;
            }
        };
        let pid = proc.pid;
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let entry = ProcEntry {
            pid,
            label: cmd.label.clone(),
            arg0: cmd.command_name().to_string(),
            bg,
            waitable: flags.has(ExecFlags::WAITABLE),
            waiter: None,
            state: ProcessState::Running,
            status: None,
            exec_msg: Some(msg.clone()),
            sender: msg.sender.clone(),
            input_tx,
        };
        {
            let mut inner = server.inner.lock();
            if let Some(label) = &cmd.label {
                inner.labels.insert(label.clone(), pid);
            }
            inner.procs.insert(pid, entry);
        }

        server.handle.respond(&msg, json!({"type": "started", "pid": pid}));
        if bg {
            // The request is no longer valid once started.
            if let Some(e) = server.inner.lock().procs.get_mut(&pid) {
                e.exec_msg = None;
            }
        }
        if !bg && flags.has(ExecFlags::WRITE_CREDIT) {
            server.handle.respond(
                &msg,
                json!({"type": "add-credit", "channels": {"stdin": crate::channel::DEFAULT_BUFSIZE}}),
            );
        }

        let server = Arc::clone(server);
        let request = if bg { None } else { Some(msg) };
        tokio::spawn(async move { server.drive(pid, flags, request, proc, input_rx).await });
    }

    /// Per-process driver: forwards output, applies writes, tracks
    /// status, and finishes the exec response stream.
    async fn drive(
        self: Arc<Self>,
        pid: i32,
        flags: ExecFlags,
        request: Option<Message>,
        proc: LocalProcess,
        mut input_rx: mpsc::UnboundedReceiver<InputAction>,
    ) {
        let LocalProcess { mut stdin, stdout, stderr, channels, mut status_rx, .. } = proc;

        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<(String, OutputChunk)>();
        let mut total_eofs = 0;
        for mut ch in [stdout, stderr].into_iter().chain(channels) {
            total_eofs += 1;
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

        let stream_enabled = |stream: &str| match stream {
            "stdout" => flags.has(ExecFlags::STDOUT),
            "stderr" => flags.has(ExecFlags::STDERR),
            _ => flags.has(ExecFlags::CHANNEL),
        };

        let mut exited = false;
        let mut eofs = 0;
        let mut input_open = true;
        while !(exited && eofs >= total_eofs) {
            tokio::select! {
                item = out_rx.recv(), if eofs < total_eofs => {
                    let Some((stream, chunk)) = item else {
                        eofs = total_eofs;
                        continue;
                    };
                    match chunk {
                        OutputChunk::Data(data) => {
                            self.emit_output(request.as_ref(), &stream, pid, Some(&data), stream_enabled(&stream));
                        }
                        OutputChunk::Eof => {
                            eofs += 1;
                            self.emit_output(request.as_ref(), &stream, pid, None, stream_enabled(&stream));
                        }
                        OutputChunk::ReadError(e) => {
                            error!(pid, stream, error = %e, "error reading from subprocess");
                        }
                    }
                }
                action = input_rx.recv(), if input_open => {
                    match action {
                        Some(InputAction::Write { stream, data }) => {
                            if stream == "stdin" {
                                match stdin.write(&data).await {
                                    Ok(n) => {
                                        if flags.has(ExecFlags::WRITE_CREDIT) {
                                            if let Some(req) = &request {
                                                self.handle.respond(req, json!({
                                                    "type": "add-credit",
                                                    "channels": {"stdin": n},
                                                }));
                                            }
                                        }
                                    }
                                    Err(e) => warn!(pid, error = %e, "error writing to subprocess stdin"),
                                }
                            }
                        }
                        Some(InputAction::Eof { stream }) => {
                            if stream == "stdin" {
                                stdin.close();
                            }
                        }
                        None => input_open = false,
                    }
                }
                status = status_rx.recv(), if !exited => {
                    let Some(status) = status else {
                        exited = true;
                        continue;
                    };
                    match status {
                        WaitStatus::Exited(..) | WaitStatus::Signaled(..) => {
                            exited = true;
                            let code = status_code(&status);
                            {
                                let mut inner = self.inner.lock();
                                if let Some(e) = inner.procs.get_mut(&pid) {
                                    e.state = ProcessState::Exited;
                                    e.status = Some(code);
                                }
                            }
                            sigchld::unregister(pid);
                            if let Some(req) = &request {
                                self.handle.respond(req, json!({"type": "finished", "status": code}));
                            }
                        }
                        WaitStatus::Stopped(..) => {
                            if let Some(e) = self.inner.lock().procs.get_mut(&pid) {
                                e.state = ProcessState::Stopped;
                            }
                            if let Some(req) = &request {
                                self.handle.respond(req, json!({"type": "stopped"}));
                            }
                        }
                        WaitStatus::Continued(..) => {
                            if let Some(e) = self.inner.lock().procs.get_mut(&pid) {
                                e.state = ProcessState::Running;
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        // Stream complete: terminal response for foreground clients.
        if let Some(req) = &request {
            self.handle.respond_error(req, Errnum::Nodata, None);
        } else {
            let (arg0, label, status) = {
                let inner = self.inner.lock();
                match inner.procs.get(&pid) {
                    Some(e) => (e.arg0.clone(), e.label.clone().unwrap_or_default(), e.status),
                    None => (String::new(), String::new(), None),
                }
            };
            match status.map(|s| (crate::local::exit_code(s), crate::local::term_signal(s))) {
                Some((Some(code), _)) => info!(pid, label, "{arg0}[{pid}]: Exit {code}"),
                Some((_, Some(sig))) => info!(pid, label, "{arg0}[{pid}]: Killed by signal {sig}"),
                _ => {}
            }
        }
        self.proc_delete(pid);
    }

    fn emit_output(
        &self,
        request: Option<&Message>,
        stream: &str,
        pid: i32,
        data: Option<&[u8]>,
        enabled: bool,
    ) {
        match request {
            Some(req) if enabled => {
                let rank = self.rank.to_string();
                let io = match data {
                    Some(d) => ioencode(stream, &rank, Some(d), false),
                    None => ioencode(stream, &rank, None, true),
                };
                match io {
                    Ok(io) => {
                        self.handle.respond(req, json!({"type": "output", "pid": pid, "io": io}));
                    }
                    Err(e) => error!(pid, stream, error = %e, "ioencode failed"),
                }
            }
            Some(_) => {}
            None => {
                // background: log output lines locally, ignore EOF
                if let Some(d) = data {
                    let text = String::from_utf8_lossy(d);
                    let text = text.trim_end_matches('\n');
                    let arg0 = self
                        .inner
                        .lock()
                        .procs
                        .get(&pid)
                        .map(|e| e.arg0.clone())
                        .unwrap_or_default();
                    if stream == "stderr" {
                        error!(pid, "{arg0}[{pid}]: {text}");
                    } else {
                        info!(pid, "{arg0}[{pid}]: {text}");
                    }
                }
            }
        }
    }

    /// Notify a parked waiter and drop the entry unless it must stay as
    /// a waitable zombie.
    fn proc_delete(&self, pid: i32) {
        let mut inner = self.inner.lock();
        let Some(entry) = inner.procs.get_mut(&pid) else {
            return;
        };
        if entry.is_waitable() && !entry.is_active() {
            if let Some(waiter) = entry.waiter.take() {
                let status = entry.status.unwrap_or(0);
                entry.waitable = false;
                self.handle.respond(&waiter, json!({"status": status}));
            }
        }
        let Some(entry) = inner.procs.get(&pid) else {
            return;
        };
        if entry.is_waitable() {
            return; // zombie awaits wait RPC
        }
        if let Some(label) = inner.procs.get(&pid).and_then(|e| e.label.clone()) {
            inner.labels.remove(&label);
        }
        inner.procs.remove(&pid);
        if inner.procs.is_empty() && inner.shutting_down {
            self.empty.notify_one();
        }
    }

    fn handle_write(&self, msg: &Message) {
        #[derive(serde::Deserialize)]
        struct WriteRequest {
            matchtag: u32,
            io: serde_json::Map<String, Value>,
        }
        let req: WriteRequest = match msg.unpack() {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "error decoding {}.write request", self.service);
                return;
            }
        };
        let io = match flux_core::ioencode::iodecode(&req.io) {
            Ok(io) => io,
            Err(e) => {
                warn!(error = %e, "error decoding {}.write io", self.service);
                return;
            }
        };
        if let Err(text) = self.check_auth(msg) {
            warn!("{}.write: {text}", self.service);
            return;
        }
        // Data for a process that is gone or already exited is silently
        // dropped; this is common when tasks exit with writes in flight.
        let inner = self.inner.lock();
        let Some(entry) = inner.procs.values().find(|e| {
            e.sender == msg.sender
                && e.exec_msg.as_ref().is_some_and(|m| m.matchtag == req.matchtag)
        }) else {
            return;
        };
        if !entry.is_active() {
            return;
        }
        if let Some(data) = io.data {
            let _ = entry
                .input_tx
                .send(InputAction::Write { stream: io.stream.clone(), data });
        }
        if io.eof {
            let _ = entry.input_tx.send(InputAction::Eof { stream: io.stream });
        }
    }

    fn find_proc(&self, pid: Option<i32>, label: Option<&str>) -> Result<i32, String> {
        let inner = self.inner.lock();
        if let Some(label) = label {
            inner
                .labels
                .get(label)
                .copied()
                .ok_or_else(|| format!("label {label} does not belong to any subprocess"))
        } else {
            let pid = pid.unwrap_or(-1);
            inner
                .procs
                .contains_key(&pid)
                .then_some(pid)
                .ok_or_else(|| format!("pid {pid} does not belong to any subprocess"))
        }
    }

    fn handle_kill(&self, msg: &Message) {
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
                self.handle.respond_error(msg, e.errnum, e.text.as_deref());
                return;
            }
        };
        if let Err(text) = self.check_auth(msg) {
            self.handle.respond_error(msg, Errnum::Perm, Some(&text));
            return;
        }
        let pid = match self.find_proc(req.pid, req.label.as_deref()) {
            Ok(pid) => pid,
            Err(text) => {
                self.handle.respond_error(msg, Errnum::Srch, Some(&text));
                return;
            }
        };
        // Signal 0 is the classic liveness probe: lookup only.
        if req.signum == 0 {
            self.handle.respond(msg, json!({}));
            return;
        }
        let signal = match Signal::try_from(req.signum) {
            Ok(s) => s,
            Err(_) => {
                self.handle.respond_error(msg, Errnum::Inval, Some("invalid signal"));
                return;
            }
        };
        match sigchld::kill(pid, signal) {
            Ok(()) => self.handle.respond(msg, json!({})),
            Err(e) => self.handle.respond_error(msg, e, Some("kill failed")),
        }
    }

    fn handle_list(&self, msg: &Message) {
        if let Err(text) = self.check_auth(msg) {
            self.handle.respond_error(msg, Errnum::Perm, Some(&text));
            return;
        }
        let inner = self.inner.lock();
        let procs: Vec<Value> = inner
            .procs
            .values()
            .map(|e| {
                json!({
                    "pid": e.pid,
                    "cmd": e.arg0,
                    "label": e.label.clone().unwrap_or_default(),
                    "state": e.state.list_char(),
                })
            })
            .collect();
        self.handle.respond(msg, json!({"rank": self.rank, "procs": procs}));
    }

    fn handle_wait(&self, msg: &Message) {
        #[derive(serde::Deserialize)]
        struct WaitRequest {
            #[serde(default)]
            pid: Option<i32>,
            #[serde(default)]
            label: Option<String>,
        }
        let req: WaitRequest = match msg.unpack() {
            Ok(r) => r,
            Err(e) => {
                self.handle.respond_error(msg, e.errnum, e.text.as_deref());
                return;
            }
        };
        let pid = match self.find_proc(req.pid, req.label.as_deref()) {
            Ok(pid) => pid,
            Err(text) => {
                self.handle.respond_error(msg, Errnum::Srch, Some(&text));
                return;
            }
        };
        {
            let mut inner = self.inner.lock();
            let Some(entry) = inner.procs.get_mut(&pid) else {
                self.handle.respond_error(msg, Errnum::Srch, None);
                return;
            };
            if !entry.is_waitable() {
                self.handle.respond_error(msg, Errnum::Inval, Some("process is not waitable"));
                return;
            }
            if entry.waiter.is_some() {
                self.handle
                    .respond_error(msg, Errnum::Inval, Some("process is already being waited on"));
                return;
            }
            entry.waiter = Some(msg.clone());
        }
        // If the process is already a zombie this responds immediately
        // and removes it; otherwise the waiter stays parked.
        self.proc_delete(pid);
    }

    fn handle_disconnect(&self, msg: &Message) {
        let to_kill: Vec<i32> = {
            let mut inner = self.inner.lock();
            for entry in inner.procs.values_mut() {
                if entry
                    .waiter
                    .as_ref()
                    .is_some_and(|w| w.sender == msg.sender)
                {
                    entry.waiter = None;
                }
            }
            inner
                .procs
                .values()
                .filter(|e| !e.bg && e.sender == msg.sender && e.is_active())
                .map(|e| e.pid)
                .collect()
        };
        for pid in to_kill {
            if let Err(e) = sigchld::kill(pid, Signal::SIGKILL) {
                warn!(pid, error = %e, "disconnect kill failed");
            }
        }
    }

    /// Begin shutdown: purge zombies, signal everything active, fail
    /// new exec requests, and resolve when the process list drains.
    pub async fn shutdown(&self, signal: Signal) {
        let active: Vec<i32> = {
            let mut inner = self.inner.lock();
            inner.shutting_down = true;
            let zombies: Vec<i32> = inner
                .procs
                .values()
                .filter(|e| !e.is_active())
                .map(|e| e.pid)
                .collect();
            for pid in zombies {
                if let Some(e) = inner.procs.get_mut(&pid) {
                    e.waitable = false;
                    e.waiter = None;
                }
                if let Some(label) = inner.procs.get(&pid).and_then(|e| e.label.clone()) {
                    inner.labels.remove(&label);
                }
                inner.procs.remove(&pid);
            }
            for entry in inner.procs.values_mut() {
                entry.waitable = false;
                entry.waiter = None;
            }
            inner.procs.values().map(|e| e.pid).collect()
        };
        for pid in &active {
            if let Err(e) = sigchld::kill(*pid, signal) {
                warn!(pid, error = %e, "shutdown kill failed");
            }
        }
        loop {
            if self.inner.lock().procs.is_empty() {
                return;
            }
            self.empty.notified().await;
        }
    }

    /// Number of live entries (including zombies).
    pub fn count(&self) -> usize {
        self.inner.lock().procs.len()
    }
}

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;
