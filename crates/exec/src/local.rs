// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local child processes with channel-backed stdio.
//!
//! A spawned child gets one socketpair per stdio stream plus one per
//! named extra channel (the channel's fd number travels to the child in
//! an environment variable of the same name). Reaping goes through the
//! process-wide [`crate::sigchld`] context; callers observe status
//! changes on [`LocalProcess::status_rx`].

use crate::channel::{InputChannel, OutputChannel, DEFAULT_BUFSIZE};
use crate::cmd::Cmd;
use crate::sigchld;
use flux_core::Errnum;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use std::os::fd::OwnedFd;
use std::os::unix::process::CommandExt;
use std::process::Command;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Starting,
    Running,
    Stopped,
    Exited,
    Failed,
}

impl ProcessState {
    /// List representation: running or zombie.
    pub fn list_char(self) -> &'static str {
        match self {
            ProcessState::Exited | ProcessState::Failed => "Z",
            _ => "R",
        }
    }
}

/// Pack a [`WaitStatus`] into the classic wait(2) integer the wire
/// carries in `finished{status}`.
pub fn status_code(status: &WaitStatus) -> i32 {
    match status {
        WaitStatus::Exited(_, code) => code << 8,
        WaitStatus::Signaled(_, sig, core) => (*sig as i32) | if *core { 0x80 } else { 0 },
        WaitStatus::Stopped(_, sig) => ((*sig as i32) << 8) | 0x7f,
        _ => 0,
    }
}

/// WEXITSTATUS for a status produced by [`status_code`].
pub fn exit_code(status: i32) -> Option<i32> {
    if status & 0x7f == 0 {
        Some((status >> 8) & 0xff)
    } else {
        None
    }
}

/// WTERMSIG for a status produced by [`status_code`].
pub fn term_signal(status: i32) -> Option<i32> {
    let sig = status & 0x7f;
    if sig != 0 && sig != 0x7f {
        Some(sig)
    } else {
        None
    }
}

#[derive(Debug)]
pub struct LocalProcess {
    pub pid: i32,
    pub stdin: InputChannel,
    pub stdout: OutputChannel,
    pub stderr: OutputChannel,
    /// Extra output channels, in the order the command declared them.
    pub channels: Vec<OutputChannel>,
    /// WaitStatus stream from the reaper; exit is terminal.
    pub status_rx: mpsc::UnboundedReceiver<WaitStatus>,
}

impl LocalProcess {
    /// Spawn `cmd` with channel-backed stdio. Callers must hold a
    /// [`sigchld::initialize`] reference for the life of the process.
    pub fn spawn(cmd: &Cmd) -> Result<LocalProcess, SpawnError> {
        if cmd.cmdline.is_empty() {
            return Err(SpawnError::EmptyCommand);
        }
        let mut stdin = InputChannel::new("stdin")?;
        let mut stdout =
            OutputChannel::new("stdout", cmd.line_buffered("stdout"), cmd.buffer_size("stdout", DEFAULT_BUFSIZE))?;
        let mut stderr =
            OutputChannel::new("stderr", cmd.line_buffered("stderr"), cmd.buffer_size("stderr", DEFAULT_BUFSIZE))?;

        let mut command = Command::new(&cmd.cmdline[0]);
        command.args(&cmd.cmdline[1..]);
        if let Some(cwd) = &cmd.cwd {
            command.current_dir(cwd);
        }
        if !cmd.env.is_empty() {
            command.env_clear();
            command.envs(&cmd.env);
        }
        // Children get their own process group so signals reach the
        // whole tree via killpg.
        command.process_group(0);

        let mut extra_fds: Vec<OwnedFd> = Vec::new();
        let mut channels = Vec::new();
        for name in &cmd.channels {
            let mut out = OutputChannel::new(
                name,
                cmd.line_buffered(name),
                cmd.buffer_size(name, DEFAULT_BUFSIZE),
            )?;
            if let Some(fd) = out.take_remote_fd()? {
                command.env(name, format!("{}", std::os::fd::AsRawFd::as_raw_fd(&fd)));
                extra_fds.push(fd);
            }
            channels.push(out);
        }

        command.stdin(stdin.take_stdio().ok_or(SpawnError::ChannelGone)?);
        command.stdout(stdout.take_stdio().ok_or(SpawnError::ChannelGone)?);
        command.stderr(stderr.take_stdio().ok_or(SpawnError::ChannelGone)?);

        let child = command.spawn()?;
        let pid = child.id() as i32;
        // The Child handle is dropped without wait(); the sigchld
        // context owns reaping.
        drop(child);
        // Close parent copies of inherited fds so EOF can propagate.
        drop(extra_fds);

        let (tx, status_rx) = mpsc::unbounded_channel();
        sigchld::register(
            pid,
            Arc::new(move |_pid, status| {
                let _ = tx.send(status);
            }),
        )
        .map_err(SpawnError::Sigchld)?;

        Ok(LocalProcess { pid, stdin, stdout, stderr, channels, status_rx })
    }

    pub fn kill(&self, signal: Signal) -> Result<(), Errnum> {
        sigchld::kill(self.pid, signal)
    }

    /// Wait for the terminal status (ignoring stop/continue), then drop
    /// the pid's reaper registration.
    pub async fn wait_exited(&mut self) -> Option<WaitStatus> {
        while let Some(status) = self.status_rx.recv().await {
            match status {
                WaitStatus::Exited(..) | WaitStatus::Signaled(..) => {
                    sigchld::unregister(self.pid);
                    return Some(status);
                }
                _ => continue,
            }
        }
        None
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SpawnError {
    #[error("command string is empty")]
    EmptyCommand,

    #[error("channel already consumed")]
    ChannelGone,

    #[error("sigchld context unavailable: {0}")]
    Sigchld(Errnum),

    #[error("error launching process: {0}")]
    Io(#[from] std::io::Error),
}

impl SpawnError {
    pub fn errnum(&self) -> Errnum {
        match self {
            SpawnError::EmptyCommand => Errnum::Proto,
            SpawnError::ChannelGone | SpawnError::Sigchld(_) => Errnum::Inval,
            SpawnError::Io(e) => match e.kind() {
                std::io::ErrorKind::NotFound => Errnum::Noent,
                std::io::ErrorKind::PermissionDenied => Errnum::Perm,
                _ => Errnum::Inval,
            },
        }
    }
}

#[cfg(test)]
#[path = "local_tests.rs"]
mod tests;
