// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide SIGCHLD reaper.
//!
//! Exactly one place in the process may call `waitpid`; this is it. The
//! context is refcounted: the first `initialize` installs the signal
//! listener, matching `finalize` calls tear it down when the count hits
//! zero. The handler drains `waitpid(-1, WNOHANG|WUNTRACED|WCONTINUED)`
//! and dispatches each reaped pid to its registered callback. A status
//! reaped before its pid is registered is held and replayed at
//! registration, so spawn/register ordering cannot lose an exit.

use flux_core::Errnum;
use nix::sys::signal::Signal;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::debug;

pub type SigchldCallback = Arc<dyn Fn(Pid, WaitStatus) + Send + Sync>;

struct SigchldCtx {
    refcount: usize,
    procs: HashMap<i32, SigchldCallback>,
    /// Statuses reaped before registration, replayed on register.
    unclaimed: HashMap<i32, Vec<WaitStatus>>,
    listener: JoinHandle<()>,
}

static CTX: Mutex<Option<SigchldCtx>> = Mutex::new(None);

/// Install (or retain) the SIGCHLD listener.
pub fn initialize() -> Result<(), Errnum> {
    let mut guard = CTX.lock();
    if let Some(ctx) = guard.as_mut() {
        ctx.refcount += 1;
        return Ok(());
    }
    let mut signal = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::child())
        .map_err(|_| Errnum::Nosys)?;
    let listener = tokio::spawn(async move {
        loop {
            if signal.recv().await.is_none() {
                return;
            }
            drain();
        }
    });
    *guard = Some(SigchldCtx {
        refcount: 1,
        procs: HashMap::new(),
        unclaimed: HashMap::new(),
        listener,
    });
    Ok(())
}

/// Drop one reference; the last one tears the listener down.
pub fn finalize() {
    let mut guard = CTX.lock();
    if let Some(ctx) = guard.as_mut() {
        ctx.refcount -= 1;
        if ctx.refcount == 0 {
            if let Some(ctx) = guard.take() {
                ctx.listener.abort();
            }
        }
    }
}

/// Track a pid. The callback runs for every status change (exit, stop,
/// continue) until `unregister`. Requires an initialized context.
pub fn register(pid: i32, cb: SigchldCallback) -> Result<(), Errnum> {
    if pid <= 0 {
        return Err(Errnum::Inval);
    }
    let replay = {
        let mut guard = CTX.lock();
        let ctx = guard.as_mut().ok_or(Errnum::Inval)?;
        ctx.procs.insert(pid, Arc::clone(&cb));
        ctx.unclaimed.remove(&pid)
    };
    // Exit won the race with registration: replay outside the lock.
    if let Some(statuses) = replay {
        for status in statuses {
            cb(Pid::from_raw(pid), status);
        }
    }
    Ok(())
}

pub fn unregister(pid: i32) {
    let mut guard = CTX.lock();
    if let Some(ctx) = guard.as_mut() {
        ctx.procs.remove(&pid);
        ctx.unclaimed.remove(&pid);
    }
}

/// Reap everything waitable right now and dispatch. Also called by the
/// listener on each SIGCHLD.
pub fn drain() {
    loop {
        let flags = WaitPidFlag::WNOHANG | WaitPidFlag::WUNTRACED | WaitPidFlag::WCONTINUED;
        match waitpid(Pid::from_raw(-1), Some(flags)) {
            Ok(WaitStatus::StillAlive) => return,
            Ok(status) => {
                let Some(pid) = status.pid() else {
                    return;
                };
                dispatch(pid, status);
            }
            Err(nix::errno::Errno::EINTR) => continue,
            Err(_) => return,
        }
    }
}

fn dispatch(pid: Pid, status: WaitStatus) {
    // Clone the callback out so it runs without the lock held; a
    // callback may re-enter register/unregister.
    let cb = {
        let mut guard = CTX.lock();
        let Some(ctx) = guard.as_mut() else {
            return;
        };
        match ctx.procs.get(&pid.as_raw()) {
            Some(cb) => Some(Arc::clone(cb)),
            None => {
                debug!(pid = pid.as_raw(), "reaped unregistered pid");
                ctx.unclaimed.entry(pid.as_raw()).or_default().push(status);
                None
            }
        }
    };
    if let Some(cb) = cb {
        cb(pid, status);
    }
}

/// Deliver a signal to a process group, falling back to the single pid
/// when no group exists.
pub fn kill(pid: i32, signal: Signal) -> Result<(), Errnum> {
    let pg = Pid::from_raw(pid);
    match nix::sys::signal::killpg(pg, signal) {
        Ok(()) => Ok(()),
        Err(nix::errno::Errno::ESRCH) => {
            nix::sys::signal::kill(pg, signal).map_err(|_| Errnum::Srch)
        }
        Err(nix::errno::Errno::EPERM) => Err(Errnum::Perm),
        Err(_) => Err(Errnum::Inval),
    }
}

#[cfg(test)]
#[path = "sigchld_tests.rs"]
mod tests;
