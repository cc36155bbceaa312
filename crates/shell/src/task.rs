// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-task command construction and exit-code mapping.

use crate::info::ShellInfo;
use crate::mustache::{render, RenderContext, TaskTags};
use crate::plugstack::Plugstack;
use flux_core::JobidForm;
use flux_exec::{exit_code, term_signal, Cmd, SpawnError};
use flux_core::Errnum;

/// One task assigned to this shell.
#[derive(Debug, Clone, PartialEq)]
pub struct ShellTask {
    /// Global task rank.
    pub rank: u32,
    /// Local index on this shell.
    pub index: u32,
    pub cmd: Cmd,
}

impl ShellTask {
    /// Build the task command: argv pre-rendered through mustache, the
    /// common job environment populated. An argv element with a tag
    /// nobody renders rejects the whole command line with `Noent`.
    pub fn build(
        info: &ShellInfo,
        plugins: &mut Plugstack,
        broker_uri: &str,
        rank: u32,
        index: u32,
    ) -> Result<ShellTask, Errnum> {
        let node = info.rankinfo.to_json();
        let ctx = RenderContext {
            jobid: info.jobid,
            name: &info.name,
            nnodes: info.shell_size as usize,
            ntasks: info.total_ntasks,
            task: Some(TaskTags { rank, index }),
            node: &node,
        };
        let cmdline: Vec<String> = info
            .command
            .iter()
            .map(|arg| render(arg, &ctx, Some(plugins)))
            .collect::<Result<_, _>>()?;

        let mut cmd = Cmd::default();
        cmd.cmdline = cmdline;
        // tasks see their parent's environment plus the job variables
        for (k, v) in std::env::vars() {
            cmd.setenv(&k, &v);
        }
        cmd.unsetenv("NOTIFY_SOCKET");
        cmd.setenv("FLUX_URI", broker_uri);
        cmd.setenv("FLUX_JOB_ID", &info.jobid.encode(JobidForm::F58));
        cmd.setenv("FLUX_JOB_SIZE", &info.total_ntasks.to_string());
        cmd.setenv("FLUX_JOB_NNODES", &info.shell_size.to_string());
        cmd.setenv("FLUX_KVS_NAMESPACE", &info.jobid.guest_namespace());
        cmd.setenv("FLUX_TASK_RANK", &rank.to_string());
        cmd.setenv("FLUX_TASK_LOCAL_ID", &index.to_string());
        if let Ok(hostname) = nix::unistd::gethostname() {
            if let Some(hostname) = hostname.to_str() {
                cmd.setenv("HOSTNAME", hostname);
            }
        }
        Ok(ShellTask { rank, index, cmd })
    }
}

/// Shell exit code for one task's wait status: the exit code for a
/// normal exit, `128 + signo` for a signal death.
pub fn exit_code_from_status(status: i32) -> i32 {
    if let Some(code) = exit_code(status) {
        return code;
    }
    if let Some(sig) = term_signal(status) {
        return 128 + sig;
    }
    0
}

/// Shell exit code when exec itself failed: 127 for a missing command,
/// 126 for a permission problem, 1 otherwise.
pub fn exec_failure_exit_code(err: &SpawnError) -> i32 {
    match err.errnum() {
        Errnum::Noent => 127,
        Errnum::Perm => 126,
        _ => 1,
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
