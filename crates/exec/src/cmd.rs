// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Command specification carried in exec requests.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

fn is_empty_map(m: &HashMap<String, String>) -> bool {
    m.is_empty()
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Cmd {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    pub cmdline: Vec<String>,

    /// Child environment. Empty means "inherit the server's".
    #[serde(default, skip_serializing_if = "is_empty_map")]
    pub env: HashMap<String, String>,

    /// Per-command options (buffering, sdexec stop timer, ...).
    #[serde(default, skip_serializing_if = "is_empty_map")]
    pub opts: HashMap<String, String>,

    /// Extra I/O channels beyond stdio, by name.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub channels: Vec<String>,

    /// Optional unique label for lookup by external references.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

impl Cmd {
    pub fn new(cmdline: &[&str]) -> Self {
        Cmd { cmdline: cmdline.iter().map(|s| s.to_string()).collect(), ..Default::default() }
    }

    pub fn arg0(&self) -> &str {
        self.cmdline.first().map(String::as_str).unwrap_or("")
    }

    /// Basename of argv[0], for log lines.
    pub fn command_name(&self) -> &str {
        self.arg0().rsplit('/').next().unwrap_or("")
    }

    pub fn setenv(&mut self, key: &str, value: &str) {
        self.env.insert(key.to_string(), value.to_string());
    }

    pub fn unsetenv(&mut self, key: &str) {
        self.env.remove(key);
    }

    /// Stream line-buffering option, default on.
    pub fn line_buffered(&self, stream: &str) -> bool {
        self.opts
            .get(&format!("{stream}_LINE_BUFFER"))
            .map(|v| v != "false")
            .unwrap_or(true)
    }

    /// Per-stream buffer size override, e.g. `stdout_BUFSIZE`.
    pub fn buffer_size(&self, stream: &str, default: usize) -> usize {
        self.opts
            .get(&format!("{stream}_BUFSIZE"))
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// Seconds before sdexec stop escalation; disabled by default.
    pub fn stop_timer_sec(&self) -> Option<f64> {
        self.opts.get("SDEXEC_STOP_TIMER_SEC").and_then(|v| v.parse().ok())
    }
}

#[cfg(test)]
#[path = "cmd_tests.rs"]
mod tests;
