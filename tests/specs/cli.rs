// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI plumbing against a live daemon over the Unix socket.

use assert_cmd::cargo::CommandCargoExt;
use serial_test::serial;
use std::path::PathBuf;
use std::process::{Child, Command};
use std::time::Duration;

struct Daemon {
    child: Child,
    socket: PathBuf,
    _dir: tempfile::TempDir,
}

impl Daemon {
    fn start() -> Daemon {
        let dir = tempfile::tempdir().expect("tempdir");
        let socket = dir.path().join("fluxd.sock");
        let child = Command::cargo_bin("fluxd")
            .expect("fluxd binary")
            .arg(&socket)
            .spawn()
            .expect("spawn fluxd");
        // wait for the socket to appear
        for _ in 0..100 {
            if socket.exists() {
                return Daemon { child, socket, _dir: dir };
            }
            std::thread::sleep(Duration::from_millis(50));
        }
        panic!("fluxd never bound its socket");
    }

    fn flux(&self) -> Command {
        let mut cmd = Command::cargo_bin("flux").expect("flux binary");
        cmd.env("FLUX_SOCKET", &self.socket);
        cmd
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn stdout_of(output: std::process::Output) -> String {
    assert!(
        output.status.success(),
        "command failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn job_id_converts_offline() {
    let out = Command::cargo_bin("flux")
        .expect("flux binary")
        .args(["job", "id", "--to", "dothex", "0x1234000000000000"])
        .output()
        .expect("run flux");
    assert_eq!(stdout_of(out).trim(), "1234.0000.0000.0000");
}

#[test]
fn job_taskmap_converts_offline() {
    let out = Command::cargo_bin("flux")
        .expect("flux binary")
        .args(["job", "taskmap", "--to", "raw", "[[0,4,4,1]]"])
        .output()
        .expect("run flux");
    assert_eq!(stdout_of(out).trim(), "0-3;4-7;8-11;12-15");

    let out = Command::cargo_bin("flux")
        .expect("flux binary")
        .args(["job", "taskmap", "--nodeid", "5", "[[0,4,4,1]]"])
        .output()
        .expect("run flux");
    assert_eq!(stdout_of(out).trim(), "1");
}

#[test]
fn job_namespace_is_offline() {
    let out = Command::cargo_bin("flux")
        .expect("flux binary")
        .args(["job", "namespace", "42"])
        .output()
        .expect("run flux");
    assert_eq!(stdout_of(out).trim(), "job-42-guest");
}

#[test]
fn config_get_reads_dotted_paths() {
    let dir = tempfile::tempdir().expect("tempdir");
    let conf = dir.path().join("config.json");
    std::fs::write(&conf, r#"{"exec": {"service": "rexec"}}"#).expect("write config");

    let out = Command::cargo_bin("flux")
        .expect("flux binary")
        .args(["config", "get", "exec.service"])
        .env("FLUX_CONF", &conf)
        .output()
        .expect("run flux");
    assert_eq!(stdout_of(out).trim(), "rexec");
}

#[test]
#[serial]
fn submit_eventlog_and_purge_roundtrip() {
    let daemon = Daemon::start();

    let dir = tempfile::tempdir().expect("tempdir");
    let spec = dir.path().join("jobspec.json");
    std::fs::write(
        &spec,
        r#"{"tasks": [{"command": ["true"], "count": {"total": 1}}], "attributes": {"system": {}}}"#,
    )
    .expect("write jobspec");

    let out = daemon
        .flux()
        .args(["job", "submit"])
        .arg(&spec)
        .output()
        .expect("run submit");
    let jobid = stdout_of(out).trim().to_string();
    assert!(jobid.starts_with('\u{0192}'));

    // the eventlog holds the submit event
    let out = daemon
        .flux()
        .args(["job", "eventlog", &jobid])
        .output()
        .expect("run eventlog");
    let log = stdout_of(out);
    assert!(log.contains("\"name\":\"submit\""), "log was: {log}");

    // last echoes the same id
    let out = daemon.flux().args(["job", "last"]).output().expect("run last");
    assert_eq!(stdout_of(out).trim(), jobid);

    // memo lands in the eventlog
    let out = daemon
        .flux()
        .args(["job", "memo", &jobid, "note=hello"])
        .output()
        .expect("run memo");
    stdout_of(out);
    let out = daemon
        .flux()
        .args(["job", "eventlog", &jobid])
        .output()
        .expect("run eventlog");
    assert!(stdout_of(out).contains("\"name\":\"memo\""));

    // wait-event sees an already-posted event and exits 0
    let out = daemon
        .flux()
        .args(["job", "wait-event", "--timeout", "5", &jobid, "submit"])
        .output()
        .expect("run wait-event");
    assert!(stdout_of(out).contains("\"name\":\"submit\""));

    // purge skips the still-active job
    let out = daemon
        .flux()
        .args(["job", "purge", "--all"])
        .output()
        .expect("run purge");
    assert!(stdout_of(out).contains("purged 0"));
}

#[test]
#[serial]
fn wait_event_times_out_on_missing_event() {
    let daemon = Daemon::start();
    let dir = tempfile::tempdir().expect("tempdir");
    let spec = dir.path().join("jobspec.json");
    std::fs::write(
        &spec,
        r#"{"tasks": [{"command": ["true"], "count": {"total": 1}}], "attributes": {"system": {}}}"#,
    )
    .expect("write jobspec");
    let out = daemon.flux().args(["job", "submit"]).arg(&spec).output().expect("submit");
    let jobid = stdout_of(out).trim().to_string();

    let out = daemon
        .flux()
        .args(["job", "wait-event", "--timeout", "0.5", &jobid, "nonexistent"])
        .output()
        .expect("run wait-event");
    assert!(!out.status.success() || String::from_utf8_lossy(&out.stderr).contains("timed out"));
    assert_eq!(out.status.code(), Some(1));
}
