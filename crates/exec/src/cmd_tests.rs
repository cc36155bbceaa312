// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;

#[test]
fn json_roundtrip_skips_empty_fields() {
    let cmd = Cmd::new(&["/bin/true"]);
    let s = serde_json::to_string(&cmd).unwrap();
    assert_eq!(s, "{\"cmdline\":[\"/bin/true\"]}");
    let back: Cmd = serde_json::from_str(&s).unwrap();
    assert_eq!(back, cmd);
}

#[test]
fn command_name_is_basename() {
    assert_eq!(Cmd::new(&["/usr/bin/sleep", "5"]).command_name(), "sleep");
    assert_eq!(Cmd::new(&["sleep"]).command_name(), "sleep");
    assert_eq!(Cmd::new(&[]).command_name(), "");
}

#[test]
fn env_editing() {
    let mut cmd = Cmd::new(&["x"]);
    cmd.setenv("FLUX_URI", "local:///run/flux");
    cmd.setenv("NOTIFY_SOCKET", "/run/notify");
    cmd.unsetenv("NOTIFY_SOCKET");
    assert_eq!(cmd.env.get("FLUX_URI").map(String::as_str), Some("local:///run/flux"));
    assert!(!cmd.env.contains_key("NOTIFY_SOCKET"));
}

#[test]
fn line_buffering_defaults_on() {
    let mut cmd = Cmd::new(&["x"]);
    assert!(cmd.line_buffered("stdout"));
    cmd.opts.insert("stdout_LINE_BUFFER".to_string(), "false".to_string());
    assert!(!cmd.line_buffered("stdout"));
    assert!(cmd.line_buffered("stderr"));
}

#[test]
fn buffer_size_override() {
    let mut cmd = Cmd::new(&["x"]);
    assert_eq!(cmd.buffer_size("stdout", 4096), 4096);
    cmd.opts.insert("stdout_BUFSIZE".to_string(), "128".to_string());
    assert_eq!(cmd.buffer_size("stdout", 4096), 128);
}

#[test]
fn stop_timer_disabled_by_default() {
    let mut cmd = Cmd::new(&["x"]);
    assert_eq!(cmd.stop_timer_sec(), None);
    cmd.opts.insert("SDEXEC_STOP_TIMER_SEC".to_string(), "2.5".to_string());
    assert_eq!(cmd.stop_timer_sec(), Some(2.5));
}
