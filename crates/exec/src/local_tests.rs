// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::channel::OutputChunk;
use serial_test::serial;

async fn collect_stdout(proc: &mut LocalProcess) -> Vec<u8> {
    let mut out = Vec::new();
    while let Some(chunk) = proc.stdout.recv().await {
        match chunk {
            OutputChunk::Data(d) => out.extend_from_slice(&d),
            OutputChunk::Eof => break,
            OutputChunk::ReadError(e) => panic!("read error: {e}"),
        }
    }
    out
}

#[tokio::test]
#[serial]
async fn echo_output_and_exit_status() {
    sigchld::initialize().unwrap();
    let cmd = Cmd::new(&["echo", "hello"]);
    let mut proc = LocalProcess::spawn(&cmd).unwrap();
    assert!(proc.pid > 0);

    let out = collect_stdout(&mut proc).await;
    assert_eq!(out, b"hello\n");

    let status = proc.wait_exited().await.unwrap();
    assert_eq!(status_code(&status), 0);
    drop(proc);
    sigchld::finalize();
}

#[tokio::test]
#[serial]
async fn stdin_reaches_child() {
    sigchld::initialize().unwrap();
    let cmd = Cmd::new(&["cat"]);
    let mut proc = LocalProcess::spawn(&cmd).unwrap();
    proc.stdin.write(b"roundtrip\n").await.unwrap();
    proc.stdin.close();

    let out = collect_stdout(&mut proc).await;
    assert_eq!(out, b"roundtrip\n");
    let status = proc.wait_exited().await.unwrap();
    assert_eq!(exit_code(status_code(&status)), Some(0));
    drop(proc);
    sigchld::finalize();
}

#[tokio::test]
#[serial]
async fn nonzero_exit_code() {
    sigchld::initialize().unwrap();
    let cmd = Cmd::new(&["sh", "-c", "exit 3"]);
    let mut proc = LocalProcess::spawn(&cmd).unwrap();
    let status = proc.wait_exited().await.unwrap();
    assert_eq!(exit_code(status_code(&status)), Some(3));
    drop(proc);
    sigchld::finalize();
}

#[tokio::test]
#[serial]
async fn kill_terminates_process_group() {
    sigchld::initialize().unwrap();
    let cmd = Cmd::new(&["sleep", "60"]);
    let mut proc = LocalProcess::spawn(&cmd).unwrap();
    proc.kill(nix::sys::signal::Signal::SIGKILL).unwrap();
    let status = proc.wait_exited().await.unwrap();
    let code = status_code(&status);
    assert_eq!(term_signal(code), Some(9));
    assert_eq!(exit_code(code), None);
    drop(proc);
    sigchld::finalize();
}

#[tokio::test]
#[serial]
async fn spawn_missing_binary_is_noent() {
    sigchld::initialize().unwrap();
    let cmd = Cmd::new(&["/no/such/binary"]);
    let err = LocalProcess::spawn(&cmd).unwrap_err();
    assert_eq!(err.errnum(), Errnum::Noent);
    sigchld::finalize();
}

#[test]
fn empty_command_rejected() {
    let err = LocalProcess::spawn(&Cmd::default()).unwrap_err();
    assert_eq!(err.errnum(), Errnum::Proto);
}

#[test]
fn status_code_mapping() {
    use nix::unistd::Pid;
    let exited = WaitStatus::Exited(Pid::from_raw(1), 3);
    assert_eq!(status_code(&exited), 3 << 8);
    assert_eq!(exit_code(3 << 8), Some(3));

    let signaled = WaitStatus::Signaled(Pid::from_raw(1), Signal::SIGTERM, false);
    assert_eq!(status_code(&signaled), 15);
    assert_eq!(term_signal(15), Some(15));
    assert_eq!(exit_code(15), None);
}

#[tokio::test]
#[serial]
async fn child_env_override() {
    sigchld::initialize().unwrap();
    let mut cmd = Cmd::new(&["sh", "-c", "echo $MARKER"]);
    cmd.setenv("MARKER", "present");
    cmd.setenv("PATH", std::env::var("PATH").unwrap_or_default().as_str());
    let mut proc = LocalProcess::spawn(&cmd).unwrap();
    let out = collect_stdout(&mut proc).await;
    assert_eq!(out, b"present\n");
    proc.wait_exited().await.unwrap();
    drop(proc);
    sigchld::finalize();
}
