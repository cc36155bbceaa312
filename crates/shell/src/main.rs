// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! flux-shell: per-node job shell entry point.
//!
//! Usage: `flux-shell [--reconnect] JOBID`
//!
//! Job documents come from the broker socket (`FLUX_SOCKET`); the
//! shell's rank arrives in `FLUX_SHELL_RANK`. With more than one shell
//! the barrier protocol runs on fds 0/1.

use flux_core::{Errnum, Jobid};
use flux_shell::{info::ShellInfo, Shell};
use flux_storage::Kvs;
use flux_wire::{ClientReply, ClientRequest};
use serde_json::{json, Value};
use tracing::error;
use tracing_subscriber::EnvFilter;

struct Args {
    jobid: Jobid,
    reconnect: bool,
}

fn usage() -> ! {
    eprintln!("Usage: flux-shell [--reconnect] JOBID");
    std::process::exit(1);
}

fn parse_args() -> Args {
    let mut reconnect = false;
    let mut jobid = None;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--reconnect" => reconnect = true,
            other if jobid.is_none() => match Jobid::parse(other) {
                Ok(id) => jobid = Some(id),
                Err(e) => {
                    eprintln!("flux-shell: {e}");
                    usage();
                }
            },
            _ => usage(),
        }
    }
    match jobid {
        Some(jobid) => Args { jobid, reconnect },
        None => usage(),
    }
}

fn broker_socket() -> std::path::PathBuf {
    std::env::var("FLUX_SOCKET")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("fluxd.sock"))
}

/// Fetch jobspec and R from the broker over the framed socket.
async fn fetch_documents(path: &std::path::Path, jobid: Jobid) -> Result<(Value, Value), String> {
    let mut stream = tokio::net::UnixStream::connect(path)
        .await
        .map_err(|e| format!("cannot connect to {}: {e}", path.display()))?;

    let request = ClientRequest {
        topic: "job-info.lookup".to_string(),
        payload: json!({"id": jobid.0, "keys": ["jobspec", "R"], "flags": 1}),
        streaming: false,
    };
    let frame = flux_wire::encode(&request).map_err(|e| e.to_string())?;
    flux_wire::write_message(&mut stream, &frame)
        .await
        .map_err(|e| e.to_string())?;
    let bytes = flux_wire::read_message(&mut stream).await.map_err(|e| e.to_string())?;
    match flux_wire::decode::<ClientReply>(&bytes).map_err(|e| e.to_string())? {
        ClientReply::Response { payload } => {
            let jobspec = payload.get("jobspec").cloned().ok_or("no jobspec in response")?;
            let r = payload.get("R").cloned().ok_or("no R in response")?;
            Ok((jobspec, r))
        }
        ClientReply::Error { errnum, text } => {
            Err(text.unwrap_or_else(|| Errnum::to_string(&errnum)))
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()))
        .with_writer(std::io::stderr)
        .init();
    let args = parse_args();

    let rank: u32 = std::env::var("FLUX_SHELL_RANK")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(0);

    let socket = broker_socket();
    let (jobspec, resources) = match fetch_documents(&socket, args.jobid).await {
        Ok(docs) => docs,
        Err(e) => {
            error!(jobid = %args.jobid, "cannot load job documents: {e}");
            std::process::exit(1);
        }
    };
    let info = match ShellInfo::from_documents(args.jobid, rank, jobspec, resources) {
        Ok(info) => info,
        Err(e) => {
            error!("bad job documents: {e}");
            std::process::exit(1);
        }
    };
    let multi_shell = info.shell_size > 1;

    let kvs = Kvs::new();
    let userid = nix::unistd::geteuid().as_raw();
    let mut shell = match Shell::new(info, kvs, userid) {
        Ok(shell) => shell,
        Err(e) => {
            error!("cannot initialize shell: {e}");
            std::process::exit(1);
        }
    };
    shell.set_broker_uri(&format!("local://{}", socket.display()));

    if args.reconnect {
        if let Err(e) = shell.reconnect().await {
            error!("reconnect failed: {e}");
            std::process::exit(1);
        }
    }

    // With peers, the barrier protocol runs over fds 0/1.
    let rc = if multi_shell {
        shell.run(tokio::io::stdin(), tokio::io::stdout()).await
    } else {
        shell.run(tokio::io::empty(), tokio::io::sink()).await
    };
    match rc {
        Ok(code) => {
            if let Err(e) = shell.release_guest_namespace().await {
                error!("release failed: {e}");
            }
            std::process::exit(code);
        }
        Err(e) => {
            error!("shell failed: {e}");
            std::process::exit(1);
        }
    }
}
