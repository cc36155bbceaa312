// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! fluxd: hosts the control-plane services on a Unix socket.

use flux_daemon::listener::Listener;
use flux_daemon::{JobInfo, JobManager};
use flux_exec::SubprocessServer;
use flux_storage::Kvs;
use flux_wire::{Cred, Router};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn socket_path() -> PathBuf {
    if let Some(arg) = std::env::args().nth(1) {
        return PathBuf::from(arg);
    }
    if let Ok(path) = std::env::var("FLUX_SOCKET") {
        return PathBuf::from(path);
    }
    std::env::temp_dir().join("fluxd.sock")
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let path = socket_path();
    let router = Router::new();
    let kvs = Kvs::new();
    let uid = nix::unistd::geteuid().as_raw();

    let _jobinfo = JobInfo::start(router.handle(Cred::owner(uid)), kvs.clone());
    let _manager = JobManager::start(router.handle(Cred::owner(uid)), kvs.clone());
    let rexec = match SubprocessServer::start(
        router.handle(Cred::owner(uid)),
        "rexec",
        &format!("local://{}", path.display()),
        0,
    ) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "cannot start subprocess server");
            std::process::exit(1);
        }
    };

    let listener = match Listener::bind(&path, router.clone()) {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, path = %path.display(), "cannot bind socket");
            std::process::exit(1);
        }
    };
    tokio::spawn(listener.run());

    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutting down");
        rexec.shutdown(nix::sys::signal::Signal::SIGTERM).await;
    }
    let _ = std::fs::remove_file(&path);
}
