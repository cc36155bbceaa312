// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Listener task for CLI connections.
//!
//! Accepts Unix socket connections and bridges one framed request per
//! connection onto the router, streaming replies back until the
//! terminal error frame. A client that hangs up mid-stream gets its
//! outstanding RPCs cancelled via the router disconnect path.

use flux_wire::{
    encode, read_message, write_message, ClientReply, ClientRequest, Cred, Router, RpcFlags,
};
use tokio::io::AsyncReadExt;
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};

pub struct Listener {
    unix: UnixListener,
    router: Router,
}

impl Listener {
    pub fn bind(path: &std::path::Path, router: Router) -> std::io::Result<Listener> {
        // stale socket from a previous run
        let _ = std::fs::remove_file(path);
        let unix = UnixListener::bind(path)?;
        info!(path = %path.display(), "listening");
        Ok(Listener { unix, router })
    }

    pub async fn run(self) {
        loop {
            match self.unix.accept().await {
                Ok((stream, _)) => {
                    let router = self.router.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, router).await {
                            debug!(error = %e, "connection ended");
                        }
                    });
                }
                Err(e) => error!(error = %e, "accept error"),
            }
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    router: Router,
) -> Result<(), flux_wire::FrameError> {
    let (mut reader, mut writer) = stream.into_split();
    let bytes = read_message(&mut reader).await?;
    let req: ClientRequest = flux_wire::decode(&bytes)?;
    debug!(topic = %req.topic, streaming = req.streaming, "request");

    // Local socket connections act with instance-owner credentials.
    let uid = nix::unistd::geteuid().as_raw();
    let handle = router.handle(Cred::owner(uid));
    let mut rpc = handle.rpc(
        &req.topic,
        req.payload,
        RpcFlags { streaming: req.streaming, noresponse: false },
    );

    loop {
        let reply = tokio::select! {
            response = rpc.next() => response,
            _ = detect_disconnect(&mut reader) => {
                debug!("client disconnected, cancelling");
                handle.disconnect();
                return Ok(());
            }
        };
        match reply {
            Ok(payload) => {
                let frame = encode(&ClientReply::Response { payload })?;
                write_message(&mut writer, &frame).await?;
            }
            Err(e) => {
                let frame = encode(&ClientReply::Error { errnum: e.errnum, text: e.text })?;
                write_message(&mut writer, &frame).await?;
                break;
            }
        }
    }
    handle.disconnect();
    Ok(())
}

/// The client sends nothing after its request; a read completing means
/// it hung up.
async fn detect_disconnect(reader: &mut (impl AsyncReadExt + Unpin)) {
    let mut buf = [0u8; 1];
    let _ = reader.read(&mut buf).await;
}
