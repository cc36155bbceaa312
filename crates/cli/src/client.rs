// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Framed-socket client toward fluxd.

use anyhow::{anyhow, bail, Context, Result};
use flux_core::Errnum;
use flux_wire::{ClientReply, ClientRequest};
use serde_json::Value;
use std::path::PathBuf;
use tokio::net::UnixStream;

pub fn socket_path() -> PathBuf {
    std::env::var("FLUX_SOCKET")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir().join("fluxd.sock"))
}

pub struct Client {
    stream: UnixStream,
    done: bool,
}

impl Client {
    /// Open a connection and send one request.
    pub async fn request(topic: &str, payload: Value, streaming: bool) -> Result<Client> {
        let path = socket_path();
        let stream = UnixStream::connect(&path)
            .await
            .with_context(|| format!("cannot connect to broker at {}", path.display()))?;
        let mut client = Client { stream, done: false };
        let frame = flux_wire::encode(&ClientRequest {
            topic: topic.to_string(),
            payload,
            streaming,
        })?;
        flux_wire::write_message(&mut client.stream, &frame).await?;
        Ok(client)
    }

    /// Next reply payload; `Ok(None)` at the stream's natural end.
    pub async fn next(&mut self) -> Result<Option<Value>> {
        if self.done {
            return Ok(None);
        }
        let bytes = flux_wire::read_message(&mut self.stream).await?;
        match flux_wire::decode::<ClientReply>(&bytes)? {
            ClientReply::Response { payload } => Ok(Some(payload)),
            ClientReply::Error { errnum: Errnum::Nodata, .. } => {
                self.done = true;
                Ok(None)
            }
            ClientReply::Error { errnum, text } => {
                self.done = true;
                Err(anyhow!("{}", text.unwrap_or_else(|| errnum.to_string())))
            }
        }
    }

    /// Collect exactly one reply (non-streaming RPC).
    pub async fn get(mut self) -> Result<Value> {
        match self.next().await? {
            Some(payload) => Ok(payload),
            None => bail!("no response"),
        }
    }
}

/// One-shot request/response helper.
pub async fn rpc(topic: &str, payload: Value) -> Result<Value> {
    Client::request(topic, payload, false).await?.get().await
}
