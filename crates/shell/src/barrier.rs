// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The shell barrier protocol.
//!
//! The shell writes `enter\n` on protocol fd 1 and expects exactly
//! `exit=0\n` back on protocol fd 0. Any other reply is fatal to the
//! shell. A single-shell job skips the exchange entirely.

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum BarrierError {
    #[error("barrier protocol error: expected \"exit=0\", got {0:?}")]
    BadReply(String),

    #[error("barrier peer closed the protocol stream")]
    Eof,

    #[error("barrier I/O error: {0}")]
    Io(String),
}

/// Enter the barrier and wait for release. No-op when `size <= 1`.
pub async fn barrier<R, W>(size: u32, reader: R, mut writer: W) -> Result<(), BarrierError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    if size <= 1 {
        return Ok(());
    }
    writer
        .write_all(b"enter\n")
        .await
        .map_err(|e| BarrierError::Io(e.to_string()))?;
    writer.flush().await.map_err(|e| BarrierError::Io(e.to_string()))?;

    let mut reply = String::new();
    let mut reader = BufReader::new(reader);
    let n = reader
        .read_line(&mut reply)
        .await
        .map_err(|e| BarrierError::Io(e.to_string()))?;
    if n == 0 {
        return Err(BarrierError::Eof);
    }
    if reply != "exit=0\n" {
        return Err(BarrierError::BadReply(reply));
    }
    Ok(())
}

#[cfg(test)]
#[path = "barrier_tests.rs"]
mod tests;
