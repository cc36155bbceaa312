// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Stdio channels between a supervised child and its server.
//!
//! Each channel owns exactly one socketpair: the remote half goes to the
//! child, the local half is read (output) or written (input) here. The
//! reader keeps a linear buffer; in line mode only complete lines are
//! delivered, except when the buffer fills with no newline in sight or
//! EOF has been seen. A read error is delivered as an error chunk
//! followed by a synthetic EOF so consumers always observe EOF exactly
//! once.

use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::net::UnixStream as StdUnixStream;
use std::process::Stdio;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc;

/// Default output buffer size, shared with the subprocess defaults.
pub const DEFAULT_BUFSIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputChunk {
    /// Bytes read from the child. In line mode, a complete line unless
    /// the buffer overflowed or EOF flushed a partial tail.
    Data(Vec<u8>),
    /// Read error; a synthetic EOF follows.
    ReadError(String),
    Eof,
}

/// Read side of a child's output stream.
#[derive(Debug)]
pub struct OutputChannel {
    name: String,
    remote: Option<StdUnixStream>,
    rx: mpsc::UnboundedReceiver<OutputChunk>,
}

impl OutputChannel {
    pub fn new(name: &str, line_buffered: bool, bufsize: usize) -> std::io::Result<Self> {
        let (local, remote) = StdUnixStream::pair()?;
        local.set_nonblocking(true)?;
        let stream = UnixStream::from_std(local)?;
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(read_loop(stream, tx, line_buffered, bufsize.max(1)));
        Ok(OutputChannel { name: name.to_string(), remote: Some(remote), rx })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Hand the child's half to a `Command` as one of its stdio slots.
    /// The fd is consumed; the parent keeps no copy, so EOF propagates
    /// when the child exits.
    pub fn take_stdio(&mut self) -> Option<Stdio> {
        self.remote.take().map(|s| Stdio::from(OwnedFd::from(s)))
    }

    /// Hand the child's half out as an inheritable fd (extra channels).
    /// Clears CLOEXEC; the caller must drop it after spawn.
    pub fn take_remote_fd(&mut self) -> std::io::Result<Option<OwnedFd>> {
        match self.remote.take() {
            None => Ok(None),
            Some(stream) => {
                let fd: OwnedFd = stream.into();
                clear_cloexec(fd.as_raw_fd())?;
                Ok(Some(fd))
            }
        }
    }

    /// Next chunk; `None` after the channel task ends.
    pub async fn recv(&mut self) -> Option<OutputChunk> {
        self.rx.recv().await
    }
}

fn clear_cloexec(fd: RawFd) -> std::io::Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, FdFlag};
    fcntl(fd, FcntlArg::F_SETFD(FdFlag::empty())).map_err(std::io::Error::from)?;
    Ok(())
}

async fn read_loop(
    mut stream: UnixStream,
    tx: mpsc::UnboundedSender<OutputChunk>,
    line_buffered: bool,
    bufsize: usize,
) {
    let mut buf: Vec<u8> = Vec::with_capacity(bufsize);
    let mut tmp = vec![0u8; bufsize];
    loop {
        match stream.read(&mut tmp).await {
            Ok(0) => {
                if !buf.is_empty() {
                    let _ = tx.send(OutputChunk::Data(std::mem::take(&mut buf)));
                }
                let _ = tx.send(OutputChunk::Eof);
                return;
            }
            Ok(n) => {
                buf.extend_from_slice(&tmp[..n]);
                if line_buffered {
                    while let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                        let line: Vec<u8> = buf.drain(..=pos).collect();
                        if tx.send(OutputChunk::Data(line)).is_err() {
                            return;
                        }
                    }
                    // full with no newline: flush the partial chunk
                    if buf.len() >= bufsize {
                        let _ = tx.send(OutputChunk::Data(std::mem::take(&mut buf)));
                    }
                } else {
                    let _ = tx.send(OutputChunk::Data(std::mem::take(&mut buf)));
                }
            }
            Err(e) => {
                let _ = tx.send(OutputChunk::ReadError(e.to_string()));
                let _ = tx.send(OutputChunk::Eof);
                return;
            }
        }
    }
}

/// Write side of a child's input stream.
#[derive(Debug)]
pub struct InputChannel {
    name: String,
    remote: Option<StdUnixStream>,
    writer: Option<UnixStream>,
}

impl InputChannel {
    pub fn new(name: &str) -> std::io::Result<Self> {
        let (local, remote) = StdUnixStream::pair()?;
        local.set_nonblocking(true)?;
        let writer = UnixStream::from_std(local)?;
        Ok(InputChannel { name: name.to_string(), remote: Some(remote), writer: Some(writer) })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn take_stdio(&mut self) -> Option<Stdio> {
        self.remote.take().map(|s| Stdio::from(OwnedFd::from(s)))
    }

    pub fn take_remote_fd(&mut self) -> std::io::Result<Option<OwnedFd>> {
        match self.remote.take() {
            None => Ok(None),
            Some(stream) => {
                let fd: OwnedFd = stream.into();
                clear_cloexec(fd.as_raw_fd())?;
                Ok(Some(fd))
            }
        }
    }

    /// Write all bytes to the child.
    pub async fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
        match self.writer.as_mut() {
            Some(w) => {
                w.write_all(data).await?;
                Ok(data.len())
            }
            None => Err(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "channel closed")),
        }
    }

    /// Close the write half, signalling EOF to the child.
    pub fn close(&mut self) {
        self.writer = None;
    }

    pub fn is_closed(&self) -> bool {
        self.writer.is_none()
    }
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
