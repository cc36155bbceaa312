// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use tokio::io::AsyncReadExt;

#[tokio::test]
async fn single_shell_barrier_is_a_noop() {
    // no peer exists; reader/writer must not be touched
    let reader = tokio::io::empty();
    let writer = tokio::io::sink();
    barrier(1, reader, writer).await.unwrap();
    let reader = tokio::io::empty();
    let writer = tokio::io::sink();
    barrier(0, reader, writer).await.unwrap();
}

#[tokio::test]
async fn happy_path_enter_then_release() {
    let (reader, mut peer_writer) = tokio::io::duplex(64);
    let (mut peer_reader, writer) = tokio::io::duplex(64);

    let peer = tokio::spawn(async move {
        let mut buf = [0u8; 6];
        peer_reader.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"enter\n");
        tokio::io::AsyncWriteExt::write_all(&mut peer_writer, b"exit=0\n").await.unwrap();
    });

    barrier(2, reader, writer).await.unwrap();
    peer.await.unwrap();
}

#[tokio::test]
async fn wrong_reply_is_fatal() {
    let (reader, mut peer_writer) = tokio::io::duplex(64);
    let (_peer_reader, writer) = tokio::io::duplex(64);
    tokio::io::AsyncWriteExt::write_all(&mut peer_writer, b"exit=1\n").await.unwrap();

    let err = barrier(2, reader, writer).await.unwrap_err();
    assert_eq!(err, BarrierError::BadReply("exit=1\n".to_string()));
}

#[tokio::test]
async fn peer_eof_is_fatal() {
    let (reader, peer_writer) = tokio::io::duplex(64);
    let (_peer_reader, writer) = tokio::io::duplex(64);
    drop(peer_writer);

    let err = barrier(2, reader, writer).await.unwrap_err();
    assert_eq!(err, BarrierError::Eof);
}
