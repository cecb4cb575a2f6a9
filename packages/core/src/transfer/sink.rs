//! Download destinations
//!
//! `ByteSink` is where a download writes its ordered bytes. `WriterSink`
//! adapts any tokio `AsyncWrite`; `ChannelSink` feeds an mpsc channel whose
//! receiver becomes a streaming response body.

use async_trait::async_trait;
use bytes::Bytes;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

#[async_trait]
pub trait ByteSink: Send {
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()>;

    /// Signal end of stream
    async fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub struct WriterSink<W> {
    inner: W,
}

impl<W> WriterSink<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

#[async_trait]
impl<W: AsyncWrite + Unpin + Send> ByteSink for WriterSink<W> {
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        self.inner.write_all(&chunk).await
    }

    async fn finish(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }
}

/// Sink whose chunks are delivered to a bounded channel
///
/// Dropping the receiver makes further writes fail with `BrokenPipe`, which
/// stops the download.
pub struct ChannelSink {
    tx: mpsc::Sender<io::Result<Bytes>>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<io::Result<Bytes>>) -> Self {
        Self { tx }
    }

    /// Sink and the matching receiver, buffering up to `capacity` chunks
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<io::Result<Bytes>>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ByteSink for ChannelSink {
    async fn write_chunk(&mut self, chunk: Bytes) -> io::Result<()> {
        self.tx
            .send(Ok(chunk))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "receiver dropped"))
    }
}
