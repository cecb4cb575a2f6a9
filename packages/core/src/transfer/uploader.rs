//! Chunk Uploader
//!
//! Turns a byte stream into provider messages. The stream is read in
//! fixed-size chunks; each chunk is one `upload_part` call toward the blob of
//! the current *portion*. A portion is finalized as one message when it is
//! full and more data follows, or when the stream ends.
//!
//! # Small files
//!
//! While the cumulative size stays within `min_size`, chunks are buffered in
//! memory instead of transmitted. If the stream ends inside that window the
//! bytes are returned for inline storage and nothing reaches the provider.
//! The first chunk that crosses the threshold flushes the buffer, in order,
//! as the leading parts of the first portion.
//!
//! # Events
//!
//! Progress is reported through [`UploadListener`]: once per finalized
//! portion, once on completion, and once on abort or failure.

use super::abort::AbortHandle;
use super::error::TransferError;
use crate::models::Part;
use crate::transport::BlobTransport;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Result of a finished upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// Stream stayed within `min_size`; bytes belong in the node record
    Inline(Bytes),
    /// Finalized parts in index order
    Hosted(Vec<Part>),
}

/// Receives upload lifecycle events
#[async_trait]
pub trait UploadListener: Send + Sync {
    /// A portion was finalized as a provider message
    async fn on_portion(&self, part: &Part) -> anyhow::Result<()>;

    /// The whole stream was consumed
    async fn on_complete(&self, outcome: &UploadOutcome) -> anyhow::Result<()>;

    /// The upload stopped early, through abort or failure
    async fn on_aborted(&self, error: &TransferError);
}

/// Upload parameters
#[derive(Debug, Clone)]
pub struct UploadTarget {
    pub channel: String,
    pub filename: String,
    pub mime: String,
}

#[derive(Debug)]
struct Portion {
    index: u32,
    blob_id: String,
    parts_sent: u32,
    size: u64,
}

pub struct ChunkUploader {
    client: Arc<dyn BlobTransport>,
    target: UploadTarget,
    chunk_size: usize,
    min_size: u64,
    abort: AbortHandle,
}

impl ChunkUploader {
    pub fn new(
        client: Arc<dyn BlobTransport>,
        target: UploadTarget,
        chunk_size: usize,
        min_size: u64,
    ) -> Self {
        Self {
            client,
            target,
            chunk_size: chunk_size.max(1),
            min_size,
            abort: AbortHandle::new(),
        }
    }

    pub fn with_abort_handle(mut self, abort: AbortHandle) -> Self {
        self.abort = abort;
        self
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Consume `source` and upload it
    ///
    /// On failure the listener's `on_aborted` runs before the error is
    /// returned. Portions finalized before the failure stay on the provider.
    pub async fn execute<R>(
        &self,
        source: R,
        listener: &dyn UploadListener,
    ) -> Result<UploadOutcome, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        match self.run(source, listener).await {
            Ok(outcome) => {
                listener
                    .on_complete(&outcome)
                    .await
                    .map_err(TransferError::Listener)?;
                Ok(outcome)
            }
            Err(e) => {
                tracing::error!("Upload of '{}' stopped: {}", self.target.filename, e);
                listener.on_aborted(&e).await;
                Err(e)
            }
        }
    }

    async fn run<R>(
        &self,
        mut source: R,
        listener: &dyn UploadListener,
    ) -> Result<UploadOutcome, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let max_parts = self.client.identity().max_upload_parts.max(1);
        let mut portion = self.open_portion(0);
        let mut parts = Vec::new();
        let mut buffer: Option<Vec<u8>> = Some(Vec::new());
        let mut total: u64 = 0;

        loop {
            if self.abort.is_aborted() {
                return Err(TransferError::Aborted);
            }

            let block = read_block(&mut source, self.chunk_size).await?;
            if block.is_empty() {
                break;
            }
            total += block.len() as u64;

            if let Some(buffered) = buffer.as_mut() {
                if total <= self.min_size {
                    buffered.extend_from_slice(&block);
                    tracing::debug!("Buffered {} byte(s) of '{}'", total, self.target.filename);
                    continue;
                }

                let flushed = Bytes::from(std::mem::take(buffered));
                buffer = None;
                tracing::debug!(
                    "Flushing {} buffered byte(s) of '{}' past min_size",
                    flushed.len(),
                    self.target.filename
                );
                for start in (0..flushed.len()).step_by(self.chunk_size) {
                    let end = (start + self.chunk_size).min(flushed.len());
                    self.transmit(&mut portion, flushed.slice(start..end), max_parts, &mut parts, listener)
                        .await?;
                }
            }

            self.transmit(&mut portion, block, max_parts, &mut parts, listener)
                .await?;
        }

        if let Some(buffered) = buffer {
            tracing::info!(
                "'{}' kept inline ({} byte(s))",
                self.target.filename,
                buffered.len()
            );
            return Ok(UploadOutcome::Inline(Bytes::from(buffered)));
        }

        if portion.parts_sent > 0 {
            let part = self.finalize(&portion, portion.index > 0).await?;
            listener
                .on_portion(&part)
                .await
                .map_err(TransferError::Listener)?;
            parts.push(part);
        }

        tracing::info!(
            "Uploaded '{}': {} byte(s) in {} part(s)",
            self.target.filename,
            total,
            parts.len()
        );
        Ok(UploadOutcome::Hosted(parts))
    }

    fn open_portion(&self, index: u32) -> Portion {
        Portion {
            index,
            blob_id: self.client.new_blob_id(),
            parts_sent: 0,
            size: 0,
        }
    }

    async fn transmit(
        &self,
        portion: &mut Portion,
        chunk: Bytes,
        max_parts: u32,
        parts: &mut Vec<Part>,
        listener: &dyn UploadListener,
    ) -> Result<(), TransferError> {
        if self.abort.is_aborted() {
            return Err(TransferError::Aborted);
        }

        // A full portion is only sent once more data shows up, so a file
        // that fits exactly one portion keeps its plain name.
        if portion.parts_sent == max_parts {
            let part = self.finalize(portion, true).await?;
            listener
                .on_portion(&part)
                .await
                .map_err(TransferError::Listener)?;
            parts.push(part);
            *portion = self.open_portion(portion.index + 1);
        }

        let part_index = portion.parts_sent;
        let last = part_index + 1 == max_parts;
        portion.size += chunk.len() as u64;

        self.client
            .upload_part(
                &portion.blob_id,
                part_index,
                last.then(|| self.total_parts(portion.size)),
                chunk,
            )
            .await?;
        portion.parts_sent += 1;
        Ok(())
    }

    fn total_parts(&self, size: u64) -> u32 {
        size.div_ceil(self.chunk_size as u64) as u32
    }

    /// Send the portion's blob as one message
    ///
    /// `suffixed` portions get a `.NNN` name; a file held in a single
    /// portion keeps its own name.
    async fn finalize(&self, portion: &Portion, suffixed: bool) -> Result<Part, TransferError> {
        if self.abort.is_aborted() {
            return Err(TransferError::Aborted);
        }

        let filename = if suffixed {
            format!("{}.{:03}", self.target.filename, portion.index + 1)
        } else {
            self.target.filename.clone()
        };
        let total_parts = self.total_parts(portion.size);

        tracing::debug!(
            "Finalizing '{}' into {} ({} part(s))",
            filename,
            self.target.channel,
            total_parts
        );

        let sent = self
            .client
            .send(
                &self.target.channel,
                &portion.blob_id,
                total_parts,
                &filename,
                &self.target.mime,
            )
            .await?;

        Ok(Part {
            messageid: sent.message_id,
            fileid: sent.blob_id,
            originalfilename: sent.filename,
            size: portion.size,
            index: portion.index,
            hash: String::new(),
        })
    }
}

/// Read until `chunk_size` bytes are collected or the source ends
async fn read_block<R>(source: &mut R, chunk_size: usize) -> std::io::Result<Bytes>
where
    R: AsyncRead + Unpin + Send,
{
    let mut block = vec![0u8; chunk_size];
    let mut filled = 0;
    while filled < chunk_size {
        let n = source.read(&mut block[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    block.truncate(filled);
    Ok(Bytes::from(block))
}
