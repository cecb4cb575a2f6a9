//! Range Downloader
//!
//! Maps an inclusive byte range of a file onto its parts and streams exactly
//! those bytes, in ascending order, into a [`ByteSink`].
//!
//! # Architecture
//!
//! - **Planning** is a pure function over the part list ([`plan_range`]).
//! - **Verification**: before reading a part, the message is resolved again
//!   and its current blob id must match the recorded `fileid`.
//! - **Chunk-aligned reads**: reads start at the chunk boundary at or below
//!   the part-local start and trim the first and last chunk.
//!
//! Sink write failures (a client hanging up) end the transfer quietly; they
//! are logged, not returned.

use super::abort::AbortHandle;
use super::error::TransferError;
use super::sink::ByteSink;
use crate::models::{FileData, Part};
use crate::transport::BlobTransport;
use bytes::Bytes;
use std::sync::Arc;

/// Inclusive byte range validated against a file size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    /// Validate `start..=end` against `size`, clamping `end` to the last byte
    pub fn new(start: u64, end: u64, size: u64) -> Result<Self, TransferError> {
        if start > end || start >= size {
            return Err(TransferError::InvalidRange { start, end, size });
        }
        Ok(Self {
            start,
            end: end.min(size - 1),
        })
    }

    /// The whole file, `None` for an empty one
    pub fn full(size: u64) -> Option<Self> {
        (size > 0).then(|| Self {
            start: 0,
            end: size - 1,
        })
    }

    /// Number of bytes covered, always at least one
    pub fn byte_count(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Slice of one part needed to satisfy a range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartSpan {
    pub part: Part,
    /// Part-local offset of the first byte
    pub local_start: u64,
    /// Part-local exclusive end
    pub local_end: u64,
}

/// Parts, in index order, that cover `range`
pub fn plan_range(parts: &[Part], range: ByteRange) -> Vec<PartSpan> {
    let mut ordered: Vec<&Part> = parts.iter().collect();
    ordered.sort_by_key(|p| p.index);

    let mut spans = Vec::new();
    let mut offset: u64 = 0;
    for part in ordered {
        let part_end = offset + part.size;
        if range.start < part_end {
            let local_start = range.start.saturating_sub(offset);
            if range.end < part_end {
                spans.push(PartSpan {
                    part: part.clone(),
                    local_start,
                    local_end: range.end - offset + 1,
                });
                break;
            }
            spans.push(PartSpan {
                part: part.clone(),
                local_start,
                local_end: part.size,
            });
        }
        offset = part_end;
    }
    spans
}

pub struct RangeDownloader {
    client: Arc<dyn BlobTransport>,
    channel: String,
    chunk_size: u64,
    abort: AbortHandle,
}

impl RangeDownloader {
    /// `chunk_size` is the transport read size, twice the upload chunk
    pub fn new(client: Arc<dyn BlobTransport>, channel: impl Into<String>, chunk_size: u64) -> Self {
        Self {
            client,
            channel: channel.into(),
            chunk_size: chunk_size.max(1),
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

    /// Stream `range` of `file` into `sink`, returning the bytes written
    ///
    /// `None` streams the whole file. The sink is finished on every path.
    pub async fn execute(
        &self,
        file: &FileData,
        range: Option<ByteRange>,
        sink: &mut dyn ByteSink,
    ) -> Result<u64, TransferError> {
        let result = self.stream(file, range, sink).await;
        if let Err(e) = sink.finish().await {
            tracing::debug!("Sink finish failed: {}", e);
        }
        result
    }

    async fn stream(
        &self,
        file: &FileData,
        range: Option<ByteRange>,
        sink: &mut dyn ByteSink,
    ) -> Result<u64, TransferError> {
        let Some(range) = range else {
            return Ok(0);
        };

        if let Some(content) = &file.content {
            let start = range.start as usize;
            let end = (range.end as usize + 1).min(content.len());
            if start >= end {
                return Ok(0);
            }
            let chunk = Bytes::copy_from_slice(&content[start..end]);
            let len = chunk.len() as u64;
            if let Err(e) = sink.write_chunk(chunk).await {
                tracing::warn!("Download sink closed: {}", e);
                return Ok(0);
            }
            return Ok(len);
        }

        let mut written = 0;
        for span in plan_range(&file.parts, range) {
            if self.abort.is_aborted() {
                tracing::warn!("Download aborted after {} byte(s)", written);
                break;
            }
            match self.stream_part(&span, sink, &mut written).await? {
                SinkState::Open => {}
                SinkState::Closed => break,
            }
        }
        Ok(written)
    }

    async fn stream_part(
        &self,
        span: &PartSpan,
        sink: &mut dyn ByteSink,
        written: &mut u64,
    ) -> Result<SinkState, TransferError> {
        let part = &span.part;
        let media = self
            .client
            .fetch_media(&self.channel, part.messageid)
            .await?
            .ok_or_else(|| {
                TransferError::unavailable(format!(
                    "message {} in {} has no media",
                    part.messageid, self.channel
                ))
            })?;

        if media.blob_id != part.fileid {
            return Err(TransferError::BlobMismatch {
                message_id: part.messageid,
                expected: part.fileid.clone(),
                actual: media.blob_id,
            });
        }

        tracing::debug!(
            "Reading part {} ({}..{}) of message {}",
            part.index,
            span.local_start,
            span.local_end,
            part.messageid
        );

        let mut offset = span.local_start - span.local_start % self.chunk_size;
        loop {
            if self.abort.is_aborted() {
                return Ok(SinkState::Open);
            }

            let bytes = self
                .client
                .read_bytes(&media.blob_id, &media.access_token, offset, self.chunk_size)
                .await?;
            if bytes.is_empty() {
                return Err(TransferError::unavailable(format!(
                    "message {} ended at {} before {}",
                    part.messageid, offset, span.local_end
                )));
            }

            let chunk_end = offset + bytes.len() as u64;
            let from = span.local_start.saturating_sub(offset) as usize;
            let to = (span.local_end.min(chunk_end) - offset) as usize;
            let last = chunk_end >= span.local_end;

            if from < to {
                let slice = bytes.slice(from..to);
                let len = slice.len() as u64;
                if let Err(e) = sink.write_chunk(slice).await {
                    tracing::warn!("Download sink closed: {}", e);
                    return Ok(SinkState::Closed);
                }
                *written += len;
            }

            if last {
                return Ok(SinkState::Open);
            }
            offset = chunk_end;
        }
    }
}

enum SinkState {
    Open,
    Closed,
}
