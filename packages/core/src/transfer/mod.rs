//! Transfer Engine
//!
//! Moves file bytes between local streams and provider messages:
//!
//! - [`ChunkUploader`]: stream → chunks → portions → messages
//! - [`RangeDownloader`]: inclusive byte range → part spans → ordered bytes
//!
//! Both own their buffers exclusively and observe an [`AbortHandle`] at
//! every chunk boundary.

mod abort;
mod downloader;
mod error;
mod sink;
mod uploader;

pub use abort::AbortHandle;
pub use downloader::{plan_range, ByteRange, PartSpan, RangeDownloader};
pub use error::TransferError;
pub use sink::{ByteSink, ChannelSink, WriterSink};
pub use uploader::{ChunkUploader, UploadListener, UploadOutcome, UploadTarget};
