//! Transfer Error Types

use crate::transport::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// The message no longer carries the blob recorded in the part
    #[error("Message {message_id} now refers to blob {actual}, expected {expected}")]
    BlobMismatch {
        message_id: i64,
        expected: String,
        actual: String,
    },

    #[error("Part unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid range {start}-{end} for {size} byte(s)")]
    InvalidRange { start: u64, end: u64, size: u64 },

    #[error("Source read failed: {0}")]
    Io(#[from] std::io::Error),

    /// Upload listener failed to record progress
    #[error("Listener failed: {0}")]
    Listener(#[source] anyhow::Error),

    #[error("Transfer aborted")]
    Aborted,
}

impl TransferError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}
