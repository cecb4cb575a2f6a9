//! Service Layer Error Types
//!
//! `FsError` is what every filesystem operation returns. Variants follow the
//! failure taxonomy callers act on: missing paths, name conflicts, provider
//! blob mismatches, provider unavailability and invalid input.

use crate::models::ValidationError;
use crate::transfer::TransferError;
use crate::transport::TransportError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    /// Path or id resolves to nothing, or to the wrong kind of node
    #[error("Not found: {0}")]
    NotFound(String),

    /// Name collision or missing path segment with no automatic resolution
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A provider message no longer carries the blob recorded for it
    #[error("Message {message_id} refers to blob {actual}, expected {expected}")]
    TransportMismatch {
        message_id: i64,
        expected: String,
        actual: String,
    },

    /// Provider call or fetch failed
    #[error("Transport unavailable: {0}")]
    TransportUnavailable(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Operation aborted")]
    Aborted,

    /// Metadata store failure
    #[error("Store operation failed: {0}")]
    Store(#[from] anyhow::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FsError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transport_unavailable(msg: impl Into<String>) -> Self {
        Self::TransportUnavailable(msg.into())
    }

    pub fn transport_mismatch(
        message_id: i64,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::TransportMismatch {
            message_id,
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl From<ValidationError> for FsError {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e.to_string())
    }
}

impl From<TransportError> for FsError {
    fn from(e: TransportError) -> Self {
        Self::TransportUnavailable(e.to_string())
    }
}

impl From<TransferError> for FsError {
    fn from(e: TransferError) -> Self {
        match e {
            TransferError::Transport(inner) => inner.into(),
            TransferError::BlobMismatch {
                message_id,
                expected,
                actual,
            } => Self::TransportMismatch {
                message_id,
                expected,
                actual,
            },
            TransferError::Unavailable(msg) => Self::TransportUnavailable(msg),
            TransferError::InvalidRange { start, end, size } => Self::Validation(format!(
                "invalid range {}-{} for {} byte(s)",
                start, end, size
            )),
            TransferError::Io(io) => Self::Io(io),
            TransferError::Listener(inner) => Self::Store(inner),
            TransferError::Aborted => Self::Aborted,
        }
    }
}

pub type FsResult<T> = Result<T, FsError>;
