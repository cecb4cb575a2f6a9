//! BlobTransport Trait - Messaging Provider Abstraction
//!
//! A `BlobTransport` is one authenticated session with the messaging
//! provider. File bytes travel as *blobs*: raw chunks are uploaded toward a
//! client-chosen blob id, then the blob is finalized as one message in a
//! channel. Reads go the other way, resolving a message to a media
//! descriptor and fetching byte windows of its blob.
//!
//! Every method may suspend on network I/O. Implementations must be
//! `Send + Sync`; sessions are shared through the [`ClientPool`](super::ClientPool).

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Provider limit on parts per finalized blob when none is reported
pub const DEFAULT_MAX_UPLOAD_PARTS: u32 = 4000;

/// Transport-level failures
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Channel not found: {0}")]
    ChannelNotFound(String),

    #[error("Message {message_id} not found in channel {channel}")]
    MessageNotFound { channel: String, message_id: i64 },

    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    #[error("Blob {blob_id} is incomplete: expected {expected} part(s), received {received}")]
    IncompleteBlob {
        blob_id: String,
        expected: u32,
        received: u32,
    },

    #[error("Blob {blob_id} exceeds the limit of {max} part(s)")]
    TooManyParts { blob_id: String, max: u32 },

    #[error("Access token rejected for blob {0}")]
    InvalidAccessToken(String),

    #[error("No user session registered")]
    NoUserSession,

    #[error("Transport request failed: {0}")]
    Request(String),
}

impl TransportError {
    pub fn message_not_found(channel: impl Into<String>, message_id: i64) -> Self {
        Self::MessageNotFound {
            channel: channel.into(),
            message_id,
        }
    }

    pub fn request(msg: impl Into<String>) -> Self {
        Self::Request(msg.into())
    }
}

/// Who a session is logged in as
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientIdentity {
    /// Account name, also the key of its saved session
    pub name: String,

    /// Bot sessions are preferred for downloads
    pub is_bot: bool,

    /// Maximum parts the provider accepts for one finalized blob
    pub max_upload_parts: u32,
}

impl ClientIdentity {
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_bot: false,
            max_upload_parts: DEFAULT_MAX_UPLOAD_PARTS,
        }
    }

    pub fn bot(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_bot: true,
            max_upload_parts: DEFAULT_MAX_UPLOAD_PARTS,
        }
    }

    pub fn with_max_upload_parts(mut self, max: u32) -> Self {
        self.max_upload_parts = max.max(1);
        self
    }
}

/// Reference to a message created by `send`, `forward` or `copy`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub message_id: i64,

    /// Canonical blob id the provider attached to the message
    pub blob_id: String,

    /// Attachment name as recorded by the provider
    pub filename: String,

    pub size: u64,
}

/// Current locator of a message's attachment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaDescriptor {
    pub blob_id: String,
    pub access_token: String,
    pub size: u64,
}

#[async_trait]
pub trait BlobTransport: Send + Sync {
    fn identity(&self) -> &ClientIdentity;

    /// Allocate a fresh blob id for a portion about to be uploaded
    fn new_blob_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    /// Transmit one raw chunk of a not yet finalized blob
    ///
    /// `total_parts` is `None` while the final part count is unknown.
    async fn upload_part(
        &self,
        blob_id: &str,
        part_index: u32,
        total_parts: Option<u32>,
        bytes: Bytes,
    ) -> Result<(), TransportError>;

    /// Finalize an uploaded blob as one message in `channel`
    async fn send(
        &self,
        channel: &str,
        blob_id: &str,
        total_parts: u32,
        filename: &str,
        mime: &str,
    ) -> Result<SentMessage, TransportError>;

    /// Resolve a message to its attachment, `None` when it has no media
    /// anymore (deleted or replaced by a text message)
    async fn fetch_media(
        &self,
        channel: &str,
        message_id: i64,
    ) -> Result<Option<MediaDescriptor>, TransportError>;

    /// Fetch up to `limit` bytes of a blob starting at `offset`
    ///
    /// A short or empty result means the blob ended.
    async fn read_bytes(
        &self,
        blob_id: &str,
        access_token: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Bytes, TransportError>;

    /// Forward a message into `dest_channel`
    async fn forward(
        &self,
        channel: &str,
        message_id: i64,
        dest_channel: &str,
    ) -> Result<SentMessage, TransportError>;

    /// Copy a message into `dest_channel` without forward attribution
    async fn copy(
        &self,
        channel: &str,
        message_id: i64,
        dest_channel: &str,
    ) -> Result<SentMessage, TransportError>;

    async fn delete(&self, channel: &str, message_id: i64) -> Result<(), TransportError>;

    /// Post a plain text message, returns its id
    async fn send_text(&self, channel: &str, text: &str) -> Result<i64, TransportError>;
}
