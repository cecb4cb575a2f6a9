//! Filesystem configuration
//!
//! Sizes and pacing shared by every operation of a process. The server loads
//! these values from its YAML file; tests build them directly.

use crate::services::FsError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Size of one `upload_part` call
pub const UPLOAD_CHUNK: usize = 512 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadConfig {
    /// Bytes per transmitted chunk
    pub chunk_size: usize,

    /// Files whose size never exceeds this are stored inline; must be a
    /// multiple of `chunk_size`
    pub min_size: u64,

    /// Channel of the root folder, the fallback for channel inheritance
    pub channel: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            chunk_size: UPLOAD_CHUNK,
            min_size: 0,
            channel: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Provider operations between pauses; 0 disables pacing
    pub batch_size: usize,

    /// Pause after each batch, in milliseconds
    pub batch_pause_ms: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_pause_ms: 1000,
        }
    }
}

impl TransportConfig {
    pub fn batch_pause(&self) -> Duration {
        Duration::from_millis(self.batch_pause_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FsConfig {
    pub upload: UploadConfig,
    pub transport: TransportConfig,
}

impl FsConfig {
    /// Config hosting the root on `channel`, defaults elsewhere
    pub fn with_channel(channel: impl Into<String>) -> Self {
        Self {
            upload: UploadConfig {
                channel: channel.into(),
                ..UploadConfig::default()
            },
            transport: TransportConfig::default(),
        }
    }

    /// Transport read size used by downloads
    pub fn download_chunk_size(&self) -> u64 {
        (self.upload.chunk_size as u64) * 2
    }

    pub fn validate(&self) -> Result<(), FsError> {
        if self.upload.chunk_size == 0 {
            return Err(FsError::validation("upload chunk size cannot be 0"));
        }
        if self.upload.min_size % self.upload.chunk_size as u64 != 0 {
            return Err(FsError::validation(format!(
                "upload min_size must be a multiple of {} (got {})",
                self.upload.chunk_size, self.upload.min_size
            )));
        }
        if self.upload.channel.trim().is_empty() {
            return Err(FsError::validation("default upload channel is required"));
        }
        Ok(())
    }
}
