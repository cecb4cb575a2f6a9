//! Loopback Transport
//!
//! `MemoryProvider` simulates the messaging provider in process: channels
//! holding numbered messages, finalized blobs, and pending chunk uploads.
//! Every `MemoryTransport` handed out by a provider is one logged-in session
//! sharing that state, so bytes uploaded by a user session are readable by a
//! bot session exactly as with the real provider.
//!
//! The provider also supports failure injection so tests can exercise abort,
//! mismatch and unavailability paths.

use super::blob_transport::{
    BlobTransport, ClientIdentity, MediaDescriptor, SentMessage, TransportError,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct StoredMessage {
    /// `None` for text messages
    blob_id: Option<String>,
    filename: String,
    text: Option<String>,
}

#[derive(Debug, Default)]
struct ChannelState {
    next_message_id: i64,
    messages: BTreeMap<i64, StoredMessage>,
}

#[derive(Debug, Default)]
struct FailurePlan {
    /// Remaining successful `upload_part` calls before every call fails
    uploads_before_failure: Option<usize>,
    fail_reads: bool,
    fail_forwards: bool,
}

#[derive(Debug, Default)]
struct ProviderState {
    channels: HashMap<String, ChannelState>,
    pending: HashMap<String, BTreeMap<u32, Bytes>>,
    blobs: HashMap<String, Bytes>,
    failures: FailurePlan,
    upload_calls: usize,
}

impl ProviderState {
    fn channel_mut(&mut self, channel: &str) -> Result<&mut ChannelState, TransportError> {
        self.channels
            .get_mut(channel)
            .ok_or_else(|| TransportError::ChannelNotFound(channel.to_string()))
    }

    fn message(&self, channel: &str, message_id: i64) -> Result<&StoredMessage, TransportError> {
        self.channels
            .get(channel)
            .ok_or_else(|| TransportError::ChannelNotFound(channel.to_string()))?
            .messages
            .get(&message_id)
            .ok_or_else(|| TransportError::message_not_found(channel, message_id))
    }

    fn post(&mut self, channel: &str, message: StoredMessage) -> Result<i64, TransportError> {
        let state = self.channel_mut(channel)?;
        state.next_message_id += 1;
        let id = state.next_message_id;
        state.messages.insert(id, message);
        Ok(id)
    }

    fn relay(
        &mut self,
        channel: &str,
        message_id: i64,
        dest_channel: &str,
    ) -> Result<SentMessage, TransportError> {
        if self.failures.fail_forwards {
            return Err(TransportError::request("forward rejected"));
        }
        let original = self.message(channel, message_id)?.clone();
        let blob_id = original
            .blob_id
            .clone()
            .ok_or_else(|| TransportError::request("message has no media"))?;
        let size = self.blobs.get(&blob_id).map(|b| b.len() as u64).unwrap_or(0);
        let filename = original.filename.clone();
        let new_id = self.post(dest_channel, original)?;
        Ok(SentMessage {
            message_id: new_id,
            blob_id,
            filename,
            size,
        })
    }
}

/// Shared in-process provider state
#[derive(Clone, Default)]
pub struct MemoryProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider with the given channels already created
    pub fn with_channels(channels: &[&str]) -> Self {
        let mut state = ProviderState::default();
        for channel in channels {
            state
                .channels
                .insert(channel.to_string(), ChannelState::default());
        }
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub async fn create_channel(&self, channel: &str) {
        self.state
            .lock()
            .await
            .channels
            .entry(channel.to_string())
            .or_default();
    }

    /// A session logged in as `identity`
    pub fn client(&self, identity: ClientIdentity) -> Arc<dyn BlobTransport> {
        Arc::new(MemoryTransport {
            identity,
            provider: self.clone(),
        })
    }

    /// Number of messages currently in `channel`
    pub async fn message_count(&self, channel: &str) -> usize {
        self.state
            .lock()
            .await
            .channels
            .get(channel)
            .map(|c| c.messages.len())
            .unwrap_or(0)
    }

    pub async fn has_message(&self, channel: &str, message_id: i64) -> bool {
        self.state.lock().await.message(channel, message_id).is_ok()
    }

    /// Text messages posted to `channel`, in order
    pub async fn texts(&self, channel: &str) -> Vec<String> {
        self.state
            .lock()
            .await
            .channels
            .get(channel)
            .map(|c| c.messages.values().filter_map(|m| m.text.clone()).collect())
            .unwrap_or_default()
    }

    /// Total `upload_part` calls made through any session
    pub async fn upload_calls(&self) -> usize {
        self.state.lock().await.upload_calls
    }

    /// Point a message at a different blob, as if edited out of band
    pub async fn replace_media(&self, channel: &str, message_id: i64, data: &[u8]) {
        let mut state = self.state.lock().await;
        let blob_id = uuid::Uuid::new_v4().simple().to_string();
        state
            .blobs
            .insert(blob_id.clone(), Bytes::copy_from_slice(data));
        if let Some(message) = state
            .channels
            .get_mut(channel)
            .and_then(|c| c.messages.get_mut(&message_id))
        {
            message.blob_id = Some(blob_id);
        }
    }

    /// Let `n` more part uploads succeed, then fail every following one
    pub async fn fail_uploads_after(&self, n: usize) {
        self.state.lock().await.failures.uploads_before_failure = Some(n);
    }

    pub async fn fail_reads(&self, fail: bool) {
        self.state.lock().await.failures.fail_reads = fail;
    }

    pub async fn fail_forwards(&self, fail: bool) {
        self.state.lock().await.failures.fail_forwards = fail;
    }
}

/// One session against a [`MemoryProvider`]
pub struct MemoryTransport {
    identity: ClientIdentity,
    provider: MemoryProvider,
}

impl MemoryTransport {
    fn access_token(blob_id: &str) -> String {
        format!("mem-{}", blob_id)
    }
}

#[async_trait]
impl BlobTransport for MemoryTransport {
    fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    async fn upload_part(
        &self,
        blob_id: &str,
        part_index: u32,
        total_parts: Option<u32>,
        bytes: Bytes,
    ) -> Result<(), TransportError> {
        let mut state = self.provider.state.lock().await;
        state.upload_calls += 1;

        if let Some(remaining) = state.failures.uploads_before_failure.as_mut() {
            if *remaining == 0 {
                return Err(TransportError::request("upload rejected"));
            }
            *remaining -= 1;
        }

        let max = self.identity.max_upload_parts;
        if part_index >= max || total_parts.is_some_and(|t| t > max) {
            return Err(TransportError::TooManyParts {
                blob_id: blob_id.to_string(),
                max,
            });
        }

        state
            .pending
            .entry(blob_id.to_string())
            .or_default()
            .insert(part_index, bytes);
        Ok(())
    }

    async fn send(
        &self,
        channel: &str,
        blob_id: &str,
        total_parts: u32,
        filename: &str,
        _mime: &str,
    ) -> Result<SentMessage, TransportError> {
        let mut state = self.provider.state.lock().await;
        state.channel_mut(channel)?;

        let parts = state
            .pending
            .remove(blob_id)
            .ok_or_else(|| TransportError::BlobNotFound(blob_id.to_string()))?;

        let contiguous = parts.keys().copied().eq(0..total_parts);
        if !contiguous {
            let received = parts.len() as u32;
            state.pending.insert(blob_id.to_string(), parts);
            return Err(TransportError::IncompleteBlob {
                blob_id: blob_id.to_string(),
                expected: total_parts,
                received,
            });
        }

        let mut data = BytesMut::new();
        for chunk in parts.values() {
            data.extend_from_slice(chunk);
        }
        let size = data.len() as u64;
        state.blobs.insert(blob_id.to_string(), data.freeze());

        let message_id = state.post(
            channel,
            StoredMessage {
                blob_id: Some(blob_id.to_string()),
                filename: filename.to_string(),
                text: None,
            },
        )?;

        tracing::debug!(
            "{} sent blob {} as message {} in {}",
            self.identity.name,
            blob_id,
            message_id,
            channel
        );

        Ok(SentMessage {
            message_id,
            blob_id: blob_id.to_string(),
            filename: filename.to_string(),
            size,
        })
    }

    async fn fetch_media(
        &self,
        channel: &str,
        message_id: i64,
    ) -> Result<Option<MediaDescriptor>, TransportError> {
        let state = self.provider.state.lock().await;
        if state.failures.fail_reads {
            return Err(TransportError::request("fetch rejected"));
        }
        let message = match state.message(channel, message_id) {
            Ok(message) => message,
            Err(TransportError::MessageNotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };
        Ok(message.blob_id.as_ref().map(|blob_id| MediaDescriptor {
            blob_id: blob_id.clone(),
            access_token: Self::access_token(blob_id),
            size: state.blobs.get(blob_id).map(|b| b.len() as u64).unwrap_or(0),
        }))
    }

    async fn read_bytes(
        &self,
        blob_id: &str,
        access_token: &str,
        offset: u64,
        limit: u64,
    ) -> Result<Bytes, TransportError> {
        let state = self.provider.state.lock().await;
        if state.failures.fail_reads {
            return Err(TransportError::request("read rejected"));
        }
        if access_token != Self::access_token(blob_id) {
            return Err(TransportError::InvalidAccessToken(blob_id.to_string()));
        }
        let blob = state
            .blobs
            .get(blob_id)
            .ok_or_else(|| TransportError::BlobNotFound(blob_id.to_string()))?;

        let len = blob.len() as u64;
        let start = offset.min(len);
        let end = offset.saturating_add(limit).min(len);
        Ok(blob.slice(start as usize..end as usize))
    }

    async fn forward(
        &self,
        channel: &str,
        message_id: i64,
        dest_channel: &str,
    ) -> Result<SentMessage, TransportError> {
        self.provider
            .state
            .lock()
            .await
            .relay(channel, message_id, dest_channel)
    }

    async fn copy(
        &self,
        channel: &str,
        message_id: i64,
        dest_channel: &str,
    ) -> Result<SentMessage, TransportError> {
        self.provider
            .state
            .lock()
            .await
            .relay(channel, message_id, dest_channel)
    }

    async fn delete(&self, channel: &str, message_id: i64) -> Result<(), TransportError> {
        let mut state = self.provider.state.lock().await;
        state
            .channel_mut(channel)?
            .messages
            .remove(&message_id)
            .map(|_| ())
            .ok_or_else(|| TransportError::message_not_found(channel, message_id))
    }

    async fn send_text(&self, channel: &str, text: &str) -> Result<i64, TransportError> {
        self.provider.state.lock().await.post(
            channel,
            StoredMessage {
                blob_id: None,
                filename: String::new(),
                text: Some(text.to_string()),
            },
        )
    }
}
