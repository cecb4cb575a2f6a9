//! File content service
//!
//! Path-level entry points for file bytes. Uploads create a `TEMP` record
//! first and flip it to `ACTIVE` once the stream is consumed; an aborted or
//! failed upload purges the record. Downloads resolve a byte range and stream
//! it into any [`ByteSink`].

use super::error::{FsError, FsResult};
use super::path_resolver::{last_segment, PathResolver};
use crate::context::FsContext;
use crate::db::{MetadataStore, Mutation, NodeFilter};
use crate::models::{same_filename, Node, NodeState, Part};
use crate::transfer::{
    AbortHandle, ByteRange, ByteSink, ChunkUploader, RangeDownloader, TransferError,
    UploadListener, UploadOutcome, UploadTarget,
};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::Mutex;

#[derive(Clone)]
pub struct FileService {
    ctx: FsContext,
    resolver: PathResolver,
}

impl FileService {
    pub fn new(ctx: FsContext) -> Self {
        let resolver = PathResolver::new(ctx.store().clone(), ctx.default_channel());
        Self { ctx, resolver }
    }

    /// Register a `TEMP` file at `path` and return the session that uploads
    /// its bytes
    ///
    /// Missing parent folders are created. An active sibling with the same
    /// name is a conflict; temporary or deleted ones are purged first.
    pub async fn create_file_with_content(&self, path: &str) -> FsResult<UploadSession> {
        let name = last_segment(path)
            .ok_or_else(|| FsError::validation("a file path needs a filename"))?;

        let mut tx = self.ctx.transaction();
        let mut parent = self
            .resolver
            .create_folder_recursive_in(&mut tx, path, true)
            .await?;

        let siblings = tx.get_children(&parent.id, &NodeFilter::any_state()).await?;
        for sibling in siblings.iter().filter(|n| same_filename(&n.filename, &name)) {
            if sibling.is_active() {
                return Err(FsError::conflict(format!("'{}' already exists", path)));
            }
            if sibling.is_file() {
                tracing::info!(
                    "Purging {} record of '{}' before upload",
                    sibling.state,
                    sibling.filename
                );
                tx.delete(&sibling.id);
            }
        }

        let channel = self.resolver.effective_channel_in(&tx, &parent).await?;
        let mut node = Node::new_file(&name, &parent.id, Some(channel.clone()));
        node.state = NodeState::Temp;

        parent.touch();
        tx.update(parent);
        tx.insert(node.clone());
        tx.commit().await?;

        let upload = &self.ctx.config().upload;
        let target = UploadTarget {
            channel,
            filename: node.filename.clone(),
            mime: node.mime().unwrap_or_default().to_string(),
        };
        let uploader = ChunkUploader::new(
            self.ctx.clients().next_client(false),
            target,
            upload.chunk_size,
            upload.min_size,
        );
        tracing::info!("Upload session opened for '{}'", path);

        Ok(UploadSession {
            store: self.ctx.store().clone(),
            node,
            uploader,
        })
    }

    /// Create `path` and upload `source` into it in one call
    pub async fn upload<R>(&self, path: &str, source: R) -> FsResult<Node>
    where
        R: AsyncRead + Unpin + Send,
    {
        self.create_file_with_content(path)
            .await?
            .execute(source)
            .await
    }

    /// Stream `range` of the file at `path` into `sink`
    ///
    /// `None` streams the whole file. Returns the number of bytes written.
    pub async fn read_file_content(
        &self,
        path: &str,
        range: Option<ByteRange>,
        sink: &mut dyn ByteSink,
    ) -> FsResult<u64> {
        let node = self.resolve_file(path).await?;
        self.read_node_content(&node, range, sink).await
    }

    pub async fn read_file_by_id(
        &self,
        id: &str,
        range: Option<ByteRange>,
        sink: &mut dyn ByteSink,
    ) -> FsResult<u64> {
        let node = match self.ctx.store().get_node(id).await? {
            Some(node) if node.is_active() && node.is_file() => node,
            _ => return Err(FsError::not_found(id)),
        };
        self.read_node_content(&node, range, sink).await
    }

    pub async fn read_node_content(
        &self,
        node: &Node,
        range: Option<ByteRange>,
        sink: &mut dyn ByteSink,
    ) -> FsResult<u64> {
        let data = node
            .file()
            .ok_or_else(|| FsError::not_found(format!("file {}", node.id)))?;
        let range = match range {
            Some(range) => Some(range),
            None => ByteRange::full(data.size()),
        };
        let channel = match &node.channel {
            Some(channel) => channel.clone(),
            None => self.resolver.effective_channel(node).await?,
        };

        let downloader = RangeDownloader::new(
            self.ctx.clients().next_client(true),
            channel,
            self.ctx.config().download_chunk_size(),
        );
        let written = downloader.execute(data, range, sink).await?;
        tracing::debug!("Streamed {} byte(s) of '{}'", written, node.filename);
        Ok(written)
    }

    /// Byte range of `node` requested as `start..=end`
    ///
    /// No start means the whole file (`None` for an empty one); a missing end
    /// runs to the last byte.
    pub fn resolve_range(
        &self,
        node: &Node,
        start: Option<u64>,
        end: Option<u64>,
    ) -> FsResult<Option<ByteRange>> {
        let size = node.size();
        let Some(start) = start else {
            return Ok(ByteRange::full(size));
        };
        let end = end.unwrap_or(size.saturating_sub(1));
        Ok(Some(ByteRange::new(start, end, size)?))
    }

    /// Active file at `path`
    pub async fn resolve_file(&self, path: &str) -> FsResult<Node> {
        match self.resolver.resolve(path).await? {
            Some(node) if node.is_file() => Ok(node),
            _ => Err(FsError::not_found(path)),
        }
    }

    pub async fn size(&self, path: &str) -> FsResult<u64> {
        Ok(self.resolve_file(path).await?.size())
    }

    /// True when a node in `state` exists at `path`
    pub async fn exists(&self, path: &str, state: NodeState) -> FsResult<bool> {
        let node = self
            .resolver
            .resolve_in(
                &self.ctx.transaction(),
                path,
                &NodeFilter::with_states(&[state]),
            )
            .await?;
        Ok(node.is_some())
    }
}

/// Pending upload of one `TEMP` file record
pub struct UploadSession {
    store: Arc<dyn MetadataStore>,
    node: Node,
    uploader: ChunkUploader,
}

impl UploadSession {
    /// The `TEMP` record this session fills
    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn abort_handle(&self) -> AbortHandle {
        self.uploader.abort_handle()
    }

    /// Upload `source` and return the now active node
    pub async fn execute<R>(self, source: R) -> FsResult<Node>
    where
        R: AsyncRead + Unpin + Send,
    {
        let listener = NodeUploadListener {
            store: self.store,
            node: Mutex::new(self.node),
        };
        self.uploader.execute(source, &listener).await?;
        Ok(listener.node.into_inner())
    }
}

/// Keeps the file record in step with upload progress
struct NodeUploadListener {
    store: Arc<dyn MetadataStore>,
    node: Mutex<Node>,
}

#[async_trait]
impl UploadListener for NodeUploadListener {
    async fn on_portion(&self, part: &Part) -> anyhow::Result<()> {
        let mut node = self.node.lock().await;
        if let Some(data) = node.file_mut() {
            data.parts.push(part.clone());
        }
        node.touch();
        self.store
            .commit(vec![Mutation::Update(node.clone())])
            .await?;
        tracing::debug!("Recorded part {} of '{}'", part.index, node.filename);
        Ok(())
    }

    async fn on_complete(&self, outcome: &UploadOutcome) -> anyhow::Result<()> {
        let mut node = self.node.lock().await;
        if let Some(data) = node.file_mut() {
            match outcome {
                UploadOutcome::Inline(bytes) => {
                    data.content = Some(bytes.to_vec());
                    data.parts.clear();
                }
                UploadOutcome::Hosted(parts) => {
                    data.content = None;
                    data.parts = parts.clone();
                }
            }
        }
        node.state = NodeState::Active;
        node.touch();
        self.store
            .commit(vec![Mutation::Update(node.clone())])
            .await?;
        tracing::info!("Uploaded '{}' ({} bytes)", node.filename, node.size());
        Ok(())
    }

    async fn on_aborted(&self, error: &TransferError) {
        let node = self.node.lock().await;
        tracing::warn!("Discarding '{}' after failed upload: {}", node.filename, error);
        if let Err(e) = self
            .store
            .commit(vec![Mutation::Delete {
                id: node.id.clone(),
            }])
            .await
        {
            tracing::error!("Failed to purge temporary record '{}': {}", node.id, e);
        }
    }
}
