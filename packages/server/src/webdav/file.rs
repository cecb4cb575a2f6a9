//! Open file handles of the share
//!
//! Reads are served from a read-ahead window fetched with one ranged read,
//! so the small reads of the protocol layer do not each reach the provider.
//! Writes are piped into an upload session running on its own task; the
//! file becomes active when the handle is flushed.

use super::filesystem::{dav_error, NodeMeta};
use bytes::{Buf, Bytes};
use chanfs_core::transfer::{AbortHandle, ByteRange, WriterSink};
use chanfs_core::{FileService, FsError, FsResult, Node, TreeService, UploadSession};
use dav_server::fs::{DavFile, DavMetaData, FsError as DavError, FsFuture};
use std::fmt;
use std::io::SeekFrom;
use tokio::io::{AsyncWriteExt, DuplexStream};
use tokio::task::JoinHandle;

const READ_AHEAD: u64 = 1024 * 1024;
const UPLOAD_PIPE_CAPACITY: usize = 256 * 1024;

pub(super) struct DavDownload {
    files: FileService,
    node: Node,
    pos: u64,
    window_start: u64,
    window: Bytes,
}

impl DavDownload {
    pub(super) fn new(files: FileService, node: Node) -> Self {
        Self {
            files,
            node,
            pos: 0,
            window_start: 0,
            window: Bytes::new(),
        }
    }

    fn buffered(&self) -> bool {
        self.pos >= self.window_start && self.pos < self.window_start + self.window.len() as u64
    }

    async fn fill(&mut self) -> Result<(), DavError> {
        let size = self.node.size();
        let end = (self.pos + READ_AHEAD).min(size) - 1;
        let range = ByteRange::new(self.pos, end, size).map_err(|e| dav_error(FsError::from(e)))?;

        let mut sink = WriterSink::new(Vec::new());
        self.files
            .read_node_content(&self.node, Some(range), &mut sink)
            .await
            .map_err(dav_error)?;
        self.window_start = self.pos;
        self.window = Bytes::from(sink.into_inner());
        Ok(())
    }
}

impl fmt::Debug for DavDownload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DavDownload")
            .field("node", &self.node.id)
            .field("pos", &self.pos)
            .finish()
    }
}

impl DavFile for DavDownload {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = NodeMeta::from(&self.node);
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }

    fn write_buf(&mut self, _buf: Box<dyn Buf + Send>) -> FsFuture<'_, ()> {
        Box::pin(async { Err(DavError::Forbidden) })
    }

    fn write_bytes(&mut self, _buf: Bytes) -> FsFuture<'_, ()> {
        Box::pin(async { Err(DavError::Forbidden) })
    }

    fn read_bytes(&mut self, count: usize) -> FsFuture<'_, Bytes> {
        Box::pin(async move {
            if count == 0 || self.pos >= self.node.size() {
                return Ok(Bytes::new());
            }
            if !self.buffered() {
                self.fill().await?;
            }

            let offset = (self.pos - self.window_start) as usize;
            let end = (offset + count).min(self.window.len());
            let chunk = self.window.slice(offset..end);
            self.pos += chunk.len() as u64;
            Ok(chunk)
        })
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        Box::pin(async move {
            let target = match pos {
                SeekFrom::Start(n) => Some(n),
                SeekFrom::Current(n) => self.pos.checked_add_signed(n),
                SeekFrom::End(n) => self.node.size().checked_add_signed(n),
            };
            self.pos = target.ok_or(DavError::GeneralFailure)?;
            Ok(self.pos)
        })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

pub(super) struct DavUpload {
    tree: TreeService,
    node: Node,
    writer: Option<DuplexStream>,
    task: Option<JoinHandle<FsResult<Node>>>,
    abort: AbortHandle,
    written: u64,
}

impl DavUpload {
    pub(super) fn start(tree: TreeService, session: UploadSession) -> Self {
        let node = session.node().clone();
        let abort = session.abort_handle();
        let (writer, reader) = tokio::io::duplex(UPLOAD_PIPE_CAPACITY);
        let task = tokio::spawn(session.execute(reader));
        Self {
            tree,
            node,
            writer: Some(writer),
            task: Some(task),
            abort,
            written: 0,
        }
    }
}

impl fmt::Debug for DavUpload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DavUpload")
            .field("node", &self.node.id)
            .field("written", &self.written)
            .finish()
    }
}

impl DavFile for DavUpload {
    fn metadata(&mut self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let mut meta = NodeMeta::from(&self.node);
        if self.task.is_some() {
            meta.len = self.written;
        }
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }

    fn write_buf(&mut self, mut buf: Box<dyn Buf + Send>) -> FsFuture<'_, ()> {
        let len = buf.remaining();
        let bytes = buf.copy_to_bytes(len);
        self.write_bytes(bytes)
    }

    fn write_bytes(&mut self, buf: Bytes) -> FsFuture<'_, ()> {
        Box::pin(async move {
            let writer = self.writer.as_mut().ok_or(DavError::GeneralFailure)?;
            if let Err(e) = writer.write_all(&buf).await {
                // The upload task ended and dropped its end of the pipe
                tracing::warn!("WebDAV upload of '{}' stopped: {}", self.node.filename, e);
                return Err(DavError::GeneralFailure);
            }
            self.written += buf.len() as u64;
            Ok(())
        })
    }

    fn read_bytes(&mut self, _count: usize) -> FsFuture<'_, Bytes> {
        Box::pin(async { Err(DavError::Forbidden) })
    }

    fn seek(&mut self, pos: SeekFrom) -> FsFuture<'_, u64> {
        Box::pin(async move {
            match pos {
                SeekFrom::Start(n) if n == self.written => Ok(n),
                SeekFrom::Current(0) | SeekFrom::End(0) => Ok(self.written),
                _ => Err(DavError::NotImplemented),
            }
        })
    }

    fn flush(&mut self) -> FsFuture<'_, ()> {
        Box::pin(async move {
            let Some(task) = self.task.take() else {
                return Ok(());
            };
            if let Some(mut writer) = self.writer.take() {
                if let Err(e) = writer.shutdown().await {
                    tracing::warn!("Failed to close upload pipe of '{}': {}", self.node.filename, e);
                }
            }

            match task.await {
                Ok(Ok(node)) => {
                    tracing::info!("Uploaded '{}' over WebDAV ({} bytes)", node.filename, node.size());
                    self.node = node;
                    Ok(())
                }
                Ok(Err(e)) => Err(dav_error(e)),
                Err(e) => {
                    tracing::error!("Upload task of '{}' failed: {}", self.node.filename, e);
                    Err(DavError::GeneralFailure)
                }
            }
        })
    }
}

impl Drop for DavUpload {
    fn drop(&mut self) {
        let Some(task) = self.task.take() else {
            return;
        };
        tracing::warn!("WebDAV upload of '{}' closed before completion", self.node.filename);
        self.abort.abort();
        self.writer.take();

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let tree = self.tree.clone();
        runtime.spawn(async move {
            // Truncated body completed before the abort was observed
            if let Ok(Ok(node)) = task.await {
                if let Err(e) = discard(&tree, &node.id).await {
                    tracing::error!("Failed to discard truncated upload {}: {}", node.id, e);
                }
            }
        });
    }
}

async fn discard(tree: &TreeService, id: &str) -> FsResult<()> {
    tree.delete_by_id(id, false).await?;
    tree.purge(id).await?;
    Ok(())
}
