//! `DavFileSystem` over the tree and file services

use super::file::{DavDownload, DavUpload};
use chanfs_core::{FileService, FsError, Node, TreeService};
use dav_server::davpath::DavPath;
use dav_server::fs::{
    DavDirEntry, DavFile, DavFileSystem, DavMetaData, FsError as DavError, FsFuture,
    FsResult as DavResult, FsStream, OpenOptions, ReadDirMeta,
};
use std::time::SystemTime;

#[derive(Clone)]
pub struct ChanDavFs {
    tree: TreeService,
    files: FileService,
}

impl ChanDavFs {
    pub fn new(tree: TreeService, files: FileService) -> Self {
        Self { tree, files }
    }

    async fn node(&self, path: &str) -> DavResult<Node> {
        self.tree.resolve(path).await.map_err(dav_error)
    }

    /// Start an upload at `path`, replacing an existing file
    async fn open_for_write(&self, path: &str, options: &OpenOptions) -> DavResult<Box<dyn DavFile>> {
        match self.tree.resolve(path).await {
            Ok(existing) => {
                if options.create_new {
                    return Err(DavError::Exists);
                }
                if existing.is_folder() {
                    return Err(DavError::Forbidden);
                }
                tracing::info!("Replacing '{}' over WebDAV", path);
                let report = self
                    .tree
                    .delete_by_id(&existing.id, false)
                    .await
                    .map_err(dav_error)?;
                if !report.is_success() {
                    return Err(DavError::GeneralFailure);
                }
            }
            Err(FsError::NotFound(_)) if options.create || options.create_new => {}
            Err(FsError::NotFound(_)) => return Err(DavError::NotFound),
            Err(e) => return Err(dav_error(e)),
        }

        let session = self
            .files
            .create_file_with_content(path)
            .await
            .map_err(dav_error)?;
        Ok(Box::new(DavUpload::start(self.tree.clone(), session)))
    }

    async fn remove(&self, path: &DavPath) -> DavResult<()> {
        let report = self
            .tree
            .delete(&tree_path(path), false)
            .await
            .map_err(dav_error)?;
        if report.is_success() {
            Ok(())
        } else {
            Err(DavError::GeneralFailure)
        }
    }
}

impl DavFileSystem for ChanDavFs {
    fn open<'a>(&'a self, path: &'a DavPath, options: OpenOptions) -> FsFuture<'a, Box<dyn DavFile>> {
        Box::pin(async move {
            let path = tree_path(path);
            if options.write {
                if options.append {
                    return Err(DavError::NotImplemented);
                }
                return self.open_for_write(&path, &options).await;
            }

            let node = self.node(&path).await?;
            if node.is_folder() {
                return Err(DavError::Forbidden);
            }
            Ok(Box::new(DavDownload::new(self.files.clone(), node)) as Box<dyn DavFile>)
        })
    }

    fn read_dir<'a>(
        &'a self,
        path: &'a DavPath,
        _meta: ReadDirMeta,
    ) -> FsFuture<'a, FsStream<Box<dyn DavDirEntry>>> {
        Box::pin(async move {
            let children = self
                .tree
                .list_dir(&tree_path(path))
                .await
                .map_err(dav_error)?;
            let entries: Vec<Box<dyn DavDirEntry>> = children
                .iter()
                .map(|child| Box::new(NodeEntry::from(child)) as Box<dyn DavDirEntry>)
                .collect();
            Ok(Box::pin(tokio_stream::iter(entries.into_iter().map(Ok))) as FsStream<Box<dyn DavDirEntry>>)
        })
    }

    fn metadata<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, Box<dyn DavMetaData>> {
        Box::pin(async move {
            let node = self.node(&tree_path(path)).await?;
            Ok(Box::new(NodeMeta::from(&node)) as Box<dyn DavMetaData>)
        })
    }

    fn create_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            self.tree
                .create(&tree_path(path), true)
                .await
                .map_err(dav_error)?;
            Ok(())
        })
    }

    fn remove_dir<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(self.remove(path))
    }

    fn remove_file<'a>(&'a self, path: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(self.remove(path))
    }

    fn rename<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            self.tree
                .move_node(&tree_path(from), &tree_path(to))
                .await
                .map_err(dav_error)?;
            Ok(())
        })
    }

    fn copy<'a>(&'a self, from: &'a DavPath, to: &'a DavPath) -> FsFuture<'a, ()> {
        Box::pin(async move {
            self.tree
                .copy_node(&tree_path(from), &tree_path(to))
                .await
                .map_err(dav_error)?;
            Ok(())
        })
    }
}

/// Tree path of a share path, without the trailing slash of collections
pub(super) fn tree_path(path: &DavPath) -> String {
    let raw = String::from_utf8_lossy(path.as_bytes());
    let trimmed = raw.trim_end_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    }
}

pub(super) fn dav_error(error: FsError) -> DavError {
    match error {
        FsError::NotFound(_) => DavError::NotFound,
        FsError::Conflict(_) => DavError::Exists,
        FsError::Validation(_) => DavError::Forbidden,
        other => {
            tracing::error!("WebDAV operation failed: {}", other);
            DavError::GeneralFailure
        }
    }
}

#[derive(Debug, Clone)]
pub(super) struct NodeMeta {
    pub(super) len: u64,
    modified: SystemTime,
    created: SystemTime,
    is_dir: bool,
}

impl From<&Node> for NodeMeta {
    fn from(node: &Node) -> Self {
        Self {
            len: node.size(),
            modified: node.modified_at.into(),
            created: node.created_at.into(),
            is_dir: node.is_folder(),
        }
    }
}

impl DavMetaData for NodeMeta {
    fn len(&self) -> u64 {
        self.len
    }

    fn modified(&self) -> DavResult<SystemTime> {
        Ok(self.modified)
    }

    fn is_dir(&self) -> bool {
        self.is_dir
    }

    fn created(&self) -> DavResult<SystemTime> {
        Ok(self.created)
    }
}

struct NodeEntry {
    name: String,
    meta: NodeMeta,
}

impl From<&Node> for NodeEntry {
    fn from(node: &Node) -> Self {
        Self {
            name: node.filename.clone(),
            meta: NodeMeta::from(node),
        }
    }
}

impl DavDirEntry for NodeEntry {
    fn name(&self) -> Vec<u8> {
        self.name.as_bytes().to_vec()
    }

    fn metadata(&self) -> FsFuture<'_, Box<dyn DavMetaData>> {
        let meta = self.meta.clone();
        Box::pin(async move { Ok(Box::new(meta) as Box<dyn DavMetaData>) })
    }
}
