//! Tree Operations
//!
//! Every mutation of the folder/file tree goes through `TreeService`:
//! create, rename, move, copy, delete, purge and part merging.
//!
//! # Architecture
//!
//! - **One transaction per logical operation**: writes are staged in a
//!   [`Transaction`] and committed once, so a failure half way leaves no
//!   partially relocated node visible.
//! - **Provider side effects are outside the transaction**: forwarding,
//!   copying and deleting messages happen before (re-hosting) or after
//!   (deleting originals) the commit and are not compensated if a later step
//!   fails.
//! - **Soft delete first**: `delete` marks nodes `DELETED`; `purge` is the
//!   separate hard removal.
//!
//! # Examples
//!
//! ```rust,no_run
//! # use chanfs_core::services::TreeService;
//! # async fn demo(tree: TreeService) -> chanfs_core::services::FsResult<()> {
//! tree.create("/docs", true).await?;
//! tree.copy_node("/docs", "/backup").await?;
//! let report = tree.delete("/docs", false).await?;
//! assert!(report.is_success());
//! # Ok(())
//! # }
//! ```

use super::error::{FsError, FsResult};
use super::path_resolver::{last_segment, split_path, PathResolver};
use crate::context::FsContext;
use crate::db::{DescendantEntry, NodeFilter, Transaction};
use crate::models::{normalize_filename, same_filename, Node, NodeState, Part};
use crate::transport::{BlobTransport, Pacer};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Outcome of one item of a delete
#[derive(Debug, Clone, Serialize)]
pub struct DeleteItem {
    pub id: String,
    pub path: String,
    pub is_folder: bool,
    pub error: Option<String>,
}

/// Per-item summary of a delete
#[derive(Debug, Clone, Default, Serialize)]
pub struct DeleteReport {
    pub simulated: bool,
    pub succeeded: usize,
    pub failed: usize,
    pub items: Vec<DeleteItem>,
}

impl DeleteReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    fn record(&mut self, node: &Node, path: String, result: FsResult<()>) {
        let error = match result {
            Ok(()) => {
                self.succeeded += 1;
                None
            }
            Err(e) => {
                tracing::error!("Failed to delete '{}': {}", path, e);
                self.failed += 1;
                Some(e.to_string())
            }
        };
        self.items.push(DeleteItem {
            id: node.id.clone(),
            path,
            is_folder: node.is_folder(),
            error,
        });
    }
}

/// Success/failure counts of a bulk operation
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// A document posted straight to a channel, outside of any upload
#[derive(Debug, Clone)]
pub struct ChannelPost {
    pub channel: String,
    pub message_id: i64,
    pub filename: String,
    pub blob_id: String,
    pub size: u64,
    /// MIME type reported by the provider, guessed from the name if absent
    pub mime: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Relay {
    Forward,
    Copy,
}

/// Messages to delete once a move has committed
type StaleParts = Vec<(String, Part)>;

#[derive(Clone)]
pub struct TreeService {
    ctx: FsContext,
    resolver: PathResolver,
}

impl TreeService {
    pub fn new(ctx: FsContext) -> Self {
        let resolver = PathResolver::new(ctx.store().clone(), ctx.default_channel());
        Self { ctx, resolver }
    }

    pub fn resolver(&self) -> &PathResolver {
        &self.resolver
    }

    pub fn context(&self) -> &FsContext {
        &self.ctx
    }

    fn pacer(&self) -> Pacer {
        let transport = &self.ctx.config().transport;
        Pacer::new(transport.batch_size, transport.batch_pause())
    }

    /// Active node at `path`
    pub async fn resolve(&self, path: &str) -> FsResult<Node> {
        self.resolver
            .resolve(path)
            .await?
            .ok_or_else(|| FsError::not_found(path))
    }

    /// Active node by id
    pub async fn get_node(&self, id: &str) -> FsResult<Node> {
        active_node(&self.ctx.transaction(), id).await
    }

    // ------------------------------------------------------------------
    // Creation and listing
    // ------------------------------------------------------------------

    /// Create an empty folder or file at `path`
    ///
    /// The parent must exist. Files get the effective channel of their
    /// parent and empty inline content.
    pub async fn create(&self, path: &str, is_folder: bool) -> FsResult<Node> {
        let name = last_segment(path)
            .ok_or_else(|| FsError::validation("the root folder already exists"))?;
        let mut tx = self.ctx.transaction();
        let parent = self
            .resolver
            .get_last_folder_in(&tx, path, true)
            .await?
            .ok_or_else(|| FsError::not_found(format!("parent folder of '{}'", path)))?;
        let node = self.insert_child(&mut tx, parent, &name, is_folder).await?;
        tx.commit().await?;
        Ok(node)
    }

    pub async fn create_folder(&self, parent_id: &str, name: &str) -> FsResult<Node> {
        let mut tx = self.ctx.transaction();
        let parent = active_folder(&tx, parent_id).await?;
        let node = self.insert_child(&mut tx, parent, name, true).await?;
        tx.commit().await?;
        Ok(node)
    }

    async fn insert_child(
        &self,
        tx: &mut Transaction,
        mut parent: Node,
        name: &str,
        is_folder: bool,
    ) -> FsResult<Node> {
        let name = normalize_filename(name.trim());
        if name.is_empty() {
            return Err(FsError::validation("filename cannot be empty"));
        }
        if tx
            .find_child(&parent.id, &name, &NodeFilter::active())
            .await?
            .is_some()
        {
            return Err(FsError::conflict(format!(
                "'{}' already exists in '{}'",
                name, parent.filename
            )));
        }

        let node = if is_folder {
            Node::new_folder(&name, &parent.id)
        } else {
            let channel = self.resolver.effective_channel_in(tx, &parent).await?;
            let mut file = Node::new_file(&name, &parent.id, Some(channel));
            if let Some(data) = file.file_mut() {
                data.content = Some(Vec::new());
            }
            file
        };

        parent.touch();
        tx.update(parent);
        tx.insert(node.clone());
        tracing::info!("Created {} '{}'", node.type_name(), node.filename);
        Ok(node)
    }

    /// Active children of the folder at `path`
    pub async fn list_dir(&self, path: &str) -> FsResult<Vec<Node>> {
        let folder = self
            .resolver
            .get_last_folder(path, false)
            .await?
            .ok_or_else(|| FsError::not_found(path))?;
        Ok(self
            .ctx
            .store()
            .get_children(&folder.id, &NodeFilter::active())
            .await?)
    }

    /// Active children of folder `id`
    pub async fn list_folder(&self, id: &str) -> FsResult<Vec<Node>> {
        let tx = self.ctx.transaction();
        let folder = active_folder(&tx, id).await?;
        Ok(tx.get_children(&folder.id, &NodeFilter::active()).await?)
    }

    pub async fn find_files_by_message(&self, channel: &str, message_id: i64) -> FsResult<Vec<Node>> {
        Ok(self
            .ctx
            .store()
            .find_files_by_message(channel, message_id)
            .await?)
    }

    pub async fn find_folders_by_channel(&self, channel: &str) -> FsResult<Vec<Node>> {
        Ok(self.ctx.store().find_folders_by_channel(channel).await?)
    }

    /// Record a document that was posted directly to a channel
    ///
    /// The file lands in the first active folder mapped to the channel, or
    /// in the root when none is. Returns `None` when the message is already
    /// part of a file.
    pub async fn register_channel_post(&self, post: ChannelPost) -> FsResult<Option<Node>> {
        if !self
            .find_files_by_message(&post.channel, post.message_id)
            .await?
            .is_empty()
        {
            tracing::info!(
                "Message {} of {} ('{}') is already recorded",
                post.message_id,
                post.channel,
                post.filename
            );
            return Ok(None);
        }

        let mut tx = self.ctx.transaction();
        let mapped = self
            .find_folders_by_channel(&post.channel)
            .await?
            .into_iter()
            .find(|folder| folder.is_active());
        let mut parent = match mapped {
            Some(folder) => folder,
            None => active_folder(&tx, crate::models::ROOT_ID).await?,
        };

        let requested = normalize_filename(post.filename.trim());
        if requested.is_empty() {
            return Err(FsError::validation("channel post has no filename"));
        }
        let name = self
            .calculate_filename_for_copy_in(&tx, &parent.id, &requested, false)
            .await?;

        let mut node = Node::new_file(&name, &parent.id, Some(post.channel.clone()));
        if let Some(data) = node.file_mut() {
            if let Some(mime) = post.mime.filter(|m| !m.is_empty()) {
                data.mime = mime;
            }
            data.content = None;
            data.parts = vec![Part {
                messageid: post.message_id,
                fileid: post.blob_id,
                originalfilename: post.filename.clone(),
                size: post.size,
                index: 0,
                hash: String::new(),
            }];
        }

        tracing::info!("Registering '{}' from {} in '{}'", name, post.channel, parent.filename);
        parent.touch();
        tx.update(parent);
        tx.insert(node.clone());
        tx.commit().await?;
        Ok(Some(node))
    }

    // ------------------------------------------------------------------
    // Renaming and name collisions
    // ------------------------------------------------------------------

    pub async fn rename(&self, id: &str, new_name: &str) -> FsResult<Node> {
        let mut tx = self.ctx.transaction();
        let mut node = active_node(&tx, id).await?;
        if node.is_root() {
            return Err(FsError::validation("the root folder cannot be renamed"));
        }
        let name = normalize_filename(new_name.trim());
        if name.is_empty() {
            return Err(FsError::validation("filename cannot be empty"));
        }

        let parent_id = node.parent_id.clone().unwrap_or_default();
        if let Some(existing) = tx.find_child(&parent_id, &name, &NodeFilter::active()).await? {
            if existing.id != node.id {
                return Err(FsError::conflict(format!("'{}' already exists", name)));
            }
        }

        tracing::info!("Renaming '{}' to '{}'", node.filename, name);
        node.filename = name;
        node.touch();
        tx.update(node.clone());
        tx.commit().await?;
        Ok(node)
    }

    /// First free variant of `name` among the active children of `parent_id`
    ///
    /// Files get `" - N"` before the extension, folders after the name.
    pub async fn calculate_filename_for_copy(
        &self,
        parent_id: &str,
        name: &str,
        is_folder: bool,
    ) -> FsResult<String> {
        self.calculate_filename_for_copy_in(&self.ctx.transaction(), parent_id, name, is_folder)
            .await
    }

    async fn calculate_filename_for_copy_in(
        &self,
        tx: &Transaction,
        parent_id: &str,
        name: &str,
        is_folder: bool,
    ) -> FsResult<String> {
        let siblings = tx.get_children(parent_id, &NodeFilter::active()).await?;
        let taken = |candidate: &str| siblings.iter().any(|n| same_filename(&n.filename, candidate));
        if !taken(name) {
            return Ok(name.to_string());
        }

        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) if !is_folder && !stem.is_empty() => (stem, Some(ext)),
            _ => (name, None),
        };
        let mut n = 1u32;
        loop {
            let candidate = match ext {
                Some(ext) => format!("{} - {}.{}", stem, n, ext),
                None => format!("{} - {}", stem, n),
            };
            if !taken(&candidate) {
                return Ok(candidate);
            }
            n += 1;
        }
    }

    // ------------------------------------------------------------------
    // Move and copy
    // ------------------------------------------------------------------

    /// Move the node at `from` to `to`, keeping its id
    pub async fn move_node(&self, from: &str, to: &str) -> FsResult<Node> {
        self.move_or_copy(from, to, true).await
    }

    /// Duplicate the node at `from` to `to` under a new id
    pub async fn copy_node(&self, from: &str, to: &str) -> FsResult<Node> {
        self.move_or_copy(from, to, false).await
    }

    async fn move_or_copy(&self, from: &str, to: &str, is_move: bool) -> FsResult<Node> {
        let mut tx = self.ctx.transaction();
        let source = self
            .resolver
            .resolve_in(&tx, from, &NodeFilter::active())
            .await?
            .ok_or_else(|| FsError::not_found(from))?;

        let (dest_parent, requested_name) = match split_path(to).pop() {
            None => (active_folder(&tx, crate::models::ROOT_ID).await?, None),
            Some(last) => {
                let parent = self
                    .resolver
                    .get_last_folder_in(&tx, to, true)
                    .await?
                    .ok_or_else(|| {
                        FsError::conflict(format!("destination path '{}' does not exist", to))
                    })?;
                match tx.find_child(&parent.id, &last, &NodeFilter::active()).await? {
                    // Existing folder: move/copy into it under the original name
                    Some(existing) if existing.is_folder() && existing.id != source.id => {
                        (existing, None)
                    }
                    _ => (parent, Some(last)),
                }
            }
        };

        tracing::info!(
            "{} '{}' to '{}'",
            if is_move { "Moving" } else { "Copying" },
            from,
            to
        );

        let (node, stale) = self
            .relocate(&mut tx, source, dest_parent, requested_name, is_move)
            .await?;
        tx.commit().await?;
        self.delete_stale_messages(stale).await;
        Ok(node)
    }

    /// Move several nodes into one folder, continuing past failures
    pub async fn move_items(&self, ids: &[String], dest_folder_id: &str) -> FsResult<BatchReport> {
        active_folder(&self.ctx.transaction(), dest_folder_id).await?;

        let mut report = BatchReport::default();
        for id in ids {
            let result = async {
                let mut tx = self.ctx.transaction();
                let node = active_node(&tx, id).await?;
                let dest = active_folder(&tx, dest_folder_id).await?;
                let (_, stale) = self.relocate(&mut tx, node, dest, None, true).await?;
                tx.commit().await?;
                self.delete_stale_messages(stale).await;
                Ok::<(), FsError>(())
            }
            .await;

            match result {
                Ok(()) => report.succeeded += 1,
                Err(e) => {
                    tracing::error!("Failed to move '{}': {}", id, e);
                    report.failed += 1;
                    report.errors.push(format!("{}: {}", id, e));
                }
            }
        }
        tracing::info!(
            "Moved {} item(s) into '{}', {} failed",
            report.succeeded,
            dest_folder_id,
            report.failed
        );
        Ok(report)
    }

    /// Stage the relocation of `source` under `dest_parent`
    ///
    /// Returns the resulting node and, for moves, the original messages to
    /// delete after commit.
    async fn relocate(
        &self,
        tx: &mut Transaction,
        source: Node,
        dest_parent: Node,
        name: Option<String>,
        is_move: bool,
    ) -> FsResult<(Node, StaleParts)> {
        if source.is_root() {
            return Err(FsError::validation("the root folder cannot be moved or copied"));
        }
        if source.is_folder() {
            let inside = dest_parent.id == source.id
                || tx
                    .get_ancestors(&dest_parent.id)
                    .await?
                    .iter()
                    .any(|n| n.id == source.id);
            if inside {
                return Err(FsError::validation(format!(
                    "cannot place '{}' inside itself",
                    source.filename
                )));
            }
        }

        let name = normalize_filename(name.as_deref().unwrap_or(&source.filename));
        let name = match tx
            .find_child(&dest_parent.id, &name, &NodeFilter::active())
            .await?
        {
            Some(existing) if is_move && existing.id == source.id => name,
            Some(_) => {
                self.calculate_filename_for_copy_in(tx, &dest_parent.id, &name, source.is_folder())
                    .await?
            }
            None => name,
        };

        let dest_channel = self.resolver.effective_channel_in(tx, &dest_parent).await?;
        let client = self.ctx.clients().next_client(false);
        let mut pacer = self.pacer();
        let mut stale = Vec::new();

        let mut parent = dest_parent.clone();
        parent.touch();
        tx.update(parent);

        if source.is_file() {
            let node = self
                .relocate_file(
                    tx,
                    &client,
                    &mut pacer,
                    source,
                    &dest_parent.id,
                    &name,
                    &dest_channel,
                    is_move,
                    &mut stale,
                )
                .await?;
            return Ok((node, stale));
        }

        let folder = if is_move {
            let mut folder = source.clone();
            folder.parent_id = Some(dest_parent.id.clone());
            folder.filename = name;
            folder.touch();
            tx.update(folder.clone());
            folder
        } else {
            let mut folder = source.duplicate();
            folder.parent_id = Some(dest_parent.id.clone());
            folder.filename = name;
            tx.insert(folder.clone());
            folder
        };
        let folder_channel = folder.channel.clone().unwrap_or(dest_channel);

        self.mirror_descendants(
            tx,
            &client,
            &mut pacer,
            &source,
            &folder,
            folder_channel,
            is_move,
            &mut stale,
        )
        .await?;
        Ok((folder, stale))
    }

    /// Recreate every descendant of `source` under `target`
    ///
    /// Destination folders are memoized by source folder id so siblings
    /// share one created ancestor. Moves keep the folder records and only
    /// re-host files whose effective channel changed.
    #[allow(clippy::too_many_arguments)]
    async fn mirror_descendants(
        &self,
        tx: &mut Transaction,
        client: &Arc<dyn BlobTransport>,
        pacer: &mut Pacer,
        source: &Node,
        target: &Node,
        target_channel: String,
        is_move: bool,
        stale: &mut StaleParts,
    ) -> FsResult<()> {
        let entries = tx
            .list_descendants(&source.id, &NodeFilter::active())
            .await?;

        // source folder id -> (destination folder id, effective channel)
        let mut memo: HashMap<String, (String, String)> = HashMap::new();
        memo.insert(source.id.clone(), (target.id.clone(), target_channel));

        for entry in entries {
            let parent_key = self.mirror_chain(tx, &entry, &source.id, &mut memo, is_move)?;
            let (dest_parent_id, channel) = memo
                .get(&parent_key)
                .cloned()
                .ok_or_else(|| FsError::not_found(format!("mirrored folder {}", parent_key)))?;

            if entry.node.is_folder() {
                if !memo.contains_key(&entry.node.id) {
                    let mirrored = mirror_folder(tx, &entry.node, &dest_parent_id, is_move);
                    let folder_channel = entry.node.channel.clone().unwrap_or(channel);
                    memo.insert(entry.node.id.clone(), (mirrored.id, folder_channel));
                }
                continue;
            }

            let filename = entry.node.filename.clone();
            self.relocate_file(
                tx,
                client,
                pacer,
                entry.node,
                &dest_parent_id,
                &filename,
                &channel,
                is_move,
                stale,
            )
            .await?;
        }
        Ok(())
    }

    /// Make sure every ancestor of `entry` below `root_id` has a mirrored
    /// folder, returning the memo key of the entry's parent
    fn mirror_chain(
        &self,
        tx: &mut Transaction,
        entry: &DescendantEntry,
        root_id: &str,
        memo: &mut HashMap<String, (String, String)>,
        is_move: bool,
    ) -> FsResult<String> {
        let mut parent_key = root_id.to_string();
        for ancestor in entry.path_below(root_id) {
            if !memo.contains_key(&ancestor.id) {
                let (dest_id, channel) = memo
                    .get(&parent_key)
                    .cloned()
                    .ok_or_else(|| FsError::not_found(format!("mirrored folder {}", parent_key)))?;
                let mirrored = mirror_folder(tx, ancestor, &dest_id, is_move);
                let folder_channel = ancestor.channel.clone().unwrap_or(channel);
                memo.insert(ancestor.id.clone(), (mirrored.id, folder_channel));
            }
            parent_key = ancestor.id.clone();
        }
        Ok(parent_key)
    }

    #[allow(clippy::too_many_arguments)]
    async fn relocate_file(
        &self,
        tx: &mut Transaction,
        client: &Arc<dyn BlobTransport>,
        pacer: &mut Pacer,
        file: Node,
        dest_parent_id: &str,
        name: &str,
        dest_channel: &str,
        is_move: bool,
        stale: &mut StaleParts,
    ) -> FsResult<Node> {
        let current_channel = match &file.channel {
            Some(channel) => channel.clone(),
            None => self.resolver.effective_channel_in(tx, &file).await?,
        };
        let data = file.file().cloned().unwrap_or_default();

        // Copies always own their messages; moves re-host across channels only
        let rehosted = if data.is_hosted() && (!is_move || current_channel != dest_channel) {
            let relay = if is_move { Relay::Forward } else { Relay::Copy };
            let parts = self
                .rehost_parts(client, pacer, &data.parts, &current_channel, dest_channel, relay)
                .await?;
            if is_move {
                stale.extend(
                    data.parts
                        .iter()
                        .cloned()
                        .map(|p| (current_channel.clone(), p)),
                );
            }
            Some(parts)
        } else {
            None
        };

        let mut node = if is_move { file } else { file.duplicate() };
        node.parent_id = Some(dest_parent_id.to_string());
        node.filename = name.to_string();
        node.channel = Some(dest_channel.to_string());
        if let (Some(parts), Some(data)) = (rehosted, node.file_mut()) {
            data.parts = parts;
        }
        node.touch();

        if is_move {
            tx.update(node.clone());
        } else {
            tx.insert(node.clone());
        }
        Ok(node)
    }

    async fn rehost_parts(
        &self,
        client: &Arc<dyn BlobTransport>,
        pacer: &mut Pacer,
        parts: &[Part],
        from_channel: &str,
        to_channel: &str,
        relay: Relay,
    ) -> FsResult<Vec<Part>> {
        let mut ordered = parts.to_vec();
        ordered.sort_by_key(|p| p.index);

        let mut rehosted = Vec::with_capacity(ordered.len());
        for part in ordered {
            if !check_part(client.as_ref(), from_channel, &part).await? {
                return Err(FsError::transport_unavailable(format!(
                    "message {} in {} has no media",
                    part.messageid, from_channel
                )));
            }
            let sent = match relay {
                Relay::Forward => client.forward(from_channel, part.messageid, to_channel).await?,
                Relay::Copy => client.copy(from_channel, part.messageid, to_channel).await?,
            };
            tracing::debug!(
                "Re-hosted message {} of {} as {} in {}",
                part.messageid,
                from_channel,
                sent.message_id,
                to_channel
            );
            rehosted.push(Part {
                messageid: sent.message_id,
                fileid: sent.blob_id,
                originalfilename: sent.filename,
                size: part.size,
                index: part.index,
                hash: part.hash,
            });
            pacer.tick().await;
        }
        Ok(rehosted)
    }

    async fn delete_stale_messages(&self, stale: StaleParts) {
        if stale.is_empty() {
            return;
        }
        let client = self.ctx.clients().next_client(false);
        let mut pacer = self.pacer();
        for (channel, part) in stale {
            match check_part(client.as_ref(), &channel, &part).await {
                Ok(true) => {
                    if let Err(e) = client.delete(&channel, part.messageid).await {
                        tracing::warn!("Could not delete original message {}: {}", part.messageid, e);
                    }
                    pacer.tick().await;
                }
                Ok(false) => {
                    tracing::warn!("Original message {} already gone", part.messageid);
                }
                Err(e) => {
                    tracing::warn!("Keeping original message {}: {}", part.messageid, e);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Delete and purge
    // ------------------------------------------------------------------

    /// Delete the node at `path`
    ///
    /// Folders are processed bottom-up; a folder is only marked deleted when
    /// every descendant succeeded. Files also lose their provider messages.
    /// In simulate mode nothing changes and the report lists what would.
    pub async fn delete(&self, path: &str, simulate: bool) -> FsResult<DeleteReport> {
        let node = self.resolve(path).await?;
        self.delete_node(node, simulate).await
    }

    pub async fn delete_by_id(&self, id: &str, simulate: bool) -> FsResult<DeleteReport> {
        let node = self.get_node(id).await?;
        self.delete_node(node, simulate).await
    }

    async fn delete_node(&self, node: Node, simulate: bool) -> FsResult<DeleteReport> {
        if node.is_root() {
            return Err(FsError::validation("the root folder cannot be deleted"));
        }

        let client = self.ctx.clients().next_client(false);
        let mut pacer = self.pacer();
        let mut report = DeleteReport {
            simulated: simulate,
            ..DeleteReport::default()
        };
        let top_path = self.resolver.build_path(&node).await?;

        if node.is_folder() {
            let entries = self
                .ctx
                .store()
                .list_descendants(&node.id, &NodeFilter::active())
                .await?;

            // Folders with a failed descendant are kept
            let mut blocked: HashSet<String> = HashSet::new();
            for entry in entries.iter().rev() {
                let path = entry_path(entry);
                let result = if entry.node.is_folder() {
                    if blocked.contains(&entry.node.id) {
                        Err(FsError::conflict("a descendant could not be deleted"))
                    } else {
                        self.soft_delete_node(&entry.node, simulate).await
                    }
                } else {
                    self.remove_file(client.as_ref(), &mut pacer, &entry.node, simulate)
                        .await
                };
                if result.is_err() {
                    blocked.extend(entry.path.iter().map(|n| n.id.clone()));
                }
                report.record(&entry.node, path, result);
            }

            let result = if blocked.contains(&node.id) {
                Err(FsError::conflict("a descendant could not be deleted"))
            } else {
                self.soft_delete_node(&node, simulate).await
            };
            report.record(&node, top_path.clone(), result);
        } else {
            let result = self
                .remove_file(client.as_ref(), &mut pacer, &node, simulate)
                .await;
            report.record(&node, top_path.clone(), result);
        }

        tracing::info!(
            "{}Delete of '{}': {} succeeded, {} failed",
            if simulate { "[simulate] " } else { "" },
            top_path,
            report.succeeded,
            report.failed
        );
        Ok(report)
    }

    /// Mark a node deleted without touching the provider
    pub async fn soft_delete(&self, id: &str) -> FsResult<Node> {
        let node = self.get_node(id).await?;
        if node.is_root() {
            return Err(FsError::validation("the root folder cannot be deleted"));
        }
        self.soft_delete_node(&node, false).await?;
        Ok(Node {
            state: NodeState::Deleted,
            ..node
        })
    }

    async fn soft_delete_node(&self, node: &Node, simulate: bool) -> FsResult<()> {
        if simulate {
            tracing::info!("[simulate] would mark '{}' deleted", node.filename);
            return Ok(());
        }
        let mut tx = self.ctx.transaction();
        let mut deleted = node.clone();
        deleted.state = NodeState::Deleted;
        deleted.touch();
        tx.update(deleted);
        tx.commit().await?;
        tracing::debug!("Marked '{}' deleted", node.filename);
        Ok(())
    }

    /// Delete a file's provider messages, then mark it deleted
    ///
    /// Each message is checked against the recorded blob id first; messages
    /// that no longer exist are skipped.
    async fn remove_file(
        &self,
        client: &dyn BlobTransport,
        pacer: &mut Pacer,
        node: &Node,
        simulate: bool,
    ) -> FsResult<()> {
        let parts = node.file().map(|f| f.ordered_parts()).unwrap_or_default();
        let channel = match &node.channel {
            Some(channel) => channel.clone(),
            None => self.resolver.effective_channel(node).await?,
        };

        if simulate {
            tracing::info!(
                "[simulate] would remove '{}' and {} message(s) from {}",
                node.filename,
                parts.len(),
                channel
            );
            return Ok(());
        }

        for part in &parts {
            if !check_part(client, &channel, part).await? {
                tracing::warn!(
                    "Message {} of '{}' no longer exists, skipping",
                    part.messageid,
                    node.filename
                );
                continue;
            }
            client.delete(&channel, part.messageid).await?;
            pacer.tick().await;
        }
        self.soft_delete_node(node, false).await
    }

    /// Hard-remove a deleted or temporary node and its subtree
    ///
    /// Provider messages are never touched. Returns the number of records
    /// removed.
    pub async fn purge(&self, id: &str) -> FsResult<usize> {
        let mut tx = self.ctx.transaction();
        let node = tx
            .get_node(id)
            .await?
            .ok_or_else(|| FsError::not_found(id))?;
        if node.is_root() {
            return Err(FsError::validation("the root folder cannot be purged"));
        }
        if node.is_active() {
            return Err(FsError::validation(format!(
                "'{}' is active; delete it before purging",
                node.filename
            )));
        }

        if node.is_folder() {
            let entries = tx.list_descendants(id, &NodeFilter::any_state()).await?;
            if let Some(active) = entries.iter().find(|e| e.node.is_active()) {
                return Err(FsError::conflict(format!(
                    "'{}' is still active inside '{}'",
                    active.node.filename, node.filename
                )));
            }
            for entry in entries.iter().rev() {
                tx.delete(&entry.node.id);
            }
        }
        tx.delete(id);

        let removed = tx.commit().await?;
        tracing::info!("Purged '{}' ({} record(s))", node.filename, removed);
        Ok(removed)
    }

    // ------------------------------------------------------------------
    // Part merging
    // ------------------------------------------------------------------

    /// Append the parts of `source_id` to `target_id`, then mark the source
    /// deleted
    ///
    /// Both files must be hosted in the same channel. No provider call is
    /// made; the messages change owner.
    pub async fn merge_files(&self, target_id: &str, source_id: &str) -> FsResult<Node> {
        if target_id == source_id {
            return Err(FsError::validation("cannot merge a file with itself"));
        }
        let mut tx = self.ctx.transaction();
        let mut target = active_file(&tx, target_id).await?;
        let mut source = active_file(&tx, source_id).await?;

        let target_channel = self.resolver.effective_channel_in(&tx, &target).await?;
        let source_channel = self.resolver.effective_channel_in(&tx, &source).await?;
        if target_channel != source_channel {
            return Err(FsError::validation(format!(
                "files are hosted in different channels ({} and {})",
                target_channel, source_channel
            )));
        }

        let (Some(target_data), Some(source_data)) = (target.file(), source.file()) else {
            return Err(FsError::validation("only files can be merged"));
        };
        if !target_data.is_hosted() || !source_data.is_hosted() {
            return Err(FsError::validation("only files hosted on the transport can be merged"));
        }

        let mut merged = target_data.ordered_parts();
        let offset = merged.len() as u32;
        merged.extend(source_data.ordered_parts().into_iter().enumerate().map(|(i, mut p)| {
            p.index = offset + i as u32;
            p
        }));
        let part_count = merged.len();

        if let Some(data) = target.file_mut() {
            data.parts = merged;
        }
        target.touch();
        source.state = NodeState::Deleted;
        source.touch();

        tx.update(target.clone());
        tx.update(source);
        tx.commit().await?;
        tracing::info!("Merged into '{}', now {} part(s)", target.filename, part_count);
        Ok(target)
    }
}

/// Verify that a part's message still carries the recorded blob
///
/// `Ok(false)` when the message or its media is gone.
async fn check_part(client: &dyn BlobTransport, channel: &str, part: &Part) -> FsResult<bool> {
    match client.fetch_media(channel, part.messageid).await? {
        None => Ok(false),
        Some(media) if media.blob_id != part.fileid => Err(FsError::transport_mismatch(
            part.messageid,
            &part.fileid,
            media.blob_id,
        )),
        Some(_) => Ok(true),
    }
}

fn mirror_folder(tx: &mut Transaction, folder: &Node, dest_parent_id: &str, is_move: bool) -> Node {
    if is_move {
        // The subtree travels with its root; records stay put
        return folder.clone();
    }
    let mut copy = folder.duplicate();
    copy.parent_id = Some(dest_parent_id.to_string());
    tx.insert(copy.clone());
    copy
}

fn entry_path(entry: &DescendantEntry) -> String {
    let mut segments: Vec<&str> = entry
        .path
        .iter()
        .filter(|n| !n.is_root())
        .map(|n| n.filename.as_str())
        .collect();
    segments.push(&entry.node.filename);
    format!("/{}", segments.join("/"))
}

async fn active_node(tx: &Transaction, id: &str) -> FsResult<Node> {
    match tx.get_node(id).await? {
        Some(node) if node.is_active() => Ok(node),
        _ => Err(FsError::not_found(id)),
    }
}

async fn active_folder(tx: &Transaction, id: &str) -> FsResult<Node> {
    let node = active_node(tx, id).await?;
    if !node.is_folder() {
        return Err(FsError::not_found(format!("folder {}", id)));
    }
    Ok(node)
}

async fn active_file(tx: &Transaction, id: &str) -> FsResult<Node> {
    let node = active_node(tx, id).await?;
    if !node.is_file() {
        return Err(FsError::not_found(format!("file {}", id)));
    }
    Ok(node)
}
