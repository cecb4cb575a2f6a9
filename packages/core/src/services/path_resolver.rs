//! Path Resolver
//!
//! Maps slash-separated virtual paths onto node chains and back. Every
//! lookup goes through a [`Transaction`] so operations that stage folders
//! can resolve paths they have not committed yet; the public entry points
//! open a fresh, empty transaction which reads straight from the store.

use super::error::{FsError, FsResult};
use crate::db::{MetadataStore, NodeFilter, Transaction};
use crate::models::{Node, ROOT_ID};
use std::sync::Arc;

/// Split a path into its non-empty segments
///
/// Leading, trailing and repeated slashes are ignored.
pub fn split_path(path: &str) -> Vec<String> {
    path.split('/')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Last segment of a path, `None` for the root path
pub fn last_segment(path: &str) -> Option<String> {
    split_path(path).pop()
}

#[derive(Clone)]
pub struct PathResolver {
    store: Arc<dyn MetadataStore>,
    default_channel: String,
}

impl PathResolver {
    pub fn new(store: Arc<dyn MetadataStore>, default_channel: impl Into<String>) -> Self {
        Self {
            store,
            default_channel: default_channel.into(),
        }
    }

    fn reader(&self) -> Transaction {
        Transaction::new(self.store.clone())
    }

    /// Resolve the active folder named by `path`
    ///
    /// With `skip_last` the final segment is left out, resolving the parent
    /// folder of whatever the path names. Returns `None` when any segment is
    /// missing.
    pub async fn get_last_folder(&self, path: &str, skip_last: bool) -> FsResult<Option<Node>> {
        self.get_last_folder_in(&self.reader(), path, skip_last).await
    }

    pub async fn get_last_folder_in(
        &self,
        tx: &Transaction,
        path: &str,
        skip_last: bool,
    ) -> FsResult<Option<Node>> {
        let mut segments = split_path(path);
        if skip_last {
            segments.pop();
        }

        let Some(mut current) = tx.get_node(ROOT_ID).await? else {
            return Err(FsError::not_found("root folder"));
        };
        let folders = NodeFilter::active().folders();
        for segment in segments {
            match tx.find_child(&current.id, &segment, &folders).await? {
                Some(next) => current = next,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Resolve the active node, file or folder, named by `path`
    pub async fn resolve(&self, path: &str) -> FsResult<Option<Node>> {
        self.resolve_in(&self.reader(), path, &NodeFilter::active())
            .await
    }

    /// Resolve `path` with `filter` applied to the final segment only
    pub async fn resolve_in(
        &self,
        tx: &Transaction,
        path: &str,
        filter: &NodeFilter,
    ) -> FsResult<Option<Node>> {
        let Some(name) = last_segment(path) else {
            return Ok(tx.get_node(ROOT_ID).await?);
        };
        let Some(parent) = self.get_last_folder_in(tx, path, true).await? else {
            return Ok(None);
        };
        Ok(tx.find_child(&parent.id, &name, filter).await?)
    }

    /// Root-relative path of `node`, `/` for the root
    pub async fn build_path(&self, node: &Node) -> FsResult<String> {
        self.build_path_in(&self.reader(), node).await
    }

    pub async fn build_path_in(&self, tx: &Transaction, node: &Node) -> FsResult<String> {
        if node.is_root() {
            return Ok("/".to_string());
        }
        let ancestors = tx.get_ancestors(&node.id).await?;
        let mut segments: Vec<&str> = ancestors
            .iter()
            .filter(|n| !n.is_root())
            .map(|n| n.filename.as_str())
            .collect();
        segments.push(&node.filename);
        Ok(format!("/{}", segments.join("/")))
    }

    /// Like [`get_last_folder`](Self::get_last_folder), creating missing
    /// folders along the way
    pub async fn create_folder_recursive(&self, path: &str, skip_last: bool) -> FsResult<Node> {
        let mut tx = self.reader();
        let folder = self
            .create_folder_recursive_in(&mut tx, path, skip_last)
            .await?;
        tx.commit().await?;
        Ok(folder)
    }

    pub async fn create_folder_recursive_in(
        &self,
        tx: &mut Transaction,
        path: &str,
        skip_last: bool,
    ) -> FsResult<Node> {
        let mut segments = split_path(path);
        if skip_last {
            segments.pop();
        }

        let Some(mut current) = tx.get_node(ROOT_ID).await? else {
            return Err(FsError::not_found("root folder"));
        };
        let active = NodeFilter::active();
        for segment in segments {
            match tx.find_child(&current.id, &segment, &active).await? {
                Some(next) if next.is_folder() => current = next,
                Some(_) => {
                    return Err(FsError::conflict(format!(
                        "'{}' exists and is not a folder",
                        segment
                    )))
                }
                None => {
                    let folder = Node::new_folder(&segment, &current.id);
                    tracing::debug!("Creating missing folder '{}'", folder.filename);
                    current.touch();
                    tx.update(current);
                    tx.insert(folder.clone());
                    current = folder;
                }
            }
        }
        Ok(current)
    }

    /// Channel hosting files under `node`: its own, the nearest ancestor's,
    /// or the configured default
    pub async fn effective_channel(&self, node: &Node) -> FsResult<String> {
        self.effective_channel_in(&self.reader(), node).await
    }

    pub async fn effective_channel_in(&self, tx: &Transaction, node: &Node) -> FsResult<String> {
        if let Some(channel) = &node.channel {
            return Ok(channel.clone());
        }
        let ancestors = tx.get_ancestors(&node.id).await?;
        Ok(ancestors
            .iter()
            .rev()
            .find_map(|n| n.channel.clone())
            .unwrap_or_else(|| self.default_channel.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path_discards_empty_segments() {
        assert_eq!(split_path("/a//b/c/"), vec!["a", "b", "c"]);
        assert!(split_path("/").is_empty());
        assert!(split_path("").is_empty());
    }

    #[test]
    fn test_last_segment() {
        assert_eq!(last_segment("/a/b.txt").as_deref(), Some("b.txt"));
        assert_eq!(last_segment("//"), None);
    }
}
