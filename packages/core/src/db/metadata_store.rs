//! MetadataStore Trait - Document Store Abstraction
//!
//! This module defines the `MetadataStore` trait that abstracts persistence of
//! the filesystem tree and of saved transport sessions. Tree operations only
//! talk to this trait, so the in-memory store and the SurrealDB store are
//! interchangeable.
//!
//! # Design Decisions
//!
//! 1. **Async-First**: every call may suspend on I/O.
//! 2. **Batch commits**: writes are submitted as one `Vec<Mutation>` that the
//!    backend applies atomically. Multi-step tree mutations stage their writes
//!    in a [`Transaction`](super::Transaction) and commit once.
//! 3. **Error Handling**: `anyhow::Result` for backend failures; business
//!    rule violations are raised above this layer.
//! 4. **Graph reads with fallback**: `get_ancestors` and `list_descendants`
//!    have single-hop default implementations; backends override them with
//!    one traversal when they can.

use crate::db::events::StoreChange;
use crate::models::{same_filename, Node, NodeState};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::broadcast;

/// Upper bound on ancestor hops, guards against corrupted parent cycles
pub const MAX_TREE_DEPTH: usize = 4096;

/// Restricts which node kinds a query returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindFilter {
    Folder,
    File,
}

/// Query filter on state and kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeFilter {
    /// Accepted states; `None` accepts every state
    pub states: Option<Vec<NodeState>>,
    pub kind: Option<KindFilter>,
}

impl NodeFilter {
    /// Only `Active` nodes, the end-user view
    pub fn active() -> Self {
        Self::with_states(&[NodeState::Active])
    }

    pub fn any_state() -> Self {
        Self::default()
    }

    pub fn with_states(states: &[NodeState]) -> Self {
        Self {
            states: Some(states.to_vec()),
            kind: None,
        }
    }

    pub fn folders(mut self) -> Self {
        self.kind = Some(KindFilter::Folder);
        self
    }

    pub fn files(mut self) -> Self {
        self.kind = Some(KindFilter::File);
        self
    }

    pub fn matches(&self, node: &Node) -> bool {
        if let Some(states) = &self.states {
            if !states.contains(&node.state) {
                return false;
            }
        }
        match self.kind {
            Some(KindFilter::Folder) => node.is_folder(),
            Some(KindFilter::File) => node.is_file(),
            None => true,
        }
    }
}

/// A descendant returned by a recursive listing
#[derive(Debug, Clone)]
pub struct DescendantEntry {
    pub node: Node,

    /// Ancestor chain from the root down to the node's direct parent
    pub path: Vec<Node>,
}

impl DescendantEntry {
    /// Ancestors strictly below `folder_id`, the part of the chain that has to
    /// be recreated when mirroring `folder_id` somewhere else
    pub fn path_below(&self, folder_id: &str) -> &[Node] {
        match self.path.iter().position(|n| n.id == folder_id) {
            Some(pos) => &self.path[pos + 1..],
            None => &self.path[..],
        }
    }
}

/// One write of a committed batch
#[derive(Debug, Clone)]
pub enum Mutation {
    Insert(Node),
    Update(Node),
    Delete { id: String },
}

impl Mutation {
    pub fn node_id(&self) -> &str {
        match self {
            Mutation::Insert(node) | Mutation::Update(node) => &node.id,
            Mutation::Delete { id } => id,
        }
    }
}

/// Persisted login state of one transport account
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SavedSession {
    /// Account name, unique key of the collection
    pub account: String,
    pub is_bot: bool,
    /// Opaque provider session string
    pub session: String,
    pub updated_at: DateTime<Utc>,
}

/// Sort order shared by every listing: folders first, then by lowercase name
pub fn sort_listing(nodes: &mut [Node]) {
    nodes.sort_by(|a, b| {
        b.is_folder()
            .cmp(&a.is_folder())
            .then_with(|| a.filename.to_lowercase().cmp(&b.filename.to_lowercase()))
    });
}

/// Direct children of `parent_id` within a loaded snapshot
pub(crate) fn children_in(
    nodes: &HashMap<String, Node>,
    parent_id: &str,
    filter: &NodeFilter,
) -> Vec<Node> {
    let mut children: Vec<Node> = nodes
        .values()
        .filter(|n| n.parent_id.as_deref() == Some(parent_id) && filter.matches(n))
        .cloned()
        .collect();
    sort_listing(&mut children);
    children
}

/// Ancestor chain of `id` within a loaded snapshot, root first
pub(crate) fn ancestors_in(nodes: &HashMap<String, Node>, id: &str) -> Result<Vec<Node>> {
    let mut chain = Vec::new();
    let mut current = nodes.get(id).and_then(|n| n.parent_id.clone());
    while let Some(parent_id) = current {
        if chain.len() >= MAX_TREE_DEPTH {
            anyhow::bail!("ancestor chain of '{}' exceeds {} levels", id, MAX_TREE_DEPTH);
        }
        let Some(parent) = nodes.get(&parent_id) else {
            break;
        };
        current = parent.parent_id.clone();
        chain.push(parent.clone());
    }
    chain.reverse();
    Ok(chain)
}

/// Breadth-first descent below `parent_id` within a loaded snapshot
pub(crate) fn descendants_in(
    nodes: &HashMap<String, Node>,
    parent_id: &str,
    filter: &NodeFilter,
) -> Result<Vec<DescendantEntry>> {
    let Some(start) = nodes.get(parent_id) else {
        return Ok(Vec::new());
    };
    let mut base = ancestors_in(nodes, parent_id)?;
    base.push(start.clone());

    let mut out = Vec::new();
    let mut queue = VecDeque::from([(parent_id.to_string(), base)]);
    while let Some((folder_id, path)) = queue.pop_front() {
        for child in children_in(nodes, &folder_id, filter) {
            if child.is_folder() {
                let mut child_path = path.clone();
                child_path.push(child.clone());
                queue.push_back((child.id.clone(), child_path));
            }
            out.push(DescendantEntry {
                node: child,
                path: path.clone(),
            });
        }
    }
    Ok(out)
}

/// Abstraction layer for tree and session persistence
///
/// Implementations must be `Send + Sync`; one instance is shared by every
/// component through the process context.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Get a node by id, in any state
    async fn get_node(&self, id: &str) -> Result<Option<Node>>;

    /// Direct children of `parent_id` accepted by `filter`, in listing order
    async fn get_children(&self, parent_id: &str, filter: &NodeFilter) -> Result<Vec<Node>>;

    /// Child of `parent_id` whose name matches case-insensitively
    async fn find_child(
        &self,
        parent_id: &str,
        filename: &str,
        filter: &NodeFilter,
    ) -> Result<Option<Node>> {
        let children = self.get_children(parent_id, filter).await?;
        Ok(children
            .into_iter()
            .find(|n| same_filename(&n.filename, filename)))
    }

    /// Ancestor chain of `id`, ordered from the root down to the direct parent
    ///
    /// The default walks `parent_id` one lookup at a time.
    async fn get_ancestors(&self, id: &str) -> Result<Vec<Node>> {
        let mut chain = Vec::new();
        let mut current = match self.get_node(id).await? {
            Some(node) => node.parent_id,
            None => return Ok(chain),
        };
        while let Some(parent_id) = current {
            if chain.len() >= MAX_TREE_DEPTH {
                anyhow::bail!("ancestor chain of '{}' exceeds {} levels", id, MAX_TREE_DEPTH);
            }
            match self.get_node(&parent_id).await? {
                Some(parent) => {
                    current = parent.parent_id.clone();
                    chain.push(parent);
                }
                None => break,
            }
        }
        chain.reverse();
        Ok(chain)
    }

    /// Every descendant of `parent_id` accepted by `filter`, parents before
    /// children, each with its ancestor chain attached
    ///
    /// Traversal only descends into folders accepted by `filter`.
    async fn list_descendants(
        &self,
        parent_id: &str,
        filter: &NodeFilter,
    ) -> Result<Vec<DescendantEntry>> {
        let Some(start) = self.get_node(parent_id).await? else {
            return Ok(Vec::new());
        };
        let mut base = self.get_ancestors(parent_id).await?;
        base.push(start);

        let mut out = Vec::new();
        let mut queue = VecDeque::from([(parent_id.to_string(), base)]);
        while let Some((folder_id, path)) = queue.pop_front() {
            for child in self.get_children(&folder_id, filter).await? {
                if child.is_folder() {
                    let mut child_path = path.clone();
                    child_path.push(child.clone());
                    queue.push_back((child.id.clone(), child_path));
                }
                out.push(DescendantEntry {
                    node: child,
                    path: path.clone(),
                });
            }
        }
        Ok(out)
    }

    /// Non-temporary files in `channel` whose parts reference `message_id`
    async fn find_files_by_message(&self, channel: &str, message_id: i64) -> Result<Vec<Node>>;

    /// Folders that declare `channel` directly
    async fn find_folders_by_channel(&self, channel: &str) -> Result<Vec<Node>>;

    /// Apply a batch of mutations atomically
    ///
    /// # Errors
    ///
    /// Fails without applying anything if an insert reuses an existing id, an
    /// update or delete targets a missing node, or a delete targets the root.
    async fn commit(&self, mutations: Vec<Mutation>) -> Result<()>;

    /// Subscribe to the change feed
    fn subscribe(&self) -> broadcast::Receiver<StoreChange>;

    async fn get_session(&self, account: &str) -> Result<Option<SavedSession>>;

    /// Insert or replace the session keyed by `session.account`
    async fn save_session(&self, session: SavedSession) -> Result<()>;
}
