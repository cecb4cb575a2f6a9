//! Staged Tree Transactions
//!
//! A `Transaction` collects the writes of one logical tree operation and
//! submits them to the store as a single batch. Reads made through the
//! transaction see its own staged writes, so multi-step operations (mirroring
//! a folder, reparenting, purging a subtree) can look up what they created a
//! moment earlier.
//!
//! Dropping a transaction without calling [`Transaction::commit`] discards
//! everything it staged.

use crate::db::metadata_store::{
    sort_listing, DescendantEntry, MetadataStore, Mutation, NodeFilter, MAX_TREE_DEPTH,
};
use crate::models::{same_filename, Node};
use anyhow::Result;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

#[derive(Debug, Clone)]
enum Staged {
    Insert(Node),
    Update(Node),
    Delete,
}

impl Staged {
    fn node(&self) -> Option<&Node> {
        match self {
            Staged::Insert(node) | Staged::Update(node) => Some(node),
            Staged::Delete => None,
        }
    }
}

pub struct Transaction {
    store: Arc<dyn MetadataStore>,
    order: Vec<String>,
    staged: HashMap<String, Staged>,
}

impl Transaction {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self {
            store,
            order: Vec::new(),
            staged: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.staged.is_empty()
    }

    fn stage(&mut self, id: String, next: Staged) {
        let merged = match (self.staged.remove(&id), next) {
            // Created and removed in the same transaction: nothing to write
            (Some(Staged::Insert(_)), Staged::Delete) => {
                self.order.retain(|o| o != &id);
                return;
            }
            (Some(Staged::Insert(_)), Staged::Update(node)) => Staged::Insert(node),
            (Some(Staged::Delete), Staged::Insert(node)) => Staged::Update(node),
            (_, next) => next,
        };
        if !self.order.contains(&id) {
            self.order.push(id.clone());
        }
        self.staged.insert(id, merged);
    }

    pub fn insert(&mut self, node: Node) {
        self.stage(node.id.clone(), Staged::Insert(node));
    }

    pub fn update(&mut self, node: Node) {
        self.stage(node.id.clone(), Staged::Update(node));
    }

    pub fn delete(&mut self, id: &str) {
        self.stage(id.to_string(), Staged::Delete);
    }

    pub async fn get_node(&self, id: &str) -> Result<Option<Node>> {
        match self.staged.get(id) {
            Some(staged) => Ok(staged.node().cloned()),
            None => self.store.get_node(id).await,
        }
    }

    pub async fn get_children(&self, parent_id: &str, filter: &NodeFilter) -> Result<Vec<Node>> {
        let mut children: Vec<Node> = self
            .store
            .get_children(parent_id, filter)
            .await?
            .into_iter()
            .filter(|n| !self.staged.contains_key(&n.id))
            .collect();

        for id in &self.order {
            if let Some(node) = self.staged.get(id).and_then(Staged::node) {
                if node.parent_id.as_deref() == Some(parent_id) && filter.matches(node) {
                    children.push(node.clone());
                }
            }
        }
        sort_listing(&mut children);
        Ok(children)
    }

    pub async fn find_child(
        &self,
        parent_id: &str,
        filename: &str,
        filter: &NodeFilter,
    ) -> Result<Option<Node>> {
        if self.staged.is_empty() {
            return self.store.find_child(parent_id, filename, filter).await;
        }
        Ok(self
            .get_children(parent_id, filter)
            .await?
            .into_iter()
            .find(|n| same_filename(&n.filename, filename)))
    }

    pub async fn get_ancestors(&self, id: &str) -> Result<Vec<Node>> {
        if self.staged.is_empty() {
            return self.store.get_ancestors(id).await;
        }

        let mut chain = Vec::new();
        let mut current = self.get_node(id).await?.and_then(|n| n.parent_id);
        while let Some(parent_id) = current {
            if chain.len() >= MAX_TREE_DEPTH {
                anyhow::bail!("ancestor chain of '{}' exceeds {} levels", id, MAX_TREE_DEPTH);
            }
            let Some(parent) = self.get_node(&parent_id).await? else {
                break;
            };
            current = parent.parent_id.clone();
            chain.push(parent);
        }
        chain.reverse();
        Ok(chain)
    }

    pub async fn list_descendants(
        &self,
        parent_id: &str,
        filter: &NodeFilter,
    ) -> Result<Vec<DescendantEntry>> {
        if self.staged.is_empty() {
            return self.store.list_descendants(parent_id, filter).await;
        }

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

    /// Submit every staged write as one atomic batch
    ///
    /// Returns the number of writes applied.
    pub async fn commit(mut self) -> Result<usize> {
        let mut mutations = Vec::with_capacity(self.order.len());
        for id in std::mem::take(&mut self.order) {
            match self.staged.remove(&id) {
                Some(Staged::Insert(node)) => mutations.push(Mutation::Insert(node)),
                Some(Staged::Update(node)) => mutations.push(Mutation::Update(node)),
                Some(Staged::Delete) => mutations.push(Mutation::Delete { id }),
                None => {}
            }
        }
        let count = mutations.len();
        if count > 0 {
            self.store.commit(mutations).await?;
        }
        Ok(count)
    }
}
