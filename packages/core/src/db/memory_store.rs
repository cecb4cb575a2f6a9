//! In-Memory Metadata Store
//!
//! `MemoryStore` keeps the whole tree in a `HashMap` behind a tokio `RwLock`.
//! It is the default backend for tests, for the CLI when no database is
//! configured, and for ephemeral servers.
//!
//! Commits validate the full batch against a scratch copy before swapping it
//! in, so a failing batch leaves the store untouched.

use crate::db::error::StoreError;
use crate::db::events::{ChangeOperation, StoreChange};
use crate::db::metadata_store::{
    ancestors_in, children_in, descendants_in, sort_listing, DescendantEntry, MetadataStore,
    Mutation, NodeFilter, SavedSession,
};
use crate::models::{Node, NodeState};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};

const CHANGE_CHANNEL_CAPACITY: usize = 1024;

pub struct MemoryStore {
    nodes: RwLock<HashMap<String, Node>>,
    sessions: RwLock<HashMap<String, SavedSession>>,
    events: broadcast::Sender<StoreChange>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            nodes: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            events,
        }
    }

    fn apply(
        nodes: &mut HashMap<String, Node>,
        mutation: Mutation,
    ) -> Result<StoreChange, StoreError> {
        match mutation {
            Mutation::Insert(node) => {
                node.validate()
                    .map_err(|e| StoreError::invalid_node(&node.id, e.to_string()))?;
                if nodes.contains_key(&node.id) {
                    return Err(StoreError::duplicate_id(&node.id));
                }
                nodes.insert(node.id.clone(), node.clone());
                Ok(StoreChange::new(ChangeOperation::Insert, node))
            }
            Mutation::Update(node) => {
                node.validate()
                    .map_err(|e| StoreError::invalid_node(&node.id, e.to_string()))?;
                let slot = nodes
                    .get_mut(&node.id)
                    .ok_or_else(|| StoreError::missing_node(&node.id))?;
                *slot = node.clone();
                Ok(StoreChange::new(ChangeOperation::Update, node))
            }
            Mutation::Delete { id } => {
                if id == crate::models::ROOT_ID {
                    return Err(StoreError::RootImmutable);
                }
                let removed = nodes.remove(&id).ok_or_else(|| StoreError::missing_node(&id))?;
                Ok(StoreChange::new(ChangeOperation::Delete, removed))
            }
        }
    }
}

#[async_trait]
impl MetadataStore for MemoryStore {
    async fn get_node(&self, id: &str) -> Result<Option<Node>> {
        Ok(self.nodes.read().await.get(id).cloned())
    }

    async fn get_children(&self, parent_id: &str, filter: &NodeFilter) -> Result<Vec<Node>> {
        let nodes = self.nodes.read().await;
        Ok(children_in(&nodes, parent_id, filter))
    }

    async fn get_ancestors(&self, id: &str) -> Result<Vec<Node>> {
        ancestors_in(&*self.nodes.read().await, id)
    }

    async fn list_descendants(
        &self,
        parent_id: &str,
        filter: &NodeFilter,
    ) -> Result<Vec<DescendantEntry>> {
        descendants_in(&*self.nodes.read().await, parent_id, filter)
    }

    async fn find_files_by_message(&self, channel: &str, message_id: i64) -> Result<Vec<Node>> {
        let nodes = self.nodes.read().await;
        let mut found: Vec<Node> = nodes
            .values()
            .filter(|n| n.state != NodeState::Temp && n.channel.as_deref() == Some(channel))
            .filter(|n| {
                n.file()
                    .is_some_and(|f| f.parts.iter().any(|p| p.messageid == message_id))
            })
            .cloned()
            .collect();
        sort_listing(&mut found);
        Ok(found)
    }

    async fn find_folders_by_channel(&self, channel: &str) -> Result<Vec<Node>> {
        let nodes = self.nodes.read().await;
        let mut found: Vec<Node> = nodes
            .values()
            .filter(|n| n.is_folder() && n.channel.as_deref() == Some(channel))
            .cloned()
            .collect();
        sort_listing(&mut found);
        Ok(found)
    }

    async fn commit(&self, mutations: Vec<Mutation>) -> Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }

        let changes = {
            let mut nodes = self.nodes.write().await;
            let mut scratch = nodes.clone();
            let mut changes = Vec::with_capacity(mutations.len());
            for mutation in mutations {
                changes.push(Self::apply(&mut scratch, mutation)?);
            }
            *nodes = scratch;
            changes
        };

        tracing::debug!("Committed {} mutation(s)", changes.len());
        for change in changes {
            // No subscribers is fine
            let _ = self.events.send(change);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.events.subscribe()
    }

    async fn get_session(&self, account: &str) -> Result<Option<SavedSession>> {
        Ok(self.sessions.read().await.get(account).cloned())
    }

    async fn save_session(&self, session: SavedSession) -> Result<()> {
        self.sessions
            .write()
            .await
            .insert(session.account.clone(), session);
        Ok(())
    }
}
