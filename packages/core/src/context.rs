//! Process context
//!
//! `FsContext` bundles the single metadata store, the transport client pool
//! and the configuration of one process. The entry point builds it once and
//! hands clones to every service; nothing in the crate reaches for globals.

use crate::config::FsConfig;
use crate::db::{MetadataStore, Mutation, Transaction};
use crate::models::{Node, ROOT_ID};
use crate::services::{FsError, FsResult};
use crate::transport::ClientPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct FsContext {
    store: Arc<dyn MetadataStore>,
    clients: Arc<ClientPool>,
    config: Arc<FsConfig>,
}

impl FsContext {
    /// Build a context after validating `config`
    pub fn new(
        store: Arc<dyn MetadataStore>,
        clients: Arc<ClientPool>,
        config: FsConfig,
    ) -> FsResult<Self> {
        config.validate()?;
        Ok(Self {
            store,
            clients,
            config: Arc::new(config),
        })
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub fn clients(&self) -> &ClientPool {
        &self.clients
    }

    pub fn config(&self) -> &FsConfig {
        &self.config
    }

    pub fn default_channel(&self) -> &str {
        &self.config.upload.channel
    }

    /// Fresh transaction over the shared store
    pub fn transaction(&self) -> Transaction {
        Transaction::new(self.store.clone())
    }

    /// Create the root folder on first start, return it either way
    ///
    /// An existing root keeps its channel; the configured channel only seeds
    /// a new one.
    pub async fn ensure_root(&self) -> FsResult<Node> {
        if let Some(root) = self.store.get_node(ROOT_ID).await? {
            if !root.is_folder() {
                return Err(FsError::validation("root record is not a folder"));
            }
            return Ok(root);
        }

        let root = Node::new_root(self.default_channel());
        self.store
            .commit(vec![Mutation::Insert(root.clone())])
            .await?;
        tracing::info!("Created root folder on channel {}", self.default_channel());
        Ok(root)
    }
}

impl std::fmt::Debug for FsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FsContext")
            .field("clients", &self.clients)
            .field("config", &self.config)
            .finish()
    }
}
