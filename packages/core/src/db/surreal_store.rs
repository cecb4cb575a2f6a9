//! SurrealDB Metadata Store
//!
//! Persists the tree in a SCHEMALESS `entries` table and saved transport
//! sessions in a `sessions` table. Records are keyed by node id
//! (`entries:<id>`) and also carry the id in a `uuid` field for filtering.
//!
//! # Architecture
//!
//! - **Any engine**: the endpoint decides the backend, `rocksdb://<path>` for
//!   embedded on-disk storage or `mem://` for a throwaway database.
//! - **Batch commits**: a commit is one `BEGIN TRANSACTION ... COMMIT
//!   TRANSACTION` query with every statement's values bound as parameters.
//! - **Change feed**: committed batches are republished on a broadcast
//!   channel, mirroring the in-memory store.
//! - **Recursive reads in one round trip**: ancestor chains and descents load
//!   the folder skeleton (plus, for descents, the filtered files) with a
//!   single query and walk the parent links in memory.

use crate::db::error::StoreError;
use crate::db::events::{ChangeOperation, StoreChange};
use crate::db::metadata_store::{
    ancestors_in, descendants_in, sort_listing, DescendantEntry, MetadataStore, Mutation,
    NodeFilter, SavedSession,
};
use crate::models::{Node, NodeDocument, NodeState, Part, FOLDER_TYPE, ROOT_ID};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use surrealdb::engine::any::{connect, Any};
use surrealdb::Surreal;
use tokio::sync::broadcast;

const NAMESPACE: &str = "chanfs";
const DATABASE: &str = "tree";
const CHANGE_CHANNEL_CAPACITY: usize = 1024;

/// Record shape of the `entries` table
///
/// `id` is reserved for the SurrealDB record id, so the node id lives in
/// `uuid`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SurrealEntry {
    uuid: String,
    filename: String,
    #[serde(rename = "type")]
    node_type: String,
    parentfolder: Option<String>,
    state: NodeState,
    channel: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    parts: Option<Vec<Part>>,
    ctime: String,
    mtime: String,
}

impl From<&Node> for SurrealEntry {
    fn from(node: &Node) -> Self {
        let doc = NodeDocument::from(node);
        Self {
            uuid: doc.id,
            filename: doc.filename,
            node_type: doc.node_type,
            parentfolder: doc.parentfolder,
            state: doc.state,
            channel: doc.channel,
            content: doc.content,
            parts: doc.parts,
            ctime: doc.ctime,
            mtime: doc.mtime,
        }
    }
}

impl TryFrom<SurrealEntry> for Node {
    type Error = crate::models::ValidationError;

    fn try_from(entry: SurrealEntry) -> Result<Self, Self::Error> {
        Node::try_from(NodeDocument {
            id: entry.uuid,
            filename: entry.filename,
            node_type: entry.node_type,
            parentfolder: entry.parentfolder,
            state: entry.state,
            channel: entry.channel,
            content: entry.content,
            parts: entry.parts,
            ctime: entry.ctime,
            mtime: entry.mtime,
        })
    }
}

fn into_nodes(entries: Vec<SurrealEntry>) -> Result<Vec<Node>> {
    entries
        .into_iter()
        .map(|e| Node::try_from(e).map_err(anyhow::Error::from))
        .collect()
}

/// MetadataStore backed by an embedded SurrealDB instance
pub struct SurrealStore {
    db: Arc<Surreal<Any>>,
    events: broadcast::Sender<StoreChange>,
}

impl SurrealStore {
    /// Connect to `endpoint` and prepare the schema
    ///
    /// # Errors
    ///
    /// Returns error if the endpoint scheme is unsupported, the storage
    /// cannot be opened, or schema initialization fails.
    ///
    /// # Examples
    ///
    /// ```rust,no_run
    /// # use chanfs_core::db::SurrealStore;
    /// # #[tokio::main]
    /// # async fn main() -> anyhow::Result<()> {
    /// let store = SurrealStore::connect("rocksdb://./data/chanfs.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let db = connect(endpoint)
            .await
            .with_context(|| format!("Failed to open SurrealDB at {}", endpoint))?;

        db.use_ns(NAMESPACE)
            .use_db(DATABASE)
            .await
            .context("Failed to set namespace/database")?;

        Self::initialize_schema(&db).await?;

        let (events, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Ok(Self {
            db: Arc::new(db),
            events,
        })
    }

    async fn initialize_schema(db: &Surreal<Any>) -> Result<()> {
        db.query(
            "
            DEFINE TABLE IF NOT EXISTS entries SCHEMALESS;
            DEFINE INDEX IF NOT EXISTS entries_parent ON entries FIELDS parentfolder;
            DEFINE INDEX IF NOT EXISTS entries_channel ON entries FIELDS channel;
            DEFINE TABLE IF NOT EXISTS sessions SCHEMALESS;
            ",
        )
        .await
        .context("Failed to initialize schema")?
        .check()
        .context("Schema definition rejected")?;
        Ok(())
    }

    async fn select_entries(&self, sql: &'static str, binds: Vec<(&'static str, String)>) -> Result<Vec<Node>> {
        let mut query = self.db.query(sql);
        for bind in binds {
            query = query.bind(bind);
        }
        let mut response = query.await.context("Failed to query entries")?;
        let entries: Vec<SurrealEntry> = response
            .take(0)
            .context("Failed to extract query results")?;
        into_nodes(entries)
    }

    /// Entries keyed by node id
    async fn snapshot(
        &self,
        sql: &'static str,
        states: Option<&[NodeState]>,
    ) -> Result<HashMap<String, Node>> {
        let mut query = self.db.query(sql).bind(("folder", FOLDER_TYPE));
        if let Some(states) = states {
            let states: Vec<String> = states.iter().map(|s| s.as_str().to_string()).collect();
            query = query.bind(("states", states));
        }
        let mut response = query.await.context("Failed to load tree snapshot")?;
        let entries: Vec<SurrealEntry> = response
            .take(0)
            .context("Failed to extract query results")?;
        Ok(into_nodes(entries)?
            .into_iter()
            .map(|node| (node.id.clone(), node))
            .collect())
    }
}

#[async_trait]
impl MetadataStore for SurrealStore {
    async fn get_node(&self, id: &str) -> Result<Option<Node>> {
        let nodes = self
            .select_entries(
                "SELECT * FROM entries WHERE uuid = $uuid LIMIT 1;",
                vec![("uuid", id.to_string())],
            )
            .await?;
        Ok(nodes.into_iter().next())
    }

    async fn get_children(&self, parent_id: &str, filter: &NodeFilter) -> Result<Vec<Node>> {
        let mut children: Vec<Node> = self
            .select_entries(
                "SELECT * FROM entries WHERE parentfolder = $parent;",
                vec![("parent", parent_id.to_string())],
            )
            .await?
            .into_iter()
            .filter(|n| filter.matches(n))
            .collect();
        sort_listing(&mut children);
        Ok(children)
    }

    async fn get_ancestors(&self, id: &str) -> Result<Vec<Node>> {
        let mut response = self
            .db
            .query(
                "SELECT * FROM entries WHERE uuid = $uuid LIMIT 1; \
                 SELECT * FROM entries WHERE type = $folder;",
            )
            .bind(("uuid", id.to_string()))
            .bind(("folder", FOLDER_TYPE))
            .await
            .context("Failed to query ancestors")?;
        let start: Vec<SurrealEntry> = response.take(0).context("Failed to extract node")?;
        let folders: Vec<SurrealEntry> = response.take(1).context("Failed to extract folders")?;

        let mut nodes: HashMap<String, Node> = into_nodes(folders)?
            .into_iter()
            .map(|node| (node.id.clone(), node))
            .collect();
        for node in into_nodes(start)? {
            nodes.insert(node.id.clone(), node);
        }
        ancestors_in(&nodes, id)
    }

    async fn list_descendants(
        &self,
        parent_id: &str,
        filter: &NodeFilter,
    ) -> Result<Vec<DescendantEntry>> {
        // Folders in any state carry the ancestor chain; the filter still
        // decides which of them are listed and descended into
        let nodes = match &filter.states {
            Some(states) => {
                self.snapshot(
                    "SELECT * FROM entries WHERE type = $folder OR state IN $states;",
                    Some(states),
                )
                .await?
            }
            None => self.snapshot("SELECT * FROM entries;", None).await?,
        };
        descendants_in(&nodes, parent_id, filter)
    }

    async fn find_files_by_message(&self, channel: &str, message_id: i64) -> Result<Vec<Node>> {
        let mut response = self
            .db
            .query(
                "SELECT * FROM entries WHERE channel = $channel AND type != $folder \
                 AND state != 'TEMP' AND parts.messageid CONTAINS $message;",
            )
            .bind(("channel", channel.to_string()))
            .bind(("folder", FOLDER_TYPE))
            .bind(("message", message_id))
            .await
            .context("Failed to query files by message")?;
        let entries: Vec<SurrealEntry> = response
            .take(0)
            .context("Failed to extract query results")?;
        let mut nodes = into_nodes(entries)?;
        sort_listing(&mut nodes);
        Ok(nodes)
    }

    async fn find_folders_by_channel(&self, channel: &str) -> Result<Vec<Node>> {
        let mut response = self
            .db
            .query("SELECT * FROM entries WHERE type = $folder AND channel = $channel;")
            .bind(("folder", FOLDER_TYPE))
            .bind(("channel", channel.to_string()))
            .await
            .context("Failed to query folders by channel")?;
        let entries: Vec<SurrealEntry> = response
            .take(0)
            .context("Failed to extract query results")?;
        let mut nodes = into_nodes(entries)?;
        sort_listing(&mut nodes);
        Ok(nodes)
    }

    async fn commit(&self, mutations: Vec<Mutation>) -> Result<()> {
        if mutations.is_empty() {
            return Ok(());
        }

        // Snapshot deleted documents and check preconditions before writing
        let mut changes = Vec::with_capacity(mutations.len());
        for mutation in &mutations {
            match mutation {
                Mutation::Insert(node) => {
                    node.validate()
                        .map_err(|e| StoreError::invalid_node(&node.id, e.to_string()))?;
                    if self.get_node(&node.id).await?.is_some() {
                        return Err(StoreError::duplicate_id(&node.id).into());
                    }
                    changes.push(StoreChange::new(ChangeOperation::Insert, node.clone()));
                }
                Mutation::Update(node) => {
                    node.validate()
                        .map_err(|e| StoreError::invalid_node(&node.id, e.to_string()))?;
                    if self.get_node(&node.id).await?.is_none() {
                        return Err(StoreError::missing_node(&node.id).into());
                    }
                    changes.push(StoreChange::new(ChangeOperation::Update, node.clone()));
                }
                Mutation::Delete { id } => {
                    if id == ROOT_ID {
                        return Err(StoreError::RootImmutable.into());
                    }
                    let existing = self
                        .get_node(id)
                        .await?
                        .ok_or_else(|| StoreError::missing_node(id))?;
                    changes.push(StoreChange::new(ChangeOperation::Delete, existing));
                }
            }
        }

        let mut sql = String::from("BEGIN TRANSACTION;\n");
        for (i, mutation) in mutations.iter().enumerate() {
            let statement = match mutation {
                Mutation::Insert(_) => format!("CREATE type::thing('entries', $id{i}) CONTENT $doc{i};\n"),
                Mutation::Update(_) => format!("UPDATE type::thing('entries', $id{i}) CONTENT $doc{i};\n"),
                Mutation::Delete { .. } => format!("DELETE type::thing('entries', $id{i});\n"),
            };
            sql.push_str(&statement);
        }
        sql.push_str("COMMIT TRANSACTION;");

        let mut query = self.db.query(sql);
        for (i, mutation) in mutations.into_iter().enumerate() {
            query = query.bind((format!("id{i}"), mutation.node_id().to_string()));
            match mutation {
                Mutation::Insert(node) | Mutation::Update(node) => {
                    query = query.bind((format!("doc{i}"), SurrealEntry::from(&node)));
                }
                Mutation::Delete { .. } => {}
            }
        }
        query
            .await
            .context("Failed to submit commit batch")?
            .check()
            .context("Commit batch rejected")?;

        tracing::debug!("Committed {} mutation(s) to SurrealDB", changes.len());
        for change in changes {
            let _ = self.events.send(change);
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.events.subscribe()
    }

    async fn get_session(&self, account: &str) -> Result<Option<SavedSession>> {
        let mut response = self
            .db
            .query("SELECT account, is_bot, session, updated_at FROM type::thing('sessions', $account);")
            .bind(("account", account.to_string()))
            .await
            .context("Failed to query session")?;
        let sessions: Vec<SavedSession> = response
            .take(0)
            .context("Failed to extract session")?;
        Ok(sessions.into_iter().next())
    }

    async fn save_session(&self, session: SavedSession) -> Result<()> {
        self.db
            .query("UPSERT type::thing('sessions', $account) CONTENT $session;")
            .bind(("account", session.account.clone()))
            .bind(("session", session))
            .await
            .context("Failed to save session")?
            .check()
            .context("Session write rejected")?;
        Ok(())
    }
}
