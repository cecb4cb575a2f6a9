//! Process wiring
//!
//! Builds the one `FsContext` of the process from an `AppConfig`: the
//! metadata store selected by `db`, a transport session per configured
//! account, and the services every command and route shares.

use crate::config::{AppConfig, MEMORY_DB};
use crate::http::AppState;
use crate::webdav::ChanDavFs;
use anyhow::{Context, Result};
use chanfs_core::db::SavedSession;
use chanfs_core::transport::{BlobTransport, ClientIdentity, ClientPool, MemoryProvider};
use chanfs_core::{FileService, FsContext, MemoryStore, MetadataStore, TreeService};
use std::sync::Arc;

/// Account name of the bot session
pub const BOT_ACCOUNT: &str = "bot";

pub struct App {
    pub config: AppConfig,
    pub ctx: FsContext,
    pub tree: TreeService,
    pub files: FileService,
}

impl App {
    /// Open the store, register transport sessions and ensure the root
    pub async fn build(config: AppConfig) -> Result<Self> {
        let database_url = config.database_url();
        let store = open_store(&database_url).await?;
        let clients = register_clients(&config, &store).await?;
        if let Some(warning) = loopback_warning(&database_url) {
            tracing::warn!("{}", warning);
        }

        let ctx = FsContext::new(store, Arc::new(clients), config.fs_config())?;
        ctx.ensure_root().await?;

        Ok(Self {
            tree: TreeService::new(ctx.clone()),
            files: FileService::new(ctx.clone()),
            ctx,
            config,
        })
    }

    pub fn http_state(&self) -> AppState {
        AppState {
            tree: self.tree.clone(),
            files: self.files.clone(),
            auth: self.config.http.credentials(),
        }
    }

    pub fn dav_filesystem(&self) -> ChanDavFs {
        ChanDavFs::new(self.tree.clone(), self.files.clone())
    }

    /// Relay `error` to the notification channel, when one is configured
    pub async fn notify(&self, error: &anyhow::Error) {
        let Some(channel) = &self.config.telegram.notify_channel else {
            return;
        };
        let text = format!("chanfs error: {:#}", error);
        if let Err(e) = self.ctx.clients().notifier().send_text(channel, &text).await {
            tracing::error!("Failed to send notification to {}: {}", channel, e);
        }
    }
}

/// Metadata store for `url`
///
/// `memory` selects the in-process store; `mem://` and `rocksdb://` select
/// SurrealDB when compiled with the `surrealdb` feature.
pub async fn open_store(url: &str) -> Result<Arc<dyn MetadataStore>> {
    if url == MEMORY_DB {
        tracing::warn!("Using the in-memory metadata store; nothing is persisted");
        return Ok(Arc::new(MemoryStore::new()));
    }
    open_surreal(url).await
}

#[cfg(feature = "surrealdb")]
async fn open_surreal(url: &str) -> Result<Arc<dyn MetadataStore>> {
    if let Some(path) = url.strip_prefix("rocksdb://") {
        if let Some(parent) = std::path::Path::new(path).parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }
    tracing::info!("Opening metadata store at {}", url);
    let store = chanfs_core::SurrealStore::connect(url).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "surrealdb"))]
async fn open_surreal(url: &str) -> Result<Arc<dyn MetadataStore>> {
    anyhow::bail!(
        "Database '{}' needs the surrealdb feature; use db: {} instead",
        url,
        MEMORY_DB
    )
}

/// Warning for a persistent store paired with the loopback transport
///
/// Messages held by the loopback provider are gone after a restart while
/// the store keeps pointing at them.
pub fn loopback_warning(database_url: &str) -> Option<String> {
    (database_url != MEMORY_DB).then(|| {
        format!(
            "Metadata in {} is persistent but file messages are held in process memory; \
             hosted file contents will be unreadable after a restart",
            database_url
        )
    })
}

/// One session per user account plus the bot, with their saved sessions
/// recorded in the store
async fn register_clients(config: &AppConfig, store: &Arc<dyn MetadataStore>) -> Result<ClientPool> {
    let provider = MemoryProvider::new();
    for channel in config.channels() {
        provider.create_channel(&channel).await;
    }

    let mut accounts: Vec<(ClientIdentity, String)> = config
        .telegram
        .users
        .iter()
        .map(|user| (ClientIdentity::user(&user.name), user.session.clone()))
        .collect();
    if let Some(token) = &config.telegram.bot_token {
        accounts.push((ClientIdentity::bot(BOT_ACCOUNT), token.clone()));
    }

    let mut clients: Vec<Arc<dyn BlobTransport>> = Vec::with_capacity(accounts.len());
    for (mut identity, session) in accounts {
        if let Some(max) = config.telegram.max_upload_parts {
            identity = identity.with_max_upload_parts(max);
        }
        let previous = store.get_session(&identity.name).await?;
        let session = if session.is_empty() {
            previous.map(|saved| saved.session).unwrap_or_default()
        } else {
            session
        };
        store
            .save_session(SavedSession {
                account: identity.name.clone(),
                is_bot: identity.is_bot,
                session,
                updated_at: chrono::Utc::now(),
            })
            .await?;
        tracing::info!(
            "Registered {} session '{}'",
            if identity.is_bot { "bot" } else { "user" },
            identity.name
        );
        clients.push(provider.client(identity));
    }

    let pool = ClientPool::new(clients).context("No usable transport session")?;
    let names: Vec<String> = pool
        .identities()
        .iter()
        .map(|identity| {
            format!(
                "{} ({})",
                identity.name,
                if identity.is_bot { "bot" } else { "user" }
            )
        })
        .collect();
    tracing::info!("Transport pool ready: {}", names.join(", "));
    Ok(pool)
}
