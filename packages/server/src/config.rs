//! Application configuration
//!
//! The YAML file describes the provider accounts, the upload policy, the
//! metadata database and the HTTP listener:
//!
//! ```yaml
//! telegram:
//!   users:
//!     - name: alice
//!   bot_token: "123:abc"
//!   notify_channel: alerts
//!   channels: [media]
//!   upload:
//!     min_size: 0
//!     channel: storage
//! db: rocksdb://./data/chanfs.db
//! logger: info
//! http:
//!   host: 127.0.0.1
//!   port: 8080
//! webdav:
//!   enabled: false
//!   port: 1900
//! ```
//!
//! The `DB` environment variable overrides `db`; command line flags override
//! the HTTP and logger values.

use anyhow::{Context, Result};
use chanfs_core::{FsConfig, TransportConfig, UploadConfig, UPLOAD_CHUNK};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding the `db` entry
pub const DB_ENV: &str = "DB";

/// `db` value selecting the in-memory store
pub const MEMORY_DB: &str = "memory";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccount {
    pub name: String,

    /// Opaque provider session, persisted with the saved sessions
    #[serde(default)]
    pub session: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UploadSection {
    pub min_size: u64,
    pub channel: String,
}

impl Default for UploadSection {
    fn default() -> Self {
        Self {
            min_size: 0,
            channel: "storage".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchSection {
    pub size: usize,
    pub pause_ms: u64,
}

impl Default for BatchSection {
    fn default() -> Self {
        let transport = TransportConfig::default();
        Self {
            size: transport.batch_size,
            pause_ms: transport.batch_pause_ms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelegramSection {
    pub users: Vec<UserAccount>,
    pub bot_token: Option<String>,

    /// Channel receiving failure notifications
    pub notify_channel: Option<String>,

    /// Additional provider channels folders may be assigned to
    pub channels: Vec<String>,

    /// Per-message part limit; provider default when unset
    pub max_upload_parts: Option<u32>,

    pub upload: UploadSection,
    pub batch: BatchSection,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpSection {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
}

impl Default for HttpSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            user: None,
            pass: None,
        }
    }
}

impl HttpSection {
    /// Basic auth credentials when both user and password are set
    pub fn credentials(&self) -> Option<(String, String)> {
        basic_credentials(&self.user, &self.pass)
    }
}

/// WebDAV listener, started next to the HTTP API when enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WebdavSection {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub pass: Option<String>,
}

impl Default for WebdavSection {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 1900,
            user: None,
            pass: None,
        }
    }
}

impl WebdavSection {
    pub fn credentials(&self) -> Option<(String, String)> {
        basic_credentials(&self.user, &self.pass)
    }
}

fn basic_credentials(user: &Option<String>, pass: &Option<String>) -> Option<(String, String)> {
    match (user, pass) {
        (Some(user), Some(pass)) if !user.is_empty() => Some((user.clone(), pass.clone())),
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub telegram: TelegramSection,
    pub db: Option<String>,
    pub logger: String,
    pub data: Option<PathBuf>,
    pub http: HttpSection,
    pub webdav: WebdavSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            telegram: TelegramSection::default(),
            db: None,
            logger: "info".to_string(),
            data: None,
            http: HttpSection::default(),
            webdav: WebdavSection::default(),
        }
    }
}

impl AppConfig {
    /// Load and validate the YAML file at `path`, applying `DB` from the
    /// environment
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_yaml(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        if let Ok(db) = std::env::var(DB_ENV) {
            config.db = Some(db);
        }
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Default location: `<config dir>/chanfs/config.yaml`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|dir| dir.join("chanfs"))
            .unwrap_or_else(|| PathBuf::from("."))
            .join("config.yaml")
    }

    /// Every provider channel the process talks to, upload channel first
    pub fn channels(&self) -> Vec<String> {
        let mut channels = vec![self.telegram.upload.channel.clone()];
        let extra = self
            .telegram
            .channels
            .iter()
            .chain(self.telegram.notify_channel.iter());
        for channel in extra {
            if !channels.contains(channel) {
                channels.push(channel.clone());
            }
        }
        channels
    }

    pub fn validate(&self) -> Result<()> {
        if self.telegram.users.is_empty() {
            anyhow::bail!("telegram.users must list at least one account");
        }
        self.fs_config()
            .validate()
            .context("Invalid upload settings")?;
        Ok(())
    }

    /// Core filesystem settings derived from the `telegram` section
    pub fn fs_config(&self) -> FsConfig {
        FsConfig {
            upload: UploadConfig {
                chunk_size: UPLOAD_CHUNK,
                min_size: self.telegram.upload.min_size,
                channel: self.telegram.upload.channel.clone(),
            },
            transport: TransportConfig {
                batch_size: self.telegram.batch.size,
                batch_pause_ms: self.telegram.batch.pause_ms,
            },
        }
    }

    /// Data folder: configured, else `<data dir>/chanfs`
    pub fn data_dir(&self) -> PathBuf {
        self.data.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .map(|dir| dir.join("chanfs"))
                .unwrap_or_else(|| PathBuf::from("./data"))
        })
    }

    /// Metadata store endpoint
    ///
    /// Without an explicit `db`, a RocksDB file in the data folder when the
    /// SurrealDB backend is compiled in, the in-memory store otherwise.
    pub fn database_url(&self) -> String {
        if let Some(db) = self.db.as_deref().filter(|db| !db.trim().is_empty()) {
            return db.to_string();
        }
        if cfg!(feature = "surrealdb") {
            format!("rocksdb://{}", self.data_dir().join("chanfs.db").display())
        } else {
            MEMORY_DB.to_string()
        }
    }
}
