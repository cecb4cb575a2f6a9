//! chanfs Core
//!
//! A virtual filesystem whose file bytes live as attachments in messaging
//! channels and whose tree lives in a metadata document store.
//!
//! # Architecture
//!
//! - **Metadata**: folders and files are flat node documents linked by
//!   `parent_id`, behind the [`db::MetadataStore`] seam
//! - **Transport**: file bytes are split into provider messages through the
//!   [`transport::BlobTransport`] seam, balanced by a [`transport::ClientPool`]
//! - **Transfer**: [`transfer::ChunkUploader`] and
//!   [`transfer::RangeDownloader`] stream bytes in and out
//! - **Services**: tree operations and file content built on the above
//!
//! # Modules
//!
//! - [`models`] - Node, Part and the persisted document shape
//! - [`db`] - metadata stores, transactions and the change feed
//! - [`transport`] - provider sessions and pacing
//! - [`transfer`] - chunked upload and ranged download
//! - [`services`] - TreeService, FileService, PathResolver, ChangeListener
//! - [`config`] / [`context`] - per-process configuration and wiring

pub mod config;
pub mod context;
pub mod db;
pub mod models;
pub mod services;
pub mod transfer;
pub mod transport;

// Re-export commonly used types
pub use config::{FsConfig, TransportConfig, UploadConfig, UPLOAD_CHUNK};
pub use context::FsContext;
pub use db::{MemoryStore, MetadataStore, NodeFilter, StoreChange, Transaction};
#[cfg(feature = "surrealdb")]
pub use db::SurrealStore;
pub use models::*;
pub use services::*;
