//! Filesystem Services
//!
//! The operations exposed to the CLI and the HTTP surface:
//!
//! - `TreeService` - create, list, rename, move, copy, delete, purge, merge
//! - `FileService` - upload sessions and ranged reads of file bytes
//! - `PathResolver` - path ↔ node chain mapping and channel inheritance
//! - `ChangeListener` - dispatch of the metadata change feed to handlers
//!
//! Services hold a cloned [`FsContext`](crate::context::FsContext) and
//! return [`FsResult`].

pub mod change_listener;
pub mod error;
pub mod file_service;
pub mod path_resolver;
pub mod tree_service;

pub use change_listener::{ChangeHandler, ChangeListener};
pub use error::{FsError, FsResult};
pub use file_service::{FileService, UploadSession};
pub use path_resolver::{last_segment, split_path, PathResolver};
pub use tree_service::{BatchReport, ChannelPost, DeleteItem, DeleteReport, TreeService};

#[cfg(test)]
mod tree_service_test;
