//! Metadata Layer
//!
//! This module handles persistence of the filesystem tree:
//!
//! - The `MetadataStore` trait that every tree operation talks to
//! - `MemoryStore`, the in-process backend used by tests and ephemeral runs
//! - `SurrealStore`, the embedded SurrealDB backend (feature `surrealdb`)
//! - `Transaction`, staged read-your-writes batches committed atomically
//! - The change feed published after every commit
//!
//! # Architecture
//!
//! Nodes are stored as flat documents keyed by id, with the parent link held
//! on the child. Listings, ancestor chains and recursive descents are derived
//! from that link; backends may answer the recursive queries in one round
//! trip, otherwise the trait's single-hop defaults apply.

mod error;
pub mod events;
mod memory_store;
mod metadata_store;
#[cfg(feature = "surrealdb")]
mod surreal_store;
mod transaction;

pub use error::StoreError;
pub use events::{ChangeOperation, StoreChange};
pub use memory_store::MemoryStore;
pub use metadata_store::{
    sort_listing, DescendantEntry, KindFilter, MetadataStore, Mutation, NodeFilter, SavedSession,
    MAX_TREE_DEPTH,
};
#[cfg(feature = "surrealdb")]
pub use surreal_store::SurrealStore;
pub use transaction::Transaction;
