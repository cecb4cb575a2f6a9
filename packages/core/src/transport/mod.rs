//! Transport Layer
//!
//! Sessions with the messaging provider that hosts file bytes:
//!
//! - `BlobTransport`: the per-session trait (upload, finalize, read, relay)
//! - `ClientPool`: round-robin over user and bot sessions
//! - `MemoryProvider` / `MemoryTransport`: the in-process loopback provider
//! - `Pacer`: batch pacing for bursts of provider calls

mod blob_transport;
mod client_pool;
mod memory_transport;
mod pacer;

pub use blob_transport::{
    BlobTransport, ClientIdentity, MediaDescriptor, SentMessage, TransportError,
    DEFAULT_MAX_UPLOAD_PARTS,
};
pub use client_pool::ClientPool;
pub use memory_transport::{MemoryProvider, MemoryTransport};
pub use pacer::Pacer;
