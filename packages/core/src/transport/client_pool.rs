//! Client Pool
//!
//! Round-robin selection among authenticated transport sessions. User
//! sessions handle uploads and every destructive or administrative call; bot
//! sessions, when registered, serve downloads.

use super::blob_transport::{BlobTransport, ClientIdentity, TransportError};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct ClientPool {
    users: Vec<Arc<dyn BlobTransport>>,
    bots: Vec<Arc<dyn BlobTransport>>,
    user_cursor: AtomicUsize,
    bot_cursor: AtomicUsize,
}

impl ClientPool {
    /// Build a pool, sorting sessions by their identity
    ///
    /// # Errors
    ///
    /// Returns `TransportError::NoUserSession` when no user session is given.
    pub fn new(clients: Vec<Arc<dyn BlobTransport>>) -> Result<Self, TransportError> {
        let (bots, users): (Vec<_>, Vec<_>) =
            clients.into_iter().partition(|c| c.identity().is_bot);

        if users.is_empty() {
            return Err(TransportError::NoUserSession);
        }

        tracing::info!(
            "Client pool ready with {} user and {} bot session(s)",
            users.len(),
            bots.len()
        );

        Ok(Self {
            users,
            bots,
            user_cursor: AtomicUsize::new(0),
            bot_cursor: AtomicUsize::new(0),
        })
    }

    /// Next session in rotation
    ///
    /// Downloads rotate through bots when any exist; everything else rotates
    /// through users.
    pub fn next_client(&self, download: bool) -> Arc<dyn BlobTransport> {
        if download && !self.bots.is_empty() {
            let i = self.bot_cursor.fetch_add(1, Ordering::Relaxed) % self.bots.len();
            return self.bots[i].clone();
        }
        let i = self.user_cursor.fetch_add(1, Ordering::Relaxed) % self.users.len();
        self.users[i].clone()
    }

    /// Session used for relaying notifications, bots first
    pub fn notifier(&self) -> Arc<dyn BlobTransport> {
        self.next_client(true)
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn bot_count(&self) -> usize {
        self.bots.len()
    }

    pub fn identities(&self) -> Vec<ClientIdentity> {
        self.users
            .iter()
            .chain(self.bots.iter())
            .map(|c| c.identity().clone())
            .collect()
    }
}

impl std::fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool")
            .field("users", &self.users.len())
            .field("bots", &self.bots.len())
            .finish()
    }
}
