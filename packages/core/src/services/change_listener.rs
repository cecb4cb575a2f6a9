//! Change Listener
//!
//! Background task that follows the metadata store's change feed and hands
//! every [`StoreChange`] to the registered handlers, in commit order.
//!
//! The listener runs beside request handling and sees changes it did not
//! originate. A handler failure is logged and does not stop the loop; a
//! lagging receiver skips the missed events; a closed feed ends the task.

use crate::db::{MetadataStore, StoreChange};
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Callback invoked for each committed change
#[async_trait]
pub trait ChangeHandler: Send + Sync {
    async fn handle(&self, change: &StoreChange) -> Result<()>;

    /// Name used in logs
    fn name(&self) -> &str {
        "handler"
    }
}

#[derive(Default)]
pub struct ChangeListener {
    handlers: Vec<Arc<dyn ChangeHandler>>,
}

impl ChangeListener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ChangeHandler>) {
        info!("Registered change handler '{}'", handler.name());
        self.handlers.push(handler);
    }

    /// Subscribe to `store` and dispatch on a spawned task
    ///
    /// The subscription is taken before this returns, so every change
    /// committed afterwards reaches the handlers.
    pub fn spawn(self, store: &Arc<dyn MetadataStore>) -> JoinHandle<Result<()>> {
        let rx = store.subscribe();
        tokio::spawn(self.run(rx))
    }

    async fn run(self, mut rx: broadcast::Receiver<StoreChange>) -> Result<()> {
        info!("Change listener started with {} handler(s)", self.handlers.len());
        loop {
            match rx.recv().await {
                Ok(change) => {
                    debug!("Dispatching {} for {}", change.event_type(), change.node.id);
                    self.dispatch(&change).await;
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Change listener lagged, {} change(s) skipped", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => {
                    error!("Change feed closed, stopping listener");
                    return Err(anyhow::anyhow!("Change feed closed"));
                }
            }
        }
    }

    async fn dispatch(&self, change: &StoreChange) {
        for handler in &self.handlers {
            if let Err(e) = handler.handle(change).await {
                error!(
                    "Handler '{}' failed on {}: {}",
                    handler.name(),
                    change.event_type(),
                    e
                );
            }
        }
    }
}
