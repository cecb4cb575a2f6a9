//! Change Feed Events
//!
//! Events are published by metadata stores on a tokio broadcast channel after
//! each successful commit. Every mutation of a committed batch produces exactly
//! one `StoreChange`, in batch order.

use crate::models::Node;
use serde::{Deserialize, Serialize};

/// Kind of document operation that produced a change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

/// One committed change of the node collection
///
/// For deletes, `node` is the document as it was before removal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreChange {
    pub operation: ChangeOperation,
    pub node: Node,
}

impl StoreChange {
    pub fn new(operation: ChangeOperation, node: Node) -> Self {
        Self { operation, node }
    }

    /// Event name used in log lines
    pub fn event_type(&self) -> &'static str {
        match self.operation {
            ChangeOperation::Insert => "node:inserted",
            ChangeOperation::Update => "node:updated",
            ChangeOperation::Delete => "node:deleted",
        }
    }
}
