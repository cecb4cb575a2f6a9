//! Metadata Store Error Types
//!
//! Integrity failures detected while applying a commit batch. Backends return
//! them wrapped in `anyhow::Error`; callers that care downcast.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Node already exists: {0}")]
    DuplicateId(String),

    #[error("Node not found: {0}")]
    MissingNode(String),

    #[error("The root folder cannot be removed")]
    RootImmutable,

    #[error("Invalid node '{id}': {reason}")]
    InvalidNode { id: String, reason: String },
}

impl StoreError {
    pub fn duplicate_id(id: impl Into<String>) -> Self {
        Self::DuplicateId(id.into())
    }

    pub fn missing_node(id: impl Into<String>) -> Self {
        Self::MissingNode(id.into())
    }

    pub fn invalid_node(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidNode {
            id: id.into(),
            reason: reason.into(),
        }
    }
}
