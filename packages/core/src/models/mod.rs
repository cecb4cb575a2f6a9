//! Data Models
//!
//! Tree records (`Node`, `Part`) and their persisted document form.

pub mod node;


pub use node::{
    normalize_filename, same_filename, FileData, Node, NodeDocument, NodeKind, NodeState, Part,
    ValidationError, FOLDER_TYPE, ROOT_ID, ROOT_NAME,
};
