//! Node Data Structures
//!
//! This module defines the `Node` record that makes up the virtual filesystem
//! tree, the `Part` descriptor for message-hosted file content, and the
//! persisted document shape used by metadata backends.
//!
//! # Architecture
//!
//! - **Tagged kind**: a `Node` carries the fields shared by folders and files;
//!   `NodeKind` discriminates the two explicitly.
//! - **Inline or hosted**: a file keeps small payloads in `content` and large
//!   payloads as an ordered list of `Part`s, each one provider message.
//! - **Soft state**: deletion flips `state` to `Deleted`; purge is a separate
//!   hard removal.
//!
//! # Examples
//!
//! ```rust
//! use chanfs_core::models::{Node, NodeState, ROOT_ID};
//!
//! let folder = Node::new_folder("photos", ROOT_ID);
//! assert!(folder.is_folder());
//! assert_eq!(folder.state, NodeState::Active);
//!
//! let file = Node::new_file("a/b.txt", &folder.id, Some("chan-1".to_string()));
//! assert_eq!(file.filename, "a-b.txt");
//! assert_eq!(file.mime(), Some("text/plain"));
//! ```

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Well-known id of the singleton root folder
pub const ROOT_ID: &str = "root";

/// Display name of the root folder
pub const ROOT_NAME: &str = "root";

/// Type discriminator stored for folders; files store their MIME type instead
pub const FOLDER_TYPE: &str = "folder";

/// Validation errors raised while converting or checking nodes
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("File '{0}' stores both inline content and parts")]
    MixedStorage(String),

    #[error("Invalid inline content encoding for '{id}': {reason}")]
    InvalidContent { id: String, reason: String },
}

/// Lifecycle state of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeState {
    /// Visible to listings and reads
    Active,
    /// File upload in flight; never surfaced to end users
    Temp,
    /// Soft-deleted; record kept until purge
    Deleted,
}

impl NodeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeState::Active => "ACTIVE",
            NodeState::Temp => "TEMP",
            NodeState::Deleted => "DELETED",
        }
    }
}

impl std::fmt::Display for NodeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One provider message holding an ordered slice of a file's bytes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Part {
    /// Provider message identifier
    pub messageid: i64,

    /// Provider-side blob identifier the message is expected to carry
    pub fileid: String,

    /// Name the provider recorded for the attachment
    pub originalfilename: String,

    /// Number of bytes in this part
    pub size: u64,

    /// 0-based position of the part within the file
    pub index: u32,

    /// Reserved, not verified
    #[serde(default)]
    pub hash: String,
}

/// Payload of a file node
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FileData {
    /// MIME type of the file
    pub mime: String,

    /// Inline bytes for small files, mutually exclusive with `parts`
    pub content: Option<Vec<u8>>,

    /// Ordered provider messages for large files
    pub parts: Vec<Part>,
}

impl FileData {
    /// Total number of bytes described by this payload
    pub fn size(&self) -> u64 {
        match &self.content {
            Some(content) => content.len() as u64,
            None => self.parts.iter().map(|p| p.size).sum(),
        }
    }

    /// True when the bytes live on the transport
    pub fn is_hosted(&self) -> bool {
        self.content.is_none() && !self.parts.is_empty()
    }

    /// Parts sorted by index
    pub fn ordered_parts(&self) -> Vec<Part> {
        let mut parts = self.parts.clone();
        parts.sort_by_key(|p| p.index);
        parts
    }
}

/// Folder/file discriminator with the file payload attached
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum NodeKind {
    Folder,
    File(FileData),
}

/// A folder or file entry of the virtual filesystem tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique identifier, stable for the node's lifetime
    pub id: String,

    /// Display name, unique among active siblings (case-insensitive)
    pub filename: String,

    /// Parent folder id; `None` only for the root
    pub parent_id: Option<String>,

    pub state: NodeState,

    /// Provider destination hosting file parts; inherited when unset
    pub channel: Option<String>,

    pub created_at: DateTime<Utc>,

    pub modified_at: DateTime<Utc>,

    pub kind: NodeKind,
}

/// Replace path separators so a name can never introduce a new segment
pub fn normalize_filename(name: &str) -> String {
    name.replace('/', "-")
}

/// Case-insensitive filename comparison used for sibling collisions
pub fn same_filename(a: &str, b: &str) -> bool {
    a.to_lowercase() == b.to_lowercase()
}

impl Node {
    fn with_kind(filename: &str, parent_id: Option<String>, kind: NodeKind) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            filename: normalize_filename(filename),
            parent_id,
            state: NodeState::Active,
            channel: None,
            created_at: now,
            modified_at: now,
            kind,
        }
    }

    /// Create an active folder under `parent_id`
    pub fn new_folder(filename: &str, parent_id: &str) -> Self {
        Self::with_kind(filename, Some(parent_id.to_string()), NodeKind::Folder)
    }

    /// Create the root folder hosted on `channel`
    pub fn new_root(channel: &str) -> Self {
        let mut root = Self::with_kind(ROOT_NAME, None, NodeKind::Folder);
        root.id = ROOT_ID.to_string();
        root.channel = Some(channel.to_string());
        root
    }

    /// Create an active, empty file under `parent_id`
    ///
    /// The MIME type is guessed from the filename extension.
    pub fn new_file(filename: &str, parent_id: &str, channel: Option<String>) -> Self {
        let mut node = Self::with_kind(
            filename,
            Some(parent_id.to_string()),
            NodeKind::File(FileData {
                mime: mime_guess::from_path(filename)
                    .first_or_octet_stream()
                    .to_string(),
                content: None,
                parts: Vec::new(),
            }),
        );
        node.channel = channel;
        node
    }

    pub fn is_root(&self) -> bool {
        self.id == ROOT_ID
    }

    pub fn is_folder(&self) -> bool {
        matches!(self.kind, NodeKind::Folder)
    }

    pub fn is_file(&self) -> bool {
        matches!(self.kind, NodeKind::File(_))
    }

    pub fn is_active(&self) -> bool {
        self.state == NodeState::Active
    }

    /// File payload, `None` for folders
    pub fn file(&self) -> Option<&FileData> {
        match &self.kind {
            NodeKind::File(data) => Some(data),
            NodeKind::Folder => None,
        }
    }

    pub fn file_mut(&mut self) -> Option<&mut FileData> {
        match &mut self.kind {
            NodeKind::File(data) => Some(data),
            NodeKind::Folder => None,
        }
    }

    pub fn mime(&self) -> Option<&str> {
        self.file().map(|f| f.mime.as_str())
    }

    /// Type string as persisted: `"folder"` or the file's MIME type
    pub fn type_name(&self) -> &str {
        match &self.kind {
            NodeKind::Folder => FOLDER_TYPE,
            NodeKind::File(data) => &data.mime,
        }
    }

    /// Byte size of a file, 0 for folders
    pub fn size(&self) -> u64 {
        self.file().map(|f| f.size()).unwrap_or(0)
    }

    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }

    /// Same attributes under a fresh id and fresh timestamps
    pub fn duplicate(&self) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: now,
            modified_at: now,
            ..self.clone()
        }
    }

    /// Check the storage invariant of file nodes
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.filename.is_empty() && !self.is_root() {
            return Err(ValidationError::InvalidFilename(self.id.clone()));
        }
        if self.filename.contains('/') {
            return Err(ValidationError::InvalidFilename(self.filename.clone()));
        }
        if let Some(data) = self.file() {
            let has_content = data.content.as_ref().is_some_and(|c| !c.is_empty());
            if has_content && !data.parts.is_empty() {
                return Err(ValidationError::MixedStorage(self.filename.clone()));
            }
        }
        Ok(())
    }
}

/// Flat document shape persisted by metadata backends
///
/// `type` holds `"folder"` or a MIME string, inline content is base64.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDocument {
    pub id: String,
    pub filename: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub parentfolder: Option<String>,
    pub state: NodeState,
    pub channel: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub parts: Option<Vec<Part>>,
    pub ctime: String,
    pub mtime: String,
}

impl From<&Node> for NodeDocument {
    fn from(node: &Node) -> Self {
        let (content, parts) = match &node.kind {
            NodeKind::Folder => (None, None),
            NodeKind::File(data) => (
                data.content.as_ref().map(|c| BASE64.encode(c)),
                if data.parts.is_empty() {
                    None
                } else {
                    Some(data.parts.clone())
                },
            ),
        };

        NodeDocument {
            id: node.id.clone(),
            filename: node.filename.clone(),
            node_type: node.type_name().to_string(),
            parentfolder: node.parent_id.clone(),
            state: node.state,
            channel: node.channel.clone(),
            content,
            parts,
            ctime: node.created_at.to_rfc3339(),
            mtime: node.modified_at.to_rfc3339(),
        }
    }
}

impl TryFrom<NodeDocument> for Node {
    type Error = ValidationError;

    fn try_from(doc: NodeDocument) -> Result<Self, Self::Error> {
        let parse_time = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now())
        };

        let kind = if doc.node_type == FOLDER_TYPE {
            NodeKind::Folder
        } else {
            let content = match doc.content {
                Some(encoded) => Some(BASE64.decode(encoded.as_bytes()).map_err(|e| {
                    ValidationError::InvalidContent {
                        id: doc.id.clone(),
                        reason: e.to_string(),
                    }
                })?),
                None => None,
            };
            NodeKind::File(FileData {
                mime: doc.node_type,
                content,
                parts: doc.parts.unwrap_or_default(),
            })
        };

        Ok(Node {
            created_at: parse_time(&doc.ctime),
            modified_at: parse_time(&doc.mtime),
            id: doc.id,
            filename: doc.filename,
            parent_id: doc.parentfolder,
            state: doc.state,
            channel: doc.channel,
            kind,
        })
    }
}
