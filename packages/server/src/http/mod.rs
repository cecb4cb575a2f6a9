//! HTTP surface
//!
//! Thin REST layer over the tree and file services:
//!
//! - `folder_endpoints`: listing, folder creation, uploads, rename,
//!   delete and bulk move
//! - `file_endpoints`: range-capable downloads, rename, delete and merge
//!
//! When credentials are configured every route requires HTTP basic auth.

use axum::Router;
use chanfs_core::{FileService, Node, NodeState, TreeService};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tower_http::validate_request::ValidateRequestHeaderLayer;

mod file_endpoints;
mod folder_endpoints;
mod http_error;

pub use http_error::HttpError;

/// Application state shared across all endpoints
#[derive(Clone)]
pub struct AppState {
    pub tree: TreeService,
    pub files: FileService,

    /// Basic auth user and password; open access when `None`
    pub auth: Option<(String, String)>,
}

/// Node as returned by listings and mutations
///
/// Inline content and part manifests stay server-side.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSummary {
    pub id: String,
    pub filename: String,
    #[serde(rename = "type")]
    pub node_type: String,
    pub parent_id: Option<String>,
    pub state: NodeState,
    pub channel: Option<String>,
    pub size: u64,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl From<&Node> for NodeSummary {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id.clone(),
            filename: node.filename.clone(),
            node_type: node.type_name().to_string(),
            parent_id: node.parent_id.clone(),
            state: node.state,
            channel: node.channel.clone(),
            size: node.size(),
            created_at: node.created_at,
            modified_at: node.modified_at,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    let router = Router::new()
        .merge(folder_endpoints::routes(state.clone()))
        .merge(file_endpoints::routes(state.clone()));

    let router = match &state.auth {
        #[allow(deprecated)]
        Some((user, pass)) => router.layer(ValidateRequestHeaderLayer::basic(user, pass)),
        None => router,
    };
    router.layer(TraceLayer::new_for_http())
}

/// Serve `state` on `host:port` until the process stops
pub async fn start_server(state: AppState, host: &str, port: u16) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("HTTP server listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
