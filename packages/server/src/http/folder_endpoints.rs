//! Folder endpoints
//!
//! Listing, folder creation, multipart uploads, rename, delete and bulk
//! move, all addressed by folder id.

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use chanfs_core::{normalize_filename, BatchReport, DeleteReport, FsError, Node};
use serde::Deserialize;
use tokio::io::AsyncWriteExt;

use super::{AppState, HttpError, NodeSummary};

/// Bytes buffered between the multipart reader and the uploader
const UPLOAD_PIPE_CAPACITY: usize = 256 * 1024;

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub filename: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub ids: Vec<String>,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/folders/:id",
            get(list_folder).put(rename_folder).delete(delete_folder),
        )
        .route("/folders/:id/folder/:name", post(create_folder))
        .route("/folders/:id/files", post(upload_file))
        .route("/folders/:id/files/:name", post(upload_named_file))
        .route("/folders/:id/move", post(move_items))
        .with_state(state)
}

async fn list_folder(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<NodeSummary>>, HttpError> {
    let children = state.tree.list_folder(&id).await?;
    Ok(Json(children.iter().map(NodeSummary::from).collect()))
}

async fn create_folder(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
) -> Result<(StatusCode, Json<NodeSummary>), HttpError> {
    let folder = state.tree.create_folder(&id, &name).await?;
    Ok((StatusCode::CREATED, Json(NodeSummary::from(&folder))))
}

async fn rename_folder(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<NodeSummary>, HttpError> {
    let node = state.tree.get_node(&id).await?;
    if !node.is_folder() {
        return Err(FsError::not_found(format!("folder {}", id)).into());
    }
    let renamed = state.tree.rename(&id, &request.filename).await?;
    Ok(Json(NodeSummary::from(&renamed)))
}

async fn delete_folder(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, HttpError> {
    let node = state.tree.get_node(&id).await?;
    if !node.is_folder() {
        return Err(FsError::not_found(format!("folder {}", id)).into());
    }
    let report = state.tree.delete_by_id(&id, false).await?;
    Ok(report_response(report))
}

/// 200 when every item was removed, 422 with the same report otherwise
pub(super) fn report_response(report: DeleteReport) -> Response {
    let status = if report.is_success() {
        StatusCode::OK
    } else {
        StatusCode::UNPROCESSABLE_ENTITY
    };
    (status, Json(report)).into_response()
}

async fn move_items(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<MoveRequest>,
) -> Result<Json<BatchReport>, HttpError> {
    if request.ids.is_empty() {
        return Err(HttpError::invalid_input("ids cannot be empty"));
    }
    let report = state.tree.move_items(&request.ids, &id).await?;
    Ok(Json(report))
}

async fn upload_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<NodeSummary>), HttpError> {
    receive_upload(&state, &id, None, multipart).await
}

async fn upload_named_file(
    State(state): State<AppState>,
    Path((id, name)): Path<(String, String)>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<NodeSummary>), HttpError> {
    receive_upload(&state, &id, Some(name), multipart).await
}

/// Stream the first multipart field into a new file of folder `folder_id`
///
/// The file is named after the path segment when given, else after the
/// field's filename.
async fn receive_upload(
    state: &AppState,
    folder_id: &str,
    name: Option<String>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<NodeSummary>), HttpError> {
    let folder = state.tree.get_node(folder_id).await?;
    if !folder.is_folder() {
        return Err(FsError::not_found(format!("folder {}", folder_id)).into());
    }

    let mut field = multipart
        .next_field()
        .await
        .map_err(|e| HttpError::invalid_input(format!("Invalid multipart body: {}", e)))?
        .ok_or_else(|| HttpError::invalid_input("Multipart body has no file field"))?;

    let filename = name
        .or_else(|| field.file_name().map(str::to_string))
        .map(|n| normalize_filename(n.trim()))
        .filter(|n| !n.is_empty())
        .ok_or_else(|| HttpError::invalid_input("Missing filename"))?;

    let path = upload_path(state, &folder, &filename).await?;
    let session = state.files.create_file_with_content(&path).await?;
    let abort = session.abort_handle();
    let (mut writer, reader) = tokio::io::duplex(UPLOAD_PIPE_CAPACITY);

    let feed = async move {
        let result: Result<(), String> = async {
            while let Some(chunk) = field.chunk().await.map_err(|e| e.to_string())? {
                writer.write_all(&chunk).await.map_err(|e| e.to_string())?;
            }
            writer.shutdown().await.map_err(|e| e.to_string())
        }
        .await;
        if result.is_err() {
            abort.abort();
        }
        result
    };

    let (fed, uploaded) = tokio::join!(feed, session.execute(reader));
    if let Err(e) = fed {
        tracing::warn!("Upload of '{}' interrupted: {}", path, e);
        if let Ok(node) = uploaded {
            // Truncated body completed before the abort was observed
            state.tree.delete_by_id(&node.id, false).await?;
            state.tree.purge(&node.id).await?;
        }
        return Err(HttpError::invalid_input(format!("Upload interrupted: {}", e)));
    }
    let node = uploaded?;

    tracing::info!("Uploaded '{}' ({} bytes)", path, node.size());
    Ok((StatusCode::CREATED, Json(NodeSummary::from(&node))))
}

async fn upload_path(state: &AppState, folder: &Node, filename: &str) -> Result<String, HttpError> {
    let folder_path = state.tree.resolver().build_path(folder).await?;
    Ok(format!("{}/{}", folder_path.trim_end_matches('/'), filename))
}
