//! File endpoints
//!
//! `GET /files/:id` honours a single `Range: bytes=` header and answers
//! `206 Partial Content` when one is present, `200 OK` otherwise. The body
//! is streamed from a download task through a bounded channel.

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{Json, Response},
    routing::{get, put},
    Router,
};
use chanfs_core::transfer::{ByteRange, ChannelSink};
use chanfs_core::{FsError, Node};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;

use super::folder_endpoints::{report_response, RenameRequest};
use super::{AppState, HttpError, NodeSummary};

/// Chunks buffered ahead of a slow client
const STREAM_BUFFER_CHUNKS: usize = 4;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequest {
    pub source_id: String,
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route(
            "/files/:id",
            get(download_file).put(rename_file).delete(delete_file),
        )
        .route("/files/:id/merge", put(merge_files))
        .with_state(state)
}

/// Requested bounds of a `Range` header, before clamping to the file size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RangeSpec {
    /// `bytes=start-` or `bytes=start-end`
    Span { start: u64, end: Option<u64> },
    /// `bytes=-n`: the last `n` bytes
    Suffix(u64),
}

/// Parse a single-range `Range` header value
pub(crate) fn parse_range_header(value: &str) -> Option<RangeSpec> {
    let spec = value.trim().strip_prefix("bytes=")?.trim();
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    let (start, end) = (start.trim(), end.trim());

    if start.is_empty() {
        return end.parse().ok().map(RangeSpec::Suffix);
    }
    let start = start.parse().ok()?;
    let end = if end.is_empty() {
        None
    } else {
        Some(end.parse().ok()?)
    };
    Some(RangeSpec::Span { start, end })
}

impl RangeSpec {
    /// Inclusive bounds within a file of `size` bytes
    fn bounds(self, size: u64) -> Option<(u64, u64)> {
        if size == 0 {
            return None;
        }
        let last = size - 1;
        match self {
            RangeSpec::Span { start, end } => {
                let end = end.unwrap_or(last).min(last);
                (start <= end).then_some((start, end))
            }
            RangeSpec::Suffix(0) => None,
            RangeSpec::Suffix(n) => Some((size.saturating_sub(n), last)),
        }
    }
}

async fn download_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, HttpError> {
    let node = active_file(&state, &id).await?;
    let size = node.size();

    let requested = headers
        .get(header::RANGE)
        .and_then(|value| value.to_str().ok())
        .map(|value| parse_range_header(value).ok_or(value.to_string()));

    let (status, range) = match requested {
        None => (StatusCode::OK, ByteRange::full(size)),
        Some(Ok(spec)) => {
            let Some((start, end)) = spec.bounds(size) else {
                return Ok(unsatisfiable(size));
            };
            let range = state
                .files
                .resolve_range(&node, Some(start), Some(end))
                .map_err(HttpError::from)?;
            (StatusCode::PARTIAL_CONTENT, range)
        }
        Some(Err(raw)) => {
            tracing::debug!("Ignoring malformed range '{}'", raw);
            (StatusCode::OK, ByteRange::full(size))
        }
    };

    let (start, end) = range.map(|r| (r.start, r.end)).unwrap_or((0, 0));
    let length = range.map(|r| r.byte_count()).unwrap_or(0);

    let (mut sink, rx) = ChannelSink::channel(STREAM_BUFFER_CHUNKS);
    let files = state.files.clone();
    let streamed = node.clone();
    tokio::spawn(async move {
        if let Err(e) = files.read_node_content(&streamed, range, &mut sink).await {
            tracing::error!("Download of '{}' failed: {}", streamed.filename, e);
        }
    });

    let mut response = Response::new(Body::from_stream(ReceiverStream::new(rx)));
    *response.status_mut() = status;
    let response_headers = response.headers_mut();
    insert_header(
        response_headers,
        header::CONTENT_TYPE,
        node.mime().unwrap_or("application/octet-stream"),
    );
    insert_header(response_headers, header::CONTENT_LENGTH, &length.to_string());
    insert_header(response_headers, header::ACCEPT_RANGES, "bytes");
    insert_header(
        response_headers,
        header::CONTENT_DISPOSITION,
        &format!("inline; filename=\"{}\"", node.filename.replace('"', "'")),
    );
    if size > 0 {
        insert_header(
            response_headers,
            header::CONTENT_RANGE,
            &format!("bytes {}-{}/{}", start, end, size),
        );
    }
    Ok(response)
}

fn unsatisfiable(size: u64) -> Response {
    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::RANGE_NOT_SATISFIABLE;
    insert_header(
        response.headers_mut(),
        header::CONTENT_RANGE,
        &format!("bytes */{}", size),
    );
    response
}

fn insert_header(headers: &mut HeaderMap, name: header::HeaderName, value: &str) {
    match HeaderValue::from_str(value) {
        Ok(value) => {
            headers.insert(name, value);
        }
        Err(_) => tracing::warn!("Dropping invalid {} header value", name),
    }
}

async fn rename_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<RenameRequest>,
) -> Result<Json<NodeSummary>, HttpError> {
    active_file(&state, &id).await?;
    let renamed = state.tree.rename(&id, &request.filename).await?;
    Ok(Json(NodeSummary::from(&renamed)))
}

async fn delete_file(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, HttpError> {
    active_file(&state, &id).await?;
    let report = state.tree.delete_by_id(&id, false).await?;
    Ok(report_response(report))
}

async fn merge_files(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<MergeRequest>,
) -> Result<Json<NodeSummary>, HttpError> {
    let merged = state.tree.merge_files(&id, &request.source_id).await?;
    Ok(Json(NodeSummary::from(&merged)))
}

async fn active_file(state: &AppState, id: &str) -> Result<Node, HttpError> {
    let node = state.tree.get_node(id).await?;
    if !node.is_file() {
        return Err(FsError::not_found(format!("file {}", id)).into());
    }
    Ok(node)
}
