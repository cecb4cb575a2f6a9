//! WebDAV surface
//!
//! Serves the tree as a WebDAV share so it can be mounted by desktop file
//! managers. Protocol handling is `dav-server`'s; [`ChanDavFs`] maps its
//! filesystem calls onto the tree and file services.
//!
//! The share runs on its own listener next to the REST API, with its own
//! optional basic auth credentials.

mod file;
mod filesystem;

pub use filesystem::ChanDavFs;

use axum::{
    extract::{Request, State},
    http::Response,
    Router,
};
use dav_server::{body::Body, fakels::FakeLs, DavHandler};
use tower_http::trace::TraceLayer;
use tower_http::validate_request::ValidateRequestHeaderLayer;

pub fn create_router(fs: ChanDavFs, auth: Option<(String, String)>) -> Router {
    let handler = DavHandler::builder()
        .filesystem(Box::new(fs))
        .locksystem(FakeLs::new())
        .build_handler();

    let router = Router::new().fallback(serve_dav).with_state(handler);
    let router = match &auth {
        #[allow(deprecated)]
        Some((user, pass)) => router.layer(ValidateRequestHeaderLayer::basic(user, pass)),
        None => router,
    };
    router.layer(TraceLayer::new_for_http())
}

async fn serve_dav(State(handler): State<DavHandler>, request: Request) -> Response<Body> {
    handler.handle(request).await
}

/// Serve the share on `host:port` until the process stops
pub async fn start_server(
    fs: ChanDavFs,
    auth: Option<(String, String)>,
    host: &str,
    port: u16,
) -> anyhow::Result<()> {
    let app = create_router(fs, auth);

    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("WebDAV share listening on http://{}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}
