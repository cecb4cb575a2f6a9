//! WebDAV Share Tests
//!
//! Drives the share router in-process with `tower::ServiceExt::oneshot`:
//! collection creation, uploads through PUT, ranged reads, listings and
//! the MOVE/COPY/DELETE mapping onto tree operations.

#[cfg(test)]
mod webdav_tests {
    use anyhow::Result;
    use axum::body::{Body, Bytes};
    use axum::http::{header, Request, StatusCode};
    use axum::Router;
    use base64::Engine;
    use chanfs_core::models::NodeState;
    use chanfs_core::transport::{ClientIdentity, ClientPool, MemoryProvider};
    use chanfs_core::{FileService, FsConfig, FsContext, MemoryStore, MetadataStore, TreeService};
    use chanfs_server::webdav::{create_router, ChanDavFs};
    use http_body_util::BodyExt;
    use std::sync::Arc;
    use tower::ServiceExt;

    const CHANNEL: &str = "storage";

    struct Share {
        app: Router,
        tree: TreeService,
    }

    async fn share(auth: Option<(&str, &str)>) -> Result<Share> {
        let provider = MemoryProvider::with_channels(&[CHANNEL]);
        let store: Arc<dyn MetadataStore> = Arc::new(MemoryStore::new());
        let clients = ClientPool::new(vec![provider.client(ClientIdentity::user("alice"))])?;

        let mut config = FsConfig::with_channel(CHANNEL);
        config.upload.chunk_size = 4;
        config.transport.batch_size = 0;

        let ctx = FsContext::new(store, Arc::new(clients), config)?;
        ctx.ensure_root().await?;
        let tree = TreeService::new(ctx.clone());
        let fs = ChanDavFs::new(tree.clone(), FileService::new(ctx));
        Ok(Share {
            app: create_router(fs, auth.map(|(u, p)| (u.to_string(), p.to_string()))),
            tree,
        })
    }

    async fn send(app: &Router, request: Request<Body>) -> Result<(StatusCode, Bytes)> {
        let response = app.clone().oneshot(request).await?;
        let status = response.status();
        let body = response.into_body().collect().await?.to_bytes();
        Ok((status, body))
    }

    fn request(method: &str, uri: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    fn put(uri: &str, data: &'static [u8]) -> Request<Body> {
        Request::builder()
            .method("PUT")
            .uri(uri)
            .header(header::CONTENT_LENGTH, data.len())
            .body(Body::from(data))
            .unwrap()
    }

    fn relocate(method: &str, uri: &str, destination: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header(header::HOST, "localhost")
            .header("Destination", format!("http://localhost{destination}"))
            .body(Body::empty())
            .unwrap()
    }

    fn propfind(uri: &str) -> Request<Body> {
        Request::builder()
            .method("PROPFIND")
            .uri(uri)
            .header("Depth", "1")
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn test_put_then_read_back() -> Result<()> {
        let s = share(None).await?;

        let (status, _) = send(&s.app, request("MKCOL", "/docs")).await?;
        assert_eq!(status, StatusCode::CREATED);

        let (status, _) = send(&s.app, put("/docs/notes.txt", b"hello webdav share")).await?;
        assert!(status.is_success(), "PUT returned {status}");

        let node = s.tree.resolve("/docs/notes.txt").await?;
        assert_eq!(node.state, NodeState::Active);
        assert_eq!(node.size(), 18);
        assert_eq!(node.mime(), Some("text/plain"));

        let (status, body) = send(&s.app, request("GET", "/docs/notes.txt")).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(&body[..], b"hello webdav share");

        let ranged = Request::builder()
            .uri("/docs/notes.txt")
            .header(header::RANGE, "bytes=6-11")
            .body(Body::empty())
            .unwrap();
        let (status, body) = send(&s.app, ranged).await?;
        assert_eq!(status, StatusCode::PARTIAL_CONTENT);
        assert_eq!(&body[..], b"webdav");

        let (status, body) = send(&s.app, propfind("/docs/")).await?;
        assert_eq!(status, StatusCode::MULTI_STATUS);
        assert!(String::from_utf8_lossy(&body).contains("notes.txt"));
        Ok(())
    }

    #[tokio::test]
    async fn test_put_replaces_existing_file() -> Result<()> {
        let s = share(None).await?;

        send(&s.app, put("/report.bin", b"first version")).await?;
        let (status, _) = send(&s.app, put("/report.bin", b"second")).await?;
        assert!(status.is_success(), "PUT returned {status}");

        let (_, body) = send(&s.app, request("GET", "/report.bin")).await?;
        assert_eq!(&body[..], b"second");
        let listing = s.tree.list_dir("/").await?;
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].size(), 6);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_resources() -> Result<()> {
        let s = share(None).await?;

        let (status, _) = send(&s.app, request("GET", "/nothing.txt")).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&s.app, put("/no/such/folder.txt", b"data")).await?;
        assert!(status.is_client_error(), "PUT returned {status}");
        assert!(s.tree.resolve("/no").await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_move_copy_and_delete() -> Result<()> {
        let s = share(None).await?;
        send(&s.app, put("/a.txt", b"moving bytes")).await?;
        send(&s.app, request("MKCOL", "/dir")).await?;

        let (status, _) = send(&s.app, relocate("MOVE", "/a.txt", "/dir/b.txt")).await?;
        assert!(status.is_success(), "MOVE returned {status}");
        let (status, _) = send(&s.app, request("GET", "/a.txt")).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, body) = send(&s.app, request("GET", "/dir/b.txt")).await?;
        assert_eq!(&body[..], b"moving bytes");

        let (status, _) = send(&s.app, relocate("COPY", "/dir/b.txt", "/c.txt")).await?;
        assert!(status.is_success(), "COPY returned {status}");
        let (_, body) = send(&s.app, request("GET", "/c.txt")).await?;
        assert_eq!(&body[..], b"moving bytes");
        assert_ne!(
            s.tree.resolve("/c.txt").await?.id,
            s.tree.resolve("/dir/b.txt").await?.id
        );

        let (status, _) = send(&s.app, request("DELETE", "/dir")).await?;
        assert!(status.is_success(), "DELETE returned {status}");
        assert!(s.tree.resolve("/dir").await.is_err());
        let (status, _) = send(&s.app, request("GET", "/dir/b.txt")).await?;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (_, body) = send(&s.app, request("GET", "/c.txt")).await?;
        assert_eq!(&body[..], b"moving bytes");
        Ok(())
    }

    #[tokio::test]
    async fn test_share_requires_credentials() -> Result<()> {
        let s = share(Some(("dav", "secret"))).await?;

        let (status, _) = send(&s.app, propfind("/")).await?;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let token = base64::engine::general_purpose::STANDARD.encode("dav:secret");
        let mut authorized = propfind("/");
        authorized.headers_mut().insert(
            header::AUTHORIZATION,
            format!("Basic {token}").parse().unwrap(),
        );
        let (status, _) = send(&s.app, authorized).await?;
        assert_eq!(status, StatusCode::MULTI_STATUS);
        Ok(())
    }
}
