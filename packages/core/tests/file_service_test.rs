//! File Service Tests
//!
//! End-to-end behaviour of uploads and reads through the service layer:
//! TEMP → ACTIVE transitions, name reuse after delete, ranged reads,
//! channel inheritance and the change feed.

#[cfg(test)]
mod file_service_tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use chanfs_core::db::{ChangeOperation, MemoryStore, MetadataStore, Mutation, StoreChange};
    use chanfs_core::models::NodeState;
    use chanfs_core::services::{ChangeHandler, ChangeListener, FileService, FsError, TreeService};
    use chanfs_core::transfer::{ChannelSink, WriterSink};
    use chanfs_core::transport::{ClientIdentity, ClientPool, MemoryProvider};
    use chanfs_core::{FsConfig, FsContext};
    use std::sync::Arc;
    use tokio::sync::Mutex;
    use tokio::time::{timeout, Duration};

    const MAIN: &str = "main";
    const MEDIA: &str = "media";

    struct Harness {
        files: FileService,
        tree: TreeService,
        provider: MemoryProvider,
        store: Arc<dyn MetadataStore>,
    }

    async fn harness(min_size: u64) -> Result<Harness> {
        let provider = MemoryProvider::with_channels(&[MAIN, MEDIA]);
        let store: Arc<dyn MetadataStore> = Arc::new(MemoryStore::new());
        let clients = ClientPool::new(vec![
            provider.client(ClientIdentity::user("alice")),
            provider.client(ClientIdentity::bot("helper")),
        ])?;

        let mut config = FsConfig::with_channel(MAIN);
        config.upload.chunk_size = 4;
        config.upload.min_size = min_size;
        config.transport.batch_size = 0;

        let ctx = FsContext::new(store.clone(), Arc::new(clients), config)?;
        ctx.ensure_root().await?;
        Ok(Harness {
            files: FileService::new(ctx.clone()),
            tree: TreeService::new(ctx),
            provider,
            store,
        })
    }

    async fn read_all(h: &Harness, path: &str) -> Result<Vec<u8>> {
        let mut sink = WriterSink::new(Vec::new());
        h.files.read_file_content(path, None, &mut sink).await?;
        Ok(sink.into_inner())
    }

    #[tokio::test]
    async fn test_small_upload_stays_inline() -> Result<()> {
        let h = harness(8).await?;
        let node = h.files.upload("/notes/todo.txt", &b"buy milk"[..]).await?;

        assert_eq!(node.state, NodeState::Active);
        let data = node.file().unwrap();
        assert_eq!(data.content.as_deref(), Some(&b"buy milk"[..]));
        assert!(data.parts.is_empty());
        assert_eq!(h.provider.message_count(MAIN).await, 0);
        assert_eq!(read_all(&h, "/notes/todo.txt").await?, b"buy milk");
        Ok(())
    }

    #[tokio::test]
    async fn test_large_upload_is_hosted() -> Result<()> {
        let h = harness(8).await?;
        let bytes: Vec<u8> = (0..100u8).collect();
        let node = h.files.upload("/big.bin", &bytes[..]).await?;

        let data = node.file().unwrap();
        assert!(data.content.is_none());
        assert_eq!(data.size(), 100);
        assert_eq!(h.files.size("/big.bin").await?, 100);
        assert_eq!(read_all(&h, "/big.bin").await?, bytes);
        Ok(())
    }

    #[tokio::test]
    async fn test_session_exposes_temp_record() -> Result<()> {
        let h = harness(0).await?;
        let session = h.files.create_file_with_content("/pending.bin").await?;

        assert_eq!(session.node().state, NodeState::Temp);
        assert!(h.files.exists("/pending.bin", NodeState::Temp).await?);
        assert!(!h.files.exists("/pending.bin", NodeState::Active).await?);
        assert!(h.tree.list_dir("/").await?.is_empty());

        let node = session.execute(&b"0123456789"[..]).await?;
        assert_eq!(node.state, NodeState::Active);
        assert!(h.files.exists("/pending.bin", NodeState::Active).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_aborted_upload_purges_record() -> Result<()> {
        let h = harness(0).await?;
        let session = h.files.create_file_with_content("/dropped.bin").await?;
        let id = session.node().id.clone();
        session.abort_handle().abort();

        let err = session.execute(&b"0123456789"[..]).await.unwrap_err();

        assert!(matches!(err, FsError::Aborted));
        assert!(h.store.get_node(&id).await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_upload_purges_record() -> Result<()> {
        let h = harness(0).await?;
        h.provider.fail_uploads_after(1).await;

        let err = h.files.upload("/broken.bin", &b"0123456789"[..]).await.unwrap_err();

        assert!(matches!(err, FsError::TransportUnavailable(_)), "{err}");
        assert!(!h.files.exists("/broken.bin", NodeState::Temp).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_active_name_conflicts_but_deleted_name_is_reusable() -> Result<()> {
        let h = harness(0).await?;
        let first = h.files.upload("/report.pdf", &b"version one"[..]).await?;

        let err = h
            .files
            .create_file_with_content("/REPORT.pdf")
            .await
            .err()
            .expect("active sibling must conflict");
        assert!(matches!(err, FsError::Conflict(_)));

        h.tree.delete("/report.pdf", false).await?;
        assert!(h.files.exists("/report.pdf", NodeState::Deleted).await?);

        let second = h.files.upload("/report.pdf", &b"version two"[..]).await?;
        assert_ne!(second.id, first.id);
        assert!(h.store.get_node(&first.id).await?.is_none());
        assert_eq!(read_all(&h, "/report.pdf").await?, b"version two");
        Ok(())
    }

    #[tokio::test]
    async fn test_ranged_reads() -> Result<()> {
        let h = harness(0).await?;
        let bytes: Vec<u8> = (0..40u8).collect();
        let node = h.files.upload("/range.bin", &bytes[..]).await?;

        let range = h.files.resolve_range(&node, Some(10), Some(25))?;
        let mut sink = WriterSink::new(Vec::new());
        let written = h.files.read_file_by_id(&node.id, range, &mut sink).await?;
        assert_eq!(written, 16);
        assert_eq!(sink.into_inner(), &bytes[10..=25]);

        // Open-ended
        let range = h.files.resolve_range(&node, Some(30), None)?;
        let mut sink = WriterSink::new(Vec::new());
        h.files.read_file_content("/range.bin", range, &mut sink).await?;
        assert_eq!(sink.into_inner(), &bytes[30..]);

        let err = h.files.resolve_range(&node, Some(40), None).unwrap_err();
        assert!(matches!(err, FsError::Validation(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_streaming_through_channel_sink() -> Result<()> {
        let h = harness(0).await?;
        let bytes: Vec<u8> = (0..64u8).collect();
        h.files.upload("/stream.bin", &bytes[..]).await?;

        let (mut sink, mut rx) = ChannelSink::channel(4);
        let files = h.files.clone();
        let task =
            tokio::spawn(async move { files.read_file_content("/stream.bin", None, &mut sink).await });

        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await {
            received.extend_from_slice(&chunk?);
        }
        task.await??;
        assert_eq!(received, bytes);
        Ok(())
    }

    #[tokio::test]
    async fn test_uploads_inherit_folder_channel() -> Result<()> {
        let h = harness(0).await?;
        let mut folder = h.tree.create("/videos", true).await?;
        folder.channel = Some(MEDIA.to_string());
        h.store.commit(vec![Mutation::Update(folder)]).await?;

        let node = h.files.upload("/videos/2024/clip.mp4", &b"not really a video"[..]).await?;

        assert_eq!(node.channel.as_deref(), Some(MEDIA));
        assert_eq!(node.mime(), Some("video/mp4"));
        assert_eq!(h.provider.message_count(MEDIA).await, 1);
        assert_eq!(h.provider.message_count(MAIN).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_reading_folders_is_not_found() -> Result<()> {
        let h = harness(0).await?;
        h.tree.create("/dir", true).await?;

        let mut sink = WriterSink::new(Vec::new());
        let err = h
            .files
            .read_file_content("/dir", None, &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, FsError::NotFound(_)));
        Ok(())
    }

    struct Recorder {
        seen: Mutex<Vec<(ChangeOperation, String)>>,
    }

    #[async_trait]
    impl ChangeHandler for Recorder {
        async fn handle(&self, change: &StoreChange) -> Result<()> {
            self.seen
                .lock()
                .await
                .push((change.operation, change.node.filename.clone()));
            Ok(())
        }

        fn name(&self) -> &str {
            "recorder"
        }
    }

    #[tokio::test]
    async fn test_change_listener_sees_upload_lifecycle() -> Result<()> {
        let h = harness(0).await?;
        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
        });
        let mut listener = ChangeListener::new();
        listener.register(recorder.clone());
        let _task = listener.spawn(&h.store);

        h.files.upload("/watched.bin", &b"0123456789"[..]).await?;

        // Insert of the TEMP record, one part update, activation
        timeout(Duration::from_secs(1), async {
            loop {
                if recorder
                    .seen
                    .lock()
                    .await
                    .iter()
                    .filter(|(_, name)| name == "watched.bin")
                    .count()
                    >= 3
                {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await?;

        let seen = recorder.seen.lock().await;
        let ops: Vec<ChangeOperation> = seen
            .iter()
            .filter(|(_, name)| name == "watched.bin")
            .map(|(op, _)| *op)
            .collect();
        assert_eq!(
            ops,
            vec![
                ChangeOperation::Insert,
                ChangeOperation::Update,
                ChangeOperation::Update
            ]
        );
        Ok(())
    }
}
