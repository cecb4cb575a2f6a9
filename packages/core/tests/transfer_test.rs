//! Transfer Engine Tests
//!
//! Drives ChunkUploader and RangeDownloader against the loopback provider:
//! inline promotion around `min_size`, portion splitting at the per-session
//! part limit, ranged reads across part boundaries, and the failure paths.

#[cfg(test)]
mod transfer_tests {
    use anyhow::Result;
    use async_trait::async_trait;
    use chanfs_core::models::{FileData, Part};
    use chanfs_core::transfer::{
        ByteRange, ChunkUploader, RangeDownloader, TransferError, UploadListener, UploadOutcome,
        UploadTarget, WriterSink,
    };
    use chanfs_core::transport::{BlobTransport, ClientIdentity, MemoryProvider};
    use std::sync::Arc;
    use tokio::sync::Mutex;

    const CHANNEL: &str = "uploads";

    #[derive(Default)]
    struct RecordingListener {
        portions: Mutex<Vec<Part>>,
        completed: Mutex<bool>,
        aborted: Mutex<Option<String>>,
    }

    #[async_trait]
    impl UploadListener for RecordingListener {
        async fn on_portion(&self, part: &Part) -> anyhow::Result<()> {
            self.portions.lock().await.push(part.clone());
            Ok(())
        }

        async fn on_complete(&self, _outcome: &UploadOutcome) -> anyhow::Result<()> {
            *self.completed.lock().await = true;
            Ok(())
        }

        async fn on_aborted(&self, error: &TransferError) {
            *self.aborted.lock().await = Some(error.to_string());
        }
    }

    fn data(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn session(provider: &MemoryProvider, max_parts: u32) -> Arc<dyn BlobTransport> {
        provider.client(ClientIdentity::user("alice").with_max_upload_parts(max_parts))
    }

    fn uploader(client: Arc<dyn BlobTransport>, chunk: usize, min_size: u64) -> ChunkUploader {
        let target = UploadTarget {
            channel: CHANNEL.to_string(),
            filename: "data.bin".to_string(),
            mime: "application/octet-stream".to_string(),
        };
        ChunkUploader::new(client, target, chunk, min_size)
    }

    async fn upload(
        provider: &MemoryProvider,
        bytes: &[u8],
        chunk: usize,
        min_size: u64,
        max_parts: u32,
    ) -> Result<(UploadOutcome, RecordingListener)> {
        let listener = RecordingListener::default();
        let outcome = uploader(session(provider, max_parts), chunk, min_size)
            .execute(bytes, &listener)
            .await?;
        Ok((outcome, listener))
    }

    async fn download(
        provider: &MemoryProvider,
        file: &FileData,
        range: Option<ByteRange>,
    ) -> Result<Vec<u8>> {
        let client = provider.client(ClientIdentity::bot("reader"));
        let mut sink = WriterSink::new(Vec::new());
        RangeDownloader::new(client, CHANNEL, 8)
            .execute(file, range, &mut sink)
            .await?;
        Ok(sink.into_inner())
    }

    fn hosted(parts: Vec<Part>) -> FileData {
        FileData {
            mime: "application/octet-stream".to_string(),
            content: None,
            parts,
        }
    }

    #[tokio::test]
    async fn test_empty_stream_is_inline() -> Result<()> {
        let provider = MemoryProvider::with_channels(&[CHANNEL]);
        let (outcome, listener) = upload(&provider, &[], 4, 0, 10).await?;

        assert_eq!(outcome, UploadOutcome::Inline(Default::default()));
        assert!(*listener.completed.lock().await);
        assert_eq!(provider.upload_calls().await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_small_file_promotion_threshold() -> Result<()> {
        let provider = MemoryProvider::with_channels(&[CHANNEL]);

        // Exactly min_size stays inline
        let bytes = data(8);
        let (outcome, _) = upload(&provider, &bytes, 4, 8, 10).await?;
        assert_eq!(outcome, UploadOutcome::Inline(bytes.clone().into()));
        assert_eq!(provider.upload_calls().await, 0);

        // One byte more flushes the buffer as leading parts
        let bytes = data(9);
        let (outcome, listener) = upload(&provider, &bytes, 4, 8, 10).await?;
        let UploadOutcome::Hosted(parts) = outcome else {
            panic!("expected hosted outcome");
        };
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].size, 9);
        assert_eq!(parts[0].originalfilename, "data.bin");
        assert_eq!(provider.upload_calls().await, 3);
        assert_eq!(listener.portions.lock().await.len(), 1);

        assert_eq!(download(&provider, &hosted(parts), ByteRange::full(9)).await?, bytes);
        Ok(())
    }

    #[tokio::test]
    async fn test_portions_split_at_part_limit() -> Result<()> {
        let provider = MemoryProvider::with_channels(&[CHANNEL]);
        let bytes = data(20);

        let (outcome, listener) = upload(&provider, &bytes, 4, 0, 2).await?;
        let UploadOutcome::Hosted(parts) = outcome else {
            panic!("expected hosted outcome");
        };

        let sizes: Vec<u64> = parts.iter().map(|p| p.size).collect();
        let names: Vec<&str> = parts.iter().map(|p| p.originalfilename.as_str()).collect();
        let indexes: Vec<u32> = parts.iter().map(|p| p.index).collect();
        assert_eq!(sizes, vec![8, 8, 4]);
        assert_eq!(names, vec!["data.bin.001", "data.bin.002", "data.bin.003"]);
        assert_eq!(indexes, vec![0, 1, 2]);
        assert_eq!(listener.portions.lock().await.len(), 3);
        assert_eq!(provider.message_count(CHANNEL).await, 3);

        assert_eq!(download(&provider, &hosted(parts), ByteRange::full(20)).await?, bytes);
        Ok(())
    }

    #[tokio::test]
    async fn test_stream_ending_on_portion_boundary() -> Result<()> {
        let provider = MemoryProvider::with_channels(&[CHANNEL]);
        let bytes = data(16);

        let (outcome, _) = upload(&provider, &bytes, 4, 0, 2).await?;
        let UploadOutcome::Hosted(parts) = outcome else {
            panic!("expected hosted outcome");
        };

        assert_eq!(parts.len(), 2);
        assert_eq!(provider.message_count(CHANNEL).await, 2);
        assert_eq!(download(&provider, &hosted(parts), ByteRange::full(16)).await?, bytes);
        Ok(())
    }

    #[tokio::test]
    async fn test_single_full_portion_keeps_plain_name() -> Result<()> {
        let provider = MemoryProvider::with_channels(&[CHANNEL]);
        let bytes = data(8);

        let (outcome, listener) = upload(&provider, &bytes, 4, 0, 2).await?;
        let UploadOutcome::Hosted(parts) = outcome else {
            panic!("expected hosted outcome");
        };

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].originalfilename, "data.bin");
        assert_eq!(parts[0].size, 8);
        assert_eq!(listener.portions.lock().await.len(), 1);
        assert_eq!(provider.message_count(CHANNEL).await, 1);
        assert_eq!(download(&provider, &hosted(parts), ByteRange::full(8)).await?, bytes);

        // One more byte opens a second portion and both get suffixes
        let bytes = data(9);
        let (outcome, _) = upload(&provider, &bytes, 4, 0, 2).await?;
        let UploadOutcome::Hosted(parts) = outcome else {
            panic!("expected hosted outcome");
        };
        let names: Vec<&str> = parts.iter().map(|p| p.originalfilename.as_str()).collect();
        assert_eq!(names, vec!["data.bin.001", "data.bin.002"]);
        assert_eq!(download(&provider, &hosted(parts), ByteRange::full(9)).await?, bytes);
        Ok(())
    }

    #[tokio::test]
    async fn test_single_chunk_file_round_trip() -> Result<()> {
        let provider = MemoryProvider::with_channels(&[CHANNEL]);
        let bytes = data(4);

        let (outcome, _) = upload(&provider, &bytes, 4, 0, 10).await?;
        let UploadOutcome::Hosted(parts) = outcome else {
            panic!("expected hosted outcome");
        };

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].originalfilename, "data.bin");
        assert_eq!(provider.upload_calls().await, 1);
        let file = hosted(parts);
        assert_eq!(download(&provider, &file, ByteRange::full(4)).await?, bytes);
        assert_eq!(
            download(&provider, &file, Some(ByteRange::new(3, 3, 4)?)).await?,
            &bytes[3..]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_ranges_across_part_boundaries() -> Result<()> {
        let provider = MemoryProvider::with_channels(&[CHANNEL]);
        let bytes = data(50);
        let (outcome, _) = upload(&provider, &bytes, 4, 0, 3).await?;
        let UploadOutcome::Hosted(parts) = outcome else {
            panic!("expected hosted outcome");
        };
        let file = hosted(parts);

        for (start, end) in [(0, 0), (11, 12), (5, 30), (12, 23), (49, 49), (0, 49), (40, 200)] {
            let range = ByteRange::new(start, end, 50)?;
            let got = download(&provider, &file, Some(range)).await?;
            let end = end.min(49) as usize;
            assert_eq!(got, &bytes[start as usize..=end], "range {start}-{end}");
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_every_range_of_multi_portion_file() -> Result<()> {
        const LEN: u64 = 23;
        let provider = MemoryProvider::with_channels(&[CHANNEL]);
        let bytes = data(LEN as usize);
        let (outcome, _) = upload(&provider, &bytes, 3, 0, 2).await?;
        let UploadOutcome::Hosted(parts) = outcome else {
            panic!("expected hosted outcome");
        };
        assert_eq!(parts.len(), 4);
        let file = hosted(parts);

        for start in 0..LEN {
            for end in start..LEN {
                let range = ByteRange::new(start, end, LEN)?;
                let got = download(&provider, &file, Some(range)).await?;
                assert_eq!(
                    got,
                    &bytes[start as usize..=end as usize],
                    "range {start}-{end}"
                );
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_inline_content_honours_range() -> Result<()> {
        let provider = MemoryProvider::with_channels(&[CHANNEL]);
        let file = FileData {
            mime: "text/plain".to_string(),
            content: Some(b"hello world".to_vec()),
            parts: Vec::new(),
        };

        let got = download(&provider, &file, Some(ByteRange::new(6, 10, 11)?)).await?;
        assert_eq!(got, b"world");
        Ok(())
    }

    #[test]
    fn test_invalid_ranges() {
        assert!(matches!(
            ByteRange::new(5, 4, 10),
            Err(TransferError::InvalidRange { .. })
        ));
        assert!(ByteRange::new(10, 12, 10).is_err());
        assert!(ByteRange::full(0).is_none());
    }

    #[tokio::test]
    async fn test_aborted_upload_notifies_listener() -> Result<()> {
        let provider = MemoryProvider::with_channels(&[CHANNEL]);
        let uploader = uploader(session(&provider, 10), 4, 0);
        uploader.abort_handle().abort();

        let listener = RecordingListener::default();
        let bytes = data(12);
        let err = uploader.execute(&bytes[..], &listener).await.unwrap_err();

        assert!(matches!(err, TransferError::Aborted));
        assert!(listener.aborted.lock().await.is_some());
        assert!(!*listener.completed.lock().await);
        Ok(())
    }

    #[tokio::test]
    async fn test_transport_failure_stops_upload() -> Result<()> {
        let provider = MemoryProvider::with_channels(&[CHANNEL]);
        provider.fail_uploads_after(1).await;

        let listener = RecordingListener::default();
        let bytes = data(12);
        let err = uploader(session(&provider, 10), 4, 0)
            .execute(&bytes[..], &listener)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Transport(_)));
        assert!(listener.aborted.lock().await.is_some());
        assert_eq!(provider.message_count(CHANNEL).await, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_download_detects_replaced_media() -> Result<()> {
        let provider = MemoryProvider::with_channels(&[CHANNEL]);
        let (outcome, _) = upload(&provider, &data(10), 4, 0, 10).await?;
        let UploadOutcome::Hosted(parts) = outcome else {
            panic!("expected hosted outcome");
        };
        provider
            .replace_media(CHANNEL, parts[0].messageid, b"tampered")
            .await;

        let client = provider.client(ClientIdentity::bot("reader"));
        let mut sink = WriterSink::new(Vec::new());
        let err = RangeDownloader::new(client, CHANNEL, 8)
            .execute(&hosted(parts), ByteRange::full(10), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::BlobMismatch { .. }));
        Ok(())
    }

    #[tokio::test]
    async fn test_download_of_deleted_message_is_unavailable() -> Result<()> {
        let provider = MemoryProvider::with_channels(&[CHANNEL]);
        let (outcome, _) = upload(&provider, &data(10), 4, 0, 10).await?;
        let UploadOutcome::Hosted(parts) = outcome else {
            panic!("expected hosted outcome");
        };
        let client = provider.client(ClientIdentity::bot("reader"));
        client.delete(CHANNEL, parts[0].messageid).await?;

        let mut sink = WriterSink::new(Vec::new());
        let err = RangeDownloader::new(client, CHANNEL, 8)
            .execute(&hosted(parts), ByteRange::full(10), &mut sink)
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::Unavailable(_)));
        Ok(())
    }
}
