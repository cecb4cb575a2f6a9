use super::*;
use crate::config::FsConfig;
use crate::context::FsContext;
use crate::db::{MemoryStore, MetadataStore, Mutation};
use crate::models::{Node, NodeState};
use crate::transfer::WriterSink;
use crate::transport::{BlobTransport, ClientIdentity, ClientPool, MemoryProvider};
use std::sync::Arc;

const MAIN: &str = "main";
const ARCHIVE: &str = "archive";

struct Fixture {
    tree: TreeService,
    files: FileService,
    provider: MemoryProvider,
    store: Arc<dyn MetadataStore>,
}

async fn fixture() -> Fixture {
    let provider = MemoryProvider::with_channels(&[MAIN, ARCHIVE]);
    let store: Arc<dyn MetadataStore> = Arc::new(MemoryStore::new());
    let clients = ClientPool::new(vec![provider.client(ClientIdentity::user("alice"))]).unwrap();

    let mut config = FsConfig::with_channel(MAIN);
    config.upload.chunk_size = 4;
    config.transport.batch_size = 0;

    let ctx = FsContext::new(store.clone(), Arc::new(clients), config).unwrap();
    ctx.ensure_root().await.unwrap();
    Fixture {
        tree: TreeService::new(ctx.clone()),
        files: FileService::new(ctx),
        provider,
        store,
    }
}

async fn upload(f: &Fixture, path: &str, data: &[u8]) -> Node {
    f.files.upload(path, data).await.unwrap()
}

async fn read(f: &Fixture, path: &str) -> Vec<u8> {
    let mut sink = WriterSink::new(Vec::new());
    f.files.read_file_content(path, None, &mut sink).await.unwrap();
    sink.into_inner()
}

async fn set_channel(f: &Fixture, path: &str, channel: &str) -> Node {
    let mut folder = f.tree.resolve(path).await.unwrap();
    folder.channel = Some(channel.to_string());
    f.store
        .commit(vec![Mutation::Update(folder.clone())])
        .await
        .unwrap();
    folder
}

fn first_message(node: &Node) -> i64 {
    node.file().unwrap().parts[0].messageid
}

fn names(nodes: &[Node]) -> Vec<String> {
    let mut names: Vec<String> = nodes.iter().map(|n| n.filename.clone()).collect();
    names.sort();
    names
}

#[tokio::test]
async fn test_create_and_list() {
    let f = fixture().await;
    f.tree.create("/docs", true).await.unwrap();
    let file = f.tree.create("/docs/notes.txt", false).await.unwrap();

    assert_eq!(file.state, NodeState::Active);
    assert_eq!(file.channel.as_deref(), Some(MAIN));
    assert_eq!(file.file().unwrap().content.as_deref(), Some(&[][..]));
    assert_eq!(names(&f.tree.list_dir("/docs").await.unwrap()), vec!["notes.txt"]);
    assert_eq!(read(&f, "/docs/notes.txt").await, Vec::<u8>::new());
}

#[tokio::test]
async fn test_create_rejects_case_insensitive_duplicate() {
    let f = fixture().await;
    f.tree.create("/Docs", true).await.unwrap();

    let err = f.tree.create("/docs", false).await.unwrap_err();
    assert!(matches!(err, FsError::Conflict(_)), "{err}");
}

#[tokio::test]
async fn test_create_requires_parent() {
    let f = fixture().await;
    let err = f.tree.create("/missing/file.txt", false).await.unwrap_err();
    assert!(matches!(err, FsError::NotFound(_)), "{err}");
}

#[tokio::test]
async fn test_rename_collision_and_root() {
    let f = fixture().await;
    f.tree.create("/a", true).await.unwrap();
    let b = f.tree.create("/b", true).await.unwrap();

    let err = f.tree.rename(&b.id, "A").await.unwrap_err();
    assert!(matches!(err, FsError::Conflict(_)));

    // Case-only rename of the same node is allowed
    let renamed = f.tree.rename(&b.id, "B").await.unwrap();
    assert_eq!(renamed.filename, "B");

    let err = f.tree.rename("root", "x").await.unwrap_err();
    assert!(matches!(err, FsError::Validation(_)));
}

#[tokio::test]
async fn test_copy_name_collisions() {
    let f = fixture().await;
    upload(&f, "/a.txt", b"hello").await;
    f.tree.create("/x", true).await.unwrap();

    let copy = f.tree.copy_node("/a.txt", "/a.txt").await.unwrap();
    assert_eq!(copy.filename, "a - 1.txt");
    let copy = f.tree.copy_node("/a.txt", "/a.txt").await.unwrap();
    assert_eq!(copy.filename, "a - 2.txt");

    let folder_copy = f.tree.copy_node("/x", "/x").await.unwrap();
    assert_eq!(folder_copy.filename, "x - 1");

    // Copying onto an existing folder lands inside it
    let inside = f.tree.copy_node("/a.txt", "/x").await.unwrap();
    assert_eq!(inside.parent_id.as_deref(), Some(f.tree.resolve("/x").await.unwrap().id.as_str()));
    assert_eq!(inside.filename, "a.txt");
}

#[tokio::test]
async fn test_calculate_filename_for_copy() {
    let f = fixture().await;
    f.tree.create("/report.tar.gz", false).await.unwrap();
    f.tree.create("/photos", true).await.unwrap();

    let name = f
        .tree
        .calculate_filename_for_copy("root", "report.tar.gz", false)
        .await
        .unwrap();
    assert_eq!(name, "report.tar - 1.gz");

    let name = f
        .tree
        .calculate_filename_for_copy("root", "photos", true)
        .await
        .unwrap();
    assert_eq!(name, "photos - 1");

    let name = f
        .tree
        .calculate_filename_for_copy("root", "free.txt", false)
        .await
        .unwrap();
    assert_eq!(name, "free.txt");
}

#[tokio::test]
async fn test_move_across_channels_rehosts_and_keeps_id() {
    let f = fixture().await;
    f.tree.create("/arch", true).await.unwrap();
    set_channel(&f, "/arch", ARCHIVE).await;
    let original = upload(&f, "/big.bin", b"0123456789").await;
    let old_message = first_message(&original);
    assert_eq!(f.provider.message_count(MAIN).await, 1);

    let moved = f.tree.move_node("/big.bin", "/arch/big.bin").await.unwrap();

    assert_eq!(moved.id, original.id);
    assert_eq!(moved.channel.as_deref(), Some(ARCHIVE));
    assert!(f.provider.has_message(ARCHIVE, first_message(&moved)).await);
    assert!(!f.provider.has_message(MAIN, old_message).await);
    assert_eq!(read(&f, "/arch/big.bin").await, b"0123456789");
    assert!(f.tree.resolve("/big.bin").await.is_err());
}

#[tokio::test]
async fn test_move_within_channel_keeps_messages() {
    let f = fixture().await;
    f.tree.create("/dir", true).await.unwrap();
    let original = upload(&f, "/big.bin", b"0123456789").await;

    let moved = f.tree.move_node("/big.bin", "/dir/renamed.bin").await.unwrap();

    assert_eq!(moved.filename, "renamed.bin");
    assert_eq!(first_message(&moved), first_message(&original));
    assert_eq!(f.provider.message_count(MAIN).await, 1);
}

#[tokio::test]
async fn test_copy_owns_its_messages() {
    let f = fixture().await;
    let original = upload(&f, "/big.bin", b"0123456789").await;

    let copy = f.tree.copy_node("/big.bin", "/copy.bin").await.unwrap();
    assert_ne!(copy.id, original.id);
    assert_ne!(first_message(&copy), first_message(&original));
    assert_eq!(f.provider.message_count(MAIN).await, 2);

    let report = f.tree.delete("/copy.bin", false).await.unwrap();
    assert!(report.is_success());
    assert_eq!(read(&f, "/big.bin").await, b"0123456789");
}

#[tokio::test]
async fn test_move_folder_into_descendant_is_rejected() {
    let f = fixture().await;
    f.tree.create("/a", true).await.unwrap();
    f.tree.create("/a/b", true).await.unwrap();

    let err = f.tree.move_node("/a", "/a/b/c").await.unwrap_err();
    assert!(matches!(err, FsError::Validation(_)), "{err}");
    let err = f.tree.copy_node("/a", "/a/b").await.unwrap_err();
    assert!(matches!(err, FsError::Validation(_)), "{err}");

    let sibling = f.tree.copy_node("/a", "/a").await.unwrap();
    assert_eq!(sibling.filename, "a - 1");
}

#[tokio::test]
async fn test_move_to_missing_destination_is_conflict() {
    let f = fixture().await;
    f.tree.create("/a", true).await.unwrap();
    let err = f.tree.move_node("/a", "/nowhere/a").await.unwrap_err();
    assert!(matches!(err, FsError::Conflict(_)));
}

#[tokio::test]
async fn test_copy_folder_mirrors_tree() {
    let f = fixture().await;
    let source = upload(&f, "/src/a/b/file.txt", b"nested bytes").await;
    upload(&f, "/src/top.txt", b"top").await;

    f.tree.copy_node("/src", "/dst").await.unwrap();

    let copied = f.tree.resolve("/dst/a/b/file.txt").await.unwrap();
    assert_ne!(copied.id, source.id);
    assert_eq!(read(&f, "/dst/a/b/file.txt").await, b"nested bytes");
    assert_eq!(read(&f, "/dst/top.txt").await, b"top");
    assert_eq!(names(&f.tree.list_dir("/dst").await.unwrap()), vec!["a", "top.txt"]);
    // Source untouched
    assert_eq!(f.tree.resolve("/src/a/b/file.txt").await.unwrap().id, source.id);
}

#[tokio::test]
async fn test_move_folder_rehosts_inherited_files() {
    let f = fixture().await;
    f.tree.create("/arch", true).await.unwrap();
    set_channel(&f, "/arch", ARCHIVE).await;
    let file = upload(&f, "/proj/sub/data.bin", b"abcdefgh").await;

    f.tree.move_node("/proj", "/arch").await.unwrap();

    let moved = f.tree.resolve("/arch/proj/sub/data.bin").await.unwrap();
    assert_eq!(moved.id, file.id);
    assert_eq!(moved.channel.as_deref(), Some(ARCHIVE));
    assert_eq!(f.provider.message_count(MAIN).await, 0);
    assert_eq!(read(&f, "/arch/proj/sub/data.bin").await, b"abcdefgh");
}

#[tokio::test]
async fn test_delete_folder_then_purge() {
    let f = fixture().await;
    upload(&f, "/dir/one.bin", b"11111111").await;
    upload(&f, "/dir/sub/two.bin", b"2").await;
    let dir = f.tree.resolve("/dir").await.unwrap();

    let report = f.tree.delete("/dir", false).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.succeeded, 4);
    assert_eq!(f.provider.message_count(MAIN).await, 0);
    assert!(f.tree.list_dir("/").await.unwrap().is_empty());

    let record = f.store.get_node(&dir.id).await.unwrap().unwrap();
    assert_eq!(record.state, NodeState::Deleted);

    let removed = f.tree.purge(&dir.id).await.unwrap();
    assert_eq!(removed, 4);
    assert!(f.store.get_node(&dir.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_purge_rejects_active_nodes() {
    let f = fixture().await;
    let dir = f.tree.create("/dir", true).await.unwrap();

    let err = f.tree.purge(&dir.id).await.unwrap_err();
    assert!(matches!(err, FsError::Validation(_)));
    let err = f.tree.purge("root").await.unwrap_err();
    assert!(matches!(err, FsError::Validation(_)));
}

#[tokio::test]
async fn test_purge_rejects_folder_with_active_descendant() {
    let f = fixture().await;
    let dir = f.tree.create("/dir", true).await.unwrap();
    f.tree.create("/dir/keep", true).await.unwrap();
    f.tree.soft_delete(&dir.id).await.unwrap();

    let err = f.tree.purge(&dir.id).await.unwrap_err();
    assert!(matches!(err, FsError::Conflict(_)), "{err}");
}

#[tokio::test]
async fn test_delete_keeps_folder_when_message_mismatches() {
    let f = fixture().await;
    let bad = upload(&f, "/dir/bad.bin", b"bad bytes").await;
    upload(&f, "/dir/good.bin", b"good bytes").await;
    f.provider
        .replace_media(MAIN, first_message(&bad), b"other")
        .await;

    let report = f.tree.delete("/dir", false).await.unwrap();

    assert_eq!(report.failed, 2);
    assert_eq!(report.succeeded, 1);
    let failed: Vec<&str> = report
        .items
        .iter()
        .filter(|i| i.error.is_some())
        .map(|i| i.path.as_str())
        .collect();
    assert!(failed.contains(&"/dir/bad.bin"));
    assert!(failed.contains(&"/dir"));
    assert!(f.tree.resolve("/dir").await.is_ok());
    assert!(f.tree.resolve("/dir/bad.bin").await.is_ok());
    assert!(f.tree.resolve("/dir/good.bin").await.is_err());
}

#[tokio::test]
async fn test_delete_skips_missing_messages() {
    let f = fixture().await;
    let file = upload(&f, "/gone.bin", b"0123456789").await;
    let client = f.provider.client(ClientIdentity::user("bob"));
    client.delete(MAIN, first_message(&file)).await.unwrap();

    let report = f.tree.delete("/gone.bin", false).await.unwrap();
    assert!(report.is_success());
    assert!(f.tree.resolve("/gone.bin").await.is_err());
}

#[tokio::test]
async fn test_simulated_delete_changes_nothing() {
    let f = fixture().await;
    upload(&f, "/dir/a.bin", b"0123456789").await;

    let report = f.tree.delete("/dir", true).await.unwrap();

    assert!(report.simulated);
    assert_eq!(report.succeeded, 2);
    assert_eq!(f.provider.message_count(MAIN).await, 1);
    assert_eq!(read(&f, "/dir/a.bin").await, b"0123456789");
}

#[tokio::test]
async fn test_root_is_immutable() {
    let f = fixture().await;
    assert!(matches!(
        f.tree.delete("/", false).await.unwrap_err(),
        FsError::Validation(_)
    ));
    f.tree.create("/dst", true).await.unwrap();
    assert!(matches!(
        f.tree.move_node("/", "/dst").await.unwrap_err(),
        FsError::Validation(_)
    ));
}

#[tokio::test]
async fn test_move_items_reports_each_failure() {
    let f = fixture().await;
    let dest = f.tree.create("/dest", true).await.unwrap();
    let a = f.tree.create("/a.txt", false).await.unwrap();
    let b = f.tree.create("/b", true).await.unwrap();

    let ids = vec![a.id.clone(), b.id.clone(), "missing".to_string(), dest.id.clone()];
    let report = f.tree.move_items(&ids, &dest.id).await.unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(report.failed, 2);
    assert_eq!(names(&f.tree.list_folder(&dest.id).await.unwrap()), vec!["a.txt", "b"]);
}

#[tokio::test]
async fn test_merge_files_appends_parts() {
    let f = fixture().await;
    let first = upload(&f, "/part1.bin", b"hello ").await;
    let second = upload(&f, "/part2.bin", b"world").await;

    let merged = f.tree.merge_files(&first.id, &second.id).await.unwrap();

    let indexes: Vec<u32> = merged.file().unwrap().parts.iter().map(|p| p.index).collect();
    assert_eq!(indexes, vec![0, 1]);
    assert_eq!(read(&f, "/part1.bin").await, b"hello world");
    assert!(f.tree.resolve("/part2.bin").await.is_err());
    assert_eq!(f.provider.message_count(MAIN).await, 2);
}

#[tokio::test]
async fn test_merge_rejects_inline_files() {
    let f = fixture().await;
    let a = f.tree.create("/a.txt", false).await.unwrap();
    let b = upload(&f, "/b.bin", b"0123456789").await;

    let err = f.tree.merge_files(&b.id, &a.id).await.unwrap_err();
    assert!(matches!(err, FsError::Validation(_)));
}

#[tokio::test]
async fn test_lookup_by_message_and_channel() {
    let f = fixture().await;
    f.tree.create("/arch", true).await.unwrap();
    set_channel(&f, "/arch", ARCHIVE).await;
    let file = upload(&f, "/f.bin", b"0123456789").await;

    let found = f
        .tree
        .find_files_by_message(MAIN, first_message(&file))
        .await
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, file.id);

    let folders = f.tree.find_folders_by_channel(ARCHIVE).await.unwrap();
    assert_eq!(names(&folders), vec!["arch"]);
}

async fn post_document(f: &Fixture, channel: &str, name: &str, data: &'static [u8]) -> ChannelPost {
    let client = f.provider.client(ClientIdentity::bot("poster"));
    let blob = client.new_blob_id();
    client
        .upload_part(&blob, 0, Some(1), bytes::Bytes::from_static(data))
        .await
        .unwrap();
    let sent = client
        .send(channel, &blob, 1, name, "application/octet-stream")
        .await
        .unwrap();
    ChannelPost {
        channel: channel.to_string(),
        message_id: sent.message_id,
        filename: name.to_string(),
        blob_id: sent.blob_id,
        size: data.len() as u64,
        mime: None,
    }
}

#[tokio::test]
async fn test_channel_post_lands_in_mapped_folder() {
    let f = fixture().await;
    f.tree.create("/arch", true).await.unwrap();
    let arch = set_channel(&f, "/arch", ARCHIVE).await;

    let mut post = post_document(&f, ARCHIVE, "clip.mp4", b"posted bytes").await;
    post.mime = Some("video/quicktime".to_string());
    let node = f.tree.register_channel_post(post).await.unwrap().unwrap();

    assert_eq!(node.parent_id.as_deref(), Some(arch.id.as_str()));
    assert_eq!(node.channel.as_deref(), Some(ARCHIVE));
    assert_eq!(node.mime(), Some("video/quicktime"));
    assert_eq!(node.size(), 12);
    assert_eq!(names(&f.tree.list_dir("/arch").await.unwrap()), vec!["clip.mp4"]);
    assert_eq!(read(&f, "/arch/clip.mp4").await, b"posted bytes");
}

#[tokio::test]
async fn test_channel_post_without_folder_goes_to_root() {
    let f = fixture().await;
    f.tree.create("/notes.txt", false).await.unwrap();

    let post = post_document(&f, ARCHIVE, "notes.txt", b"from the channel").await;
    let node = f.tree.register_channel_post(post).await.unwrap().unwrap();

    assert_eq!(node.parent_id.as_deref(), Some(crate::models::ROOT_ID));
    assert_eq!(node.filename, "notes - 1.txt");
    assert_eq!(node.mime(), Some("text/plain"));
    assert_eq!(
        names(&f.tree.list_dir("/").await.unwrap()),
        vec!["notes - 1.txt", "notes.txt"]
    );
    assert_eq!(read(&f, "/notes - 1.txt").await, b"from the channel");
}

#[tokio::test]
async fn test_channel_post_already_recorded_is_skipped() {
    let f = fixture().await;
    let uploaded = upload(&f, "/f.bin", b"0123456789").await;

    let post = ChannelPost {
        channel: MAIN.to_string(),
        message_id: first_message(&uploaded),
        filename: "f.bin".to_string(),
        blob_id: uploaded.file().unwrap().parts[0].fileid.clone(),
        size: 10,
        mime: None,
    };
    assert!(f.tree.register_channel_post(post).await.unwrap().is_none());
    assert_eq!(names(&f.tree.list_dir("/").await.unwrap()), vec!["f.bin"]);

    // A second delivery of a fresh post is skipped the same way
    let post = post_document(&f, MAIN, "late.bin", b"late").await;
    assert!(f.tree.register_channel_post(post.clone()).await.unwrap().is_some());
    assert!(f.tree.register_channel_post(post).await.unwrap().is_none());
    assert_eq!(
        names(&f.tree.list_dir("/").await.unwrap()),
        vec!["f.bin", "late.bin"]
    );
}
