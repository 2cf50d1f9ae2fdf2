use std::sync::Arc;

use attachvault_core::index::{FileStatus, MetadataIndex, NewFile};
use attachvault_core::object_store::ChatAttachmentStore;
use attachvault_core::{download, range_stream, upload, Error, InMemoryChatStore};

async fn open_index() -> (MetadataIndex, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let index = MetadataIndex::open(&dir.path().join("index.db")).await.unwrap();
    (index, dir)
}

/// Scenario 1 (spec.md §8): init, upload every chunk, finalize, then read the
/// file back through the listing and range-stream engines.
#[tokio::test]
async fn full_round_trip_then_range_read() {
    let (index, _dir) = open_index().await;
    let store = InMemoryChatStore::new();

    let chunk_payloads: Vec<Vec<u8>> = vec![vec![1u8; 10], vec![2u8; 10], vec![3u8; 5]];
    let total_size: i64 = chunk_payloads.iter().map(|c| c.len() as i64).sum();

    upload::init_upload(
        &index,
        NewFile {
            id: "doc-1".into(),
            name: "notes.enc".into(),
            size: total_size,
            mime_type: Some("application/octet-stream".into()),
            iv: Some("aabbcc".into()),
            salt: Some("ddeeff".into()),
        },
    )
    .await
    .unwrap();

    for (idx, payload) in chunk_payloads.iter().enumerate() {
        upload::upload_chunk(
            &index,
            &store,
            "chan-1",
            "doc-1",
            idx as i64,
            &format!("doc-1.part{idx}"),
            payload.clone(),
        )
        .await
        .unwrap();
    }

    let file = upload::finalize_upload(&index, "doc-1").await.unwrap();
    assert_eq!(file.status, FileStatus::Active.as_str());

    let (active, total) = index.list_files(FileStatus::Active, 10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(active[0].id, "doc-1");

    let chunks = index.get_chunks("doc-1").await.unwrap();
    let target = range_stream::resolve_range(&index, &store, None, &file, &chunks, "bytes=12-22", 0)
        .await
        .unwrap();
    // Byte 12 falls in chunk 1 (bytes 10..=19), clipped to that chunk's end.
    assert_eq!(target.chunk.idx, 1);
    assert_eq!(target.local_start, 2);
    assert_eq!(target.global_end, 19);

    let reserved = chunks.iter().map(|c| c.size).sum::<i64>();
    assert_eq!(reserved, total_size);
}

/// Scenario 2 (spec.md §8): a client crashes mid-upload; Discover-Chunks tells
/// it what survived so it can resume without re-sending completed chunks.
#[tokio::test]
async fn resume_after_crash_uploads_only_missing_chunks() {
    let (index, _dir) = open_index().await;
    let store = InMemoryChatStore::new();

    upload::init_upload(
        &index,
        NewFile {
            id: "doc-2".into(),
            name: "video.enc".into(),
            size: 30,
            mime_type: None,
            iv: None,
            salt: None,
        },
    )
    .await
    .unwrap();

    upload::upload_chunk(&index, &store, "chan-1", "doc-2", 0, "doc-2.part0", vec![9u8; 10])
        .await
        .unwrap();

    // Simulated crash: only chunk 0 made it in before the client died.
    assert_eq!(upload::discover_chunks(&index, "doc-2").await.unwrap(), vec![0]);

    for idx in 1..3i64 {
        upload::upload_chunk(
            &index,
            &store,
            "chan-1",
            "doc-2",
            idx,
            &format!("doc-2.part{idx}"),
            vec![idx as u8; 10],
        )
        .await
        .unwrap();
    }

    let file = upload::finalize_upload(&index, "doc-2").await.unwrap();
    assert_eq!(file.status, FileStatus::Active.as_str());
    assert_eq!(
        upload::discover_chunks(&index, "doc-2").await.unwrap(),
        vec![0, 1, 2]
    );
}

/// Trash -> permanent delete cascades to every chunk's external attachment.
#[tokio::test]
async fn two_stage_delete_cleans_up_remote_attachments() {
    let (index, _dir) = open_index().await;
    let store = Arc::new(InMemoryChatStore::new());

    upload::init_upload(
        &index,
        NewFile {
            id: "doc-3".into(),
            name: "photo.enc".into(),
            size: 4,
            mime_type: None,
            iv: None,
            salt: None,
        },
    )
    .await
    .unwrap();
    upload::upload_chunk(&index, store.as_ref(), "chan-1", "doc-3", 0, "doc-3.part0", vec![7u8; 4])
        .await
        .unwrap();
    upload::finalize_upload(&index, "doc-3").await.unwrap();

    assert_eq!(store.message_count().await, 1);

    index.set_status("doc-3", FileStatus::Trashed).await.unwrap();
    let (file, chunks) = index.delete_file_cascade("doc-3").await.unwrap().unwrap();
    assert_eq!(file.status, FileStatus::Trashed.as_str());

    for chunk in &chunks {
        store.delete_one(&chunk.channel_id, &chunk.message_id).await.unwrap();
    }
    assert_eq!(store.message_count().await, 0);
    assert!(index.get_file("doc-3").await.unwrap().is_none());
}

/// Download a single chunk back out through the public download API, exercising
/// the JIT url refresh path with a url that is already expired.
#[tokio::test]
async fn download_chunk_with_already_expired_url_refreshes_and_succeeds() {
    let (index, _dir) = open_index().await;
    let store = InMemoryChatStore::new();

    let uploaded = store.upload("chan-1", "doc-4.part0", vec![5u8; 6]).await.unwrap();
    index
        .create_file(NewFile {
            id: "doc-4".into(),
            name: "clip.enc".into(),
            size: 6,
            mime_type: None,
            iv: None,
            salt: None,
        })
        .await
        .unwrap();
    // No `ex` parameter at all: always treated as expired.
    index
        .put_chunk("doc-4", 0, &uploaded.message_id, "chan-1", 6, "https://mem.invalid/stale-no-expiry")
        .await
        .unwrap();
    index.set_status("doc-4", FileStatus::Active).await.unwrap();

    let chunk = index.get_chunk("doc-4", 0).await.unwrap().unwrap();
    let client = reqwest::Client::new();
    let err = download::download_chunk(&client, &index, &store, None, chunk, 0, None)
        .await
        .unwrap_err();
    // The in-memory store's refreshed url isn't reachable by a live HTTP
    // client, so the request itself fails, but the refresh must have run and
    // persisted a non-stale url before that happened.
    assert!(matches!(err, Error::Internal { .. } | Error::Upstream { .. }));
    let refreshed = index.get_chunk("doc-4", 0).await.unwrap().unwrap();
    assert_ne!(refreshed.url, "https://mem.invalid/stale-no-expiry");
}
