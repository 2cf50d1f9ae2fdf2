use std::sync::Arc;

use crate::config::CHUNK_SIZE_BYTES;
use crate::index::{ChunkRecord, FileRecord, FileStatus, MetadataIndex, NewFile};
use crate::object_store::ChatAttachmentStore;
use crate::{Error, Result};

/// Resolves which chunk index an upload request targets from whichever of the
/// two supported headers the client sent (spec.md §4.D `Chunk-Upload`):
/// a 1-based `X-Chunk-Number`, or a byte `Content-Range` start divided by the
/// size chunk 0 was actually uploaded at (sizes past the first chunk are not
/// assumed constant).
///
/// Resolved Open Question: when only `Content-Range` is given, `start > 0`,
/// and chunk 0 has not been uploaded yet, there is nothing to anchor the
/// division on — this returns a validation error rather than defaulting to
/// index 0 and risking a corrupted file.
pub fn resolve_chunk_index(
    x_chunk_number: Option<i64>,
    content_range_start: Option<u64>,
    chunk_zero_size: Option<u64>,
) -> Result<i64> {
    if let Some(n) = x_chunk_number {
        if n < 1 {
            return Err(Error::validation("X-Chunk-Number is 1-based and must be >= 1"));
        }
        return Ok(n - 1);
    }

    if let Some(start) = content_range_start {
        if start == 0 {
            return Ok(0);
        }
        let Some(chunk_zero_size) = chunk_zero_size.filter(|&s| s > 0) else {
            return Err(Error::validation(
                "Content-Range with start > 0 requires chunk 0 to already be uploaded",
            ));
        };
        if start % chunk_zero_size != 0 {
            return Err(Error::validation(
                "Content-Range start is not aligned to chunk 0's size",
            ));
        }
        return Ok((start / chunk_zero_size) as i64);
    }

    Err(Error::validation(
        "chunk upload requires either X-Chunk-Number or Content-Range",
    ))
}

/// Init (spec.md §4.D): registers a pending file and returns once it is durable.
pub async fn init_upload(index: &MetadataIndex, meta: NewFile) -> Result<()> {
    index.create_file(meta).await
}

/// Chunk-Upload (spec.md §4.D): idempotently uploads one chunk. If a chunk
/// already exists at this index it is deleted locally and its external record
/// queued for background cleanup before the new bytes are sent, so re-uploads
/// of the same index never leak attachments.
///
/// Abort-race protection: after the external upload completes, the file's
/// pending status is re-checked. If the file was aborted or deleted while the
/// upload was in flight, the freshly uploaded attachment is torn down instead
/// of being recorded, and `Error::Cancelled` is returned.
pub async fn upload_chunk(
    index: &MetadataIndex,
    store: &dyn ChatAttachmentStore,
    channel_id: &str,
    file_id: &str,
    idx: i64,
    filename: &str,
    bytes: Vec<u8>,
) -> Result<ChunkRecord> {
    let file = index
        .get_file(file_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("file not found: {file_id}")))?;
    if file.status != FileStatus::Pending.as_str() {
        return Err(Error::conflict(format!(
            "file {file_id} is not pending an upload"
        )));
    }

    if let Some(old) = index.take_chunk(file_id, idx).await? {
        if let Err(err) = store.delete_one(&old.channel_id, &old.message_id).await {
            tracing::warn!(
                file_id,
                idx,
                error = %err,
                "orphaned chunk cleanup failed, leaving it for Bulk-Purge-Pending"
            );
        }
    }

    let size = bytes.len() as i64;
    let uploaded = store.upload(channel_id, filename, bytes).await?;

    // Abort-race: confirm the file is still pending before committing the chunk.
    match index.get_file(file_id).await? {
        Some(f) if f.status == FileStatus::Pending.as_str() => {}
        _ => {
            let channel_id = uploaded.channel_id.clone();
            let message_id = uploaded.message_id.clone();
            tracing::warn!(file_id, idx, "upload aborted mid-flight, discarding chunk");
            // Best-effort: the store handle doesn't outlive this call, so the
            // cleanup happens inline rather than spawned.
            let _ = store.delete_one(&channel_id, &message_id).await;
            return Err(Error::Cancelled);
        }
    }

    index
        .put_chunk(
            file_id,
            idx,
            &uploaded.message_id,
            &uploaded.channel_id,
            size,
            &uploaded.url,
        )
        .await?;

    Ok(ChunkRecord {
        file_id: file_id.to_string(),
        idx,
        message_id: uploaded.message_id,
        channel_id: uploaded.channel_id,
        size,
        url: uploaded.url,
    })
}

/// Finalize (spec.md §4.D): validates that the uploaded chunks form a
/// contiguous `0..N` run, then marks the file `active`. The server does not
/// enforce a fixed chunk size at write time (spec.md §6), so the expected
/// count is derived from what was actually uploaded, not from `file.size`.
pub async fn finalize_upload(index: &MetadataIndex, file_id: &str) -> Result<FileRecord> {
    let file = index
        .get_file(file_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("file not found: {file_id}")))?;
    if file.status != FileStatus::Pending.as_str() {
        return Err(Error::conflict(format!(
            "file {file_id} is not pending an upload"
        )));
    }

    let present = index.discover_chunk_indices(file_id).await?;
    if present.is_empty() {
        return Err(Error::validation("no chunks uploaded"));
    }
    for (expected, actual) in (0..present.len() as i64).zip(present.iter().copied()) {
        if expected != actual {
            return Err(Error::validation(format!(
                "missing chunk index {expected}"
            )));
        }
    }

    index.set_status(file_id, FileStatus::Active).await?;
    index
        .get_file(file_id)
        .await?
        .ok_or_else(|| Error::internal("file vanished immediately after finalize"))
}

/// Abort (spec.md §4.D): removes a pending file and every chunk it accumulated,
/// scheduling external cleanup for each one.
pub async fn abort_upload(
    index: &MetadataIndex,
    store: Arc<dyn ChatAttachmentStore>,
    file_id: &str,
) -> Result<()> {
    let file = index
        .get_file(file_id)
        .await?
        .ok_or_else(|| Error::not_found(format!("file not found: {file_id}")))?;
    if file.status != FileStatus::Pending.as_str() {
        return Err(Error::conflict(format!(
            "file {file_id} is not pending an upload"
        )));
    }

    let Some((_, chunks)) = index.delete_file_cascade(file_id).await? else {
        return Err(Error::not_found(format!("file not found: {file_id}")));
    };

    cleanup_chunks(store, chunks);
    Ok(())
}

/// Bulk-Purge-Pending (spec.md §4.D): deletes every pending file older than
/// `max_age_secs`, returning how many were removed.
pub async fn bulk_purge_pending(
    index: &MetadataIndex,
    store: Arc<dyn ChatAttachmentStore>,
    now: i64,
    max_age_secs: i64,
) -> Result<usize> {
    let (pending, _total) = index.list_files(FileStatus::Pending, i64::MAX, 0).await?;
    let mut purged = 0usize;

    for file in pending {
        if now - file.created_at < max_age_secs {
            continue;
        }
        if let Some((_, chunks)) = index.delete_file_cascade(&file.id).await? {
            cleanup_chunks(store.clone(), chunks);
            purged += 1;
        }
    }

    Ok(purged)
}

fn cleanup_chunks(store: Arc<dyn ChatAttachmentStore>, chunks: Vec<ChunkRecord>) {
    if chunks.is_empty() {
        return;
    }
    tokio::spawn(async move {
        let by_channel: std::collections::HashMap<String, Vec<String>> =
            chunks.into_iter().fold(Default::default(), |mut acc, c| {
                acc.entry(c.channel_id).or_default().push(c.message_id);
                acc
            });
        for (channel_id, message_ids) in by_channel {
            if let Err(failed) = store.bulk_delete(&channel_id, &message_ids).await {
                tracing::warn!(error = %failed, channel_id, "bulk chunk cleanup failed");
            }
        }
    });
}

/// Discover-Chunks (spec.md §4.D): reports which indices a resuming client can
/// skip re-uploading.
pub async fn discover_chunks(index: &MetadataIndex, file_id: &str) -> Result<Vec<i64>> {
    index.discover_chunk_indices(file_id).await
}
