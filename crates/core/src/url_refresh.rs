use std::sync::Arc;

use futures::future::join_all;

use crate::index::{ChunkRecord, MetadataIndex};
use crate::object_store::ChatAttachmentStore;
use crate::{Error, Result};

/// Default margin used when deciding whether a bulk-listed url still has useful
/// life left (spec.md §4.C): anything already past its `ex` timestamp is stale.
pub const DEFAULT_EXPIRY_MARGIN_SECS: i64 = 0;
/// The range-stream engine serves long-lived byte ranges, so it refreshes more
/// eagerly: anything expiring within five minutes is treated as stale already.
pub const RANGE_STREAM_EXPIRY_MARGIN_SECS: i64 = 5 * 60;

/// Extracts the `ex` query parameter (a hex-encoded Unix timestamp) from an
/// attachment CDN url, per spec.md §4.C.
pub fn parse_expiry(url: &str) -> Option<i64> {
    let query = url.split_once('?')?.1;
    for pair in query.split('&') {
        let (key, value) = pair.split_once('=')?;
        if key == "ex" {
            return i64::from_str_radix(value, 16).ok();
        }
    }
    None
}

/// A url with no parseable `ex` parameter is treated as already expired: it is
/// always safer to refresh than to risk serving a dead link.
pub fn is_expired(url: &str, now: i64, margin_secs: i64) -> bool {
    match parse_expiry(url) {
        Some(expires_at) => expires_at - margin_secs <= now,
        None => true,
    }
}

/// `refreshUrls` batches at most this many expired urls per adapter call
/// (spec.md §4.B).
pub const REFRESH_URLS_BATCH_SIZE: usize = 50;

/// Refreshes every chunk url for a file that is expired (or within `margin_secs`
/// of expiring), persisting the new urls, and returns the up-to-date chunk list.
/// Follows spec.md §4.C's three-step order: (1) bulk refresh through the
/// adapter's `refresh_urls`; (2) for anything the bulk call didn't resolve, a
/// JIT single-message lookup via the primary channel; (3) the secondary
/// channel, if configured, as a last resort.
pub async fn refresh_file_urls(
    index: &MetadataIndex,
    store: &dyn ChatAttachmentStore,
    secondary_channel_id: Option<&str>,
    file_id: &str,
    now: i64,
    margin_secs: i64,
) -> Result<Vec<ChunkRecord>> {
    let chunks = index.get_chunks(file_id).await?;
    let (mut expired, mut fresh): (Vec<ChunkRecord>, Vec<ChunkRecord>) = chunks
        .into_iter()
        .partition(|chunk| is_expired(&chunk.url, now, margin_secs));

    if expired.is_empty() {
        return Ok(fresh);
    }

    // Step 1: bulk refresh through the adapter, batched to its limit.
    for batch in expired.chunks_mut(REFRESH_URLS_BATCH_SIZE) {
        let urls: Vec<String> = batch.iter().map(|c| c.url.clone()).collect();
        match store.refresh_urls(&urls).await {
            Ok(refreshed) => {
                for (chunk, new_url) in batch.iter_mut().zip(refreshed) {
                    if let Some(new_url) = new_url {
                        chunk.url = new_url;
                    }
                }
            }
            Err(err) => {
                tracing::warn!(file_id, error = %err, "bulk url refresh failed, falling back to JIT");
            }
        }
    }

    // Steps 2-3: anything still expired after the bulk pass falls back to a
    // per-chunk JIT lookup (primary, then secondary channel).
    let refreshed = join_all(expired.into_iter().map(|chunk| async move {
        if !is_expired(&chunk.url, now, margin_secs) {
            return chunk;
        }
        match refresh_chunk_url_jit(index, store, secondary_channel_id, chunk.clone(), now, margin_secs).await {
            Ok(updated) => updated,
            Err(err) => {
                tracing::warn!(
                    file_id,
                    idx = chunk.idx,
                    error = %err,
                    "chunk url refresh failed, serving stale url"
                );
                chunk
            }
        }
    }))
    .await;

    for chunk in &refreshed {
        index
            .update_chunk_url(&chunk.file_id, chunk.idx, &chunk.url)
            .await?;
    }

    fresh.extend(refreshed);
    Ok(fresh)
}

/// Just-in-time refresh for a single chunk, used when a caller is about to proxy
/// or stream bytes from it right now. Tries the primary channel first, and if
/// the caller configured a secondary channel id (spec.md §4.B, e.g.
/// `DISCORD_BACKUP_CHANNEL_ID`) it is tried as a last resort before giving up.
pub async fn refresh_chunk_url_jit(
    index: &MetadataIndex,
    store: &dyn ChatAttachmentStore,
    secondary_channel_id: Option<&str>,
    chunk: ChunkRecord,
    now: i64,
    margin_secs: i64,
) -> Result<ChunkRecord> {
    if !is_expired(&chunk.url, now, margin_secs) {
        return Ok(chunk);
    }

    let fresh_url = match store
        .get_attachment_url(&chunk.channel_id, &chunk.message_id)
        .await
    {
        Ok(url) => url,
        Err(primary_err) => {
            let Some(secondary_channel_id) = secondary_channel_id else {
                return Err(primary_err);
            };
            store
                .get_attachment_url(secondary_channel_id, &chunk.message_id)
                .await
                .map_err(|_| primary_err)?
        }
    };

    index
        .update_chunk_url(&chunk.file_id, chunk.idx, &fresh_url)
        .await?;

    Ok(ChunkRecord {
        url: fresh_url,
        ..chunk
    })
}

pub type SharedChatStore = Arc<dyn ChatAttachmentStore>;

pub fn require_non_empty_chunks(chunks: &[ChunkRecord], file_id: &str) -> Result<()> {
    if chunks.is_empty() {
        return Err(Error::not_found(format!("file has no chunks: {file_id}")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url_with_ex(hex_ts: &str) -> String {
        format!("https://cdn.example/a/b?ex={hex_ts}&is=0&hm=0")
    }

    #[test]
    fn parses_hex_ex_param() {
        // 0x68000000 is an arbitrary future-looking timestamp used only to
        // exercise the hex parse path.
        assert_eq!(parse_expiry(&url_with_ex("68000000")), Some(0x6800_0000));
    }

    #[test]
    fn missing_ex_param_is_none() {
        assert_eq!(parse_expiry("https://cdn.example/a/b?is=0"), None);
    }

    #[test]
    fn no_ex_param_counts_as_expired() {
        assert!(is_expired("https://cdn.example/a/b", 1000, 0));
    }

    #[test]
    fn within_margin_counts_as_expired() {
        let url = url_with_ex(&format!("{:x}", 1_000_100i64));
        assert!(is_expired(&url, 1_000_000, 200));
        assert!(!is_expired(&url, 1_000_000, 50));
    }

    #[tokio::test]
    async fn bulk_refresh_updates_only_expired_chunks() {
        use crate::index::{FileStatus, NewFile};
        use crate::object_store::test_double::InMemoryChatStore;

        let dir = tempfile::tempdir().unwrap();
        let index = MetadataIndex::open(&dir.path().join("i.db")).await.unwrap();
        let store = InMemoryChatStore::new();

        index
            .create_file(NewFile {
                id: "f1".into(),
                name: "f1.bin".into(),
                size: 0,
                mime_type: None,
                iv: None,
                salt: None,
            })
            .await
            .unwrap();
        index.set_status("f1", FileStatus::Active).await.unwrap();

        let fresh_url = url_with_ex(&format!("{:x}", 9_999_999_999i64));
        index
            .put_chunk("f1", 0, "stale-msg", "chan", 1, "https://cdn.example/stale")
            .await
            .unwrap();
        index
            .put_chunk("f1", 1, "fresh-msg", "chan", 1, &fresh_url)
            .await
            .unwrap();

        // Give the store a record for the stale message id so refresh can succeed.
        let uploaded = store.upload("chan", "x.bin", vec![9]).await.unwrap();
        index
            .put_chunk("f1", 0, &uploaded.message_id, "chan", 1, "https://cdn.example/stale")
            .await
            .unwrap();

        let refreshed = refresh_file_urls(&index, &store, None, "f1", 1_000_000, 0)
            .await
            .unwrap();

        let chunk0 = refreshed.iter().find(|c| c.idx == 0).unwrap();
        let chunk1 = refreshed.iter().find(|c| c.idx == 1).unwrap();
        assert_ne!(chunk0.url, "https://cdn.example/stale");
        assert_eq!(chunk1.url, fresh_url);
    }
}
