use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::index::{ChunkRecord, MetadataIndex};
use crate::object_store::ChatAttachmentStore;
use crate::url_refresh::{self, DEFAULT_EXPIRY_MARGIN_SECS};
use crate::{Error, Result};

/// A chunk download is retried at most once: the first failure forces a fresh
/// url before the retry (spec.md §4.E).
const MAX_ATTEMPTS: u32 = 2;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const RETRY_BACKOFF: Duration = Duration::from_secs(1);
/// How many chunks are kept in flight ahead of the consumer during a full-file
/// stream (spec.md §4.E sliding window).
const PREFETCH_WINDOW: usize = 2;

/// Downloads a single chunk's bytes, refreshing its url just-in-time if needed
/// and retrying once on failure. Used both by the per-chunk proxy endpoint and
/// internally by the full-file stream.
pub async fn download_chunk(
    client: &reqwest::Client,
    index: &MetadataIndex,
    store: &dyn ChatAttachmentStore,
    secondary_channel_id: Option<&str>,
    chunk: ChunkRecord,
    now: i64,
    cancel: Option<&CancellationToken>,
) -> Result<Bytes> {
    let mut chunk = url_refresh::refresh_chunk_url_jit(
        index,
        store,
        secondary_channel_id,
        chunk,
        now,
        DEFAULT_EXPIRY_MARGIN_SECS,
    )
    .await?;

    let mut last_err = None;
    for attempt in 0..MAX_ATTEMPTS {
        if let Some(cancel) = cancel {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
        }

        // Any attempt beyond the first forces a refresh, regardless of why the
        // previous attempt failed (spec.md §4.E).
        if attempt > 0 {
            chunk = url_refresh::refresh_chunk_url_jit(
                index,
                store,
                secondary_channel_id,
                chunk,
                // Force: treat the url as already expired regardless of its `ex`.
                i64::MAX,
                0,
            )
            .await?;
        }

        let result = tokio::time::timeout(REQUEST_TIMEOUT, client.get(&chunk.url).send()).await;

        let outcome = match result {
            Ok(Ok(res)) if res.status().is_success() => {
                return res
                    .bytes()
                    .await
                    .map_err(|e| Error::internal(format!("chunk body read failed: {e}")));
            }
            Ok(Ok(res)) => {
                let status = res.status();
                let needs_backoff = !(status.as_u16() == 403 || status.as_u16() == 410);
                (needs_backoff, Error::Upstream {
                    status: status.as_u16(),
                    body: res.text().await.unwrap_or_default(),
                })
            }
            Ok(Err(e)) => (true, Error::internal(format!("chunk request failed: {e}"))),
            Err(_) => (true, Error::internal("chunk request timed out".to_string())),
        };

        let (needs_backoff, err) = outcome;
        last_err = Some(err);

        if attempt + 1 >= MAX_ATTEMPTS {
            break;
        }

        if needs_backoff {
            tokio::time::sleep(RETRY_BACKOFF).await;
        }
    }

    Err(last_err.unwrap_or_else(|| Error::internal("chunk download exhausted retries")))
}

/// Streams an entire file as an ordered sequence of chunk byte buffers, keeping
/// up to `PREFETCH_WINDOW` chunk downloads in flight ahead of the consumer
/// (spec.md §4.E full-file stream).
pub fn stream_file(
    client: reqwest::Client,
    index: MetadataIndex,
    store: Arc<dyn ChatAttachmentStore>,
    secondary_channel_id: Option<String>,
    chunks: Vec<ChunkRecord>,
    now: i64,
    cancel: CancellationToken,
) -> ReceiverStream<Result<Bytes>> {
    let (tx, rx) = mpsc::channel(PREFETCH_WINDOW);

    tokio::spawn(async move {
        let total = chunks.len();
        let mut pending: VecDeque<tokio::task::JoinHandle<Result<Bytes>>> = VecDeque::new();
        let mut next_spawn = 0usize;

        while next_spawn < total && pending.len() < PREFETCH_WINDOW {
            let chunk = chunks[next_spawn].clone();
            pending.push_back(tokio::spawn({
                let client = client.clone();
                let index = index.clone();
                let store = store.clone();
                let secondary_channel_id = secondary_channel_id.clone();
                let cancel = cancel.clone();
                async move {
                    download_chunk(
                        &client,
                        &index,
                        store.as_ref(),
                        secondary_channel_id.as_deref(),
                        chunk,
                        now,
                        Some(&cancel),
                    )
                    .await
                }
            }));
            next_spawn += 1;
        }

        while let Some(handle) = pending.pop_front() {
            if cancel.is_cancelled() {
                handle.abort();
                let _ = tx.send(Err(Error::Cancelled)).await;
                break;
            }

            let result = match handle.await {
                Ok(r) => r,
                Err(e) => Err(Error::internal(format!("chunk task panicked: {e}"))),
            };
            let is_err = result.is_err();

            if tx.send(result).await.is_err() {
                break; // consumer dropped the stream
            }
            if is_err {
                break;
            }

            if next_spawn < total {
                let chunk = chunks[next_spawn].clone();
                pending.push_back(tokio::spawn({
                    let client = client.clone();
                    let index = index.clone();
                    let store = store.clone();
                    let secondary_channel_id = secondary_channel_id.clone();
                    let cancel = cancel.clone();
                    async move {
                        download_chunk(
                            &client,
                            &index,
                            store.as_ref(),
                            secondary_channel_id.as_deref(),
                            chunk,
                            now,
                            Some(&cancel),
                        )
                        .await
                    }
                }));
                next_spawn += 1;
            }
        }
    });

    ReceiverStream::new(rx)
}
