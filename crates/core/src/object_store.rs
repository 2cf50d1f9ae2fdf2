use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde::Deserialize;

use crate::{Error, Result};

const DISCORD_API_BASE: &str = "https://discord.com/api/v10";
/// Discord only honors `bulk-delete` for messages younger than this many days;
/// anything older must be deleted one at a time.
const BULK_DELETE_MAX_AGE_DAYS: i64 = 14;
/// Fallback single-delete concurrency and inter-wave pause (spec.md §4.B).
const FALLBACK_DELETE_CONCURRENCY: usize = 5;
const FALLBACK_DELETE_WAVE_PAUSE: Duration = Duration::from_millis(250);

#[derive(Debug, Clone)]
pub struct UploadedAttachment {
    pub message_id: String,
    pub channel_id: String,
    pub size: i64,
    pub url: String,
}

/// The external attachment provider a chat service exposes as a chunk store
/// (spec.md §4.B). Mirrors the teacher's `Storage` trait shape: boxed futures
/// rather than `async fn` in a trait, so it stays object-safe.
pub trait ChatAttachmentStore: Send + Sync {
    fn provider(&self) -> &'static str;

    fn upload<'a>(
        &'a self,
        channel_id: &'a str,
        filename: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<UploadedAttachment>> + Send + 'a>>;

    fn delete_one<'a>(
        &'a self,
        channel_id: &'a str,
        message_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

    /// Deletes as many of `message_ids` as the provider's bulk endpoint allows,
    /// falling back to individual deletes for ids outside its constraints, and
    /// returns the ids that could not be deleted by either path.
    fn bulk_delete<'a>(
        &'a self,
        channel_id: &'a str,
        message_ids: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>>;

    /// Re-fetches the current CDN url for a single message's first attachment.
    fn get_attachment_url<'a>(
        &'a self,
        channel_id: &'a str,
        message_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>>;

    /// Batch-refreshes up to 50 expired CDN urls in one call (spec.md §4.B),
    /// returning a parallel array: `None` at an index means that url could not
    /// be refreshed and the caller should fall back to a JIT lookup.
    fn refresh_urls<'a>(
        &'a self,
        urls: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Option<String>>>> + Send + 'a>>;

    /// Lists the most recent messages in a channel that carry an attachment,
    /// newest first. Used by the backup protocol's circular cleanup pass.
    fn list_recent<'a>(
        &'a self,
        channel_id: &'a str,
        limit: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RemoteMessage>>> + Send + 'a>>;
}

#[derive(Debug, Clone)]
pub struct RemoteMessage {
    pub message_id: String,
    pub filename: String,
}

pub struct DiscordAttachmentStore {
    bot_token: String,
    client: reqwest::Client,
}

impl DiscordAttachmentStore {
    pub fn new(bot_token: String) -> Self {
        Self {
            bot_token,
            client: reqwest::Client::new(),
        }
    }

    fn auth_header(&self) -> String {
        format!("Bot {}", self.bot_token)
    }

    async fn error_for_status(res: reqwest::Response) -> Result<reqwest::Response> {
        if res.status().is_success() {
            return Ok(res);
        }
        let status = res.status().as_u16();
        let body = res.text().await.unwrap_or_default();
        Err(Error::Upstream { status, body })
    }
}

impl ChatAttachmentStore for DiscordAttachmentStore {
    fn provider(&self) -> &'static str {
        "discord.botapi"
    }

    fn upload<'a>(
        &'a self,
        channel_id: &'a str,
        filename: &'a str,
        bytes: Vec<u8>,
    ) -> Pin<Box<dyn Future<Output = Result<UploadedAttachment>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{DISCORD_API_BASE}/channels/{channel_id}/messages");
            let part = reqwest::multipart::Part::bytes(bytes).file_name(filename.to_string());
            let form = reqwest::multipart::Form::new().part("files[0]", part);

            let res = self
                .client
                .post(url)
                .header("Authorization", self.auth_header())
                .multipart(form)
                .send()
                .await
                .map_err(|e| Error::internal(format!("discord upload request failed: {e}")))?;
            let res = Self::error_for_status(res).await?;

            let body: DiscordMessage = res
                .json()
                .await
                .map_err(|e| Error::internal(format!("discord upload invalid json: {e}")))?;
            let attachment = body.attachments.into_iter().next().ok_or_else(|| {
                Error::internal("discord message response carried no attachments".to_string())
            })?;

            Ok(UploadedAttachment {
                message_id: body.id,
                channel_id: channel_id.to_string(),
                size: attachment.size,
                url: attachment.url,
            })
        })
    }

    fn delete_one<'a>(
        &'a self,
        channel_id: &'a str,
        message_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{DISCORD_API_BASE}/channels/{channel_id}/messages/{message_id}");
            let res = self
                .client
                .delete(url)
                .header("Authorization", self.auth_header())
                .send()
                .await
                .map_err(|e| Error::internal(format!("discord delete request failed: {e}")))?;

            // A message already gone is not a failure from the caller's perspective.
            if res.status() == reqwest::StatusCode::NOT_FOUND {
                return Ok(());
            }
            Self::error_for_status(res).await?;
            Ok(())
        })
    }

    fn bulk_delete<'a>(
        &'a self,
        channel_id: &'a str,
        message_ids: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>> {
        Box::pin(async move {
            let mut failed = Vec::new();
            for chunk in message_ids.chunks(100) {
                if chunk.len() >= 2 {
                    let url = format!("{DISCORD_API_BASE}/channels/{channel_id}/messages/bulk-delete");
                    let res = self
                        .client
                        .post(url)
                        .header("Authorization", self.auth_header())
                        .json(&serde_json::json!({ "messages": chunk }))
                        .send()
                        .await
                        .map_err(|e| Error::internal(format!("discord bulk-delete failed: {e}")))?;

                    if res.status().is_success() {
                        continue;
                    }
                    // Discord rejects bulk-delete outright if any id is older than
                    // BULK_DELETE_MAX_AGE_DAYS; fall back to concurrent single deletes.
                }

                // bulk-delete also requires at least two ids, so a lone id falls
                // through to this same waved fallback.
                let waves: Vec<&[String]> = chunk.chunks(FALLBACK_DELETE_CONCURRENCY).collect();
                let wave_count = waves.len();
                for (wave_idx, wave) in waves.into_iter().enumerate() {
                    let results =
                        futures::future::join_all(wave.iter().map(|id| self.delete_one(channel_id, id)))
                            .await;
                    for (id, result) in wave.iter().zip(results) {
                        if let Err(err) = result {
                            tracing::warn!(message_id = %id, error = %err, "attachment delete failed");
                            failed.push(id.clone());
                        }
                    }
                    if wave_idx + 1 < wave_count {
                        tokio::time::sleep(FALLBACK_DELETE_WAVE_PAUSE).await;
                    }
                }
            }
            Ok(failed)
        })
    }

    fn get_attachment_url<'a>(
        &'a self,
        channel_id: &'a str,
        message_id: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{DISCORD_API_BASE}/channels/{channel_id}/messages/{message_id}");
            let res = self
                .client
                .get(url)
                .header("Authorization", self.auth_header())
                .send()
                .await
                .map_err(|e| Error::internal(format!("discord get message failed: {e}")))?;
            let res = Self::error_for_status(res).await?;

            let body: DiscordMessage = res
                .json()
                .await
                .map_err(|e| Error::internal(format!("discord get message invalid json: {e}")))?;
            body.attachments
                .into_iter()
                .next()
                .map(|a| a.url)
                .ok_or_else(|| Error::not_found(format!("message {message_id} has no attachment")))
        })
    }

    fn refresh_urls<'a>(
        &'a self,
        urls: &'a [String],
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Option<String>>>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{DISCORD_API_BASE}/attachments/refresh-urls");
            let res = self
                .client
                .post(url)
                .header("Authorization", self.auth_header())
                .json(&serde_json::json!({ "attachment_urls": urls }))
                .send()
                .await
                .map_err(|e| Error::internal(format!("discord refresh-urls request failed: {e}")))?;
            let res = Self::error_for_status(res).await?;

            let body: RefreshUrlsResponse = res
                .json()
                .await
                .map_err(|e| Error::internal(format!("discord refresh-urls invalid json: {e}")))?;

            let by_original: std::collections::HashMap<String, String> = body
                .refreshed_urls
                .into_iter()
                .map(|pair| (pair.original, pair.refreshed))
                .collect();

            Ok(urls
                .iter()
                .map(|original| by_original.get(original).cloned())
                .collect())
        })
    }

    fn list_recent<'a>(
        &'a self,
        channel_id: &'a str,
        limit: u32,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<RemoteMessage>>> + Send + 'a>> {
        Box::pin(async move {
            let url = format!("{DISCORD_API_BASE}/channels/{channel_id}/messages");
            let res = self
                .client
                .get(url)
                .header("Authorization", self.auth_header())
                .query(&[("limit", limit.min(100).to_string())])
                .send()
                .await
                .map_err(|e| Error::internal(format!("discord list messages failed: {e}")))?;
            let res = Self::error_for_status(res).await?;

            let body: Vec<DiscordMessage> = res
                .json()
                .await
                .map_err(|e| Error::internal(format!("discord list messages invalid json: {e}")))?;

            Ok(body
                .into_iter()
                .filter_map(|m| {
                    let filename = m.attachments.into_iter().next()?.filename;
                    Some(RemoteMessage {
                        message_id: m.id,
                        filename,
                    })
                })
                .collect())
        })
    }
}

#[derive(Debug, Deserialize)]
struct DiscordMessage {
    id: String,
    attachments: Vec<DiscordAttachment>,
}

#[derive(Debug, Deserialize)]
struct DiscordAttachment {
    url: String,
    size: i64,
    filename: String,
}

#[derive(Debug, Deserialize)]
struct RefreshUrlsResponse {
    refreshed_urls: Vec<RefreshedUrlPair>,
}

#[derive(Debug, Deserialize)]
struct RefreshedUrlPair {
    original: String,
    refreshed: String,
}

/// Reports the age cutoff Discord enforces for its bulk-delete endpoint, exposed
/// for callers that want to partition ids before calling `bulk_delete`.
pub fn bulk_delete_max_age_days() -> i64 {
    BULK_DELETE_MAX_AGE_DAYS
}

/// In-memory double for `ChatAttachmentStore`, exposed for integration tests
/// of downstream crates.
pub mod test_double {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU64, Ordering};

    use tokio::sync::Mutex;

    use super::*;

    #[derive(Default)]
    pub struct InMemoryChatStore {
        next_id: AtomicU64,
        messages: Mutex<HashMap<String, (String, Vec<u8>)>>,
    }

    impl InMemoryChatStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn message_count(&self) -> usize {
            self.messages.lock().await.len()
        }
    }

    impl ChatAttachmentStore for InMemoryChatStore {
        fn provider(&self) -> &'static str {
            "test.mem"
        }

        fn upload<'a>(
            &'a self,
            channel_id: &'a str,
            filename: &'a str,
            bytes: Vec<u8>,
        ) -> Pin<Box<dyn Future<Output = Result<UploadedAttachment>> + Send + 'a>> {
            Box::pin(async move {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed).to_string();
                let size = bytes.len() as i64;
                self.messages
                    .lock()
                    .await
                    .insert(id.clone(), (filename.to_string(), bytes));
                Ok(UploadedAttachment {
                    message_id: id.clone(),
                    channel_id: channel_id.to_string(),
                    size,
                    url: format!("https://mem.invalid/{id}?ex=7fffffff"),
                })
            })
        }

        fn delete_one<'a>(
            &'a self,
            _channel_id: &'a str,
            message_id: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
            Box::pin(async move {
                self.messages.lock().await.remove(message_id);
                Ok(())
            })
        }

        fn bulk_delete<'a>(
            &'a self,
            channel_id: &'a str,
            message_ids: &'a [String],
        ) -> Pin<Box<dyn Future<Output = Result<Vec<String>>> + Send + 'a>> {
            Box::pin(async move {
                for id in message_ids {
                    self.delete_one(channel_id, id).await?;
                }
                Ok(Vec::new())
            })
        }

        fn get_attachment_url<'a>(
            &'a self,
            _channel_id: &'a str,
            message_id: &'a str,
        ) -> Pin<Box<dyn Future<Output = Result<String>> + Send + 'a>> {
            Box::pin(async move {
                if self.messages.lock().await.contains_key(message_id) {
                    Ok(format!("https://mem.invalid/{message_id}?ex=7fffffff"))
                } else {
                    Err(Error::not_found(format!("message not found: {message_id}")))
                }
            })
        }

        fn refresh_urls<'a>(
            &'a self,
            urls: &'a [String],
        ) -> Pin<Box<dyn Future<Output = Result<Vec<Option<String>>>> + Send + 'a>> {
            Box::pin(async move {
                let messages = self.messages.lock().await;
                Ok(urls
                    .iter()
                    .map(|url| {
                        let message_id = url.strip_prefix("https://mem.invalid/")?.split('?').next()?;
                        messages
                            .contains_key(message_id)
                            .then(|| format!("https://mem.invalid/{message_id}?ex=7fffffff"))
                    })
                    .collect())
            })
        }

        fn list_recent<'a>(
            &'a self,
            _channel_id: &'a str,
            limit: u32,
        ) -> Pin<Box<dyn Future<Output = Result<Vec<RemoteMessage>>> + Send + 'a>> {
            Box::pin(async move {
                let messages = self.messages.lock().await;
                let mut entries: Vec<(u64, String, String)> = messages
                    .iter()
                    .map(|(id, (filename, _))| (id.parse().unwrap_or(0), id.clone(), filename.clone()))
                    .collect();
                entries.sort_by(|a, b| b.0.cmp(&a.0));
                Ok(entries
                    .into_iter()
                    .take(limit as usize)
                    .map(|(_, message_id, filename)| RemoteMessage {
                        message_id,
                        filename,
                    })
                    .collect())
            })
        }
    }
}
