use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;

use attachvault_core::index::NewFile;
use attachvault_core::{backup, upload, Error};

use crate::error_response::{envelope, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InitUploadRequest {
    pub id: String,
    pub name: String,
    pub size: i64,
    #[serde(rename = "type")]
    pub mime_type: Option<String>,
    pub iv: Option<String>,
    pub salt: Option<String>,
}

pub async fn init(
    State(state): State<AppState>,
    Json(req): Json<InitUploadRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    upload::init_upload(
        &state.index,
        NewFile {
            id: req.id,
            name: req.name,
            size: req.size,
            mime_type: req.mime_type,
            iv: req.iv,
            salt: req.salt,
        },
    )
    .await?;
    Ok(envelope(serde_json::json!({})))
}

pub async fn chunk(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<Json<serde_json::Value>> {
    if body.is_empty() {
        return Err(Error::validation("chunk body must not be empty").into());
    }

    let x_chunk_number = headers
        .get("x-chunk-number")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<i64>().ok());

    let content_range_start = headers
        .get(axum::http::header::CONTENT_RANGE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_content_range_start);

    let chunk_zero_size = if x_chunk_number.is_none() && content_range_start.is_some() {
        state
            .index
            .get_chunk(&id, 0)
            .await?
            .map(|c| c.size as u64)
    } else {
        None
    };

    let idx = upload::resolve_chunk_index(x_chunk_number, content_range_start, chunk_zero_size)?;

    let filename = format!("{id}.part{idx}");
    let chunk = upload::upload_chunk(
        &state.index,
        state.store.as_ref(),
        &state.config.discord_channel_id,
        &id,
        idx,
        &filename,
        body.to_vec(),
    )
    .await?;

    Ok(envelope(serde_json::json!({ "messageId": chunk.message_id })))
}

fn parse_content_range_start(value: &str) -> Option<u64> {
    // "bytes 0-999/5000" — we only need the start offset.
    let rest = value.strip_prefix("bytes ")?;
    let (range, _total) = rest.split_once('/')?;
    let (start, _end) = range.split_once('-')?;
    start.trim().parse().ok()
}

pub async fn discover_chunks(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let indices = upload::discover_chunks(&state.index, &id).await?;
    Ok(envelope(serde_json::json!({ "indices": indices })))
}

#[derive(Debug, Deserialize)]
pub struct FinalizeQuery {
    #[serde(default)]
    pub skip_backup: bool,
}

pub async fn finalize(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<FinalizeQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let file = upload::finalize_upload(&state.index, &id).await?;

    if !query.skip_backup {
        if let Some(backup_channel_id) = state.config.discord_backup_channel_id.clone() {
            let store = state.store.clone();
            let db_path = state.config.database_path.clone();
            tokio::spawn(async move {
                let now = chrono::Utc::now().timestamp();
                if let Err(err) = backup::run_backup(store.as_ref(), &backup_channel_id, &db_path, now).await
                {
                    tracing::warn!(error = %err, "post-finalize backup failed");
                }
            });
        }
    }

    Ok(envelope(serde_json::json!({ "id": file.id, "status": file.status })))
}

pub async fn abort(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    upload::abort_upload(&state.index, state.store.clone(), &id).await?;
    Ok(envelope(serde_json::json!({})))
}

pub async fn purge_pending(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let now = chrono::Utc::now().timestamp();
    let purged = upload::bulk_purge_pending(&state.index, state.store.clone(), now, 0).await?;
    Ok(envelope(serde_json::json!({ "purged": purged })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_range_start() {
        assert_eq!(parse_content_range_start("bytes 8388608-16777215/20000000"), Some(8_388_608));
    }

    #[test]
    fn rejects_malformed_content_range() {
        assert_eq!(parse_content_range_start("bytes */100"), None);
    }
}
