use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use attachvault_core::index::FileStatus;
use attachvault_core::Error;

use crate::error_response::{envelope, ApiResult};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
    #[serde(default)]
    pub offset: Option<i64>,
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let status = match query.status.as_deref() {
        Some(s) => FileStatus::parse(s)?,
        None => FileStatus::Active,
    };
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    let offset = query.offset.unwrap_or(0).max(0);

    let (files, total) = state.index.list_files(status, limit, offset).await?;
    Ok(envelope(serde_json::json!({ "files": files, "total": total })))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub status: Option<String>,
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let status = match query.status.as_deref() {
        Some(s) => FileStatus::parse(s)?,
        None => FileStatus::Active,
    };
    let files = state.index.search_files(&query.q, status).await?;
    Ok(envelope(serde_json::json!({ "files": files })))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let file = state
        .index
        .get_file(&id)
        .await?
        .ok_or_else(|| Error::not_found(format!("file not found: {id}")))?;
    let chunks = state.index.get_chunks(&id).await?;
    Ok(envelope(serde_json::json!({ "file": file, "chunks": chunks })))
}

pub async fn restore(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let file = state
        .index
        .get_file(&id)
        .await?
        .ok_or_else(|| Error::not_found(format!("file not found: {id}")))?;
    if file.status != FileStatus::Trashed.as_str() {
        return Err(Error::conflict(format!("file {id} is not trashed")).into());
    }
    state.index.set_status(&id, FileStatus::Active).await?;
    Ok(envelope(serde_json::json!({ "id": id, "status": "active" })))
}

/// First call moves `active -> trashed`; a second call on an already-trashed
/// file permanently deletes it and schedules external chunk cleanup
/// (spec.md §6 Files).
pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<serde_json::Value>> {
    let file = state
        .index
        .get_file(&id)
        .await?
        .ok_or_else(|| Error::not_found(format!("file not found: {id}")))?;

    if file.status == FileStatus::Active.as_str() {
        state.index.set_status(&id, FileStatus::Trashed).await?;
        return Ok(envelope(serde_json::json!({ "id": id, "status": "trashed" })));
    }

    if let Some((_, chunks)) = state.index.delete_file_cascade(&id).await? {
        schedule_chunk_cleanup(state.store.clone(), chunks);
    }
    Ok(envelope(serde_json::json!({ "id": id, "status": "deleted" })))
}

pub async fn empty_trash(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let (trashed, _total) = state
        .index
        .list_files(FileStatus::Trashed, i64::MAX, 0)
        .await?;

    let mut deleted = 0usize;
    for file in trashed {
        if let Some((_, chunks)) = state.index.delete_file_cascade(&file.id).await? {
            schedule_chunk_cleanup(state.store.clone(), chunks);
            deleted += 1;
        }
    }
    Ok(envelope(serde_json::json!({ "deleted": deleted })))
}

fn schedule_chunk_cleanup(
    store: std::sync::Arc<dyn attachvault_core::object_store::ChatAttachmentStore>,
    chunks: Vec<attachvault_core::index::ChunkRecord>,
) {
    if chunks.is_empty() {
        return;
    }
    tokio::spawn(async move {
        let mut by_channel: std::collections::HashMap<String, Vec<String>> = Default::default();
        for chunk in chunks {
            by_channel.entry(chunk.channel_id).or_default().push(chunk.message_id);
        }
        for (channel_id, ids) in by_channel {
            if let Err(failed) = store.bulk_delete(&channel_id, &ids).await {
                tracing::warn!(error = %failed, channel_id, "file-delete chunk cleanup failed");
            }
        }
    });
}
