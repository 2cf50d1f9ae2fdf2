use axum::extract::State;
use axum::Json;
use serde_json::json;

use attachvault_core::{backup, Error};

use crate::error_response::{envelope, ApiResult};
use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let now = chrono::Utc::now().timestamp();
    let discord = state.health.get(&state.http_client, now).await?;

    let db_path = state.config.database_path.clone();
    let db_size = tokio::fs::metadata(&db_path).await.map(|m| m.len()).ok();

    Ok(envelope(json!({
        "database": { "sizeBytes": db_size },
        "discord": {
            "reachable": discord.reachable,
            "latencyMs": discord.latency_ms,
            "checkedAt": discord.checked_at,
        },
        "uptimeSeconds": now - state.started_at,
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

pub async fn stats(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let stats = state.index.stats().await?;
    let index_file_size = tokio::fs::metadata(&state.config.database_path)
        .await
        .map(|m| m.len())
        .unwrap_or(0);

    Ok(envelope(json!({
        "activeFiles": stats.active_files,
        "trashedFiles": stats.trashed_files,
        "pendingFiles": stats.pending_files,
        "totalChunks": stats.total_chunks,
        "totalBytes": stats.total_bytes,
        "indexFileSizeBytes": index_file_size,
    })))
}

pub async fn trigger_backup(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let backup_channel_id = state
        .config
        .discord_backup_channel_id
        .clone()
        .ok_or_else(|| Error::validation("DISCORD_BACKUP_CHANNEL_ID is not configured"))?;

    let now = chrono::Utc::now().timestamp();
    let result = backup::run_backup(
        state.store.as_ref(),
        &backup_channel_id,
        &state.config.database_path,
        now,
    )
    .await?;

    Ok(envelope(json!({
        "messageId": result.uploaded.message_id,
        "pruned": result.pruned,
    })))
}
