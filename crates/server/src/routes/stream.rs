use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::Response;

use attachvault_core::{range_stream, Error};

use crate::error_response::ApiResult;
use crate::state::AppState;

/// `GET /stream/file/:id` — serves a single `Range`-addressed slice of the
/// file by proxying the target chunk's own byte range (spec.md §4.F).
pub async fn stream(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let file = state
        .index
        .get_file(&id)
        .await?
        .ok_or_else(|| Error::not_found(format!("file not found: {id}")))?;
    let chunks = state.index.get_chunks(&id).await?;

    let range_header = headers
        .get(header::RANGE)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::validation("Range header is required"))?;

    let now = chrono::Utc::now().timestamp();
    let target = range_stream::resolve_range(
        &state.index,
        state.store.as_ref(),
        state.config.discord_backup_channel_id.as_deref(),
        &file,
        &chunks,
        range_header,
        now,
    )
    .await?;

    let upstream = state
        .http_client
        .get(&target.chunk.url)
        .header(
            header::RANGE,
            format!(
                "bytes={}-{}",
                target.local_start,
                target.local_start + target.request_size - 1
            ),
        )
        .send()
        .await
        .map_err(|e| Error::internal(format!("range proxy request failed: {e}")))?;

    if !upstream.status().is_success() {
        let status = upstream.status().as_u16();
        let body = upstream.text().await.unwrap_or_default();
        return Err(Error::Upstream { status, body }.into());
    }

    let bytes = upstream
        .bytes()
        .await
        .map_err(|e| Error::internal(format!("range proxy body read failed: {e}")))?;

    let global_start = target.global_end - target.request_size + 1;
    let content_range = format!(
        "bytes {}-{}/{}",
        global_start, target.global_end, target.total_size
    );

    let response = Response::builder()
        .status(StatusCode::PARTIAL_CONTENT)
        .header(header::CONTENT_LENGTH, bytes.len())
        .header(header::CONTENT_RANGE, content_range)
        .header(header::ACCEPT_RANGES, "bytes")
        .body(Body::from(bytes))
        .map_err(|e| Error::internal(e.to_string()))?;

    Ok(response)
}
