use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use attachvault_core::{download, Error};

use crate::error_response::ApiResult;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct DownloadQuery {
    pub index: Option<i64>,
    pub start_chunk: Option<i64>,
    #[serde(default)]
    pub inline: bool,
}

/// `GET /download/:id` — proxies a single chunk when `index` is given, or the
/// concatenated tail of the file from `start_chunk` onward (spec.md §4.E, §6).
pub async fn download(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<DownloadQuery>,
) -> ApiResult<Response> {
    let file = state
        .index
        .get_file(&id)
        .await?
        .ok_or_else(|| Error::not_found(format!("file not found: {id}")))?;
    let chunks = state.index.get_chunks(&id).await?;
    let now = chrono::Utc::now().timestamp();

    if let Some(idx) = query.index {
        let chunk = chunks
            .into_iter()
            .find(|c| c.idx == idx)
            .ok_or_else(|| Error::not_found(format!("chunk not found: {id}#{idx}")))?;

        let bytes = download::download_chunk(
            &state.http_client,
            &state.index,
            state.store.as_ref(),
            state.config.discord_backup_channel_id.as_deref(),
            chunk,
            now,
            None,
        )
        .await?;

        let mut response = Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_LENGTH, bytes.len())
            .body(Body::from(bytes))
            .map_err(|e| Error::internal(e.to_string()))?;
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, content_disposition(&file.name, query.inline));
        return Ok(response);
    }

    let start_chunk = query.start_chunk.unwrap_or(0).max(0) as usize;
    if start_chunk > chunks.len() {
        return Err(Error::not_found(format!("start_chunk beyond file end: {id}")).into());
    }
    let tail = &chunks[start_chunk..];
    let content_length: i64 = tail.iter().map(|c| c.size).sum();

    let cancel = CancellationToken::new();
    let store: Arc<dyn attachvault_core::object_store::ChatAttachmentStore> = state.store.clone();
    let stream = download::stream_file(
        state.http_client.clone(),
        state.index.clone(),
        store,
        state.config.discord_backup_channel_id.clone(),
        tail.to_vec(),
        now,
        cancel,
    );

    let body = Body::from_stream(stream);
    let mut response = Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_LENGTH, content_length)
        .body(body)
        .map_err(|e| Error::internal(e.to_string()))?;
    response
        .headers_mut()
        .insert(header::CONTENT_DISPOSITION, content_disposition(&file.name, query.inline));
    Ok(response)
}

fn content_disposition(filename: &str, inline: bool) -> HeaderValue {
    let disposition = if inline { "inline" } else { "attachment" };
    let encoded = utf8_percent_encode(filename, NON_ALPHANUMERIC);
    let value = format!("{disposition}; filename*=UTF-8''{encoded}");
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
