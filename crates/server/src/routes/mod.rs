mod download;
mod files;
mod stream;
mod system;
mod upload;

use std::time::Duration;

use axum::middleware;
use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::auth::require_secret;
use crate::state::AppState;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/upload/file/init", post(upload::init))
        .route("/upload/file/:id/chunk", post(upload::chunk))
        .route("/upload/file/:id/chunks", get(upload::discover_chunks))
        .route("/upload/file/:id/finalize", post(upload::finalize))
        .route("/upload/file/:id/abort", post(upload::abort))
        .route("/upload/file/pending/all", delete(upload::purge_pending))
        .route("/files", get(files::list))
        .route("/files/search", get(files::search))
        .route("/files/trash", delete(files::empty_trash))
        .route("/files/:id", get(files::get).delete(files::delete))
        .route("/files/:id/restore", post(files::restore))
        .route("/download/:id", get(download::download))
        .route("/stream/file/:id", get(stream::stream))
        .route("/system/health", get(system::health))
        .route("/system/stats", get(system::stats))
        .route("/system/backup", post(system::trigger_backup))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_secret));

    Router::new()
        .nest("/api", api)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
        .with_state(state)
}
