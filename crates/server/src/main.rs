use std::net::SocketAddr;
use std::sync::Arc;

use attachvault_core::health::HealthCache;
use attachvault_core::index::MetadataIndex;
use attachvault_core::object_store::{ChatAttachmentStore, DiscordAttachmentStore};
use attachvault_core::{logging, AppConfig};
use attachvaultd::routes;
use attachvaultd::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::from_env()?;
    logging::init_logging(config.debug);

    let index = MetadataIndex::open(&config.database_path).await?;
    let store: Arc<dyn ChatAttachmentStore> =
        Arc::new(DiscordAttachmentStore::new(config.discord_bot_token.clone()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));

    let state = AppState {
        index,
        store,
        config: Arc::new(config.clone()),
        health: Arc::new(HealthCache::new()),
        http_client: reqwest::Client::new(),
        started_at: chrono::Utc::now().timestamp(),
    };

    let app = routes::build_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "attachvaultd listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
}
