use std::sync::Arc;

use attachvault_core::health::HealthCache;
use attachvault_core::index::MetadataIndex;
use attachvault_core::object_store::ChatAttachmentStore;
use attachvault_core::AppConfig;

#[derive(Clone)]
pub struct AppState {
    pub index: MetadataIndex,
    pub store: Arc<dyn ChatAttachmentStore>,
    pub config: Arc<AppConfig>,
    pub health: Arc<HealthCache>,
    pub http_client: reqwest::Client,
    pub started_at: i64,
}
