pub mod batches;
pub mod health;
pub mod settlements;
pub mod usage;

use crate::cache::ConsolidatedCache;
use crate::config::AppConfig;
use crate::events::EventSender;
use crate::services::batches::BatchService;
use crate::services::settlements::SettlementService;
use crate::services::usage::UsageService;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use std::time::Duration;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub batches: Arc<BatchService>,
    pub usage: Arc<UsageService>,
    pub settlements: Arc<SettlementService>,
    pub consolidated_cache: Arc<ConsolidatedCache>,
}

impl AppServices {
    pub fn new(
        db: Arc<DatabaseConnection>,
        event_sender: EventSender,
        config: &AppConfig,
    ) -> Self {
        let consolidated_cache = Arc::new(ConsolidatedCache::new(Duration::from_secs(
            config.consolidated_cache_ttl_secs,
        )));
        let batches = Arc::new(BatchService::new(
            db.clone(),
            event_sender.clone(),
            consolidated_cache.clone(),
        ));
        let usage = Arc::new(UsageService::new(db.clone(), event_sender.clone()));
        let settlements = Arc::new(SettlementService::new(
            db,
            event_sender,
            config.settlement_code_prefix.clone(),
        ));

        Self {
            batches,
            usage,
            settlements,
            consolidated_cache,
        }
    }
}
