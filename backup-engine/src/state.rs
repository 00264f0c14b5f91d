use std::sync::Arc;
use tokio::sync::Semaphore;

use crate::capabilities::SiteCapabilities;
use crate::config::EngineConfig;
use crate::db::connection::DbPool;
use crate::events::EventBus;
use crate::registry::JobRegistry;
use crate::storage::StorageRegistry;

pub struct EngineState {
    pub db: DbPool,
    pub config: EngineConfig,
    pub events: EventBus,
    pub registry: JobRegistry,
    pub storage: StorageRegistry,
    pub site: SiteCapabilities,
    pub job_slots: Arc<Semaphore>,
}

impl EngineState {
    pub fn new(db: DbPool, config: EngineConfig, storage: StorageRegistry, site: SiteCapabilities) -> Self {
        let max_jobs = config.max_concurrent_jobs.max(1);
        Self {
            db,
            config,
            events: EventBus::new(),
            registry: JobRegistry::new(),
            storage,
            site,
            job_slots: Arc::new(Semaphore::new(max_jobs)),
        }
    }
}
