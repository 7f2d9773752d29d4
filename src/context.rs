use crate::config::AppConfig;
use crate::core::JobStore;
use crate::core::distributor::Distributor;
use crate::core::hub::Hub;

/// Shared state handed to HTTP handlers and job workers.
#[derive(Clone)]
pub struct AppContext {
    pub config: std::sync::Arc<AppConfig>,
    pub jobs: JobStore,
    pub hub: Hub,
    pub distributor: Distributor,
}

impl AppContext {
    pub fn new(config: AppConfig, hub: Hub) -> Self {
        let distributor = Distributor::from_config(&config);
        Self {
            config: std::sync::Arc::new(config),
            jobs: JobStore::new(),
            hub,
            distributor,
        }
    }
}
