use std::sync::Arc;

use nodedeck_db::sea_orm::DatabaseConnection;
use nodedeck_runner::{LogHub, ProcessRegistry};

use crate::config::Config;
use crate::lifecycle::Lifecycle;
use crate::store::ServerStore;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub hub: LogHub,
    pub registry: ProcessRegistry,
    pub lifecycle: Lifecycle,
}

impl AppState {
    pub fn new(config: Config, db: DatabaseConnection) -> Self {
        let config = Arc::new(config);
        let hub = LogHub::new(config.log_queue);
        let registry = ProcessRegistry::new(config.toolchain.clone());
        let lifecycle = Lifecycle::new(
            ServerStore::new(Arc::new(db)),
            registry.clone(),
            hub.clone(),
            &config,
        );
        Self {
            config,
            hub,
            registry,
            lifecycle,
        }
    }
}
