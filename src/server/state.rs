use std::sync::Arc;
use std::time::Instant;

use crate::config::ServiceConfig;
use crate::engine::EngineHandle;
use crate::metrics::Metrics;

/// Shared by every handler. Cloning is cheap.
#[derive(Clone, Debug)]
pub struct AppState {
    pub config: Arc<ServiceConfig>,
    pub engine: EngineHandle,
    pub metrics: Arc<Metrics>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: ServiceConfig, engine: EngineHandle) -> Self {
        let metrics = Arc::new(Metrics::new(&config.service_name));
        Self {
            config: Arc::new(config),
            engine,
            metrics,
            started_at: Instant::now(),
        }
    }
}
