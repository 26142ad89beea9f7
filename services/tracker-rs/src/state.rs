use prometheus::Registry;
use std::sync::Arc;

use crate::{config::Config, coordinator::DeliveryCoordinator, metrics::AppMetrics};

/// Shared application state injected into every handler via axum State extractor.
pub struct AppState {
    pub config: Config,
    pub coordinator: Arc<DeliveryCoordinator>,
    pub metrics: Arc<AppMetrics>,
    pub registry: Registry,
}

impl AppState {
    pub fn new(
        config: Config,
        coordinator: Arc<DeliveryCoordinator>,
        metrics: Arc<AppMetrics>,
        registry: Registry,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            coordinator,
            metrics,
            registry,
        })
    }
}
