//! # Application State
//!
//! Shared state handed to every route handler: the archival service, the
//! worker pool that runs write operations, the service configuration and
//! the Prometheus handle when metrics are enabled.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;

use crate::config::AppConfig;
use crate::orchestration::ArchivalService;
use crate::worker::WorkerPool;

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ArchivalService>,
    pub pool: WorkerPool,
    pub config: Arc<AppConfig>,
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    /// Start a worker pool sized from `config` and assemble the state.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(service: Arc<ArchivalService>, config: AppConfig) -> Self {
        let pool = WorkerPool::start(config.workers, config.queue_depth);
        Self {
            service,
            pool,
            config: Arc::new(config),
            prometheus: None,
        }
    }

    /// Serve `/metrics` from `handle`.
    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("storage", &self.service.storage_location())
            .field("pool", &self.pool)
            .field("config", &self.config)
            .field("prometheus", &self.prometheus.is_some())
            .finish()
    }
}
