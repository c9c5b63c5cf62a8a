//! # aip-api: Binary Entry Point
//!
//! Starts the Axum HTTP server for the archival storage service.
//! Binds to configurable port (default 8080).

use std::sync::Arc;

use aip_api::config::AppConfig;
use aip_api::reconcile::ReconciliationJob;
use aip_api::{ArchivalService, AppState};
use aip_catalog::{InMemoryCatalog, MetadataCatalog, PgCatalog};
use aip_core::FixityVerifier;
use aip_store::FsObjectStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Build configuration from environment.
    let config = AppConfig::from_env()?;

    // Initialize structured tracing.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    tracing::info!(?config, "configuration loaded");

    // Initialize database pool (optional: absent means in-memory catalog).
    let db_pool = aip_catalog::init_pool(config.database_url.as_deref())
        .await
        .map_err(|e| {
            tracing::error!("Database initialization failed: {e}");
            e
        })?;
    let catalog: Arc<dyn MetadataCatalog> = match db_pool {
        Some(pool) => Arc::new(PgCatalog::new(pool)),
        None => Arc::new(InMemoryCatalog::new()),
    };

    tokio::fs::create_dir_all(&config.storage_root).await?;
    let store = Arc::new(FsObjectStore::new(config.storage_root.clone()));
    tracing::info!(root = %config.storage_root.display(), "object store ready");

    let service = Arc::new(
        ArchivalService::new(catalog, store, FixityVerifier::new())
            .with_storage_deadline(config.storage_deadline),
    );

    if config.reconcile_interval.is_zero() {
        tracing::warn!("Reconciliation disabled; abandoned in-flight records will not be repaired");
    } else {
        ReconciliationJob::new(Arc::clone(&service))
            .with_interval(config.reconcile_interval)
            .with_stale_after(config.reconcile_stale_after)
            .start();
    }

    let port = config.port;
    let metrics_enabled = config.metrics_enabled;
    let mut state = AppState::new(service, config);
    if metrics_enabled {
        let handle = aip_api::metrics::install_recorder()?;
        state = state.with_prometheus(handle);
    }

    let app = aip_api::app(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("AIP storage API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
