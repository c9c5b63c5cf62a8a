//! # aip-api: Archival Storage Service
//!
//! Orchestrates the metadata catalog and the object store into a
//! write-once archival store for Archival Information Packages, and
//! exposes it over HTTP.
//!
//! ## API Surface
//!
//! | Route                              | Handler                           |
//! |------------------------------------|-----------------------------------|
//! | `POST /storage/store`              | [`routes::storage::store_aip`]    |
//! | `POST /storage/{sip_id}/update`    | [`routes::storage::update_xml`]   |
//! | `GET /storage/{sip_id}`            | [`routes::storage::get_aip`]      |
//! | `GET /storage/xml/{sip_id}`        | [`routes::storage::get_xml`]      |
//! | `GET /storage/{sip_id}/state`      | [`routes::storage::get_aip_state`]|
//! | `DELETE /storage/{sip_id}`         | [`routes::storage::remove_aip`]   |
//! | `DELETE /storage/{sip_id}/hard`    | [`routes::storage::delete_aip`]   |
//! | `GET /storage/state`               | [`routes::storage::storage_state`]|
//! | `/health/*`, `/metrics`            | [`routes::health`]                |
//!
//! ## Middleware Stack (execution order)
//!
//! ```text
//! TraceLayer → MetricsMiddleware → DefaultBodyLimit → Handler
//! ```
//!
//! ## Crate Policy
//!
//! - No business logic in route handlers: they validate, then delegate to
//!   [`orchestration::ArchivalService`].
//! - All errors map to structured HTTP responses via [`AppError`].

pub mod archive;
pub mod config;
pub mod error;
pub mod extractors;
pub mod locks;
pub mod metrics;
pub mod middleware;
pub mod openapi;
pub mod orchestration;
pub mod reconcile;
pub mod routes;
pub mod state;
pub mod worker;

use axum::extract::DefaultBodyLimit;
use axum::middleware::from_fn;
use axum::Router;

pub use error::{AppError, ArchivalError};
pub use orchestration::ArchivalService;
pub use state::AppState;

/// Assemble the full application router with all routes and middleware.
pub fn app(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes;

    Router::new()
        .merge(routes::storage::router())
        .merge(routes::health::router())
        .merge(openapi::router())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(from_fn(middleware::metrics::metrics_middleware))
        .layer(middleware::tracing_layer::layer())
        .with_state(state)
}
