//! # OpenAPI Specification Assembly
//!
//! Assembles all utoipa-documented routes into a single OpenAPI 3.1 spec.
//! Serves at `/openapi.json`.

use axum::routing::get;
use axum::{Json, Router};
use utoipa::OpenApi;

use crate::state::AppState;

/// Assembled OpenAPI spec for the entire API surface.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "AIP Archival Storage API",
        version = "0.1.0",
        description = "Write-once archival storage of Archival Information Packages with fixity verification, versioned XML metadata and consistency audits.",
        license(name = "AGPL-3.0-or-later")
    ),
    paths(
        // Storage
        crate::routes::storage::store_aip,
        crate::routes::storage::update_xml,
        crate::routes::storage::get_aip,
        crate::routes::storage::get_xml,
        crate::routes::storage::get_aip_state,
        crate::routes::storage::remove_aip,
        crate::routes::storage::delete_aip,
        crate::routes::storage::storage_state,
        // Health
        crate::routes::health::liveness,
        crate::routes::health::readiness,
    ),
    components(schemas(
        // Records
        aip_state::AipSip,
        aip_state::AipXml,
        aip_state::SipState,
        // Error types
        crate::error::ErrorBody,
        crate::error::ErrorDetail,
        // Storage DTOs
        crate::routes::storage::StoreUploadForm,
        crate::routes::storage::XmlUploadForm,
        crate::routes::storage::StoredResponse,
        crate::routes::storage::XmlUpdatedResponse,
        crate::routes::storage::AcceptedResponse,
        crate::routes::storage::SipStatusResponse,
        crate::routes::storage::StorageStateResponse,
    )),
    tags(
        (name = "storage", description = "Archival package storage"),
        (name = "health", description = "Kubernetes health probes"),
    )
)]
pub struct ApiDoc;

/// Build the OpenAPI router.
///
/// Serves the OpenAPI JSON spec at `/openapi.json`.
pub fn router() -> Router<AppState> {
    Router::new().route("/openapi.json", get(openapi_json))
}

/// GET /openapi.json: Return the generated OpenAPI specification.
async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
