//! # Storage API
//!
//! Package upload, retrieval, update, deletion and audit. Write
//! operations run on the worker pool; `?async=true` returns 202 with the
//! assigned ids as soon as the job is queued instead of waiting for it.

use aip_core::{SipId, XmlId};
use aip_state::{AipSip, SipState};
use axum::body::Body;
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::io::ReaderStream;
use utoipa::ToSchema;

use crate::archive::build_zip;
use crate::error::AppError;
use crate::extractors::{extract_query, extract_validated_query, parse_sip_id, MultipartForm, Validate};
use crate::metrics;
use crate::orchestration::XmlSelection;
use crate::state::AppState;

// -- Query parameters --

/// `?all=` on package download.
#[derive(Debug, Default, Deserialize)]
pub struct GetAipQuery {
    #[serde(default)]
    pub all: bool,
}

/// `?v=` on XML download.
#[derive(Debug, Default, Deserialize)]
pub struct GetXmlQuery {
    #[serde(default)]
    pub v: Option<u32>,
}

impl Validate for GetXmlQuery {
    fn validate(&self) -> Result<(), String> {
        if self.v == Some(0) {
            return Err("xml versions start at 1".into());
        }
        Ok(())
    }
}

/// `?async=` on write operations.
#[derive(Debug, Default, Deserialize)]
pub struct AsyncQuery {
    #[serde(rename = "async", default)]
    pub run_async: bool,
}

// -- Request / response DTOs --

/// Multipart body of `POST /storage/store`.
#[allow(dead_code)]
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoreUploadForm {
    /// SIP payload.
    #[schema(value_type = String, format = Binary)]
    sip: Vec<u8>,
    /// First XML version.
    #[schema(value_type = String, format = Binary)]
    xml: Vec<u8>,
    /// SHA-256 of `sip`, 64 hex characters.
    sip_digest: String,
    /// SHA-256 of `xml`, 64 hex characters.
    xml_digest: String,
    /// Client-chosen package id (UUID).
    id: Option<String>,
}

/// Multipart body of `POST /storage/{sip_id}/update`.
#[allow(dead_code)]
#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct XmlUploadForm {
    /// New XML version.
    #[schema(value_type = String, format = Binary)]
    xml: Vec<u8>,
    /// SHA-256 of `xml`, 64 hex characters.
    xml_digest: String,
}

/// Ids of a stored package.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct StoredResponse {
    #[schema(value_type = String)]
    pub sip_id: SipId,
    #[schema(value_type = String)]
    pub xml_id: XmlId,
}

/// A committed XML version.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct XmlUpdatedResponse {
    #[schema(value_type = String)]
    pub xml_id: XmlId,
    pub version: u32,
}

/// A write queued in asynchronous mode.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AcceptedResponse {
    #[schema(value_type = String)]
    pub sip_id: SipId,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<String>)]
    pub xml_id: Option<XmlId>,
}

/// Package state after a delete.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SipStatusResponse {
    #[schema(value_type = String)]
    pub sip_id: SipId,
    pub state: SipState,
}

/// Object store capacity and worker activity.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct StorageStateResponse {
    pub capacity: u64,
    pub free: u64,
    pub used: u64,
    /// Jobs currently executing on the worker pool.
    pub running: usize,
    /// One entry per storage backend.
    pub nodes: Vec<String>,
}

/// Build the storage router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/storage/state", get(storage_state))
        .route("/storage/store", post(store_aip))
        .route("/storage/xml/{sip_id}", get(get_xml))
        .route("/storage/{sip_id}", get(get_aip).delete(remove_aip))
        .route("/storage/{sip_id}/update", post(update_xml))
        .route("/storage/{sip_id}/hard", delete(delete_aip))
        .route("/storage/{sip_id}/state", get(get_aip_state))
}

fn accepted(sip_id: SipId, xml_id: Option<XmlId>) -> Response {
    (StatusCode::ACCEPTED, Json(AcceptedResponse { sip_id, xml_id })).into_response()
}

/// POST /storage/store: Store a new package.
#[utoipa::path(
    post,
    path = "/storage/store",
    params(("async" = Option<bool>, Query, description = "Return 202 once queued")),
    request_body(content = StoreUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Package archived", body = StoredResponse),
        (status = 202, description = "Package queued", body = AcceptedResponse),
        (status = 400, description = "Invalid upload", body = crate::error::ErrorBody),
        (status = 409, description = "Id already exists", body = crate::error::ErrorBody),
        (status = 500, description = "Checksum changed", body = crate::error::ErrorBody),
        (status = 503, description = "Worker pool saturated", body = crate::error::ErrorBody),
    ),
    tag = "storage"
)]
pub async fn store_aip(
    State(state): State<AppState>,
    query: Result<Query<AsyncQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let query = extract_query(query)?;
    let req = MultipartForm::read(multipart).await?.into_store_request()?;
    let (sip_id, xml_id) = (req.sip_id, req.xml_id);
    let service = state.service.clone();

    if query.run_async {
        if service.contains(sip_id).await? {
            return Err(AppError::Conflict(format!("sip {sip_id} already exists")));
        }
        state.pool.submit(async move {
            if let Err(e) = service.store(req).await {
                tracing::warn!(sip_id = %sip_id, error = %e, "queued store failed");
            }
        })?;
        return Ok(accepted(sip_id, Some(xml_id)));
    }

    let stored = state
        .pool
        .submit(async move { service.store(req).await })?
        .wait()
        .await??;
    Ok(Json(StoredResponse {
        sip_id: stored.sip_id,
        xml_id: stored.xml_id,
    })
    .into_response())
}

/// POST /storage/{sip_id}/update: Add the next XML version.
#[utoipa::path(
    post,
    path = "/storage/{sip_id}/update",
    params(
        ("sip_id" = String, Path, description = "Package id"),
        ("async" = Option<bool>, Query, description = "Return 202 once queued"),
    ),
    request_body(content = XmlUploadForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Version archived", body = XmlUpdatedResponse),
        (status = 202, description = "Update queued", body = AcceptedResponse),
        (status = 400, description = "Invalid upload", body = crate::error::ErrorBody),
        (status = 404, description = "Package not found", body = crate::error::ErrorBody),
        (status = 409, description = "Package state forbids updates", body = crate::error::ErrorBody),
        (status = 500, description = "Checksum changed", body = crate::error::ErrorBody),
    ),
    tag = "storage"
)]
pub async fn update_xml(
    State(state): State<AppState>,
    Path(sip_id): Path<String>,
    query: Result<Query<AsyncQuery>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, AppError> {
    let sip_id = parse_sip_id(&sip_id)?;
    let query = extract_query(query)?;
    let (xml_id, upload) = MultipartForm::read(multipart).await?.into_xml_update()?;
    let service = state.service.clone();

    if query.run_async {
        if !service.contains(sip_id).await? {
            return Err(AppError::NotFound(format!("sip {sip_id}")));
        }
        state.pool.submit(async move {
            if let Err(e) = service.update_xml(sip_id, xml_id, upload).await {
                tracing::warn!(sip_id = %sip_id, xml_id = %xml_id, error = %e, "queued update failed");
            }
        })?;
        return Ok(accepted(sip_id, Some(xml_id)));
    }

    let updated = state
        .pool
        .submit(async move { service.update_xml(sip_id, xml_id, upload).await })?
        .wait()
        .await??;
    Ok(Json(XmlUpdatedResponse {
        xml_id: updated.xml_id,
        version: updated.version,
    })
    .into_response())
}

/// GET /storage/{sip_id}: Download a package as a zip archive.
#[utoipa::path(
    get,
    path = "/storage/{sip_id}",
    params(
        ("sip_id" = String, Path, description = "Package id"),
        ("all" = Option<bool>, Query, description = "Include every XML version, not only the latest"),
    ),
    responses(
        (status = 200, description = "Zip archive", content_type = "application/zip", body = String),
        (status = 400, description = "Malformed id", body = crate::error::ErrorBody),
        (status = 404, description = "Package not found or deleted", body = crate::error::ErrorBody),
    ),
    tag = "storage"
)]
pub async fn get_aip(
    State(state): State<AppState>,
    Path(sip_id): Path<String>,
    query: Result<Query<GetAipQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let sip_id = parse_sip_id(&sip_id)?;
    let query = extract_query(query)?;
    let selection = if query.all {
        XmlSelection::All
    } else {
        XmlSelection::Latest
    };

    let content = state.service.get(sip_id, selection).await?;
    let bytes = build_zip(content).await?;

    let disposition = HeaderValue::from_str(&format!("attachment; filename=\"{sip_id}.zip\""))
        .map_err(|e| AppError::Internal(e.to_string()))?;
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/zip")),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        bytes,
    )
        .into_response())
}

/// GET /storage/xml/{sip_id}: Stream one XML version.
#[utoipa::path(
    get,
    path = "/storage/xml/{sip_id}",
    params(
        ("sip_id" = String, Path, description = "Package id"),
        ("v" = Option<u32>, Query, description = "Version, latest when omitted"),
    ),
    responses(
        (status = 200, description = "XML payload", content_type = "application/xml", body = String),
        (status = 400, description = "Malformed id or version", body = crate::error::ErrorBody),
        (status = 404, description = "Version not found", body = crate::error::ErrorBody),
    ),
    tag = "storage"
)]
pub async fn get_xml(
    State(state): State<AppState>,
    Path(sip_id): Path<String>,
    query: Result<Query<GetXmlQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let sip_id = parse_sip_id(&sip_id)?;
    let query = extract_validated_query(query)?;
    let (xml, reader) = state.service.get_xml(sip_id, query.v).await?;

    let version = HeaderValue::from(xml.version);
    let body = Body::from_stream(ReaderStream::new(reader));
    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/xml")),
            (header::HeaderName::from_static("x-xml-version"), version),
        ],
        body,
    )
        .into_response())
}

/// GET /storage/{sip_id}/state: Package record with audit results.
#[utoipa::path(
    get,
    path = "/storage/{sip_id}/state",
    params(("sip_id" = String, Path, description = "Package id")),
    responses(
        (status = 200, description = "Audited package record", body = AipSip),
        (status = 400, description = "Malformed id", body = crate::error::ErrorBody),
        (status = 404, description = "Package not found", body = crate::error::ErrorBody),
    ),
    tag = "storage"
)]
pub async fn get_aip_state(
    State(state): State<AppState>,
    Path(sip_id): Path<String>,
) -> Result<Json<AipSip>, AppError> {
    let sip_id = parse_sip_id(&sip_id)?;
    Ok(Json(state.service.get_aip_info(sip_id).await?))
}

/// DELETE /storage/{sip_id}: Soft delete.
#[utoipa::path(
    delete,
    path = "/storage/{sip_id}",
    params(("sip_id" = String, Path, description = "Package id")),
    responses(
        (status = 200, description = "Package removed", body = SipStatusResponse),
        (status = 404, description = "Package not found", body = crate::error::ErrorBody),
        (status = 409, description = "Package is not ARCHIVED", body = crate::error::ErrorBody),
    ),
    tag = "storage"
)]
pub async fn remove_aip(
    State(state): State<AppState>,
    Path(sip_id): Path<String>,
) -> Result<Json<SipStatusResponse>, AppError> {
    let sip_id = parse_sip_id(&sip_id)?;
    state.service.remove(sip_id).await?;
    Ok(Json(SipStatusResponse {
        sip_id,
        state: SipState::Removed,
    }))
}

/// DELETE /storage/{sip_id}/hard: Erase the SIP payload.
#[utoipa::path(
    delete,
    path = "/storage/{sip_id}/hard",
    params(
        ("sip_id" = String, Path, description = "Package id"),
        ("async" = Option<bool>, Query, description = "Return 202 once queued"),
    ),
    responses(
        (status = 200, description = "Package deleted", body = SipStatusResponse),
        (status = 202, description = "Delete queued", body = AcceptedResponse),
        (status = 404, description = "Package not found", body = crate::error::ErrorBody),
        (status = 409, description = "Package state forbids deletion", body = crate::error::ErrorBody),
    ),
    tag = "storage"
)]
pub async fn delete_aip(
    State(state): State<AppState>,
    Path(sip_id): Path<String>,
    query: Result<Query<AsyncQuery>, QueryRejection>,
) -> Result<Response, AppError> {
    let sip_id = parse_sip_id(&sip_id)?;
    let query = extract_query(query)?;
    let service = state.service.clone();

    if query.run_async {
        if !service.contains(sip_id).await? {
            return Err(AppError::NotFound(format!("sip {sip_id}")));
        }
        state.pool.submit(async move {
            if let Err(e) = service.delete(sip_id).await {
                tracing::warn!(sip_id = %sip_id, error = %e, "queued hard delete failed");
            }
        })?;
        return Ok(accepted(sip_id, None));
    }

    state
        .pool
        .submit(async move { service.delete(sip_id).await })?
        .wait()
        .await??;
    Ok(Json(SipStatusResponse {
        sip_id,
        state: SipState::Deleted,
    })
    .into_response())
}

/// GET /storage/state: Capacity and worker activity.
#[utoipa::path(
    get,
    path = "/storage/state",
    responses(
        (status = 200, description = "Storage state", body = StorageStateResponse),
    ),
    tag = "storage"
)]
pub async fn storage_state(
    State(state): State<AppState>,
) -> Result<Json<StorageStateResponse>, AppError> {
    let capacity = state.service.capacity().await?;
    metrics::record_free_bytes(capacity.free_bytes);
    Ok(Json(StorageStateResponse {
        capacity: capacity.capacity_bytes,
        free: capacity.free_bytes,
        used: capacity.used_bytes(),
        running: state.pool.running(),
        nodes: vec![state.service.storage_location()],
    }))
}
