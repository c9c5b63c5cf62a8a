//! # Error Types
//!
//! Two layers:
//!
//! - [`ArchivalError`]: the orchestrator's taxonomy. Catalog, object-store
//!   and fixity errors are folded into it at the service boundary.
//! - [`AppError`]: implements `axum::response::IntoResponse`. Maps each
//!   archival error to an HTTP status and a JSON body with a machine code.
//!   Internal details are logged, never returned, except for
//!   `CHECKSUM_CHANGED`, whose message tells the client what was rejected.

use aip_catalog::CatalogError;
use aip_core::{FixityError, ValidationError};
use aip_store::StoreError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

// ── Service errors ───────────────────────────────────────────────────

/// Failure of an archival operation.
///
/// When an operation fails after writing, every compensation step has
/// already run by the time this error is returned.
#[derive(Error, Debug)]
pub enum ArchivalError {
    /// Caller input failed validation. Nothing was touched.
    #[error("bad argument: {0}")]
    BadArgument(String),

    /// Package, version, or payload does not exist (or is DELETED).
    #[error("not found: {0}")]
    NotFound(String),

    /// An id is already taken.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Stored bytes did not match the declared digest. The written objects
    /// and records have been removed.
    #[error("checksum changed: {0}")]
    ChecksumChanged(String),

    /// The package's state does not allow the operation.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// The object store failed or exceeded its deadline.
    #[error("storage failure: {0}")]
    Storage(String),

    /// The catalog backend failed.
    #[error("catalog failure: {0}")]
    Catalog(String),

    /// The worker pool queue is full.
    #[error("worker pool is saturated")]
    Busy,
}

impl From<CatalogError> for ArchivalError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::MissingObject(m) => Self::NotFound(m),
            CatalogError::ConflictObject(m) => Self::Conflict(m),
            CatalogError::IllegalState(m) => Self::IllegalState(m),
            other @ (CatalogError::CorruptRow(_) | CatalogError::Database(_)) => {
                Self::Catalog(other.to_string())
            }
        }
    }
}

impl From<StoreError> for ArchivalError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::NotFound(err.to_string()),
            StoreError::AlreadyExists { .. } => Self::Conflict(err.to_string()),
            StoreError::InvalidKey(m) => Self::BadArgument(m),
            StoreError::Io(e) => Self::Storage(e.to_string()),
        }
    }
}

impl From<ValidationError> for ArchivalError {
    fn from(err: ValidationError) -> Self {
        Self::BadArgument(err.to_string())
    }
}

impl From<FixityError> for ArchivalError {
    fn from(err: FixityError) -> Self {
        match err {
            FixityError::InvalidArgument(m) => Self::BadArgument(m),
            FixityError::Io(e) => Self::Storage(e.to_string()),
        }
    }
}

// ── HTTP errors ──────────────────────────────────────────────────────

/// Structured JSON error response body.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

/// Inner error detail.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "NOT_FOUND", "CHECKSUM_CHANGED").
    pub code: String,
    /// Human-readable error message.
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// Application-level error type that implements [`IntoResponse`] for Axum.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (404).
    #[error("not found: {0}")]
    NotFound(String),

    /// Request could not be parsed or failed validation (400).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Conflict with an existing id or the current state (409).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Declared digest did not match the stored bytes (500).
    #[error("checksum changed: {0}")]
    ChecksumChanged(String),

    /// Worker pool saturated (503).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Internal server error (500). Message is logged but not returned to client.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Return the HTTP status code and machine-readable error code for this error.
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::ChecksumChanged(_) => (StatusCode::INTERNAL_SERVER_ERROR, "CHECKSUM_CHANGED"),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();

        // Never expose internal error messages to clients.
        let message = match &self {
            Self::Internal(_) => "An internal error occurred".to_string(),
            other => other.to_string(),
        };

        if matches!(&self, Self::Internal(_)) {
            tracing::error!(error = %self, "internal server error");
        }

        let body = ErrorBody {
            error: ErrorDetail {
                code: code.to_string(),
                message,
                details: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<ArchivalError> for AppError {
    fn from(err: ArchivalError) -> Self {
        match err {
            ArchivalError::BadArgument(m) => Self::BadRequest(m),
            ArchivalError::NotFound(m) => Self::NotFound(m),
            ArchivalError::Conflict(m) | ArchivalError::IllegalState(m) => Self::Conflict(m),
            ArchivalError::ChecksumChanged(m) => Self::ChecksumChanged(format!(
                "{m}; the upload was rejected and nothing was stored"
            )),
            ArchivalError::Busy => {
                Self::ServiceUnavailable("worker pool is saturated, retry later".to_string())
            }
            other @ (ArchivalError::Storage(_) | ArchivalError::Catalog(_)) => {
                Self::Internal(other.to_string())
            }
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        Self::BadRequest(err.to_string())
    }
}
