//! Object store errors.

use thiserror::Error;

use crate::key::Namespace;

/// Errors raised by an [`ObjectStore`](crate::ObjectStore) backend.
#[derive(Error, Debug)]
pub enum StoreError {
    /// A payload is already published under this key.
    #[error("{ns} object {key} already exists")]
    AlreadyExists { ns: Namespace, key: String },

    /// No payload is published under this key.
    #[error("{ns} object {key} not found")]
    NotFound { ns: Namespace, key: String },

    /// The key cannot be mapped onto the sharded layout.
    #[error("invalid object key: {0}")]
    InvalidKey(String),

    /// The backing storage failed.
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}
