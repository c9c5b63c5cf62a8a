//! Catalog errors.

use aip_state::LifecycleError;
use thiserror::Error;

/// Errors raised by a [`MetadataCatalog`](crate::MetadataCatalog).
#[derive(Error, Debug)]
pub enum CatalogError {
    /// The referenced package or version does not exist.
    #[error("missing object: {0}")]
    MissingObject(String),

    /// A record with this id already exists.
    #[error("conflicting object: {0}")]
    ConflictObject(String),

    /// The operation is not allowed in the record's current state.
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// A stored row could not be decoded into a record.
    #[error("corrupt catalog row: {0}")]
    CorruptRow(String),

    /// The database failed.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl From<LifecycleError> for CatalogError {
    fn from(err: LifecycleError) -> Self {
        Self::IllegalState(err.to_string())
    }
}
