//! # Error Types
//!
//! Validation and fixity errors shared by every layer. All errors use
//! `thiserror` for derive-based `Display` and `Error` implementations.

use thiserror::Error;

/// A caller-supplied value failed validation.
///
/// Raised before any catalog or object-store call is made, so a
/// `ValidationError` never leaves partial state behind.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Identifier is not a well-formed UUID.
    #[error("invalid {kind} id {value:?}: expected a UUID")]
    InvalidId {
        /// Which identifier namespace was being parsed ("sip" or "xml").
        kind: &'static str,
        /// The rejected input.
        value: String,
    },

    /// Digest is not 64 hexadecimal characters.
    #[error("invalid digest {0:?}: expected 64 hex characters")]
    InvalidDigest(String),

    /// A required value was empty.
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Error raised while computing or checking a fixity digest.
#[derive(Error, Debug)]
pub enum FixityError {
    /// The expected digest was absent, empty or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The stream could not be read.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ValidationError> for FixityError {
    fn from(err: ValidationError) -> Self {
        Self::InvalidArgument(err.to_string())
    }
}
