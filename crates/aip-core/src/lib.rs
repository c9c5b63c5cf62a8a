//! # aip-core: Foundational Types for AIP Archival Storage
//!
//! This crate is the leaf of the workspace DAG. It defines the identifier
//! newtypes shared by the catalog, the object store and the HTTP layer, and
//! the fixity primitives every write path is verified against.
//!
//! ## Key Design Principles
//!
//! 1. **Newtype wrappers for identifiers.** `SipId` and `XmlId` are distinct
//!    types. A metadata id cannot be passed where a package id is expected.
//!
//! 2. **One digest type.** `FixityDigest` is the only representation of a
//!    content digest in the workspace. Hex parsing is case-insensitive,
//!    rendering is always lowercase.
//!
//! 3. **Digests come from bytes actually read.** `FixityVerifier` and
//!    `FixityHasher` hash whatever flows through them. Nothing accepts a
//!    client-declared digest as a stand-in for a computed one.
//!
//! ## Crate Policy
//!
//! - No dependencies on other `aip-*` crates.
//! - No `unsafe` code.
//! - No `panic!()` or `.unwrap()` outside tests.

pub mod error;
pub mod fixity;
pub mod identity;

// Re-export primary types for ergonomic imports.
pub use error::{FixityError, ValidationError};
pub use fixity::{FixityDigest, FixityHasher, FixityVerifier, DIGEST_HEX_LEN};
pub use identity::{SipId, XmlId};
