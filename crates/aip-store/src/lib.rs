//! # aip-store: Write-Once Object Store
//!
//! Byte storage for archival payloads, keyed by an opaque id derived from
//! the package identifier.
//!
//! ## Layout
//!
//! SIP and XML payloads live in separate namespaces. Each key is sharded
//! by its first six characters:
//!
//! ```text
//! {root}/sip/ab/cd/ef/abcdef01-...
//! {root}/xml/ab/cd/ef/abcdef01-..._xml_3
//! ```
//!
//! ## Guarantees
//!
//! - **Write-once.** `put` on an occupied key fails with
//!   [`StoreError::AlreadyExists`]. A concurrent second writer of the same
//!   key is rejected, never serialized.
//! - **Atomic publish.** Bytes are written to a partial file in the shard
//!   directory and published with a hard link. Readers never observe a
//!   partially written payload.
//! - **Fixity on write.** The digest `put` returns is recomputed from the
//!   published file, not from the bytes the caller sent.
//!
//! ## Backends
//!
//! - [`FsObjectStore`]: the filesystem layout above.
//! - [`MemoryObjectStore`]: a map behind a lock, with fault injection for
//!   tests.

pub mod error;
pub mod fs;
pub mod key;
pub mod memory;

use std::time::Duration;

use aip_core::FixityDigest;
use async_trait::async_trait;
use tokio::io::AsyncRead;

pub use error::StoreError;
pub use fs::FsObjectStore;
pub use key::{Namespace, ObjectKey};
pub use memory::MemoryObjectStore;

/// A readable payload handed into or out of the store.
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Capacity of the backing storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capacity {
    pub capacity_bytes: u64,
    pub free_bytes: u64,
}

impl Capacity {
    pub fn used_bytes(&self) -> u64 {
        self.capacity_bytes.saturating_sub(self.free_bytes)
    }
}

/// Durable byte storage keyed by [`ObjectKey`] within a [`Namespace`].
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Write `reader` to exhaustion under `key` and publish it atomically.
    ///
    /// Returns the digest of the persisted bytes.
    async fn put(
        &self,
        ns: Namespace,
        key: &ObjectKey,
        reader: ObjectReader,
    ) -> Result<FixityDigest, StoreError>;

    /// Open a stored payload for reading.
    async fn get(&self, ns: Namespace, key: &ObjectKey) -> Result<ObjectReader, StoreError>;

    /// Remove a payload permanently.
    async fn delete(&self, ns: Namespace, key: &ObjectKey) -> Result<(), StoreError>;

    /// Recompute the digest of the payload currently stored under `key`.
    async fn digest_of(&self, ns: Namespace, key: &ObjectKey) -> Result<FixityDigest, StoreError>;

    /// Whether a payload is published under `key`.
    async fn contains(&self, ns: Namespace, key: &ObjectKey) -> Result<bool, StoreError>;

    /// Total and free bytes of the backing storage.
    async fn capacity(&self) -> Result<Capacity, StoreError>;

    /// Delete partial files left behind by interrupted writes.
    ///
    /// Only partials older than `older_than` are touched so in-flight
    /// writes are never disturbed. Returns the number removed.
    async fn purge_stale_partials(&self, older_than: Duration) -> Result<usize, StoreError>;

    /// Human-readable location of this backend, reported as a storage node.
    fn location(&self) -> String;
}
