//! In-memory object store.
//!
//! Used by tests and by development deployments without a storage root.
//! Carries fault-injection hooks so callers can exercise their failure
//! paths: tampering with stored bytes, failing writes, and slow writes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use aip_core::{FixityDigest, FixityVerifier};
use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::io::AsyncReadExt;

use crate::error::StoreError;
use crate::key::{Namespace, ObjectKey};
use crate::{Capacity, ObjectReader, ObjectStore};

type Objects = HashMap<(Namespace, ObjectKey), Arc<Vec<u8>>>;

/// Object store held entirely in memory.
#[derive(Debug, Clone)]
pub struct MemoryObjectStore {
    objects: Arc<RwLock<Objects>>,
    capacity_bytes: u64,
    fail_puts: Arc<AtomicBool>,
    fail_deletes: Arc<AtomicBool>,
    put_delay_ms: Arc<AtomicU64>,
}

impl Default for MemoryObjectStore {
    fn default() -> Self {
        Self::new(u64::MAX)
    }
}

impl MemoryObjectStore {
    pub fn new(capacity_bytes: u64) -> Self {
        Self {
            objects: Arc::new(RwLock::new(HashMap::new())),
            capacity_bytes,
            fail_puts: Arc::new(AtomicBool::new(false)),
            fail_deletes: Arc::new(AtomicBool::new(false)),
            put_delay_ms: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Number of stored payloads across both namespaces.
    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Replace stored bytes without going through `put`.
    pub fn tamper(&self, ns: Namespace, key: &ObjectKey, data: &[u8]) {
        self.objects
            .write()
            .insert((ns, key.clone()), Arc::new(data.to_vec()));
    }

    /// Make every subsequent `put` fail with an I/O error.
    pub fn fail_puts(&self, fail: bool) {
        self.fail_puts.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent `delete` fail with an I/O error.
    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Delay every subsequent `put` before it publishes.
    pub fn delay_puts(&self, delay: Duration) {
        self.put_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn used_bytes(&self) -> u64 {
        self.objects.read().values().map(|v| v.len() as u64).sum()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        ns: Namespace,
        key: &ObjectKey,
        mut reader: ObjectReader,
    ) -> Result<FixityDigest, StoreError> {
        if self.objects.read().contains_key(&(ns, key.clone())) {
            return Err(StoreError::AlreadyExists {
                ns,
                key: key.to_string(),
            });
        }
        let mut data = Vec::new();
        reader.read_to_end(&mut data).await?;

        let delay = self.put_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected write failure",
            )));
        }

        let digest = FixityVerifier::new().digest_bytes(&data);
        let mut objects = self.objects.write();
        if objects.contains_key(&(ns, key.clone())) {
            return Err(StoreError::AlreadyExists {
                ns,
                key: key.to_string(),
            });
        }
        objects.insert((ns, key.clone()), Arc::new(data));
        Ok(digest)
    }

    async fn get(&self, ns: Namespace, key: &ObjectKey) -> Result<ObjectReader, StoreError> {
        let data = self
            .objects
            .read()
            .get(&(ns, key.clone()))
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                ns,
                key: key.to_string(),
            })?;
        Ok(Box::new(std::io::Cursor::new((*data).clone())))
    }

    async fn delete(&self, ns: Namespace, key: &ObjectKey) -> Result<(), StoreError> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected delete failure",
            )));
        }
        self.objects
            .write()
            .remove(&(ns, key.clone()))
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound {
                ns,
                key: key.to_string(),
            })
    }

    async fn digest_of(&self, ns: Namespace, key: &ObjectKey) -> Result<FixityDigest, StoreError> {
        let objects = self.objects.read();
        let data = objects
            .get(&(ns, key.clone()))
            .ok_or_else(|| StoreError::NotFound {
                ns,
                key: key.to_string(),
            })?;
        Ok(FixityVerifier::new().digest_bytes(data))
    }

    async fn contains(&self, ns: Namespace, key: &ObjectKey) -> Result<bool, StoreError> {
        Ok(self.objects.read().contains_key(&(ns, key.clone())))
    }

    async fn capacity(&self) -> Result<Capacity, StoreError> {
        Ok(Capacity {
            capacity_bytes: self.capacity_bytes,
            free_bytes: self.capacity_bytes.saturating_sub(self.used_bytes()),
        })
    }

    async fn purge_stale_partials(&self, _older_than: Duration) -> Result<usize, StoreError> {
        Ok(0)
    }

    fn location(&self) -> String {
        "memory".to_string()
    }
}
