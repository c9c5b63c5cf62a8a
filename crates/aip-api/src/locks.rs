//! # Per-Package Locks
//!
//! Serializes operations on the same package inside this process. Callers
//! on different packages never contend. Entries are dropped from the map
//! once the last holder and waiter for a package are gone, so the map only
//! ever holds packages with an operation in flight.

use std::sync::Arc;

use aip_core::SipId;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<SipId, Arc<Mutex<()>>>;

/// Map of per-package async mutexes.
#[derive(Debug, Clone, Default)]
pub struct SipLocks {
    map: Arc<LockMap>,
}

impl SipLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive access to `id`.
    pub async fn lock(&self, id: SipId) -> SipGuard {
        let mutex = self
            .map
            .entry(id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = mutex.lock_owned().await;
        SipGuard {
            id,
            map: Arc::clone(&self.map),
            guard: Some(guard),
        }
    }

    /// Number of packages currently locked or awaited.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

/// Exclusive access to one package. Released on drop.
pub struct SipGuard {
    id: SipId,
    map: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for SipGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left: nobody holds or awaits it.
        self.map
            .remove_if(&self.id, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
