//! # Filesystem Object Store
//!
//! Payloads are regular files under `{root}/{namespace}/xx/yy/zz/{key}`.
//!
//! ## Publish protocol
//!
//! 1. Stream the payload into `{key}.{nonce}.partial` in the shard
//!    directory, then `fsync` it.
//! 2. Hard-link the partial file to `{key}`. The link fails with
//!    `AlreadyExists` if the key is occupied, which is what makes a racing
//!    second writer lose instead of overwrite.
//! 3. Unlink the partial file and recompute the digest from `{key}`.
//!
//! Keys cannot contain dots, so a partial file never shadows a key. A
//! partial orphaned by a crash is removed by
//! [`purge_stale_partials`](crate::ObjectStore::purge_stale_partials).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use aip_core::{FixityDigest, FixityHasher};
use async_trait::async_trait;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::error::StoreError;
use crate::key::{Namespace, ObjectKey};
use crate::{Capacity, ObjectReader, ObjectStore};

const PARTIAL_SUFFIX: &str = ".partial";
const CHUNK: usize = 64 * 1024;

/// Object store rooted at a local directory.
#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    /// Create a store rooted at `root`. The directory is created on first
    /// write.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_of(&self, ns: Namespace, key: &ObjectKey) -> PathBuf {
        key.path_in(&self.root, ns)
    }

    fn map_missing(err: std::io::Error, ns: Namespace, key: &ObjectKey) -> StoreError {
        if err.kind() == ErrorKind::NotFound {
            StoreError::NotFound {
                ns,
                key: key.to_string(),
            }
        } else {
            StoreError::Io(err)
        }
    }

    async fn write_partial(
        partial: &Path,
        mut reader: ObjectReader,
    ) -> Result<u64, std::io::Error> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(partial)
            .await?;
        let mut buf = vec![0u8; CHUNK];
        let mut written = 0u64;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            file.write_all(&buf[..n]).await?;
            written += n as u64;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(
        &self,
        ns: Namespace,
        key: &ObjectKey,
        reader: ObjectReader,
    ) -> Result<FixityDigest, StoreError> {
        let target = self.path_of(ns, key);
        let dir = self.root.join(ns.dir_name()).join(key.shard_dir());
        fs::create_dir_all(&dir).await?;

        if fs::try_exists(&target).await? {
            return Err(StoreError::AlreadyExists {
                ns,
                key: key.to_string(),
            });
        }

        let partial = dir.join(format!(
            "{key}.{}{PARTIAL_SUFFIX}",
            uuid::Uuid::new_v4().simple()
        ));

        if let Err(e) = Self::write_partial(&partial, reader).await {
            let _ = fs::remove_file(&partial).await;
            return Err(StoreError::Io(e));
        }

        let linked = fs::hard_link(&partial, &target).await;
        if let Err(e) = fs::remove_file(&partial).await {
            tracing::warn!(path = %partial.display(), error = %e, "failed to remove partial file");
        }
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists {
                    ns,
                    key: key.to_string(),
                });
            }
            Err(e) => return Err(StoreError::Io(e)),
        }

        tracing::debug!(namespace = %ns, key = %key, "object published");
        self.digest_of(ns, key).await
    }

    async fn get(&self, ns: Namespace, key: &ObjectKey) -> Result<ObjectReader, StoreError> {
        let file = fs::File::open(self.path_of(ns, key))
            .await
            .map_err(|e| Self::map_missing(e, ns, key))?;
        Ok(Box::new(file))
    }

    async fn delete(&self, ns: Namespace, key: &ObjectKey) -> Result<(), StoreError> {
        fs::remove_file(self.path_of(ns, key))
            .await
            .map_err(|e| Self::map_missing(e, ns, key))?;
        tracing::debug!(namespace = %ns, key = %key, "object deleted");
        Ok(())
    }

    async fn digest_of(&self, ns: Namespace, key: &ObjectKey) -> Result<FixityDigest, StoreError> {
        let mut file = fs::File::open(self.path_of(ns, key))
            .await
            .map_err(|e| Self::map_missing(e, ns, key))?;
        let mut hasher = FixityHasher::new();
        let mut buf = vec![0u8; CHUNK];
        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    async fn contains(&self, ns: Namespace, key: &ObjectKey) -> Result<bool, StoreError> {
        Ok(fs::try_exists(self.path_of(ns, key)).await?)
    }

    async fn capacity(&self) -> Result<Capacity, StoreError> {
        fs::create_dir_all(&self.root).await?;
        let root = self.root.clone();
        let (total, free) = tokio::task::spawn_blocking(move || {
            Ok::<_, std::io::Error>((fs2::total_space(&root)?, fs2::available_space(&root)?))
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::new(ErrorKind::Other, e)))??;
        Ok(Capacity {
            capacity_bytes: total,
            free_bytes: free,
        })
    }

    async fn purge_stale_partials(&self, older_than: Duration) -> Result<usize, StoreError> {
        let root = self.root.clone();
        let removed = tokio::task::spawn_blocking(move || purge_partials_blocking(&root, older_than))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::new(ErrorKind::Other, e)))??;
        if removed > 0 {
            tracing::info!(removed, "purged stale partial files");
        }
        Ok(removed)
    }

    fn location(&self) -> String {
        self.root.display().to_string()
    }
}

// ---------------------------------------------------------------------------
// Partial sweep
// ---------------------------------------------------------------------------

fn purge_partials_blocking(root: &Path, older_than: Duration) -> Result<usize, std::io::Error> {
    let cutoff = SystemTime::now()
        .checked_sub(older_than)
        .unwrap_or(SystemTime::UNIX_EPOCH);
    let mut removed = 0;
    for ns in Namespace::ALL {
        let ns_root = root.join(ns.dir_name());
        for dir in shard_dirs(&ns_root)? {
            for entry in std::fs::read_dir(&dir)? {
                let entry = entry?;
                let name = entry.file_name();
                if !name.to_string_lossy().ends_with(PARTIAL_SUFFIX) {
                    continue;
                }
                let modified = entry.metadata()?.modified()?;
                if modified <= cutoff {
                    match std::fs::remove_file(entry.path()) {
                        Ok(()) => removed += 1,
                        Err(e) if e.kind() == ErrorKind::NotFound => {}
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }
    Ok(removed)
}

/// Every `xx/yy/zz` directory under a namespace root.
fn shard_dirs(ns_root: &Path) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut level = vec![ns_root.to_path_buf()];
    for _ in 0..3 {
        let mut next = Vec::new();
        for dir in &level {
            let entries = match std::fs::read_dir(dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e),
            };
            for entry in entries {
                let entry = entry?;
                if entry.file_type()?.is_dir() {
                    next.push(entry.path());
                }
            }
        }
        level = next;
    }
    Ok(level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aip_core::{FixityVerifier, SipId};
    use std::sync::Arc;

    fn reader(data: &'static [u8]) -> ObjectReader {
        Box::new(std::io::Cursor::new(data))
    }

    async fn read_all(mut r: ObjectReader) -> Vec<u8> {
        let mut out = Vec::new();
        r.read_to_end(&mut out).await.unwrap();
        out
    }

    #[tokio::test]
    async fn put_get_roundtrip_returns_digest_of_persisted_bytes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path());
        let key = ObjectKey::sip(&SipId::new());

        let digest = store.put(Namespace::Sip, &key, reader(b"SIPDATA")).await.unwrap();
        assert_eq!(digest, FixityVerifier::new().digest_bytes(b"SIPDATA"));
        assert_eq!(read_all(store.get(Namespace::Sip, &key).await.unwrap()).await, b"SIPDATA");
        assert!(key.path_in(tmp.path(), Namespace::Sip).is_file());
    }

    #[tokio::test]
    async fn put_is_write_once() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path());
        let key = ObjectKey::sip(&SipId::new());

        store.put(Namespace::Sip, &key, reader(b"first")).await.unwrap();
        let err = store.put(Namespace::Sip, &key, reader(b"second")).await.unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
        assert_eq!(read_all(store.get(Namespace::Sip, &key).await.unwrap()).await, b"first");
    }

    #[tokio::test]
    async fn concurrent_writers_of_one_key_have_single_winner() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(FsObjectStore::new(tmp.path()));
        let key = ObjectKey::sip(&SipId::new());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            let key = key.clone();
            handles.push(tokio::spawn(async move {
                store.put(Namespace::Sip, &key, reader(b"payload")).await
            }));
        }
        let mut ok = 0;
        for h in handles {
            match h.await.unwrap() {
                Ok(_) => ok += 1,
                Err(StoreError::AlreadyExists { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(ok, 1);
    }

    #[tokio::test]
    async fn namespaces_are_separate() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path());
        let key = ObjectKey::sip(&SipId::new());

        store.put(Namespace::Sip, &key, reader(b"a")).await.unwrap();
        assert!(!store.contains(Namespace::Xml, &key).await.unwrap());
        store.put(Namespace::Xml, &key, reader(b"b")).await.unwrap();
    }

    #[tokio::test]
    async fn delete_and_missing_objects() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path());
        let key = ObjectKey::sip(&SipId::new());

        assert!(matches!(store.get(Namespace::Sip, &key).await, Err(e) if e.is_not_found()));
        assert!(store.delete(Namespace::Sip, &key).await.unwrap_err().is_not_found());
        assert!(store.digest_of(Namespace::Sip, &key).await.unwrap_err().is_not_found());

        store.put(Namespace::Sip, &key, reader(b"x")).await.unwrap();
        store.delete(Namespace::Sip, &key).await.unwrap();
        assert!(!store.contains(Namespace::Sip, &key).await.unwrap());
    }

    #[tokio::test]
    async fn digest_of_sees_out_of_band_changes() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path());
        let key = ObjectKey::xml(&SipId::new(), 1);

        let before = store.put(Namespace::Xml, &key, reader(b"<xml/>")).await.unwrap();
        std::fs::write(key.path_in(tmp.path(), Namespace::Xml), b"<tampered/>").unwrap();
        let after = store.digest_of(Namespace::Xml, &key).await.unwrap();
        assert_ne!(before, after);
    }

    #[tokio::test]
    async fn failed_write_leaves_nothing_visible() {
        struct Failing;
        impl tokio::io::AsyncRead for Failing {
            fn poll_read(
                self: std::pin::Pin<&mut Self>,
                _: &mut std::task::Context<'_>,
                _: &mut tokio::io::ReadBuf<'_>,
            ) -> std::task::Poll<std::io::Result<()>> {
                std::task::Poll::Ready(Err(std::io::Error::new(ErrorKind::Other, "client gone")))
            }
        }

        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path());
        let key = ObjectKey::sip(&SipId::new());

        let err = store.put(Namespace::Sip, &key, Box::new(Failing)).await.unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(!store.contains(Namespace::Sip, &key).await.unwrap());
        let shard = tmp.path().join("sip").join(key.shard_dir());
        assert_eq!(std::fs::read_dir(shard).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn purge_removes_only_stale_partials() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsObjectStore::new(tmp.path());
        let key = ObjectKey::sip(&SipId::new());
        store.put(Namespace::Sip, &key, reader(b"keep")).await.unwrap();

        let shard = tmp.path().join("sip").join(key.shard_dir());
        std::fs::write(shard.join(format!("{key}.dead{PARTIAL_SUFFIX}")), b"junk").unwrap();

        assert_eq!(store.purge_stale_partials(Duration::from_secs(3600)).await.unwrap(), 0);
        assert_eq!(store.purge_stale_partials(Duration::ZERO).await.unwrap(), 1);
        assert!(store.contains(Namespace::Sip, &key).await.unwrap());
    }

    #[tokio::test]
    async fn capacity_reports_nonzero_total() {
        let tmp = tempfile::tempdir().unwrap();
        let cap = FsObjectStore::new(tmp.path().join("root")).capacity().await.unwrap();
        assert!(cap.capacity_bytes > 0);
        assert!(cap.free_bytes <= cap.capacity_bytes);
    }
}
