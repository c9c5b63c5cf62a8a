//! # Archival Orchestration
//!
//! Coordinates the metadata catalog and the object store so the two never
//! diverge. There is no distributed transaction between them; every write
//! operation is a saga:
//!
//! ```text
//! register intent (catalog) ─▶ write bytes (store) ─▶ verify digest ─▶ commit (catalog)
//!                                     │                    │
//!                                     └──── on failure ────┴─▶ compensate:
//!                                           delete objects this operation wrote,
//!                                           then delete the records it registered
//! ```
//!
//! ## Rules
//!
//! - Input is validated before the catalog or the store is touched.
//! - A conflicting id is rejected by the catalog before any byte is written.
//! - Compensation only deletes objects this operation wrote. A key that was
//!   already occupied is never deleted.
//! - A failed compensation step is logged with the primary error and left
//!   for the reconciliation sweep. It never replaces the primary error.
//! - While an object may outlive compensation (its delete failed, or its
//!   put was abandoned at the deadline and may still publish) the records
//!   stay in flight. They are what the sweep scans for, and they hold the
//!   version number so it is never handed out twice.
//! - Every object-store call runs under a deadline. Expiry is a storage
//!   failure and runs the same compensation path.
//! - Operations on one package are serialized by [`SipLocks`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use aip_catalog::{AipRegistration, CatalogError, MetadataCatalog};
use aip_core::{FixityDigest, FixityVerifier, SipId, XmlId};
use aip_state::{AipSip, AipXml, ArchivalObject, SipState};
use aip_store::{Capacity, Namespace, ObjectKey, ObjectReader, ObjectStore, StoreError};
use axum::body::Bytes;

use crate::error::ArchivalError;
use crate::locks::SipLocks;
use crate::metrics;

/// Default deadline for a single object-store call.
pub const DEFAULT_STORAGE_DEADLINE: Duration = Duration::from_secs(300);

// ── Requests and results ─────────────────────────────────────────────

/// One uploaded payload with its client-declared digest.
#[derive(Debug, Clone)]
pub struct Upload {
    pub name: String,
    /// Declared digest as sent by the client.
    pub declared_hex: String,
    /// Declared digest, parsed.
    pub declared: FixityDigest,
    pub data: Bytes,
}

impl Upload {
    /// Validate the name and the declared digest.
    pub fn new(
        name: impl Into<String>,
        declared_hex: &str,
        data: Bytes,
    ) -> Result<Self, ArchivalError> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ArchivalError::BadArgument("file name must not be empty".into()));
        }
        let declared = FixityDigest::from_hex(declared_hex)?;
        Ok(Self {
            name,
            declared_hex: declared_hex.trim().to_string(),
            declared,
            data,
        })
    }
}

/// A new package: SIP payload plus its first XML version.
#[derive(Debug, Clone)]
pub struct StoreRequest {
    pub sip_id: SipId,
    pub xml_id: XmlId,
    pub sip: Upload,
    pub xml: Upload,
}

impl StoreRequest {
    /// Use the client's id if given, otherwise assign fresh ids.
    pub fn new(id: Option<SipId>, sip: Upload, xml: Upload) -> Self {
        Self {
            sip_id: id.unwrap_or_else(SipId::new),
            xml_id: XmlId::new(),
            sip,
            xml,
        }
    }
}

/// Ids of a stored package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredAip {
    pub sip_id: SipId,
    pub xml_id: XmlId,
}

/// A committed metadata update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct XmlUpdated {
    pub xml_id: XmlId,
    pub version: u32,
}

/// Which XML versions a retrieval includes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlSelection {
    Latest,
    All,
}

/// Streams of a retrieved package.
pub struct AipContent {
    pub sip: AipSip,
    pub sip_payload: ObjectReader,
    /// Committed versions, ascending.
    pub xmls: Vec<(AipXml, ObjectReader)>,
}

/// Catalog record to erase during compensation.
#[derive(Debug, Clone, Copy)]
enum RecordUndo {
    Xml(XmlId),
    Sip(SipId),
}

impl fmt::Display for RecordUndo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Xml(id) => write!(f, "xml record {id}"),
            Self::Sip(id) => write!(f, "sip record {id}"),
        }
    }
}

/// Objects a failing write may have published.
#[derive(Debug, Default)]
struct WriteLog {
    objects: Vec<(Namespace, ObjectKey)>,
    /// A put was abandoned at its deadline and may still publish.
    in_doubt: bool,
}

// ── Service ──────────────────────────────────────────────────────────

/// The archival orchestrator.
pub struct ArchivalService {
    catalog: Arc<dyn MetadataCatalog>,
    store: Arc<dyn ObjectStore>,
    verifier: FixityVerifier,
    locks: SipLocks,
    deadline: Duration,
}

impl ArchivalService {
    pub fn new(
        catalog: Arc<dyn MetadataCatalog>,
        store: Arc<dyn ObjectStore>,
        verifier: FixityVerifier,
    ) -> Self {
        Self {
            catalog,
            store,
            verifier,
            locks: SipLocks::new(),
            deadline: DEFAULT_STORAGE_DEADLINE,
        }
    }

    /// Override the per-call object-store deadline.
    pub fn with_storage_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub(crate) fn catalog(&self) -> &dyn MetadataCatalog {
        self.catalog.as_ref()
    }

    pub(crate) fn object_store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub(crate) fn locks(&self) -> &SipLocks {
        &self.locks
    }

    // ── Write operations ─────────────────────────────────────────────

    /// Store a new package.
    ///
    /// # Errors
    ///
    /// - `Conflict` if either id exists. Nothing is written.
    /// - `ChecksumChanged` if a stored digest differs from the declared one.
    /// - `Storage` on object-store failure or deadline expiry.
    ///
    /// After `ChecksumChanged` or `Storage` the catalog and the store hold
    /// nothing for these ids, unless compensation could not confirm the
    /// objects are gone. The package then stays PROCESSING until the
    /// reconciliation sweep removes it.
    pub async fn store(&self, req: StoreRequest) -> Result<StoredAip, ArchivalError> {
        let started = Instant::now();
        let result = self.store_inner(req).await;
        metrics::record_operation("store", result.is_ok(), started.elapsed().as_secs_f64());
        result
    }

    async fn store_inner(&self, req: StoreRequest) -> Result<StoredAip, ArchivalError> {
        let StoreRequest {
            sip_id,
            xml_id,
            sip,
            xml,
        } = req;
        let _guard = self.locks.lock(sip_id).await;

        let registration = AipRegistration {
            sip_id,
            sip_name: sip.name.clone(),
            sip_digest: sip.declared,
            xml_id,
            xml_name: xml.name.clone(),
            xml_digest: xml.declared,
        };
        self.catalog.register_aip_creation(&registration).await?;
        tracing::debug!(sip_id = %sip_id, xml_id = %xml_id, "aip creation registered");

        let mut written = WriteLog::default();
        match self
            .write_creation(sip_id, xml_id, sip, xml, &mut written)
            .await
        {
            Ok(()) => {
                tracing::info!(sip_id = %sip_id, xml_id = %xml_id, "aip archived");
                Ok(StoredAip { sip_id, xml_id })
            }
            Err(err) => {
                self.compensate(
                    "store",
                    &err,
                    &written,
                    &[RecordUndo::Xml(xml_id), RecordUndo::Sip(sip_id)],
                )
                .await;
                Err(err)
            }
        }
    }

    async fn write_creation(
        &self,
        sip_id: SipId,
        xml_id: XmlId,
        sip: Upload,
        xml: Upload,
        written: &mut WriteLog,
    ) -> Result<(), ArchivalError> {
        self.write_verified(Namespace::Sip, ObjectKey::sip(&sip_id), sip, written)
            .await?;
        self.write_verified(Namespace::Xml, ObjectKey::xml(&sip_id, 1), xml, written)
            .await?;
        self.catalog.finish_aip_creation(sip_id, xml_id).await?;
        Ok(())
    }

    /// Add the next XML version to a package.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the package is unknown.
    /// - `Conflict` if `xml_id` is taken.
    /// - `IllegalState` while the package is PROCESSING.
    /// - `ChecksumChanged` / `Storage` after compensation.
    pub async fn update_xml(
        &self,
        sip_id: SipId,
        xml_id: XmlId,
        upload: Upload,
    ) -> Result<XmlUpdated, ArchivalError> {
        let started = Instant::now();
        let result = self.update_xml_inner(sip_id, xml_id, upload).await;
        metrics::record_operation("update_xml", result.is_ok(), started.elapsed().as_secs_f64());
        result
    }

    async fn update_xml_inner(
        &self,
        sip_id: SipId,
        xml_id: XmlId,
        upload: Upload,
    ) -> Result<XmlUpdated, ArchivalError> {
        let _guard = self.locks.lock(sip_id).await;

        let version = self
            .catalog
            .register_xml_update(sip_id, xml_id, &upload.name, upload.declared)
            .await?;
        tracing::debug!(sip_id = %sip_id, xml_id = %xml_id, version, "xml update registered");

        let mut written = WriteLog::default();
        match self
            .write_update(sip_id, xml_id, version, upload, &mut written)
            .await
        {
            Ok(()) => {
                tracing::info!(sip_id = %sip_id, xml_id = %xml_id, version, "xml version archived");
                Ok(XmlUpdated { xml_id, version })
            }
            Err(err) => {
                self.compensate("update_xml", &err, &written, &[RecordUndo::Xml(xml_id)])
                    .await;
                Err(err)
            }
        }
    }

    async fn write_update(
        &self,
        sip_id: SipId,
        xml_id: XmlId,
        version: u32,
        upload: Upload,
        written: &mut WriteLog,
    ) -> Result<(), ArchivalError> {
        self.write_verified(Namespace::Xml, ObjectKey::xml(&sip_id, version), upload, written)
            .await?;
        self.catalog.finish_xml_process(xml_id).await?;
        Ok(())
    }

    /// Hard delete: erase the SIP payload, keep every record and every XML
    /// payload.
    ///
    /// If the payload delete fails the package stays PROCESSING and the
    /// reconciliation sweep finishes the deletion later.
    pub async fn delete(&self, sip_id: SipId) -> Result<(), ArchivalError> {
        let started = Instant::now();
        let result = self.delete_inner(sip_id).await;
        metrics::record_operation("delete", result.is_ok(), started.elapsed().as_secs_f64());
        result
    }

    async fn delete_inner(&self, sip_id: SipId) -> Result<(), ArchivalError> {
        let _guard = self.locks.lock(sip_id).await;
        self.catalog.register_sip_deletion(sip_id).await?;

        let key = ObjectKey::sip(&sip_id);
        match self
            .bounded("delete", Namespace::Sip, &key, self.store.delete(Namespace::Sip, &key))
            .await
        {
            Ok(()) => {}
            Err(ArchivalError::NotFound(_)) => {
                tracing::warn!(sip_id = %sip_id, "sip payload already absent during hard delete");
            }
            Err(err) => {
                tracing::error!(
                    sip_id = %sip_id,
                    error = %err,
                    "sip payload delete failed, package left PROCESSING for reconciliation"
                );
                return Err(err);
            }
        }

        self.catalog.finish_sip_deletion(sip_id).await?;
        tracing::info!(sip_id = %sip_id, "aip hard deleted");
        Ok(())
    }

    /// Soft delete: mark an ARCHIVED package REMOVED. No bytes are touched.
    pub async fn remove(&self, sip_id: SipId) -> Result<(), ArchivalError> {
        let started = Instant::now();
        let result = async {
            let _guard = self.locks.lock(sip_id).await;
            self.catalog.remove_sip(sip_id).await?;
            tracing::info!(sip_id = %sip_id, "aip removed");
            Ok(())
        }
        .await;
        metrics::record_operation("remove", result.is_ok(), started.elapsed().as_secs_f64());
        result
    }

    // ── Read operations ──────────────────────────────────────────────

    /// Open the SIP payload and the selected committed XML versions.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the package is unknown or DELETED.
    /// - `IllegalState` while a creation or hard delete is in flight.
    pub async fn get(
        &self,
        sip_id: SipId,
        selection: XmlSelection,
    ) -> Result<AipContent, ArchivalError> {
        let sip = self.catalog.get_aip(sip_id).await?;
        match sip.state {
            SipState::Deleted => {
                return Err(ArchivalError::NotFound(format!("sip {sip_id} is deleted")))
            }
            SipState::Processing => {
                return Err(ArchivalError::IllegalState(format!(
                    "sip {sip_id} has an operation in flight"
                )))
            }
            _ => {}
        }

        let sip_payload = self.open(Namespace::Sip, &ObjectKey::sip(&sip_id)).await?;

        let committed = sip.xmls.iter().filter(|x| !x.processing).cloned();
        let chosen: Vec<AipXml> = match selection {
            XmlSelection::All => committed.collect(),
            XmlSelection::Latest => committed.max_by_key(|x| x.version).into_iter().collect(),
        };

        let mut xmls = Vec::with_capacity(chosen.len());
        for xml in chosen {
            let reader = self
                .open(Namespace::Xml, &ObjectKey::xml(&sip_id, xml.version))
                .await?;
            xmls.push((xml, reader));
        }

        Ok(AipContent {
            sip,
            sip_payload,
            xmls,
        })
    }

    /// Open one committed XML version, the latest when `version` is `None`.
    ///
    /// XML payloads outlive a hard delete, so DELETED packages are served.
    pub async fn get_xml(
        &self,
        sip_id: SipId,
        version: Option<u32>,
    ) -> Result<(AipXml, ObjectReader), ArchivalError> {
        let sip = self.catalog.get_aip(sip_id).await?;
        let xml = match version {
            Some(v) => sip.xml_version(v),
            None => sip.xmls.iter().filter(|x| !x.processing).max_by_key(|x| x.version),
        }
        .filter(|x| !x.processing)
        .cloned()
        .ok_or_else(|| {
            ArchivalError::NotFound(match version {
                Some(v) => format!("xml version {v} of sip {sip_id}"),
                None => format!("committed xml of sip {sip_id}"),
            })
        })?;

        let reader = self
            .open(Namespace::Xml, &ObjectKey::xml(&sip_id, xml.version))
            .await?;
        Ok((xml, reader))
    }

    /// Load a package and audit its payloads.
    ///
    /// Every committed payload's digest is recomputed by the store and
    /// compared with the recorded digest; the outcome lands in each
    /// record's `consistent` flag. For a DELETED package only the XML
    /// payloads are audited. A missing payload audits as inconsistent.
    pub async fn get_aip_info(&self, sip_id: SipId) -> Result<AipSip, ArchivalError> {
        let mut sip = self.catalog.get_aip(sip_id).await?;

        if sip.state != SipState::Deleted {
            let key = ObjectKey::sip(&sip_id);
            self.audit(&mut sip, Namespace::Sip, &key).await?;
        }
        for xml in sip.xmls.iter_mut().filter(|x| !x.processing) {
            let key = ObjectKey::xml(&sip_id, xml.version);
            self.audit(xml, Namespace::Xml, &key).await?;
        }
        sip.summarize_audit();
        Ok(sip)
    }

    /// Whether the catalog holds a package with this id, in any state.
    pub async fn contains(&self, sip_id: SipId) -> Result<bool, ArchivalError> {
        match self.catalog.get_aip(sip_id).await {
            Ok(_) => Ok(true),
            Err(CatalogError::MissingObject(_)) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Capacity of the object store.
    pub async fn capacity(&self) -> Result<Capacity, ArchivalError> {
        match tokio::time::timeout(self.deadline, self.store.capacity()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ArchivalError::Storage("capacity query exceeded deadline".into())),
        }
    }

    /// Location of the object store backend.
    pub fn storage_location(&self) -> String {
        self.store.location()
    }

    /// Both backends answer.
    pub async fn ready(&self) -> Result<(), ArchivalError> {
        self.catalog.ping().await?;
        self.capacity().await?;
        Ok(())
    }

    // ── Helpers ──────────────────────────────────────────────────────

    /// Run an object-store call under the storage deadline.
    async fn bounded<T>(
        &self,
        op: &'static str,
        ns: Namespace,
        key: &ObjectKey,
        fut: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<T, ArchivalError> {
        match tokio::time::timeout(self.deadline, fut).await {
            Ok(result) => result.map_err(ArchivalError::from),
            Err(_) => Err(self.deadline_error(op, ns, key)),
        }
    }

    fn deadline_error(&self, op: &str, ns: Namespace, key: &ObjectKey) -> ArchivalError {
        ArchivalError::Storage(format!(
            "{op} of {ns} object {key} exceeded the {}s deadline",
            self.deadline.as_secs_f64()
        ))
    }

    /// Delete an object if present. Returns whether anything was deleted.
    pub(crate) async fn erase_object(
        &self,
        ns: Namespace,
        key: &ObjectKey,
    ) -> Result<bool, ArchivalError> {
        match self.bounded("delete", ns, key, self.store.delete(ns, key)).await {
            Ok(()) => Ok(true),
            Err(ArchivalError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn open(&self, ns: Namespace, key: &ObjectKey) -> Result<ObjectReader, ArchivalError> {
        self.bounded("get", ns, key, self.store.get(ns, key)).await
    }

    /// Write `upload` under `key` and compare the stored digest with the
    /// declared one. Records `key` in `written` whenever bytes may have
    /// been published.
    async fn write_verified(
        &self,
        ns: Namespace,
        key: ObjectKey,
        upload: Upload,
        written: &mut WriteLog,
    ) -> Result<(), ArchivalError> {
        let reader: ObjectReader = Box::new(std::io::Cursor::new(upload.data));
        let put = tokio::time::timeout(self.deadline, self.store.put(ns, &key, reader)).await;
        let stored = match put {
            Ok(Ok(digest)) => {
                written.objects.push((ns, key.clone()));
                digest
            }
            // Someone else's object: never ours to compensate.
            Ok(Err(err @ StoreError::AlreadyExists { .. })) => return Err(err.into()),
            Ok(Err(err)) => {
                written.objects.push((ns, key));
                return Err(err.into());
            }
            Err(_) => {
                let err = self.deadline_error("put", ns, &key);
                written.objects.push((ns, key));
                written.in_doubt = true;
                return Err(err);
            }
        };

        if !self.verifier.matches(&stored, &upload.declared_hex)? {
            metrics::record_checksum_mismatch(ns.dir_name());
            tracing::warn!(
                namespace = %ns,
                key = %key,
                declared = %upload.declared,
                stored = %stored,
                "checksum mismatch"
            );
            return Err(ArchivalError::ChecksumChanged(format!(
                "{ns} digest mismatch: declared {}, stored {stored}",
                upload.declared
            )));
        }
        Ok(())
    }

    /// Undo a failed write: delete the objects it wrote, then the records
    /// it registered. Failures are collected and logged, never returned.
    ///
    /// Records are only deleted once every object is confirmed gone.
    /// Otherwise they stay in flight for the reconciliation sweep.
    async fn compensate(
        &self,
        op: &'static str,
        primary: &ArchivalError,
        written: &WriteLog,
        records: &[RecordUndo],
    ) {
        let mut failures: Vec<String> = Vec::new();

        for (ns, key) in written.objects.iter().rev() {
            match tokio::time::timeout(self.deadline, self.store.delete(*ns, key)).await {
                Ok(Ok(())) | Ok(Err(StoreError::NotFound { .. })) => {}
                Ok(Err(e)) => failures.push(format!("delete {ns} object {key}: {e}")),
                Err(_) => failures.push(format!("delete {ns} object {key}: deadline exceeded")),
            }
        }

        let keep_records = written.in_doubt || !failures.is_empty();
        if !keep_records {
            for undo in records {
                let result = match undo {
                    RecordUndo::Xml(id) => self.catalog.delete_xml_record(*id).await,
                    RecordUndo::Sip(id) => self.catalog.delete_aip_record(*id).await,
                };
                match result {
                    Ok(()) | Err(CatalogError::MissingObject(_)) => {}
                    Err(e) => failures.push(format!("delete {undo}: {e}")),
                }
            }
        }

        if failures.is_empty() && !keep_records {
            tracing::info!(
                op,
                error = %primary,
                objects = written.objects.len(),
                records = records.len(),
                "compensation completed"
            );
            return;
        }

        for _ in &failures {
            metrics::record_compensation_failure();
        }
        let kept: Vec<String> = if keep_records {
            records.iter().map(ToString::to_string).collect()
        } else {
            Vec::new()
        };
        tracing::error!(
            op,
            error = %primary,
            failures = ?failures,
            kept = ?kept,
            in_doubt = written.in_doubt,
            "compensation incomplete, residue left for reconciliation"
        );
    }

    async fn audit<O: ArchivalObject + Send>(
        &self,
        obj: &mut O,
        ns: Namespace,
        key: &ObjectKey,
    ) -> Result<(), ArchivalError> {
        match self
            .bounded("digest", ns, key, self.store.digest_of(ns, key))
            .await
        {
            Ok(digest) => {
                if !obj.audit_against(&digest) {
                    tracing::warn!(namespace = %ns, key = %key, "stored payload digest changed");
                }
            }
            Err(ArchivalError::NotFound(_)) => {
                obj.set_consistent(false);
                tracing::warn!(namespace = %ns, key = %key, "stored payload missing");
            }
            Err(e) => return Err(e),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aip_catalog::InMemoryCatalog;
    use aip_store::MemoryObjectStore;
    use tokio::io::AsyncReadExt;

    struct Fixture {
        catalog: InMemoryCatalog,
        store: MemoryObjectStore,
        service: ArchivalService,
    }

    fn fixture() -> Fixture {
        let catalog = InMemoryCatalog::new();
        let store = MemoryObjectStore::default();
        let service = ArchivalService::new(
            Arc::new(catalog.clone()),
            Arc::new(store.clone()),
            FixityVerifier::new(),
        );
        Fixture {
            catalog,
            store,
            service,
        }
    }

    fn digest_hex(data: &[u8]) -> String {
        FixityVerifier::new().digest_bytes(data).to_hex()
    }

    fn upload(name: &str, data: &'static [u8]) -> Upload {
        Upload::new(name, &digest_hex(data), Bytes::from_static(data)).unwrap()
    }

    fn bad_upload(name: &str, data: &'static [u8]) -> Upload {
        Upload::new(name, &digest_hex(b"something else"), Bytes::from_static(data)).unwrap()
    }

    async fn read_all(mut r: ObjectReader) -> Vec<u8> {
        let mut out = Vec::new();
        r.read_to_end(&mut out).await.unwrap();
        out
    }

    async fn stored(f: &Fixture) -> StoredAip {
        f.service
            .store(StoreRequest::new(
                None,
                upload("pkg.zip", b"SIPDATA"),
                upload("mets.xml", b"<xml/>"),
            ))
            .await
            .unwrap()
    }

    // ── Store ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn store_then_get_roundtrips_bytes() {
        let f = fixture();
        let ids = stored(&f).await;

        let content = f.service.get(ids.sip_id, XmlSelection::All).await.unwrap();
        assert_eq!(content.sip.state, SipState::Archived);
        assert_eq!(content.sip.digest.to_hex(), digest_hex(b"SIPDATA"));
        assert_eq!(read_all(content.sip_payload).await, b"SIPDATA");
        assert_eq!(content.xmls.len(), 1);
        let (xml, reader) = content.xmls.into_iter().next().unwrap();
        assert_eq!(xml.id, ids.xml_id);
        assert_eq!(read_all(reader).await, b"<xml/>");
    }

    #[tokio::test]
    async fn sip_checksum_mismatch_leaves_no_residue() {
        let f = fixture();
        let req = StoreRequest::new(None, bad_upload("pkg.zip", b"SIPDATA"), upload("m", b"<xml/>"));
        let sip_id = req.sip_id;
        let err = f.service.store(req).await.unwrap_err();
        assert!(matches!(err, ArchivalError::ChecksumChanged(_)));
        assert!(f.catalog.is_empty());
        assert!(f.store.is_empty());
        assert!(matches!(
            f.service.get_aip_info(sip_id).await,
            Err(ArchivalError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn xml_checksum_mismatch_removes_sip_payload_too() {
        let f = fixture();
        let req = StoreRequest::new(None, upload("pkg.zip", b"SIPDATA"), bad_upload("m", b"<xml/>"));
        let err = f.service.store(req).await.unwrap_err();
        assert!(matches!(err, ArchivalError::ChecksumChanged(_)));
        assert!(f.catalog.is_empty());
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected_and_original_untouched() {
        let f = fixture();
        let ids = stored(&f).await;

        let again = StoreRequest::new(
            Some(ids.sip_id),
            upload("other.zip", b"OTHER"),
            upload("m", b"<other/>"),
        );
        assert!(matches!(
            f.service.store(again).await,
            Err(ArchivalError::Conflict(_))
        ));

        let content = f.service.get(ids.sip_id, XmlSelection::All).await.unwrap();
        assert_eq!(read_all(content.sip_payload).await, b"SIPDATA");
        assert_eq!(f.store.len(), 2);
    }

    #[tokio::test]
    async fn storage_failure_compensates() {
        let f = fixture();
        f.store.fail_puts(true);
        let err = f
            .service
            .store(StoreRequest::new(None, upload("p", b"SIPDATA"), upload("m", b"<xml/>")))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchivalError::Storage(_)));
        assert!(f.catalog.is_empty());
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn deadline_expiry_keeps_records_in_flight() {
        let catalog = InMemoryCatalog::new();
        let store = MemoryObjectStore::default();
        store.delay_puts(Duration::from_millis(200));
        let service = ArchivalService::new(
            Arc::new(catalog.clone()),
            Arc::new(store.clone()),
            FixityVerifier::new(),
        )
        .with_storage_deadline(Duration::from_millis(20));

        let req = StoreRequest::new(None, upload("p", b"SIPDATA"), upload("m", b"<xml/>"));
        let sip_id = req.sip_id;
        let err = service.store(req).await.unwrap_err();
        assert!(matches!(err, ArchivalError::Storage(ref m) if m.contains("deadline")));
        assert!(store.is_empty());

        // The abandoned put could still publish, so the records stay for
        // the reconciliation sweep.
        let sip = catalog.get_aip(sip_id).await.unwrap();
        assert!(sip.is_pending_creation());
        assert!(matches!(
            service.get(sip_id, XmlSelection::Latest).await,
            Err(ArchivalError::IllegalState(_))
        ));
    }

    #[tokio::test]
    async fn failed_object_delete_keeps_records_in_flight() {
        let f = fixture();
        let ids = stored(&f).await;
        f.store.fail_deletes(true);

        let err = f
            .service
            .update_xml(ids.sip_id, XmlId::new(), bad_upload("m", b"<v2/>"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchivalError::ChecksumChanged(_)));

        // The orphaned object still occupies version 2, and so does its record.
        assert!(f
            .store
            .contains(Namespace::Xml, &ObjectKey::xml(&ids.sip_id, 2))
            .await
            .unwrap());
        let sip = f.catalog.get_aip(ids.sip_id).await.unwrap();
        assert_eq!(sip.xmls.len(), 2);
        assert!(sip.xmls[1].processing);

        // Further updates wait for the residue to be repaired instead of
        // colliding with the orphaned key.
        assert!(matches!(
            f.service
                .update_xml(ids.sip_id, XmlId::new(), upload("m", b"<v3/>"))
                .await,
            Err(ArchivalError::IllegalState(_))
        ));
        let content = f.service.get(ids.sip_id, XmlSelection::All).await.unwrap();
        assert_eq!(content.xmls.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_updates_get_contiguous_versions() {
        let f = fixture();
        let ids = stored(&f).await;
        let service = Arc::new(f.service);

        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let service = Arc::clone(&service);
                tokio::spawn(async move {
                    service
                        .update_xml(ids.sip_id, XmlId::new(), upload("m", b"<v/>"))
                        .await
                        .unwrap()
                        .version
                })
            })
            .collect();

        let mut versions = Vec::new();
        for task in tasks {
            versions.push(task.await.unwrap());
        }
        versions.sort_unstable();
        assert_eq!(versions, (2..=11).collect::<Vec<u32>>());

        let sip = f.catalog.get_aip(ids.sip_id).await.unwrap();
        let committed: Vec<u32> = sip.xmls.iter().map(|x| x.version).collect();
        assert_eq!(committed, (1..=11).collect::<Vec<u32>>());
        assert!(sip.xmls.iter().all(|x| !x.processing));
    }

    #[tokio::test]
    async fn occupied_key_is_not_deleted_by_compensation() {
        let f = fixture();
        let req = StoreRequest::new(None, upload("p", b"SIPDATA"), upload("m", b"<xml/>"));
        let key = ObjectKey::sip(&req.sip_id);
        f.store.tamper(Namespace::Sip, &key, b"pre-existing");

        let err = f.service.store(req).await.unwrap_err();
        assert!(matches!(err, ArchivalError::Conflict(_)));
        assert!(f.store.contains(Namespace::Sip, &key).await.unwrap());
        assert!(f.catalog.is_empty());
    }

    // ── Update ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn updates_are_numbered_consecutively() {
        let f = fixture();
        let ids = stored(&f).await;
        for expected in 2..=4 {
            let updated = f
                .service
                .update_xml(ids.sip_id, XmlId::new(), upload("m", b"<v/>"))
                .await
                .unwrap();
            assert_eq!(updated.version, expected);
        }
        let (latest, reader) = f.service.get_xml(ids.sip_id, None).await.unwrap();
        assert_eq!(latest.version, 4);
        assert_eq!(read_all(reader).await, b"<v/>");

        let (first, reader) = f.service.get_xml(ids.sip_id, Some(1)).await.unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(read_all(reader).await, b"<xml/>");
    }

    #[tokio::test]
    async fn failed_update_leaves_previous_versions_intact() {
        let f = fixture();
        let ids = stored(&f).await;
        let err = f
            .service
            .update_xml(ids.sip_id, XmlId::new(), bad_upload("m", b"<v2/>"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchivalError::ChecksumChanged(_)));

        let sip = f.catalog.get_aip(ids.sip_id).await.unwrap();
        assert_eq!(sip.xmls.len(), 1);
        assert_eq!(f.store.len(), 2);

        let ok = f
            .service
            .update_xml(ids.sip_id, XmlId::new(), upload("m", b"<v2/>"))
            .await
            .unwrap();
        assert_eq!(ok.version, 2);
    }

    #[tokio::test]
    async fn update_of_unknown_package_is_not_found() {
        let f = fixture();
        assert!(matches!(
            f.service
                .update_xml(SipId::new(), XmlId::new(), upload("m", b"<v/>"))
                .await,
            Err(ArchivalError::NotFound(_))
        ));
        assert!(f.store.is_empty());
    }

    // ── Delete ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn soft_delete_keeps_bytes() {
        let f = fixture();
        let ids = stored(&f).await;
        f.service.remove(ids.sip_id).await.unwrap();

        let info = f.service.get_aip_info(ids.sip_id).await.unwrap();
        assert_eq!(info.state, SipState::Removed);
        assert_eq!(info.consistent, Some(true));
        assert_eq!(f.store.len(), 2);
    }

    #[tokio::test]
    async fn hard_delete_erases_sip_payload_only() {
        let f = fixture();
        let ids = stored(&f).await;
        f.service.delete(ids.sip_id).await.unwrap();

        assert!(matches!(
            f.service.get(ids.sip_id, XmlSelection::Latest).await,
            Err(ArchivalError::NotFound(_))
        ));
        assert!(!f
            .store
            .contains(Namespace::Sip, &ObjectKey::sip(&ids.sip_id))
            .await
            .unwrap());

        let info = f.service.get_aip_info(ids.sip_id).await.unwrap();
        assert_eq!(info.state, SipState::Deleted);
        assert_eq!(info.consistent, Some(true));
        assert_eq!(info.xmls[0].consistent, Some(true));

        let (_, reader) = f.service.get_xml(ids.sip_id, None).await.unwrap();
        assert_eq!(read_all(reader).await, b"<xml/>");
    }

    #[tokio::test]
    async fn hard_delete_twice_is_illegal() {
        let f = fixture();
        let ids = stored(&f).await;
        f.service.delete(ids.sip_id).await.unwrap();
        assert!(matches!(
            f.service.delete(ids.sip_id).await,
            Err(ArchivalError::IllegalState(_))
        ));
    }

    // ── Audit ────────────────────────────────────────────────────────

    #[tokio::test]
    async fn audit_flags_only_the_tampered_version() {
        let f = fixture();
        let ids = stored(&f).await;
        f.service
            .update_xml(ids.sip_id, XmlId::new(), upload("m", b"<v2/>"))
            .await
            .unwrap();
        f.store.tamper(
            Namespace::Xml,
            &ObjectKey::xml(&ids.sip_id, 2),
            b"<tampered/>",
        );

        let info = f.service.get_aip_info(ids.sip_id).await.unwrap();
        assert_eq!(info.xmls[0].consistent, Some(true));
        assert_eq!(info.xmls[1].consistent, Some(false));
        assert_eq!(info.consistent, Some(false));
        assert_eq!(info.state, SipState::Corrupted);

        // The persisted state is untouched.
        let record = f.catalog.get_aip(ids.sip_id).await.unwrap();
        assert_eq!(record.state, SipState::Archived);
    }

    #[tokio::test]
    async fn missing_payload_audits_inconsistent() {
        let f = fixture();
        let ids = stored(&f).await;
        f.store
            .delete(Namespace::Sip, &ObjectKey::sip(&ids.sip_id))
            .await
            .unwrap();
        let info = f.service.get_aip_info(ids.sip_id).await.unwrap();
        assert_eq!(info.consistent, Some(false));
        assert_eq!(info.xmls[0].consistent, Some(true));
    }

    #[tokio::test]
    async fn get_latest_returns_single_version() {
        let f = fixture();
        let ids = stored(&f).await;
        f.service
            .update_xml(ids.sip_id, XmlId::new(), upload("m", b"<v2/>"))
            .await
            .unwrap();
        let content = f.service.get(ids.sip_id, XmlSelection::Latest).await.unwrap();
        assert_eq!(content.xmls.len(), 1);
        assert_eq!(content.xmls[0].0.version, 2);
    }

    #[test]
    fn upload_validation() {
        assert!(matches!(
            Upload::new("", &digest_hex(b"x"), Bytes::new()),
            Err(ArchivalError::BadArgument(_))
        ));
        assert!(matches!(
            Upload::new("a", "abc", Bytes::new()),
            Err(ArchivalError::BadArgument(_))
        ));
        let upper = digest_hex(b"x").to_uppercase();
        assert!(Upload::new("a", &upper, Bytes::from_static(b"x")).is_ok());
    }
}
