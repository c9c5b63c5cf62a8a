//! Reconciliation sweep.
//!
//! Compensation runs inline when an operation fails, but a crash between
//! the catalog registration and the commit leaves work in flight forever.
//! This background job finds such records once they are older than a stale
//! threshold and repairs them.
//!
//! ## Behavior
//!
//! - PROCESSING package whose only version is an in-flight version 1: an
//!   interrupted creation. Its objects and records are deleted.
//! - Any other PROCESSING package: an interrupted hard delete. The SIP
//!   payload is deleted and the package moved to DELETED.
//! - In-flight version of a settled package: an interrupted update. Its
//!   object and record are deleted.
//! - Partial object files older than the threshold are purged.
//!
//! Inline compensation that cannot confirm its objects are gone leaves its
//! records in flight on purpose, so the same scan picks that residue up.
//!
//! Each repair takes the package lock and re-reads the record, so it never
//! races an operation of this process. A failed repair is logged and
//! retried next cycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use aip_core::XmlId;
use aip_state::{AipSip, AipXml, SipState};
use aip_store::{Namespace, ObjectKey};
use chrono::Utc;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::error::ArchivalError;
use crate::metrics::{record_reconcile_repair, record_reconcile_run};
use crate::orchestration::ArchivalService;

/// Default interval between sweeps (10 minutes).
pub const RECONCILE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Default age after which in-flight work is considered abandoned (1 hour).
pub const STALE_AFTER: Duration = Duration::from_secs(60 * 60);

/// Repairs performed by one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub compensated_creations: u64,
    pub finished_deletions: u64,
    pub compensated_xmls: u64,
    pub purged_partials: u64,
    pub failures: u64,
}

impl ReconcileReport {
    pub fn repairs(&self) -> u64 {
        self.compensated_creations
            + self.finished_deletions
            + self.compensated_xmls
            + self.purged_partials
    }
}

/// Background job repairing abandoned in-flight records.
pub struct ReconciliationJob {
    service: Arc<ArchivalService>,
    interval: Duration,
    stale_after: Duration,
}

impl ReconciliationJob {
    pub fn new(service: Arc<ArchivalService>) -> Self {
        Self {
            service,
            interval: RECONCILE_INTERVAL,
            stale_after: STALE_AFTER,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }

    /// Runs a single sweep.
    pub async fn run_cycle(&self) -> ReconcileReport {
        let cycle_start = Instant::now();
        let mut report = ReconcileReport::default();
        let cutoff = Utc::now() - chrono::Duration::seconds(self.stale_after.as_secs() as i64);

        debug!("Starting reconciliation cycle");

        let stale = match self.service.catalog().list_stale(cutoff).await {
            Ok(stale) => stale,
            Err(e) => {
                warn!(error = %e, "Failed to list stale records");
                record_reconcile_run(false);
                return report;
            }
        };

        for sip in &stale.sips {
            match self.repair_sip(sip).await {
                Ok(Some(Repair::CompensatedCreation)) => report.compensated_creations += 1,
                Ok(Some(Repair::FinishedDeletion)) => report.finished_deletions += 1,
                Ok(None) => {}
                Err(e) => {
                    report.failures += 1;
                    warn!(sip_id = %sip.id, error = %e, "Failed to repair stale package");
                }
            }
            tokio::task::yield_now().await;
        }

        for xml in &stale.xmls {
            match self.repair_xml(xml).await {
                Ok(true) => report.compensated_xmls += 1,
                Ok(false) => {}
                Err(e) => {
                    report.failures += 1;
                    warn!(
                        sip_id = %xml.sip_id,
                        xml_id = %xml.id,
                        error = %e,
                        "Failed to repair stale xml version"
                    );
                }
            }
            tokio::task::yield_now().await;
        }

        match self.service.object_store().purge_stale_partials(self.stale_after).await {
            Ok(n) => report.purged_partials = n as u64,
            Err(e) => {
                report.failures += 1;
                warn!(error = %e, "Failed to purge partial objects");
            }
        }

        record_reconcile_repair("compensated_creation", report.compensated_creations);
        record_reconcile_repair("finished_deletion", report.finished_deletions);
        record_reconcile_repair("compensated_xml", report.compensated_xmls);
        record_reconcile_repair("purged_partial", report.purged_partials);
        record_reconcile_run(report.failures == 0);

        if report.repairs() > 0 {
            warn!(
                compensated_creations = report.compensated_creations,
                finished_deletions = report.finished_deletions,
                compensated_xmls = report.compensated_xmls,
                purged_partials = report.purged_partials,
                failures = report.failures,
                elapsed_ms = cycle_start.elapsed().as_millis() as u64,
                "Reconciliation repaired abandoned work"
            );
        } else {
            debug!(failures = report.failures, "Reconciliation cycle completed (nothing to repair)");
        }
        report
    }

    async fn repair_sip(&self, seen: &AipSip) -> Result<Option<Repair>, ArchivalError> {
        let _guard = self.service.locks().lock(seen.id).await;
        let sip = self.service.catalog().get_aip(seen.id).await?;
        if sip.state != SipState::Processing || sip.updated_at != seen.updated_at {
            return Ok(None);
        }

        if sip.is_pending_creation() {
            self.service
                .erase_object(Namespace::Sip, &ObjectKey::sip(&sip.id))
                .await?;
            for xml in &sip.xmls {
                self.service
                    .erase_object(Namespace::Xml, &ObjectKey::xml(&sip.id, xml.version))
                    .await?;
            }
            self.service.catalog().delete_aip_record(sip.id).await?;
            info!(sip_id = %sip.id, "Compensated interrupted creation");
            Ok(Some(Repair::CompensatedCreation))
        } else {
            self.service
                .erase_object(Namespace::Sip, &ObjectKey::sip(&sip.id))
                .await?;
            self.service.catalog().finish_sip_deletion(sip.id).await?;
            info!(sip_id = %sip.id, "Finished interrupted hard delete");
            Ok(Some(Repair::FinishedDeletion))
        }
    }

    async fn repair_xml(&self, seen: &AipXml) -> Result<bool, ArchivalError> {
        let _guard = self.service.locks().lock(seen.sip_id).await;
        let sip = self.service.catalog().get_aip(seen.sip_id).await?;
        let Some(xml) = find_processing(&sip, seen.id) else {
            return Ok(false);
        };

        self.service
            .erase_object(Namespace::Xml, &ObjectKey::xml(&sip.id, xml.version))
            .await?;
        self.service.catalog().delete_xml_record(xml.id).await?;
        info!(sip_id = %sip.id, xml_id = %xml.id, version = xml.version, "Compensated interrupted update");
        Ok(true)
    }

    /// Starts the reconciliation background task.
    ///
    /// Returns a handle that can be used to abort the task.
    pub fn start(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval(self.interval);

            info!(
                interval_secs = self.interval.as_secs(),
                stale_after_secs = self.stale_after.as_secs(),
                "Reconciliation job started"
            );

            loop {
                ticker.tick().await;
                self.run_cycle().await;
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Repair {
    CompensatedCreation,
    FinishedDeletion,
}

fn find_processing(sip: &AipSip, id: XmlId) -> Option<&AipXml> {
    sip.xmls.iter().find(|x| x.id == id && x.processing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use aip_catalog::{AipRegistration, InMemoryCatalog, MetadataCatalog};
    use aip_core::{FixityVerifier, SipId};
    use aip_store::{MemoryObjectStore, ObjectStore};
    use axum::body::Bytes;

    use crate::orchestration::{StoreRequest, Upload};

    struct Fixture {
        catalog: InMemoryCatalog,
        store: MemoryObjectStore,
        service: Arc<ArchivalService>,
        job: ReconciliationJob,
    }

    fn fixture() -> Fixture {
        fixture_with_deadline(crate::orchestration::DEFAULT_STORAGE_DEADLINE)
    }

    fn fixture_with_deadline(deadline: Duration) -> Fixture {
        let catalog = InMemoryCatalog::new();
        let store = MemoryObjectStore::default();
        let service = Arc::new(
            ArchivalService::new(
                Arc::new(catalog.clone()),
                Arc::new(store.clone()),
                FixityVerifier::new(),
            )
            .with_storage_deadline(deadline),
        );
        let job = ReconciliationJob::new(Arc::clone(&service))
            .with_stale_after(Duration::from_secs(60));
        Fixture {
            catalog,
            store,
            service,
            job,
        }
    }

    fn upload(name: &str, data: &'static [u8], claimed: &[u8]) -> Upload {
        let hex = FixityVerifier::new().digest_bytes(claimed).to_hex();
        Upload::new(name, &hex, Bytes::from_static(data)).unwrap()
    }

    fn long_ago() -> chrono::DateTime<Utc> {
        Utc::now() - chrono::Duration::hours(2)
    }

    fn registration() -> AipRegistration {
        let d = FixityVerifier::new().digest_bytes(b"x");
        AipRegistration {
            sip_id: SipId::new(),
            sip_name: "pkg.zip".into(),
            sip_digest: d,
            xml_id: XmlId::new(),
            xml_name: "mets.xml".into(),
            xml_digest: d,
        }
    }

    #[tokio::test]
    async fn fresh_in_flight_work_is_left_alone() {
        let f = fixture();
        let reg = registration();
        f.catalog.register_aip_creation(&reg).await.unwrap();

        let report = f.job.run_cycle().await;
        assert_eq!(report.repairs(), 0);
        assert_eq!(f.catalog.len(), 1);
    }

    #[tokio::test]
    async fn interrupted_creation_is_compensated() {
        let f = fixture();
        let reg = registration();
        f.catalog.register_aip_creation(&reg).await.unwrap();
        f.store.tamper(Namespace::Sip, &ObjectKey::sip(&reg.sip_id), b"x");
        f.catalog.backdate(reg.sip_id, long_ago());

        let report = f.job.run_cycle().await;
        assert_eq!(report.compensated_creations, 1);
        assert_eq!(report.failures, 0);
        assert!(f.catalog.is_empty());
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn interrupted_hard_delete_is_rolled_forward() {
        let f = fixture();
        let reg = registration();
        f.catalog.register_aip_creation(&reg).await.unwrap();
        f.catalog.finish_aip_creation(reg.sip_id, reg.xml_id).await.unwrap();
        f.store.tamper(Namespace::Sip, &ObjectKey::sip(&reg.sip_id), b"x");
        f.store.tamper(Namespace::Xml, &ObjectKey::xml(&reg.sip_id, 1), b"x");
        f.catalog.register_sip_deletion(reg.sip_id).await.unwrap();
        f.catalog.backdate(reg.sip_id, long_ago());

        let report = f.job.run_cycle().await;
        assert_eq!(report.finished_deletions, 1);
        let sip = f.catalog.get_aip(reg.sip_id).await.unwrap();
        assert_eq!(sip.state, SipState::Deleted);
        assert!(!f
            .store
            .contains(Namespace::Sip, &ObjectKey::sip(&reg.sip_id))
            .await
            .unwrap());
        assert!(f
            .store
            .contains(Namespace::Xml, &ObjectKey::xml(&reg.sip_id, 1))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn interrupted_update_is_compensated() {
        let f = fixture();
        let reg = registration();
        f.catalog.register_aip_creation(&reg).await.unwrap();
        f.catalog.finish_aip_creation(reg.sip_id, reg.xml_id).await.unwrap();
        let dangling = XmlId::new();
        let version = f
            .catalog
            .register_xml_update(reg.sip_id, dangling, "v2.xml", reg.xml_digest)
            .await
            .unwrap();
        f.store
            .tamper(Namespace::Xml, &ObjectKey::xml(&reg.sip_id, version), b"x");
        f.catalog.backdate(reg.sip_id, long_ago());

        let report = f.job.run_cycle().await;
        assert_eq!(report.compensated_xmls, 1);
        let sip = f.catalog.get_aip(reg.sip_id).await.unwrap();
        assert_eq!(sip.xmls.len(), 1);
        assert_eq!(sip.state, SipState::Archived);
        assert!(!f
            .store
            .contains(Namespace::Xml, &ObjectKey::xml(&reg.sip_id, version))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn settled_packages_are_untouched() {
        let f = fixture();
        let reg = registration();
        f.catalog.register_aip_creation(&reg).await.unwrap();
        f.catalog.finish_aip_creation(reg.sip_id, reg.xml_id).await.unwrap();
        f.catalog.backdate(reg.sip_id, long_ago());

        let report = f.job.run_cycle().await;
        assert_eq!(report, ReconcileReport::default());
        assert_eq!(
            f.catalog.get_aip(reg.sip_id).await.unwrap().state,
            SipState::Archived
        );
    }

    #[tokio::test]
    async fn orphan_left_by_failed_compensation_is_cleared() {
        let f = fixture();
        let ids = f
            .service
            .store(StoreRequest::new(
                None,
                upload("pkg.zip", b"SIPDATA", b"SIPDATA"),
                upload("v1.xml", b"<v1/>", b"<v1/>"),
            ))
            .await
            .unwrap();

        f.store.fail_deletes(true);
        let err = f
            .service
            .update_xml(ids.sip_id, XmlId::new(), upload("v2.xml", b"<v2/>", b"other"))
            .await
            .unwrap_err();
        assert!(matches!(err, ArchivalError::ChecksumChanged(_)));
        let orphan = ObjectKey::xml(&ids.sip_id, 2);
        assert!(f.store.contains(Namespace::Xml, &orphan).await.unwrap());

        f.store.fail_deletes(false);
        f.catalog.backdate(ids.sip_id, long_ago());
        let report = f.job.run_cycle().await;
        assert_eq!(report.compensated_xmls, 1);
        assert_eq!(report.failures, 0);
        assert!(!f.store.contains(Namespace::Xml, &orphan).await.unwrap());

        let updated = f
            .service
            .update_xml(ids.sip_id, XmlId::new(), upload("v2.xml", b"<v2/>", b"<v2/>"))
            .await
            .unwrap();
        assert_eq!(updated.version, 2);
    }

    #[tokio::test]
    async fn creation_abandoned_at_deadline_is_cleared() {
        let f = fixture_with_deadline(Duration::from_millis(20));
        f.store.delay_puts(Duration::from_millis(200));
        let req = StoreRequest::new(
            None,
            upload("pkg.zip", b"SIPDATA", b"SIPDATA"),
            upload("v1.xml", b"<v1/>", b"<v1/>"),
        );
        let sip_id = req.sip_id;
        assert!(matches!(
            f.service.store(req).await,
            Err(ArchivalError::Storage(_))
        ));
        assert_eq!(f.catalog.len(), 1);

        // A late publish of the abandoned put.
        f.store.tamper(Namespace::Sip, &ObjectKey::sip(&sip_id), b"SIPDATA");
        f.catalog.backdate(sip_id, long_ago());

        let report = f.job.run_cycle().await;
        assert_eq!(report.compensated_creations, 1);
        assert!(f.catalog.is_empty());
        assert!(f.store.is_empty());
    }
}
