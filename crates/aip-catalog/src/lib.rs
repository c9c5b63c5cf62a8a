//! # aip-catalog: Metadata Catalog
//!
//! Transactional record store for [`AipSip`] and [`AipXml`] and their
//! lifecycle. Every [`MetadataCatalog`] method is one atomic unit: it either
//! applies completely or leaves the catalog unchanged.
//!
//! ## Backends
//!
//! | Backend            | Atomicity                                   |
//! |--------------------|---------------------------------------------|
//! | [`InMemoryCatalog`] | one write lock held for the whole method   |
//! | [`PgCatalog`]       | one SQL transaction, sip row `FOR UPDATE`  |
//!
//! The PostgreSQL backend is optional. When `DATABASE_URL` is unset the
//! service runs on the in-memory catalog and state does not survive
//! restarts.

pub mod error;
pub mod memory;
pub mod pg;

use aip_core::{FixityDigest, SipId, XmlId};
use aip_state::{AipSip, AipXml};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use error::CatalogError;
pub use memory::InMemoryCatalog;
pub use pg::{init_pool, PgCatalog};

/// Everything needed to register a new package and its first version.
#[derive(Debug, Clone)]
pub struct AipRegistration {
    pub sip_id: SipId,
    pub sip_name: String,
    pub sip_digest: FixityDigest,
    pub xml_id: XmlId,
    pub xml_name: String,
    pub xml_digest: FixityDigest,
}

/// Records left in flight longer than a reconciliation threshold.
#[derive(Debug, Clone, Default)]
pub struct StaleRecords {
    /// Packages in PROCESSING, with their versions populated.
    pub sips: Vec<AipSip>,
    /// Versions still marked processing whose package is not PROCESSING.
    pub xmls: Vec<AipXml>,
}

impl StaleRecords {
    pub fn is_empty(&self) -> bool {
        self.sips.is_empty() && self.xmls.is_empty()
    }
}

/// Transactional catalog of archival packages.
#[async_trait]
pub trait MetadataCatalog: Send + Sync + 'static {
    /// Insert a PROCESSING package and its in-flight version 1.
    ///
    /// Fails with `ConflictObject` if either id is already present.
    async fn register_aip_creation(&self, reg: &AipRegistration) -> Result<(), CatalogError>;

    /// Mark a registered creation ARCHIVED and clear the version's
    /// processing flag.
    async fn finish_aip_creation(&self, sip_id: SipId, xml_id: XmlId) -> Result<(), CatalogError>;

    /// Insert an in-flight version numbered `max(existing) + 1`.
    ///
    /// Fails with `IllegalState` while the package is PROCESSING or another
    /// of its versions is still in flight.
    async fn register_xml_update(
        &self,
        sip_id: SipId,
        xml_id: XmlId,
        name: &str,
        digest: FixityDigest,
    ) -> Result<u32, CatalogError>;

    /// Clear a version's processing flag.
    async fn finish_xml_process(&self, xml_id: XmlId) -> Result<(), CatalogError>;

    /// Move an ARCHIVED or REMOVED package to PROCESSING ahead of a hard
    /// delete.
    async fn register_sip_deletion(&self, sip_id: SipId) -> Result<(), CatalogError>;

    /// Move a package with a registered deletion to DELETED.
    async fn finish_sip_deletion(&self, sip_id: SipId) -> Result<(), CatalogError>;

    /// Logically delete an ARCHIVED package.
    async fn remove_sip(&self, sip_id: SipId) -> Result<(), CatalogError>;

    /// Load a package with its versions ordered ascending.
    async fn get_aip(&self, sip_id: SipId) -> Result<AipSip, CatalogError>;

    /// Erase a package and its versions. Compensation only.
    async fn delete_aip_record(&self, sip_id: SipId) -> Result<(), CatalogError>;

    /// Erase one version. Compensation only.
    async fn delete_xml_record(&self, xml_id: XmlId) -> Result<(), CatalogError>;

    /// Records in flight since before `cutoff`.
    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<StaleRecords, CatalogError>;

    /// Cheap round trip used by the readiness probe.
    async fn ping(&self) -> Result<(), CatalogError>;
}
