//! # In-Memory Catalog
//!
//! Every method takes the single write lock (or read lock for queries)
//! for its whole duration, validates, and only then mutates. A method that
//! returns an error has changed nothing.

use std::collections::HashMap;
use std::sync::Arc;

use aip_core::{FixityDigest, SipId, XmlId};
use aip_state::{AipSip, AipXml, SipState};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::CatalogError;
use crate::{AipRegistration, MetadataCatalog, StaleRecords};

#[derive(Debug, Default)]
struct Inner {
    sips: HashMap<SipId, AipSip>,
    /// Owning package of every version.
    xml_owner: HashMap<XmlId, SipId>,
}

impl Inner {
    fn sip_mut(&mut self, id: SipId) -> Result<&mut AipSip, CatalogError> {
        self.sips
            .get_mut(&id)
            .ok_or_else(|| CatalogError::MissingObject(format!("sip {id}")))
    }

    fn xml_mut(&mut self, id: XmlId) -> Result<&mut AipXml, CatalogError> {
        let owner = *self
            .xml_owner
            .get(&id)
            .ok_or_else(|| CatalogError::MissingObject(format!("xml {id}")))?;
        self.sips
            .get_mut(&owner)
            .and_then(|sip| sip.xmls.iter_mut().find(|x| x.id == id))
            .ok_or_else(|| CatalogError::MissingObject(format!("xml {id}")))
    }
}

/// Catalog held in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    inner: Arc<RwLock<Inner>>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of packages, in any state.
    pub fn len(&self) -> usize {
        self.inner.read().sips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().sips.is_empty()
    }

    /// Overwrite timestamps of a package and its versions. Lets tests
    /// age records past a reconciliation cutoff.
    pub fn backdate(&self, sip_id: SipId, at: DateTime<Utc>) {
        if let Some(sip) = self.inner.write().sips.get_mut(&sip_id) {
            sip.updated_at = at;
            for xml in &mut sip.xmls {
                xml.created_at = at;
            }
        }
    }

    fn apply_transition(&self, sip_id: SipId, to: SipState) -> Result<(), CatalogError> {
        let mut inner = self.inner.write();
        let sip = inner.sip_mut(sip_id)?;
        sip.try_transition(to, Utc::now())?;
        Ok(())
    }
}

#[async_trait]
impl MetadataCatalog for InMemoryCatalog {
    async fn register_aip_creation(&self, reg: &AipRegistration) -> Result<(), CatalogError> {
        let mut inner = self.inner.write();
        if inner.sips.contains_key(&reg.sip_id) {
            return Err(CatalogError::ConflictObject(format!("sip {}", reg.sip_id)));
        }
        if inner.xml_owner.contains_key(&reg.xml_id) {
            return Err(CatalogError::ConflictObject(format!("xml {}", reg.xml_id)));
        }
        let now = Utc::now();
        let mut sip = AipSip::registered(reg.sip_id, reg.sip_name.clone(), reg.sip_digest, now);
        sip.xmls.push(AipXml::registered(
            reg.xml_id,
            reg.sip_id,
            reg.xml_name.clone(),
            reg.xml_digest,
            1,
            now,
        ));
        inner.xml_owner.insert(reg.xml_id, reg.sip_id);
        inner.sips.insert(reg.sip_id, sip);
        Ok(())
    }

    async fn finish_aip_creation(&self, sip_id: SipId, xml_id: XmlId) -> Result<(), CatalogError> {
        let mut inner = self.inner.write();
        let owner = inner.xml_owner.get(&xml_id).copied();
        let sip = inner.sip_mut(sip_id)?;
        let xml_idx = match owner {
            Some(owner) if owner == sip_id => sip.xmls.iter().position(|x| x.id == xml_id),
            _ => None,
        }
        .ok_or_else(|| CatalogError::MissingObject(format!("xml {xml_id} of sip {sip_id}")))?;

        if !sip.xmls[xml_idx].processing {
            return Err(CatalogError::IllegalState(format!(
                "xml {xml_id} is not being processed"
            )));
        }
        sip.try_transition(SipState::Archived, Utc::now())?;
        sip.xmls[xml_idx].processing = false;
        Ok(())
    }

    async fn register_xml_update(
        &self,
        sip_id: SipId,
        xml_id: XmlId,
        name: &str,
        digest: FixityDigest,
    ) -> Result<u32, CatalogError> {
        let mut inner = self.inner.write();
        if inner.xml_owner.contains_key(&xml_id) {
            // Unknown package wins over conflicting version id.
            inner.sip_mut(sip_id)?;
            return Err(CatalogError::ConflictObject(format!("xml {xml_id}")));
        }
        let sip = inner.sip_mut(sip_id)?;
        if sip.state == SipState::Processing {
            return Err(CatalogError::IllegalState(format!(
                "sip {sip_id} is {}",
                sip.state
            )));
        }
        if let Some(pending) = sip.xmls.iter().find(|x| x.processing) {
            return Err(CatalogError::IllegalState(format!(
                "sip {sip_id} has xml version {} in flight",
                pending.version
            )));
        }
        let version = sip.next_version();
        sip.xmls
            .push(AipXml::registered(xml_id, sip_id, name, digest, version, Utc::now()));
        inner.xml_owner.insert(xml_id, sip_id);
        Ok(version)
    }

    async fn finish_xml_process(&self, xml_id: XmlId) -> Result<(), CatalogError> {
        let mut inner = self.inner.write();
        let xml = inner.xml_mut(xml_id)?;
        if !xml.processing {
            return Err(CatalogError::IllegalState(format!(
                "xml {xml_id} is not being processed"
            )));
        }
        xml.processing = false;
        Ok(())
    }

    async fn register_sip_deletion(&self, sip_id: SipId) -> Result<(), CatalogError> {
        let mut inner = self.inner.write();
        let sip = inner.sip_mut(sip_id)?;
        if !sip.state.accepts_deletion() {
            return Err(CatalogError::IllegalState(format!(
                "sip {sip_id} is {} and cannot be deleted",
                sip.state
            )));
        }
        sip.try_transition(SipState::Processing, Utc::now())?;
        Ok(())
    }

    async fn finish_sip_deletion(&self, sip_id: SipId) -> Result<(), CatalogError> {
        self.apply_transition(sip_id, SipState::Deleted)
    }

    async fn remove_sip(&self, sip_id: SipId) -> Result<(), CatalogError> {
        self.apply_transition(sip_id, SipState::Removed)
    }

    async fn get_aip(&self, sip_id: SipId) -> Result<AipSip, CatalogError> {
        let mut sip = self
            .inner
            .read()
            .sips
            .get(&sip_id)
            .cloned()
            .ok_or_else(|| CatalogError::MissingObject(format!("sip {sip_id}")))?;
        if let Err(e) = sip.normalize_versions() {
            tracing::warn!(sip_id = %sip_id, error = %e, "xml version sequence has a gap");
        }
        Ok(sip)
    }

    async fn delete_aip_record(&self, sip_id: SipId) -> Result<(), CatalogError> {
        let mut inner = self.inner.write();
        let sip = inner
            .sips
            .remove(&sip_id)
            .ok_or_else(|| CatalogError::MissingObject(format!("sip {sip_id}")))?;
        for xml in sip.xmls {
            inner.xml_owner.remove(&xml.id);
        }
        Ok(())
    }

    async fn delete_xml_record(&self, xml_id: XmlId) -> Result<(), CatalogError> {
        let mut inner = self.inner.write();
        let owner = inner
            .xml_owner
            .remove(&xml_id)
            .ok_or_else(|| CatalogError::MissingObject(format!("xml {xml_id}")))?;
        if let Some(sip) = inner.sips.get_mut(&owner) {
            sip.xmls.retain(|x| x.id != xml_id);
        }
        Ok(())
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<StaleRecords, CatalogError> {
        let inner = self.inner.read();
        let mut stale = StaleRecords::default();
        for sip in inner.sips.values() {
            if sip.state == SipState::Processing {
                if sip.updated_at < cutoff {
                    let mut sip = sip.clone();
                    sip.xmls.sort_by_key(|x| x.version);
                    stale.sips.push(sip);
                }
                continue;
            }
            stale.xmls.extend(
                sip.xmls
                    .iter()
                    .filter(|x| x.processing && x.created_at < cutoff)
                    .cloned(),
            );
        }
        Ok(stale)
    }

    async fn ping(&self) -> Result<(), CatalogError> {
        Ok(())
    }
}
