//! # Catalog Records
//!
//! `AipSip` and `AipXml` are the records the metadata catalog owns. They
//! are plain structs: the catalog decides when they change, these types
//! only check that a change is legal.

use aip_core::{FixityDigest, SipId, XmlId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::sip::{LifecycleError, SipState};

/// An object whose payload can be audited against a recorded digest.
pub trait ArchivalObject {
    /// The digest recorded when the payload was written.
    fn recorded_digest(&self) -> &FixityDigest;

    /// Result of the last audit, if any.
    fn consistent(&self) -> Option<bool>;

    /// Record the outcome of an audit. Never persisted.
    fn set_consistent(&mut self, consistent: bool);

    /// Compare a freshly computed digest with the recorded one and store
    /// the outcome.
    fn audit_against(&mut self, recomputed: &FixityDigest) -> bool {
        let ok = recomputed == self.recorded_digest();
        self.set_consistent(ok);
        ok
    }
}

/// One version of a package's XML metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AipXml {
    #[schema(value_type = String, format = Uuid)]
    pub id: XmlId,
    #[schema(value_type = String, format = Uuid)]
    pub sip_id: SipId,
    pub name: String,
    #[schema(value_type = String, example = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad")]
    pub digest: FixityDigest,
    /// Positive, contiguous per package, starting at 1.
    pub version: u32,
    /// True between registration and completion of the write.
    pub processing: bool,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistent: Option<bool>,
}

impl AipXml {
    /// A freshly registered version, marked in flight.
    pub fn registered(
        id: XmlId,
        sip_id: SipId,
        name: impl Into<String>,
        digest: FixityDigest,
        version: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            sip_id,
            name: name.into(),
            digest,
            version,
            processing: true,
            created_at: now,
            consistent: None,
        }
    }
}

impl ArchivalObject for AipXml {
    fn recorded_digest(&self) -> &FixityDigest {
        &self.digest
    }

    fn consistent(&self) -> Option<bool> {
        self.consistent
    }

    fn set_consistent(&mut self, consistent: bool) {
        self.consistent = Some(consistent);
    }
}

/// An archival package: the SIP payload's record plus every metadata
/// version, ordered by version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AipSip {
    #[schema(value_type = String, format = Uuid)]
    pub id: SipId,
    pub name: String,
    #[schema(value_type = String)]
    pub digest: FixityDigest,
    pub state: SipState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub xmls: Vec<AipXml>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consistent: Option<bool>,
}

impl AipSip {
    /// A freshly registered package in PROCESSING with no versions yet.
    pub fn registered(
        id: SipId,
        name: impl Into<String>,
        digest: FixityDigest,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            digest,
            state: SipState::Processing,
            created_at: now,
            updated_at: now,
            xmls: Vec::new(),
            consistent: None,
        }
    }

    /// Move to `to`, leaving the record untouched if the move is illegal.
    pub fn try_transition(&mut self, to: SipState, now: DateTime<Utc>) -> Result<(), LifecycleError> {
        self.state = self.state.try_transition(to)?;
        self.updated_at = now;
        Ok(())
    }

    /// The highest metadata version.
    pub fn latest_xml(&self) -> Option<&AipXml> {
        self.xmls.iter().max_by_key(|x| x.version)
    }

    /// A specific metadata version.
    pub fn xml_version(&self, version: u32) -> Option<&AipXml> {
        self.xmls.iter().find(|x| x.version == version)
    }

    /// The version the next metadata update will receive.
    pub fn next_version(&self) -> u32 {
        self.latest_xml().map_or(1, |x| x.version + 1)
    }

    /// Whether this package is an interrupted creation: still PROCESSING
    /// and only the first version, itself in flight.
    pub fn is_pending_creation(&self) -> bool {
        self.state == SipState::Processing
            && self.xmls.len() == 1
            && self.xmls[0].version == 1
            && self.xmls[0].processing
    }

    /// Sort versions ascending and check they run 1..=n without gaps.
    pub fn normalize_versions(&mut self) -> Result<(), LifecycleError> {
        self.xmls.sort_by_key(|x| x.version);
        for (i, xml) in self.xmls.iter().enumerate() {
            let expected = i as u32 + 1;
            if xml.version != expected {
                return Err(LifecycleError::VersionGap {
                    expected,
                    found: xml.version,
                });
            }
        }
        Ok(())
    }

    /// Fold per-object audit results into the package.
    ///
    /// `consistent` becomes the conjunction of every audited object. A
    /// live package (ARCHIVED or REMOVED) with any mismatch is reported as
    /// CORRUPTED; the persisted state is unaffected because the returned
    /// record is a copy.
    pub fn summarize_audit(&mut self) {
        let all_ok = self.consistent.unwrap_or(true)
            && self.xmls.iter().all(|x| x.consistent.unwrap_or(true));
        self.consistent = Some(all_ok);
        if !all_ok && matches!(self.state, SipState::Archived | SipState::Removed) {
            self.state = SipState::Corrupted;
        }
    }
}

impl ArchivalObject for AipSip {
    fn recorded_digest(&self) -> &FixityDigest {
        &self.digest
    }

    fn consistent(&self) -> Option<bool> {
        self.consistent
    }

    fn set_consistent(&mut self, consistent: bool) {
        self.consistent = Some(consistent);
    }
}
