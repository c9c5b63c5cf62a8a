//! # Package Identity Newtypes
//!
//! Newtype wrappers for the two identifier namespaces of an archival
//! package. You cannot pass an `XmlId` where a `SipId` is expected.
//!
//! Both wrap a UUID. Parsing accepts any UUID textual form understood by
//! the `uuid` crate; `Display` always renders the lowercase hyphenated
//! form, which is also what object-store keys are derived from.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;

/// Unique identifier of an archival package (its SIP payload and record).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SipId(Uuid);

/// Unique identifier of one XML metadata version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct XmlId(Uuid);

impl SipId {
    /// Generate a new random package identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Parse a client-supplied identifier.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        parse_uuid("sip", s).map(Self)
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl XmlId {
    /// Generate a new random metadata identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Parse a client-supplied identifier.
    pub fn parse(s: &str) -> Result<Self, ValidationError> {
        parse_uuid("xml", s).map(Self)
    }

    /// Access the inner UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SipId {
    fn default() -> Self {
        Self::new()
    }
}

impl Default for XmlId {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_uuid(kind: &'static str, s: &str) -> Result<Uuid, ValidationError> {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty(kind));
    }
    Uuid::parse_str(trimmed).map_err(|_| ValidationError::InvalidId {
        kind,
        value: s.to_string(),
    })
}

impl FromStr for SipId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl FromStr for XmlId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for SipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl fmt::Display for XmlId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_roundtrips_display() {
        let id = SipId::new();
        let parsed = SipId::parse(&id.to_string()).unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn parse_accepts_uppercase_and_whitespace() {
        let id = SipId::parse("  6F9619FF-8B86-D011-B42D-00C04FC964FF ").unwrap();
        assert_eq!(id.to_string(), "6f9619ff-8b86-d011-b42d-00c04fc964ff");
    }

    #[test]
    fn parse_rejects_non_uuid() {
        let err = SipId::parse("not-a-uuid").unwrap_err();
        assert!(matches!(err, ValidationError::InvalidId { kind: "sip", .. }));
    }

    #[test]
    fn parse_rejects_empty() {
        assert_eq!(XmlId::parse("  ").unwrap_err(), ValidationError::Empty("xml"));
    }

    #[test]
    fn serializes_as_bare_uuid_string() {
        let id = XmlId::parse("6f9619ff-8b86-d011-b42d-00c04fc964ff").unwrap();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"6f9619ff-8b86-d011-b42d-00c04fc964ff\"");
    }

    #[test]
    fn generated_ids_are_distinct() {
        assert_ne!(SipId::new(), SipId::new());
        assert_ne!(XmlId::new(), XmlId::new());
    }
}
