//! # Object Keys and Namespaces
//!
//! Keys are validated on construction so the filesystem backend can map
//! them onto paths without further checks: at least six characters, the
//! first six hexadecimal (the shard prefix), and only `[0-9A-Za-z_-]`
//! overall. No separators, no dots, no traversal.

use std::fmt;
use std::path::{Path, PathBuf};

use aip_core::SipId;

use crate::error::StoreError;

const SHARD_PREFIX_LEN: usize = 6;
const MAX_KEY_LEN: usize = 128;

/// Payload namespace. Each maps to its own top-level directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Namespace {
    Sip,
    Xml,
}

impl Namespace {
    pub const ALL: [Namespace; 2] = [Namespace::Sip, Namespace::Xml];

    pub fn dir_name(&self) -> &'static str {
        match self {
            Self::Sip => "sip",
            Self::Xml => "xml",
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// A validated object key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey(String);

impl ObjectKey {
    /// Validate an arbitrary key.
    pub fn new(key: &str) -> Result<Self, StoreError> {
        if key.len() < SHARD_PREFIX_LEN {
            return Err(StoreError::InvalidKey(format!(
                "{key:?} is shorter than {SHARD_PREFIX_LEN} characters"
            )));
        }
        if key.len() > MAX_KEY_LEN {
            return Err(StoreError::InvalidKey(format!(
                "key too long: {} chars (max {MAX_KEY_LEN})",
                key.len()
            )));
        }
        if !key.as_bytes()[..SHARD_PREFIX_LEN]
            .iter()
            .all(|b| b.is_ascii_hexdigit())
        {
            return Err(StoreError::InvalidKey(format!(
                "{key:?} must start with {SHARD_PREFIX_LEN} hex characters"
            )));
        }
        if let Some(c) = key
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(StoreError::InvalidKey(format!(
                "{key:?} contains invalid character {c:?}"
            )));
        }
        Ok(Self(key.to_string()))
    }

    /// Key of a package's SIP payload: the package id itself.
    pub fn sip(id: &SipId) -> Self {
        Self(id.to_string())
    }

    /// Key of one XML version: `{sip_id}_xml_{version}`.
    pub fn xml(id: &SipId, version: u32) -> Self {
        Self(format!("{id}_xml_{version}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shard directory relative to a namespace root: `xx/yy/zz`.
    pub fn shard_dir(&self) -> PathBuf {
        let p = &self.0[..SHARD_PREFIX_LEN];
        Path::new(&p[0..2]).join(&p[2..4]).join(&p[4..6])
    }

    /// Full path of this key under `root`.
    pub fn path_in(&self, root: &Path, ns: Namespace) -> PathBuf {
        root.join(ns.dir_name()).join(self.shard_dir()).join(&self.0)
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sip_id() -> SipId {
        SipId::parse("abcdef01-2345-6789-abcd-ef0123456789").unwrap()
    }

    #[test]
    fn sip_and_xml_keys() {
        let id = sip_id();
        assert_eq!(ObjectKey::sip(&id).as_str(), "abcdef01-2345-6789-abcd-ef0123456789");
        assert_eq!(
            ObjectKey::xml(&id, 3).as_str(),
            "abcdef01-2345-6789-abcd-ef0123456789_xml_3"
        );
    }

    #[test]
    fn path_is_sharded_by_first_six_chars() {
        let key = ObjectKey::xml(&sip_id(), 1);
        let path = key.path_in(Path::new("/data"), Namespace::Xml);
        assert_eq!(
            path,
            Path::new("/data/xml/ab/cd/ef/abcdef01-2345-6789-abcd-ef0123456789_xml_1")
        );
    }

    #[test]
    fn rejects_short_keys() {
        assert!(matches!(ObjectKey::new("abc"), Err(StoreError::InvalidKey(_))));
    }

    #[test]
    fn rejects_non_hex_prefix() {
        assert!(ObjectKey::new("zzzzzz-1").is_err());
    }

    #[test]
    fn rejects_traversal() {
        assert!(ObjectKey::new("abcdef/../../etc").is_err());
        assert!(ObjectKey::new("abcdef.partial").is_err());
    }

    #[test]
    fn accepts_generated_keys() {
        let id = SipId::new();
        assert!(ObjectKey::new(ObjectKey::sip(&id).as_str()).is_ok());
        assert!(ObjectKey::new(ObjectKey::xml(&id, 42).as_str()).is_ok());
    }
}
