//! # Fixity: Content Digests and Verification
//!
//! Defines `FixityDigest`, the SHA-256 digest of a stored payload, and the
//! `FixityVerifier` used to compute digests of streams and compare them to
//! client-declared values.
//!
//! ## Format
//!
//! A digest renders as 64 lowercase hex characters. Client-declared values
//! are accepted in either case (`^[0-9a-fA-F]{64}$`); comparison happens on
//! the decoded bytes, so case never influences the outcome.
//!
//! ## Incremental hashing
//!
//! [`FixityHasher`] exposes the same digest over chunked input. The object
//! store feeds it from the bytes it writes to disk so the digest it reports
//! always describes what was persisted, not what was sent.

use std::fmt;
use std::io::Read;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{FixityError, ValidationError};

/// Length of a rendered digest in hex characters.
pub const DIGEST_HEX_LEN: usize = 64;

const READ_CHUNK: usize = 64 * 1024;

/// A SHA-256 content digest.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FixityDigest([u8; 32]);

impl FixityDigest {
    /// Wrap raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Parse a hex digest. Accepts upper- and lowercase, rejects anything
    /// that is not exactly 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, ValidationError> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ValidationError::Empty("digest"));
        }
        if s.len() != DIGEST_HEX_LEN || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(ValidationError::InvalidDigest(s.to_string()));
        }
        let mut bytes = [0u8; 32];
        for (i, chunk) in s.as_bytes().chunks(2).enumerate() {
            bytes[i] = (hex_val(chunk[0]) << 4) | hex_val(chunk[1]);
        }
        Ok(Self(bytes))
    }

    /// Render the digest as a lowercase hex string.
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// Access the raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

fn hex_val(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => c - b'0',
        b'a'..=b'f' => c - b'a' + 10,
        b'A'..=b'F' => c - b'A' + 10,
        _ => 0,
    }
}

impl fmt::Display for FixityDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for FixityDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FixityDigest({})", self.to_hex())
    }
}

impl TryFrom<String> for FixityDigest {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::from_hex(&value)
    }
}

impl From<FixityDigest> for String {
    fn from(digest: FixityDigest) -> Self {
        digest.to_hex()
    }
}

impl std::str::FromStr for FixityDigest {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

/// Incremental SHA-256 over chunked input.
#[derive(Clone, Default)]
pub struct FixityHasher(Sha256);

impl FixityHasher {
    pub fn new() -> Self {
        Self(Sha256::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.update(data);
    }

    pub fn finalize(self) -> FixityDigest {
        FixityDigest(self.0.finalize().into())
    }
}

/// Computes and checks payload digests.
///
/// Stateless; clone or copy freely.
#[derive(Debug, Clone, Copy, Default)]
pub struct FixityVerifier;

impl FixityVerifier {
    pub fn new() -> Self {
        Self
    }

    /// Digest an in-memory buffer.
    pub fn digest_bytes(&self, data: &[u8]) -> FixityDigest {
        let mut hasher = FixityHasher::new();
        hasher.update(data);
        hasher.finalize()
    }

    /// Digest a stream, reading it to exhaustion.
    ///
    /// # Errors
    ///
    /// Returns [`FixityError::Io`] if the stream cannot be read.
    pub fn digest<R: Read>(&self, mut reader: R) -> Result<FixityDigest, FixityError> {
        let mut hasher = FixityHasher::new();
        let mut buf = vec![0u8; READ_CHUNK];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(FixityError::Io(e)),
            };
            hasher.update(&buf[..n]);
        }
        Ok(hasher.finalize())
    }

    /// Digest a stream and compare it to `expected_hex`.
    ///
    /// The expected value is validated before the stream is touched.
    ///
    /// # Errors
    ///
    /// - [`FixityError::InvalidArgument`] if `expected_hex` is empty or malformed.
    /// - [`FixityError::Io`] if the stream cannot be read.
    pub fn verify<R: Read>(&self, reader: R, expected_hex: &str) -> Result<bool, FixityError> {
        let expected = FixityDigest::from_hex(expected_hex)?;
        let actual = self.digest(reader)?;
        Ok(actual == expected)
    }

    /// Compare an already computed digest to a declared hex value.
    pub fn matches(&self, actual: &FixityDigest, expected_hex: &str) -> Result<bool, FixityError> {
        let expected = FixityDigest::from_hex(expected_hex)?;
        Ok(*actual == expected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    // SHA-256("abc")
    const ABC_HEX: &str = "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad";

    #[test]
    fn digest_of_known_vector() {
        let d = FixityVerifier::new().digest(&b"abc"[..]).unwrap();
        assert_eq!(d.to_hex(), ABC_HEX);
    }

    #[test]
    fn digest_bytes_matches_stream_digest() {
        let v = FixityVerifier::new();
        let data = vec![7u8; READ_CHUNK * 3 + 11];
        assert_eq!(v.digest_bytes(&data), v.digest(&data[..]).unwrap());
    }

    #[test]
    fn verify_is_case_insensitive() {
        let v = FixityVerifier::new();
        assert!(v.verify(&b"abc"[..], &ABC_HEX.to_uppercase()).unwrap());
    }

    #[test]
    fn verify_reports_mismatch() {
        let v = FixityVerifier::new();
        assert!(!v.verify(&b"abd"[..], ABC_HEX).unwrap());
    }

    #[test]
    fn verify_rejects_empty_expected() {
        let err = FixityVerifier::new().verify(&b"abc"[..], "").unwrap_err();
        assert!(matches!(err, FixityError::InvalidArgument(_)));
    }

    #[test]
    fn verify_rejects_md5_length_digest() {
        let err = FixityVerifier::new()
            .verify(&b"abc"[..], "900150983cd24fb0d6963f7d28e17f72")
            .unwrap_err();
        assert!(matches!(err, FixityError::InvalidArgument(_)));
    }

    #[test]
    fn verify_surfaces_read_failure() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> std::io::Result<usize> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone"))
            }
        }
        let err = FixityVerifier::new().verify(Broken, ABC_HEX).unwrap_err();
        assert!(matches!(err, FixityError::Io(_)));
    }

    #[test]
    fn from_hex_rejects_non_hex() {
        let bad = "z".repeat(64);
        assert!(matches!(
            FixityDigest::from_hex(&bad),
            Err(ValidationError::InvalidDigest(_))
        ));
    }

    #[test]
    fn serde_uses_hex_string() {
        let d = FixityDigest::from_hex(ABC_HEX).unwrap();
        let json = serde_json::to_string(&d).unwrap();
        assert_eq!(json, format!("\"{ABC_HEX}\""));
        let back: FixityDigest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, d);
    }

    #[test]
    fn hasher_chunking_is_transparent() {
        let mut h = FixityHasher::new();
        h.update(b"a");
        h.update(b"bc");
        assert_eq!(h.finalize().to_hex(), ABC_HEX);
    }

    proptest! {
        #[test]
        fn hex_parse_accepts_any_rendered_digest(bytes in proptest::array::uniform32(any::<u8>())) {
            let d = FixityDigest::from_bytes(bytes);
            prop_assert_eq!(FixityDigest::from_hex(&d.to_hex()).unwrap(), d);
            prop_assert_eq!(FixityDigest::from_hex(&d.to_hex().to_uppercase()).unwrap(), d);
        }

        #[test]
        fn hex_parse_rejects_wrong_length(s in "[0-9a-f]{0,63}") {
            prop_assert!(FixityDigest::from_hex(&s).is_err());
        }
    }
}
