//! Content Hashing
//!
//! Every chunk and fragment carries a sha-256 content hash, rendered as
//! lowercase hex. The hash is computed on write, stored in the node index
//! and the coordinator catalog, and re-verified on every read path.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

use crate::error::{CoreError, Result};

/// Lowercase hex sha-256 digest of a payload. Deserialization validates,
/// so a malformed digest is rejected at the wire.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String")]
pub struct ContentHash(String);

impl TryFrom<String> for ContentHash {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl ContentHash {
    /// Hash a payload.
    pub fn of(data: &[u8]) -> Self {
        Self(hex::encode(Sha256::digest(data)))
    }

    /// Validate and wrap an externally supplied hex digest.
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.len() != 64 || !raw.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidHash(raw));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when `data` hashes to this digest.
    pub fn verify(&self, data: &[u8]) -> bool {
        Self::of(data) == *self
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // sha256("") is a well-known constant
        let hash = ContentHash::of(b"");
        assert_eq!(
            hash.as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_verify_matches() {
        let hash = ContentHash::of(b"payload");
        assert!(hash.verify(b"payload"));
        assert!(!hash.verify(b"tampered"));
    }

    #[test]
    fn test_parse_normalizes_case() {
        let upper = ContentHash::of(b"x").as_str().to_ascii_uppercase();
        let parsed = ContentHash::parse(upper).unwrap();
        assert_eq!(parsed, ContentHash::of(b"x"));
    }

    #[test]
    fn test_parse_rejects_short_digest() {
        assert!(ContentHash::parse("abc123").is_err());
    }

    #[test]
    fn test_parse_rejects_non_hex() {
        let raw = "z".repeat(64);
        assert!(ContentHash::parse(raw).is_err());
    }
}
