//! Content hash identity for fragments.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

/// Length of a content hash in bytes (SHA-256).
pub const HASH_LEN: usize = 32;

/// Deterministic SHA-256 digest of a fragment's canonical form.
///
/// Ordering is byte-wise, which matches the lexicographic order of the
/// lowercase hex rendering.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash([u8; HASH_LEN]);

impl ContentHash {
    /// Wrap raw digest bytes.
    pub fn from_bytes(bytes: [u8; HASH_LEN]) -> Self {
        Self(bytes)
    }

    /// Hash a canonical byte sequence.
    pub fn digest(canonical: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(canonical);
        Self(hasher.finalize().into())
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
        &self.0
    }

    /// Lowercase hex rendering (64 characters).
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> String {
        let mut s = self.to_hex();
        s.truncate(12);
        s
    }
}

/// Error parsing a hex-rendered hash.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseHashError {
    /// Wrong number of hex characters.
    #[error("expected 64 hex characters, got {0}")]
    Length(usize),
    /// Non-hex character.
    #[error("invalid hex: {0}")]
    Hex(String),
}

impl FromStr for ContentHash {
    type Err = ParseHashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() != HASH_LEN * 2 {
            return Err(ParseHashError::Length(s.len()));
        }
        let mut bytes = [0u8; HASH_LEN];
        hex::decode_to_slice(s, &mut bytes).map_err(|e| ParseHashError::Hex(e.to_string()))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.short())
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip() {
        let h = ContentHash::digest(b"hello");
        let parsed: ContentHash = h.to_hex().parse().unwrap();
        assert_eq!(h, parsed);
        assert_eq!(h.to_hex().len(), 64);
    }

    #[test]
    fn test_known_digest() {
        let h = ContentHash::digest(b"abc");
        assert_eq!(
            h.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert_eq!("abc".parse::<ContentHash>(), Err(ParseHashError::Length(3)));
        let bad = "z".repeat(64);
        assert!(matches!(bad.parse::<ContentHash>(), Err(ParseHashError::Hex(_))));
    }

    #[test]
    fn test_ordering_matches_hex() {
        let a = ContentHash::digest(b"a");
        let b = ContentHash::digest(b"b");
        assert_eq!(a.cmp(&b), a.to_hex().cmp(&b.to_hex()));
    }
}
