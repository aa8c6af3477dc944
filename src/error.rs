//! Error taxonomy.
//!
//! Every failure the kernel can report is one of five kinds, and callers can
//! tell them apart by matching on [`KitsugiError`]:
//!
//! | Kind | Meaning | Fatal |
//! |------|---------|-------|
//! | `MalformedInput` | A file could not be parsed into a value | No, other files continue |
//! | `IntegrityViolation` | A stored hash maps to different content | Yes |
//! | `NotFound` | Unknown hash, document or source | No |
//! | `Unreachable` | No structural path between two hashes | No, negative result |
//! | `Storage` | Backend I/O failure, propagated unchanged | Caller decides |

use std::fmt;

use crate::types::ContentHash;

/// A hash already stored with different content than the incoming record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("integrity violation at {hash}: stored {stored}, incoming {incoming}")]
pub struct IntegrityViolation {
    /// The conflicting hash.
    pub hash: ContentHash,
    /// Description of the stored record.
    pub stored: String,
    /// Description of the incoming record.
    pub incoming: String,
}

/// Error type returned by graph store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Content conflict detected while applying a batch.
    #[error(transparent)]
    Integrity(#[from] IntegrityViolation),
    /// Backend failure.
    #[error("storage error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    /// A backend answered a request with the wrong response shape.
    #[error("backend answered {request} with {response}")]
    UnexpectedResponse {
        /// Request name.
        request: &'static str,
        /// Response variant.
        response: &'static str,
    },
}

impl StoreError {
    /// Wrap any backend error.
    pub fn backend<E: std::error::Error + Send + Sync + 'static>(e: E) -> Self {
        Self::Backend(Box::new(e))
    }
}

#[cfg(feature = "sqlite")]
impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        Self::backend(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        Self::backend(e)
    }
}

/// What a lookup failed to find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFound {
    /// Hash absent from the graph.
    Hash(ContentHash),
    /// No conceptual document by that name.
    Document(String),
    /// No ingested source matches.
    Source(String),
}

impl fmt::Display for NotFound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Hash(h) => write!(f, "hash {h}"),
            Self::Document(name) => write!(f, "document '{name}' (run splice first)"),
            Self::Source(s) => write!(f, "source '{s}'"),
        }
    }
}

/// Error type for kernel operations.
#[derive(Debug, thiserror::Error)]
pub enum KitsugiError {
    /// Input rejected before hashing.
    #[error("malformed input {path}: {reason}")]
    MalformedInput {
        /// Offending file.
        path: String,
        /// Parser message.
        reason: String,
    },
    /// Hash-space corruption or an algorithm bug.
    #[error(transparent)]
    IntegrityViolation(IntegrityViolation),
    /// Unknown hash, document or source.
    #[error("not found: {0}")]
    NotFound(NotFound),
    /// `child` is not a descendant of `parent`.
    #[error("no path from {parent} to {child}")]
    Unreachable {
        /// Search start.
        parent: ContentHash,
        /// Search target.
        child: ContentHash,
    },
    /// Backend failure, propagated unchanged.
    #[error("storage error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl KitsugiError {
    /// Whether this error must abort the whole run.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::IntegrityViolation(_) | Self::Storage(_))
    }

    /// Build an integrity violation.
    pub fn integrity(hash: ContentHash, stored: impl Into<String>, incoming: impl Into<String>) -> Self {
        Self::IntegrityViolation(IntegrityViolation {
            hash,
            stored: stored.into(),
            incoming: incoming.into(),
        })
    }
}

impl From<StoreError> for KitsugiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Integrity(v) => Self::IntegrityViolation(v),
            StoreError::Backend(inner) => Self::Storage(inner),
            other @ StoreError::UnexpectedResponse { .. } => Self::Storage(Box::new(other)),
        }
    }
}

impl From<IntegrityViolation> for KitsugiError {
    fn from(v: IntegrityViolation) -> Self {
        Self::IntegrityViolation(v)
    }
}

/// Result alias for kernel operations.
pub type Result<T, E = KitsugiError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_error_lifts_integrity() {
        let v = IntegrityViolation {
            hash: ContentHash::digest(b"h"),
            stored: "scalar 1".into(),
            incoming: "scalar 2".into(),
        };
        let err: KitsugiError = StoreError::from(v.clone()).into();
        assert!(matches!(err, KitsugiError::IntegrityViolation(ref got) if *got == v));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_not_found_is_not_fatal() {
        let err = KitsugiError::NotFound(NotFound::Document("doc_9".into()));
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("doc_9"));
    }
}
