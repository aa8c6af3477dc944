//! Source files and fragment locations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use super::hash::ContentHash;

/// One ingested input file.
///
/// Keyed by path. Re-ingesting unchanged content refreshes `ingested_at`
/// only; changed content replaces the root and restarts the entry's
/// ingestion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFile {
    /// Path as given to the ingestor.
    pub path: String,
    /// Hash of the file's top-level value.
    pub root_hash: ContentHash,
    /// When this (path, root) pair was first ingested.
    pub first_ingested_at: DateTime<Utc>,
    /// Most recent ingestion.
    pub ingested_at: DateTime<Utc>,
    /// Monotonic insertion sequence, breaks timestamp ties.
    pub sequence: u64,
}

impl SourceFile {
    /// Compare by ingestion order: first ingestion time, then sequence.
    pub fn ingestion_cmp(&self, other: &SourceFile) -> Ordering {
        self.first_ingested_at
            .cmp(&other.first_ingested_at)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

/// Where a fragment occurs inside an ingested file.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    /// Source file path.
    pub path: String,
    /// jq-style path inside the file (`.` is the root).
    pub json_path: String,
}

impl Location {
    /// Create a new location.
    pub fn new(path: impl Into<String>, json_path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            json_path: json_path.into(),
        }
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.path, self.json_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn source(seq: u64, secs: i64) -> SourceFile {
        let at = Utc.timestamp_opt(secs, 0).unwrap();
        SourceFile {
            path: format!("f{seq}.json"),
            root_hash: ContentHash::digest(&seq.to_le_bytes()),
            first_ingested_at: at,
            ingested_at: at,
            sequence: seq,
        }
    }

    #[test]
    fn test_ingestion_order() {
        assert_eq!(source(2, 10).ingestion_cmp(&source(1, 20)), Ordering::Less);
        assert_eq!(source(1, 10).ingestion_cmp(&source(2, 10)), Ordering::Less);
    }

    #[test]
    fn test_location_display() {
        assert_eq!(Location::new("a.json", ".x[0]").to_string(), "a.json:.x[0]");
    }
}
