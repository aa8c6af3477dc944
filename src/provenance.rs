//! Source attribution and coverage.
//!
//! Both analyses compare fragment closures: a document's closure against the
//! closure of every ingested file's root. A file contributes to a document
//! when the two closures intersect.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::closure::{Closure, ClosureIndex};
use crate::error::{KitsugiError, NotFound, Result};
use crate::store::GraphStore;
use crate::types::{ContentHash, SourceFile};

/// What a provenance query was resolved to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Target {
    /// A spliced document.
    Document(String),
    /// Any stored fragment.
    Hash(ContentHash),
    /// An ingested source path.
    Source(String),
}

/// A file contributing to a closure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceContribution {
    /// Source path.
    pub path: String,
    /// Root hash of the file.
    pub root_hash: ContentHash,
    /// Hashes shared with the target closure.
    pub shared: usize,
    /// First ingestion of the file.
    pub first_ingested_at: DateTime<Utc>,
}

/// Result of `find_sources`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceReport {
    /// Resolved target.
    pub target: Target,
    /// Root of the analysed closure.
    pub root: ContentHash,
    /// Size of the analysed closure.
    pub fragments: usize,
    /// Contributing files, by shared count descending then ingestion order.
    pub sources: Vec<SourceContribution>,
}

/// One row of a coverage report.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageRow {
    /// Source path.
    pub source_fragment: String,
    /// Root hash of the file.
    pub root_hash: ContentHash,
    /// |file ∩ document|.
    pub shared_hashes: usize,
    /// |file Δ document|.
    pub different_hashes_xor: usize,
    /// shared / |document|.
    pub coverage: f64,
}

/// Coverage of one document by the ingested files.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CoverageReport {
    /// Document name.
    pub document: String,
    /// Document root.
    pub root: ContentHash,
    /// Size of the document closure.
    pub fragments: usize,
    /// Per-file rows, best coverage first.
    pub rows: Vec<CoverageRow>,
    /// |union of file closures ∩ document| / |document|.
    pub total_coverage: f64,
    /// Document hashes present in no file's closure.
    pub uncovered: Vec<ContentHash>,
}

const CSV_HEADER: &str = "source_fragment,root_hash,shared_hashes,different_hashes_xor,coverage";

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

impl CoverageReport {
    /// Whether every fragment is explained by some file.
    pub fn is_complete(&self) -> bool {
        self.uncovered.is_empty()
    }

    /// Render rows as CSV, header first.
    pub fn to_csv(&self) -> String {
        let mut out = String::from(CSV_HEADER);
        out.push('\n');
        for row in &self.rows {
            // Writing to a String cannot fail.
            let _ = writeln!(
                out,
                "{},{},{},{},{:.6}",
                csv_field(&row.source_fragment),
                row.root_hash,
                row.shared_hashes,
                row.different_hashes_xor,
                row.coverage
            );
        }
        out
    }
}

fn fraction(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

/// Answers "where did this come from" questions.
pub struct ProvenanceAnalyzer<S: GraphStore> {
    closures: Arc<ClosureIndex<S>>,
}

impl<S: GraphStore> ProvenanceAnalyzer<S> {
    /// Create an analyzer sharing a closure index.
    pub fn new(closures: Arc<ClosureIndex<S>>) -> Self {
        Self { closures }
    }

    /// Resolve a target: document name, then 64-hex hash, then source path.
    pub async fn resolve(&self, target: &str) -> Result<(Target, ContentHash, Closure)> {
        let store = self.closures.store();

        if let Some(record) = store.get_document(target).await? {
            let closure = Arc::new(record.recipe.closure);
            return Ok((Target::Document(target.to_string()), record.document.root, closure));
        }

        if let Ok(hash) = target.parse::<ContentHash>() {
            let closure = self.closures.closure(&hash).await?;
            return Ok((Target::Hash(hash), hash, closure));
        }

        let sources = store.list_sources().await?;
        if let Some(source) = sources.iter().find(|s| s.path == target) {
            let closure = self.closures.closure(&source.root_hash).await?;
            return Ok((Target::Source(source.path.clone()), source.root_hash, closure));
        }

        Err(KitsugiError::NotFound(NotFound::Source(target.to_string())))
    }

    /// Files whose root closure intersects the target's closure.
    pub async fn find_sources(&self, target: &str) -> Result<SourceReport> {
        let (target, root, closure) = self.resolve(target).await?;
        let sources = self.closures.store().list_sources().await?;

        let mut contributions = Vec::new();
        for source in sources {
            let file = self.closures.closure(&source.root_hash).await?;
            let shared = file.intersection(&closure).count();
            if shared > 0 {
                contributions.push(SourceContribution {
                    path: source.path,
                    root_hash: source.root_hash,
                    shared,
                    first_ingested_at: source.first_ingested_at,
                });
            }
        }
        // Stable sort keeps ingestion order among ties.
        contributions.sort_by(|a, b| b.shared.cmp(&a.shared));

        tracing::debug!(root = %root.short(), sources = contributions.len(), "Sources found");
        Ok(SourceReport {
            target,
            root,
            fragments: closure.len(),
            sources: contributions,
        })
    }

    /// Files whose root closure contains `hash`, in ingestion order.
    pub async fn sources_containing(&self, hash: &ContentHash) -> Result<Vec<SourceFile>> {
        let store = self.closures.store();
        if store.get_node(hash).await?.is_none() {
            return Err(KitsugiError::NotFound(NotFound::Hash(*hash)));
        }
        Ok(store.get_sources_for_hash(hash).await?)
    }

    /// Coverage of a spliced document by every ingested file.
    pub async fn coverage(&self, document: &str) -> Result<CoverageReport> {
        let store = self.closures.store();
        let record = store
            .get_document(document)
            .await?
            .ok_or_else(|| KitsugiError::NotFound(NotFound::Document(document.to_string())))?;
        let doc = &record.recipe.closure;

        let mut rows = Vec::new();
        let mut covered: BTreeSet<ContentHash> = BTreeSet::new();
        for source in store.list_sources().await? {
            let file = self.closures.closure(&source.root_hash).await?;
            let shared: Vec<ContentHash> = file.intersection(doc).copied().collect();
            if shared.is_empty() {
                continue;
            }
            let xor = file.symmetric_difference(doc).count();
            rows.push(CoverageRow {
                source_fragment: source.path,
                root_hash: source.root_hash,
                shared_hashes: shared.len(),
                different_hashes_xor: xor,
                coverage: fraction(shared.len(), doc.len()),
            });
            covered.extend(shared);
        }
        rows.sort_by(|a, b| {
            b.shared_hashes
                .cmp(&a.shared_hashes)
                .then_with(|| a.different_hashes_xor.cmp(&b.different_hashes_xor))
        });

        let uncovered: Vec<ContentHash> = doc.difference(&covered).copied().collect();
        let report = CoverageReport {
            document: document.to_string(),
            root: record.document.root,
            fragments: doc.len(),
            total_coverage: fraction(covered.len(), doc.len()),
            rows,
            uncovered,
        };

        tracing::info!(
            document = %document,
            sources = report.rows.len(),
            total_coverage = report.total_coverage,
            uncovered = report.uncovered.len(),
            "Coverage computed"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_field("plain.json"), "plain.json");
        assert_eq!(csv_field("a,b.json"), "\"a,b.json\"");
        assert_eq!(csv_field("say \"hi\""), "\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_csv_rendering() {
        let root = ContentHash::digest(b"r");
        let report = CoverageReport {
            document: "doc_1".into(),
            root,
            fragments: 4,
            rows: vec![CoverageRow {
                source_fragment: "data/x.json".into(),
                root_hash: root,
                shared_hashes: 4,
                different_hashes_xor: 0,
                coverage: 1.0,
            }],
            total_coverage: 1.0,
            uncovered: vec![],
        };
        let csv = report.to_csv();
        let lines: Vec<_> = csv.lines().collect();
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines[1], format!("data/x.json,{root},4,0,1.000000"));
        assert!(report.is_complete());
    }

    #[test]
    fn test_fraction_of_empty() {
        assert_eq!(fraction(0, 0), 0.0);
        assert_eq!(fraction(1, 4), 0.25);
    }
}
