//! Document discovery.
//!
//! A conceptual document is a hash that no edge points to and that was the
//! root of at least one ingested file. Documents are named `doc_1`, `doc_2`,
//! ... by first ingestion time, ties broken by the smaller hash. Each splice
//! recomputes every recipe and replaces the stored set.
//!
//! ## Shredding
//!
//! The body of a document is its closure without its own root. A source file
//! whose root lies in the body is a fragment file. The document is shredded
//! when it has at least two maximal fragment files (roots not contained in
//! another fragment file's closure), none of them covers the body alone, and
//! together they cover all of it.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;

use crate::closure::ClosureIndex;
use crate::error::Result;
use crate::store::GraphStore;
use crate::types::{
    ConceptualDocument, ContentHash, DocumentRecord, ReconstructionRecipe, Shredding, SourceFile,
};

/// One discovered document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    /// Assigned name.
    pub name: String,
    /// Root fragment.
    pub root: ContentHash,
    /// Closure size.
    pub fragments: usize,
    /// Earliest ingestion of the root.
    pub first_ingested_at: DateTime<Utc>,
    /// Recipe fingerprint.
    pub fingerprint: String,
    /// Files the document is shredded across, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shredded_across: Option<Vec<String>>,
}

/// Result of a splice run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SpliceReport {
    /// Documents by ordinal.
    pub documents: Vec<DocumentSummary>,
}

impl SpliceReport {
    /// Documents found shredded.
    pub fn shredded(&self) -> impl Iterator<Item = &DocumentSummary> {
        self.documents.iter().filter(|d| d.shredded_across.is_some())
    }
}

/// Discovers conceptual documents and persists their recipes.
pub struct Splicer<S: GraphStore> {
    closures: Arc<ClosureIndex<S>>,
}

impl<S: GraphStore> Splicer<S> {
    /// Create a splicer sharing a closure index.
    pub fn new(closures: Arc<ClosureIndex<S>>) -> Self {
        Self { closures }
    }

    /// Discover documents, compute recipes and replace the stored set.
    pub async fn splice(&self) -> Result<SpliceReport> {
        let store = self.closures.store();
        let sources = store.list_sources().await?;
        let roots: BTreeSet<ContentHash> = store.get_roots().await?.into_iter().collect();

        let candidates = candidates(&roots, &sources);
        tracing::debug!(roots = roots.len(), sources = sources.len(), candidates = candidates.len(), "Splice candidates");

        let computed_at = Utc::now().trunc_subsecs(6);
        let mut records = Vec::with_capacity(candidates.len());
        let mut report = SpliceReport::default();

        for (i, (root, first_ingested_at)) in candidates.into_iter().enumerate() {
            let name = ConceptualDocument::name_for(i + 1);
            let (closure, edges) = self.closures.closure_with_edges(&root).await?;
            let shredding = self.detect_shredding(&root, &closure, &sources).await?;
            let recipe = ReconstructionRecipe::new(name.clone(), root, closure, edges, computed_at);

            if let Some(s) = &shredding {
                tracing::info!(document = %name, across = ?s.across, "Document is shredded");
            }

            report.documents.push(DocumentSummary {
                name: name.clone(),
                root,
                fragments: recipe.len(),
                first_ingested_at,
                fingerprint: recipe.fingerprint.clone(),
                shredded_across: shredding.as_ref().map(|s| s.across.clone()),
            });
            records.push(DocumentRecord {
                document: ConceptualDocument {
                    name,
                    root,
                    first_ingested_at,
                },
                recipe,
                shredding,
            });
        }

        store.replace_documents(records).await?;
        tracing::info!(
            documents = report.documents.len(),
            shredded = report.shredded().count(),
            "Splice complete"
        );
        Ok(report)
    }

    async fn detect_shredding(
        &self,
        root: &ContentHash,
        closure: &BTreeSet<ContentHash>,
        sources: &[SourceFile],
    ) -> Result<Option<Shredding>> {
        let mut body = closure.clone();
        body.remove(root);

        // Fragment roots in first-ingestion order.
        let mut fragment_roots: Vec<ContentHash> = Vec::new();
        for source in sources {
            if body.contains(&source.root_hash) && !fragment_roots.contains(&source.root_hash) {
                fragment_roots.push(source.root_hash);
            }
        }
        if fragment_roots.len() < 2 {
            return Ok(None);
        }

        let mut fragment_closures = BTreeMap::new();
        for hash in &fragment_roots {
            let fragment = self.closures.closure(hash).await?;
            if fragment.is_superset(&body) {
                return Ok(None);
            }
            fragment_closures.insert(*hash, fragment);
        }

        let maximal: Vec<ContentHash> = fragment_roots
            .iter()
            .copied()
            .filter(|hash| {
                !fragment_closures
                    .iter()
                    .any(|(other, fragment)| other != hash && fragment.contains(hash))
            })
            .collect();
        if maximal.len() < 2 {
            return Ok(None);
        }

        let mut union = BTreeSet::new();
        for hash in &maximal {
            if let Some(fragment) = fragment_closures.get(hash) {
                union.extend(fragment.iter().copied());
            }
        }
        if union != body {
            return Ok(None);
        }

        let across = sources
            .iter()
            .filter(|s| maximal.contains(&s.root_hash))
            .map(|s| s.path.clone())
            .collect();
        Ok(Some(Shredding { across }))
    }
}

/// Root hashes that some file was ingested as, with their earliest ingestion,
/// ordered by (time, hash).
fn candidates(roots: &BTreeSet<ContentHash>, sources: &[SourceFile]) -> Vec<(ContentHash, DateTime<Utc>)> {
    let mut earliest: BTreeMap<ContentHash, DateTime<Utc>> = BTreeMap::new();
    for source in sources.iter().filter(|s| roots.contains(&s.root_hash)) {
        earliest
            .entry(source.root_hash)
            .and_modify(|at| *at = (*at).min(source.first_ingested_at))
            .or_insert(source.first_ingested_at);
    }
    let mut ordered: Vec<_> = earliest.into_iter().collect();
    ordered.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
    ordered
}
