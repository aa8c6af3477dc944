//! Conceptual documents and their reconstruction recipes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::edge::Edge;
use super::hash::ContentHash;
use crate::canonical::Fingerprinter;

/// Prefix of generated document names.
pub const DOC_NAME_PREFIX: &str = "doc_";

/// A top-level fragment selected by the splicer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConceptualDocument {
    /// Stable name, `doc_1`, `doc_2`, ...
    pub name: String,
    /// Root fragment.
    pub root: ContentHash,
    /// Earliest ingestion of any file with this root.
    pub first_ingested_at: DateTime<Utc>,
}

impl ConceptualDocument {
    /// Name for the `n`th document (1-based).
    pub fn name_for(n: usize) -> String {
        format!("{DOC_NAME_PREFIX}{n}")
    }

    /// Numeric suffix of a `doc_N` name.
    pub fn ordinal(name: &str) -> Option<usize> {
        name.strip_prefix(DOC_NAME_PREFIX)?.parse().ok()
    }
}

/// Cached fragment closure and edge set of a document.
///
/// Computed once by the splicer so later analysis and export avoid walking
/// the graph again. `fingerprint` is an xxh64 over root, closure and edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconstructionRecipe {
    /// Owning document name.
    pub document: String,
    /// Root fragment.
    pub root: ContentHash,
    /// Every hash reachable from the root, including the root.
    pub closure: BTreeSet<ContentHash>,
    /// Every edge between closure members, canonically ordered.
    pub edges: Vec<Edge>,
    /// Deterministic fingerprint of the recipe content.
    pub fingerprint: String,
    /// When the recipe was computed.
    pub computed_at: DateTime<Utc>,
}

impl ReconstructionRecipe {
    /// Build a recipe; edges are sorted and the fingerprint computed.
    pub fn new(
        document: impl Into<String>,
        root: ContentHash,
        closure: BTreeSet<ContentHash>,
        mut edges: Vec<Edge>,
        computed_at: DateTime<Utc>,
    ) -> Self {
        edges.sort();
        edges.dedup();
        let fingerprint = Self::compute_fingerprint(&root, &closure, &edges);
        Self {
            document: document.into(),
            root,
            closure,
            edges,
            fingerprint,
            computed_at,
        }
    }

    fn compute_fingerprint(root: &ContentHash, closure: &BTreeSet<ContentHash>, edges: &[Edge]) -> String {
        let mut fp = Fingerprinter::new();
        fp.write(root.as_bytes());
        fp.write(&(closure.len() as u64).to_le_bytes());
        for hash in closure {
            fp.write(hash.as_bytes());
        }
        for edge in edges {
            fp.write(edge.parent.as_bytes());
            fp.write(edge.child.as_bytes());
            fp.write(&edge.position.to_le_bytes());
            fp.write(edge.discriminator.token().as_bytes());
        }
        fp.finish_hex()
    }

    /// Recompute the fingerprint and compare.
    pub fn verify(&self) -> bool {
        Self::compute_fingerprint(&self.root, &self.closure, &self.edges) == self.fingerprint
    }

    /// Number of fragments in the closure.
    pub fn len(&self) -> usize {
        self.closure.len()
    }

    /// Whether the closure is empty (never true for a computed recipe).
    pub fn is_empty(&self) -> bool {
        self.closure.is_empty()
    }

    /// Edges grouped by parent, each group in position order.
    pub fn children_by_parent(&self) -> BTreeMap<ContentHash, Vec<Edge>> {
        let mut map: BTreeMap<ContentHash, Vec<Edge>> = BTreeMap::new();
        for edge in &self.edges {
            map.entry(edge.parent).or_default().push(edge.clone());
        }
        map
    }
}

/// A document whose content only exists across several files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shredding {
    /// Paths of the fragment files that together cover the document.
    pub across: Vec<String>,
}

/// A persisted document together with its recipe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    /// Document identity.
    pub document: ConceptualDocument,
    /// Cached closure.
    pub recipe: ReconstructionRecipe,
    /// Shredding verdict at splice time.
    pub shredding: Option<Shredding>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names() {
        assert_eq!(ConceptualDocument::name_for(3), "doc_3");
        assert_eq!(ConceptualDocument::ordinal("doc_12"), Some(12));
        assert_eq!(ConceptualDocument::ordinal("report"), None);
    }

    #[test]
    fn test_recipe_fingerprint_is_stable() {
        let root = ContentHash::digest(b"root");
        let leaf = ContentHash::digest(b"leaf");
        let closure: BTreeSet<_> = [root, leaf].into_iter().collect();
        let edges = vec![Edge::keyed(root, leaf, "k", 0)];
        let a = ReconstructionRecipe::new("doc_1", root, closure.clone(), edges.clone(), Utc::now());
        let b = ReconstructionRecipe::new("doc_1", root, closure, edges, Utc::now());
        assert_eq!(a.fingerprint, b.fingerprint);
        assert!(a.verify());
        assert_eq!(a.children_by_parent()[&root].len(), 1);
    }

    #[test]
    fn test_tampered_recipe_fails_verification() {
        let root = ContentHash::digest(b"root");
        let mut recipe = ReconstructionRecipe::new("doc_1", root, [root].into_iter().collect(), vec![], Utc::now());
        recipe.closure.insert(ContentHash::digest(b"extra"));
        assert!(!recipe.verify());
    }
}
