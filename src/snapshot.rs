//! Graph snapshots.
//!
//! A snapshot folds every node hash and every edge, in canonical order, into
//! an xxh64 fingerprint. Two stores with the same content have the same
//! snapshot id regardless of ingestion order or backend.

use serde::Serialize;

use crate::canonical::{Fingerprinter, HASH_SCHEME_VERSION};
use crate::error::Result;
use crate::store::{GraphCounts, GraphStore};

/// Counts plus a content fingerprint of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GraphSnapshot {
    /// Table sizes.
    #[serde(flatten)]
    pub counts: GraphCounts,
    /// Roots (fragments with no parent).
    pub roots: u64,
    /// Fingerprint of nodes and edges.
    pub snapshot_id: String,
    /// Canonical byte format the hashes were computed with.
    pub hash_scheme: &'static str,
}

impl GraphSnapshot {
    /// Compute a snapshot of the store's current content.
    pub async fn compute<S: GraphStore + ?Sized>(store: &S) -> Result<Self> {
        let counts = store.counts().await?;
        let roots = store.get_roots().await?.len() as u64;

        let mut fp = Fingerprinter::new();
        fp.write(HASH_SCHEME_VERSION.as_bytes());
        let hashes = store.list_node_hashes().await?;
        fp.write(&(hashes.len() as u64).to_le_bytes());
        for hash in &hashes {
            fp.write(hash.as_bytes());
        }
        let edges = store.list_edges().await?;
        fp.write(&(edges.len() as u64).to_le_bytes());
        for edge in &edges {
            fp.write(edge.parent.as_bytes());
            fp.write(&edge.position.to_le_bytes());
            fp.write(edge.child.as_bytes());
            fp.write(edge.discriminator.token().as_bytes());
        }

        Ok(Self {
            counts,
            roots,
            snapshot_id: fp.finish_hex(),
            hash_scheme: HASH_SCHEME_VERSION,
        })
    }
}
