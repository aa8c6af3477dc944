//! # kitsugi
//!
//! Content-addressable fragment graph for JSON.
//!
//! Every value in every ingested file, at every nesting depth, gets a
//! deterministic content hash. Containers are linked to their members by
//! edges, so identical fragments collapse into one node shared by all
//! their parents.
//!
//! ## Core Contract
//!
//! 1. Hash any value canonically: key order and numeric spelling never change a hash
//! 2. Rebuild any stored value from its hash
//! 3. Discover top-level documents and which files they were assembled from
//!
//! ## Architecture
//!
//! ```text
//! JSON files → Ingestor → GraphStore (SQLite or Memory)
//!                              ↓
//!        Reconstructor · Splicer · PathFinder · ProvenanceAnalyzer
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same value → same hash, across runs and backends
//! - Edge ordering is canonical (parent, position, child)
//! - Document names follow first ingestion time, ties broken by hash
//! - Equal-length paths are ordered by the concatenation of their segment tokens

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod canonical;
pub mod closure;
pub mod config;
pub mod error;
pub mod ingest;
pub mod path;
pub mod provenance;
pub mod reconstruct;
pub mod snapshot;
pub mod splice;
pub mod store;
pub mod types;

// Re-exports
pub use canonical::{fragment_tree, hash_value, FragmentTree, HASH_SCHEME_VERSION};
pub use closure::ClosureIndex;
pub use config::KitsugiConfig;
pub use error::{IntegrityViolation, KitsugiError, NotFound, Result, StoreError};
pub use ingest::{FileOutcome, IngestReport, Ingestor};
pub use path::{FragmentPath, PathFinder};
pub use provenance::{CoverageReport, CoverageRow, ProvenanceAnalyzer, SourceReport};
pub use reconstruct::Reconstructor;
pub use snapshot::GraphSnapshot;
pub use splice::{SpliceReport, Splicer};
pub use store::{GraphRequest, GraphResponse, GraphStore, InMemoryGraphStore, Mutation, WriteBatch};
#[cfg(feature = "sqlite")]
pub use store::SqliteGraphStore;
pub use types::{
    ContentHash, ConceptualDocument, Discriminator, DocumentRecord, Edge, FragmentNode, Location,
    ReconstructionRecipe, SourceFile, Value, ValueKind,
};
