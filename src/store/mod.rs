//! Graph storage backends.
//!
//! A backend answers a closed set of declarative requests. Each request kind
//! is one [`GraphRequest`] variant; backends dispatch with an exhaustive
//! `match`, and every request is handled atomically against the underlying
//! store. The typed helpers on [`GraphStore`] wrap `execute` for callers.
//!
//! ## Mutation Contract
//!
//! - Node and edge inserts are insert-if-absent. Re-inserting identical
//!   content is a no-op.
//! - Inserting a node whose hash is stored with different content, or an
//!   edge whose (parent, position) slot holds a different child, fails the
//!   whole batch with [`StoreError::Integrity`]. Nothing is overwritten.
//! - A [`WriteBatch`] lands completely or not at all.

pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{IntegrityViolation, StoreError};
use crate::types::{ContentHash, DocumentRecord, Edge, FragmentNode, Location, SourceFile};

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    /// Insert a node if absent.
    InsertNode(FragmentNode),
    /// Insert an edge if absent.
    InsertEdge(Edge),
    /// Create or refresh the source entry for `path`.
    RecordSource {
        /// Input file path.
        path: String,
        /// Hash of the file's top-level value.
        root: ContentHash,
        /// Ingestion time.
        at: DateTime<Utc>,
    },
    /// Record that `hash` occurs at `location`.
    RecordLocation(ContentHash, Location),
}

/// Mutations applied as one atomic unit, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteBatch {
    /// Ordered mutations.
    pub mutations: Vec<Mutation>,
}

impl WriteBatch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a mutation.
    pub fn push(&mut self, mutation: Mutation) {
        self.mutations.push(mutation);
    }

    /// Number of mutations.
    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    /// Whether the batch is empty.
    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

impl From<Vec<Mutation>> for WriteBatch {
    fn from(mutations: Vec<Mutation>) -> Self {
        Self { mutations }
    }
}

/// What happened to a source entry during a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceChange {
    /// First ingestion of this path.
    Created,
    /// Same content again; only the timestamp moved.
    Refreshed,
    /// The path now holds different content.
    Replaced {
        /// Root hash before this batch.
        previous: ContentHash,
    },
}

/// Result of applying a batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOutcome {
    /// Nodes that were not already stored.
    pub nodes_inserted: usize,
    /// Edges that were not already stored.
    pub edges_inserted: usize,
    /// New location rows.
    pub locations_recorded: usize,
    /// Source entry change, if the batch recorded one.
    pub source: Option<SourceChange>,
}

/// Table sizes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphCounts {
    /// Stored nodes.
    pub nodes: u64,
    /// Stored edges.
    pub edges: u64,
    /// Ingested source files.
    pub sources: u64,
    /// Spliced documents.
    pub documents: u64,
}

/// The closed set of repository requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphRequest {
    /// Apply mutations atomically.
    Apply(WriteBatch),
    /// Insert one node if absent.
    InsertNode(FragmentNode),
    /// Insert one edge if absent.
    InsertEdge(Edge),
    /// Fetch a node.
    GetNode(ContentHash),
    /// Outgoing edges, ordered by position.
    GetChildren(ContentHash),
    /// Distinct parent hashes.
    GetParents(ContentHash),
    /// Hashes with no parent edge.
    GetRoots,
    /// Sources whose root closure contains the hash, in ingestion order.
    GetSourcesForHash(ContentHash),
    /// Every source, in ingestion order.
    ListSources,
    /// Occurrences of a hash in ingested files.
    GetLocations(ContentHash),
    /// Scalars whose literal contains `needle`.
    SearchLiterals {
        /// Substring to find.
        needle: String,
        /// Maximum matches.
        limit: usize,
    },
    /// Replace every document and recipe.
    ReplaceDocuments(Vec<DocumentRecord>),
    /// Fetch a document by name.
    GetDocument(String),
    /// Every document, by ordinal.
    ListDocuments,
    /// Every node hash, sorted.
    ListNodeHashes,
    /// Every edge, canonically ordered.
    ListEdges,
    /// Table sizes.
    Counts,
}

impl GraphRequest {
    /// Short request name for logs and errors.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Apply(_) => "APPLY",
            Self::InsertNode(_) => "INSERT_NODE",
            Self::InsertEdge(_) => "INSERT_EDGE",
            Self::GetNode(_) => "GET_NODE",
            Self::GetChildren(_) => "GET_CHILDREN",
            Self::GetParents(_) => "GET_PARENTS",
            Self::GetRoots => "GET_ROOTS",
            Self::GetSourcesForHash(_) => "GET_SOURCES_FOR_HASH",
            Self::ListSources => "LIST_SOURCES",
            Self::GetLocations(_) => "GET_LOCATIONS",
            Self::SearchLiterals { .. } => "SEARCH_LITERALS",
            Self::ReplaceDocuments(_) => "REPLACE_DOCUMENTS",
            Self::GetDocument(_) => "GET_DOCUMENT",
            Self::ListDocuments => "LIST_DOCUMENTS",
            Self::ListNodeHashes => "LIST_NODE_HASHES",
            Self::ListEdges => "LIST_EDGES",
            Self::Counts => "COUNTS",
        }
    }
}

/// Repository answers, one shape per request family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphResponse {
    /// Batch result (`Apply`, `InsertNode`, `InsertEdge`).
    Applied(BatchOutcome),
    /// `GetNode`.
    Node(Option<FragmentNode>),
    /// `GetChildren`, `ListEdges`.
    Edges(Vec<Edge>),
    /// `GetParents`, `GetRoots`, `ListNodeHashes` (sorted).
    Hashes(Vec<ContentHash>),
    /// `GetSourcesForHash`, `ListSources`.
    Sources(Vec<SourceFile>),
    /// `GetLocations`.
    Locations(Vec<Location>),
    /// `SearchLiterals`.
    Nodes(Vec<FragmentNode>),
    /// `GetDocument`.
    Document(Option<DocumentRecord>),
    /// `ListDocuments`.
    Documents(Vec<DocumentRecord>),
    /// `Counts`.
    Counts(GraphCounts),
    /// `ReplaceDocuments`.
    Done,
}

impl GraphResponse {
    fn kind(&self) -> &'static str {
        match self {
            Self::Applied(_) => "Applied",
            Self::Node(_) => "Node",
            Self::Edges(_) => "Edges",
            Self::Hashes(_) => "Hashes",
            Self::Sources(_) => "Sources",
            Self::Locations(_) => "Locations",
            Self::Nodes(_) => "Nodes",
            Self::Document(_) => "Document",
            Self::Documents(_) => "Documents",
            Self::Counts(_) => "Counts",
            Self::Done => "Done",
        }
    }
}

pub(crate) fn describe_node(node: &FragmentNode) -> String {
    match &node.literal {
        Some(literal) => format!("{} {}", node.kind, literal),
        None => node.kind.to_string(),
    }
}

/// Conflict between a stored node and an incoming one with the same hash.
pub(crate) fn node_conflict(stored: &FragmentNode, incoming: &FragmentNode) -> IntegrityViolation {
    IntegrityViolation {
        hash: incoming.hash,
        stored: describe_node(stored),
        incoming: describe_node(incoming),
    }
}

/// Conflict between two edges occupying the same (parent, position) slot.
pub(crate) fn edge_conflict(stored: &Edge, incoming: &Edge) -> IntegrityViolation {
    IntegrityViolation {
        hash: incoming.parent,
        stored: format!("slot {} -> {} via {}", stored.position, stored.child, stored.discriminator),
        incoming: format!("slot {} -> {} via {}", incoming.position, incoming.child, incoming.discriminator),
    }
}

/// Whether two edges for the same slot agree.
pub(crate) fn same_edge(a: &Edge, b: &Edge) -> bool {
    a.child == b.child && a.discriminator == b.discriminator
}

fn mismatch(request: &'static str, response: &GraphResponse) -> StoreError {
    StoreError::UnexpectedResponse {
        request,
        response: response.kind(),
    }
}

macro_rules! expect_response {
    ($self:ident, $request:expr, $variant:ident) => {{
        let request = $request;
        let name = request.name();
        match $self.execute(request).await? {
            GraphResponse::$variant(inner) => Ok(inner),
            other => Err(mismatch(name, &other)),
        }
    }};
}

/// Trait for graph storage backends.
///
/// Implementations must guarantee deterministic ordering of results.
/// All methods are async to support async database access.
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Handle one request atomically.
    async fn execute(&self, request: GraphRequest) -> Result<GraphResponse, StoreError>;

    /// Apply a batch atomically.
    async fn apply(&self, batch: WriteBatch) -> Result<BatchOutcome, StoreError> {
        expect_response!(self, GraphRequest::Apply(batch), Applied)
    }

    /// Insert one node if absent.
    async fn insert_node(&self, node: FragmentNode) -> Result<BatchOutcome, StoreError> {
        expect_response!(self, GraphRequest::InsertNode(node), Applied)
    }

    /// Insert one edge if absent.
    async fn insert_edge(&self, edge: Edge) -> Result<BatchOutcome, StoreError> {
        expect_response!(self, GraphRequest::InsertEdge(edge), Applied)
    }

    /// Fetch a node by hash.
    async fn get_node(&self, hash: &ContentHash) -> Result<Option<FragmentNode>, StoreError> {
        expect_response!(self, GraphRequest::GetNode(*hash), Node)
    }

    /// Fetch outgoing edges, ordered by position.
    async fn get_children(&self, hash: &ContentHash) -> Result<Vec<Edge>, StoreError> {
        expect_response!(self, GraphRequest::GetChildren(*hash), Edges)
    }

    /// Fetch distinct parent hashes.
    async fn get_parents(&self, hash: &ContentHash) -> Result<BTreeSet<ContentHash>, StoreError> {
        let hashes = expect_response!(self, GraphRequest::GetParents(*hash), Hashes)?;
        Ok(hashes.into_iter().collect())
    }

    /// Fetch hashes with no parent edge, sorted.
    async fn get_roots(&self) -> Result<Vec<ContentHash>, StoreError> {
        expect_response!(self, GraphRequest::GetRoots, Hashes)
    }

    /// Fetch sources whose root closure contains `hash`, in ingestion order.
    async fn get_sources_for_hash(&self, hash: &ContentHash) -> Result<Vec<SourceFile>, StoreError> {
        expect_response!(self, GraphRequest::GetSourcesForHash(*hash), Sources)
    }

    /// Fetch every source, in ingestion order.
    async fn list_sources(&self) -> Result<Vec<SourceFile>, StoreError> {
        expect_response!(self, GraphRequest::ListSources, Sources)
    }

    /// Fetch the occurrences of a hash, ordered by (path, json_path).
    async fn get_locations(&self, hash: &ContentHash) -> Result<Vec<Location>, StoreError> {
        expect_response!(self, GraphRequest::GetLocations(*hash), Locations)
    }

    /// Find scalars whose literal contains `needle`, ordered by hash.
    async fn search_literals(&self, needle: &str, limit: usize) -> Result<Vec<FragmentNode>, StoreError> {
        expect_response!(
            self,
            GraphRequest::SearchLiterals {
                needle: needle.to_string(),
                limit,
            },
            Nodes
        )
    }

    /// Replace all documents and their recipes.
    async fn replace_documents(&self, records: Vec<DocumentRecord>) -> Result<(), StoreError> {
        let request = GraphRequest::ReplaceDocuments(records);
        let name = request.name();
        match self.execute(request).await? {
            GraphResponse::Done => Ok(()),
            other => Err(mismatch(name, &other)),
        }
    }

    /// Fetch a document by name.
    async fn get_document(&self, name: &str) -> Result<Option<DocumentRecord>, StoreError> {
        expect_response!(self, GraphRequest::GetDocument(name.to_string()), Document)
    }

    /// Fetch every document, by ordinal.
    async fn list_documents(&self) -> Result<Vec<DocumentRecord>, StoreError> {
        expect_response!(self, GraphRequest::ListDocuments, Documents)
    }

    /// Fetch every node hash, sorted.
    async fn list_node_hashes(&self) -> Result<Vec<ContentHash>, StoreError> {
        expect_response!(self, GraphRequest::ListNodeHashes, Hashes)
    }

    /// Fetch every edge, canonically ordered.
    async fn list_edges(&self) -> Result<Vec<Edge>, StoreError> {
        expect_response!(self, GraphRequest::ListEdges, Edges)
    }

    /// Fetch table sizes.
    async fn counts(&self) -> Result<GraphCounts, StoreError> {
        expect_response!(self, GraphRequest::Counts, Counts)
    }
}

pub use memory::InMemoryGraphStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteGraphStore;
