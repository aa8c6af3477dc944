//! In-memory graph store for testing.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use super::{
    edge_conflict, node_conflict, same_edge, BatchOutcome, GraphCounts, GraphRequest, GraphResponse, GraphStore,
    Mutation, SourceChange, WriteBatch,
};
use crate::error::StoreError;
use crate::types::{ContentHash, DocumentRecord, Edge, FragmentNode, Location, SourceFile};

#[derive(Debug, Default)]
struct GraphState {
    /// Nodes by hash.
    nodes: BTreeMap<ContentHash, FragmentNode>,
    /// Parent -> position -> edge.
    children: BTreeMap<ContentHash, BTreeMap<u32, Edge>>,
    /// Child -> parents mapping.
    parents: BTreeMap<ContentHash, BTreeSet<ContentHash>>,
    edge_count: usize,
    /// Sources by path.
    sources: BTreeMap<String, SourceFile>,
    next_sequence: u64,
    locations: BTreeMap<ContentHash, BTreeSet<Location>>,
    /// Documents in ordinal order.
    documents: Vec<DocumentRecord>,
}

impl GraphState {
    fn edge_at(&self, parent: &ContentHash, position: u32) -> Option<&Edge> {
        self.children.get(parent)?.get(&position)
    }

    /// Check every mutation against stored and batch-local content.
    fn validate(&self, batch: &WriteBatch) -> Result<(), StoreError> {
        let mut staged_nodes: BTreeMap<ContentHash, &FragmentNode> = BTreeMap::new();
        let mut staged_edges: BTreeMap<(ContentHash, u32), &Edge> = BTreeMap::new();

        for mutation in &batch.mutations {
            match mutation {
                Mutation::InsertNode(node) => {
                    let existing = self.nodes.get(&node.hash).or_else(|| staged_nodes.get(&node.hash).copied());
                    match existing {
                        Some(stored) if !stored.same_content(node) => {
                            return Err(node_conflict(stored, node).into());
                        }
                        Some(_) => {}
                        None => {
                            staged_nodes.insert(node.hash, node);
                        }
                    }
                }
                Mutation::InsertEdge(edge) => {
                    let slot = (edge.parent, edge.position);
                    let existing = self
                        .edge_at(&edge.parent, edge.position)
                        .or_else(|| staged_edges.get(&slot).copied());
                    match existing {
                        Some(stored) if !same_edge(stored, edge) => {
                            return Err(edge_conflict(stored, edge).into());
                        }
                        Some(_) => {}
                        None => {
                            staged_edges.insert(slot, edge);
                        }
                    }
                }
                Mutation::RecordSource { .. } | Mutation::RecordLocation(..) => {}
            }
        }
        Ok(())
    }

    fn insert_node(&mut self, node: &FragmentNode) -> bool {
        if self.nodes.contains_key(&node.hash) {
            return false;
        }
        self.nodes.insert(node.hash, node.clone());
        true
    }

    fn insert_edge(&mut self, edge: &Edge) -> bool {
        let slots = self.children.entry(edge.parent).or_default();
        if slots.contains_key(&edge.position) {
            return false;
        }
        slots.insert(edge.position, edge.clone());
        self.parents.entry(edge.child).or_default().insert(edge.parent);
        self.edge_count += 1;
        true
    }

    fn record_source(&mut self, path: &str, root: ContentHash, at: DateTime<Utc>) -> SourceChange {
        let sequence = self.next_sequence;
        match self.sources.get_mut(path) {
            Some(existing) if existing.root_hash == root => {
                existing.ingested_at = at;
                SourceChange::Refreshed
            }
            Some(existing) => {
                let previous = existing.root_hash;
                *existing = SourceFile {
                    path: path.to_string(),
                    root_hash: root,
                    first_ingested_at: at,
                    ingested_at: at,
                    sequence,
                };
                self.next_sequence += 1;
                self.drop_locations_for(path);
                SourceChange::Replaced { previous }
            }
            None => {
                self.sources.insert(
                    path.to_string(),
                    SourceFile {
                        path: path.to_string(),
                        root_hash: root,
                        first_ingested_at: at,
                        ingested_at: at,
                        sequence,
                    },
                );
                self.next_sequence += 1;
                SourceChange::Created
            }
        }
    }

    fn drop_locations_for(&mut self, path: &str) {
        for locations in self.locations.values_mut() {
            locations.retain(|loc| loc.path != path);
        }
        self.locations.retain(|_, locations| !locations.is_empty());
    }

    fn commit(&mut self, batch: WriteBatch) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for mutation in batch.mutations {
            match mutation {
                Mutation::InsertNode(node) => {
                    if self.insert_node(&node) {
                        outcome.nodes_inserted += 1;
                    }
                }
                Mutation::InsertEdge(edge) => {
                    if self.insert_edge(&edge) {
                        outcome.edges_inserted += 1;
                    }
                }
                Mutation::RecordSource { path, root, at } => {
                    outcome.source = Some(self.record_source(&path, root, at));
                }
                Mutation::RecordLocation(hash, location) => {
                    if self.locations.entry(hash).or_default().insert(location) {
                        outcome.locations_recorded += 1;
                    }
                }
            }
        }
        outcome
    }

    fn apply(&mut self, batch: WriteBatch) -> Result<BatchOutcome, StoreError> {
        self.validate(&batch)?;
        Ok(self.commit(batch))
    }

    /// The hash itself plus everything above it.
    fn ancestors(&self, hash: &ContentHash) -> BTreeSet<ContentHash> {
        let mut seen = BTreeSet::from([*hash]);
        let mut queue = VecDeque::from([*hash]);
        while let Some(current) = queue.pop_front() {
            if let Some(parents) = self.parents.get(&current) {
                for parent in parents {
                    if seen.insert(*parent) {
                        queue.push_back(*parent);
                    }
                }
            }
        }
        seen
    }

    fn sources_in_order<'a>(&self, sources: impl Iterator<Item = &'a SourceFile>) -> Vec<SourceFile> {
        let mut list: Vec<SourceFile> = sources.cloned().collect();
        list.sort_by(|a, b| a.ingestion_cmp(b));
        list
    }
}

/// In-memory graph store for testing.
///
/// Uses BTreeMap/BTreeSet for deterministic iteration order. All requests
/// take the lock once, so each is atomic with respect to the others.
#[derive(Debug, Default)]
pub struct InMemoryGraphStore {
    state: RwLock<GraphState>,
}

impl InMemoryGraphStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get number of nodes.
    pub fn num_nodes(&self) -> usize {
        self.state.read().nodes.len()
    }

    /// Get number of edges.
    pub fn num_edges(&self) -> usize {
        self.state.read().edge_count
    }

    fn handle(&self, request: GraphRequest) -> Result<GraphResponse, StoreError> {
        let response = match request {
            GraphRequest::Apply(batch) => GraphResponse::Applied(self.state.write().apply(batch)?),
            GraphRequest::InsertNode(node) => {
                GraphResponse::Applied(self.state.write().apply(vec![Mutation::InsertNode(node)].into())?)
            }
            GraphRequest::InsertEdge(edge) => {
                GraphResponse::Applied(self.state.write().apply(vec![Mutation::InsertEdge(edge)].into())?)
            }
            GraphRequest::GetNode(hash) => GraphResponse::Node(self.state.read().nodes.get(&hash).cloned()),
            GraphRequest::GetChildren(hash) => {
                let state = self.state.read();
                GraphResponse::Edges(
                    state
                        .children
                        .get(&hash)
                        .map(|slots| slots.values().cloned().collect())
                        .unwrap_or_default(),
                )
            }
            GraphRequest::GetParents(hash) => {
                let state = self.state.read();
                GraphResponse::Hashes(
                    state
                        .parents
                        .get(&hash)
                        .map(|set| set.iter().copied().collect())
                        .unwrap_or_default(),
                )
            }
            GraphRequest::GetRoots => {
                let state = self.state.read();
                GraphResponse::Hashes(
                    state
                        .nodes
                        .keys()
                        .filter(|h| !state.parents.contains_key(h))
                        .copied()
                        .collect(),
                )
            }
            GraphRequest::GetSourcesForHash(hash) => {
                let state = self.state.read();
                let ancestors = state.ancestors(&hash);
                GraphResponse::Sources(
                    state.sources_in_order(state.sources.values().filter(|s| ancestors.contains(&s.root_hash))),
                )
            }
            GraphRequest::ListSources => {
                let state = self.state.read();
                GraphResponse::Sources(state.sources_in_order(state.sources.values()))
            }
            GraphRequest::GetLocations(hash) => GraphResponse::Locations(
                self.state
                    .read()
                    .locations
                    .get(&hash)
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default(),
            ),
            GraphRequest::SearchLiterals { needle, limit } => GraphResponse::Nodes(
                self.state
                    .read()
                    .nodes
                    .values()
                    .filter(|n| n.literal.as_deref().is_some_and(|l| l.contains(needle.as_str())))
                    .take(limit)
                    .cloned()
                    .collect(),
            ),
            GraphRequest::ReplaceDocuments(records) => {
                self.state.write().documents = records;
                GraphResponse::Done
            }
            GraphRequest::GetDocument(name) => GraphResponse::Document(
                self.state
                    .read()
                    .documents
                    .iter()
                    .find(|r| r.document.name == name)
                    .cloned(),
            ),
            GraphRequest::ListDocuments => GraphResponse::Documents(self.state.read().documents.clone()),
            GraphRequest::ListNodeHashes => {
                GraphResponse::Hashes(self.state.read().nodes.keys().copied().collect())
            }
            GraphRequest::ListEdges => {
                let state = self.state.read();
                GraphResponse::Edges(state.children.values().flat_map(|slots| slots.values().cloned()).collect())
            }
            GraphRequest::Counts => {
                let state = self.state.read();
                GraphResponse::Counts(GraphCounts {
                    nodes: state.nodes.len() as u64,
                    edges: state.edge_count as u64,
                    sources: state.sources.len() as u64,
                    documents: state.documents.len() as u64,
                })
            }
        };
        Ok(response)
    }
}

#[async_trait]
impl GraphStore for InMemoryGraphStore {
    async fn execute(&self, request: GraphRequest) -> Result<GraphResponse, StoreError> {
        self.handle(request)
    }
}
