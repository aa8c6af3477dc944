//! Fragment closures.
//!
//! The closure of a hash is the hash itself plus every hash reachable from it
//! through outgoing edges. A hash's children are fixed by its content, so a
//! computed closure never goes stale and can be cached without invalidation.

use std::collections::{BTreeSet, VecDeque};
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::RwLock;

use crate::error::{KitsugiError, NotFound, Result};
use crate::store::GraphStore;
use crate::types::{ContentHash, Edge};

/// Shared closure set.
pub type Closure = Arc<BTreeSet<ContentHash>>;

/// Computes closures over a store, with an optional LRU cache.
pub struct ClosureIndex<S: GraphStore> {
    store: Arc<S>,
    cache: Option<RwLock<LruCache<ContentHash, Closure>>>,
}

impl<S: GraphStore> ClosureIndex<S> {
    /// Create an index; a capacity of zero disables caching.
    pub fn new(store: Arc<S>, capacity: usize) -> Self {
        let cache = NonZeroUsize::new(capacity).map(|size| RwLock::new(LruCache::new(size)));
        Self { store, cache }
    }

    /// The underlying store.
    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Closure of `root`, including `root`.
    pub async fn closure(&self, root: &ContentHash) -> Result<Closure> {
        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.read().peek(root) {
                return Ok(Arc::clone(hit));
            }
        }

        let (hashes, _) = self.walk(root, false).await?;
        let closure = Arc::new(hashes);

        if let Some(cache) = &self.cache {
            cache.write().put(*root, Arc::clone(&closure));
        }
        Ok(closure)
    }

    /// Closure of `root` plus every edge between its members, canonically ordered.
    pub async fn closure_with_edges(&self, root: &ContentHash) -> Result<(BTreeSet<ContentHash>, Vec<Edge>)> {
        let (hashes, mut edges) = self.walk(root, true).await?;
        edges.sort();
        Ok((hashes, edges))
    }

    async fn walk(&self, root: &ContentHash, keep_edges: bool) -> Result<(BTreeSet<ContentHash>, Vec<Edge>)> {
        if self.store.get_node(root).await?.is_none() {
            return Err(KitsugiError::NotFound(NotFound::Hash(*root)));
        }

        let mut seen = BTreeSet::from([*root]);
        let mut edges = Vec::new();
        let mut queue = VecDeque::from([*root]);

        while let Some(current) = queue.pop_front() {
            for edge in self.store.get_children(&current).await? {
                if seen.insert(edge.child) {
                    queue.push_back(edge.child);
                }
                if keep_edges {
                    edges.push(edge);
                }
            }
        }

        tracing::trace!(root = %root.short(), size = seen.len(), "Closure computed");
        Ok((seen, edges))
    }
}
