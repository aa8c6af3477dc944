//! Rebuilding values from hashes.
//!
//! Reconstruction runs in two passes, both on explicit work stacks. The
//! first fetches every fragment under the root and counts the edges pointing
//! at each. The second builds bottom-up, moving a finished fragment into its
//! parent on its last use and copying it only while other parents still
//! need it. Nesting depth never touches the native call stack.
//!
//! Stored structure is checked on the way: container edges must occupy
//! positions `0..n` without gaps, array edges must carry indices and object
//! edges must carry keys. Anything else is an integrity violation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use crate::error::{KitsugiError, NotFound, Result};
use crate::store::GraphStore;
use crate::types::{ContentHash, Discriminator, Edge, ReconstructionRecipe, Value, ValueKind};

enum Step {
    Visit(ContentHash),
    Build(ContentHash, ValueKind, Vec<Edge>),
}

/// Rebuilds values from the graph.
pub struct Reconstructor<S: GraphStore> {
    store: Arc<S>,
}

impl<S: GraphStore> Reconstructor<S> {
    /// Create a reconstructor over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Rebuild the value stored under `hash`.
    pub async fn reconstruct(&self, hash: &ContentHash) -> Result<Value> {
        self.assemble(hash, None).await
    }

    /// Rebuild a document from its persisted recipe, using the recipe's
    /// edge list instead of querying children.
    pub async fn reconstruct_recipe(&self, recipe: &ReconstructionRecipe) -> Result<Value> {
        if !recipe.verify() {
            return Err(KitsugiError::integrity(
                recipe.root,
                format!("recipe fingerprint {}", recipe.fingerprint),
                "recomputed fingerprint differs",
            ));
        }
        let children = recipe.children_by_parent();
        self.assemble(&recipe.root, Some(&children)).await
    }

    /// Rebuild a named document.
    pub async fn export(&self, name: &str) -> Result<Value> {
        let record = self
            .store
            .get_document(name)
            .await?
            .ok_or_else(|| KitsugiError::NotFound(NotFound::Document(name.to_string())))?;
        tracing::debug!(document = %name, fragments = record.recipe.len(), "Exporting document");
        self.reconstruct_recipe(&record.recipe).await
    }

    async fn children_of(
        &self,
        hash: &ContentHash,
        recipe: Option<&BTreeMap<ContentHash, Vec<Edge>>>,
    ) -> Result<Vec<Edge>> {
        match recipe {
            Some(map) => Ok(map.get(hash).cloned().unwrap_or_default()),
            None => Ok(self.store.get_children(hash).await?),
        }
    }

    async fn assemble(
        &self,
        root: &ContentHash,
        recipe: Option<&BTreeMap<ContentHash, Vec<Edge>>>,
    ) -> Result<Value> {
        let (mut fetched, mut uses) = self.discover(root, recipe).await?;
        let mut done = Memo::default();
        let mut open: HashSet<ContentHash> = HashSet::new();
        let mut stack = vec![Step::Visit(*root)];

        while let Some(step) = stack.pop() {
            match step {
                Step::Visit(hash) => {
                    if done.0.contains_key(&hash) {
                        continue;
                    }
                    if !open.insert(hash) {
                        return Err(KitsugiError::integrity(hash, "acyclic graph", "fragment contains itself"));
                    }
                    match fetched.remove(&hash) {
                        Some(Fetched::Scalar(value)) => {
                            open.remove(&hash);
                            done.0.insert(hash, value);
                        }
                        Some(Fetched::Container(kind, edges)) => {
                            let pending: Vec<ContentHash> = edges
                                .iter()
                                .map(|e| e.child)
                                .filter(|c| !done.0.contains_key(c))
                                .collect();
                            stack.push(Step::Build(hash, kind, edges));
                            stack.extend(pending.into_iter().rev().map(Step::Visit));
                        }
                        None => return Err(KitsugiError::NotFound(NotFound::Hash(hash))),
                    }
                }
                Step::Build(hash, kind, edges) => {
                    let value = build(&hash, kind, &edges, &mut done, &mut uses)?;
                    open.remove(&hash);
                    done.0.insert(hash, value);
                }
            }
        }

        done.0
            .remove(root)
            .ok_or(KitsugiError::NotFound(NotFound::Hash(*root)))
    }

    /// Fetch every fragment under `root` and count how many edges point at
    /// each one.
    async fn discover(
        &self,
        root: &ContentHash,
        recipe: Option<&BTreeMap<ContentHash, Vec<Edge>>>,
    ) -> Result<(HashMap<ContentHash, Fetched>, HashMap<ContentHash, usize>)> {
        let mut fetched: HashMap<ContentHash, Fetched> = HashMap::new();
        let mut uses: HashMap<ContentHash, usize> = HashMap::new();
        let mut queue = vec![*root];

        while let Some(hash) = queue.pop() {
            if fetched.contains_key(&hash) {
                continue;
            }
            let node = self
                .store
                .get_node(&hash)
                .await?
                .ok_or(KitsugiError::NotFound(NotFound::Hash(hash)))?;

            if node.is_scalar() {
                let value = match node.scalar_value() {
                    Some(Ok(value)) => value,
                    Some(Err(e)) => {
                        return Err(KitsugiError::integrity(hash, "scalar literal", e.to_string()));
                    }
                    None => return Err(KitsugiError::integrity(hash, "scalar literal", "missing")),
                };
                fetched.insert(hash, Fetched::Scalar(value));
                continue;
            }

            let edges = self.children_of(&hash, recipe).await?;
            check_edges(&hash, node.kind, &edges)?;
            for edge in &edges {
                *uses.entry(edge.child).or_default() += 1;
                if !fetched.contains_key(&edge.child) {
                    queue.push(edge.child);
                }
            }
            fetched.insert(hash, Fetched::Container(node.kind, edges));
        }
        Ok((fetched, uses))
    }
}

enum Fetched {
    Scalar(Value),
    Container(ValueKind, Vec<Edge>),
}

/// Finished fragments awaiting their remaining parents.
#[derive(Default)]
struct Memo(HashMap<ContentHash, Value>);

impl Memo {
    /// Hand out a member for one parent edge: the value itself on its last
    /// use, a copy before that.
    fn take(&mut self, child: &ContentHash, uses: &mut HashMap<ContentHash, usize>) -> Option<Value> {
        let left = uses.get_mut(child)?;
        *left = left.saturating_sub(1);
        if *left == 0 {
            self.0.remove(child)
        } else {
            self.0.get(child).cloned()
        }
    }
}

impl Drop for Memo {
    fn drop(&mut self) {
        for (_, value) in self.0.drain() {
            value.teardown();
        }
    }
}

fn check_edges(hash: &ContentHash, kind: ValueKind, edges: &[Edge]) -> Result<()> {
    for (slot, edge) in edges.iter().enumerate() {
        if edge.position as usize != slot {
            return Err(KitsugiError::integrity(
                *hash,
                format!("contiguous positions 0..{}", edges.len()),
                format!("position {} at slot {slot}", edge.position),
            ));
        }
        let consistent = match (&edge.discriminator, kind) {
            (Discriminator::Index(i), ValueKind::Array) => *i == edge.position,
            (Discriminator::Key(_), ValueKind::Object) => true,
            _ => false,
        };
        if !consistent {
            return Err(KitsugiError::integrity(
                *hash,
                format!("{kind} member"),
                format!("discriminator {}", edge.discriminator),
            ));
        }
    }
    Ok(())
}

fn build(
    hash: &ContentHash,
    kind: ValueKind,
    edges: &[Edge],
    done: &mut Memo,
    uses: &mut HashMap<ContentHash, usize>,
) -> Result<Value> {
    let mut member = |edge: &Edge| {
        done.take(&edge.child, uses)
            .ok_or_else(|| KitsugiError::integrity(*hash, "built member", format!("missing {}", edge.child)))
    };
    match kind {
        ValueKind::Array => Ok(Value::Array(edges.iter().map(member).collect::<Result<_>>()?)),
        ValueKind::Object => {
            let mut map = BTreeMap::new();
            for edge in edges {
                if let Discriminator::Key(key) = &edge.discriminator {
                    map.insert(key.clone(), member(edge)?);
                }
            }
            Ok(Value::Object(map))
        }
        ValueKind::Scalar => Err(KitsugiError::integrity(*hash, "container", "scalar")),
    }
}
