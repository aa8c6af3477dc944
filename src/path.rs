//! Structural paths between fragments.
//!
//! The path finder first runs a level-synchronous breadth-first search from
//! the parent until the level holding the child, which fixes the minimum
//! edge count and the layered DAG of shortest-path edges. It then walks that
//! DAG backwards from the child, keeping for every node the best suffix: the
//! lexicographically smallest concatenation of segment tokens (keys verbatim,
//! indices in decimal). Prepending a token preserves the order between two
//! suffixes, so the best suffix of the parent is the best complete path.
//! Paths whose concatenations are equal fall back to token-by-token order.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use regex_lite::Regex;
use serde::{Serialize, Serializer};

use crate::error::{KitsugiError, NotFound, Result};
use crate::store::GraphStore;
use crate::types::{ContentHash, Discriminator, Edge};

fn identifier_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("static regex"))
}

fn push_segment(out: &mut String, segment: &Discriminator) {
    match segment {
        Discriminator::Key(key) if identifier_re().is_match(key) => {
            out.push('.');
            out.push_str(key);
        }
        Discriminator::Key(key) => {
            if out.is_empty() {
                out.push('.');
            }
            out.push('[');
            out.push_str(&serde_json::Value::String(key.clone()).to_string());
            out.push(']');
        }
        Discriminator::Index(i) => {
            if out.is_empty() {
                out.push('.');
            }
            out.push_str(&format!("[{i}]"));
        }
    }
}

/// jq-style path of a member, given its container's path (`.` is the root).
pub fn child_json_path(parent_path: &str, segment: &Discriminator) -> String {
    let mut out = if parent_path == "." {
        String::new()
    } else {
        parent_path.to_string()
    };
    push_segment(&mut out, segment);
    out
}

/// Sequence of keys and indices leading from one fragment to another.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FragmentPath(Vec<Discriminator>);

impl FragmentPath {
    /// Path from segments.
    pub fn new(segments: Vec<Discriminator>) -> Self {
        Self(segments)
    }

    /// The segments in order.
    pub fn segments(&self) -> &[Discriminator] {
        &self.0
    }

    /// Number of edges.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the path is empty (parent equals child).
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Tie-break tokens.
    pub fn tokens(&self) -> Vec<String> {
        self.0.iter().map(Discriminator::token).collect()
    }
}

/// Best path from a node down to the child, with its tie-break keys.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Suffix {
    joined: String,
    tokens: Vec<String>,
    segments: Vec<Discriminator>,
}

impl Suffix {
    fn prepended(&self, segment: &Discriminator) -> Suffix {
        let token = segment.token();
        let mut joined = String::with_capacity(token.len() + self.joined.len());
        joined.push_str(&token);
        joined.push_str(&self.joined);

        let mut tokens = Vec::with_capacity(self.tokens.len() + 1);
        tokens.push(token);
        tokens.extend(self.tokens.iter().cloned());

        let mut segments = Vec::with_capacity(self.segments.len() + 1);
        segments.push(segment.clone());
        segments.extend(self.segments.iter().cloned());

        Suffix { joined, tokens, segments }
    }

    fn rank(&self, other: &Suffix) -> Ordering {
        self.joined
            .cmp(&other.joined)
            .then_with(|| self.tokens.cmp(&other.tokens))
    }
}

impl fmt::Display for FragmentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str(".");
        }
        let mut out = String::new();
        for segment in &self.0 {
            push_segment(&mut out, segment);
        }
        f.write_str(&out)
    }
}

impl Serialize for FragmentPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

/// Finds the shortest structural path between two fragments.
pub struct PathFinder<S: GraphStore> {
    store: Arc<S>,
}

impl<S: GraphStore> PathFinder<S> {
    /// Create a path finder over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Find the path from `parent` down to `child`.
    ///
    /// Fails with `NotFound` if either hash is unknown and with `Unreachable`
    /// if `child` is not a descendant of `parent`.
    pub async fn find_path(&self, parent: &ContentHash, child: &ContentHash) -> Result<FragmentPath> {
        for hash in [parent, child] {
            if self.store.get_node(hash).await?.is_none() {
                return Err(KitsugiError::NotFound(NotFound::Hash(*hash)));
            }
        }
        if parent == child {
            return Ok(FragmentPath::default());
        }

        // Forward: levels of the BFS and the edges each expanded node offers.
        let mut depth_of: HashMap<ContentHash, usize> = HashMap::from([(*parent, 0)]);
        let mut levels: Vec<Vec<ContentHash>> = vec![vec![*parent]];
        let mut children: HashMap<ContentHash, Vec<Edge>> = HashMap::new();

        while !depth_of.contains_key(child) {
            let depth = levels.len();
            let mut next = Vec::new();
            for node in &levels[depth - 1] {
                let edges = self.store.get_children(node).await?;
                for edge in &edges {
                    if !depth_of.contains_key(&edge.child) {
                        depth_of.insert(edge.child, depth);
                        next.push(edge.child);
                    }
                }
                children.insert(*node, edges);
            }
            if next.is_empty() {
                return Err(KitsugiError::Unreachable {
                    parent: *parent,
                    child: *child,
                });
            }
            levels.push(next);
        }

        // Backward: best suffix per node over shortest-path edges only.
        let target = levels.len() - 1;
        let mut best: HashMap<ContentHash, Suffix> = HashMap::from([(
            *child,
            Suffix {
                joined: String::new(),
                tokens: Vec::new(),
                segments: Vec::new(),
            },
        )]);
        for depth in (0..target).rev() {
            for node in &levels[depth] {
                let mut chosen: Option<Suffix> = None;
                for edge in children.get(node).map(Vec::as_slice).unwrap_or_default() {
                    if depth_of.get(&edge.child) != Some(&(depth + 1)) {
                        continue;
                    }
                    let Some(rest) = best.get(&edge.child) else {
                        continue;
                    };
                    let candidate = rest.prepended(&edge.discriminator);
                    if chosen.as_ref().map_or(true, |c| candidate.rank(c) == Ordering::Less) {
                        chosen = Some(candidate);
                    }
                }
                if let Some(suffix) = chosen {
                    best.insert(*node, suffix);
                }
            }
        }

        match best.remove(parent) {
            Some(suffix) => {
                let found = FragmentPath(suffix.segments);
                tracing::debug!(parent = %parent.short(), child = %child.short(), depth = target, path = %found, "Path found");
                Ok(found)
            }
            None => Err(KitsugiError::Unreachable {
                parent: *parent,
                child: *child,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_json_path() {
        assert_eq!(child_json_path(".", &Discriminator::Key("a".into())), ".a");
        assert_eq!(child_json_path(".a", &Discriminator::Index(2)), ".a[2]");
        assert_eq!(child_json_path(".", &Discriminator::Index(0)), ".[0]");
        assert_eq!(child_json_path(".", &Discriminator::Key("a b".into())), r#".["a b"]"#);
        assert_eq!(child_json_path(".x", &Discriminator::Key("1st".into())), r#".x["1st"]"#);
    }

    #[test]
    fn test_display() {
        let path = FragmentPath::new(vec![
            Discriminator::Key("a".into()),
            Discriminator::Index(3),
            Discriminator::Key("b".into()),
        ]);
        assert_eq!(path.to_string(), ".a[3].b");
        assert_eq!(FragmentPath::default().to_string(), ".");
        assert_eq!(path.tokens(), vec!["a", "3", "b"]);
    }

    fn suffix(segments: Vec<Discriminator>) -> Suffix {
        let path = FragmentPath::new(segments);
        Suffix {
            joined: path.tokens().concat(),
            tokens: path.tokens(),
            segments: path.0,
        }
    }

    #[test]
    fn test_suffix_rank_uses_concatenation() {
        let a = suffix(vec![Discriminator::Key("a".into()), Discriminator::Key("bd".into())]);
        let b = suffix(vec![Discriminator::Key("ab".into()), Discriminator::Key("c".into())]);
        // "abc" < "abd" even though "a" < "ab"
        assert_eq!(b.rank(&a), Ordering::Less);

        // Equal concatenations fall back to the token sequence.
        let c = suffix(vec![Discriminator::Key("a".into()), Discriminator::Key("bc".into())]);
        assert_eq!(c.rank(&b), Ordering::Less);

        // Indices compare as decimal strings: "10" < "2".
        let ten = suffix(vec![Discriminator::Index(10)]);
        let two = suffix(vec![Discriminator::Index(2)]);
        assert_eq!(ten.rank(&two), Ordering::Less);
    }

    #[test]
    fn test_prepend_keeps_order() {
        let b = suffix(vec![Discriminator::Key("c".into())]);
        let a = suffix(vec![Discriminator::Key("d".into())]);
        let key = Discriminator::Key("x".into());
        assert_eq!(b.prepended(&key).rank(&a.prepended(&key)), Ordering::Less);
        assert_eq!(b.prepended(&key).joined, "xc");
        assert_eq!(b.prepended(&key).segments[0], key);
    }
}
