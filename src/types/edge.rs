//! Structural edges between fragments.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::hash::ContentHash;

/// How a child is addressed inside its parent.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Discriminator {
    /// Object member name.
    Key(String),
    /// Array index.
    Index(u32),
}

impl Discriminator {
    /// Token used for path tie-breaks: keys verbatim, indices in decimal.
    pub fn token(&self) -> String {
        match self {
            Self::Key(k) => k.clone(),
            Self::Index(i) => i.to_string(),
        }
    }

    /// Object key, if any.
    pub fn as_key(&self) -> Option<&str> {
        match self {
            Self::Key(k) => Some(k),
            Self::Index(_) => None,
        }
    }
}

impl fmt::Display for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key(k) => write!(f, "{k}"),
            Self::Index(i) => write!(f, "[{i}]"),
        }
    }
}

/// Edge in the fragment DAG.
///
/// Represents a directed connection from a container to one of its members.
/// Implements `Ord` for deterministic ordering: (parent, position, child).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Edge {
    /// Containing fragment.
    pub parent: ContentHash,
    /// Contained fragment.
    pub child: ContentHash,
    /// Key or index of the child within the parent.
    pub discriminator: Discriminator,
    /// Position of the child within the parent (sorted key order for objects).
    pub position: u32,
}

impl Edge {
    /// Create a new edge.
    pub fn new(
        parent: ContentHash,
        child: ContentHash,
        discriminator: Discriminator,
        position: u32,
    ) -> Self {
        Self {
            parent,
            child,
            discriminator,
            position,
        }
    }

    /// Edge from an array to its element at `index`.
    pub fn indexed(parent: ContentHash, child: ContentHash, index: u32) -> Self {
        Self::new(parent, child, Discriminator::Index(index), index)
    }

    /// Edge from an object to the member `key` at `position`.
    pub fn keyed(parent: ContentHash, child: ContentHash, key: impl Into<String>, position: u32) -> Self {
        Self::new(parent, child, Discriminator::Key(key.into()), position)
    }
}

// Canonical ordering: parent, then position, then child
impl PartialOrd for Edge {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Edge {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.parent
            .cmp(&other.parent)
            .then_with(|| self.position.cmp(&other.position))
            .then_with(|| self.child.cmp(&other.child))
            .then_with(|| self.discriminator.cmp(&other.discriminator))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_edge_ordering() {
        let p1 = ContentHash::digest(b"p1");
        let p2 = ContentHash::digest(b"p2");
        let c = ContentHash::digest(b"c");
        let (lo, hi) = if p1 < p2 { (p1, p2) } else { (p2, p1) };

        let e1 = Edge::indexed(lo, c, 0);
        let e2 = Edge::indexed(lo, c, 1);
        let e3 = Edge::indexed(hi, c, 0);

        // Same parent, position decides
        assert!(e1 < e2);
        // Parent dominates position
        assert!(e2 < e3);
    }

    #[test]
    fn test_discriminator_rendering() {
        assert_eq!(Discriminator::Key("name".into()).to_string(), "name");
        assert_eq!(Discriminator::Index(3).to_string(), "[3]");
        assert_eq!(Discriminator::Index(10).token(), "10");
        assert_eq!(Discriminator::Key("a".into()).as_key(), Some("a"));
    }
}
