//! Fragment nodes.

use serde::{Deserialize, Serialize};

use super::hash::ContentHash;
use super::value::{Value, ValueKind};

/// A stored fragment: one value at one nesting depth, addressed by hash.
///
/// Scalars carry their canonical JSON literal. Containers carry no payload;
/// their content is the ordered edge set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FragmentNode {
    /// Content hash.
    pub hash: ContentHash,
    /// Scalar, array or object.
    pub kind: ValueKind,
    /// Canonical JSON text for scalars, `None` for containers.
    pub literal: Option<String>,
}

impl FragmentNode {
    /// Create a scalar node. The literal must be canonical JSON text.
    pub fn scalar(hash: ContentHash, literal: String) -> Self {
        Self {
            hash,
            kind: ValueKind::Scalar,
            literal: Some(literal),
        }
    }

    /// Create a container node.
    pub fn container(hash: ContentHash, kind: ValueKind) -> Self {
        Self {
            hash,
            kind,
            literal: None,
        }
    }

    /// Whether this node is a leaf.
    pub fn is_scalar(&self) -> bool {
        self.kind == ValueKind::Scalar
    }

    /// Whether two records for the same hash describe the same value.
    pub fn same_content(&self, other: &FragmentNode) -> bool {
        self.kind == other.kind && self.literal == other.literal
    }

    /// Decode the scalar literal. Returns `None` for containers.
    pub fn scalar_value(&self) -> Option<Result<Value, serde_json::Error>> {
        self.literal.as_deref().map(Value::from_json_str)
    }
}
