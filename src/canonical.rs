//! Canonical hashing of values.
//!
//! Every value is reduced to a tagged byte sequence and hashed with SHA-256.
//! Containers hash the hashes of their members, so identical subtrees
//! collapse to one hash wherever they occur.
//!
//! ## Canonical Form
//!
//! ```text
//! null    = 'n'
//! bool    = 'b' "true" | 'b' "false"
//! number  = 'd' canonical_text
//! string  = 's' utf8_bytes
//! array   = 'a' u64le(len) child_hash*
//! object  = 'o' u64le(len) (u64le(key_len) key_bytes child_hash)*   // sorted by key
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Object members are ordered by key bytes; input key order is lost
//! - Numbers use [`Number::canonical_text`], so `1.0` and `1` hash equal
//! - Traversal uses an explicit stack; nesting depth is bounded by memory,
//!   not by the native call stack

use std::collections::{BTreeSet, HashSet};
use std::hash::Hasher;
use xxhash_rust::xxh64::Xxh64;

use crate::path::child_json_path;
use crate::types::{ContentHash, Discriminator, Edge, FragmentNode, Value, ValueKind};

/// Identifier of the canonical byte format. Changing the format changes
/// every hash and must bump this.
pub const HASH_SCHEME_VERSION: &str = "kitsugi_sha256_v1";

const TAG_NULL: u8 = b'n';
const TAG_BOOL: u8 = b'b';
const TAG_NUMBER: u8 = b'd';
const TAG_STRING: u8 = b's';
const TAG_ARRAY: u8 = b'a';
const TAG_OBJECT: u8 = b'o';

/// Canonical JSON literal stored for a scalar. `None` for containers.
pub fn scalar_literal(value: &Value) -> Option<String> {
    match value {
        Value::Null => Some("null".to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.canonical_text()),
        Value::String(s) => Some(serde_json::Value::String(s.clone()).to_string()),
        Value::Array(_) | Value::Object(_) => None,
    }
}

fn scalar_bytes(value: &Value) -> Vec<u8> {
    match value {
        Value::Null => vec![TAG_NULL],
        Value::Bool(b) => {
            let mut out = vec![TAG_BOOL];
            out.extend_from_slice(if *b { b"true" } else { b"false" });
            out
        }
        Value::Number(n) => {
            let mut out = vec![TAG_NUMBER];
            out.extend_from_slice(n.canonical_text().as_bytes());
            out
        }
        Value::String(s) => {
            let mut out = Vec::with_capacity(s.len() + 1);
            out.push(TAG_STRING);
            out.extend_from_slice(s.as_bytes());
            out
        }
        Value::Array(_) | Value::Object(_) => Vec::new(),
    }
}

fn array_bytes(children: &[ContentHash]) -> Vec<u8> {
    let mut out = Vec::with_capacity(9 + children.len() * 32);
    out.push(TAG_ARRAY);
    out.extend_from_slice(&(children.len() as u64).to_le_bytes());
    for child in children {
        out.extend_from_slice(child.as_bytes());
    }
    out
}

fn object_bytes(members: &[(&str, ContentHash)]) -> Vec<u8> {
    let mut out = vec![TAG_OBJECT];
    out.extend_from_slice(&(members.len() as u64).to_le_bytes());
    for (key, child) in members {
        out.extend_from_slice(&(key.len() as u64).to_le_bytes());
        out.extend_from_slice(key.as_bytes());
        out.extend_from_slice(child.as_bytes());
    }
    out
}

/// Hash a scalar directly. Returns `None` for containers.
pub fn hash_scalar(value: &Value) -> Option<ContentHash> {
    match value {
        Value::Array(_) | Value::Object(_) => None,
        _ => Some(ContentHash::digest(&scalar_bytes(value))),
    }
}

/// Hash an array from its element hashes, in order.
pub fn hash_array(children: &[ContentHash]) -> ContentHash {
    ContentHash::digest(&array_bytes(children))
}

/// Hash an object from its (key, member hash) pairs. Pairs are sorted here.
pub fn hash_object(members: &[(&str, ContentHash)]) -> ContentHash {
    let mut sorted = members.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    ContentHash::digest(&object_bytes(&sorted))
}

/// Hash a value and return the edges linking it to its immediate children.
///
/// This is the one-level contract: the caller persists the returned edges.
/// Use [`fragment_tree`] to get the whole closure in one pass.
pub fn hash_value(value: &Value) -> (ContentHash, Vec<Edge>) {
    let tree = fragment_tree(value);
    let root = tree.root;
    let edges = tree
        .edges
        .into_iter()
        .filter(|e| e.parent == root)
        .collect();
    (root, edges)
}

/// Every node, edge and occurrence implied by one value.
#[derive(Debug, Clone)]
pub struct FragmentTree {
    /// Hash of the value itself.
    pub root: ContentHash,
    /// Distinct nodes, children before parents.
    pub nodes: Vec<FragmentNode>,
    /// Distinct edges, in discovery order.
    pub edges: Vec<Edge>,
    /// Every (hash, json_path) occurrence, in post-order.
    pub occurrences: Vec<(ContentHash, String)>,
}

impl FragmentTree {
    /// The fragment closure of the value.
    pub fn hashes(&self) -> BTreeSet<ContentHash> {
        self.nodes.iter().map(|n| n.hash).collect()
    }
}

enum Frame<'a> {
    Enter(&'a Value, String),
    ExitArray(usize, String),
    ExitObject(Vec<&'a str>, String),
}

/// Hash a value bottom-up, collecting its full fragment closure.
///
/// Uses an explicit work stack: children are pushed in reverse so they
/// complete in order, and each container pops its members' hashes from the
/// result stack on exit.
pub fn fragment_tree(value: &Value) -> FragmentTree {
    let mut nodes = Vec::new();
    let mut seen_nodes: HashSet<ContentHash> = HashSet::new();
    let mut edges = Vec::new();
    let mut seen_edges: HashSet<(ContentHash, u32)> = HashSet::new();
    let mut occurrences = Vec::new();

    let mut results: Vec<ContentHash> = Vec::new();
    let mut stack = vec![Frame::Enter(value, ".".to_string())];

    while let Some(frame) = stack.pop() {
        match frame {
            Frame::Enter(v, path) => match v {
                Value::Array(items) => {
                    stack.push(Frame::ExitArray(items.len(), path.clone()));
                    for (i, item) in items.iter().enumerate().rev() {
                        let child_path = child_json_path(&path, &Discriminator::Index(i as u32));
                        stack.push(Frame::Enter(item, child_path));
                    }
                }
                Value::Object(map) => {
                    // BTreeMap iteration is already key-sorted.
                    let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                    stack.push(Frame::ExitObject(keys, path.clone()));
                    for (key, member) in map.iter().rev() {
                        let child_path = child_json_path(&path, &Discriminator::Key(key.clone()));
                        stack.push(Frame::Enter(member, child_path));
                    }
                }
                scalar => {
                    let hash = ContentHash::digest(&scalar_bytes(scalar));
                    if seen_nodes.insert(hash) {
                        // scalar_literal is always Some for scalars
                        let literal = scalar_literal(scalar).unwrap_or_default();
                        nodes.push(FragmentNode::scalar(hash, literal));
                    }
                    occurrences.push((hash, path));
                    results.push(hash);
                }
            },
            Frame::ExitArray(len, path) => {
                let children = results.split_off(results.len() - len);
                let hash = hash_array(&children);
                if seen_nodes.insert(hash) {
                    nodes.push(FragmentNode::container(hash, ValueKind::Array));
                    for (i, child) in children.iter().enumerate() {
                        if seen_edges.insert((hash, i as u32)) {
                            edges.push(Edge::indexed(hash, *child, i as u32));
                        }
                    }
                }
                occurrences.push((hash, path));
                results.push(hash);
            }
            Frame::ExitObject(keys, path) => {
                let children = results.split_off(results.len() - keys.len());
                let members: Vec<(&str, ContentHash)> =
                    keys.iter().copied().zip(children.iter().copied()).collect();
                let hash = ContentHash::digest(&object_bytes(&members));
                if seen_nodes.insert(hash) {
                    nodes.push(FragmentNode::container(hash, ValueKind::Object));
                    for (pos, (key, child)) in members.iter().enumerate() {
                        if seen_edges.insert((hash, pos as u32)) {
                            edges.push(Edge::keyed(hash, *child, *key, pos as u32));
                        }
                    }
                }
                occurrences.push((hash, path));
                results.push(hash);
            }
        }
    }

    // One value in, one hash out.
    let root = results.pop().unwrap_or_else(|| ContentHash::digest(&[TAG_NULL]));

    FragmentTree {
        root,
        nodes,
        edges,
        occurrences,
    }
}

/// Streaming xxh64 fingerprint for non-cryptographic identities
/// (recipes, graph snapshots).
pub struct Fingerprinter(Xxh64);

impl Fingerprinter {
    /// Start a new fingerprint.
    pub fn new() -> Self {
        Self(Xxh64::new(0))
    }

    /// Fold bytes into the fingerprint.
    pub fn write(&mut self, bytes: &[u8]) {
        self.0.write(bytes);
    }

    /// Finish as 16 hex characters.
    pub fn finish_hex(&self) -> String {
        format!("{:016x}", self.0.finish())
    }
}

impl Default for Fingerprinter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn v(j: serde_json::Value) -> Value {
        Value::from(j)
    }

    #[test]
    fn test_determinism() {
        let value = v(json!({"name": "Alice", "tags": [1, 2, {"x": null}]}));
        assert_eq!(hash_value(&value).0, hash_value(&value.clone()).0);
    }

    #[test]
    fn test_key_order_is_irrelevant() {
        let a = Value::from_json_str(r#"{"a": 1, "b": [true]}"#).unwrap();
        let b = Value::from_json_str(r#"{"b": [true], "a": 1}"#).unwrap();
        assert_eq!(hash_value(&a).0, hash_value(&b).0);
    }

    #[test]
    fn test_types_are_distinguished() {
        let number = hash_scalar(&v(json!(1))).unwrap();
        let string = hash_scalar(&v(json!("1"))).unwrap();
        let boolean = hash_scalar(&v(json!(true))).unwrap();
        let text_true = hash_scalar(&v(json!("true"))).unwrap();
        assert_ne!(number, string);
        assert_ne!(boolean, text_true);
        assert_ne!(hash_value(&v(json!([]))).0, hash_value(&v(json!({}))).0);
    }

    #[test]
    fn test_array_order_matters() {
        assert_ne!(hash_value(&v(json!([1, 2]))).0, hash_value(&v(json!([2, 1]))).0);
    }

    #[test]
    fn test_container_hash_matches_helpers() {
        let value = v(json!({"k": [1, "s"]}));
        let one = hash_scalar(&v(json!(1))).unwrap();
        let s = hash_scalar(&v(json!("s"))).unwrap();
        let arr = hash_array(&[one, s]);
        assert_eq!(hash_value(&value).0, hash_object(&[("k", arr)]));
    }

    #[test]
    fn test_one_level_edges() {
        let value = v(json!({"b": {"c": 1}, "a": 2}));
        let (root, edges) = hash_value(&value);
        assert_eq!(edges.len(), 2);
        assert!(edges.iter().all(|e| e.parent == root));
        assert_eq!(edges[0].discriminator, Discriminator::Key("a".into()));
        assert_eq!(edges[0].position, 0);
        assert_eq!(edges[1].discriminator, Discriminator::Key("b".into()));
        assert_eq!(edges[1].position, 1);
    }

    #[test]
    fn test_tree_deduplicates_shared_fragments() {
        let value = v(json!([{"city": "Springfield"}, {"city": "Springfield"}]));
        let tree = fragment_tree(&value);
        // root array, the object, the string
        assert_eq!(tree.nodes.len(), 3);
        // two array slots pointing at the same object, one member edge
        assert_eq!(tree.edges.len(), 3);
        assert_eq!(tree.nodes.last().unwrap().hash, tree.root);
        let paths: Vec<&str> = tree.occurrences.iter().map(|(_, p)| p.as_str()).collect();
        assert!(paths.contains(&".[1].city"));
        assert!(paths.contains(&"."));
    }

    #[test]
    fn test_scalar_literals() {
        assert_eq!(scalar_literal(&v(json!("a\"b"))).unwrap(), r#""a\"b""#);
        assert_eq!(scalar_literal(&v(json!(2.0))).unwrap(), "2");
        assert_eq!(scalar_literal(&v(json!(null))).unwrap(), "null");
        assert!(scalar_literal(&v(json!([]))).is_none());
    }

    #[test]
    fn test_deep_nesting_uses_explicit_stack() {
        let mut value = Value::from(0i64);
        for _ in 0..5_000 {
            value = Value::Array(vec![value]);
        }
        let tree = fragment_tree(&value);
        assert_eq!(tree.nodes.len(), 5_001);
        assert_eq!(tree.edges.len(), 5_000);
        // Unwind without recursive drop.
        let mut cur = value;
        while let Value::Array(mut items) = cur {
            cur = items.pop().unwrap_or(Value::Null);
        }
    }

    #[test]
    fn test_fingerprint_determinism() {
        let mut a = Fingerprinter::new();
        a.write(b"abc");
        let mut b = Fingerprinter::new();
        b.write(b"abc");
        assert_eq!(a.finish_hex(), b.finish_hex());
        assert_eq!(a.finish_hex().len(), 16);
    }
}
