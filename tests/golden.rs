//! Golden tests for the fragment graph.
//!
//! These tests verify determinism, round-trip and the end-to-end behavior
//! of ingestion, splicing, path finding and coverage.

use std::collections::BTreeMap;
use std::sync::Arc;

use kitsugi::store::InMemoryGraphStore;
use kitsugi::types::Number;
use kitsugi::{
    hash_value, ClosureIndex, ContentHash, Discriminator, GraphStore, Ingestor, KitsugiError, PathFinder,
    ProvenanceAnalyzer, Reconstructor, Splicer, Value,
};
use proptest::prelude::*;

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn json(text: &str) -> Value {
    Value::from_json_str(text).unwrap()
}

fn hash_of(text: &str) -> ContentHash {
    hash_value(&json(text)).0
}

struct Kernel {
    store: Arc<InMemoryGraphStore>,
    closures: Arc<ClosureIndex<InMemoryGraphStore>>,
    ingestor: Ingestor<InMemoryGraphStore>,
}

impl Kernel {
    fn new() -> Self {
        let store = Arc::new(InMemoryGraphStore::new());
        Self {
            closures: Arc::new(ClosureIndex::new(Arc::clone(&store), 128)),
            ingestor: Ingestor::with_extensions(Arc::clone(&store), vec!["json".into()]),
            store,
        }
    }

    async fn ingest(&self, path: &str, text: &str) -> ContentHash {
        self.ingestor.ingest_value(path, &json(text)).await.unwrap().root
    }

    fn reconstructor(&self) -> Reconstructor<InMemoryGraphStore> {
        Reconstructor::new(Arc::clone(&self.store))
    }

    fn splicer(&self) -> Splicer<InMemoryGraphStore> {
        Splicer::new(Arc::clone(&self.closures))
    }

    fn provenance(&self) -> ProvenanceAnalyzer<InMemoryGraphStore> {
        ProvenanceAnalyzer::new(Arc::clone(&self.closures))
    }
}

fn arb_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        (-1_000_000i64..1_000_000, 1i32..4)
            .prop_map(|(m, k)| Value::Number(Number::from_f64(m as f64 / 10f64.powi(k)).unwrap_or(Number::Int(0)))),
        "[a-zA-Z0-9 \"\\\\é]{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(5, 64, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{0,4}", inner, 0..6)
                .prop_map(|m: BTreeMap<String, Value>| Value::Object(m)),
        ]
    })
}

fn block_on<F: std::future::Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .build()
        .unwrap()
        .block_on(future)
}

// ─────────────────────────────────────────────────────────────────────────────
// Determinism
// ─────────────────────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn prop_hash_is_deterministic(value in arb_value()) {
        let first = hash_value(&value);
        let second = hash_value(&value.clone());
        prop_assert_eq!(first.clone(), second);

        // Surviving a trip through JSON text keeps the hash.
        let reparsed = Value::from_json_str(&value.to_json_string()).unwrap();
        prop_assert_eq!(hash_value(&reparsed).0, first.0);
    }

    #[test]
    fn prop_reconstruct_round_trip(value in arb_value()) {
        let rebuilt = block_on(async {
            let kernel = Kernel::new();
            let outcome = kernel.ingestor.ingest_value("p.json", &value).await.unwrap();
            kernel.reconstructor().reconstruct(&outcome.root).await.unwrap()
        });
        prop_assert_eq!(rebuilt, value);
    }
}

#[test]
fn test_golden_hashes_are_stable() {
    // Pinned so that a change to the canonical byte format cannot go unnoticed.
    assert_eq!(
        hash_of("null").to_hex(),
        "1b16b1df538ba12dc3f97edbb85caa7050d46c148134290feba80f8236c83db9"
    );
    assert_eq!(hash_of(r#"{"b": 1, "a": [true, "x"]}"#), hash_of(r#"{"a": [true, "x"], "b": 1.0}"#));
    assert_ne!(hash_of(r#"[1, 2]"#), hash_of(r#"[2, 1]"#));
    assert_ne!(hash_of(r#""1""#), hash_of("1"));
}

// ─────────────────────────────────────────────────────────────────────────────
// Ingestion
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_idempotent_ingestion() {
    let kernel = Kernel::new();
    let text = r#"{"users": [{"name": "Ann", "tags": ["a", "b"]}, {"name": "Bo", "tags": []}]}"#;
    kernel.ingest("users.json", text).await;
    let before = kernel.store.counts().await.unwrap();

    let again = kernel.ingestor.ingest_value("users.json", &json(text)).await.unwrap();
    let after = kernel.store.counts().await.unwrap();

    assert_eq!(again.nodes_inserted, 0);
    assert_eq!(again.edges_inserted, 0);
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_shared_fragment_is_stored_once() {
    let kernel = Kernel::new();
    let x = kernel
        .ingest("x.json", r#"{"name": "Alice", "address": {"city": "Springfield"}}"#)
        .await;
    let y = kernel.ingest("y.json", r#"{"employee": {"city": "Springfield"}}"#).await;

    let city = hash_of(r#"{"city": "Springfield"}"#);
    assert!(kernel.store.get_node(&city).await.unwrap().is_some());

    let parents = kernel.store.get_parents(&city).await.unwrap();
    assert_eq!(parents.len(), 2);
    assert!(parents.contains(&x));
    assert!(parents.contains(&y));

    // "Springfield" itself: one node, one parent (the shared object)
    let springfield = hash_of(r#""Springfield""#);
    assert_eq!(kernel.store.get_parents(&springfield).await.unwrap().len(), 1);

    let sources = kernel.store.get_sources_for_hash(&springfield).await.unwrap();
    let paths: Vec<_> = sources.iter().map(|s| s.path.as_str()).collect();
    assert_eq!(paths, vec!["x.json", "y.json"]);
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconstruction
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_reconstruct_nested_fragment() {
    let kernel = Kernel::new();
    kernel.ingest("a.json", r#"{"outer": {"list": [1, 2.5, null, {"deep": "yes"}]}}"#).await;

    let inner = hash_of(r#"{"list": [1, 2.5, null, {"deep": "yes"}]}"#);
    let value = kernel.reconstructor().reconstruct(&inner).await.unwrap();
    assert_eq!(value, json(r#"{"list": [1, 2.5, null, {"deep": "yes"}]}"#));
}

#[tokio::test]
async fn test_reconstruct_unknown_hash() {
    let kernel = Kernel::new();
    let err = kernel.reconstructor().reconstruct(&hash_of("42")).await.unwrap_err();
    assert!(matches!(err, KitsugiError::NotFound(_)));
}

// ─────────────────────────────────────────────────────────────────────────────
// Paths
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_path_to_nested_scalar() {
    let kernel = Kernel::new();
    let root = kernel.ingest("r.json", r#"{"a": {"b": 5}}"#).await;

    let path = PathFinder::new(Arc::clone(&kernel.store))
        .find_path(&root, &hash_of("5"))
        .await
        .unwrap();
    assert_eq!(path.tokens(), vec!["a", "b"]);
    assert_eq!(path.to_string(), ".a.b");
}

#[tokio::test]
async fn test_path_prefers_shortest_then_smallest_tokens() {
    let kernel = Kernel::new();
    let root = kernel
        .ingest("r.json", r#"{"z": 7, "m": {"x": 7}, "list": [0, 7]}"#)
        .await;
    let finder = PathFinder::new(Arc::clone(&kernel.store));

    // .z is one step, .m.x and .list[1] are two
    let path = finder.find_path(&root, &hash_of("7")).await.unwrap();
    assert_eq!(path.segments(), &[Discriminator::Key("z".into())]);

    let list = hash_of("[0, 7, 7]");
    let root2 = kernel.ingest("s.json", r#"{"arr": [0, 7, 7]}"#).await;
    let path = finder.find_path(&root2, &hash_of("7")).await.unwrap();
    assert_eq!(path.to_string(), ".arr[1]");
    assert!(kernel.store.get_node(&list).await.unwrap().is_some());
}

#[tokio::test]
async fn test_path_tie_break_compares_joined_tokens() {
    let kernel = Kernel::new();
    let root = kernel.ingest("r.json", r#"{"ab": {"c": 5}, "a": {"bd": 5}}"#).await;

    let path = PathFinder::new(Arc::clone(&kernel.store))
        .find_path(&root, &hash_of("5"))
        .await
        .unwrap();
    // "abc" < "abd", although the first tokens alone would pick "a".
    assert_eq!(path.tokens(), vec!["ab", "c"]);
    assert_eq!(path.to_string(), ".ab.c");
}

#[tokio::test]
async fn test_path_tie_break_through_shared_fragment() {
    let kernel = Kernel::new();
    // Both branches reach the shared {"q": 1} object at the same depth.
    let root = kernel
        .ingest("r.json", r#"{"k": {"zz": {"q": 1}}, "kz": {"a": {"q": 1}}}"#)
        .await;

    let path = PathFinder::new(Arc::clone(&kernel.store))
        .find_path(&root, &hash_of("1"))
        .await
        .unwrap();
    // "kzaq" < "kzzq"
    assert_eq!(path.tokens(), vec!["kz", "a", "q"]);
}

#[tokio::test]
async fn test_path_unreachable() {
    let kernel = Kernel::new();
    let a = kernel.ingest("a.json", r#"{"a": 1}"#).await;
    let b = kernel.ingest("b.json", r#"{"b": 2}"#).await;

    let err = PathFinder::new(Arc::clone(&kernel.store)).find_path(&a, &b).await.unwrap_err();
    assert!(matches!(err, KitsugiError::Unreachable { .. }));
}

// ─────────────────────────────────────────────────────────────────────────────
// Splice, export, provenance
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_export_matches_input() {
    let kernel = Kernel::new();
    let text = r#"{"title": "T", "sections": [{"h": 1}, {"h": 2}], "draft": false}"#;
    kernel.ingest("doc.json", text).await;
    kernel.splicer().splice().await.unwrap();

    let exported = kernel.reconstructor().export("doc_1").await.unwrap();
    assert_eq!(exported, json(text));

    let err = kernel.reconstructor().export("doc_9").await.unwrap_err();
    assert!(matches!(err, KitsugiError::NotFound(_)));
}

#[tokio::test]
async fn test_full_coverage_from_single_file() {
    let kernel = Kernel::new();
    kernel.ingest("only.json", r#"{"k": [1, 2, {"v": "w"}]}"#).await;
    kernel.splicer().splice().await.unwrap();

    let report = kernel.provenance().coverage("doc_1").await.unwrap();
    assert_eq!(report.rows.len(), 1);
    assert_eq!(report.rows[0].source_fragment, "only.json");
    assert_eq!(report.rows[0].coverage, 1.0);
    assert_eq!(report.rows[0].different_hashes_xor, 0);
    assert_eq!(report.total_coverage, 1.0);
    assert!(report.uncovered.is_empty());
}

#[tokio::test]
async fn test_find_sources_orders_by_shared_count() {
    let kernel = Kernel::new();
    kernel.ingest("small.json", r#"{"c": 3}"#).await;
    kernel.ingest("whole.json", r#"{"p": {"a": 1, "b": 2}, "q": {"c": 3}}"#).await;
    kernel.ingest("part.json", r#"{"a": 1, "b": 2}"#).await;
    kernel.ingest("unrelated.json", r#"["nothing", "shared"]"#).await;
    kernel.splicer().splice().await.unwrap();

    let documents = kernel.store.list_documents().await.unwrap();
    let whole = documents
        .iter()
        .find(|d| d.document.root == hash_of(r#"{"p": {"a": 1, "b": 2}, "q": {"c": 3}}"#))
        .unwrap();

    let report = kernel.provenance().find_sources(&whole.document.name).await.unwrap();
    let paths: Vec<_> = report.sources.iter().map(|s| s.path.as_str()).collect();
    assert_eq!(paths, vec!["whole.json", "part.json", "small.json"]);

    // The same query by hash and by path resolves to the same closure.
    let by_hash = kernel.provenance().find_sources(&whole.document.root.to_hex()).await.unwrap();
    let by_path = kernel.provenance().find_sources("whole.json").await.unwrap();
    assert_eq!(by_hash.sources, report.sources);
    assert_eq!(by_path.sources, report.sources);

    let err = kernel.provenance().find_sources("nope.json").await.unwrap_err();
    assert!(matches!(err, KitsugiError::NotFound(_)));
}

#[tokio::test]
async fn test_partial_coverage_reports_uncovered() {
    let kernel = Kernel::new();
    kernel.ingest("doc.json", r#"{"left": [1], "right": [2]}"#).await;
    kernel.ingest("left.json", "[1]").await;
    kernel.splicer().splice().await.unwrap();

    // Rewriting doc.json drops its closure from the source set
    kernel.ingest("doc.json", r#"{"other": true}"#).await;

    let report = kernel.provenance().coverage("doc_1").await.unwrap();
    assert_eq!(report.rows.len(), 1);
    assert_eq!(report.rows[0].source_fragment, "left.json");
    // closure: root, [1], 1, [2], 2 -> covered [1] and 1
    assert_eq!(report.fragments, 5);
    assert_eq!(report.rows[0].shared_hashes, 2);
    assert_eq!(report.uncovered.len(), 3);
    assert!(!report.is_complete());
}
