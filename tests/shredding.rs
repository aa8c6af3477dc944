//! Shredding detection.
//!
//! A document is shredded when its body (closure minus root) is exactly the
//! union of the closures of two or more maximal file roots, none of which
//! covers the body alone.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use kitsugi::store::InMemoryGraphStore;
use kitsugi::{ClosureIndex, ContentHash, GraphStore, Ingestor, Reconstructor, SpliceReport, Splicer, Value};

// ─────────────────────────────────────────────────────────────────────────────
// Test Helpers
// ─────────────────────────────────────────────────────────────────────────────

const X: &str = r#"{"name": "Alice", "address": {"city": "Springfield"}}"#;
const Y: &str = r#"{"employee": {"city": "Springfield"}}"#;
const Z: &str = r#"{"a": 1, "b": 2}"#;
const W: &str = r#"{"c": 3}"#;
const D: &str = r#"{"p": {"a": 1, "b": 2}, "q": {"c": 3}}"#;

struct Scenario {
    store: Arc<InMemoryGraphStore>,
    ingestor: Ingestor<InMemoryGraphStore>,
    splicer: Splicer<InMemoryGraphStore>,
    clock: DateTime<Utc>,
}

impl Scenario {
    fn new() -> Self {
        let store = Arc::new(InMemoryGraphStore::new());
        let closures = Arc::new(ClosureIndex::new(Arc::clone(&store), 32));
        Self {
            ingestor: Ingestor::with_extensions(Arc::clone(&store), vec!["json".into()]),
            splicer: Splicer::new(closures),
            store,
            clock: DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
        }
    }

    async fn ingest(&mut self, path: &str, json: &str) -> ContentHash {
        self.clock += Duration::seconds(1);
        let value = Value::from_json_str(json).unwrap();
        self.ingestor.ingest_value_at(path, &value, self.clock).await.unwrap().root
    }

    async fn splice(&self) -> SpliceReport {
        self.splicer.splice().await.unwrap()
    }
}

fn summary<'a>(report: &'a SpliceReport, root: &ContentHash) -> &'a kitsugi::splice::DocumentSummary {
    report.documents.iter().find(|d| &d.root == root).unwrap()
}

// ─────────────────────────────────────────────────────────────────────────────
// Scenarios
// ─────────────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_document_split_across_two_files() {
    let mut s = Scenario::new();
    let x = s.ingest("x.json", X).await;
    let y = s.ingest("y.json", Y).await;
    s.ingest("z.json", Z).await;
    s.ingest("w.json", W).await;
    let d = s.ingest("d.json", D).await;

    let report = s.splice().await;

    // z.json and w.json hang below d.json, so only three roots remain.
    let roots: Vec<_> = report.documents.iter().map(|doc| doc.root).collect();
    assert_eq!(roots, vec![x, y, d]);
    let names: Vec<_> = report.documents.iter().map(|doc| doc.name.as_str()).collect();
    assert_eq!(names, vec!["doc_1", "doc_2", "doc_3"]);

    let shredded: Vec<_> = report.shredded().map(|doc| doc.root).collect();
    assert_eq!(shredded, vec![d]);
    assert_eq!(
        summary(&report, &d).shredded_across.as_deref(),
        Some(&["z.json".to_string(), "w.json".to_string()][..])
    );
    assert!(summary(&report, &x).shredded_across.is_none());
    assert!(summary(&report, &y).shredded_across.is_none());

    // The flag is persisted with the recipe.
    let stored = s.store.get_document("doc_3").await.unwrap().unwrap();
    assert_eq!(stored.shredding.unwrap().across, vec!["z.json", "w.json"]);
}

#[tokio::test]
async fn test_nested_file_roots_are_not_reported() {
    let mut s = Scenario::new();
    s.ingest("z.json", Z).await;
    s.ingest("one.json", "1").await;
    s.ingest("w.json", W).await;
    s.ingest("three.json", "3").await;
    let d = s.ingest("d.json", D).await;

    let report = s.splice().await;
    assert_eq!(
        summary(&report, &d).shredded_across.as_deref(),
        Some(&["z.json".to_string(), "w.json".to_string()][..])
    );
}

#[tokio::test]
async fn test_uncovered_fragment_prevents_shredding() {
    let mut s = Scenario::new();
    s.ingest("z.json", Z).await;
    s.ingest("w.json", W).await;
    let d = s
        .ingest("d.json", r#"{"p": {"a": 1, "b": 2}, "q": {"c": 3}, "extra": 5}"#)
        .await;

    let report = s.splice().await;
    assert!(summary(&report, &d).shredded_across.is_none());
    assert_eq!(report.shredded().count(), 0);
}

#[tokio::test]
async fn test_single_covering_file_is_not_shredding() {
    let mut s = Scenario::new();
    s.ingest("z.json", Z).await;
    s.ingest("one.json", "1").await;
    let d = s.ingest("wrap.json", r#"{"only": {"a": 1, "b": 2}}"#).await;

    let report = s.splice().await;
    assert!(summary(&report, &d).shredded_across.is_none());
}

#[tokio::test]
async fn test_shredded_document_still_exports() {
    let mut s = Scenario::new();
    s.ingest("z.json", Z).await;
    s.ingest("w.json", W).await;
    s.ingest("d.json", D).await;
    s.splice().await;

    let exported = Reconstructor::new(Arc::clone(&s.store)).export("doc_1").await.unwrap();
    assert_eq!(exported, Value::from_json_str(D).unwrap());
}

#[tokio::test]
async fn test_resplice_renames_by_ingestion_order() {
    let mut s = Scenario::new();
    let w = s.ingest("w.json", W).await;
    let first = s.splice().await;
    assert_eq!(first.documents.len(), 1);
    assert_eq!(first.documents[0].root, w);

    // w.json's root gains a parent and stops being a document.
    s.ingest("z.json", Z).await;
    let d = s.ingest("d.json", D).await;
    let second = s.splice().await;
    let roots: Vec<_> = second.documents.iter().map(|doc| doc.root).collect();
    assert_eq!(roots, vec![d]);
    assert_eq!(s.store.list_documents().await.unwrap().len(), 1);
}
