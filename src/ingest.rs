//! Ingestion of JSON files into the fragment graph.
//!
//! Each file becomes one [`WriteBatch`]: the source entry, every node and
//! edge of the file's fragment tree, and every fragment location. The batch
//! is applied atomically, so a failing file leaves nothing behind.
//!
//! A file that does not parse is rejected with `MalformedInput` and the run
//! continues with the next file. Fatal errors (integrity and storage
//! failures) abort the run. Parsing has no nesting limit.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use walkdir::WalkDir;

use crate::canonical::fragment_tree;
use crate::config::KitsugiConfig;
use crate::error::{KitsugiError, NotFound, Result};
use crate::store::{GraphStore, Mutation, SourceChange, WriteBatch};
use crate::types::{ContentHash, Location, Value};

/// Result of ingesting one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileOutcome {
    /// Source path as recorded.
    pub path: String,
    /// Hash of the top-level value.
    pub root: ContentHash,
    /// Distinct fragments in the file.
    pub fragments: usize,
    /// Fragments not stored before.
    pub nodes_inserted: usize,
    /// Edges not stored before.
    pub edges_inserted: usize,
    /// What happened to the source entry.
    pub change: SourceChange,
}

/// A file left out of a directory run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedFile {
    /// File path.
    pub path: String,
    /// Why it was left out.
    pub reason: String,
}

/// Summary of a directory run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    /// Files ingested, in scan order.
    pub files: Vec<FileOutcome>,
    /// Files with no content.
    pub skipped: Vec<String>,
    /// Files that failed without aborting the run.
    pub rejected: Vec<RejectedFile>,
}

impl IngestReport {
    /// New fragments across the run.
    pub fn nodes_inserted(&self) -> usize {
        self.files.iter().map(|f| f.nodes_inserted).sum()
    }

    /// New edges across the run.
    pub fn edges_inserted(&self) -> usize {
        self.files.iter().map(|f| f.edges_inserted).sum()
    }
}

enum Parsed {
    Empty,
    Value(Value),
}

/// Hashes values and persists them through a store.
pub struct Ingestor<S: GraphStore> {
    store: Arc<S>,
    config: KitsugiConfig,
}

impl<S: GraphStore> Ingestor<S> {
    /// Create an ingestor; directory scans pick up the configured extensions.
    pub fn new(store: Arc<S>, config: &KitsugiConfig) -> Self {
        Self {
            store,
            config: config.clone(),
        }
    }

    /// Create an ingestor scanning the given extensions, with every other
    /// setting taken from the environment.
    pub fn with_extensions(store: Arc<S>, extensions: Vec<String>) -> Self {
        let config = KitsugiConfig {
            extensions,
            ..KitsugiConfig::from_env()
        };
        Self { store, config }
    }

    /// Ingest an already-parsed value recorded under `path`.
    pub async fn ingest_value(&self, path: &str, value: &Value) -> Result<FileOutcome> {
        // Stored timestamps have microsecond precision.
        self.ingest_value_at(path, value, Utc::now().trunc_subsecs(6)).await
    }

    /// Ingest a value with an explicit ingestion time.
    pub async fn ingest_value_at(&self, path: &str, value: &Value, at: DateTime<Utc>) -> Result<FileOutcome> {
        let tree = fragment_tree(value);
        let fragments = tree.nodes.len();
        let root = tree.root;

        let mut batch = WriteBatch::new();
        batch.push(Mutation::RecordSource {
            path: path.to_string(),
            root,
            at,
        });
        batch.mutations.extend(tree.nodes.into_iter().map(Mutation::InsertNode));
        batch.mutations.extend(tree.edges.into_iter().map(Mutation::InsertEdge));
        batch.mutations.extend(
            tree.occurrences
                .into_iter()
                .map(|(hash, json_path)| Mutation::RecordLocation(hash, Location::new(path, json_path))),
        );

        let outcome = match self.store.apply(batch).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let err = KitsugiError::from(e);
                if let KitsugiError::IntegrityViolation(v) = &err {
                    tracing::error!(path = %path, hash = %v.hash, stored = %v.stored, incoming = %v.incoming, "Integrity violation");
                }
                return Err(err);
            }
        };

        let change = outcome.source.unwrap_or(SourceChange::Refreshed);
        tracing::info!(
            path = %path,
            root = %root.short(),
            fragments,
            nodes_inserted = outcome.nodes_inserted,
            edges_inserted = outcome.edges_inserted,
            "Ingested file"
        );

        Ok(FileOutcome {
            path: path.to_string(),
            root,
            fragments,
            nodes_inserted: outcome.nodes_inserted,
            edges_inserted: outcome.edges_inserted,
            change,
        })
    }

    /// Parse and ingest one file. Returns `None` for an empty file.
    pub async fn ingest_file(&self, path: &Path) -> Result<Option<FileOutcome>> {
        let display = path.display().to_string();
        match parse_file(path)? {
            Parsed::Empty => Ok(None),
            Parsed::Value(value) => {
                let outcome = self.ingest_value(&display, &value).await;
                value.teardown();
                outcome.map(Some)
            }
        }
    }

    /// Files under `dir` with a selected extension, in sorted walk order.
    pub fn scan_directory(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        if !dir.is_dir() {
            return Err(KitsugiError::NotFound(NotFound::Source(dir.display().to_string())));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(dir).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let selected = entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| self.config.accepts_extension(ext))
                .unwrap_or(false);
            if selected {
                files.push(entry.into_path());
            }
        }
        Ok(files)
    }

    /// Ingest every selected file under `dir`.
    ///
    /// Files failing for a non-fatal reason are reported and skipped. The
    /// first fatal error stops the run.
    pub async fn ingest_dir(&self, dir: &Path) -> Result<IngestReport> {
        let files = self.scan_directory(dir)?;
        tracing::info!(dir = %dir.display(), files = files.len(), "Scanning directory");

        let mut report = IngestReport::default();
        for file in files {
            match self.ingest_file(&file).await {
                Ok(Some(outcome)) => report.files.push(outcome),
                Ok(None) => {
                    tracing::info!(path = %file.display(), "Skipped empty file");
                    report.skipped.push(file.display().to_string());
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(KitsugiError::MalformedInput { path, reason }) => {
                    tracing::warn!(path = %path, reason = %reason, "Rejected malformed input");
                    report.rejected.push(RejectedFile { path, reason });
                }
                Err(e) => {
                    tracing::warn!(path = %file.display(), error = %e, "Rejected file");
                    report.rejected.push(RejectedFile {
                        path: file.display().to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            ingested = report.files.len(),
            skipped = report.skipped.len(),
            rejected = report.rejected.len(),
            nodes_inserted = report.nodes_inserted(),
            edges_inserted = report.edges_inserted(),
            "Directory ingested"
        );
        Ok(report)
    }
}

fn parse_file(path: &Path) -> Result<Parsed> {
    let malformed = |reason: String| KitsugiError::MalformedInput {
        path: path.display().to_string(),
        reason,
    };
    let bytes = std::fs::read(path).map_err(|e| malformed(e.to_string()))?;
    let text = String::from_utf8(bytes).map_err(|e| malformed(e.to_string()))?;
    if text.trim().is_empty() {
        return Ok(Parsed::Empty);
    }
    let value = Value::from_json_str(&text).map_err(|e| malformed(e.to_string()))?;
    Ok(Parsed::Value(value))
}
