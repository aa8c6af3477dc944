//! SQLite graph store, the durable backend used by the CLI.
//!
//! ## Schema
//!
//! | Table | Key | Contents |
//! |-------|-----|----------|
//! | `nodes` | `hash` | kind, scalar literal |
//! | `edges` | `(parent_hash, position)` | child hash, object key (NULL for arrays) |
//! | `sources` | `path` | root hash, first/last ingestion (UTC micros), sequence |
//! | `locations` | `(hash, path, json_path)` | |
//! | `documents` | `name` | ordinal, root, recipe and shredding as JSON |
//!
//! Each request runs in one transaction. Integrity checks read the slot
//! before writing it, so a conflicting batch rolls back with nothing stored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqliteConnection};
use std::time::Duration;

use super::{
    edge_conflict, node_conflict, same_edge, BatchOutcome, GraphCounts, GraphRequest, GraphResponse, GraphStore,
    Mutation, SourceChange, WriteBatch,
};
use crate::config::KitsugiConfig;
use crate::error::StoreError;
use crate::types::{
    ContentHash, ConceptualDocument, Discriminator, DocumentRecord, Edge, FragmentNode, Location,
    ReconstructionRecipe, Shredding, SourceFile, ValueKind,
};

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS nodes (
        hash TEXT PRIMARY KEY,
        kind TEXT NOT NULL,
        literal TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS edges (
        parent_hash TEXT NOT NULL,
        position INTEGER NOT NULL,
        child_hash TEXT NOT NULL,
        key TEXT,
        PRIMARY KEY (parent_hash, position)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_edges_child ON edges(child_hash)",
    r#"
    CREATE TABLE IF NOT EXISTS sources (
        path TEXT PRIMARY KEY,
        root_hash TEXT NOT NULL,
        first_ingested_at INTEGER NOT NULL,
        ingested_at INTEGER NOT NULL,
        sequence INTEGER NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_sources_root ON sources(root_hash)",
    r#"
    CREATE TABLE IF NOT EXISTS locations (
        hash TEXT NOT NULL,
        path TEXT NOT NULL,
        json_path TEXT NOT NULL,
        PRIMARY KEY (hash, path, json_path)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_locations_path ON locations(path)",
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        name TEXT PRIMARY KEY,
        ordinal INTEGER NOT NULL,
        root_hash TEXT NOT NULL UNIQUE,
        first_ingested_at INTEGER NOT NULL,
        recipe_json TEXT NOT NULL,
        shredding_json TEXT
    )
    "#,
];

/// A row that does not decode into a domain value.
#[derive(Debug, thiserror::Error)]
#[error("corrupt row in {table}: {detail}")]
struct CorruptRow {
    table: &'static str,
    detail: String,
}

fn corrupt(table: &'static str, detail: impl Into<String>) -> StoreError {
    StoreError::backend(CorruptRow {
        table,
        detail: detail.into(),
    })
}

fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

fn from_micros(table: &'static str, micros: i64) -> Result<DateTime<Utc>, StoreError> {
    let secs = micros.div_euclid(1_000_000);
    let nanos = (micros.rem_euclid(1_000_000) * 1_000) as u32;
    DateTime::from_timestamp(secs, nanos).ok_or_else(|| corrupt(table, format!("timestamp {micros}")))
}

fn hash_column(row: &SqliteRow, table: &'static str, column: &str) -> Result<ContentHash, StoreError> {
    let text: String = row.try_get(column)?;
    text.parse().map_err(|e| corrupt(table, format!("{column}: {e}")))
}

fn node_from_row(row: &SqliteRow) -> Result<FragmentNode, StoreError> {
    let kind: String = row.try_get("kind")?;
    let kind = ValueKind::from_str(&kind).ok_or_else(|| corrupt("nodes", format!("kind {kind}")))?;
    Ok(FragmentNode {
        hash: hash_column(row, "nodes", "hash")?,
        kind,
        literal: row.try_get("literal")?,
    })
}

fn edge_from_row(row: &SqliteRow) -> Result<Edge, StoreError> {
    let position: i64 = row.try_get("position")?;
    let position = u32::try_from(position).map_err(|_| corrupt("edges", format!("position {position}")))?;
    let key: Option<String> = row.try_get("key")?;
    let discriminator = match key {
        Some(key) => Discriminator::Key(key),
        None => Discriminator::Index(position),
    };
    Ok(Edge::new(
        hash_column(row, "edges", "parent_hash")?,
        hash_column(row, "edges", "child_hash")?,
        discriminator,
        position,
    ))
}

fn source_from_row(row: &SqliteRow) -> Result<SourceFile, StoreError> {
    let sequence: i64 = row.try_get("sequence")?;
    Ok(SourceFile {
        path: row.try_get("path")?,
        root_hash: hash_column(row, "sources", "root_hash")?,
        first_ingested_at: from_micros("sources", row.try_get("first_ingested_at")?)?,
        ingested_at: from_micros("sources", row.try_get("ingested_at")?)?,
        sequence: sequence as u64,
    })
}

fn document_from_row(row: &SqliteRow) -> Result<DocumentRecord, StoreError> {
    let recipe_json: String = row.try_get("recipe_json")?;
    let recipe: ReconstructionRecipe = serde_json::from_str(&recipe_json)?;
    let shredding_json: Option<String> = row.try_get("shredding_json")?;
    let shredding = shredding_json
        .map(|json| serde_json::from_str::<Shredding>(&json))
        .transpose()?;
    Ok(DocumentRecord {
        document: ConceptualDocument {
            name: row.try_get("name")?,
            root: hash_column(row, "documents", "root_hash")?,
            first_ingested_at: from_micros("documents", row.try_get("first_ingested_at")?)?,
        },
        recipe,
        shredding,
    })
}

const SOURCE_COLUMNS: &str = "path, root_hash, first_ingested_at, ingested_at, sequence";
const DOCUMENT_COLUMNS: &str = "name, root_hash, first_ingested_at, recipe_json, shredding_json";

/// SQLite graph store.
pub struct SqliteGraphStore {
    pool: SqlitePool,
}

impl SqliteGraphStore {
    /// Open (creating if missing) the database named by the configuration.
    pub async fn open(config: &KitsugiConfig) -> Result<Self, StoreError> {
        if let Some(parent) = config.db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StoreError::backend)?;
            }
        }

        tracing::info!(
            db = %config.db_path.display(),
            max_connections = config.max_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            "Opening SQLite graph store"
        );

        let options = SqliteConnectOptions::new()
            .filename(&config.db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections.max(1))
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Open a private in-memory database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = "sqlite::memory:".parse::<SqliteConnectOptions>()?;
        // One connection that is never reaped: every connection to :memory:
        // is a separate database, and closing it loses the data.
        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the pool, flushing the write-ahead log.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn apply_batch(&self, batch: WriteBatch) -> Result<BatchOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;
        let mut outcome = BatchOutcome::default();

        for mutation in batch.mutations {
            match mutation {
                Mutation::InsertNode(node) => {
                    if insert_node(&mut *tx, &node).await? {
                        outcome.nodes_inserted += 1;
                    }
                }
                Mutation::InsertEdge(edge) => {
                    if insert_edge(&mut *tx, &edge).await? {
                        outcome.edges_inserted += 1;
                    }
                }
                Mutation::RecordSource { path, root, at } => {
                    outcome.source = Some(record_source(&mut *tx, &path, root, at).await?);
                }
                Mutation::RecordLocation(hash, location) => {
                    let result = sqlx::query("INSERT OR IGNORE INTO locations (hash, path, json_path) VALUES (?, ?, ?)")
                        .bind(hash.to_hex())
                        .bind(&location.path)
                        .bind(&location.json_path)
                        .execute(&mut *tx)
                        .await?;
                    outcome.locations_recorded += result.rows_affected() as usize;
                }
            }
        }

        tx.commit().await?;
        Ok(outcome)
    }

    async fn replace_documents(&self, records: Vec<DocumentRecord>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM documents").execute(&mut *tx).await?;

        for (i, record) in records.iter().enumerate() {
            let ordinal = ConceptualDocument::ordinal(&record.document.name).unwrap_or(i + 1);
            let recipe_json = serde_json::to_string(&record.recipe)?;
            let shredding_json = record.shredding.as_ref().map(serde_json::to_string).transpose()?;
            sqlx::query(
                r#"
                INSERT INTO documents (name, ordinal, root_hash, first_ingested_at, recipe_json, shredding_json)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.document.name)
            .bind(ordinal as i64)
            .bind(record.document.root.to_hex())
            .bind(to_micros(record.document.first_ingested_at))
            .bind(recipe_json)
            .bind(shredding_json)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn hashes(&self, sql: &str, bind: Option<ContentHash>, column: &str) -> Result<Vec<ContentHash>, StoreError> {
        let mut query = sqlx::query(sql);
        if let Some(hash) = bind {
            query = query.bind(hash.to_hex());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(|row| hash_column(row, "graph", column)).collect()
    }

    async fn count(&self, table: &str) -> Result<u64, StoreError> {
        let n: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
            .fetch_one(&self.pool)
            .await?;
        Ok(n as u64)
    }
}

async fn insert_node(conn: &mut SqliteConnection, node: &FragmentNode) -> Result<bool, StoreError> {
    let existing = sqlx::query("SELECT hash, kind, literal FROM nodes WHERE hash = ?")
        .bind(node.hash.to_hex())
        .fetch_optional(&mut *conn)
        .await?;
    if let Some(row) = existing {
        let stored = node_from_row(&row)?;
        if !stored.same_content(node) {
            return Err(node_conflict(&stored, node).into());
        }
        return Ok(false);
    }

    sqlx::query("INSERT INTO nodes (hash, kind, literal) VALUES (?, ?, ?)")
        .bind(node.hash.to_hex())
        .bind(node.kind.as_str())
        .bind(&node.literal)
        .execute(&mut *conn)
        .await?;
    Ok(true)
}

async fn insert_edge(conn: &mut SqliteConnection, edge: &Edge) -> Result<bool, StoreError> {
    let existing = sqlx::query(
        "SELECT parent_hash, position, child_hash, key FROM edges WHERE parent_hash = ? AND position = ?",
    )
    .bind(edge.parent.to_hex())
    .bind(edge.position as i64)
    .fetch_optional(&mut *conn)
    .await?;
    if let Some(row) = existing {
        let stored = edge_from_row(&row)?;
        if !same_edge(&stored, edge) {
            return Err(edge_conflict(&stored, edge).into());
        }
        return Ok(false);
    }

    sqlx::query("INSERT INTO edges (parent_hash, position, child_hash, key) VALUES (?, ?, ?, ?)")
        .bind(edge.parent.to_hex())
        .bind(edge.position as i64)
        .bind(edge.child.to_hex())
        .bind(edge.discriminator.as_key())
        .execute(&mut *conn)
        .await?;
    Ok(true)
}

async fn record_source(
    conn: &mut SqliteConnection,
    path: &str,
    root: ContentHash,
    at: DateTime<Utc>,
) -> Result<SourceChange, StoreError> {
    let existing = sqlx::query(&format!("SELECT {SOURCE_COLUMNS} FROM sources WHERE path = ?"))
        .bind(path)
        .fetch_optional(&mut *conn)
        .await?;
    let existing = existing.as_ref().map(source_from_row).transpose()?;

    if let Some(source) = &existing {
        if source.root_hash == root {
            sqlx::query("UPDATE sources SET ingested_at = ? WHERE path = ?")
                .bind(to_micros(at))
                .bind(path)
                .execute(&mut *conn)
                .await?;
            return Ok(SourceChange::Refreshed);
        }
        sqlx::query("DELETE FROM locations WHERE path = ?")
            .bind(path)
            .execute(&mut *conn)
            .await?;
    }

    let sequence: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(sequence) + 1, 0) FROM sources")
        .fetch_one(&mut *conn)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO sources (path, root_hash, first_ingested_at, ingested_at, sequence)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(path) DO UPDATE SET
            root_hash = excluded.root_hash,
            first_ingested_at = excluded.first_ingested_at,
            ingested_at = excluded.ingested_at,
            sequence = excluded.sequence
        "#,
    )
    .bind(path)
    .bind(root.to_hex())
    .bind(to_micros(at))
    .bind(to_micros(at))
    .bind(sequence)
    .execute(&mut *conn)
    .await?;

    Ok(match existing {
        Some(source) => SourceChange::Replaced {
            previous: source.root_hash,
        },
        None => SourceChange::Created,
    })
}

#[async_trait]
impl GraphStore for SqliteGraphStore {
    async fn execute(&self, request: GraphRequest) -> Result<GraphResponse, StoreError> {
        let response = match request {
            GraphRequest::Apply(batch) => GraphResponse::Applied(self.apply_batch(batch).await?),
            GraphRequest::InsertNode(node) => {
                GraphResponse::Applied(self.apply_batch(vec![Mutation::InsertNode(node)].into()).await?)
            }
            GraphRequest::InsertEdge(edge) => {
                GraphResponse::Applied(self.apply_batch(vec![Mutation::InsertEdge(edge)].into()).await?)
            }
            GraphRequest::GetNode(hash) => {
                let row = sqlx::query("SELECT hash, kind, literal FROM nodes WHERE hash = ?")
                    .bind(hash.to_hex())
                    .fetch_optional(&self.pool)
                    .await?;
                GraphResponse::Node(row.as_ref().map(node_from_row).transpose()?)
            }
            GraphRequest::GetChildren(hash) => {
                let rows = sqlx::query(
                    "SELECT parent_hash, position, child_hash, key FROM edges WHERE parent_hash = ? ORDER BY position",
                )
                .bind(hash.to_hex())
                .fetch_all(&self.pool)
                .await?;
                GraphResponse::Edges(rows.iter().map(edge_from_row).collect::<Result<_, _>>()?)
            }
            GraphRequest::GetParents(hash) => GraphResponse::Hashes(
                self.hashes(
                    "SELECT DISTINCT parent_hash FROM edges WHERE child_hash = ? ORDER BY parent_hash",
                    Some(hash),
                    "parent_hash",
                )
                .await?,
            ),
            GraphRequest::GetRoots => GraphResponse::Hashes(
                self.hashes(
                    r#"
                    SELECT hash FROM nodes n
                    WHERE NOT EXISTS (SELECT 1 FROM edges e WHERE e.child_hash = n.hash)
                    ORDER BY hash
                    "#,
                    None,
                    "hash",
                )
                .await?,
            ),
            GraphRequest::GetSourcesForHash(hash) => {
                let rows = sqlx::query(
                    r#"
                    WITH RECURSIVE ancestors(hash) AS (
                        SELECT ?
                        UNION
                        SELECT e.parent_hash FROM edges e JOIN ancestors a ON e.child_hash = a.hash
                    )
                    SELECT s.path, s.root_hash, s.first_ingested_at, s.ingested_at, s.sequence
                    FROM sources s JOIN ancestors a ON s.root_hash = a.hash
                    ORDER BY s.first_ingested_at, s.sequence
                    "#,
                )
                .bind(hash.to_hex())
                .fetch_all(&self.pool)
                .await?;
                GraphResponse::Sources(rows.iter().map(source_from_row).collect::<Result<_, _>>()?)
            }
            GraphRequest::ListSources => {
                let rows = sqlx::query(&format!(
                    "SELECT {SOURCE_COLUMNS} FROM sources ORDER BY first_ingested_at, sequence"
                ))
                .fetch_all(&self.pool)
                .await?;
                GraphResponse::Sources(rows.iter().map(source_from_row).collect::<Result<_, _>>()?)
            }
            GraphRequest::GetLocations(hash) => {
                let rows = sqlx::query("SELECT path, json_path FROM locations WHERE hash = ? ORDER BY path, json_path")
                    .bind(hash.to_hex())
                    .fetch_all(&self.pool)
                    .await?;
                let mut locations = Vec::with_capacity(rows.len());
                for row in &rows {
                    let path: String = row.try_get("path")?;
                    let json_path: String = row.try_get("json_path")?;
                    locations.push(Location::new(path, json_path));
                }
                GraphResponse::Locations(locations)
            }
            GraphRequest::SearchLiterals { needle, limit } => {
                let rows = sqlx::query(
                    r#"
                    SELECT hash, kind, literal FROM nodes
                    WHERE literal IS NOT NULL AND instr(literal, ?) > 0
                    ORDER BY hash
                    LIMIT ?
                    "#,
                )
                .bind(needle)
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .fetch_all(&self.pool)
                .await?;
                GraphResponse::Nodes(rows.iter().map(node_from_row).collect::<Result<_, _>>()?)
            }
            GraphRequest::ReplaceDocuments(records) => {
                self.replace_documents(records).await?;
                GraphResponse::Done
            }
            GraphRequest::GetDocument(name) => {
                let row = sqlx::query(&format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE name = ?"))
                    .bind(name)
                    .fetch_optional(&self.pool)
                    .await?;
                GraphResponse::Document(row.as_ref().map(document_from_row).transpose()?)
            }
            GraphRequest::ListDocuments => {
                let rows = sqlx::query(&format!("SELECT {DOCUMENT_COLUMNS} FROM documents ORDER BY ordinal"))
                    .fetch_all(&self.pool)
                    .await?;
                GraphResponse::Documents(rows.iter().map(document_from_row).collect::<Result<_, _>>()?)
            }
            GraphRequest::ListNodeHashes => {
                GraphResponse::Hashes(self.hashes("SELECT hash FROM nodes ORDER BY hash", None, "hash").await?)
            }
            GraphRequest::ListEdges => {
                let rows = sqlx::query(
                    "SELECT parent_hash, position, child_hash, key FROM edges ORDER BY parent_hash, position",
                )
                .fetch_all(&self.pool)
                .await?;
                GraphResponse::Edges(rows.iter().map(edge_from_row).collect::<Result<_, _>>()?)
            }
            GraphRequest::Counts => GraphResponse::Counts(GraphCounts {
                nodes: self.count("nodes").await?,
                edges: self.count("edges").await?,
                sources: self.count("sources").await?,
                documents: self.count("documents").await?,
            }),
        };
        Ok(response)
    }
}
