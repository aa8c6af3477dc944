//! Kitsugi CLI
//!
//! Builds and queries the fragment graph stored in a SQLite file.
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `kitsugi process <dir>` | Ingest every JSON file under a directory |
//! | `kitsugi splice` | Discover documents and store their recipes |
//! | `kitsugi export <doc>` | Rebuild a document from its recipe |
//! | `kitsugi reconstruct <hash>` | Rebuild any fragment |
//! | `kitsugi find-path --parent-hash <h> --child-hash <h>` | Structural path between fragments |
//! | `kitsugi find-sources <doc-or-hash-or-file>` | Files contributing to a closure |
//! | `kitsugi coverage [-o file.csv] <doc>` | Per-file coverage of a document |
//! | `kitsugi locate <hash>` | Where a fragment occurs |
//! | `kitsugi search <needle>` | Scalars whose literal contains a substring |
//! | `kitsugi sources` / `documents` / `stats` | Listings and graph statistics |
//!
//! ## Configuration
//!
//! Environment variables:
//! - `KITSUGI_DB`: Database file (default: `content_addressing.db`), same as `--db`
//! - `KITSUGI_CLOSURE_CACHE`: Closure cache entries (default: 1024)
//! - `KITSUGI_EXTENSIONS`: Extensions picked up by `process` (default: `json`)
//! - `RUST_LOG`: Log level filter (default: `kitsugi=info`)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" otherwise (default: pretty)
//!
//! Results go to stdout as JSON; logs go to stderr.

use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kitsugi::{
    ClosureIndex, ContentHash, GraphSnapshot, GraphStore, Ingestor, KitsugiConfig, PathFinder, ProvenanceAnalyzer,
    Reconstructor, Splicer, SqliteGraphStore,
};

type CliResult<T = ()> = Result<T, Box<dyn Error>>;

/// Content-addressable fragment graph for JSON files.
#[derive(Parser)]
#[command(name = "kitsugi", version, about)]
struct Cli {
    /// SQLite database file.
    #[arg(long, global = true, env = "KITSUGI_DB")]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest every selected file under a directory.
    Process {
        /// Directory to scan.
        dir: PathBuf,
    },

    /// Discover conceptual documents and store their recipes.
    Splice,

    /// Rebuild a spliced document.
    Export {
        /// Document name, e.g. `doc_1`.
        doc: String,
        /// Write the JSON to this file instead of stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Rebuild the fragment stored under a hash.
    Reconstruct {
        /// Fragment hash (64 hex characters).
        hash: ContentHash,
    },

    /// Find the shortest structural path from one fragment to another.
    FindPath {
        /// Starting fragment.
        #[arg(long)]
        parent_hash: ContentHash,
        /// Fragment to reach.
        #[arg(long)]
        child_hash: ContentHash,
    },

    /// List the files contributing to a document, fragment or file.
    FindSources {
        /// Document name, fragment hash or ingested file path.
        target: String,
    },

    /// Report how much of a document each file explains.
    Coverage {
        /// Document name.
        doc: String,
        /// Write the rows as CSV to this file.
        #[arg(short = 'o', long = "output-file")]
        output_file: Option<PathBuf>,
    },

    /// Show where a fragment occurs and which files contain it.
    Locate {
        /// Fragment hash.
        hash: ContentHash,
    },

    /// Find scalars whose literal contains a substring.
    Search {
        /// Case-sensitive substring.
        needle: String,
        /// Maximum matches.
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },

    /// List ingested files in ingestion order.
    Sources,

    /// List spliced documents.
    Documents,

    /// Graph counts and snapshot fingerprint.
    Stats,
}

/// Initialize the tracing subscriber with JSON or pretty format, on stderr.
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "kitsugi=info,sqlx=warn".into());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}

fn print_json<T: Serialize>(value: &T) -> CliResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct PathOutput {
    parent: ContentHash,
    child: ContentHash,
    path: String,
    segments: Vec<String>,
}

#[derive(Serialize)]
struct SearchHit {
    hash: ContentHash,
    literal: Option<String>,
    locations: Vec<kitsugi::Location>,
}

#[derive(Serialize)]
struct LocateOutput {
    hash: ContentHash,
    locations: Vec<kitsugi::Location>,
    sources: Vec<kitsugi::SourceFile>,
}

#[derive(Serialize)]
struct DocumentListing {
    name: String,
    root: ContentHash,
    fragments: usize,
    fingerprint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    shredded_across: Option<Vec<String>>,
}

async fn dispatch(command: Commands, config: &KitsugiConfig, store: Arc<SqliteGraphStore>) -> CliResult {
    let closures = Arc::new(ClosureIndex::new(Arc::clone(&store), config.closure_cache));

    match command {
        Commands::Process { dir } => {
            let report = Ingestor::new(Arc::clone(&store), config).ingest_dir(&dir).await?;
            print_json(&report)
        }
        Commands::Splice => {
            let report = Splicer::new(closures).splice().await?;
            print_json(&report)
        }
        Commands::Export { doc, output } => {
            let value = Reconstructor::new(store).export(&doc).await?;
            let text = value.to_json_pretty();
            match output {
                Some(path) => {
                    std::fs::write(&path, text)?;
                    info!(document = %doc, path = %path.display(), "Document exported");
                }
                None => println!("{text}"),
            }
            Ok(())
        }
        Commands::Reconstruct { hash } => {
            let value = Reconstructor::new(store).reconstruct(&hash).await?;
            println!("{}", value.to_json_pretty());
            Ok(())
        }
        Commands::FindPath {
            parent_hash,
            child_hash,
        } => {
            let path = PathFinder::new(store).find_path(&parent_hash, &child_hash).await?;
            print_json(&PathOutput {
                parent: parent_hash,
                child: child_hash,
                path: path.to_string(),
                segments: path.tokens(),
            })
        }
        Commands::FindSources { target } => {
            let report = ProvenanceAnalyzer::new(closures).find_sources(&target).await?;
            print_json(&report)
        }
        Commands::Coverage { doc, output_file } => {
            let report = ProvenanceAnalyzer::new(closures).coverage(&doc).await?;
            match output_file {
                Some(path) => {
                    std::fs::write(&path, report.to_csv())?;
                    info!(document = %doc, path = %path.display(), rows = report.rows.len(), "Coverage CSV written");
                    print_json(&serde_json::json!({
                        "document": report.document,
                        "total_coverage": report.total_coverage,
                        "uncovered": report.uncovered.len(),
                        "csv": path.display().to_string(),
                    }))
                }
                None => print_json(&report),
            }
        }
        Commands::Locate { hash } => {
            let sources = ProvenanceAnalyzer::new(closures).sources_containing(&hash).await?;
            let locations = store.get_locations(&hash).await?;
            print_json(&LocateOutput {
                hash,
                locations,
                sources,
            })
        }
        Commands::Search { needle, limit } => {
            let mut hits = Vec::new();
            for node in store.search_literals(&needle, limit).await? {
                let locations = store.get_locations(&node.hash).await?;
                hits.push(SearchHit {
                    hash: node.hash,
                    literal: node.literal,
                    locations,
                });
            }
            print_json(&hits)
        }
        Commands::Sources => print_json(&store.list_sources().await?),
        Commands::Documents => {
            let listing: Vec<DocumentListing> = store
                .list_documents()
                .await?
                .into_iter()
                .map(|record| DocumentListing {
                    fragments: record.recipe.len(),
                    fingerprint: record.recipe.fingerprint,
                    name: record.document.name,
                    root: record.document.root,
                    shredded_across: record.shredding.map(|s| s.across),
                })
                .collect();
            print_json(&listing)
        }
        Commands::Stats => print_json(&GraphSnapshot::compute(store.as_ref()).await?),
    }
}

async fn run(cli: Cli) -> CliResult {
    let mut config = KitsugiConfig::from_env();
    if let Some(db) = cli.db {
        config = config.with_db_path(db);
    }

    let store = Arc::new(SqliteGraphStore::open(&config).await?);
    let result = dispatch(cli.command, &config, Arc::clone(&store)).await;
    store.close().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();

    info!(version = env!("CARGO_PKG_VERSION"), "Starting kitsugi");

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "Command failed");
            ExitCode::FAILURE
        }
    }
}
