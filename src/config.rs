//! Runtime configuration.
//!
//! All settings can be configured via environment variables:
//! - `KITSUGI_DB`: SQLite database file (default: `content_addressing.db`)
//! - `KITSUGI_DB_MAX_CONNECTIONS`: Maximum pool size (default: 4)
//! - `KITSUGI_DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `KITSUGI_CLOSURE_CACHE`: Cached fragment closures (default: 1024)
//! - `KITSUGI_EXTENSIONS`: Comma-separated file extensions to ingest (default: `json`)
//!
//! The binary's `--db` flag overrides `KITSUGI_DB`.

use std::path::PathBuf;

/// Default database file, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = "content_addressing.db";

/// Kernel configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KitsugiConfig {
    /// SQLite database file.
    pub db_path: PathBuf,
    /// Maximum connections in pool (default: 4).
    pub max_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Capacity of the closure cache (default: 1024).
    pub closure_cache: usize,
    /// Extensions picked up by directory scans, lowercase, without dot.
    pub extensions: Vec<String>,
}

fn env_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Split a comma-separated extension list.
pub fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty())
        .collect()
}

impl KitsugiConfig {
    /// Load configuration from environment variables with defaults.
    pub fn from_env() -> Self {
        let extensions = std::env::var("KITSUGI_EXTENSIONS")
            .map(|raw| parse_extensions(&raw))
            .ok()
            .filter(|list| !list.is_empty())
            .unwrap_or_else(|| vec!["json".to_string()]);

        Self {
            db_path: std::env::var("KITSUGI_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DB_PATH)),
            max_connections: env_or("KITSUGI_DB_MAX_CONNECTIONS", 4),
            connect_timeout_secs: env_or("KITSUGI_DB_CONNECT_TIMEOUT_SECS", 10),
            closure_cache: env_or("KITSUGI_CLOSURE_CACHE", 1024),
            extensions,
        }
    }

    /// Override the database path.
    pub fn with_db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = path.into();
        self
    }

    /// Whether a file extension is selected for ingestion.
    pub fn accepts_extension(&self, ext: &str) -> bool {
        let ext = ext.to_ascii_lowercase();
        self.extensions.iter().any(|e| *e == ext)
    }
}

impl Default for KitsugiConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
