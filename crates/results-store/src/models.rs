use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Store selection plus the settings of every known backend.
///
/// Only the section matching `type` is read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(rename = "type")]
    pub kind: String,
    pub sqlite: SqliteConfig,
    pub cockroach: CockroachConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            kind: "cockroachdb".to_string(),
            sqlite: SqliteConfig::default(),
            cockroach: CockroachConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    pub path: PathBuf,
    pub table: String,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        SqliteConfig { path: PathBuf::from("scans.db"), table: "scans".to_string() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CockroachConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    pub database: String,
    pub schema: String,
    pub table: String,
    pub max_pool_size: usize,
    /// Create schema and table on connect when missing.
    pub migrate: bool,
}

impl Default for CockroachConfig {
    fn default() -> Self {
        CockroachConfig {
            host: "cockroach".to_string(),
            port: 26257,
            user: "root".to_string(),
            password: None,
            database: "defaultdb".to_string(),
            schema: "miniscan".to_string(),
            table: "scans".to_string(),
            max_pool_size: 10,
            migrate: false,
        }
    }
}
