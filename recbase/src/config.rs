use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, CoreResult};

/// Engine configuration, usually stored as `recbase.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub schema: SchemaSettings,
    #[serde(default)]
    pub filter: FilterSettings,
    #[serde(default)]
    pub records: RecordSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Database file path. Ignored by in-memory databases.
    #[serde(default = "default_database_path")]
    pub path: String,
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    #[serde(default = "default_journal_mode")]
    pub journal_mode: String,
    #[serde(default = "default_true")]
    pub foreign_keys: bool,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: default_database_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            journal_mode: default_journal_mode(),
            foreign_keys: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaSettings {
    /// Runs `PRAGMA optimize` after each successful table sync.
    #[serde(default = "default_true")]
    pub optimize_after_sync: bool,
}

impl Default for SchemaSettings {
    fn default() -> Self {
        Self {
            optimize_after_sync: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSettings {
    /// Maximum number of comparison expressions in a single filter.
    #[serde(default = "default_max_expressions")]
    pub max_expressions: usize,
    /// Maximum filter string length in bytes.
    #[serde(default = "default_max_length")]
    pub max_length: usize,
}

impl Default for FilterSettings {
    fn default() -> Self {
        Self {
            max_expressions: default_max_expressions(),
            max_length: default_max_length(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordSettings {
    #[serde(default = "default_max_cascade_depth")]
    pub max_cascade_depth: usize,
}

impl Default for RecordSettings {
    fn default() -> Self {
        Self {
            max_cascade_depth: default_max_cascade_depth(),
        }
    }
}

fn default_database_path() -> String {
    "data.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    10_000
}

fn default_journal_mode() -> String {
    "WAL".to_string()
}

fn default_true() -> bool {
    true
}

fn default_max_expressions() -> usize {
    200
}

fn default_max_length() -> usize {
    3500
}

fn default_max_cascade_depth() -> usize {
    10
}

impl CoreConfig {
    pub fn from_toml_str(content: &str) -> CoreResult<Self> {
        toml::from_str(content).map_err(|err| CoreError::Config {
            message: format!("failed to parse config: {err}"),
        })
    }

    /// Loads the config file at `path`. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|err| CoreError::Config {
            message: format!("failed to read {}: {err}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }
}
