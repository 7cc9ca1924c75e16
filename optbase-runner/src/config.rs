//! Import configuration, loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is a valid
//! configuration:
//!
//! ```toml
//! database = "options"
//! table = "option_bars"
//! buckets = 10
//! chunk_size = 2000
//! workers = 4
//! resume = true
//! ledger_path = "warehouse/imports.jsonl"
//! store_timeout_secs = 30
//! reimport = "merge_by_timestamp"
//!
//! [retry]
//! max_attempts = 3
//! backoff = { type = "fixed", delay_ms = 2000 }
//!
//! [cleaning]
//! max_fill_gap = 3
//! outlier_threshold = 10.0
//! ```

use crate::importer::ReimportPolicy;
use crate::retry::RetryPolicy;
use optbase_core::data::CleaningConfig;
use optbase_core::query::Ident;
use optbase_core::store::{PartitionScheme, DEFAULT_BUCKETS};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_DATABASE: &str = "options";
pub const DEFAULT_TABLE: &str = "option_bars";
pub const DEFAULT_CHUNK_SIZE: usize = 2000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub database: String,
    pub table: String,
    /// Hash buckets on `symbol`.
    pub buckets: u32,
    /// Rows per upload/append chunk.
    pub chunk_size: usize,
    /// Files imported in parallel by `import_directory`.
    pub workers: usize,
    /// Skip files whose content already has a verified ledger entry.
    pub resume: bool,
    /// JSONL ledger of finished imports. Defaults to `imports.jsonl` in the
    /// store root when unset.
    pub ledger_path: Option<PathBuf>,
    pub store_timeout_secs: u64,
    pub reimport: ReimportPolicy,
    pub retry: RetryPolicy,
    pub cleaning: CleaningConfig,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            database: DEFAULT_DATABASE.into(),
            table: DEFAULT_TABLE.into(),
            buckets: DEFAULT_BUCKETS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            workers: 1,
            resume: false,
            ledger_path: None,
            store_timeout_secs: 30,
            reimport: ReimportPolicy::default(),
            retry: RetryPolicy::default(),
            cleaning: CleaningConfig::default(),
        }
    }
}

impl ImportConfig {
    /// Load and validate a config file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        Ident::new(&self.database).map_err(|e| ConfigError::Invalid(format!("database: {e}")))?;
        Ident::new(&self.table).map_err(|e| ConfigError::Invalid(format!("table: {e}")))?;
        if self.buckets == 0 {
            return Err(ConfigError::Invalid("buckets must be at least 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk_size must be at least 1".into()));
        }
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.store_timeout_secs == 0 {
            return Err(ConfigError::Invalid("store_timeout_secs must be at least 1".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        self.cleaning
            .validate()
            .map_err(|e| ConfigError::Invalid(format!("cleaning: {e}")))
    }

    pub fn scheme(&self) -> PartitionScheme {
        PartitionScheme::new(self.buckets)
    }

    pub fn store_timeout(&self) -> Duration {
        Duration::from_secs(self.store_timeout_secs)
    }

    /// Ledger location for a store rooted at `store_root`.
    pub fn ledger_path_for(&self, store_root: &Path) -> PathBuf {
        self.ledger_path
            .clone()
            .unwrap_or_else(|| store_root.join("imports.jsonl"))
    }
}
