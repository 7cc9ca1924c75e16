//! Store connection seam.
//!
//! A [`Store`] is the handle to a partitioned time-series database. Every
//! call goes through a [`Session`], which adds the per-call timeout.
//! [`ParquetStore`] is the local warehouse backend.

pub mod frame;
pub mod lifecycle;
pub mod parquet;
pub mod partition;
pub mod session;

pub use lifecycle::{Destructive, Ensured, LifecycleError, LifecycleManager};
pub use frame::StoredRow;
pub use parquet::ParquetStore;
pub use partition::{PartitionScheme, DEFAULT_BUCKETS};
pub use session::{Connector, Session, DEFAULT_TIMEOUT};

use crate::data::TableSchema;
use crate::domain::{OptionBar, OptionIdentity};
use crate::query::builder::{DeleteStatement, Ident, SchemaStatement, SelectQuery};
use serde::{Deserialize, Serialize};
use std::io;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("database '{0}' does not exist")]
    DatabaseNotFound(String),

    #[error("table '{database}.{table}' does not exist")]
    TableNotFound { database: String, table: String },

    #[error("upload '{0}' not found in staging")]
    UploadNotFound(String),

    #[error("corrupt store data: {0}")]
    Corrupt(String),

    #[error("store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("transient store failure: {0}")]
    Transient(String),
}

impl StoreError {
    pub fn io(path: impl AsRef<std::path::Path>, source: io::Error) -> Self {
        StoreError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            StoreError::Timeout(_) | StoreError::Transient(_) => true,
            StoreError::Io { source, .. } => matches!(
                source.kind(),
                io::ErrorKind::Interrupted
                    | io::ErrorKind::TimedOut
                    | io::ErrorKind::WouldBlock
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}

/// Existence and shape of a table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableState {
    Missing,
    /// Data exists but no schema record: an interrupted creation.
    Partial,
    Present(TableSchema),
}

/// A chunk of one contract's bars, ready to upload.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadChunk {
    pub identity: OptionIdentity,
    /// Deterministic key; re-appending the same key overwrites.
    pub key: String,
    pub bars: Vec<OptionBar>,
}

impl UploadChunk {
    /// Key the chunk by contract and a BLAKE3 digest of its rows.
    pub fn new(identity: OptionIdentity, bars: Vec<OptionBar>) -> Result<Self, StoreError> {
        let mut hasher = blake3::Hasher::new();
        hasher.update(identity.code().as_bytes());
        hasher.update(&serde_json::to_vec(&bars)?);
        let key = hasher.finalize().to_hex()[..16].to_string();
        Ok(Self {
            identity,
            key,
            bars,
        })
    }
}

/// Reference to data uploaded but not yet appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadHandle {
    pub id: String,
    pub rows: usize,
}

/// A partitioned time-series store. Implementations must be usable from any
/// thread; sessions share them through `Arc<dyn Store>`.
pub trait Store: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Partition scheme of a database, if it exists.
    fn database(&self, database: &Ident) -> Result<Option<PartitionScheme>, StoreError>;

    fn table_state(&self, database: &Ident, table: &Ident) -> Result<TableState, StoreError>;

    /// Run a DDL statement.
    fn execute(&self, statement: &SchemaStatement) -> Result<(), StoreError>;

    /// Stage a chunk for a later [`Store::append`].
    fn upload(&self, database: &Ident, chunk: &UploadChunk) -> Result<UploadHandle, StoreError>;

    /// Move an uploaded chunk into the table. Returns rows appended.
    fn append(&self, database: &Ident, table: &Ident, upload: &UploadHandle)
        -> Result<usize, StoreError>;

    /// Returns rows deleted.
    fn delete(&self, statement: &DeleteStatement) -> Result<usize, StoreError>;

    fn select(&self, query: &SelectQuery) -> Result<Vec<frame::StoredRow>, StoreError>;

    fn count(&self, query: &SelectQuery) -> Result<usize, StoreError>;
}
