//! optbase runner: batch import with verification and retry, and the
//! service facade over import and query.
//!
//! This crate builds on `optbase-core` to provide:
//! - Per-file import: contract from file name, clean, chunked upload/append, verify
//! - Directory import on a worker pool with resume and cancellation
//! - Retry policy for transient store failures
//! - JSONL import ledger
//! - TOML import configuration

pub mod batch;
pub mod config;
pub mod importer;
pub mod ledger;
pub mod progress;
pub mod retry;
pub mod service;

pub use batch::{ImportBatch, ImportFailure, ImportStage, ImportStatus};
pub use config::{ConfigError, ImportConfig};
pub use importer::{
    list_sources, source_hash, BatchImporter, CancelToken, DirectoryReport, ImportError,
    ReimportPolicy,
};
pub use ledger::ImportLedger;
pub use progress::{ImportProgress, NoProgress, TracingProgress};
pub use retry::{Backoff, RetryPolicy};
pub use service::OptionDataService;
