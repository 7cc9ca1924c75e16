//! Per-file import records.

use chrono::{DateTime, Utc};
use optbase_core::data::CleaningReport;
use optbase_core::{OptionIdentity, SymbolError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

static BATCH_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportStatus {
    Pending,
    /// Stored count matches the expected count.
    Verified,
    /// Stored count differs. Recorded, not an error.
    Mismatched,
    Failed,
    /// Content already has a verified import; nothing was written.
    Skipped,
    /// Not started because the directory import was cancelled.
    Cancelled,
}

impl fmt::Display for ImportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Verified => "verified",
            ImportStatus::Mismatched => "mismatched",
            ImportStatus::Failed => "failed",
            ImportStatus::Skipped => "skipped",
            ImportStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Step of the per-file pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportStage {
    Parse,
    Read,
    Clean,
    Upload,
    Append,
    Verify,
}

impl fmt::Display for ImportStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFailure {
    pub stage: ImportStage,
    pub message: String,
    /// Kind of the contract code error, for parse failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol_error: Option<String>,
}

impl ImportFailure {
    pub fn new(stage: ImportStage, error: impl fmt::Display) -> Self {
        Self {
            stage,
            message: error.to_string(),
            symbol_error: None,
        }
    }

    pub fn parse(error: &SymbolError) -> Self {
        Self {
            stage: ImportStage::Parse,
            message: error.to_string(),
            symbol_error: Some(error.kind().to_string()),
        }
    }
}

impl fmt::Display for ImportFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.message)
    }
}

/// Outcome of importing one source file. Finalized once; a re-import
/// produces a new batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub batch_id: String,
    pub source_path: PathBuf,
    /// BLAKE3 of the file bytes.
    pub source_hash: Option<String>,
    pub contract: Option<OptionIdentity>,
    /// Raw CSV rows read.
    pub row_count_in: usize,
    /// Rows appended by this import.
    pub row_count_imported: usize,
    /// Rows the verification query expected.
    pub expected_row_count: Option<usize>,
    /// Rows the verification query found.
    pub stored_row_count: Option<usize>,
    pub status: ImportStatus,
    pub diagnostics: Option<CleaningReport>,
    pub failure: Option<ImportFailure>,
    /// Append attempts across all chunks.
    pub attempts: u32,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ImportBatch {
    pub fn start(source_path: &Path) -> Self {
        let started_at = Utc::now();
        let seq = BATCH_SEQ.fetch_add(1, Ordering::Relaxed);
        let mut hasher = blake3::Hasher::new();
        hasher.update(source_path.to_string_lossy().as_bytes());
        hasher.update(&started_at.timestamp_nanos_opt().unwrap_or_default().to_le_bytes());
        hasher.update(&seq.to_le_bytes());
        hasher.update(&std::process::id().to_le_bytes());
        Self {
            batch_id: hasher.finalize().to_hex()[..16].to_string(),
            source_path: source_path.to_path_buf(),
            source_hash: None,
            contract: None,
            row_count_in: 0,
            row_count_imported: 0,
            expected_row_count: None,
            stored_row_count: None,
            status: ImportStatus::Pending,
            diagnostics: None,
            failure: None,
            attempts: 0,
            started_at,
            finished_at: None,
        }
    }

    /// Close the batch as `Verified` or `Mismatched`.
    pub fn verify(mut self, expected: usize, stored: usize) -> Self {
        self.expected_row_count = Some(expected);
        self.stored_row_count = Some(stored);
        self.status = if expected == stored {
            ImportStatus::Verified
        } else {
            ImportStatus::Mismatched
        };
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn fail(mut self, failure: ImportFailure) -> Self {
        self.status = ImportStatus::Failed;
        self.failure = Some(failure);
        self.finished_at = Some(Utc::now());
        self
    }

    /// Close the batch without importing: content already verified.
    pub fn skip(mut self, source_hash: String) -> Self {
        self.source_hash = Some(source_hash);
        self.status = ImportStatus::Skipped;
        self.finished_at = Some(Utc::now());
        self
    }

    /// Close the batch without importing: the run was cancelled first.
    pub fn cancel(mut self) -> Self {
        self.status = ImportStatus::Cancelled;
        self.finished_at = Some(Utc::now());
        self
    }

    pub fn is_final(&self) -> bool {
        self.status != ImportStatus::Pending
    }
}
