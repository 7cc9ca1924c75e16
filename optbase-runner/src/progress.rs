//! Import progress reporting.

use crate::batch::{ImportBatch, ImportStatus};
use std::path::Path;
use tracing::{debug, info, warn};

/// Observer for import progress. Called from worker threads.
pub trait ImportProgress: Send + Sync {
    fn on_start(&self, _path: &Path) {}
    fn on_complete(&self, _batch: &ImportBatch) {}
    fn on_directory_complete(&self, _report: &crate::importer::DirectoryReport) {}
}

/// Discards progress.
pub struct NoProgress;

impl ImportProgress for NoProgress {}

/// Logs progress through `tracing`.
pub struct TracingProgress;

impl ImportProgress for TracingProgress {
    fn on_start(&self, path: &Path) {
        info!(file = %path.display(), "importing");
    }

    fn on_complete(&self, batch: &ImportBatch) {
        let file = batch.source_path.display();
        match batch.status {
            ImportStatus::Verified => info!(
                %file,
                batch = %batch.batch_id,
                rows = batch.stored_row_count.unwrap_or_default(),
                "import verified"
            ),
            ImportStatus::Mismatched => warn!(
                %file,
                batch = %batch.batch_id,
                expected = batch.expected_row_count.unwrap_or_default(),
                stored = batch.stored_row_count.unwrap_or_default(),
                "import row count mismatch"
            ),
            ImportStatus::Failed => warn!(
                %file,
                batch = %batch.batch_id,
                failure = %batch.failure.as_ref().map(|f| f.to_string()).unwrap_or_default(),
                "import failed"
            ),
            ImportStatus::Skipped => debug!(%file, "already imported"),
            ImportStatus::Pending | ImportStatus::Cancelled => {}
        }
    }

    fn on_directory_complete(&self, report: &crate::importer::DirectoryReport) {
        info!(
            files = report.batches.len(),
            verified = report.count(ImportStatus::Verified),
            mismatched = report.count(ImportStatus::Mismatched),
            failed = report.count(ImportStatus::Failed),
            skipped = report.count(ImportStatus::Skipped),
            cancelled = report.count(ImportStatus::Cancelled),
            "directory import finished"
        );
    }
}
