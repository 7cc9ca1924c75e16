//! Batch importer: source file → contract → clean → upload/append → verify.
//!
//! Every file yields exactly one [`ImportBatch`]; a bad file never stops a
//! directory import. Store calls made while writing are retried under the
//! configured [`RetryPolicy`](crate::retry::RetryPolicy); a retry never
//! starts while the timed-out attempt it replaces is still running.

use crate::batch::{ImportBatch, ImportFailure, ImportStage, ImportStatus};
use crate::config::{ConfigError, ImportConfig};
use crate::ledger::ImportLedger;
use crate::progress::{ImportProgress, NoProgress};
use optbase_core::data::{CsvIngestor, DataCleaner};
use optbase_core::query::{contract_filter, DeleteStatement, QueryEngine, QueryError};
use optbase_core::store::{
    Connector, LifecycleError, LifecycleManager, Session, StoreError, UploadChunk,
};
use optbase_core::{symbol, OptionBar, OptionIdentity};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// What to do with rows already stored for a contract being imported again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReimportPolicy {
    /// Delete the contract's stored rows, then write the new ones.
    #[default]
    Replace,
    /// Keep stored rows; write only rows at timestamps not yet stored.
    MergeByTimestamp,
}

/// Errors that stop an import before any file is processed.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cannot list {path}: {source}")]
    ListDir {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read import ledger {path}: {source}")]
    Ledger {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot start import workers: {0}")]
    Workers(String),
}

/// Cooperative, file-granular cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Outcome of a directory import.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DirectoryReport {
    /// One batch per source file, in file order. Files skipped on resume or
    /// never started after cancellation carry `Skipped` / `Cancelled`.
    pub batches: Vec<ImportBatch>,
}

impl DirectoryReport {
    pub fn count(&self, status: ImportStatus) -> usize {
        self.batches.iter().filter(|b| b.status == status).count()
    }

    /// Source files with the given status.
    pub fn paths(&self, status: ImportStatus) -> Vec<&Path> {
        self.batches
            .iter()
            .filter(|b| b.status == status)
            .map(|b| b.source_path.as_path())
            .collect()
    }
}

/// A failed store call and the step it belonged to.
#[derive(Debug)]
struct StepError {
    stage: ImportStage,
    error: StoreError,
}

impl StepError {
    fn at(stage: ImportStage) -> impl Fn(StoreError) -> Self {
        move |error| Self { stage, error }
    }

    fn from_query(stage: ImportStage) -> impl Fn(QueryError) -> Self {
        move |e| match e {
            QueryError::Store(error) => Self { stage, error },
            other => Self {
                stage,
                error: StoreError::Corrupt(other.to_string()),
            },
        }
    }

    fn is_transient(&self) -> bool {
        self.error.is_transient()
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.stage, self.error)
    }
}

impl From<StepError> for ImportFailure {
    fn from(e: StepError) -> Self {
        ImportFailure::new(e.stage, e.error)
    }
}

pub struct BatchImporter {
    config: ImportConfig,
    lifecycle: LifecycleManager,
    engine: QueryEngine,
    cleaner: DataCleaner,
    ingestor: CsvIngestor,
    ledger: Option<ImportLedger>,
    progress: Arc<dyn ImportProgress>,
}

impl BatchImporter {
    pub fn new(config: ImportConfig) -> Result<Self, ImportError> {
        config.validate()?;
        Ok(Self {
            lifecycle: LifecycleManager::new(&config.database, &config.table)?,
            engine: QueryEngine::new(&config.database, &config.table)?,
            cleaner: DataCleaner::new(config.cleaning.clone()),
            ingestor: CsvIngestor::new(),
            ledger: None,
            progress: Arc::new(NoProgress),
            config,
        })
    }

    pub fn with_ledger(mut self, ledger: ImportLedger) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn with_progress(mut self, progress: Arc<dyn ImportProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn config(&self) -> &ImportConfig {
        &self.config
    }

    pub fn lifecycle(&self) -> &LifecycleManager {
        &self.lifecycle
    }

    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    pub fn ledger(&self) -> Option<&ImportLedger> {
        self.ledger.as_ref()
    }

    /// Create the database and table if needed.
    pub fn prepare(&self, session: &Session) -> Result<(), ImportError> {
        self.lifecycle.ensure_all(session, self.config.scheme())?;
        Ok(())
    }

    /// Import one file. Never fails: problems are recorded in the batch.
    pub fn import_file(&self, path: &Path, session: &Session) -> ImportBatch {
        self.progress.on_start(path);
        let mut batch = ImportBatch::start(path);
        let batch = match self.run_file(path, session, &mut batch) {
            Ok((expected, stored)) => batch.verify(expected, stored),
            Err(failure) => batch.fail(failure),
        };
        self.record(&batch);
        self.progress.on_complete(&batch);
        batch
    }

    /// Import every `.csv` file in `dir`, in name order.
    pub fn import_directory(
        &self,
        dir: &Path,
        connector: &dyn Connector,
    ) -> Result<DirectoryReport, ImportError> {
        self.import_directory_with_cancel(dir, connector, &CancelToken::new())
    }

    pub fn import_directory_with_cancel(
        &self,
        dir: &Path,
        connector: &dyn Connector,
        cancel: &CancelToken,
    ) -> Result<DirectoryReport, ImportError> {
        let files = list_sources(dir)?;
        let session = connector.connect()?;
        // Schema is settled once, before any worker starts.
        self.prepare(&session)?;

        let mut report = DirectoryReport::default();
        let pending = self.skip_verified(files, &mut report)?;
        info!(
            dir = %dir.display(),
            files = pending.len(),
            skipped = report.batches.len(),
            workers = self.config.workers,
            "importing directory"
        );

        let outcomes: Vec<ImportBatch> = if self.config.workers > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.config.workers)
                .thread_name(|i| format!("optbase-import-{i}"))
                .build()
                .map_err(|e| ImportError::Workers(e.to_string()))?;
            pool.install(|| {
                pending
                    .into_par_iter()
                    .map_init(
                        || connector.connect(),
                        |worker, path| self.import_in_worker(&path, worker, cancel),
                    )
                    .collect()
            })
        } else {
            let mut worker = Ok(session);
            pending
                .into_iter()
                .map(|path| self.import_in_worker(&path, &mut worker, cancel))
                .collect()
        };

        report.batches.extend(outcomes);
        // Skipped batches were collected first; restore file order.
        report.batches.sort_by(|a, b| a.source_path.cmp(&b.source_path));
        let cancelled = report.count(ImportStatus::Cancelled);
        if cancelled > 0 {
            warn!(cancelled, "directory import cancelled");
        }
        self.progress.on_directory_complete(&report);
        Ok(report)
    }

    fn import_in_worker(
        &self,
        path: &Path,
        worker: &mut Result<Session, StoreError>,
        cancel: &CancelToken,
    ) -> ImportBatch {
        if cancel.is_cancelled() {
            return ImportBatch::start(path).cancel();
        }
        match worker {
            Ok(session) => self.import_file(path, session),
            Err(e) => {
                let batch = ImportBatch::start(path)
                    .fail(ImportFailure::new(ImportStage::Upload, format!("connect: {e}")));
                self.record(&batch);
                self.progress.on_complete(&batch);
                batch
            }
        }
    }

    fn skip_verified(
        &self,
        files: Vec<PathBuf>,
        report: &mut DirectoryReport,
    ) -> Result<Vec<PathBuf>, ImportError> {
        let ledger = match (&self.ledger, self.config.resume) {
            (Some(ledger), true) => ledger,
            _ => return Ok(files),
        };
        let verified = ledger.verified_hashes().map_err(|source| ImportError::Ledger {
            path: ledger.path().display().to_string(),
            source,
        })?;
        let mut pending = Vec::with_capacity(files.len());
        for path in files {
            match source_hash(&path) {
                Ok(hash) if verified.contains(&hash) => {
                    debug!(file = %path.display(), "already imported, skipping");
                    report.batches.push(ImportBatch::start(&path).skip(hash));
                }
                _ => pending.push(path),
            }
        }
        Ok(pending)
    }

    /// Returns `(expected, stored)` row counts for the verification.
    fn run_file(
        &self,
        path: &Path,
        session: &Session,
        batch: &mut ImportBatch,
    ) -> Result<(usize, usize), ImportFailure> {
        let identity = symbol::parse_filename(path).map_err(|e| ImportFailure::parse(&e))?;
        batch.contract = Some(identity.clone());

        let bytes = fs::read(path).map_err(|e| ImportFailure::new(ImportStage::Read, e))?;
        batch.source_hash = Some(blake3::hash(&bytes).to_hex().to_string());
        let records = self
            .ingestor
            .read(bytes.as_slice())
            .map_err(|e| ImportFailure::new(ImportStage::Read, e))?;
        batch.row_count_in = records.len();

        let (bars, report) = self.cleaner.clean(&records, &identity);
        batch.diagnostics = Some(report);

        let (bars, expected) = match self.config.reimport {
            ReimportPolicy::Replace => {
                let deleted = self.delete_contract(session, &identity)?;
                if deleted > 0 {
                    info!(contract = %identity, deleted, "replacing stored rows");
                }
                let expected = bars.len();
                (bars, expected)
            }
            ReimportPolicy::MergeByTimestamp => {
                let stored: HashSet<i64> = self.stored_timestamps(session, &identity)?.into_iter().collect();
                let expected = stored.len()
                    + bars
                        .iter()
                        .map(|b| b.timestamp)
                        .collect::<BTreeSet<_>>()
                        .iter()
                        .filter(|ts| !stored.contains(ts))
                        .count();
                let fresh: Vec<OptionBar> = bars
                    .into_iter()
                    .filter(|b| !stored.contains(&b.timestamp))
                    .collect();
                (fresh, expected)
            }
        };

        for (index, rows) in bars.chunks(self.config.chunk_size).enumerate() {
            let chunk = UploadChunk::new(identity.clone(), rows.to_vec())
                .map_err(|e| ImportFailure::new(ImportStage::Clean, e))?;
            let (result, attempts) = self.config.retry.run("append", StepError::is_transient, |attempt| {
                debug!(contract = %identity, chunk = index, key = %chunk.key, attempt, "appending chunk");
                self.write_chunk(session, &chunk)
            });
            batch.attempts += attempts;
            batch.row_count_imported += result?;
        }

        let stored = self.count_stored(session, &identity)?;
        Ok((expected, stored))
    }

    fn write_chunk(&self, session: &Session, chunk: &UploadChunk) -> Result<usize, StepError> {
        let database = self.lifecycle.database().clone();
        let table = self.lifecycle.table().clone();

        let db = database.clone();
        let upload = chunk.clone();
        let handle = session
            .call(move |store| store.upload(&db, &upload))
            .map_err(StepError::at(ImportStage::Upload))?;
        session
            .call(move |store| store.append(&database, &table, &handle))
            .map_err(StepError::at(ImportStage::Append))
    }

    fn delete_contract(&self, session: &Session, identity: &OptionIdentity) -> Result<usize, StepError> {
        let statement = DeleteStatement {
            database: self.lifecycle.database().clone(),
            table: self.lifecycle.table().clone(),
            filter: contract_filter(identity),
        };
        debug!(statement = %statement.render(), "delete");
        let (result, _) = self.config.retry.run("delete", StepError::is_transient, |_| {
            let statement = statement.clone();
            session
                .call(move |store| store.delete(&statement))
                .map_err(StepError::at(ImportStage::Append))
        });
        result
    }

    fn stored_timestamps(&self, session: &Session, identity: &OptionIdentity) -> Result<Vec<i64>, StepError> {
        let (result, _) = self.config.retry.run("stored timestamps", StepError::is_transient, |_| {
            self.engine
                .contract_timestamps(session, identity)
                .map_err(StepError::from_query(ImportStage::Append))
        });
        result
    }

    fn count_stored(&self, session: &Session, identity: &OptionIdentity) -> Result<usize, StepError> {
        let (result, _) = self.config.retry.run("verify", StepError::is_transient, |_| {
            self.engine
                .count_contract(session, identity)
                .map_err(StepError::from_query(ImportStage::Verify))
        });
        result
    }

    fn record(&self, batch: &ImportBatch) {
        if let Some(ledger) = &self.ledger {
            if let Err(e) = ledger.append(batch) {
                warn!(ledger = %ledger.path().display(), error = %e, "cannot record import");
            }
        }
    }
}

/// `.csv` files directly under `dir`, hidden files excluded, sorted by name.
pub fn list_sources(dir: &Path) -> Result<Vec<PathBuf>, ImportError> {
    let list_err = |source| ImportError::ListDir {
        path: dir.display().to_string(),
        source,
    };
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(list_err)? {
        let path = entry.map_err(list_err)?.path();
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if path.is_file() && is_csv && !name.starts_with('.') {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// BLAKE3 of a file's bytes, hex.
pub fn source_hash(path: &Path) -> std::io::Result<String> {
    Ok(blake3::hash(&fs::read(path)?).to_hex().to_string())
}
