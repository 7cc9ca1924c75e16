//! The pipeline's outward operations over one store.

use crate::batch::ImportBatch;
use crate::config::ImportConfig;
use crate::importer::{BatchImporter, CancelToken, DirectoryReport, ImportError};
use crate::ledger::ImportLedger;
use crate::progress::TracingProgress;
use optbase_core::query::{QueryEngine, QueryError, RangeQuery, TimeBound};
use optbase_core::store::{Destructive, ParquetStore, PartitionScheme, Session};
use optbase_core::OptionType;
use polars::prelude::DataFrame;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Import and query option bars in one store.
pub struct OptionDataService {
    session: Session,
    importer: BatchImporter,
}

impl OptionDataService {
    /// Open (or create) a Parquet warehouse at `store_dir`. The import
    /// ledger lives beside it unless the config names one.
    pub fn open(store_dir: &Path, config: ImportConfig) -> Result<Self, ImportError> {
        let store = ParquetStore::open(store_dir)?;
        let session = Session::new(Arc::new(store)).with_timeout(config.store_timeout());
        let ledger = ImportLedger::new(config.ledger_path_for(store_dir));
        let importer = BatchImporter::new(config)?
            .with_ledger(ledger)
            .with_progress(Arc::new(TracingProgress));
        Ok(Self { session, importer })
    }

    /// Use an existing session (any `Store` backend). No ledger unless the
    /// config names one.
    pub fn with_session(session: Session, config: ImportConfig) -> Result<Self, ImportError> {
        let ledger = config.ledger_path.clone().map(ImportLedger::new);
        let mut importer = BatchImporter::new(config)?.with_progress(Arc::new(TracingProgress));
        if let Some(ledger) = ledger {
            importer = importer.with_ledger(ledger);
        }
        Ok(Self { session, importer })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn engine(&self) -> &QueryEngine {
        self.importer.engine()
    }

    pub fn config(&self) -> &ImportConfig {
        self.importer.config()
    }

    /// Create the database and table if needed.
    pub fn init(&self) -> Result<(), ImportError> {
        self.importer.prepare(&self.session)
    }

    /// Drop everything and recreate the database with `buckets` hash buckets.
    /// Clears the import ledger, since none of its imports survive.
    pub fn repartition(&self, buckets: u32, confirm: Destructive) -> Result<(), ImportError> {
        let scheme = PartitionScheme::new(buckets);
        self.importer
            .lifecycle()
            .recreate(&self.session, scheme, confirm)?;
        if let Some(ledger) = self.importer.ledger() {
            ledger.clear().map_err(|source| ImportError::Ledger {
                path: ledger.path().display().to_string(),
                source,
            })?;
        }
        if scheme != self.config().scheme() {
            warn!(%scheme, configured = %self.config().scheme(), "update `buckets` in the config to keep importing");
        }
        info!(%scheme, "repartitioned");
        Ok(())
    }

    pub fn import_option_csv(&self, path: &Path) -> Result<ImportBatch, ImportError> {
        self.init()?;
        Ok(self.importer.import_file(path, &self.session))
    }

    /// One batch per source file in `dir`, in file order, including files
    /// skipped on resume.
    pub fn import_option_directory(&self, dir: &Path) -> Result<Vec<ImportBatch>, ImportError> {
        Ok(self.import_directory_report(dir, &CancelToken::new())?.batches)
    }

    /// Directory import that can be cancelled between files.
    pub fn import_directory_report(
        &self,
        dir: &Path,
        cancel: &CancelToken,
    ) -> Result<DirectoryReport, ImportError> {
        self.importer
            .import_directory_with_cancel(dir, &self.session, cancel)
    }

    /// Bars for `symbol` (`AAPL` or `AAPL*`) in the closed range, as a frame.
    pub fn get_option_data(
        &self,
        symbol: &str,
        start: impl Into<TimeBound>,
        end: impl Into<TimeBound>,
        option_type: Option<OptionType>,
    ) -> Result<DataFrame, QueryError> {
        let request = RangeQuery::new(symbol, start, end).option_type(option_type);
        self.engine().query_frame(&self.session, &request)
    }
}
