//! End-to-end import tests against a Parquet warehouse in a temp directory.

use chrono::NaiveDate;
use optbase_core::query::{DeleteStatement, Ident, SchemaStatement, SelectQuery};
use optbase_core::store::{
    ParquetStore, PartitionScheme, Session, Store, StoreError, StoredRow, TableState, UploadChunk,
    UploadHandle,
};
use optbase_core::OptionType;
use optbase_runner::{
    BatchImporter, ImportConfig, ImportStage, ImportStatus, OptionDataService, ReimportPolicy,
    RetryPolicy,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

const CALL: &str = "AAPL240119C00150000";

fn csv(rows: &[(&str, f64)]) -> String {
    let mut out = String::from("timestamp,open,high,low,close,volume,open_interest\n");
    for (ts, close) in rows {
        out.push_str(&format!(
            "{ts},{close:.2},{:.2},{:.2},{close:.2},10,100\n",
            close + 0.1,
            close - 0.1
        ));
    }
    out
}

fn minutes(n: usize) -> Vec<(String, f64)> {
    (0..n)
        .map(|i| (format!("2024-01-02 14:{:02}:00", 30 + i), 2.0 + i as f64 * 0.05))
        .collect()
}

fn write_source(dir: &Path, name: &str, rows: &[(String, f64)]) -> PathBuf {
    let rows: Vec<(&str, f64)> = rows.iter().map(|(t, c)| (t.as_str(), *c)).collect();
    fs::create_dir_all(dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, csv(&rows)).unwrap();
    path
}

fn config() -> ImportConfig {
    ImportConfig {
        retry: RetryPolicy::immediate(3),
        ..Default::default()
    }
}

/// Fails the first `fail_appends` appends with a transient error, and can
/// stall the first append, or the n-th delete, past the session timeout.
struct FlakyStore {
    inner: ParquetStore,
    fail_appends: u32,
    stall_first: Option<Duration>,
    stall_delete: Option<(u32, Duration)>,
    appends: AtomicU32,
    deletes: AtomicU32,
}

impl FlakyStore {
    fn new(root: &Path, fail_appends: u32) -> Self {
        Self {
            inner: ParquetStore::open(root).unwrap(),
            fail_appends,
            stall_first: None,
            stall_delete: None,
            appends: AtomicU32::new(0),
            deletes: AtomicU32::new(0),
        }
    }
}

impl Store for FlakyStore {
    fn describe(&self) -> String {
        format!("flaky {}", self.inner.describe())
    }

    fn database(&self, database: &Ident) -> Result<Option<PartitionScheme>, StoreError> {
        self.inner.database(database)
    }

    fn table_state(&self, database: &Ident, table: &Ident) -> Result<TableState, StoreError> {
        self.inner.table_state(database, table)
    }

    fn execute(&self, statement: &SchemaStatement) -> Result<(), StoreError> {
        self.inner.execute(statement)
    }

    fn upload(&self, database: &Ident, chunk: &UploadChunk) -> Result<UploadHandle, StoreError> {
        self.inner.upload(database, chunk)
    }

    fn append(
        &self,
        database: &Ident,
        table: &Ident,
        upload: &UploadHandle,
    ) -> Result<usize, StoreError> {
        let n = self.appends.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_appends {
            return Err(StoreError::Transient(format!("node busy ({})", n + 1)));
        }
        if n == 0 {
            if let Some(stall) = self.stall_first {
                std::thread::sleep(stall);
            }
        }
        self.inner.append(database, table, upload)
    }

    fn delete(&self, statement: &DeleteStatement) -> Result<usize, StoreError> {
        let n = self.deletes.fetch_add(1, Ordering::SeqCst);
        if let Some((at, stall)) = self.stall_delete {
            if n == at {
                std::thread::sleep(stall);
            }
        }
        self.inner.delete(statement)
    }

    fn select(&self, query: &SelectQuery) -> Result<Vec<StoredRow>, StoreError> {
        self.inner.select(query)
    }

    fn count(&self, query: &SelectQuery) -> Result<usize, StoreError> {
        self.inner.count(query)
    }
}

fn stored_rows(session: &Session, importer: &BatchImporter) -> usize {
    let identity = optbase_core::symbol::parse(CALL).unwrap();
    importer.engine().count_contract(session, &identity).unwrap()
}

#[test]
fn importing_twice_keeps_row_count() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir.path().join("src"), &format!("{CALL}.csv"), &minutes(5));
    let session = Session::new(Arc::new(ParquetStore::open(dir.path().join("wh")).unwrap()));
    let importer = BatchImporter::new(config()).unwrap();
    importer.prepare(&session).unwrap();

    let first = importer.import_file(&source, &session);
    let second = importer.import_file(&source, &session);

    assert_eq!(first.status, ImportStatus::Verified);
    assert_eq!(second.status, ImportStatus::Verified);
    assert_ne!(first.batch_id, second.batch_id);
    assert_eq!(first.source_hash, second.source_hash);
    assert_eq!(stored_rows(&session, &importer), 5);
}

#[test]
fn merge_policy_appends_only_new_timestamps() {
    let dir = tempfile::tempdir().unwrap();
    let all = minutes(6);
    let early = write_source(&dir.path().join("a"), &format!("{CALL}.csv"), &all[..4]);
    let late = write_source(&dir.path().join("b"), &format!("{CALL}.csv"), &all[2..]);

    let session = Session::new(Arc::new(ParquetStore::open(dir.path().join("wh")).unwrap()));
    let importer = BatchImporter::new(ImportConfig {
        reimport: ReimportPolicy::MergeByTimestamp,
        ..config()
    })
    .unwrap();
    importer.prepare(&session).unwrap();

    assert_eq!(importer.import_file(&early, &session).status, ImportStatus::Verified);
    let batch = importer.import_file(&late, &session);
    assert_eq!(batch.status, ImportStatus::Verified);
    assert_eq!(batch.row_count_imported, 2);
    assert_eq!(batch.expected_row_count, Some(6));
    assert_eq!(stored_rows(&session, &importer), 6);

    // and merging the same file again writes nothing
    let again = importer.import_file(&late, &session);
    assert_eq!(again.row_count_imported, 0);
    assert_eq!(stored_rows(&session, &importer), 6);
}

#[test]
fn replace_policy_supersedes_stored_rows() {
    let dir = tempfile::tempdir().unwrap();
    let all = minutes(6);
    let long = write_source(&dir.path().join("a"), &format!("{CALL}.csv"), &all);
    let short = write_source(&dir.path().join("b"), &format!("{CALL}.csv"), &all[..2]);

    let session = Session::new(Arc::new(ParquetStore::open(dir.path().join("wh")).unwrap()));
    let importer = BatchImporter::new(config()).unwrap();
    importer.prepare(&session).unwrap();

    importer.import_file(&long, &session);
    let batch = importer.import_file(&short, &session);
    assert_eq!(batch.status, ImportStatus::Verified);
    assert_eq!(stored_rows(&session, &importer), 2);
}

#[test]
fn transient_append_failures_are_retried() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir.path().join("src"), &format!("{CALL}.csv"), &minutes(4));
    let session = Session::new(Arc::new(FlakyStore::new(&dir.path().join("wh"), 2)));
    let importer = BatchImporter::new(config()).unwrap();
    importer.prepare(&session).unwrap();

    let batch = importer.import_file(&source, &session);
    assert_eq!(batch.status, ImportStatus::Verified, "{:?}", batch.failure);
    assert_eq!(batch.attempts, 3);
    assert_eq!(stored_rows(&session, &importer), 4);
}

#[test]
fn exhausted_retries_fail_at_append() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir.path().join("src"), &format!("{CALL}.csv"), &minutes(4));
    let session = Session::new(Arc::new(FlakyStore::new(&dir.path().join("wh"), 10)));
    let importer = BatchImporter::new(config()).unwrap();
    importer.prepare(&session).unwrap();

    let batch = importer.import_file(&source, &session);
    assert_eq!(batch.status, ImportStatus::Failed);
    assert_eq!(batch.attempts, 3);
    let failure = batch.failure.unwrap();
    assert_eq!(failure.stage, ImportStage::Append);
    assert!(failure.message.contains("node busy (3)"), "{}", failure.message);
}

#[test]
fn timed_out_append_is_not_duplicated() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir.path().join("src"), &format!("{CALL}.csv"), &minutes(4));
    let mut store = FlakyStore::new(&dir.path().join("wh"), 0);
    store.stall_first = Some(Duration::from_millis(300));
    let session = Session::new(Arc::new(store)).with_timeout(Duration::from_millis(200));
    let importer = BatchImporter::new(config()).unwrap();
    importer.prepare(&session).unwrap();

    // The retry waits for the stalled append, then replays it.
    let batch = importer.import_file(&source, &session);
    assert_eq!(batch.status, ImportStatus::Verified, "{:?}", batch.failure);
    assert_eq!(batch.attempts, 2);
    assert!(!session.is_busy());
    assert_eq!(stored_rows(&session, &importer), 4);
}

#[test]
fn stalled_delete_never_lands_after_new_rows() {
    let dir = tempfile::tempdir().unwrap();
    let all = minutes(5);
    let old = write_source(&dir.path().join("a"), &format!("{CALL}.csv"), &all);
    let new = write_source(&dir.path().join("b"), &format!("{CALL}.csv"), &all[..3]);

    let mut store = FlakyStore::new(&dir.path().join("wh"), 0);
    // delete #0 belongs to the first import, #1 to the second
    store.stall_delete = Some((1, Duration::from_millis(600)));
    let session = Session::new(Arc::new(store)).with_timeout(Duration::from_millis(150));
    let importer = BatchImporter::new(ImportConfig {
        retry: RetryPolicy::immediate(8),
        ..Default::default()
    })
    .unwrap();
    importer.prepare(&session).unwrap();

    assert_eq!(importer.import_file(&old, &session).status, ImportStatus::Verified);
    let batch = importer.import_file(&new, &session);
    assert_eq!(batch.status, ImportStatus::Verified, "{:?}", batch.failure);
    assert_eq!(batch.stored_row_count, Some(3));
    assert!(!session.is_busy());

    // nothing is left running that could remove the new rows
    std::thread::sleep(Duration::from_millis(700));
    assert_eq!(stored_rows(&session, &importer), 3);
}

#[test]
fn delete_outlasting_every_retry_fails_the_batch() {
    let dir = tempfile::tempdir().unwrap();
    let source = write_source(&dir.path().join("src"), &format!("{CALL}.csv"), &minutes(3));
    let mut store = FlakyStore::new(&dir.path().join("wh"), 0);
    store.stall_delete = Some((0, Duration::from_millis(800)));
    let session = Session::new(Arc::new(store)).with_timeout(Duration::from_millis(100));
    let importer = BatchImporter::new(config()).unwrap();
    importer.prepare(&session).unwrap();

    let batch = importer.import_file(&source, &session);
    assert_eq!(batch.status, ImportStatus::Failed);
    assert_eq!(batch.failure.unwrap().stage, ImportStage::Append);
    assert_eq!(batch.row_count_imported, 0);

    std::thread::sleep(Duration::from_millis(900));
    assert_eq!(stored_rows(&session, &importer), 0);
}

#[test]
fn directory_import_isolates_bad_files() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    write_source(&src, "AAPL240119C00150000.csv", &minutes(3));
    write_source(&src, "AAPL24011C00150000.csv", &minutes(3));
    fs::write(src.join("AAPL240119P00150000.csv"), "timestamp,close\n2024-01-02,1.0\n").unwrap();
    write_source(&src, "MSFT240119C00400000.csv", &minutes(2));
    fs::write(src.join("README.txt"), "not data").unwrap();

    let session = Session::new(Arc::new(ParquetStore::open(dir.path().join("wh")).unwrap()));
    let importer = BatchImporter::new(ImportConfig {
        workers: 2,
        ..config()
    })
    .unwrap();
    let report = importer.import_directory(&src, &session).unwrap();

    let outcome: Vec<(String, ImportStatus)> = report
        .batches
        .iter()
        .map(|b| {
            (
                b.source_path.file_name().unwrap().to_string_lossy().into_owned(),
                b.status,
            )
        })
        .collect();
    assert_eq!(
        outcome,
        vec![
            ("AAPL240119C00150000.csv".to_string(), ImportStatus::Verified),
            ("AAPL240119P00150000.csv".to_string(), ImportStatus::Failed),
            ("AAPL24011C00150000.csv".to_string(), ImportStatus::Failed),
            ("MSFT240119C00400000.csv".to_string(), ImportStatus::Verified),
        ]
    );
    assert_eq!(report.batches[1].failure.as_ref().unwrap().stage, ImportStage::Read);
    assert_eq!(report.batches[2].failure.as_ref().unwrap().stage, ImportStage::Parse);
    assert_eq!(report.count(ImportStatus::Verified), 2);
}

#[test]
fn resume_skips_verified_content() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    write_source(&src, "AAPL240119C00150000.csv", &minutes(3));
    let put = write_source(&src, "AAPL240119P00150000.csv", &minutes(3));

    let service = OptionDataService::open(
        &dir.path().join("wh"),
        ImportConfig {
            resume: true,
            ..config()
        },
    )
    .unwrap();

    let first = service.import_option_directory(&src).unwrap();
    assert_eq!(first.len(), 2);

    // every file still gets an outcome
    let second = service.import_option_directory(&src).unwrap();
    assert_eq!(second.len(), 2);
    assert!(second.iter().all(|b| b.status == ImportStatus::Skipped));
    assert_eq!(second[0].source_hash, first[0].source_hash);

    // changed content is imported again
    write_source(&src, "AAPL240119P00150000.csv", &minutes(4));
    let token = optbase_runner::CancelToken::new();
    let third = service.import_directory_report(&src, &token).unwrap();
    assert_eq!(third.batches.len(), 2);
    assert_eq!(third.count(ImportStatus::Skipped), 1);
    assert_eq!(third.batches[1].source_path, put);
    assert_eq!(third.batches[1].status, ImportStatus::Verified);
    assert_eq!(third.batches[1].stored_row_count, Some(4));
}

#[test]
fn cancelled_directory_import_reports_every_file() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    write_source(&src, "AAPL240119C00150000.csv", &minutes(3));
    write_source(&src, "MSFT240119C00400000.csv", &minutes(2));

    let service = OptionDataService::open(&dir.path().join("wh"), config()).unwrap();
    let token = optbase_runner::CancelToken::new();
    token.cancel();
    let report = service.import_directory_report(&src, &token).unwrap();
    assert_eq!(report.batches.len(), 2);
    assert_eq!(report.count(ImportStatus::Cancelled), 2);
    assert_eq!(
        report.paths(ImportStatus::Cancelled)[1].file_name().unwrap(),
        "MSFT240119C00400000.csv"
    );
}

#[test]
fn service_imports_and_queries() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    let call = write_source(&src, "AAPL240119C00150000.csv", &minutes(3));
    write_source(&src, "AAPL240119P00150000.csv", &minutes(2));

    let service = OptionDataService::open(&dir.path().join("wh"), config()).unwrap();
    assert_eq!(service.import_option_csv(&call).unwrap().status, ImportStatus::Verified);
    service.import_option_directory(&src).unwrap();

    let day = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    let calls = service
        .get_option_data("AAPL", day, day, Some(OptionType::Call))
        .unwrap();
    assert_eq!(calls.height(), 3);
    let all = service.get_option_data("aapl", day, day, None).unwrap();
    assert_eq!(all.height(), 5);

    let next = NaiveDate::from_ymd_opt(2024, 1, 3).unwrap();
    assert_eq!(service.get_option_data("AAPL", next, next, None).unwrap().height(), 0);
}

#[test]
fn repartition_clears_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("src");
    write_source(&src, "AAPL240119C00150000.csv", &minutes(3));

    let service = OptionDataService::open(
        &dir.path().join("wh"),
        ImportConfig {
            resume: true,
            ..config()
        },
    )
    .unwrap();
    service.import_option_directory(&src).unwrap();

    service
        .repartition(10, optbase_core::store::Destructive::Confirmed)
        .unwrap();
    let again = service.import_option_directory(&src).unwrap();
    assert_eq!(again.len(), 1);
    assert_eq!(again[0].status, ImportStatus::Verified);
}
