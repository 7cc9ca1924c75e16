//! Local Parquet warehouse with Hive-style partitioning.
//!
//! Layout:
//! ```text
//! {root}/{database}/_database.json
//! {root}/{database}/{table}/_schema.json
//! {root}/{database}/{table}/bucket={NN}/date={YYYY-MM-DD}/{contract}_{chunk}.parquet
//! {root}/{database}/_staging/{upload-id}.parquet
//! ```
//!
//! Every file is written to its own `.tmp` sibling and renamed into place, so
//! readers never see a partial file and a replayed append overwrites its
//! earlier output. Concurrent writers of one file never share a tmp path.

use super::frame::{bars_to_frame, date_of, rows_from_frame, StoredRow};
use super::{PartitionScheme, Store, StoreError, TableState, UploadChunk, UploadHandle};
use crate::domain::OptionBar;
use crate::query::builder::{DeleteStatement, Filter, Ident, SchemaStatement, SelectQuery};
use crate::symbol;
use chrono::NaiveDate;
use polars::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

const DATABASE_META: &str = "_database.json";
const SCHEMA_META: &str = "_schema.json";
const STAGING_DIR: &str = "_staging";

/// The Parquet warehouse.
#[derive(Debug)]
pub struct ParquetStore {
    root: PathBuf,
}

impl ParquetStore {
    /// Open (creating if needed) a warehouse rooted at `root`.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|e| StoreError::io(&root, e))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn database_dir(&self, database: &Ident) -> PathBuf {
        self.root.join(database.as_str())
    }

    fn table_dir(&self, database: &Ident, table: &Ident) -> PathBuf {
        self.database_dir(database).join(table.as_str())
    }

    fn staging_path(&self, database: &Ident, upload_id: &str) -> PathBuf {
        self.database_dir(database)
            .join(STAGING_DIR)
            .join(format!("{upload_id}.parquet"))
    }

    fn partition_dir(table_dir: &Path, bucket: u32, date: NaiveDate) -> PathBuf {
        table_dir
            .join(format!("bucket={bucket:02}"))
            .join(format!("date={}", date.format("%Y-%m-%d")))
    }

    fn require_scheme(&self, database: &Ident) -> Result<PartitionScheme, StoreError> {
        self.database(database)?
            .ok_or_else(|| StoreError::DatabaseNotFound(database.to_string()))
    }

    fn require_table(&self, database: &Ident, table: &Ident) -> Result<PathBuf, StoreError> {
        match self.table_state(database, table)? {
            TableState::Present(_) => Ok(self.table_dir(database, table)),
            _ => Err(StoreError::TableNotFound {
                database: database.to_string(),
                table: table.to_string(),
            }),
        }
    }

    /// Data files that can hold rows matching `filter`.
    fn partition_files(
        &self,
        table_dir: &Path,
        scheme: &PartitionScheme,
        filter: &Filter,
    ) -> Result<Vec<PathBuf>, StoreError> {
        let bucket_dirs: Vec<PathBuf> = match filter.exact_symbol() {
            Some(symbol) => vec![table_dir.join(format!("bucket={:02}", scheme.bucket_for(symbol)))],
            None => list_dirs(table_dir, "bucket=")?,
        };
        let dates = filter.date_range();

        let mut files = Vec::new();
        for bucket_dir in bucket_dirs {
            if !bucket_dir.is_dir() {
                continue;
            }
            for date_dir in list_dirs(&bucket_dir, "date=")? {
                if let Some((start, end)) = dates {
                    let date = date_dir
                        .file_name()
                        .and_then(|n| n.to_str())
                        .and_then(|n| n.strip_prefix("date="))
                        .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
                    if matches!(date, Some(d) if d < start || d > end) {
                        continue;
                    }
                }
                files.extend(list_parquet(&date_dir)?);
            }
        }
        files.sort();
        Ok(files)
    }

    fn scan(&self, query: &SelectQuery) -> Result<Vec<StoredRow>, StoreError> {
        let scheme = self.require_scheme(&query.database)?;
        let table_dir = self.require_table(&query.database, &query.table)?;

        let mut rows = Vec::new();
        for path in self.partition_files(&table_dir, &scheme, &query.filter)? {
            rows.extend(
                read_parquet(&path)?
                    .into_iter()
                    .filter(|r| query.filter.matches(r)),
            );
        }
        Ok(rows)
    }
}

impl Store for ParquetStore {
    fn describe(&self) -> String {
        format!("parquet:{}", self.root.display())
    }

    fn database(&self, database: &Ident) -> Result<Option<PartitionScheme>, StoreError> {
        let path = self.database_dir(database).join(DATABASE_META);
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(&path).map_err(|e| StoreError::io(&path, e))?;
        Ok(Some(serde_json::from_str(&content)?))
    }

    fn table_state(&self, database: &Ident, table: &Ident) -> Result<TableState, StoreError> {
        let dir = self.table_dir(database, table);
        let meta = dir.join(SCHEMA_META);
        if meta.exists() {
            let content = fs::read_to_string(&meta).map_err(|e| StoreError::io(&meta, e))?;
            return Ok(TableState::Present(serde_json::from_str(&content)?));
        }
        if dir.is_dir() && !list_dirs(&dir, "bucket=")?.is_empty() {
            return Ok(TableState::Partial);
        }
        Ok(TableState::Missing)
    }

    fn execute(&self, statement: &SchemaStatement) -> Result<(), StoreError> {
        debug!(statement = %statement.render(), "execute");
        match statement {
            SchemaStatement::CreateDatabase { database, scheme } => {
                let dir = self.database_dir(database);
                fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
                write_json(&dir.join(DATABASE_META), scheme)
            }
            SchemaStatement::DropDatabase { database } => {
                let dir = self.database_dir(database);
                if dir.exists() {
                    fs::remove_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
                }
                Ok(())
            }
            SchemaStatement::CreateTable {
                database,
                table,
                schema,
            } => {
                self.require_scheme(database)?;
                let dir = self.table_dir(database, table);
                fs::create_dir_all(&dir).map_err(|e| StoreError::io(&dir, e))?;
                write_json(&dir.join(SCHEMA_META), schema)
            }
        }
    }

    fn upload(&self, database: &Ident, chunk: &UploadChunk) -> Result<UploadHandle, StoreError> {
        self.require_scheme(database)?;
        let id = format!("{}_{}", chunk.identity.code(), chunk.key);
        let df = bars_to_frame(&chunk.identity, &chunk.bars)?;
        write_parquet_atomic(&df, &self.staging_path(database, &id))?;
        Ok(UploadHandle {
            id,
            rows: chunk.bars.len(),
        })
    }

    fn append(
        &self,
        database: &Ident,
        table: &Ident,
        upload: &UploadHandle,
    ) -> Result<usize, StoreError> {
        let scheme = self.require_scheme(database)?;
        let table_dir = self.require_table(database, table)?;
        let staged = self.staging_path(database, &upload.id);
        if !staged.exists() {
            return Err(StoreError::UploadNotFound(upload.id.clone()));
        }

        let rows = read_parquet(&staged)?;
        let mut partitions: BTreeMap<(u32, NaiveDate), Vec<StoredRow>> = BTreeMap::new();
        for row in rows {
            let date = date_of(row.bar.timestamp).ok_or_else(|| {
                StoreError::Corrupt(format!("timestamp {} out of range", row.bar.timestamp))
            })?;
            partitions
                .entry((scheme.bucket_for(&row.symbol), date))
                .or_default()
                .push(row);
        }

        let mut appended = 0;
        for ((bucket, date), rows) in partitions {
            let path = Self::partition_dir(&table_dir, bucket, date).join(format!("{}.parquet", upload.id));
            appended += rows.len();
            write_rows(&path, rows)?;
        }

        consume_staged(&staged)?;
        debug!(upload = %upload.id, rows = appended, "appended");
        Ok(appended)
    }

    fn delete(&self, statement: &DeleteStatement) -> Result<usize, StoreError> {
        debug!(statement = %statement.render(), "execute");
        let scheme = self.require_scheme(&statement.database)?;
        let table_dir = self.require_table(&statement.database, &statement.table)?;

        let mut deleted = 0;
        for path in self.partition_files(&table_dir, &scheme, &statement.filter)? {
            let (removed, kept): (Vec<StoredRow>, Vec<StoredRow>) = read_parquet(&path)?
                .into_iter()
                .partition(|r| statement.filter.matches(r));
            if removed.is_empty() {
                continue;
            }
            deleted += removed.len();
            if kept.is_empty() {
                fs::remove_file(&path).map_err(|e| StoreError::io(&path, e))?;
            } else {
                write_rows(&path, kept)?;
            }
        }
        Ok(deleted)
    }

    fn select(&self, query: &SelectQuery) -> Result<Vec<StoredRow>, StoreError> {
        debug!(query = %query.render(), "select");
        let mut rows = self.scan(query)?;
        rows.sort_by(|a, b| {
            a.bar
                .contract
                .cmp(&b.bar.contract)
                .then(a.bar.timestamp.cmp(&b.bar.timestamp))
        });
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    fn count(&self, query: &SelectQuery) -> Result<usize, StoreError> {
        debug!(query = %query.render(), "count");
        Ok(self.scan(query)?.len())
    }
}

// ── File helpers ────────────────────────────────────────────────────

fn list_dirs(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>, StoreError> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
        let path = entry.map_err(|e| StoreError::io(dir, e))?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(prefix));
        if matches && path.is_dir() {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

fn list_parquet(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let mut out = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| StoreError::io(dir, e))? {
        let path = entry.map_err(|e| StoreError::io(dir, e))?.path();
        // Skip .tmp leftovers from interrupted writes
        if path.extension().and_then(|e| e.to_str()) == Some("parquet") {
            out.push(path);
        }
    }
    Ok(out)
}

/// Remove a staged upload after its rows landed. A replay of the same append
/// may have removed it first.
fn consume_staged(staged: &Path) -> Result<(), StoreError> {
    match fs::remove_file(staged) {
        Err(e) if e.kind() != ErrorKind::NotFound => Err(StoreError::io(staged, e)),
        _ => Ok(()),
    }
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// `{file}.{pid}-{seq}.tmp`, unique per write within this process.
fn tmp_path(path: &Path) -> PathBuf {
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("write");
    path.with_file_name(format!("{name}.{}-{seq}.tmp", std::process::id()))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let tmp = tmp_path(path);
    fs::write(&tmp, serde_json::to_string_pretty(value)?).map_err(|e| StoreError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StoreError::io(path, e)
    })
}

/// Write the rows of one contract partition file.
fn write_rows(path: &Path, rows: Vec<StoredRow>) -> Result<(), StoreError> {
    let Some(first) = rows.first() else {
        return Ok(());
    };
    let identity = symbol::parse(&first.bar.contract)
        .map_err(|e| StoreError::Corrupt(format!("stored contract: {e}")))?;
    let bars: Vec<OptionBar> = rows.into_iter().map(|r| r.bar).collect();
    write_parquet_atomic(&bars_to_frame(&identity, &bars)?, path)
}

fn write_parquet_atomic(df: &DataFrame, path: &Path) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
    }
    let tmp = tmp_path(path);
    let file = fs::File::create(&tmp).map_err(|e| StoreError::io(&tmp, e))?;
    ParquetWriter::new(file).finish(&mut df.clone())?;

    fs::rename(&tmp, path).map_err(|e| {
        let _ = fs::remove_file(&tmp);
        StoreError::io(path, e)
    })
}

fn read_parquet(path: &Path) -> Result<Vec<StoredRow>, StoreError> {
    let file = fs::File::open(path).map_err(|e| StoreError::io(path, e))?;
    let df = ParquetReader::new(file).finish()?;
    rows_from_frame(&df).map_err(|e| StoreError::Corrupt(format!("{}: {e}", path.display())))
}
