//! Import ledger: JSONL append-only record of finished imports.
//!
//! One [`ImportBatch`] per line. Used to resume a directory import without
//! re-importing files whose exact content was already verified.

use crate::batch::{ImportBatch, ImportStatus};
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;

pub struct ImportLedger {
    path: PathBuf,
    // Serializes appends from parallel workers.
    lock: Mutex<()>,
}

impl ImportLedger {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append a finished batch.
    pub fn append(&self, batch: &ImportBatch) -> io::Result<()> {
        let json = serde_json::to_string(batch)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{json}")?;
        file.flush()
    }

    /// Read all entries. Malformed lines (a torn final write) are skipped.
    pub fn read_all(&self) -> io::Result<Vec<ImportBatch>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let reader = io::BufReader::new(fs::File::open(&self.path)?);
        let mut entries = Vec::new();
        for (n, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ImportBatch>(&line) {
                Ok(entry) => entries.push(entry),
                Err(e) => warn!(ledger = %self.path.display(), line = n + 1, error = %e, "skipping malformed ledger line"),
            }
        }
        Ok(entries)
    }

    /// Forget every entry.
    pub fn clear(&self) -> io::Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    /// Source hashes with a `Verified` entry.
    pub fn verified_hashes(&self) -> io::Result<HashSet<String>> {
        Ok(self
            .read_all()?
            .into_iter()
            .filter(|b| b.status == ImportStatus::Verified)
            .filter_map(|b| b.source_hash)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{ImportFailure, ImportStage};

    fn batch(hash: &str) -> ImportBatch {
        let mut b = ImportBatch::start(Path::new("x.csv"));
        b.source_hash = Some(hash.to_string());
        b
    }

    #[test]
    fn missing_ledger_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ImportLedger::new(dir.path().join("nope.jsonl"));
        assert!(ledger.read_all().unwrap().is_empty());
    }

    #[test]
    fn only_verified_hashes_resume() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ImportLedger::new(dir.path().join("sub/imports.jsonl"));
        ledger.append(&batch("aaa").verify(1, 1)).unwrap();
        ledger.append(&batch("bbb").verify(2, 1)).unwrap();
        ledger
            .append(&batch("ccc").fail(ImportFailure::new(ImportStage::Append, "busy")))
            .unwrap();

        assert_eq!(ledger.read_all().unwrap().len(), 3);
        let hashes = ledger.verified_hashes().unwrap();
        assert_eq!(hashes, HashSet::from(["aaa".to_string()]));

        ledger.clear().unwrap();
        assert!(ledger.verified_hashes().unwrap().is_empty());
        ledger.clear().unwrap();
    }

    #[test]
    fn torn_line_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = ImportLedger::new(dir.path().join("imports.jsonl"));
        ledger.append(&batch("aaa").verify(1, 1)).unwrap();
        let mut file = OpenOptions::new().append(true).open(ledger.path()).unwrap();
        write!(file, "{{\"batch_id\": \"trunc").unwrap();

        assert_eq!(ledger.read_all().unwrap().len(), 1);
    }
}
