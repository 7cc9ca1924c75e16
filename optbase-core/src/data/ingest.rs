use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Columns every source file must carry.
pub const REQUIRED_COLUMNS: [&str; 6] = ["timestamp", "open", "high", "low", "close", "volume"];

/// One CSV row, fields kept as text until the coercion stage.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    /// 1-based line number in the source file.
    pub line: u64,
    pub timestamp: String,
    pub open: Option<String>,
    pub high: Option<String>,
    pub low: Option<String>,
    pub close: Option<String>,
    pub volume: Option<String>,
    pub open_interest: Option<String>,
    pub vwap: Option<String>,
    pub transactions: Option<String>,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("missing required column '{0}'")]
    MissingColumn(String),
}

/// Column positions resolved from the header row.
#[derive(Debug, Default)]
struct ColumnMap {
    timestamp: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    volume: usize,
    open_interest: Option<usize>,
    vwap: Option<usize>,
    transactions: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, IngestError> {
        let names: Vec<String> = headers.iter().map(|h| h.trim().to_ascii_lowercase()).collect();
        let require = |name: &str| {
            position(&names, &[name]).ok_or_else(|| IngestError::MissingColumn(name.to_string()))
        };

        Ok(Self {
            timestamp: require(REQUIRED_COLUMNS[0])?,
            open: require(REQUIRED_COLUMNS[1])?,
            high: require(REQUIRED_COLUMNS[2])?,
            low: require(REQUIRED_COLUMNS[3])?,
            close: require(REQUIRED_COLUMNS[4])?,
            volume: require(REQUIRED_COLUMNS[5])?,
            open_interest: position(&names, &["open_interest", "openinterest", "oi"]),
            vwap: position(&names, &["vwap"]),
            transactions: position(&names, &["transactions"]),
        })
    }
}

fn position(names: &[String], aliases: &[&str]) -> Option<usize> {
    names.iter().position(|n| aliases.contains(&n.as_str()))
}

/// Reads option bar flat files.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvIngestor;

impl CsvIngestor {
    pub fn new() -> Self {
        Self
    }

    /// Read every row of a CSV file.
    pub fn read_path(&self, path: &Path) -> Result<Vec<RawRecord>, IngestError> {
        let file = std::fs::File::open(path).map_err(|source| IngestError::Io {
            path: path.display().to_string(),
            source,
        })?;
        self.read(file)
    }

    /// Read every row from any reader (header row required).
    pub fn read<R: Read>(&self, reader: R) -> Result<Vec<RawRecord>, IngestError> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(reader);

        let columns = ColumnMap::from_headers(rdr.headers()?)?;
        let mut rows = Vec::new();

        for (i, record) in rdr.records().enumerate() {
            let record = record?;
            let line = record.position().map_or(i as u64 + 2, |p| p.line());
            let field = |idx: usize| record.get(idx).map(str::to_string);

            rows.push(RawRecord {
                line,
                timestamp: field(columns.timestamp).unwrap_or_default(),
                open: field(columns.open),
                high: field(columns.high),
                low: field(columns.low),
                close: field(columns.close),
                volume: field(columns.volume),
                open_interest: columns.open_interest.and_then(field),
                vwap: columns.vwap.and_then(field),
                transactions: columns.transactions.and_then(field),
            });
        }

        Ok(rows)
    }
}
