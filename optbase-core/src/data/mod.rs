//! Data ingestion and cleaning

pub mod canonicalize;
pub mod clean;
pub mod coerce;
pub mod gaps;
pub mod ingest;
pub mod outliers;
pub mod schema;

pub use canonicalize::Canonicalizer;
pub use clean::{CleaningConfig, CleaningReport, DataCleaner};
pub use coerce::{parse_timestamp_ms, RejectedRow};
pub use gaps::GapRecord;
pub use ingest::{CsvIngestor, IngestError, RawRecord};
pub use schema::{ColumnDef, ColumnType, SchemaError, TableSchema};
