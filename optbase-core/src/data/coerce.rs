//! Type coercion: raw CSV text → typed [`OptionBar`] fields.
//!
//! Unparseable values become missing prices (or zero counts) and the row is
//! flagged [`Issue::Unparseable`]. Rows without a usable timestamp cannot be
//! placed in time and are set aside as rejected.

use super::ingest::RawRecord;
use crate::domain::{Issue, OptionBar, QualityFlags};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// A source row excluded because its timestamp could not be coerced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedRow {
    pub line: u64,
    pub raw_timestamp: String,
}

/// Output of the coercion stage.
#[derive(Debug, Clone, Default)]
pub struct Coerced {
    pub bars: Vec<OptionBar>,
    pub rejected: Vec<RejectedRow>,
    /// Rows carrying at least one unparseable field.
    pub unparseable_rows: usize,
}

/// Outcome of coercing one cell.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Cell<T> {
    Missing,
    Value(T),
    Bad,
}

const MISSING_MARKERS: [&str; 6] = ["", "nan", "null", "none", "na", "n/a"];

fn is_missing(s: &str) -> bool {
    let s = s.trim();
    MISSING_MARKERS.iter().any(|m| s.eq_ignore_ascii_case(m))
}

fn price_cell(raw: Option<&str>) -> Cell<f64> {
    match raw {
        None => Cell::Missing,
        Some(s) if is_missing(s) => Cell::Missing,
        Some(s) => match s.trim().parse::<f64>() {
            Ok(v) if v.is_finite() && v >= 0.0 => Cell::Value(v),
            _ => Cell::Bad,
        },
    }
}

fn count_cell(raw: Option<&str>) -> Cell<u64> {
    match raw {
        None => Cell::Missing,
        Some(s) if is_missing(s) => Cell::Missing,
        Some(s) => {
            let s = s.trim();
            if let Ok(v) = s.parse::<u64>() {
                return Cell::Value(v);
            }
            // Some exports write integer columns as floats ("120.0").
            match s.parse::<f64>() {
                Ok(v) if v.is_finite() && v >= 0.0 && v.fract() == 0.0 && v < u64::MAX as f64 => {
                    Cell::Value(v as u64)
                }
                _ => Cell::Bad,
            }
        }
    }
}

/// Convert an epoch integer of unknown unit to milliseconds.
///
/// The unit is inferred from magnitude: seconds, milliseconds, microseconds,
/// or nanoseconds.
pub fn epoch_to_millis(n: i64) -> i64 {
    let magnitude = n.unsigned_abs();
    if magnitude < 100_000_000_000 {
        n.saturating_mul(1_000)
    } else if magnitude < 100_000_000_000_000 {
        n
    } else if magnitude < 100_000_000_000_000_000 {
        n / 1_000
    } else {
        n / 1_000_000
    }
}

const DATETIME_FORMATS: [&str; 6] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y.%m.%d %H:%M:%S%.f",
    "%Y.%m.%dT%H:%M:%S%.f",
];

const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%Y.%m.%d"];

/// Parse a timestamp cell into milliseconds since the epoch (UTC).
pub fn parse_timestamp_ms(raw: &str) -> Option<i64> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(epoch_to_millis(n));
    }
    if let Ok(f) = s.parse::<f64>() {
        if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
            return Some(epoch_to_millis(f as i64));
        }
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc().timestamp_millis());
        }
    }
    None
}

/// Coerce raw records for one contract.
pub fn coerce(records: &[RawRecord], contract: &str) -> Coerced {
    let mut out = Coerced::default();

    for record in records {
        let Some(timestamp) = parse_timestamp_ms(&record.timestamp) else {
            out.rejected.push(RejectedRow {
                line: record.line,
                raw_timestamp: record.timestamp.clone(),
            });
            continue;
        };

        let mut flags = QualityFlags::empty();
        let mut price = |raw: &Option<String>| match price_cell(raw.as_deref()) {
            Cell::Value(v) => Some(v),
            Cell::Missing => None,
            Cell::Bad => {
                flags.insert(Issue::Unparseable);
                None
            }
        };
        let open = price(&record.open);
        let high = price(&record.high);
        let low = price(&record.low);
        let close = price(&record.close);
        let vwap = price(&record.vwap);

        let mut count = |raw: &Option<String>| match count_cell(raw.as_deref()) {
            Cell::Value(v) => Some(v),
            Cell::Missing => None,
            Cell::Bad => {
                flags.insert(Issue::Unparseable);
                None
            }
        };
        let volume = count(&record.volume).unwrap_or(0);
        let open_interest = count(&record.open_interest).unwrap_or(0);
        let transactions = count(&record.transactions);

        if flags.contains(Issue::Unparseable) {
            out.unparseable_rows += 1;
        }

        out.bars.push(OptionBar {
            contract: contract.to_string(),
            timestamp,
            open,
            high,
            low,
            close,
            volume,
            open_interest,
            vwap,
            transactions,
            flags,
        });
    }

    out
}
