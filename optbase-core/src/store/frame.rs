//! Conversion between option bars and warehouse DataFrames.

use super::StoreError;
use crate::data::TableSchema;
use crate::domain::{OptionBar, OptionIdentity, OptionType, QualityFlags};
use chrono::{DateTime, NaiveDate};
use polars::prelude::*;

/// A stored row: the bar plus the denormalized columns filters use.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub symbol: String,
    pub option_type: OptionType,
    pub bar: OptionBar,
}

fn epoch() -> NaiveDate {
    NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or_default()
}

fn days_since_epoch(date: NaiveDate) -> i32 {
    (date - epoch()).num_days() as i32
}

/// UTC calendar date of an epoch-millisecond timestamp.
pub fn date_of(timestamp_ms: i64) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(timestamp_ms).map(|dt| dt.date_naive())
}

/// Build a frame in the option table layout for bars of one contract.
pub fn bars_to_frame(identity: &OptionIdentity, bars: &[OptionBar]) -> Result<DataFrame, StoreError> {
    let n = bars.len();
    let mut dates = Vec::with_capacity(n);
    for bar in bars {
        let date = date_of(bar.timestamp).ok_or_else(|| {
            StoreError::Corrupt(format!("timestamp {} out of range", bar.timestamp))
        })?;
        dates.push(days_since_epoch(date));
    }

    let symbol = identity.underlying.as_str();
    let type_code = identity.option_type.code().to_string();
    let expiry = days_since_epoch(identity.expiry);

    let df = DataFrame::new(vec![
        Column::new("symbol".into(), vec![symbol; n]),
        Column::new("contract".into(), bars.iter().map(|b| b.contract.as_str()).collect::<Vec<_>>()),
        Column::new("date".into(), dates).cast(&DataType::Date)?,
        Column::new("timestamp".into(), bars.iter().map(|b| b.timestamp).collect::<Vec<_>>())
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?,
        Column::new("type".into(), vec![type_code.as_str(); n]),
        Column::new("strike".into(), vec![identity.strike(); n]),
        Column::new("expiry".into(), vec![expiry; n]).cast(&DataType::Date)?,
        Column::new("open".into(), bars.iter().map(|b| b.open).collect::<Vec<_>>()),
        Column::new("high".into(), bars.iter().map(|b| b.high).collect::<Vec<_>>()),
        Column::new("low".into(), bars.iter().map(|b| b.low).collect::<Vec<_>>()),
        Column::new("close".into(), bars.iter().map(|b| b.close).collect::<Vec<_>>()),
        Column::new("volume".into(), bars.iter().map(|b| b.volume).collect::<Vec<_>>()),
        Column::new(
            "open_interest".into(),
            bars.iter().map(|b| b.open_interest).collect::<Vec<_>>(),
        ),
        Column::new("vwap".into(), bars.iter().map(|b| b.vwap).collect::<Vec<_>>()),
        Column::new(
            "transactions".into(),
            bars.iter().map(|b| b.transactions).collect::<Vec<_>>(),
        ),
        Column::new("flags".into(), bars.iter().map(|b| b.flags.bits()).collect::<Vec<_>>()),
    ])?;
    Ok(df)
}

/// Read rows back from a frame in the option table layout.
pub fn rows_from_frame(df: &DataFrame) -> Result<Vec<StoredRow>, StoreError> {
    TableSchema::option_bars("option_bars")
        .validate(df)
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;

    let symbol = df.column("symbol")?.str()?;
    let contract = df.column("contract")?.str()?;
    let timestamp_ms = df.column("timestamp")?.cast(&DataType::Int64)?;
    let timestamp = timestamp_ms.i64()?;
    let option_type = df.column("type")?.str()?;
    let open = df.column("open")?.f64()?;
    let high = df.column("high")?.f64()?;
    let low = df.column("low")?.f64()?;
    let close = df.column("close")?.f64()?;
    let volume = df.column("volume")?.u64()?;
    let open_interest = df.column("open_interest")?.u64()?;
    let vwap = df.column("vwap")?.f64()?;
    let transactions = df.column("transactions")?.u64()?;
    let flags = df.column("flags")?.u32()?;

    let null = |column: &str, row: usize| StoreError::Corrupt(format!("null {column} at row {row}"));

    let mut rows = Vec::with_capacity(df.height());
    for i in 0..df.height() {
        let type_char = option_type
            .get(i)
            .and_then(|s| s.chars().next())
            .ok_or_else(|| null("type", i))?;
        let option_type = OptionType::from_code(type_char)
            .ok_or_else(|| StoreError::Corrupt(format!("bad option type '{type_char}' at row {i}")))?;

        rows.push(StoredRow {
            symbol: symbol.get(i).ok_or_else(|| null("symbol", i))?.to_string(),
            option_type,
            bar: OptionBar {
                contract: contract.get(i).ok_or_else(|| null("contract", i))?.to_string(),
                timestamp: timestamp.get(i).ok_or_else(|| null("timestamp", i))?,
                open: open.get(i),
                high: high.get(i),
                low: low.get(i),
                close: close.get(i),
                volume: volume.get(i).unwrap_or(0),
                open_interest: open_interest.get(i).unwrap_or(0),
                vwap: vwap.get(i),
                transactions: transactions.get(i),
                flags: QualityFlags::from_bits(flags.get(i).unwrap_or(0)),
            },
        });
    }
    Ok(rows)
}

/// Bars in the user-facing result layout (no partition-only columns).
pub fn result_frame(rows: &[StoredRow]) -> Result<DataFrame, StoreError> {
    let df = DataFrame::new(vec![
        Column::new("symbol".into(), rows.iter().map(|r| r.symbol.as_str()).collect::<Vec<_>>()),
        Column::new(
            "contract".into(),
            rows.iter().map(|r| r.bar.contract.as_str()).collect::<Vec<_>>(),
        ),
        Column::new("timestamp".into(), rows.iter().map(|r| r.bar.timestamp).collect::<Vec<_>>())
            .cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?,
        Column::new(
            "type".into(),
            rows.iter().map(|r| r.option_type.code().to_string()).collect::<Vec<_>>(),
        ),
        Column::new("open".into(), rows.iter().map(|r| r.bar.open).collect::<Vec<_>>()),
        Column::new("high".into(), rows.iter().map(|r| r.bar.high).collect::<Vec<_>>()),
        Column::new("low".into(), rows.iter().map(|r| r.bar.low).collect::<Vec<_>>()),
        Column::new("close".into(), rows.iter().map(|r| r.bar.close).collect::<Vec<_>>()),
        Column::new("volume".into(), rows.iter().map(|r| r.bar.volume).collect::<Vec<_>>()),
        Column::new(
            "open_interest".into(),
            rows.iter().map(|r| r.bar.open_interest).collect::<Vec<_>>(),
        ),
        Column::new("flags".into(), rows.iter().map(|r| r.bar.flags.bits()).collect::<Vec<_>>()),
    ])?;
    Ok(df)
}
