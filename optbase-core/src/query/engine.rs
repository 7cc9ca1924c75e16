//! Range and filter queries against the option table.

use super::builder::{Filter, Ident, SelectQuery, SymbolMatch};
use super::time::TimeBound;
use crate::domain::{OptionBar, OptionIdentity, OptionType};
use crate::store::frame::{date_of, result_frame};
use crate::store::{Session, StoreError, StoredRow};
use crate::symbol;
use chrono::NaiveDate;
use polars::prelude::DataFrame;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("invalid underlying pattern '{0}' (expected letters, optionally ending in '*')")]
    InvalidPattern(String),

    #[error("empty range: start {start_ms} is after end {end_ms}")]
    EmptyRange { start_ms: i64, end_ms: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Parse an underlying pattern: `AAPL` (exact) or `AAPL*` (prefix).
///
/// A bare symbol matches that underlying only, so `AAPL` does not return
/// `AAPLW` contracts and prunes to a single hash bucket. Use `AAPL*` for a
/// SQL `LIKE 'AAPL%'` style match.
pub fn parse_pattern(pattern: &str) -> Result<SymbolMatch, QueryError> {
    let trimmed = pattern.trim();
    let (body, prefix) = match trimmed.strip_suffix('*') {
        Some(body) => (body, true),
        None => (trimmed, false),
    };
    if body.is_empty() || !body.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(QueryError::InvalidPattern(pattern.to_string()));
    }
    let body = body.to_ascii_uppercase();
    Ok(if prefix {
        SymbolMatch::Prefix(body)
    } else {
        SymbolMatch::Exact(body)
    })
}

/// A range request.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    pub pattern: String,
    pub start: TimeBound,
    pub end: TimeBound,
    pub option_type: Option<OptionType>,
    pub limit: Option<usize>,
}

impl RangeQuery {
    pub fn new(pattern: &str, start: impl Into<TimeBound>, end: impl Into<TimeBound>) -> Self {
        Self {
            pattern: pattern.to_string(),
            start: start.into(),
            end: end.into(),
            option_type: None,
            limit: None,
        }
    }

    pub fn option_type(mut self, option_type: Option<OptionType>) -> Self {
        self.option_type = option_type;
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    /// Filter in pruning order: symbol, time range, option type.
    pub fn filter(&self) -> Result<Filter, QueryError> {
        let symbol = parse_pattern(&self.pattern)?;
        let (start_ms, end_ms) = (self.start.start_ms(), self.end.end_ms());
        if start_ms > end_ms {
            return Err(QueryError::EmptyRange { start_ms, end_ms });
        }
        Ok(Filter::new()
            .symbol(symbol)
            .between(start_ms, end_ms)
            .option_type(self.option_type))
    }
}

/// Per-contract summary of stored data.
#[derive(Debug, Clone, PartialEq)]
pub struct ContractSummary {
    pub identity: OptionIdentity,
    pub first_timestamp: i64,
    pub last_timestamp: i64,
    pub rows: usize,
}

/// Query side of the option table.
#[derive(Debug, Clone)]
pub struct QueryEngine {
    database: Ident,
    table: Ident,
}

impl QueryEngine {
    pub fn new(database: &str, table: &str) -> Result<Self, StoreError> {
        Ok(Self {
            database: Ident::new(database)?,
            table: Ident::new(table)?,
        })
    }

    fn rows(&self, session: &Session, query: SelectQuery) -> Result<Vec<StoredRow>, QueryError> {
        Ok(session.call(move |store| store.select(&query))?)
    }

    fn select(&self, session: &Session, request: &RangeQuery) -> Result<Vec<StoredRow>, QueryError> {
        let query = SelectQuery::rows(&self.database, &self.table, request.filter()?)
            .limit(request.limit);
        self.rows(session, query)
    }

    /// Bars for underlyings matching `pattern` within `[start, end]`, ordered
    /// by `(contract, timestamp)`.
    pub fn query_range(
        &self,
        session: &Session,
        pattern: &str,
        start: impl Into<TimeBound>,
        end: impl Into<TimeBound>,
        option_type: Option<OptionType>,
    ) -> Result<Vec<OptionBar>, QueryError> {
        let request = RangeQuery::new(pattern, start, end).option_type(option_type);
        self.query(session, &request)
    }

    pub fn query(&self, session: &Session, request: &RangeQuery) -> Result<Vec<OptionBar>, QueryError> {
        Ok(self
            .select(session, request)?
            .into_iter()
            .map(|row| row.bar)
            .collect())
    }

    /// Same as [`QueryEngine::query`], as a DataFrame.
    pub fn query_frame(&self, session: &Session, request: &RangeQuery) -> Result<DataFrame, QueryError> {
        let rows = self.select(session, request)?;
        Ok(result_frame(&rows)?)
    }

    /// Distinct UTC dates with stored data for `pattern`.
    pub fn trading_calendar(&self, session: &Session, pattern: &str) -> Result<Vec<NaiveDate>, QueryError> {
        let filter = Filter::new().symbol(parse_pattern(pattern)?);
        let rows = self.rows(session, SelectQuery::rows(&self.database, &self.table, filter))?;
        let dates: BTreeSet<NaiveDate> = rows
            .iter()
            .filter_map(|r| date_of(r.bar.timestamp))
            .collect();
        Ok(dates.into_iter().collect())
    }

    /// One summary per stored contract of underlyings matching `pattern`.
    pub fn list_contracts(
        &self,
        session: &Session,
        pattern: &str,
    ) -> Result<Vec<ContractSummary>, QueryError> {
        let filter = Filter::new().symbol(parse_pattern(pattern)?);
        let rows = self.rows(session, SelectQuery::rows(&self.database, &self.table, filter))?;

        let mut spans: BTreeMap<String, (i64, i64, usize)> = BTreeMap::new();
        for row in &rows {
            let ts = row.bar.timestamp;
            spans
                .entry(row.bar.contract.clone())
                .and_modify(|(first, last, n)| {
                    *first = (*first).min(ts);
                    *last = (*last).max(ts);
                    *n += 1;
                })
                .or_insert((ts, ts, 1));
        }

        spans
            .into_iter()
            .map(|(code, (first_timestamp, last_timestamp, rows))| -> Result<_, QueryError> {
                let identity = symbol::parse(&code)
                    .map_err(|e| StoreError::Corrupt(format!("stored contract: {e}")))?;
                Ok(ContractSummary {
                    identity,
                    first_timestamp,
                    last_timestamp,
                    rows,
                })
            })
            .collect()
    }

    /// Stored row count for one contract (import verification).
    pub fn count_contract(&self, session: &Session, identity: &OptionIdentity) -> Result<usize, QueryError> {
        let query = SelectQuery::count(&self.database, &self.table, contract_filter(identity));
        Ok(session.call(move |store| store.count(&query))?)
    }

    /// Stored timestamps for one contract, ascending.
    pub fn contract_timestamps(
        &self,
        session: &Session,
        identity: &OptionIdentity,
    ) -> Result<Vec<i64>, QueryError> {
        let query = SelectQuery::rows(&self.database, &self.table, contract_filter(identity));
        Ok(self
            .rows(session, query)?
            .into_iter()
            .map(|r| r.bar.timestamp)
            .collect())
    }
}

/// Filter pinning one contract (and its bucket).
pub fn contract_filter(identity: &OptionIdentity) -> Filter {
    Filter::new()
        .symbol(SymbolMatch::Exact(identity.underlying.clone()))
        .contract(identity.code())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns() {
        assert_eq!(parse_pattern("AAPL").unwrap(), SymbolMatch::Exact("AAPL".into()));
        assert_eq!(parse_pattern("aa*").unwrap(), SymbolMatch::Prefix("AA".into()));
        for bad in ["", "*", "AA**", "A*PL", "AAPL1", "AA PL"] {
            assert!(matches!(parse_pattern(bad), Err(QueryError::InvalidPattern(_))), "{bad}");
        }
    }

    #[test]
    fn reversed_range_is_empty_range() {
        let d1 = NaiveDate::from_ymd_opt(2024, 2, 1).unwrap();
        let d0 = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let err = RangeQuery::new("AAPL", d1, d0).filter().unwrap_err();
        assert!(matches!(err, QueryError::EmptyRange { .. }));
    }

    #[test]
    fn same_day_range_is_not_empty() {
        let d = NaiveDate::from_ymd_opt(2024, 1, 5).unwrap();
        let filter = RangeQuery::new("AAPL", d, d).filter().unwrap();
        assert_eq!(filter.time_range, Some((1_704_412_800_000, 1_704_499_199_999)));
    }
}
