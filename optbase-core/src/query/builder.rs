//! Typed statement builder.
//!
//! Statements are data; `render()` produces the script text sent to (or, for
//! the Parquet backend, logged in place of) a DolphinDB-style server.
//! Identifier validation and literal escaping happen only here.

use crate::data::TableSchema;
use crate::domain::OptionType;
use crate::store::frame::StoredRow;
use crate::store::{PartitionScheme, StoreError};
use chrono::{DateTime, NaiveDate};
use std::fmt;

/// A validated identifier: `[A-Za-z_][A-Za-z0-9_]*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ident(String);

impl Ident {
    pub fn new(name: &str) -> Result<Self, StoreError> {
        let mut chars = name.chars();
        let valid = match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {
                chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
            }
            _ => false,
        };
        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(StoreError::InvalidIdentifier(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Quote a string literal, escaping backslashes and double quotes.
pub fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

fn db_path(database: &Ident) -> String {
    quote(&format!("dfs://{database}"))
}

fn render_date(date: NaiveDate) -> String {
    date.format("%Y.%m.%d").to_string()
}

fn render_timestamp(ms: i64) -> String {
    match DateTime::from_timestamp_millis(ms) {
        Some(dt) => dt.format("%Y.%m.%dT%H:%M:%S%.3f").to_string(),
        None => ms.to_string(),
    }
}

/// How the `symbol` column is matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SymbolMatch {
    Exact(String),
    Prefix(String),
}

impl SymbolMatch {
    pub fn matches(&self, symbol: &str) -> bool {
        match self {
            SymbolMatch::Exact(s) => symbol == s,
            SymbolMatch::Prefix(p) => symbol.starts_with(p.as_str()),
        }
    }
}

/// Row filter, applied in construction order: symbol, contract, time range,
/// option type.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub symbol: Option<SymbolMatch>,
    pub contract: Option<String>,
    /// Closed range of epoch milliseconds.
    pub time_range: Option<(i64, i64)>,
    pub option_type: Option<OptionType>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn symbol(mut self, symbol: SymbolMatch) -> Self {
        self.symbol = Some(symbol);
        self
    }

    pub fn contract(mut self, code: impl Into<String>) -> Self {
        self.contract = Some(code.into());
        self
    }

    pub fn between(mut self, start_ms: i64, end_ms: i64) -> Self {
        self.time_range = Some((start_ms, end_ms));
        self
    }

    pub fn option_type(mut self, option_type: Option<OptionType>) -> Self {
        self.option_type = option_type;
        self
    }

    /// The single symbol this filter pins, if any (bucket pruning).
    pub fn exact_symbol(&self) -> Option<&str> {
        match &self.symbol {
            Some(SymbolMatch::Exact(s)) => Some(s),
            _ => None,
        }
    }

    /// Calendar dates spanned by the time range (date pruning).
    pub fn date_range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let (start, end) = self.time_range?;
        let start = DateTime::from_timestamp_millis(start)?.date_naive();
        let end = DateTime::from_timestamp_millis(end)?.date_naive();
        Some((start, end))
    }

    pub fn matches(&self, row: &StoredRow) -> bool {
        if let Some(symbol) = &self.symbol {
            if !symbol.matches(&row.symbol) {
                return false;
            }
        }
        if let Some(contract) = &self.contract {
            if &row.bar.contract != contract {
                return false;
            }
        }
        if let Some((start, end)) = self.time_range {
            if row.bar.timestamp < start || row.bar.timestamp > end {
                return false;
            }
        }
        if let Some(option_type) = self.option_type {
            if row.option_type != option_type {
                return false;
            }
        }
        true
    }

    /// `where` clause, empty when the filter is unconstrained.
    pub fn render(&self) -> String {
        let mut terms = Vec::new();
        match &self.symbol {
            Some(SymbolMatch::Exact(s)) => terms.push(format!("symbol = {}", quote(s))),
            Some(SymbolMatch::Prefix(p)) => {
                terms.push(format!("symbol like {}", quote(&format!("{p}%"))))
            }
            None => {}
        }
        if let Some(contract) = &self.contract {
            terms.push(format!("contract = {}", quote(contract)));
        }
        if let Some((start, end)) = self.time_range {
            terms.push(format!(
                "timestamp between {} : {}",
                render_timestamp(start),
                render_timestamp(end)
            ));
        }
        if let Some(option_type) = self.option_type {
            terms.push(format!("type = '{}'", option_type.code()));
        }
        if terms.is_empty() {
            String::new()
        } else {
            format!(" where {}", terms.join(" and "))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    Rows,
    Count,
}

/// `select` against one table. Rows come back ordered by
/// `(contract, timestamp)`.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    pub database: Ident,
    pub table: Ident,
    pub projection: Projection,
    pub filter: Filter,
    pub limit: Option<usize>,
}

impl SelectQuery {
    pub fn rows(database: &Ident, table: &Ident, filter: Filter) -> Self {
        Self {
            database: database.clone(),
            table: table.clone(),
            projection: Projection::Rows,
            filter,
            limit: None,
        }
    }

    pub fn count(database: &Ident, table: &Ident, filter: Filter) -> Self {
        Self {
            projection: Projection::Count,
            ..Self::rows(database, table, filter)
        }
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn render(&self) -> String {
        let source = format!("loadTable({}, {})", db_path(&self.database), quote(self.table.as_str()));
        match self.projection {
            Projection::Count => format!("select count(*) from {source}{}", self.filter.render()),
            Projection::Rows => {
                let mut out = format!(
                    "select * from {source}{} order by contract, timestamp",
                    self.filter.render()
                );
                if let Some(limit) = self.limit {
                    out.push_str(&format!(" limit {limit}"));
                }
                out
            }
        }
    }
}

/// `delete from` one table.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub database: Ident,
    pub table: Ident,
    pub filter: Filter,
}

impl DeleteStatement {
    pub fn render(&self) -> String {
        format!(
            "delete from loadTable({}, {}){}",
            db_path(&self.database),
            quote(self.table.as_str()),
            self.filter.render()
        )
    }
}

/// DDL statements issued by the lifecycle manager.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaStatement {
    CreateDatabase {
        database: Ident,
        scheme: PartitionScheme,
    },
    DropDatabase {
        database: Ident,
    },
    CreateTable {
        database: Ident,
        table: Ident,
        schema: TableSchema,
    },
}

impl SchemaStatement {
    pub fn render(&self) -> String {
        match self {
            SchemaStatement::CreateDatabase { database, scheme } => format!(
                "create database {} partitioned by HASH([SYMBOL, {}]), VALUE({}..{})",
                db_path(database),
                scheme.buckets,
                render_date(default_value_start()),
                render_date(default_value_end()),
            ),
            SchemaStatement::DropDatabase { database } => {
                format!("dropDatabase({})", db_path(database))
            }
            SchemaStatement::CreateTable {
                database,
                table,
                schema,
            } => {
                let columns: Vec<String> = schema
                    .columns
                    .iter()
                    .map(|c| format!("{} {}", c.name, c.ty))
                    .collect();
                format!(
                    "create table {}.{} ({}) partitioned by symbol, date",
                    db_path(database),
                    quote(table.as_str()),
                    columns.join(", ")
                )
            }
        }
    }
}

// The value partition grows on demand; these only seed the rendered DDL.
fn default_value_start() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn default_value_end() -> NaiveDate {
    NaiveDate::from_ymd_opt(2099, 12, 31).unwrap_or(NaiveDate::MAX)
}
