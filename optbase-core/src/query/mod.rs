//! Query construction and execution

pub mod builder;
pub mod engine;
pub mod time;

pub use builder::{DeleteStatement, Filter, Ident, Projection, SchemaStatement, SelectQuery, SymbolMatch};
pub use engine::{contract_filter, parse_pattern, ContractSummary, QueryEngine, QueryError, RangeQuery};
pub use time::TimeBound;
