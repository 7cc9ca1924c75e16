//! optbase core: option symbols, data cleaning, the partitioned store, queries.
//!
//! This crate contains the pipeline's building blocks:
//! - Domain types (contract identity, option bars, quality flags)
//! - Contract code parser
//! - CSV ingest and the cleaning pass
//! - Store seam, sessions with call timeouts, and the Parquet warehouse
//! - Database/table lifecycle
//! - Typed query builder and the range query engine

pub mod data;
pub mod domain;
pub mod query;
pub mod store;
pub mod symbol;

pub use domain::{Issue, OptionBar, OptionIdentity, OptionType, QualityFlags};
pub use symbol::SymbolError;

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types shared with import workers are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::OptionBar>();
        require_sync::<domain::OptionBar>();
        require_send::<domain::OptionIdentity>();
        require_sync::<domain::OptionIdentity>();

        require_send::<data::DataCleaner>();
        require_sync::<data::DataCleaner>();
        require_send::<data::CleaningReport>();
        require_sync::<data::CleaningReport>();

        require_send::<store::Session>();
        require_sync::<store::Session>();
        require_send::<store::ParquetStore>();
        require_sync::<store::ParquetStore>();
        require_send::<store::LifecycleManager>();
        require_sync::<store::LifecycleManager>();
        require_send::<store::StoreError>();

        require_send::<query::QueryEngine>();
        require_sync::<query::QueryEngine>();
    }

    /// The store seam must stay object safe so sessions can hold `Arc<dyn Store>`.
    #[test]
    fn store_trait_is_object_safe() {
        fn _takes(_: &dyn store::Store) {}
    }
}
