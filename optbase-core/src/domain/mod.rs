//! Domain types for optbase

pub mod bar;
pub mod identity;

pub use bar::{Issue, OptionBar, PriceField, QualityFlags};
pub use identity::{OptionIdentity, OptionType};
