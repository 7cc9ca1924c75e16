//! OptionBar: one row of option time-series data.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Data-quality issue attached to a bar by the cleaning pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Issue {
    /// A field failed type coercion and was replaced by a missing value (or 0).
    Unparseable,
    /// Later rows with the same timestamp were discarded in favour of this one.
    DuplicateTimestamp,
    /// Part of a run of missing values too long to fill.
    UnfillableGap,
    /// `low <= {open, close} <= high` does not hold.
    PriceInconsistent,
    /// Close-to-close return is an outlier within the contract.
    OutlierReturn,
    /// At least one price was filled from the lookback median.
    Imputed,
    /// Volume is in the lowest liquidity band of the contract.
    LowLiquidity,
}

impl Issue {
    pub const ALL: [Issue; 7] = [
        Issue::Unparseable,
        Issue::DuplicateTimestamp,
        Issue::UnfillableGap,
        Issue::PriceInconsistent,
        Issue::OutlierReturn,
        Issue::Imputed,
        Issue::LowLiquidity,
    ];

    fn bit(self) -> u32 {
        1 << (self as u32)
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Issue::Unparseable => "Unparseable",
            Issue::DuplicateTimestamp => "DuplicateTimestamp",
            Issue::UnfillableGap => "UnfillableGap",
            Issue::PriceInconsistent => "PriceInconsistent",
            Issue::OutlierReturn => "OutlierReturn",
            Issue::Imputed => "Imputed",
            Issue::LowLiquidity => "LowLiquidity",
        };
        f.write_str(name)
    }
}

/// Set of [`Issue`]s, persisted as the `flags` column.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QualityFlags(u32);

impl QualityFlags {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn insert(&mut self, issue: Issue) {
        self.0 |= issue.bit();
    }

    pub fn contains(self, issue: Issue) -> bool {
        self.0 & issue.bit() != 0
    }

    pub fn is_clean(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Issue> {
        Issue::ALL.into_iter().filter(move |i| self.contains(*i))
    }
}

/// Price fields of a bar, addressable for per-field gap handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PriceField {
    Open,
    High,
    Low,
    Close,
}

impl PriceField {
    pub const ALL: [PriceField; 4] = [
        PriceField::Open,
        PriceField::High,
        PriceField::Low,
        PriceField::Close,
    ];
}

impl fmt::Display for PriceField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PriceField::Open => "open",
            PriceField::High => "high",
            PriceField::Low => "low",
            PriceField::Close => "close",
        };
        f.write_str(name)
    }
}

/// One bar for a single option contract.
///
/// `timestamp` is milliseconds since the Unix epoch, UTC. Prices are optional:
/// a missing value is a state the cleaner reasons about, not an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionBar {
    /// Contract code, e.g. `AAPL240119C00150000`.
    pub contract: String,
    pub timestamp: i64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub close: Option<f64>,
    pub volume: u64,
    pub open_interest: u64,
    pub vwap: Option<f64>,
    pub transactions: Option<u64>,
    pub flags: QualityFlags,
}

impl OptionBar {
    pub fn price(&self, field: PriceField) -> Option<f64> {
        match field {
            PriceField::Open => self.open,
            PriceField::High => self.high,
            PriceField::Low => self.low,
            PriceField::Close => self.close,
        }
    }

    pub fn set_price(&mut self, field: PriceField, value: Option<f64>) {
        match field {
            PriceField::Open => self.open = value,
            PriceField::High => self.high = value,
            PriceField::Low => self.low = value,
            PriceField::Close => self.close = value,
        }
    }

    /// Checks `low <= {open, close} <= high` over the fields that are present.
    ///
    /// Returns `true` when there is nothing to compare.
    pub fn is_price_consistent(&self) -> bool {
        if let (Some(high), Some(low)) = (self.high, self.low) {
            if low > high {
                return false;
            }
        }
        [self.open, self.close].into_iter().flatten().all(|p| {
            self.low.map_or(true, |low| low <= p) && self.high.map_or(true, |high| p <= high)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_bar() -> OptionBar {
        OptionBar {
            contract: "AAPL240119C00150000".into(),
            timestamp: 1_704_205_800_000,
            open: Some(2.10),
            high: Some(2.40),
            low: Some(2.00),
            close: Some(2.35),
            volume: 120,
            open_interest: 0,
            vwap: None,
            transactions: None,
            flags: QualityFlags::empty(),
        }
    }

    #[test]
    fn flags_insert_and_iterate() {
        let mut flags = QualityFlags::empty();
        assert!(flags.is_clean());
        flags.insert(Issue::OutlierReturn);
        flags.insert(Issue::Imputed);
        flags.insert(Issue::OutlierReturn);

        assert!(flags.contains(Issue::OutlierReturn));
        assert!(!flags.contains(Issue::UnfillableGap));
        assert_eq!(flags.iter().collect::<Vec<_>>(), vec![Issue::OutlierReturn, Issue::Imputed]);
        assert_eq!(QualityFlags::from_bits(flags.bits()), flags);
    }

    #[test]
    fn consistent_bar_passes() {
        assert!(sample_bar().is_price_consistent());
    }

    #[test]
    fn close_above_high_is_inconsistent() {
        let mut bar = sample_bar();
        bar.close = Some(2.50);
        assert!(!bar.is_price_consistent());
    }

    #[test]
    fn inverted_high_low_is_inconsistent() {
        let mut bar = sample_bar();
        bar.high = Some(1.90);
        assert!(!bar.is_price_consistent());
    }

    #[test]
    fn missing_prices_are_not_inconsistent() {
        let mut bar = sample_bar();
        bar.high = None;
        bar.low = None;
        assert!(bar.is_price_consistent());
    }
}
