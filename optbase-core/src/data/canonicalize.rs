use crate::domain::{Issue, OptionBar};

/// Canonicalizer for option bars
pub struct Canonicalizer;

impl Canonicalizer {
    /// Stable sort by (contract, timestamp), then drop later duplicates.
    ///
    /// The first occurrence of a timestamp is kept and flagged
    /// `DuplicateTimestamp`. Returns the kept bars and the number dropped.
    pub fn canonicalize(mut bars: Vec<OptionBar>) -> (Vec<OptionBar>, usize) {
        bars.sort_by(|a, b| {
            a.contract
                .cmp(&b.contract)
                .then(a.timestamp.cmp(&b.timestamp))
        });

        let mut kept: Vec<OptionBar> = Vec::with_capacity(bars.len());
        let mut dropped = 0;
        for bar in bars {
            match kept.last_mut() {
                Some(last) if last.timestamp == bar.timestamp && last.contract == bar.contract => {
                    last.flags.insert(Issue::DuplicateTimestamp);
                    dropped += 1;
                }
                _ => kept.push(bar),
            }
        }
        (kept, dropped)
    }

    /// Flag bars violating `low <= {open, close} <= high`. Bars are retained
    /// unchanged apart from the flag.
    pub fn validate(bars: &mut [OptionBar]) -> usize {
        let mut flagged = 0;
        for bar in bars.iter_mut().filter(|b| !b.is_price_consistent()) {
            bar.flags.insert(Issue::PriceInconsistent);
            flagged += 1;
        }
        flagged
    }
}
