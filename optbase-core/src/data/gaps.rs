//! Missing-value policy: short gaps are filled from a lookback median, long
//! gaps are left alone and flagged.

use crate::domain::{Issue, OptionBar, PriceField};
use serde::{Deserialize, Serialize};

/// A run of missing values too long to fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GapRecord {
    pub field: PriceField,
    pub start_timestamp: i64,
    pub length: usize,
}

/// What the gap pass changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GapOutcome {
    /// Individual values filled.
    pub values_imputed: usize,
    pub unfillable: Vec<GapRecord>,
}

/// Fill or flag gaps in every price field. Bars must be sorted by timestamp.
pub fn fill_gaps(bars: &mut [OptionBar], max_fill_gap: usize, lookback: usize) -> GapOutcome {
    let mut outcome = GapOutcome::default();
    for field in PriceField::ALL {
        fill_field(bars, field, max_fill_gap, lookback, &mut outcome);
    }
    outcome
}

fn fill_field(
    bars: &mut [OptionBar],
    field: PriceField,
    max_fill_gap: usize,
    lookback: usize,
    outcome: &mut GapOutcome,
) {
    let mut i = 0;
    while i < bars.len() {
        if bars[i].price(field).is_some() {
            i += 1;
            continue;
        }
        let start = i;
        while i < bars.len() && bars[i].price(field).is_none() {
            i += 1;
        }
        let end = i; // exclusive
        let length = end - start;

        let fill = if length <= max_fill_gap {
            fill_value(bars, field, start, end, lookback)
        } else {
            None
        };

        match fill {
            Some(value) => {
                for bar in &mut bars[start..end] {
                    bar.set_price(field, Some(value));
                    bar.flags.insert(Issue::Imputed);
                }
                outcome.values_imputed += length;
            }
            None => {
                for bar in &mut bars[start..end] {
                    bar.flags.insert(Issue::UnfillableGap);
                }
                outcome.unfillable.push(GapRecord {
                    field,
                    start_timestamp: bars[start].timestamp,
                    length,
                });
            }
        }
    }
}

/// Median of up to `lookback` present values before the gap, falling back to
/// the values after it.
fn fill_value(
    bars: &[OptionBar],
    field: PriceField,
    start: usize,
    end: usize,
    lookback: usize,
) -> Option<f64> {
    let before: Vec<f64> = bars[..start]
        .iter()
        .rev()
        .filter_map(|b| b.price(field))
        .take(lookback)
        .collect();
    if !before.is_empty() {
        return median(before);
    }
    let after: Vec<f64> = bars[end..]
        .iter()
        .filter_map(|b| b.price(field))
        .take(lookback)
        .collect();
    median(after)
}

/// Median of a non-empty sample; `None` when empty.
pub fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}
