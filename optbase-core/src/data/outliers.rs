//! Return outliers and liquidity banding within one contract.

use crate::domain::{Issue, OptionBar};

/// Close-to-close return of bar `t`, defined when both closes are present and
/// the previous close is non-zero.
fn simple_return(prev: &OptionBar, cur: &OptionBar) -> Option<f64> {
    match (prev.close, cur.close) {
        (Some(p), Some(c)) if p != 0.0 => Some(c / p - 1.0),
        _ => None,
    }
}

/// Flag bars whose return lies more than `threshold` standard deviations from
/// the mean return. Bars must be sorted by timestamp.
///
/// Fewer than two returns, or zero dispersion, flags nothing.
pub fn flag_outliers(bars: &mut [OptionBar], threshold: f64) -> usize {
    let returns: Vec<(usize, f64)> = bars
        .windows(2)
        .enumerate()
        .filter_map(|(i, w)| simple_return(&w[0], &w[1]).map(|r| (i + 1, r)))
        .collect();
    if returns.len() < 2 {
        return 0;
    }

    let n = returns.len() as f64;
    let mean = returns.iter().map(|(_, r)| r).sum::<f64>() / n;
    let variance = returns.iter().map(|(_, r)| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
    let std = variance.sqrt();
    if std == 0.0 || !std.is_finite() {
        return 0;
    }

    let mut flagged = 0;
    for (idx, r) in returns {
        if ((r - mean) / std).abs() > threshold {
            bars[idx].flags.insert(Issue::OutlierReturn);
            flagged += 1;
        }
    }
    flagged
}

/// Flag bars whose volume is at or below the `quantile` of the contract's
/// volume distribution (nearest-rank).
pub fn flag_low_liquidity(bars: &mut [OptionBar], quantile: f64) -> usize {
    if bars.is_empty() {
        return 0;
    }
    let mut volumes: Vec<u64> = bars.iter().map(|b| b.volume).collect();
    volumes.sort_unstable();
    let rank = ((quantile * volumes.len() as f64).ceil() as usize).clamp(1, volumes.len());
    let cutoff = volumes[rank - 1];

    let mut flagged = 0;
    for bar in bars.iter_mut().filter(|b| b.volume <= cutoff) {
        bar.flags.insert(Issue::LowLiquidity);
        flagged += 1;
    }
    flagged
}
