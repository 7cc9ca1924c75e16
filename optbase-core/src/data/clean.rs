//! DataCleaner: coercion → canonicalization → gap policy → OHLC check →
//! outlier and liquidity flags.

use super::canonicalize::Canonicalizer;
use super::coerce::{coerce, RejectedRow};
use super::gaps::{fill_gaps, GapRecord};
use super::ingest::RawRecord;
use super::outliers::{flag_low_liquidity, flag_outliers};
use crate::domain::{Issue, OptionBar, OptionIdentity};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Tunables for the cleaning pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CleaningConfig {
    /// Longest run of missing values that is filled.
    pub max_fill_gap: usize,
    /// Present values considered for the fill median.
    pub median_lookback: usize,
    /// Outlier z-score threshold on close-to-close returns.
    pub outlier_threshold: f64,
    /// Volume quantile at or below which bars are flagged `LowLiquidity`.
    pub low_liquidity_quantile: Option<f64>,
}

impl Default for CleaningConfig {
    fn default() -> Self {
        Self {
            max_fill_gap: 3,
            median_lookback: 20,
            outlier_threshold: 10.0,
            low_liquidity_quantile: None,
        }
    }
}

impl CleaningConfig {
    /// Check ranges; returns a description of the first bad field.
    pub fn validate(&self) -> Result<(), String> {
        if self.median_lookback == 0 {
            return Err("median_lookback must be at least 1".into());
        }
        if !(self.outlier_threshold.is_finite() && self.outlier_threshold > 0.0) {
            return Err(format!(
                "outlier_threshold must be positive, got {}",
                self.outlier_threshold
            ));
        }
        if let Some(q) = self.low_liquidity_quantile {
            if !(q > 0.0 && q < 1.0) {
                return Err(format!("low_liquidity_quantile must be in (0, 1), got {q}"));
            }
        }
        Ok(())
    }
}

/// Diagnostics from one cleaning pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CleaningReport {
    pub rows_in: usize,
    pub rows_out: usize,
    pub duplicates_dropped: usize,
    pub values_imputed: usize,
    pub unparseable_rows: usize,
    /// Rows excluded because their timestamp could not be parsed.
    pub rejected: Vec<RejectedRow>,
    pub unfillable_gaps: Vec<GapRecord>,
    /// Output rows carrying each issue.
    pub issue_counts: BTreeMap<Issue, usize>,
}

impl CleaningReport {
    pub fn count(&self, issue: Issue) -> usize {
        self.issue_counts.get(&issue).copied().unwrap_or(0)
    }

    /// One-line summary for logs and the ledger.
    pub fn summary(&self) -> String {
        let issues: Vec<String> = self
            .issue_counts
            .iter()
            .map(|(issue, n)| format!("{issue}={n}"))
            .collect();
        format!(
            "{} in, {} out, {} duplicates, {} imputed, {} rejected{}{}",
            self.rows_in,
            self.rows_out,
            self.duplicates_dropped,
            self.values_imputed,
            self.rejected.len(),
            if issues.is_empty() { "" } else { "; " },
            issues.join(" ")
        )
    }
}

/// Validates and repairs the bars of a single contract.
#[derive(Debug, Clone, Default)]
pub struct DataCleaner {
    config: CleaningConfig,
}

impl DataCleaner {
    pub fn new(config: CleaningConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CleaningConfig {
        &self.config
    }

    /// Clean raw CSV rows for `identity`.
    pub fn clean(
        &self,
        records: &[RawRecord],
        identity: &OptionIdentity,
    ) -> (Vec<OptionBar>, CleaningReport) {
        let coerced = coerce(records, &identity.code());
        let (bars, mut report) = self.clean_bars(coerced.bars);
        report.rows_in = records.len();
        report.unparseable_rows = coerced.unparseable_rows;
        report.rejected = coerced.rejected;
        debug!(contract = %identity, report = %report.summary(), "cleaned");
        (bars, report)
    }

    /// Clean already-typed bars. Applying this to its own output changes
    /// nothing but the report.
    pub fn clean_bars(&self, bars: Vec<OptionBar>) -> (Vec<OptionBar>, CleaningReport) {
        let mut report = CleaningReport {
            rows_in: bars.len(),
            ..Default::default()
        };

        let (mut bars, dropped) = Canonicalizer::canonicalize(bars);
        report.duplicates_dropped = dropped;

        let gaps = fill_gaps(&mut bars, self.config.max_fill_gap, self.config.median_lookback);
        report.values_imputed = gaps.values_imputed;
        report.unfillable_gaps = gaps.unfillable;

        Canonicalizer::validate(&mut bars);
        flag_outliers(&mut bars, self.config.outlier_threshold);
        if let Some(q) = self.config.low_liquidity_quantile {
            flag_low_liquidity(&mut bars, q);
        }

        report.rows_out = bars.len();
        for bar in &bars {
            for issue in bar.flags.iter() {
                *report.issue_counts.entry(issue).or_insert(0) += 1;
            }
        }
        report.unparseable_rows = report.count(Issue::Unparseable);
        (bars, report)
    }
}
