//! Properties of the cleaning pass.
//!
//! 1. Idempotency: cleaning cleaned bars changes nothing
//! 2. Output is strictly ordered by timestamp
//! 3. Spike and gap scenarios

use optbase_core::data::{CleaningConfig, CsvIngestor, DataCleaner};
use optbase_core::domain::{Issue, OptionBar, QualityFlags};
use optbase_core::symbol;
use proptest::prelude::*;

const CONTRACT: &str = "AAPL240119C00150000";

fn bar(ts: i64, open: Option<f64>, close: Option<f64>, volume: u64) -> OptionBar {
    OptionBar {
        contract: CONTRACT.into(),
        timestamp: ts,
        open,
        high: close.map(|c| c + 0.25),
        low: close.map(|c| (c - 0.25).max(0.0)),
        close,
        volume,
        open_interest: 0,
        vwap: None,
        transactions: None,
        flags: QualityFlags::empty(),
    }
}

// ── Strategies (proptest) ────────────────────────────────────────────

fn arb_price() -> impl Strategy<Value = Option<f64>> {
    prop::option::weighted(0.8, (0.5..20.0_f64).prop_map(|p| (p * 100.0).round() / 100.0))
}

fn arb_bars() -> impl Strategy<Value = Vec<OptionBar>> {
    prop::collection::vec((0i64..80, arb_price(), arb_price(), 0u64..500), 0..120).prop_map(|rows| {
        rows.into_iter()
            .map(|(t, open, close, volume)| bar(t * 60_000, open, close, volume))
            .collect()
    })
}

fn arb_config() -> impl Strategy<Value = CleaningConfig> {
    (0usize..5, 1usize..30, 1.0..12.0_f64, prop::option::of(0.05..0.5_f64)).prop_map(
        |(max_fill_gap, median_lookback, outlier_threshold, low_liquidity_quantile)| CleaningConfig {
            max_fill_gap,
            median_lookback,
            outlier_threshold,
            low_liquidity_quantile,
        },
    )
}

// ── 1 & 2. Idempotency and ordering ──────────────────────────────────

proptest! {
    #[test]
    fn clean_is_idempotent(bars in arb_bars(), config in arb_config()) {
        let cleaner = DataCleaner::new(config);
        let (once, _) = cleaner.clean_bars(bars);
        let (twice, report) = cleaner.clean_bars(once.clone());
        prop_assert_eq!(&twice, &once);
        prop_assert_eq!(report.duplicates_dropped, 0);
        prop_assert_eq!(report.values_imputed, 0);
    }

    #[test]
    fn output_is_strictly_ordered(bars in arb_bars()) {
        let n = bars.len();
        let (out, report) = DataCleaner::default().clean_bars(bars);
        prop_assert!(out.windows(2).all(|w| w[0].timestamp < w[1].timestamp));
        prop_assert_eq!(out.len() + report.duplicates_dropped, n);
    }
}

// ── 3. Scenarios ─────────────────────────────────────────────────────

#[test]
fn single_spike_flags_only_that_row() {
    let mut bars: Vec<OptionBar> = (0..240)
        .map(|i| bar(i * 60_000, Some(1.0), Some(1.0 + 0.002 * ((i % 7) as f64)), 10))
        .collect();
    bars[150].close = Some(50.0);
    bars[150].high = Some(50.0);

    let (out, report) = DataCleaner::default().clean_bars(bars);
    let flagged: Vec<usize> = out
        .iter()
        .enumerate()
        .filter(|(_, b)| b.flags.contains(Issue::OutlierReturn))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(flagged, vec![150]);
    assert_eq!(report.count(Issue::OutlierReturn), 1);
}

#[test]
fn two_bar_gap_filled_five_bar_gap_flagged() {
    let mut closes: Vec<Option<f64>> = (0..30).map(|i| Some(2.0 + (i % 3) as f64 * 0.5)).collect();
    closes[5] = None;
    closes[6] = None;
    for c in closes.iter_mut().skip(15).take(5) {
        *c = None;
    }
    let bars: Vec<OptionBar> = closes
        .iter()
        .enumerate()
        .map(|(i, c)| bar(i as i64 * 60_000, Some(2.0), *c, 10))
        .collect();

    let (out, report) = DataCleaner::default().clean_bars(bars);

    assert!(out[5].close.is_some() && out[6].close.is_some());
    assert!(out[5].flags.contains(Issue::Imputed));
    assert!(out[15..20].iter().all(|b| b.close.is_none()));
    assert!(out[15..20].iter().all(|b| b.flags.contains(Issue::UnfillableGap)));
    assert!(!out[14].flags.contains(Issue::UnfillableGap));
    assert!(!out[20].flags.contains(Issue::UnfillableGap));

    let close_gaps: Vec<_> = report
        .unfillable_gaps
        .iter()
        .filter(|g| g.field.to_string() == "close")
        .collect();
    assert_eq!(close_gaps.len(), 1);
    assert_eq!(close_gaps[0].length, 5);
    assert_eq!(close_gaps[0].start_timestamp, 15 * 60_000);
}

#[test]
fn csv_to_clean_bars() {
    let csv = "timestamp,open,high,low,close,volume,oi\n\
               2024-01-02 14:30:00,2.10,2.40,2.00,2.35,120,900\n\
               2024-01-02 14:31:00,2.35,2.50,2.30,oops,80,900\n\
               garbage,1,1,1,1,1,1\n\
               2024-01-02 14:30:00,9.99,9.99,9.99,9.99,1,1\n";
    let records = CsvIngestor::new().read(csv.as_bytes()).unwrap();
    let id = symbol::parse(CONTRACT).unwrap();
    let (bars, report) = DataCleaner::default().clean(&records, &id);

    assert_eq!(bars.len(), 2);
    assert_eq!(report.rejected.len(), 1);
    assert_eq!(report.rejected[0].line, 4);
    assert_eq!(report.duplicates_dropped, 1);
    assert_eq!(bars[0].close, Some(2.35));
    assert_eq!(bars[0].open_interest, 900);
    assert!(bars[0].flags.contains(Issue::DuplicateTimestamp));
    assert!(bars[1].flags.contains(Issue::Unparseable));
    // the unparseable close is a one-bar gap, filled from the bar before it
    assert_eq!(bars[1].close, Some(2.35));
    assert!(bars[1].flags.contains(Issue::Imputed));
}
