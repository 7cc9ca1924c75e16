//! Criterion benchmarks for the cleaning pass.
//!
//! Benchmarks:
//! 1. Full clean of raw CSV records (coercion included)
//! 2. Re-clean of typed bars with gaps and a spike

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use optbase_core::data::{CleaningConfig, DataCleaner, RawRecord};
use optbase_core::domain::{OptionBar, QualityFlags};
use optbase_core::symbol;

// ── Helpers ──────────────────────────────────────────────────────────

fn make_records(n: usize) -> Vec<RawRecord> {
    (0..n)
        .map(|i| {
            let close = 2.0 + (i as f64 * 0.1).sin();
            RawRecord {
                line: i as u64 + 2,
                timestamp: (1_704_205_800_000 + i as i64 * 60_000).to_string(),
                open: Some(format!("{:.2}", close - 0.05)),
                high: Some(format!("{:.2}", close + 0.1)),
                low: Some(format!("{:.2}", close - 0.1)),
                close: if i % 17 == 0 { None } else { Some(format!("{close:.2}")) },
                volume: Some((i % 300).to_string()),
                ..Default::default()
            }
        })
        .collect()
}

fn make_bars(n: usize) -> Vec<OptionBar> {
    (0..n)
        .map(|i| {
            let close = 2.0 + (i as f64 * 0.1).sin();
            OptionBar {
                contract: "AAPL240119C00150000".into(),
                timestamp: 1_704_205_800_000 + i as i64 * 60_000,
                open: Some(close),
                high: Some(close + 0.1),
                low: Some(close - 0.1),
                close: if i % 11 < 2 { None } else if i == n / 2 { Some(100.0) } else { Some(close) },
                volume: (i % 300) as u64,
                open_interest: 0,
                vwap: None,
                transactions: None,
                flags: QualityFlags::empty(),
            }
        })
        .collect()
}

// ── Benches ──────────────────────────────────────────────────────────

fn bench_clean_records(c: &mut Criterion) {
    let id = symbol::parse("AAPL240119C00150000").unwrap();
    let cleaner = DataCleaner::default();
    let mut group = c.benchmark_group("clean_records");
    for n in [1_000usize, 10_000, 50_000] {
        let records = make_records(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &records, |b, records| {
            b.iter(|| cleaner.clean(black_box(records), &id))
        });
    }
    group.finish();
}

fn bench_clean_bars(c: &mut Criterion) {
    let cleaner = DataCleaner::new(CleaningConfig {
        low_liquidity_quantile: Some(0.2),
        ..Default::default()
    });
    let mut group = c.benchmark_group("clean_bars");
    for n in [1_000usize, 10_000] {
        let bars = make_bars(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &bars, |b, bars| {
            b.iter(|| cleaner.clean_bars(black_box(bars.clone())))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_clean_records, bench_clean_bars);
criterion_main!(benches);
