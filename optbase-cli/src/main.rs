//! optbase CLI: import option flat files into the warehouse and query them.
//!
//! Commands:
//! - `init`: create the database and table
//! - `import`: import one contract CSV
//! - `import-dir`: import every CSV in a directory
//! - `query`: bars for an underlying over a date range
//! - `calendar`: dates with stored data
//! - `contracts`: stored contracts with their spans
//! - `repartition`: drop and recreate the database with a new bucket count

use anyhow::{bail, Result};
use chrono::{DateTime, NaiveDate};
use clap::{Parser, Subcommand};
use optbase_core::data::parse_timestamp_ms;
use optbase_core::query::{RangeQuery, TimeBound};
use optbase_core::store::Destructive;
use optbase_core::OptionType;
use optbase_runner::{
    CancelToken, ImportBatch, ImportConfig, ImportStatus, OptionDataService,
};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "optbase", about = "Option bar warehouse: import, verify, query")]
struct Cli {
    /// Path to a TOML import config.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Warehouse root directory.
    #[arg(long, global = true, default_value = "warehouse")]
    store_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and table if they do not exist.
    Init,
    /// Import one contract CSV (file name is the contract code).
    Import {
        file: PathBuf,
    },
    /// Import every .csv file in a directory.
    ImportDir {
        dir: PathBuf,

        /// Files imported in parallel. Overrides the config.
        #[arg(long)]
        workers: Option<usize>,

        /// Skip files whose content was already imported and verified.
        #[arg(long, default_value_t = false)]
        resume: bool,
    },
    /// Bars for an underlying (`AAPL`, or `AAPL*` for a prefix) over a range.
    Query {
        pattern: String,

        /// Start date (YYYY-MM-DD) or timestamp, inclusive.
        #[arg(long)]
        start: String,

        /// End date (YYYY-MM-DD, whole day) or timestamp, inclusive.
        #[arg(long)]
        end: String,

        /// call or put.
        #[arg(long = "type")]
        option_type: Option<OptionType>,

        #[arg(long)]
        limit: Option<usize>,
    },
    /// Dates with stored data for an underlying pattern.
    Calendar {
        pattern: String,
    },
    /// Stored contracts for an underlying pattern.
    Contracts {
        pattern: String,
    },
    /// Drop the database and recreate it with a new bucket count. Deletes all data.
    Repartition {
        #[arg(long)]
        buckets: u32,

        /// Actually drop (without this flag, only previews).
        #[arg(long, default_value_t = false)]
        confirm: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mut config = match &cli.config {
        Some(path) => ImportConfig::from_file(path)?,
        None => ImportConfig::default(),
    };

    match cli.command {
        Commands::Init => {
            open(&cli.store_dir, config)?.init()?;
            println!("Initialized {}", cli.store_dir.display());
            Ok(())
        }
        Commands::Import { file } => run_import(&open(&cli.store_dir, config)?, &file),
        Commands::ImportDir {
            dir,
            workers,
            resume,
        } => {
            if let Some(workers) = workers {
                config.workers = workers;
            }
            config.resume |= resume;
            config.validate()?;
            run_import_dir(&open(&cli.store_dir, config)?, &dir)
        }
        Commands::Query {
            pattern,
            start,
            end,
            option_type,
            limit,
        } => run_query(
            &open(&cli.store_dir, config)?,
            &pattern,
            parse_bound(&start)?,
            parse_bound(&end)?,
            option_type,
            limit,
        ),
        Commands::Calendar { pattern } => {
            let service = open(&cli.store_dir, config)?;
            let dates = service.engine().trading_calendar(service.session(), &pattern)?;
            for date in &dates {
                println!("{date}");
            }
            eprintln!("{} dates", dates.len());
            Ok(())
        }
        Commands::Contracts { pattern } => run_contracts(&open(&cli.store_dir, config)?, &pattern),
        Commands::Repartition { buckets, confirm } => {
            run_repartition(&open(&cli.store_dir, config)?, &cli.store_dir, buckets, confirm)
        }
    }
}

fn open(store_dir: &Path, config: ImportConfig) -> Result<OptionDataService> {
    Ok(OptionDataService::open(store_dir, config)?)
}

/// `YYYY-MM-DD` stays a calendar date (whole day at the range end);
/// anything else goes through the CSV timestamp parser.
fn parse_bound(raw: &str) -> Result<TimeBound> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Ok(TimeBound::from(date));
    }
    match parse_timestamp_ms(raw) {
        Some(ms) => Ok(TimeBound::from(ms)),
        None => bail!("cannot parse '{raw}' as a date or timestamp"),
    }
}

fn run_import(service: &OptionDataService, file: &Path) -> Result<()> {
    let batch = service.import_option_csv(file)?;
    print_batch(&batch);
    if batch.status == ImportStatus::Failed {
        std::process::exit(1);
    }
    Ok(())
}

fn run_import_dir(service: &OptionDataService, dir: &Path) -> Result<()> {
    let report = service.import_directory_report(dir, &CancelToken::new())?;
    for batch in &report.batches {
        print_batch(batch);
    }

    println!();
    println!(
        "{} files: {} verified, {} mismatched, {} failed, {} skipped",
        report.batches.len(),
        report.count(ImportStatus::Verified),
        report.count(ImportStatus::Mismatched),
        report.count(ImportStatus::Failed),
        report.count(ImportStatus::Skipped)
    );
    if report.count(ImportStatus::Failed) > 0 {
        std::process::exit(1);
    }
    Ok(())
}

fn print_batch(batch: &ImportBatch) {
    let file = batch.source_path.display();
    match batch.status {
        ImportStatus::Failed => {
            let reason = batch
                .failure
                .as_ref()
                .map(|f| f.to_string())
                .unwrap_or_default();
            println!("{:<12} {file}: {reason}", batch.status);
        }
        ImportStatus::Skipped | ImportStatus::Cancelled => {
            println!("{:<12} {file}", batch.status);
        }
        _ => {
            let issues = batch
                .diagnostics
                .as_ref()
                .map(|d| d.summary())
                .unwrap_or_default();
            println!(
                "{:<12} {file}: {} rows in, {} stored (expected {}){}{}",
                batch.status,
                batch.row_count_in,
                batch.stored_row_count.unwrap_or_default(),
                batch.expected_row_count.unwrap_or_default(),
                if issues.is_empty() { "" } else { ", " },
                issues
            );
        }
    }
}

fn run_query(
    service: &OptionDataService,
    pattern: &str,
    start: TimeBound,
    end: TimeBound,
    option_type: Option<OptionType>,
    limit: Option<usize>,
) -> Result<()> {
    let request = RangeQuery::new(pattern, start, end)
        .option_type(option_type)
        .limit(limit);
    let df = service.engine().query_frame(service.session(), &request)?;
    println!("{df}");
    Ok(())
}

fn run_contracts(service: &OptionDataService, pattern: &str) -> Result<()> {
    let contracts = service.engine().list_contracts(service.session(), pattern)?;
    if contracts.is_empty() {
        println!("No contracts stored for '{pattern}'");
        return Ok(());
    }

    println!(
        "{:<24} {:<6} {:>12} {:>5} {:>10} {:<20} {:<20}",
        "Contract", "Under", "Expiry", "Type", "Strike", "First", "Last"
    );
    println!("{}", "-".repeat(103));
    for c in &contracts {
        println!(
            "{:<24} {:<6} {:>12} {:>5} {:>10.3} {:<20} {:<20}  {} rows",
            c.identity.code(),
            c.identity.underlying,
            c.identity.expiry,
            c.identity.option_type.code(),
            c.identity.strike(),
            fmt_ms(c.first_timestamp),
            fmt_ms(c.last_timestamp),
            c.rows
        );
    }
    Ok(())
}

fn fmt_ms(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn run_repartition(
    service: &OptionDataService,
    store_dir: &Path,
    buckets: u32,
    confirm: bool,
) -> Result<()> {
    if buckets == 0 {
        bail!("--buckets must be at least 1");
    }
    if !confirm {
        println!(
            "Would drop database '{}' in {} and recreate it with {buckets} buckets. All stored bars are deleted.",
            service.config().database,
            store_dir.display()
        );
        println!("Run with --confirm to proceed.");
        return Ok(());
    }
    service.repartition(buckets, Destructive::Confirmed)?;
    println!("Repartitioned '{}' into {buckets} buckets", service.config().database);
    Ok(())
}
