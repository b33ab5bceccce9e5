//! Batch correction: raw measurements + rule table → per-compound feeds,
//! optionally followed by the wide final report.
//!
//! ```bash
//! correct measurements.parquet --average-pairs --out-dir feeds \
//!     --filters flags/ --report final.csv
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;

use tracegas_qc::config::Settings;
use tracegas_qc::correction::{correct_file, RuleTable};
use tracegas_qc::data::feed::write_feed_dir;
use tracegas_qc::report::{self, FilterDocument};

#[derive(Parser, Debug)]
#[command(name = "correct")]
#[command(about = "Apply correction rules to GC measurements and write compound feeds")]
struct Args {
    /// Measurement file (.parquet, .json or .csv)
    input: PathBuf,

    /// Rule table (.toml or .json); defaults to the settings file, then the built-in table
    #[arg(long, value_name = "FILE", env = "TRACEGAS_QC_RULES")]
    rules: Option<PathBuf>,

    /// Directory for the `{compound}.json` feeds
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Collapse each day's two samples into one record (from the two-sample cutover on)
    #[arg(long)]
    average_pairs: bool,

    /// Keep records removed by removal windows in the feeds
    #[arg(long)]
    include_dropped: bool,

    /// Filter document, or a directory of them, marking flagged records in the report
    #[arg(long, value_name = "PATH")]
    filters: Option<PathBuf>,

    /// Write the wide final report to this CSV file
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let settings = Settings::load()?;

    // A bad rule table stops the run before any record is touched.
    let table = match &args.rules {
        Some(path) => RuleTable::load(path)?,
        None => settings.rule_table()?,
    };

    let outcome = correct_file(&args.input, &table, args.average_pairs)?;
    let by_compound = outcome.by_compound();

    let out_dir = args.out_dir.unwrap_or_else(|| settings.feed_dir.clone());
    let written = write_feed_dir(&out_dir, &by_compound, args.include_dropped)?;

    println!(
        "{} records corrected ({} dropped), {} rejected; {} feeds in {}",
        outcome.corrected.len(),
        outcome.dropped_count(),
        outcome.rejected.len(),
        written.len(),
        out_dir.display()
    );

    if let Some(report_path) = &args.report {
        let filters = match &args.filters {
            Some(path) if path.is_dir() => report::load_filter_dir(path)?,
            Some(path) => report::load_filter_document(path)?,
            None => FilterDocument::new(),
        };
        let rows = report::apply_filter_document(&by_compound, &filters);
        let n = report::write_final_csv(report_path, &rows)
            .with_context(|| format!("writing report {}", report_path.display()))?;
        println!("{n} report rows written to {}", report_path.display());
    }

    Ok(())
}
