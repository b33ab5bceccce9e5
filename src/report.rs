//! Final reporting: legacy filter documents and the wide-format CSV.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};

use crate::data::model::{format_timestamp, Compound, CorrectedMeasurement};
use crate::session::export::FlagRecord;

/// `{ "YYYY-MM-DD HH:MM": [compound, ...] }`
pub type FilterDocument = BTreeMap<String, Vec<String>>;

/// A filter entry naming this instead of a compound applies to every compound.
pub const ALL_COMPOUNDS: &str = "all";

const FILTER_KEY_FORMAT: &str = "%Y-%m-%d %H:%M";

// ---------------------------------------------------------------------------
// Filter documents
// ---------------------------------------------------------------------------

pub fn filter_key(ts: &DateTime<Utc>) -> String {
    ts.format(FILTER_KEY_FORMAT).to_string()
}

/// Collapse exported flags into a filter document. Flags of one compound at
/// the same minute under different axis pairs become a single entry.
pub fn filter_document(flags: &[FlagRecord]) -> FilterDocument {
    let mut keyed: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for flag in flags.iter().filter(|f| f.selected) {
        keyed
            .entry(filter_key(&flag.timestamp))
            .or_default()
            .insert(flag.compound.name().to_string());
    }
    keyed
        .into_iter()
        .map(|(key, compounds)| (key, compounds.into_iter().collect()))
        .collect()
}

pub fn load_filter_document(path: &Path) -> Result<FilterDocument> {
    let text = std::fs::read_to_string(path).context("reading filter file")?;
    serde_json::from_str(&text).with_context(|| format!("parsing filters {}", path.display()))
}

pub fn write_filter_document(path: &Path, doc: &FilterDocument) -> Result<()> {
    let text = serde_json::to_string_pretty(doc).context("serialising filters")?;
    std::fs::write(path, text).with_context(|| format!("writing filters {}", path.display()))
}

/// Merge every `.json` filter document in `dir`.
pub fn load_filter_dir(dir: &Path) -> Result<FilterDocument> {
    let mut merged = FilterDocument::new();
    let entries = std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))?;

    for entry in entries {
        let path = entry.context("reading directory entry")?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        for (key, compounds) in load_filter_document(&path)? {
            merged.entry(key).or_default().extend(compounds);
        }
    }
    Ok(merged)
}

/// Filter document parsed into minute windows.
#[derive(Debug, Clone, Default)]
struct FilterIndex {
    minutes: BTreeMap<DateTime<Utc>, BTreeSet<String>>,
}

impl FilterIndex {
    fn new(doc: &FilterDocument) -> Self {
        let mut minutes: BTreeMap<DateTime<Utc>, BTreeSet<String>> = BTreeMap::new();
        for (key, compounds) in doc {
            match NaiveDateTime::parse_from_str(key, FILTER_KEY_FORMAT) {
                Ok(naive) => minutes
                    .entry(naive.and_utc())
                    .or_default()
                    .extend(compounds.iter().cloned()),
                Err(e) => log::warn!("Ignoring filter entry '{key}': {e}"),
            }
        }
        Self { minutes }
    }

    /// Keys are minute-truncated, so a key covers `[key, key + 1 min)`.
    fn is_flagged(&self, compound: Compound, ts: &DateTime<Utc>) -> bool {
        let earliest = *ts - TimeDelta::minutes(1);
        self.minutes
            .range(..=*ts)
            .rev()
            .take_while(|(minute, _)| **minute > earliest)
            .any(|(_, names)| names.contains(compound.name()) || names.contains(ALL_COMPOUNDS))
    }
}

// ---------------------------------------------------------------------------
// Final report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportRow {
    pub timestamp: DateTime<Utc>,
    pub mixing_ratio: Option<f64>,
    pub flagged: bool,
}

/// Mark every corrected record named by the filter document. Flagged
/// records keep their row with the mixing ratio blanked; dropped records do
/// not reach the report.
pub fn apply_filter_document(
    by_compound: &BTreeMap<Compound, Vec<CorrectedMeasurement>>,
    doc: &FilterDocument,
) -> BTreeMap<Compound, Vec<ReportRow>> {
    let index = FilterIndex::new(doc);
    let mut flagged_total = 0usize;

    let rows = by_compound
        .iter()
        .map(|(&compound, records)| {
            let rows: Vec<ReportRow> = records
                .iter()
                .filter(|c| !c.dropped)
                .map(|c| {
                    let flagged = index.is_flagged(compound, &c.timestamp());
                    flagged_total += usize::from(flagged);
                    ReportRow {
                        timestamp: c.timestamp(),
                        mixing_ratio: if flagged { None } else { c.mixing_ratio() },
                        flagged,
                    }
                })
                .collect();
            (compound, rows)
        })
        .collect();

    log::info!("Filter document flagged {flagged_total} records");
    rows
}

/// Write the wide report: one row per timestamp, `{compound}_mr` and
/// `{compound}_flag` columns per compound. Returns the number of data rows.
pub fn write_final_csv(path: &Path, rows: &BTreeMap<Compound, Vec<ReportRow>>) -> Result<usize> {
    let mut table: BTreeMap<DateTime<Utc>, BTreeMap<Compound, (Option<f64>, bool)>> = BTreeMap::new();
    for (&compound, compound_rows) in rows {
        for row in compound_rows {
            table
                .entry(row.timestamp)
                .or_default()
                .insert(compound, (row.mixing_ratio, row.flagged));
        }
    }

    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating report {}", path.display()))?;

    let mut header = vec!["date".to_string()];
    for compound in rows.keys() {
        header.push(format!("{compound}_mr"));
        header.push(format!("{compound}_flag"));
    }
    writer.write_record(&header).context("writing report header")?;

    for (ts, values) in &table {
        let mut record = vec![format_timestamp(ts)];
        for compound in rows.keys() {
            match values.get(compound) {
                Some((mr, flagged)) => {
                    record.push(mr.map(|v| format!("{v:.3}")).unwrap_or_default());
                    record.push(flagged.to_string());
                }
                None => {
                    record.push(String::new());
                    record.push(String::new());
                }
            }
        }
        writer.write_record(&record).context("writing report row")?;
    }
    writer.flush().context("flushing report")?;

    log::info!("Wrote {} report rows to {}", table.len(), path.display());
    Ok(table.len())
}
