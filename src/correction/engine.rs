use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};

use super::rules::{RuleKind, RuleTable};
use crate::data::averaging::average_pairs;
use crate::data::loader::{load_measurements, LoadedRow};
use crate::data::model::{
    format_timestamp, two_sample_cutover, Compound, CorrectedMeasurement, Measurement, SampleCount,
};
use crate::error::DataError;

// ---------------------------------------------------------------------------
// Single-record correction
// ---------------------------------------------------------------------------

/// Apply the table's rules to one measurement.
///
/// Resolution order:
/// 1. removal windows: the record is dropped and nothing else applies;
/// 2. detection-limit floor: values below the limit become `limit / 2`;
/// 3. scale factor: values inside the window are divided by the factor;
/// 4. scale-harmonization notes: recorded, value untouched.
///
/// A missing mixing ratio skips steps 2 and 3.
pub fn correct(m: &Measurement, table: &RuleTable) -> Result<CorrectedMeasurement, DataError> {
    let rules: Vec<_> = table
        .rules_for(m.compound)
        .ok_or_else(|| DataError::UnknownCompound(m.compound.to_string()))?
        .filter(|rule| rule.applies_at(&m.timestamp))
        .collect();

    validate(m)?;

    let mut out = CorrectedMeasurement::untouched(m.clone());

    if let Some(removal) = rules.iter().find(|r| matches!(r.kind, RuleKind::Removal)) {
        out.dropped = true;
        out.record.mixing_ratio = None;
        out.applied_rules.push(removal.id);
        return Ok(out);
    }

    if let Some(mut mr) = out.record.mixing_ratio {
        for rule in &rules {
            if let RuleKind::DetectionLimit { limit } = rule.kind {
                if mr < limit {
                    mr = limit / 2.0;
                    out.applied_rules.push(rule.id);
                }
            }
        }
        for rule in &rules {
            if let RuleKind::ScaleFactor { factor } = rule.kind {
                mr /= factor;
                out.applied_rules.push(rule.id);
            }
        }
        out.record.mixing_ratio = Some(mr);
    }

    for rule in &rules {
        if let RuleKind::ScaleHarmonization { note } = &rule.kind {
            out.notes.push(note.clone());
            out.applied_rules.push(rule.id);
        }
    }

    Ok(out)
}

fn validate(m: &Measurement) -> Result<(), DataError> {
    if let Some(value) = m.mixing_ratio {
        if value < 0.0 {
            return Err(DataError::NegativeMixingRatio {
                compound: m.compound.to_string(),
                timestamp: format_timestamp(&m.timestamp),
                value,
            });
        }
    }
    if m.sample_count == SampleCount::Pair && m.timestamp < two_sample_cutover() {
        return Err(DataError::InvalidSampleCount {
            compound: m.compound.to_string(),
            timestamp: format_timestamp(&m.timestamp),
        });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Batch correction
// ---------------------------------------------------------------------------

/// A record the batch refused, with its position in the input.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub index: usize,
    pub error: DataError,
}

/// Result of correcting a batch: everything that could be corrected, plus
/// the per-record failures.
#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub corrected: Vec<CorrectedMeasurement>,
    pub rejected: Vec<Rejection>,
}

impl BatchOutcome {
    pub fn dropped_count(&self) -> usize {
        self.corrected.iter().filter(|c| c.dropped).count()
    }

    /// Corrected records grouped per compound, input order kept.
    pub fn by_compound(&self) -> BTreeMap<Compound, Vec<CorrectedMeasurement>> {
        let mut grouped: BTreeMap<Compound, Vec<CorrectedMeasurement>> = BTreeMap::new();
        for c in &self.corrected {
            grouped.entry(c.compound()).or_default().push(c.clone());
        }
        grouped
    }
}

/// Correct a whole ingested stream. Bad records are logged and skipped;
/// they never abort the batch.
pub fn correct_batch(measurements: &[Measurement], table: &RuleTable) -> BatchOutcome {
    correct_indexed(measurements.iter().map(Ok::<_, DataError>), table)
}

/// Correct rows as they came out of the loader. Rows that already failed
/// (an unknown compound) are rejected at their position.
pub fn correct_rows(rows: &[LoadedRow], table: &RuleTable) -> BatchOutcome {
    correct_indexed(rows.iter().map(|row| row.as_ref().map_err(Clone::clone)), table)
}

fn correct_indexed<'a>(
    rows: impl Iterator<Item = Result<&'a Measurement, DataError>>,
    table: &RuleTable,
) -> BatchOutcome {
    let mut outcome = BatchOutcome::default();
    let mut last_seen: BTreeMap<Compound, DateTime<Utc>> = BTreeMap::new();

    for (index, row) in rows.enumerate() {
        let result = row.and_then(|m| check_order(m, &last_seen).and_then(|_| correct(m, table)));
        match result {
            Ok(corrected) => {
                last_seen.insert(corrected.compound(), corrected.timestamp());
                outcome.corrected.push(corrected);
            }
            Err(error) => {
                log::warn!("Rejected record {index}: {error}");
                outcome.rejected.push(Rejection { index, error });
            }
        }
    }

    log::info!(
        "Corrected {} records ({} dropped by removal windows), rejected {}",
        outcome.corrected.len(),
        outcome.dropped_count(),
        outcome.rejected.len()
    );
    outcome
}

/// Load a measurement file, optionally collapse daily pairs, and correct it.
///
/// Without averaging, rejection indices are file rows. With averaging, rows
/// with unknown compounds are rejected at their file row first and the
/// remaining indices refer to the averaged stream.
pub fn correct_file(path: &Path, table: &RuleTable, average: bool) -> Result<BatchOutcome> {
    let rows = load_measurements(path)
        .with_context(|| format!("loading measurements from {}", path.display()))?;
    if !average {
        return Ok(correct_rows(&rows, table));
    }

    let mut unresolved = Vec::new();
    let mut measurements = Vec::with_capacity(rows.len());
    for (index, row) in rows.into_iter().enumerate() {
        match row {
            Ok(m) => measurements.push(m),
            Err(error) => {
                log::warn!("Rejected record {index}: {error}");
                unresolved.push(Rejection { index, error });
            }
        }
    }

    let before = measurements.len();
    let averaged = average_pairs(&measurements);
    log::info!("Averaged {before} samples into {} records", averaged.len());

    let mut outcome = correct_batch(&averaged, table);
    unresolved.append(&mut outcome.rejected);
    outcome.rejected = unresolved;
    Ok(outcome)
}

fn check_order(
    m: &Measurement,
    last_seen: &BTreeMap<Compound, DateTime<Utc>>,
) -> Result<(), DataError> {
    match last_seen.get(&m.compound) {
        Some(previous) if m.timestamp < *previous => Err(DataError::OutOfOrder {
            compound: m.compound.to_string(),
            timestamp: format_timestamp(&m.timestamp),
            previous: format_timestamp(previous),
        }),
        _ => Ok(()),
    }
}
