use std::collections::BTreeMap;

use chrono::{DurationRound, NaiveDate, TimeDelta};

use super::model::{two_sample_cutover, Compound, Measurement, SampleCount};

// ---------------------------------------------------------------------------
// Two-sample averaging
// ---------------------------------------------------------------------------

/// Collapse the two daily ambient samples into one averaged record.
///
/// Samples before [`two_sample_cutover`] pass through untouched. From the
/// cutover on, samples are grouped per compound and calendar day (UTC):
/// a day with exactly two samples becomes one [`SampleCount::Pair`] record
/// at the midpoint time (truncated to the minute), every other day is
/// discarded. A channel is averaged only when both samples carry it.
///
/// The output is ordered by compound, then timestamp.
pub fn average_pairs(samples: &[Measurement]) -> Vec<Measurement> {
    let cutover = two_sample_cutover();
    let mut out = Vec::new();
    let mut days: BTreeMap<(Compound, NaiveDate), Vec<&Measurement>> = BTreeMap::new();

    for m in samples {
        if m.timestamp < cutover {
            out.push(m.clone());
        } else {
            days.entry((m.compound, m.timestamp.date_naive()))
                .or_default()
                .push(m);
        }
    }

    let mut incomplete = 0usize;
    for ((compound, day), group) in days {
        match group.as_slice() {
            [first, second] => out.push(average(first, second)),
            _ => {
                incomplete += 1;
                log::debug!("{compound} {day}: {} samples, expected 2", group.len());
            }
        }
    }
    if incomplete > 0 {
        log::info!("Discarded {incomplete} compound-days without exactly two samples");
    }

    out.sort_by(|a, b| (a.compound, a.timestamp).cmp(&(b.compound, b.timestamp)));
    out
}

fn average(a: &Measurement, b: &Measurement) -> Measurement {
    let (first, second) = if a.timestamp <= b.timestamp { (a, b) } else { (b, a) };
    let midpoint = first.timestamp + (second.timestamp - first.timestamp) / 2;
    let timestamp = midpoint
        .duration_trunc(TimeDelta::minutes(1))
        .unwrap_or(midpoint);

    Measurement {
        compound: first.compound,
        timestamp,
        retention_time: mean(first.retention_time, second.retention_time),
        peak_area: mean(first.peak_area, second.peak_area),
        corrected_peak_area: mean(first.corrected_peak_area, second.corrected_peak_area),
        mixing_ratio: mean(first.mixing_ratio, second.mixing_ratio),
        source_file: format!("{} + {}", first.source_file, second.source_file),
        sample_count: SampleCount::Pair,
    }
}

fn mean(a: Option<f64>, b: Option<f64>) -> Option<f64> {
    Some((a? + b?) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    fn sample(name: &str, ts: DateTime<Utc>, mr: Option<f64>, file: &str) -> Measurement {
        let mut m = Measurement::new(Compound::parse(name).unwrap(), ts, mr);
        m.source_file = file.to_string();
        m
    }

    #[test]
    fn pairs_average_at_midpoint() {
        let samples = vec![
            sample("CFC-12", at(2019, 3, 1, 9, 0, 0), Some(500.0), "a.D"),
            sample("CFC-12", at(2019, 3, 1, 11, 3, 40), Some(504.0), "b.D"),
        ];
        let out = average_pairs(&samples);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].timestamp, at(2019, 3, 1, 10, 1, 0));
        assert_eq!(out[0].mixing_ratio, Some(502.0));
        assert_eq!(out[0].sample_count, SampleCount::Pair);
        assert_eq!(out[0].source_file, "a.D + b.D");
    }

    #[test]
    fn missing_half_of_pair_gives_missing_value() {
        let samples = vec![
            sample("CFC-12", at(2019, 3, 1, 9, 0, 0), Some(500.0), "a.D"),
            sample("CFC-12", at(2019, 3, 1, 11, 0, 0), None, "b.D"),
        ];
        assert_eq!(average_pairs(&samples)[0].mixing_ratio, None);
    }

    #[test]
    fn incomplete_days_are_discarded_and_early_samples_kept() {
        let samples = vec![
            sample("ethane", at(2018, 6, 1, 9, 0, 0), Some(900.0), "old.D"),
            sample("ethane", at(2019, 3, 2, 9, 0, 0), Some(1000.0), "lonely.D"),
            sample("ethane", at(2019, 3, 3, 8, 0, 0), Some(1.0), "x.D"),
            sample("ethane", at(2019, 3, 3, 9, 0, 0), Some(2.0), "y.D"),
            sample("ethane", at(2019, 3, 3, 10, 0, 0), Some(3.0), "z.D"),
        ];
        let out = average_pairs(&samples);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].source_file, "old.D");
        assert_eq!(out[0].sample_count, SampleCount::Single);
    }
}
