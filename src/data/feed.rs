use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use super::model::{
    deserialize_timestamp, format_timestamp, Compound, CorrectedMeasurement, Measurement,
    SampleCount,
};
use crate::correction::rules::RuleId;

// ---------------------------------------------------------------------------
// Corrected-data feed – one JSON document per compound
// ---------------------------------------------------------------------------

/// One entry of a compound's feed document. The short field names are what
/// the flagging front-end reads; `dropped`, `rules`, `notes` and `samples`
/// are audit extras written only when they carry information.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedRecord {
    #[serde(
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub date: DateTime<Utc>,
    pub rt: Option<f64>,
    pub pa: Option<f64>,
    pub cpa: Option<f64>,
    pub mr: Option<f64>,
    #[serde(default)]
    pub file: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub dropped: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<RuleId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
    #[serde(default, skip_serializing_if = "is_single")]
    pub samples: SampleCount,
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(ts))
}

fn is_single(samples: &SampleCount) -> bool {
    *samples == SampleCount::Single
}

impl From<&CorrectedMeasurement> for FeedRecord {
    fn from(c: &CorrectedMeasurement) -> Self {
        let m = &c.record;
        FeedRecord {
            date: m.timestamp,
            rt: m.retention_time,
            pa: m.peak_area,
            cpa: m.corrected_peak_area,
            mr: m.mixing_ratio,
            file: m.source_file.clone(),
            dropped: c.dropped,
            rules: c.applied_rules.clone(),
            notes: c.notes.clone(),
            samples: m.sample_count,
        }
    }
}

impl FeedRecord {
    pub fn into_corrected(self, compound: Compound) -> CorrectedMeasurement {
        CorrectedMeasurement {
            record: Measurement {
                compound,
                timestamp: self.date,
                retention_time: self.rt,
                peak_area: self.pa,
                corrected_peak_area: self.cpa,
                mixing_ratio: self.mr,
                source_file: self.file,
                sample_count: self.samples,
            },
            dropped: self.dropped,
            applied_rules: self.rules,
            notes: self.notes,
        }
    }
}

/// Characters Windows refuses in file names.
const RESERVED: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

/// File name stem for a compound's feed, with reserved characters replaced
/// by `_` (`propyne*` -> `propyne_`).
pub fn feed_stem(compound: Compound) -> String {
    compound
        .name()
        .chars()
        .map(|ch| if RESERVED.contains(&ch) { '_' } else { ch })
        .collect()
}

/// `{dir}/{stem}.json`
pub fn feed_path(dir: &Path, compound: Compound) -> PathBuf {
    dir.join(format!("{}.json", feed_stem(compound)))
}

/// The compound a feed file belongs to, from its file stem. Files named
/// with the raw compound name are accepted too.
pub fn compound_from_path(path: &Path) -> Option<Compound> {
    let stem = path.file_stem()?.to_str()?;
    Compound::parse(stem).or_else(|| Compound::all().find(|c| feed_stem(*c) == stem))
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Write one compound's feed document. Dropped records are left out unless
/// `include_dropped` is set.
pub fn write_feed(path: &Path, records: &[CorrectedMeasurement], include_dropped: bool) -> Result<usize> {
    let feed: Vec<FeedRecord> = records
        .iter()
        .filter(|c| include_dropped || !c.dropped)
        .map(FeedRecord::from)
        .collect();

    let text = serde_json::to_string_pretty(&feed).context("serialising feed")?;
    std::fs::write(path, text).with_context(|| format!("writing feed {}", path.display()))?;
    Ok(feed.len())
}

/// Write every compound's feed into `dir`, creating it if needed.
pub fn write_feed_dir(
    dir: &Path,
    by_compound: &BTreeMap<Compound, Vec<CorrectedMeasurement>>,
    include_dropped: bool,
) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let mut written = Vec::with_capacity(by_compound.len());
    for (compound, records) in by_compound {
        let path = feed_path(dir, *compound);
        let n = write_feed(&path, records, include_dropped)?;
        log::info!("Wrote {n} {compound} records to {}", path.display());
        written.push(path);
    }
    Ok(written)
}

// ---------------------------------------------------------------------------
// Reading
// ---------------------------------------------------------------------------

/// Load one feed document. The compound comes from the file name.
pub fn load_feed(path: &Path) -> Result<(Compound, Vec<CorrectedMeasurement>)> {
    let compound = compound_from_path(path)
        .with_context(|| format!("{} is not named after a monitored compound", path.display()))?;

    let text = std::fs::read_to_string(path).context("reading feed file")?;
    let records: Vec<FeedRecord> = serde_json::from_str(&text)
        .with_context(|| format!("parsing feed {}", path.display()))?;

    let corrected = records
        .into_iter()
        .map(|r| r.into_corrected(compound))
        .collect();
    Ok((compound, corrected))
}

/// Load every compound feed in a directory. Other files are skipped.
pub fn load_feed_dir(dir: &Path) -> Result<BTreeMap<Compound, Vec<CorrectedMeasurement>>> {
    let mut loaded = BTreeMap::new();
    let entries = std::fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))?;

    for entry in entries {
        let path = entry.context("reading directory entry")?.path();
        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        if !is_json || compound_from_path(&path).is_none() {
            continue;
        }
        let (compound, records) = load_feed(&path)?;
        loaded.insert(compound, records);
    }

    log::info!("Loaded feeds for {} compounds from {}", loaded.len(), dir.display());
    Ok(loaded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn corrected(ts: DateTime<Utc>, mr: Option<f64>, dropped: bool) -> CorrectedMeasurement {
        let compound = Compound::parse("CFC-11").unwrap();
        let mut record = Measurement::new(compound, ts, mr);
        record.retention_time = Some(12.5);
        record.source_file = "2018_06_01_02.D".into();
        CorrectedMeasurement {
            record,
            dropped,
            applied_rules: if dropped { vec![RuleId(3)] } else { Vec::new() },
            notes: Vec::new(),
        }
    }

    #[test]
    fn writes_contract_field_names() {
        let ts = Utc.with_ymd_and_hms(2018, 6, 1, 12, 0, 0).unwrap();
        let json = serde_json::to_value(FeedRecord::from(&corrected(ts, Some(231.0), false))).unwrap();
        let obj = json.as_object().unwrap();
        let mut keys: Vec<_> = obj.keys().map(String::as_str).collect();
        keys.sort();
        assert_eq!(keys, vec!["cpa", "date", "file", "mr", "pa", "rt"]);
        assert_eq!(obj["date"], "2018-06-01 12:00:00");
    }

    #[test]
    fn reads_feeds_with_epoch_dates() {
        let text = r#"[{"date": 1527854400, "rt": null, "pa": null, "cpa": null, "mr": 2.5, "file": "x.D"}]"#;
        let records: Vec<FeedRecord> = serde_json::from_str(text).unwrap();
        assert_eq!(records[0].date, Utc.with_ymd_and_hms(2018, 6, 1, 12, 0, 0).unwrap());
        assert!(!records[0].dropped);
    }

    #[test]
    fn feed_dir_skips_dropped_and_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let compound = Compound::parse("CFC-11").unwrap();
        let t0 = Utc.with_ymd_and_hms(2018, 6, 1, 12, 0, 0).unwrap();
        let t1 = Utc.with_ymd_and_hms(2018, 6, 2, 12, 0, 0).unwrap();

        let mut by_compound = BTreeMap::new();
        by_compound.insert(
            compound,
            vec![corrected(t0, Some(231.0), false), corrected(t1, None, true)],
        );
        std::fs::write(dir.path().join("notes.json"), "not a feed").unwrap();

        write_feed_dir(dir.path(), &by_compound, false).unwrap();
        let loaded = load_feed_dir(dir.path()).unwrap();
        assert_eq!(loaded[&compound], vec![corrected(t0, Some(231.0), false)]);
    }

    #[test]
    fn feed_names_are_file_system_safe() {
        let propyne = Compound::parse("propyne*").unwrap();
        let path = feed_path(Path::new("feeds"), propyne);
        assert_eq!(path, Path::new("feeds").join("propyne_.json"));
        assert_eq!(compound_from_path(&path), Some(propyne));

        let butadiene = Compound::parse("1,3-butadiene").unwrap();
        assert_eq!(compound_from_path(&feed_path(Path::new("."), butadiene)), Some(butadiene));
        assert_eq!(compound_from_path(Path::new("propyne*.json")), Some(propyne));
        assert_eq!(compound_from_path(Path::new("notes.json")), None);
    }

    #[test]
    fn reserved_names_round_trip_through_a_feed_dir() {
        let dir = tempfile::tempdir().unwrap();
        let propyne = Compound::parse("propyne*").unwrap();
        let ts = Utc.with_ymd_and_hms(2019, 2, 1, 11, 50, 0).unwrap();
        let record = CorrectedMeasurement::untouched(Measurement::new(propyne, ts, Some(3.2)));

        let mut by_compound = BTreeMap::new();
        by_compound.insert(propyne, vec![record.clone()]);
        write_feed_dir(dir.path(), &by_compound, false).unwrap();

        let loaded = load_feed_dir(dir.path()).unwrap();
        assert_eq!(loaded[&propyne], vec![record]);
    }
}
