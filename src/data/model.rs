use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::correction::rules::RuleId;
use crate::error::{DataError, InteractionError};

// ---------------------------------------------------------------------------
// Compound – one monitored species
// ---------------------------------------------------------------------------

/// Every species the station reports, in elution order.
pub static MONITORED_COMPOUNDS: &[&str] = &[
    "PFC-116", "ethene", "SF6", "CFC-13", "ethane", "SO2F2", "HFC-143a", "PFC-218", "HFC-125",
    "OCS", "H-1301", "HFC-134a", "HFC-152a", "HCFC-22", "CFC-115", "propene", "methyl_chloride",
    "propane", "propyne*", "methanol", "PFC-318", "CFC-12", "acetaldehyde", "HCFC-142b",
    "methyl_bromide", "HCFC-124", "HFC-245fa", "methyl_formate", "i-butane", "iso-butene",
    "1,3-butadiene", "1-butene", "H-1211", "ethanol", "trans-2-butene", "CFC-114", "n-butane",
    "cis-2-butene", "CH2Cl2", "acetone", "methyl_iodide", "HFC-365mfc", "CFC-11", "HCFC-141b",
    "i-pentane", "1-pentene", "isoprene", "trans-2-pentene", "cis-2-pentene", "n-pentane",
    "CFC-113", "H-2402", "chloroform", "2-methylpentane", "3-methylpentane", "CH2Br2", "hexane",
    "benzene", "methyl_chloroform", "CCl4", "cyclohexane", "n-heptane", "toluene",
    "perchloroethylene", "iso-octane", "CHBr3", "octane", "ethylbenzene", "m-xylene",
    "o-xylene", "1,2,4-trimethylbenzene", "1,3,5-trimethylbenzene",
];

/// Handle onto one entry of [`MONITORED_COMPOUNDS`].
///
/// Ordering is by name, which is the order selections are exported in.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Compound(&'static str);

impl Compound {
    /// Look up a monitored compound by its exact name.
    pub fn parse(name: &str) -> Option<Self> {
        MONITORED_COMPOUNDS
            .iter()
            .find(|c| **c == name)
            .copied()
            .map(Compound)
    }

    pub fn name(&self) -> &'static str {
        self.0
    }

    pub fn all() -> impl Iterator<Item = Compound> {
        MONITORED_COMPOUNDS.iter().copied().map(Compound)
    }
}

impl FromStr for Compound {
    type Err = DataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Compound::parse(s.trim()).ok_or_else(|| DataError::UnknownCompound(s.to_string()))
    }
}

impl fmt::Display for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

impl fmt::Debug for Compound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Compound({})", self.0)
    }
}

impl Serialize for Compound {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0)
    }
}

impl<'de> Deserialize<'de> for Compound {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Two samples per day were collected (and averaged) from this date on.
pub fn two_sample_cutover() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2018, 12, 20, 0, 0, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

/// Parse the loosely ISO-formatted date strings found in feeds, rule
/// tables and filter documents. Zone-less values are taken as UTC.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Deserialize a timestamp written either as a date string or as epoch
/// seconds. Works for JSON and CSV (which infers the cell type).
pub fn deserialize_timestamp<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
    struct TimestampVisitor;

    impl Visitor<'_> for TimestampVisitor {
        type Value = DateTime<Utc>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("a date string or epoch seconds")
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
            parse_timestamp(v).ok_or_else(|| E::custom(format!("unrecognised date '{v}'")))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
            x_to_timestamp(v).ok_or_else(|| E::custom(format!("epoch {v} out of range")))
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
            DateTime::from_timestamp(v, 0).ok_or_else(|| E::custom(format!("epoch {v} out of range")))
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
            let secs = i64::try_from(v).map_err(E::custom)?;
            self.visit_i64(secs)
        }
    }

    deserializer.deserialize_any(TimestampVisitor)
}

/// Canonical on-disk rendering of a timestamp.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Timestamp → plot x coordinate (seconds since the epoch).
pub fn timestamp_to_x(ts: &DateTime<Utc>) -> f64 {
    ts.timestamp() as f64 + f64::from(ts.timestamp_subsec_millis()) / 1000.0
}

/// Plot x coordinate → timestamp, rounded to the millisecond.
pub fn x_to_timestamp(x: f64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis((x * 1000.0).round() as i64)
}

// ---------------------------------------------------------------------------
// Measurement – one instrument observation
// ---------------------------------------------------------------------------

/// Whether a record is one sample or the mean of the day's two samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleCount {
    #[default]
    Single,
    Pair,
}

impl SampleCount {
    pub fn from_count(n: i64) -> Option<Self> {
        match n {
            1 => Some(SampleCount::Single),
            2 => Some(SampleCount::Pair),
            _ => None,
        }
    }
}

/// One measured compound in one ambient run.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub compound: Compound,
    /// Sample time, or the midpoint of an averaged pair.
    pub timestamp: DateTime<Utc>,
    pub retention_time: Option<f64>,
    pub peak_area: Option<f64>,
    pub corrected_peak_area: Option<f64>,
    pub mixing_ratio: Option<f64>,
    /// Provenance, usually the integration file name.
    pub source_file: String,
    pub sample_count: SampleCount,
}

impl Measurement {
    /// A single-sample record carrying only a mixing ratio.
    pub fn new(compound: Compound, timestamp: DateTime<Utc>, mixing_ratio: Option<f64>) -> Self {
        Self {
            compound,
            timestamp,
            retention_time: None,
            peak_area: None,
            corrected_peak_area: None,
            mixing_ratio,
            source_file: String::new(),
            sample_count: SampleCount::Single,
        }
    }
}

// ---------------------------------------------------------------------------
// CorrectedMeasurement – output of the correction engine
// ---------------------------------------------------------------------------

/// A measurement after rule evaluation. `record.mixing_ratio` holds the
/// corrected value.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrectedMeasurement {
    pub record: Measurement,
    /// Removed by a removal window; kept for audit only.
    pub dropped: bool,
    /// Rules that touched this record, in resolution order.
    pub applied_rules: Vec<RuleId>,
    /// Scale-harmonization annotations.
    pub notes: Vec<String>,
}

impl CorrectedMeasurement {
    /// Wrap a record that no rule touched.
    pub fn untouched(record: Measurement) -> Self {
        Self {
            record,
            dropped: false,
            applied_rules: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn compound(&self) -> Compound {
        self.record.compound
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.record.timestamp
    }

    pub fn mixing_ratio(&self) -> Option<f64> {
        self.record.mixing_ratio
    }
}

// ---------------------------------------------------------------------------
// Field – plottable measurement channels
// ---------------------------------------------------------------------------

/// A channel that can be mapped onto a plot axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Field {
    #[serde(rename = "date")]
    Date,
    #[serde(rename = "mr")]
    MixingRatio,
    #[serde(rename = "pa")]
    PeakArea,
    #[serde(rename = "cpa")]
    CorrectedPeakArea,
    #[serde(rename = "rt")]
    RetentionTime,
}

impl Field {
    /// Fields allowed on the x axis.
    pub const X_FIELDS: &'static [Field] = &[Field::Date];

    /// Fields allowed on the y axis.
    pub const Y_FIELDS: &'static [Field] = &[
        Field::Date,
        Field::MixingRatio,
        Field::PeakArea,
        Field::CorrectedPeakArea,
        Field::RetentionTime,
    ];

    /// Short key, identical to the feed document's field name.
    pub fn key(&self) -> &'static str {
        match self {
            Field::Date => "date",
            Field::MixingRatio => "mr",
            Field::PeakArea => "pa",
            Field::CorrectedPeakArea => "cpa",
            Field::RetentionTime => "rt",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Field::Date => "Date",
            Field::MixingRatio => "Mixing Ratio (pptv)",
            Field::PeakArea => "Peak Area",
            Field::CorrectedPeakArea => "Corrected Peak Area",
            Field::RetentionTime => "Retention Time (min)",
        }
    }

    /// Numeric plot coordinate of this channel for a record.
    pub fn value_of(&self, m: &Measurement) -> Option<f64> {
        match self {
            Field::Date => Some(timestamp_to_x(&m.timestamp)),
            Field::MixingRatio => m.mixing_ratio,
            Field::PeakArea => m.peak_area,
            Field::CorrectedPeakArea => m.corrected_peak_area,
            Field::RetentionTime => m.retention_time,
        }
    }
}

impl FromStr for Field {
    type Err = InteractionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "date" => Ok(Field::Date),
            "mr" | "mixing_ratio" => Ok(Field::MixingRatio),
            "pa" | "peak_area" => Ok(Field::PeakArea),
            "cpa" | "corrected_peak_area" => Ok(Field::CorrectedPeakArea),
            "rt" | "retention_time" => Ok(Field::RetentionTime),
            other => Err(InteractionError::UnknownField(other.to_string())),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// The (x, y) field mapping a selection was made under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AxisPair {
    pub x: Field,
    pub y: Field,
}

impl AxisPair {
    pub fn new(x: Field, y: Field) -> Self {
        Self { x, y }
    }

    /// Parse and validate a pair of field names against the allowed sets.
    pub fn parse(x: &str, y: &str) -> Result<Self, InteractionError> {
        let x_field: Field = x.parse()?;
        if !Field::X_FIELDS.contains(&x_field) {
            return Err(InteractionError::UnknownField(x.to_string()));
        }
        let y_field: Field = y.parse()?;
        Ok(Self::new(x_field, y_field))
    }
}

impl Default for AxisPair {
    fn default() -> Self {
        Self::new(Field::Date, Field::MixingRatio)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compound_lookup_is_exact() {
        assert_eq!(Compound::parse("CFC-11").map(|c| c.name()), Some("CFC-11"));
        assert!(Compound::parse("cfc-11").is_none());
        assert!("freon".parse::<Compound>().is_err());
        assert_eq!(Compound::all().count(), MONITORED_COMPOUNDS.len());
    }

    #[test]
    fn compounds_order_by_name() {
        let a = Compound::parse("CFC-11").unwrap();
        let b = Compound::parse("HCFC-141b").unwrap();
        assert!(a < b);
    }

    #[test]
    fn parses_loose_date_formats() {
        let expected = Utc.with_ymd_and_hms(2018, 6, 1, 13, 5, 0).unwrap();
        assert_eq!(parse_timestamp("2018-06-01 13:05"), Some(expected));
        assert_eq!(parse_timestamp("2018-06-01T13:05:00"), Some(expected));
        assert_eq!(parse_timestamp("2018-06-01T13:05:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2018-06-01T15:05:00+02:00"), Some(expected));
        assert_eq!(
            parse_timestamp("2018-06-01"),
            Utc.with_ymd_and_hms(2018, 6, 1, 0, 0, 0).single()
        );
        assert_eq!(parse_timestamp("June 1st"), None);
    }

    #[test]
    fn x_coordinate_round_trips_to_the_millisecond() {
        let ts = Utc.with_ymd_and_hms(2019, 2, 3, 4, 5, 6).unwrap();
        assert_eq!(x_to_timestamp(timestamp_to_x(&ts)), Some(ts));
    }

    #[test]
    fn field_names_accept_short_and_long_forms() {
        assert_eq!("mr".parse::<Field>(), Ok(Field::MixingRatio));
        assert_eq!("peak_area".parse::<Field>(), Ok(Field::PeakArea));
        assert_eq!(
            "area".parse::<Field>(),
            Err(InteractionError::UnknownField("area".into()))
        );
    }

    #[test]
    fn only_date_is_allowed_on_x() {
        assert!(AxisPair::parse("date", "pa").is_ok());
        assert_eq!(
            AxisPair::parse("mr", "pa"),
            Err(InteractionError::UnknownField("mr".into()))
        );
    }
}
