use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use arrow::array::{
    Array, Float32Array, Float64Array, Int32Array, Int64Array, LargeStringArray, StringArray,
    TimestampMicrosecondArray, TimestampMillisecondArray, TimestampNanosecondArray,
    TimestampSecondArray,
};
use arrow::datatypes::{DataType, TimeUnit};
use chrono::{DateTime, Utc};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::Deserialize;

use super::model::{deserialize_timestamp, parse_timestamp, Compound, Measurement, SampleCount};
use crate::error::DataError;

// ---------------------------------------------------------------------------
// Public entry-point
// ---------------------------------------------------------------------------

/// One row of a measurement file. A compound outside the monitored list is
/// kept as a per-row error so the rest of the file still loads.
pub type LoadedRow = Result<Measurement, DataError>;

/// Load raw measurements from a file.  Dispatch by extension.
///
/// Supported formats:
/// * `.parquet` – one row per measurement (recommended for large exports)
/// * `.json`    – `[{ "compound": ..., "date": ..., "mr": ..., ... }, ...]`
/// * `.csv`     – header row with the same column names as the JSON keys
///
/// Columns: `compound`, `date`, `rt`, `pa`, `cpa`, `mr`, `file`, `samples`.
/// Only `compound` and `date` are required. Unreadable files and malformed
/// rows fail the whole load; unknown compounds come back as row errors.
pub fn load_measurements(path: &Path) -> Result<Vec<LoadedRow>> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let measurements = match ext.as_str() {
        "parquet" | "pq" => load_parquet(path),
        "json" => load_json(path),
        "csv" => load_csv(path),
        other => bail!("Unsupported file extension: .{other}"),
    }?;

    let unresolved = measurements.iter().filter(|row| row.is_err()).count();
    log::info!(
        "Loaded {} measurements from {} ({unresolved} with unknown compounds)",
        measurements.len(),
        path.display()
    );
    Ok(measurements)
}

// ---------------------------------------------------------------------------
// Row schema shared by JSON and CSV
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MeasurementRow {
    compound: String,
    #[serde(deserialize_with = "deserialize_timestamp")]
    date: DateTime<Utc>,
    #[serde(default)]
    rt: Option<f64>,
    #[serde(default)]
    pa: Option<f64>,
    #[serde(default)]
    cpa: Option<f64>,
    #[serde(default)]
    mr: Option<f64>,
    #[serde(default)]
    file: Option<String>,
    #[serde(default)]
    samples: Option<i64>,
}

impl MeasurementRow {
    fn into_measurement(self, row: usize) -> Result<LoadedRow> {
        let sample_count = sample_count(self.samples, row)?;
        let compound: Compound = match self.compound.parse() {
            Ok(compound) => compound,
            Err(e) => return Ok(Err(e)),
        };
        Ok(Ok(Measurement {
            compound,
            timestamp: self.date,
            retention_time: self.rt,
            peak_area: self.pa,
            corrected_peak_area: self.cpa,
            mixing_ratio: self.mr,
            source_file: self.file.unwrap_or_default(),
            sample_count,
        }))
    }
}

fn sample_count(samples: Option<i64>, row: usize) -> Result<SampleCount> {
    match samples {
        None => Ok(SampleCount::Single),
        Some(n) => SampleCount::from_count(n)
            .with_context(|| format!("Row {row}: sample count must be 1 or 2, got {n}")),
    }
}

// ---------------------------------------------------------------------------
// JSON loader
// ---------------------------------------------------------------------------

/// Expected JSON schema (records-oriented):
///
/// ```json
/// [
///   { "compound": "CFC-11", "date": "2018-06-01 12:00", "mr": 231.4, "file": "2018_06_01_02.D" },
///   ...
/// ]
/// ```
fn load_json(path: &Path) -> Result<Vec<LoadedRow>> {
    let text = std::fs::read_to_string(path).context("reading JSON file")?;
    let root: serde_json::Value = serde_json::from_str(&text).context("parsing JSON")?;

    let records = root
        .as_array()
        .context("Expected top-level JSON array")?;

    records
        .iter()
        .enumerate()
        .map(|(i, rec)| {
            let row: MeasurementRow = serde_json::from_value(rec.clone())
                .with_context(|| format!("Row {i} is not a valid measurement"))?;
            row.into_measurement(i)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// CSV loader
// ---------------------------------------------------------------------------

/// CSV layout: header row with the column names listed on
/// [`load_measurements`]. Empty cells are missing values.
fn load_csv(path: &Path) -> Result<Vec<LoadedRow>> {
    let mut reader = csv::Reader::from_path(path).context("opening CSV")?;

    reader
        .deserialize::<MeasurementRow>()
        .enumerate()
        .map(|(row_no, result)| {
            let row = result.with_context(|| format!("CSV row {row_no}"))?;
            row.into_measurement(row_no)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Parquet loader
// ---------------------------------------------------------------------------

/// Load a Parquet file with one measurement per row.
///
/// Expected schema:
/// - `compound`: Utf8
/// - `date`: Timestamp (any unit), Utf8, or Int64 epoch seconds
/// - `rt`, `pa`, `cpa`, `mr`: Float64 / Float32 / Int64, nullable, optional
/// - `file`: Utf8, optional
/// - `samples`: Int32 / Int64, optional
///
/// Works with files written by both **Pandas** (`df.to_parquet()`) and
/// **Polars** (`df.write_parquet()`).
fn load_parquet(path: &Path) -> Result<Vec<LoadedRow>> {
    let file = std::fs::File::open(path).context("opening parquet file")?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)
        .context("reading parquet metadata")?;
    let reader = builder.build().context("building parquet reader")?;

    let mut measurements = Vec::new();

    for batch_result in reader {
        let batch = batch_result.context("reading parquet record batch")?;
        let schema = batch.schema();

        let column = |name: &str| schema.index_of(name).ok().map(|i| batch.column(i));

        let compound_col = column("compound").context("Parquet file missing 'compound' column")?;
        let date_col = column("date").context("Parquet file missing 'date' column")?;
        let rt_col = column("rt");
        let pa_col = column("pa");
        let cpa_col = column("cpa");
        let mr_col = column("mr");
        let file_col = column("file");
        let samples_col = column("samples");

        for row in 0..batch.num_rows() {
            let name = extract_string(compound_col, row)
                .with_context(|| format!("Row {row}: failed to read 'compound'"))?
                .with_context(|| format!("Row {row}: null compound"))?;
            let timestamp = extract_timestamp(date_col, row)
                .with_context(|| format!("Row {row}: failed to read 'date'"))?;

            let samples = match samples_col {
                Some(col) => extract_i64(col, row)?,
                None => None,
            };

            let sample_count = sample_count(samples, row)?;
            let compound: Compound = match name.parse() {
                Ok(compound) => compound,
                Err(e) => {
                    measurements.push(Err(e));
                    continue;
                }
            };

            measurements.push(Ok(Measurement {
                compound,
                timestamp,
                retention_time: optional_f64(rt_col, row)?,
                peak_area: optional_f64(pa_col, row)?,
                corrected_peak_area: optional_f64(cpa_col, row)?,
                mixing_ratio: optional_f64(mr_col, row)?,
                source_file: match file_col {
                    Some(col) => extract_string(col, row)?.unwrap_or_default(),
                    None => String::new(),
                },
                sample_count,
            }));
        }
    }

    Ok(measurements)
}

// -- Parquet / Arrow helpers --

fn optional_f64(col: Option<&Arc<dyn Array>>, row: usize) -> Result<Option<f64>> {
    match col {
        Some(col) => extract_f64(col, row),
        None => Ok(None),
    }
}

/// Extract a nullable number from a Float64 / Float32 / Int64 column.
fn extract_f64(col: &Arc<dyn Array>, row: usize) -> Result<Option<f64>> {
    if col.is_null(row) {
        return Ok(None);
    }
    let value = match col.data_type() {
        DataType::Float64 => downcast::<Float64Array>(col)?.value(row),
        DataType::Float32 => f64::from(downcast::<Float32Array>(col)?.value(row)),
        DataType::Int64 => downcast::<Int64Array>(col)?.value(row) as f64,
        DataType::Int32 => f64::from(downcast::<Int32Array>(col)?.value(row)),
        other => bail!("Expected a numeric column, got {other:?}"),
    };
    Ok((!value.is_nan()).then_some(value))
}

fn extract_i64(col: &Arc<dyn Array>, row: usize) -> Result<Option<i64>> {
    if col.is_null(row) {
        return Ok(None);
    }
    let value = match col.data_type() {
        DataType::Int64 => downcast::<Int64Array>(col)?.value(row),
        DataType::Int32 => i64::from(downcast::<Int32Array>(col)?.value(row)),
        other => bail!("Expected an integer column, got {other:?}"),
    };
    Ok(Some(value))
}

fn extract_string(col: &Arc<dyn Array>, row: usize) -> Result<Option<String>> {
    if col.is_null(row) {
        return Ok(None);
    }
    let value = match col.data_type() {
        DataType::Utf8 => downcast::<StringArray>(col)?.value(row).to_string(),
        DataType::LargeUtf8 => downcast::<LargeStringArray>(col)?.value(row).to_string(),
        other => bail!("Expected a string column, got {other:?}"),
    };
    Ok(Some(value))
}

/// Read a timestamp from a Timestamp, Utf8 or Int64 (epoch seconds) column.
/// Zone annotations are ignored; values are taken as UTC.
fn extract_timestamp(col: &Arc<dyn Array>, row: usize) -> Result<DateTime<Utc>> {
    if col.is_null(row) {
        bail!("null timestamp");
    }
    let (secs, nanos) = match col.data_type() {
        DataType::Timestamp(TimeUnit::Second, _) => {
            (downcast::<TimestampSecondArray>(col)?.value(row), 0)
        }
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            split_epoch(downcast::<TimestampMillisecondArray>(col)?.value(row), 1_000)
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            split_epoch(downcast::<TimestampMicrosecondArray>(col)?.value(row), 1_000_000)
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => {
            split_epoch(downcast::<TimestampNanosecondArray>(col)?.value(row), 1_000_000_000)
        }
        DataType::Int64 => (downcast::<Int64Array>(col)?.value(row), 0),
        DataType::Utf8 | DataType::LargeUtf8 => {
            let text = extract_string(col, row)?.unwrap_or_default();
            return parse_timestamp(&text).with_context(|| format!("unrecognised date '{text}'"));
        }
        other => bail!("Expected a timestamp column, got {other:?}"),
    };
    DateTime::from_timestamp(secs, nanos).context("timestamp out of range")
}

fn split_epoch(value: i64, per_second: i64) -> (i64, u32) {
    let secs = value.div_euclid(per_second);
    let sub = value.rem_euclid(per_second);
    (secs, (sub * (1_000_000_000 / per_second)) as u32)
}

fn downcast<T: 'static>(col: &Arc<dyn Array>) -> Result<&T> {
    col.as_any()
        .downcast_ref::<T>()
        .with_context(|| format!("unexpected array type {:?}", col.data_type()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::datatypes::{Field, Schema};
    use arrow::record_batch::RecordBatch;
    use chrono::TimeZone;
    use parquet::arrow::ArrowWriter;
    use std::io::Write;

    fn write_temp(name: &str, contents: &str) -> (tempfile::TempDir, std::path::PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        (dir, path)
    }

    fn resolved(rows: Vec<LoadedRow>) -> Vec<Measurement> {
        rows.into_iter().map(|r| r.unwrap()).collect()
    }

    #[test]
    fn loads_json_records() {
        let (_dir, path) = write_temp(
            "runs.json",
            r#"[
                {"compound": "CFC-11", "date": "2018-06-01 12:00", "mr": 231.4, "pa": 1200.5, "file": "a.D"},
                {"compound": "isoprene", "date": 1546300800, "mr": null, "samples": 2}
            ]"#,
        );
        let ms = resolved(load_measurements(&path).unwrap());
        assert_eq!(ms.len(), 2);
        assert_eq!(ms[0].compound.name(), "CFC-11");
        assert_eq!(ms[0].timestamp, Utc.with_ymd_and_hms(2018, 6, 1, 12, 0, 0).unwrap());
        assert_eq!(ms[0].peak_area, Some(1200.5));
        assert_eq!(ms[0].source_file, "a.D");
        assert_eq!(ms[1].timestamp, Utc.with_ymd_and_hms(2019, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(ms[1].mixing_ratio, None);
        assert_eq!(ms[1].sample_count, SampleCount::Pair);
    }

    #[test]
    fn loads_csv_with_empty_cells() {
        let (_dir, path) = write_temp(
            "runs.csv",
            "compound,date,rt,pa,cpa,mr,file,samples\n\
             hexane,2018-07-01 09:30,11.2,,,0.3,b.D,1\n\
             hexane,2018-07-02 09:30,11.3,400,380,,c.D,\n",
        );
        let ms = resolved(load_measurements(&path).unwrap());
        assert_eq!(ms.len(), 2);
        assert_eq!(ms[0].retention_time, Some(11.2));
        assert_eq!(ms[0].peak_area, None);
        assert_eq!(ms[0].mixing_ratio, Some(0.3));
        assert_eq!(ms[1].mixing_ratio, None);
        assert_eq!(ms[1].corrected_peak_area, Some(380.0));
        assert_eq!(ms[1].sample_count, SampleCount::Single);
    }

    #[test]
    fn unknown_compound_is_a_row_error() {
        let (_dir, path) = write_temp(
            "mixed.json",
            r#"[
                {"compound": "CFC-11", "date": "2018-01-01", "mr": 230.0},
                {"compound": "freon", "date": "2018-01-02", "mr": 1.0},
                {"compound": "CFC-11", "date": "2018-01-03", "mr": 231.0}
            ]"#,
        );
        let rows = load_measurements(&path).unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_ok());
        assert_eq!(rows[1], Err(DataError::UnknownCompound("freon".into())));
        assert!(rows[2].is_ok());
    }

    #[test]
    fn rejects_bad_sample_count() {
        let (_dir, path) =
            write_temp("bad.json", r#"[{"compound": "ethane", "date": "2018-01-01", "samples": 3}]"#);
        assert!(load_measurements(&path).is_err());
    }

    #[test]
    fn rejects_unknown_extension() {
        let (_dir, path) = write_temp("runs.xlsx", "");
        let err = load_measurements(&path).unwrap_err();
        assert!(err.to_string().contains("Unsupported file extension"));
    }

    #[test]
    fn loads_parquet_columns() {
        let schema = Arc::new(Schema::new(vec![
            Field::new("compound", DataType::Utf8, true),
            Field::new("date", DataType::Timestamp(TimeUnit::Millisecond, None), false),
            Field::new("rt", DataType::Int32, true),
            Field::new("pa", DataType::Float32, true),
            Field::new("mr", DataType::Float64, true),
            Field::new("samples", DataType::Int32, true),
        ]));
        let t0 = Utc.with_ymd_and_hms(2019, 2, 1, 9, 50, 0).unwrap();
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(StringArray::from(vec!["ethane", "benzene", "freon"])),
                Arc::new(TimestampMillisecondArray::from(vec![
                    t0.timestamp_millis(),
                    t0.timestamp_millis() + 1_500,
                    t0.timestamp_millis() + 3_000,
                ])),
                Arc::new(Int32Array::from(vec![Some(3), None, Some(4)])),
                Arc::new(Float32Array::from(vec![Some(2.5), Some(4.0), None])),
                Arc::new(Float64Array::from(vec![Some(1650.0), None, Some(1.0)])),
                Arc::new(Int32Array::from(vec![Some(2), None, Some(1)])),
            ],
        )
        .unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("runs.parquet");
        let mut writer = ArrowWriter::try_new(std::fs::File::create(&path).unwrap(), schema, None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();

        let rows = load_measurements(&path).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], Err(DataError::UnknownCompound("freon".into())));

        let ethane = rows[0].as_ref().unwrap();
        assert_eq!(ethane.timestamp, t0);
        assert_eq!(ethane.retention_time, Some(3.0));
        assert_eq!(ethane.peak_area, Some(2.5));
        assert_eq!(ethane.mixing_ratio, Some(1650.0));
        assert_eq!(ethane.corrected_peak_area, None);
        assert_eq!(ethane.sample_count, SampleCount::Pair);
        assert_eq!(ethane.source_file, "");

        let benzene = rows[1].as_ref().unwrap();
        assert_eq!(benzene.timestamp, t0 + chrono::Duration::milliseconds(1_500));
        assert_eq!(benzene.mixing_ratio, None);
        assert_eq!(benzene.retention_time, None);
        assert_eq!(benzene.sample_count, SampleCount::Single);
    }

    #[test]
    fn splits_negative_epochs() {
        assert_eq!(split_epoch(-1, 1_000), (-1, 999_000_000));
        assert_eq!(split_epoch(1_500, 1_000), (1, 500_000_000));
    }
}
