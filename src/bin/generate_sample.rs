use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Array, Int64Array, StringArray, TimestampMillisecondArray};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use parquet::arrow::ArrowWriter;

use tracegas_qc::data::model::two_sample_cutover;

/// (compound, baseline mr in pptv, relative noise, retention time in min)
const COMPOUNDS: &[(&str, f64, f64, f64)] = &[
    ("CFC-11", 228.0, 0.01, 12.9),
    ("HCFC-141b", 24.5, 0.02, 13.4),
    ("ethane", 1650.0, 0.15, 3.1),
    ("isoprene", 1.2, 0.8, 15.2),
    ("benzene", 35.0, 0.3, 17.8),
];

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

#[derive(Default)]
struct Columns {
    compound: Vec<String>,
    date: Vec<i64>,
    rt: Vec<Option<f64>>,
    pa: Vec<Option<f64>>,
    cpa: Vec<Option<f64>>,
    mr: Vec<Option<f64>>,
    file: Vec<String>,
    samples: Vec<i64>,
}

impl Columns {
    fn push_sample(&mut self, rng: &mut SimpleRng, profile: (&str, f64, f64, f64), at: DateTime<Utc>) {
        let (name, baseline, noise, rt) = profile;

        // roughly one run in fifty integrates badly
        let outlier = rng.next_f64() < 0.02;
        let mut mr = rng.gauss(baseline, baseline * noise).max(0.0);
        if outlier {
            mr *= 1.0 + rng.next_f64();
        }
        let missing = rng.next_f64() < 0.01;
        let pa = mr * 41.7;

        self.compound.push(name.to_string());
        self.date.push(at.timestamp_millis());
        self.rt.push(Some(rng.gauss(rt, 0.02)));
        self.pa.push((!missing).then_some(pa));
        self.cpa.push((!missing).then_some(pa * rng.gauss(1.0, 0.005)));
        self.mr.push((!missing).then_some(mr));
        self.file.push(format!("{}.D", at.format("%Y_%m_%d_%H%M")));
        self.samples.push(1);
    }

    fn len(&self) -> usize {
        self.date.len()
    }
}

fn main() -> Result<()> {
    let output_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "sample_measurements.parquet".to_string());
    let mut rng = SimpleRng::new(42);

    let start = NaiveDate::from_ymd_opt(2018, 3, 1).context("start date")?;
    let end = NaiveDate::from_ymd_opt(2019, 6, 30).context("end date")?;
    let cutover = two_sample_cutover();

    // One ambient run per day, two from the cutover on; per-compound
    // timestamps stay ordered.
    let mut cols = Columns::default();
    for &profile in COMPOUNDS {
        let mut day = start;
        while day <= end {
            let noon = day.and_hms_opt(12, 0, 0).context("noon")?.and_utc();
            if noon < cutover {
                cols.push_sample(&mut rng, profile, noon);
            } else {
                cols.push_sample(&mut rng, profile, noon - Duration::minutes(130));
                cols.push_sample(&mut rng, profile, noon + Duration::minutes(110));
            }
            day = day.succ_opt().context("date overflow")?;
        }
    }

    let schema = Arc::new(Schema::new(vec![
        Field::new("compound", DataType::Utf8, false),
        Field::new("date", DataType::Timestamp(TimeUnit::Millisecond, None), false),
        Field::new("rt", DataType::Float64, true),
        Field::new("pa", DataType::Float64, true),
        Field::new("cpa", DataType::Float64, true),
        Field::new("mr", DataType::Float64, true),
        Field::new("file", DataType::Utf8, false),
        Field::new("samples", DataType::Int64, false),
    ]));

    let rows = cols.len();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from(cols.compound)),
            Arc::new(TimestampMillisecondArray::from(cols.date)),
            Arc::new(Float64Array::from(cols.rt)),
            Arc::new(Float64Array::from(cols.pa)),
            Arc::new(Float64Array::from(cols.cpa)),
            Arc::new(Float64Array::from(cols.mr)),
            Arc::new(StringArray::from(cols.file)),
            Arc::new(Int64Array::from(cols.samples)),
        ],
    )
    .context("building record batch")?;

    // Write Parquet
    let file = std::fs::File::create(&output_path)
        .with_context(|| format!("creating {output_path}"))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing batch")?;
    writer.close().context("closing parquet writer")?;

    println!(
        "Wrote {rows} measurements of {} compounds to {output_path}",
        COMPOUNDS.len()
    );
    Ok(())
}
