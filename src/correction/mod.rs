/// Correction layer: validated rule table and the per-record engine.
///
/// ```text
///   rules.toml / rules.json
///        │
///        ▼
///   ┌───────────┐
///   │ RuleTable  │  validated once; overlapping windows are fatal
///   └───────────┘
///        │
///        ▼
///   ┌───────────┐
///   │  engine    │  Measurement → CorrectedMeasurement (or DataError)
///   └───────────┘
/// ```

pub mod engine;
pub mod rules;

pub use engine::{correct, correct_batch, correct_file, correct_rows, BatchOutcome, Rejection};
pub use rules::{CorrectionRule, RuleId, RuleKind, RuleTable, Window};
