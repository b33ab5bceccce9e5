/// Data layer: measurement model, loading, averaging and the corrected feed.
///
/// Architecture:
/// ```text
///  .parquet / .json / .csv
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Vec<Measurement>
///   └──────────┘
///        │
///        ▼
///   ┌───────────┐
///   │ averaging  │  collapse daily sample pairs (after the cutover)
///   └───────────┘
///        │
///        ▼  correction::engine
///   ┌──────────┐
///   │   feed    │  {compound}.json → flagging session
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  compound list shown in the side panel
///   └──────────┘
/// ```

pub mod averaging;
pub mod feed;
pub mod filter;
pub mod loader;
pub mod model;
