use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, Serializer};

use crate::data::model::{deserialize_timestamp, format_timestamp, AxisPair, Compound, Field};
use crate::error::PersistenceError;
use crate::report;

// ---------------------------------------------------------------------------
// FlagRecord – one analyst decision, as exported
// ---------------------------------------------------------------------------

/// An exported selection entry:
/// `{"compound": ..., "date": ..., "selected": true, "x_field": ..., "y_field": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRecord {
    pub compound: Compound,
    #[serde(
        rename = "date",
        serialize_with = "serialize_timestamp",
        deserialize_with = "deserialize_timestamp"
    )]
    pub timestamp: DateTime<Utc>,
    pub selected: bool,
    pub x_field: Field,
    pub y_field: Field,
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&format_timestamp(ts))
}

impl FlagRecord {
    pub fn selected(compound: Compound, timestamp: DateTime<Utc>, axes: AxisPair) -> Self {
        Self {
            compound,
            timestamp,
            selected: true,
            x_field: axes.x,
            y_field: axes.y,
        }
    }

    pub fn axes(&self) -> AxisPair {
        AxisPair::new(self.x_field, self.y_field)
    }

    /// Export order: compound, timestamp, then axis pair.
    pub fn sort_key(&self) -> (Compound, DateTime<Utc>, Field, Field) {
        (self.compound, self.timestamp, self.x_field, self.y_field)
    }
}

/// Read a previously saved export document.
pub fn load_flags(path: &Path) -> Result<Vec<FlagRecord>> {
    let text = std::fs::read_to_string(path).context("reading flag file")?;
    serde_json::from_str(&text).with_context(|| format!("parsing flags {}", path.display()))
}

/// Write an export document (the downloadable artifact).
pub fn write_flags(path: &Path, flags: &[FlagRecord]) -> Result<()> {
    let text = serde_json::to_string_pretty(flags).context("serialising flags")?;
    std::fs::write(path, text).with_context(|| format!("writing flags {}", path.display()))
}

// ---------------------------------------------------------------------------
// Persistence collaborator
// ---------------------------------------------------------------------------

/// Who saved, and under which session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveContext {
    pub user: String,
    pub session: String,
}

impl SaveContext {
    pub fn new(user: impl Into<String>, session: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            session: session.into(),
        }
    }

    fn file_stem(&self) -> String {
        format!("{}_{}", sanitize(&self.user), sanitize(&self.session))
    }
}

fn sanitize(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// Storage for exported flags. Implementations own all I/O; failures come
/// back as a human-readable reason.
pub trait FlagStore: Send + Sync {
    fn save(&self, context: &SaveContext, flags: &[FlagRecord]) -> Result<(), String>;
}

/// Writes the export document to `{dir}/{user}_{session}.json`.
#[derive(Debug, Clone)]
pub struct JsonFlagStore {
    dir: PathBuf,
}

impl JsonFlagStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, context: &SaveContext) -> PathBuf {
        self.dir.join(format!("{}.json", context.file_stem()))
    }
}

impl FlagStore for JsonFlagStore {
    fn save(&self, context: &SaveContext, flags: &[FlagRecord]) -> Result<(), String> {
        std::fs::create_dir_all(&self.dir).map_err(|e| format!("{}: {e}", self.dir.display()))?;
        write_flags(&self.path_for(context), flags).map_err(|e| format!("{e:#}"))
    }
}

/// Writes the legacy `{ "YYYY-MM-DD HH:MM": [compounds] }` filter document
/// consumed by the reporting step, to `{dir}/{user}_{session}_filters.json`.
#[derive(Debug, Clone)]
pub struct FilterFileStore {
    dir: PathBuf,
}

impl FilterFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, context: &SaveContext) -> PathBuf {
        self.dir.join(format!("{}_filters.json", context.file_stem()))
    }
}

impl FlagStore for FilterFileStore {
    fn save(&self, context: &SaveContext, flags: &[FlagRecord]) -> Result<(), String> {
        std::fs::create_dir_all(&self.dir).map_err(|e| format!("{}: {e}", self.dir.display()))?;
        let doc = report::filter_document(flags);
        report::write_filter_document(&self.path_for(context), &doc).map_err(|e| format!("{e:#}"))
    }
}

// ---------------------------------------------------------------------------
// Background save
// ---------------------------------------------------------------------------

/// Pending result of a background save.
pub struct SaveHandle {
    rx: Receiver<Result<usize, PersistenceError>>,
}

impl SaveHandle {
    /// Run `store.save` on a worker thread.
    pub fn spawn(store: Arc<dyn FlagStore>, context: SaveContext, flags: Vec<FlagRecord>) -> Self {
        let (tx, rx) = mpsc::channel();
        let worker_tx = tx.clone();

        let spawned = std::thread::Builder::new()
            .name("flag-save".into())
            .spawn(move || {
                let result = store
                    .save(&context, &flags)
                    .map(|_| flags.len())
                    .map_err(PersistenceError::Store);
                // The receiver may already be gone; nobody is waiting then.
                let _ = worker_tx.send(result);
            });

        if let Err(e) = spawned {
            let _ = tx.send(Err(PersistenceError::Store(format!("cannot start save worker: {e}"))));
        }
        Self { rx }
    }

    /// Non-blocking poll; `None` while the save is still running.
    pub fn poll(&self) -> Option<Result<usize, PersistenceError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => Some(Err(PersistenceError::WorkerGone)),
        }
    }

    /// Block until the save finishes.
    pub fn wait(self) -> Result<usize, PersistenceError> {
        self.rx.recv().unwrap_or(Err(PersistenceError::WorkerGone))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    struct FailingStore;

    impl FlagStore for FailingStore {
        fn save(&self, _: &SaveContext, _: &[FlagRecord]) -> Result<(), String> {
            Err("disk full".into())
        }
    }

    fn flag() -> FlagRecord {
        FlagRecord::selected(
            Compound::parse("CFC-11").unwrap(),
            Utc.with_ymd_and_hms(2019, 2, 1, 10, 30, 0).unwrap(),
            AxisPair::default(),
        )
    }

    #[test]
    fn export_entry_shape() {
        let json = serde_json::to_value(flag()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "compound": "CFC-11",
                "date": "2019-02-01 10:30:00",
                "selected": true,
                "x_field": "date",
                "y_field": "mr",
            })
        );
        let back: FlagRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, flag());
    }

    #[test]
    fn json_store_writes_named_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFlagStore::new(dir.path().join("flags"));
        let ctx = SaveContext::new("a.nalyst", "2019 review");
        store.save(&ctx, &[flag()]).unwrap();

        let path = store.path_for(&ctx);
        assert!(path.ends_with("a_nalyst_2019_review.json"));
        assert_eq!(load_flags(&path).unwrap(), vec![flag()]);
    }

    #[test]
    fn background_save_reports_success_and_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ok = SaveHandle::spawn(
            Arc::new(JsonFlagStore::new(dir.path())),
            SaveContext::new("u", "s"),
            vec![flag(), flag()],
        );
        assert_eq!(ok.wait(), Ok(2));

        let failed = SaveHandle::spawn(Arc::new(FailingStore), SaveContext::new("u", "s"), vec![flag()]);
        assert_eq!(failed.wait(), Err(PersistenceError::Store("disk full".into())));
    }
}
