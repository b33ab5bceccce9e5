use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use tracegas_qc::config::Settings;
use tracegas_qc::correction::engine::correct_file;
use tracegas_qc::data::feed;
use tracegas_qc::data::filter::{filtered_indices, CompoundFilter, CompoundSummary};
use tracegas_qc::data::model::{Compound, CorrectedMeasurement, Field};
use tracegas_qc::error::InteractionError;
use tracegas_qc::report;
use tracegas_qc::session::export::{load_flags, write_flags};
use tracegas_qc::session::{FilterFileStore, FlagStore, FlaggingSession, JsonFlagStore, SaveHandle};

use crate::color::ColorMap;

// ---------------------------------------------------------------------------
// Status line
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum Status {
    Info(String),
    Warning(String),
    Error(String),
}

// ---------------------------------------------------------------------------
// Application state
// ---------------------------------------------------------------------------

/// The full UI state, independent of rendering.
pub struct AppState {
    pub settings: Settings,

    /// The analyst's session: loaded series, selections, zoom history.
    pub session: FlaggingSession,

    /// Compound list filter in the side panel.
    pub compound_filter: CompoundFilter,

    pub color_map: ColorMap,

    /// Status / error message shown in the UI.
    pub status: Option<Status>,

    /// Where "Save" sends the flags.
    stores: Vec<Arc<dyn FlagStore>>,

    /// Saves still running on worker threads.
    pending_saves: Vec<SaveHandle>,
}

impl AppState {
    pub fn new(settings: Settings) -> Self {
        let stores: Vec<Arc<dyn FlagStore>> = vec![
            Arc::new(JsonFlagStore::new(settings.flags_dir.clone())),
            Arc::new(FilterFileStore::new(settings.flags_dir.clone())),
        ];
        Self {
            session: FlaggingSession::new(settings.interaction),
            settings,
            compound_filter: CompoundFilter::default(),
            color_map: ColorMap::default(),
            status: None,
            stores,
            pending_saves: Vec::new(),
        }
    }

    // -- Loading ------------------------------------------------------------

    /// Load one `{compound}.json` feed document.
    pub fn load_feed_file(&mut self, path: &Path) {
        match feed::load_feed(path) {
            Ok((compound, records)) => {
                let n = records.len();
                self.session.load_compound(compound, records);
                self.info(format!("Loaded {n} {compound} records"));
            }
            Err(e) => self.error("Failed to load feed", &e),
        }
    }

    /// Load every feed document in a folder.
    pub fn load_feed_dir(&mut self, dir: &Path) {
        match feed::load_feed_dir(dir) {
            Ok(loaded) if loaded.is_empty() => {
                self.warn(format!("No compound feeds found in {}", dir.display()));
            }
            Ok(loaded) => {
                let n = loaded.len();
                self.load_series(loaded);
                self.info(format!("Loaded feeds for {n} compounds"));
            }
            Err(e) => self.error("Failed to load feeds", &e),
        }
    }

    /// Run the correction engine over a raw measurement file and load the
    /// result. A bad rule table aborts before anything is loaded.
    pub fn correct_measurements(&mut self, path: &Path, average_pairs: bool) {
        let outcome = self
            .settings
            .rule_table()
            .and_then(|table| correct_file(path, &table, average_pairs));

        match outcome {
            Ok(outcome) => {
                let rejected = outcome.rejected.len();
                self.load_series(outcome.by_compound());
                if rejected > 0 {
                    self.warn(format!(
                        "Corrected {} records, rejected {rejected} (see log)",
                        outcome.corrected.len()
                    ));
                } else {
                    self.info(format!("Corrected {} records", outcome.corrected.len()));
                }
            }
            Err(e) => self.error("Correction failed", &e),
        }
    }

    fn load_series(&mut self, series: impl IntoIterator<Item = (Compound, Vec<CorrectedMeasurement>)>) {
        for (compound, records) in series {
            self.session.load_compound(compound, records);
        }
    }

    // -- Interaction --------------------------------------------------------

    pub fn select_compound(&mut self, compound: Compound) {
        if let Err(e) = self.session.set_compound(compound) {
            self.interaction_failed(e);
        }
    }

    pub fn set_y_field(&mut self, field: Field) {
        self.session.set_y_field(field);
    }

    pub fn undo_zoom(&mut self) {
        if self.session.undo_zoom().is_none() {
            self.info("Nothing to undo".to_string());
        }
    }

    /// Rejected interactions are no-ops; tell the analyst why.
    pub fn interaction_failed(&mut self, e: InteractionError) {
        log::warn!("Interaction ignored: {e}");
        self.warn(e.to_string());
    }

    /// Compounds shown in the side panel.
    pub fn visible_compounds(&self) -> Vec<CompoundSummary> {
        let summaries = self.session.summaries();
        filtered_indices(&summaries, &self.compound_filter)
            .into_iter()
            .map(|i| summaries[i])
            .collect()
    }

    // -- Persistence --------------------------------------------------------

    /// Hand the current flags to every configured store in the background.
    pub fn save(&mut self) {
        let context = self.settings.save_context();
        for store in &self.stores {
            let handle = self.session.save_selection(Arc::clone(store), context.clone());
            self.pending_saves.push(handle);
        }
        self.info(format!("Saving {} flags…", self.session.selected_count()));
    }

    pub fn saving(&self) -> bool {
        !self.pending_saves.is_empty()
    }

    /// Collect finished saves. Called every frame.
    pub fn poll_saves(&mut self) {
        let mut finished = Vec::new();
        self.pending_saves.retain(|handle| match handle.poll() {
            Some(result) => {
                finished.push(result);
                false
            }
            None => true,
        });

        for result in finished {
            match result {
                Ok(n) => self.info(format!("Saved {n} flags")),
                Err(e) => {
                    log::error!("Save failed: {e}");
                    self.status = Some(Status::Error(format!("Save failed: {e}. Selections kept; retry.")));
                }
            }
        }
    }

    pub fn export_flags(&mut self, path: &Path) {
        let flags = self.session.export_selection();
        match write_flags(path, &flags) {
            Ok(()) => self.info(format!("Exported {} flags to {}", flags.len(), path.display())),
            Err(e) => self.error("Export failed", &e),
        }
    }

    pub fn export_filter_document(&mut self, path: &Path) {
        let doc = report::filter_document(&self.session.export_selection());
        match report::write_filter_document(path, &doc) {
            Ok(()) => self.info(format!("Wrote {} filter entries", doc.len())),
            Err(e) => self.error("Export failed", &e),
        }
    }

    pub fn import_flags(&mut self, path: &Path) {
        let result: Result<usize> = load_flags(path).map(|flags| self.session.import_selection(&flags));
        match result {
            Ok(n) => self.info(format!("Imported {n} flags")),
            Err(e) => self.error("Import failed", &e),
        }
    }

    // -- Status -------------------------------------------------------------

    fn info(&mut self, msg: String) {
        log::info!("{msg}");
        self.status = Some(Status::Info(msg));
    }

    fn warn(&mut self, msg: String) {
        self.status = Some(Status::Warning(msg));
    }

    fn error(&mut self, what: &str, e: &anyhow::Error) {
        log::error!("{what}: {e:#}");
        self.status = Some(Status::Error(format!("{what}: {e:#}")));
    }
}
