use std::sync::{Arc, Mutex};

use chrono::{DateTime, TimeZone, Utc};

use tracegas_qc::data::model::{timestamp_to_x, Compound, CorrectedMeasurement, Measurement};
use tracegas_qc::error::{InteractionError, PersistenceError};
use tracegas_qc::report;
use tracegas_qc::session::{
    BoxMode, DragModifier, FilterFileStore, FlagRecord, FlagStore, FlaggingSession,
    InteractionSettings, JsonFlagStore, PlotCoord, PointerEvent, Range, SaveContext,
};

fn compound() -> Compound {
    Compound::parse("CFC-12").unwrap()
}

fn day(d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2019, 5, d, 12, 0, 0).unwrap()
}

fn x(d: u32) -> f64 {
    timestamp_to_x(&day(d))
}

fn session() -> FlaggingSession {
    let records = (1..=20)
        .map(|d| {
            let mut m = Measurement::new(compound(), day(d), Some(500.0 + f64::from(d % 5)));
            m.peak_area = Some(2.0e4 + f64::from(d) * 10.0);
            CorrectedMeasurement::untouched(m)
        })
        .collect();
    let mut s = FlaggingSession::new(InteractionSettings::default());
    s.load_compound(compound(), records);
    s
}

fn drag(s: &mut FlaggingSession, modifier: DragModifier, from: PlotCoord, to: PlotCoord) {
    s.pointer(PointerEvent::Down { at: from, modifier }).unwrap();
    s.pointer(PointerEvent::Move { at: to }).unwrap();
    s.pointer(PointerEvent::Up { at: to }).unwrap();
}

/// Records every save and can be told to fail.
#[derive(Default)]
struct RecordingStore {
    saved: Mutex<Vec<Vec<FlagRecord>>>,
    fail: bool,
}

impl FlagStore for RecordingStore {
    fn save(&self, _: &SaveContext, flags: &[FlagRecord]) -> Result<(), String> {
        if self.fail {
            return Err("store offline".into());
        }
        self.saved.lock().map_err(|e| e.to_string())?.push(flags.to_vec());
        Ok(())
    }
}

#[test]
fn plain_then_alt_drag_over_same_box_empties_it() {
    let mut s = session();
    let (a, b) = (PlotCoord::new(x(3) - 1.0, 0.0), PlotCoord::new(x(8) + 1.0, 1.0e3));

    drag(&mut s, DragModifier::Plain, a, b);
    s.box_select(Range::new(x(15) - 1.0, x(16) + 1.0), Range::new(0.0, 1.0e3), BoxMode::Add);
    assert_eq!(s.selected_count(), 8);

    drag(&mut s, DragModifier::Alt, a, b);
    let left: Vec<_> = s.export_selection().into_iter().map(|f| f.timestamp).collect();
    assert_eq!(left, vec![day(15), day(16)]);
}

#[test]
fn shift_drag_zooms_and_undo_returns() {
    let mut s = session();
    let full = s.viewport();

    drag(
        &mut s,
        DragModifier::Shift,
        PlotCoord::new(x(2), 500.5),
        PlotCoord::new(x(10), 503.5),
    );
    assert_ne!(s.viewport(), full);
    assert_eq!(s.selected_count(), 0);

    assert!(s.undo_zoom().is_some());
    assert_eq!(s.viewport(), full);
    assert!(s.undo_zoom().is_none());
}

#[test]
fn zoom_box_too_small_is_reported_and_ignored() {
    let mut s = session();
    let before = s.viewport();

    s.pointer(PointerEvent::Down {
        at: PlotCoord::new(x(2), 501.0),
        modifier: DragModifier::Shift,
    })
    .unwrap();
    // wide enough on x, flat on y
    let result = s.pointer(PointerEvent::Up { at: PlotCoord::new(x(10), 501.0) });

    assert_eq!(result, Err(InteractionError::DragTooSmall));
    assert_eq!(s.viewport(), before);
    assert!(s.drag_state().is_idle());
}

#[test]
fn axis_switch_keeps_selections_scoped() {
    let mut s = session();
    let hit = s.select_point(PlotCoord::new(x(7), 502.0));
    assert_eq!(hit, Some((day(7), true)));

    s.set_axis("date", "peak_area").unwrap();
    assert!(s.displayed().iter().all(|p| !p.selected));

    s.set_axis("date", "mixing_ratio").unwrap();
    let selected: Vec<_> = s.displayed().into_iter().filter(|p| p.selected).collect();
    assert_eq!(selected.len(), 1);
    assert_eq!(selected[0].timestamp, day(7));
}

#[test]
fn save_hands_sorted_export_to_the_store() {
    let mut s = session();
    s.select_point(PlotCoord::new(x(12), 502.0));
    s.select_point(PlotCoord::new(x(4), 504.0));

    let store = Arc::new(RecordingStore::default());
    let handle = s.save_selection(store.clone(), SaveContext::new("analyst", "may"));
    assert_eq!(handle.wait(), Ok(2));

    let saved = store.saved.lock().unwrap();
    let dates: Vec<_> = saved[0].iter().map(|f| f.timestamp).collect();
    assert_eq!(dates, vec![day(4), day(12)]);
    // in-memory state is kept after saving
    assert_eq!(s.selected_count(), 2);
}

#[test]
fn failed_save_keeps_selections_for_retry() {
    let mut s = session();
    s.select_point(PlotCoord::new(x(4), 504.0));

    let store = Arc::new(RecordingStore {
        fail: true,
        ..RecordingStore::default()
    });
    let handle = s.save_selection(store, SaveContext::new("analyst", "may"));
    assert_eq!(handle.wait(), Err(PersistenceError::Store("store offline".into())));
    assert_eq!(s.selected_count(), 1);

    let blocking = s.save_selection_blocking(&RecordingStore::default(), &SaveContext::new("a", "b"));
    assert_eq!(blocking, Ok(1));
}

#[test]
fn file_stores_write_export_and_filter_documents() {
    let dir = tempfile::tempdir().unwrap();
    let mut s = session();
    s.select_point(PlotCoord::new(x(9), 504.0));
    let ctx = SaveContext::new("analyst", "may");

    let json = JsonFlagStore::new(dir.path());
    let filters = FilterFileStore::new(dir.path());
    s.save_selection_blocking(&json, &ctx).unwrap();
    s.save_selection_blocking(&filters, &ctx).unwrap();

    let doc = report::load_filter_document(&filters.path_for(&ctx)).unwrap();
    assert_eq!(doc["2019-05-09 12:00"], vec!["CFC-12".to_string()]);

    let exported = tracegas_qc::session::export::load_flags(&json.path_for(&ctx)).unwrap();
    assert_eq!(exported, s.export_selection());
}
