use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::drag::{self, BoxMode, DragCommit, DragState, DragThreshold, PointerEvent};
use super::export::{FlagRecord, FlagStore, SaveContext, SaveHandle};
use super::selection::SelectionSets;
use super::viewport::{PlotCoord, Range, Viewport, ViewportState};
use crate::data::filter::CompoundSummary;
use crate::data::model::{AxisPair, Compound, CorrectedMeasurement, Field};
use crate::error::{InteractionError, PersistenceError};

/// Padding around the data extent when the axes are reset.
const EXTENT_PAD: f64 = 0.05;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Tunables for pointer interaction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InteractionSettings {
    /// A drag must cover at least this fraction of the visible span to count;
    /// a zoom box must cover it on both axes.
    pub min_drag_fraction: f64,
    /// Click tolerance for `select_point`, as a fraction of the visible window.
    pub pick_radius: f64,
}

impl Default for InteractionSettings {
    fn default() -> Self {
        Self {
            min_drag_fraction: 0.01,
            pick_radius: 0.03,
        }
    }
}

// ---------------------------------------------------------------------------
// What the renderer gets
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayPoint {
    pub timestamp: DateTime<Utc>,
    pub at: PlotCoord,
    pub selected: bool,
}

/// Everything needed to draw the current state.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderFrame {
    pub compound: Option<Compound>,
    pub axes: AxisPair,
    pub viewport: Viewport,
    pub points: Vec<DisplayPoint>,
    pub x_label: &'static str,
    pub y_label: &'static str,
    pub drag: DragState,
}

// ---------------------------------------------------------------------------
// FlaggingSession
// ---------------------------------------------------------------------------

/// One analyst's interactive flagging session.
///
/// Owns the selection sets, the zoom history and the drag state. Loaded
/// series are display-only and never modified. No operation performs I/O
/// except `save_selection`, which hands off to a [`FlagStore`] on a worker
/// thread.
#[derive(Debug, Clone, Default)]
pub struct FlaggingSession {
    series: BTreeMap<Compound, Vec<CorrectedMeasurement>>,
    active: Option<Compound>,
    axes: AxisPair,
    selections: SelectionSets,
    viewport: ViewportState,
    drag: DragState,
    settings: InteractionSettings,
}

impl FlaggingSession {
    pub fn new(settings: InteractionSettings) -> Self {
        Self {
            settings,
            ..Self::default()
        }
    }

    // -- Data ---------------------------------------------------------------

    /// Add (or replace) a compound's series. The first compound loaded
    /// becomes the active one.
    pub fn load_compound(&mut self, compound: Compound, records: Vec<CorrectedMeasurement>) {
        log::debug!("Session: loaded {} records for {compound}", records.len());
        self.series.insert(compound, records);
        if self.active.is_none() || self.active == Some(compound) {
            self.active = Some(compound);
            self.drag = DragState::Idle;
            self.viewport.reset(self.full_extent());
        }
    }

    /// Switch the plotted compound. Selections of other compounds are kept.
    pub fn set_compound(&mut self, compound: Compound) -> Result<(), InteractionError> {
        if !self.series.contains_key(&compound) {
            return Err(InteractionError::EmptySeries(compound.name().to_string()));
        }
        if self.active != Some(compound) {
            self.active = Some(compound);
            self.drag = DragState::Idle;
            self.viewport.reset(self.full_extent());
        }
        Ok(())
    }

    pub fn active_compound(&self) -> Option<Compound> {
        self.active
    }

    pub fn loaded_compounds(&self) -> impl Iterator<Item = Compound> + '_ {
        self.series.keys().copied()
    }

    pub fn records(&self, compound: Compound) -> Option<&[CorrectedMeasurement]> {
        self.series.get(&compound).map(Vec::as_slice)
    }

    pub fn axes(&self) -> AxisPair {
        self.axes
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport.current()
    }

    pub fn zoom_depth(&self) -> usize {
        self.viewport.depth()
    }

    pub fn drag_state(&self) -> DragState {
        self.drag
    }

    pub fn settings(&self) -> InteractionSettings {
        self.settings
    }

    pub fn selected_count(&self) -> usize {
        self.selections.total()
    }

    pub fn flagged_count(&self, compound: Compound) -> usize {
        self.selections.count_compound(compound)
    }

    /// List entries for every loaded compound.
    pub fn summaries(&self) -> Vec<CompoundSummary> {
        self.series
            .iter()
            .map(|(&c, records)| CompoundSummary::new(c, records, self.flagged_count(c)))
            .collect()
    }

    /// Points of the active compound under the current axis mapping.
    /// Dropped records and records missing either coordinate are skipped.
    pub fn displayed(&self) -> Vec<DisplayPoint> {
        let Some(compound) = self.active else {
            return Vec::new();
        };
        let Some(records) = self.series.get(&compound) else {
            return Vec::new();
        };

        records
            .iter()
            .filter(|c| !c.dropped)
            .filter_map(|c| {
                let x = self.axes.x.value_of(&c.record)?;
                let y = self.axes.y.value_of(&c.record)?;
                Some(DisplayPoint {
                    timestamp: c.timestamp(),
                    at: PlotCoord::new(x, y),
                    selected: self.selections.is_selected(compound, self.axes, &c.timestamp()),
                })
            })
            .collect()
    }

    /// Padded bounding box of the displayed points.
    pub fn full_extent(&self) -> Viewport {
        Viewport::bounding(self.displayed().into_iter().map(|p| p.at), EXTENT_PAD)
            .unwrap_or(Viewport::UNIT)
    }

    // -- Selection ----------------------------------------------------------

    /// Toggle the displayed point nearest to `at`, if one lies within the
    /// pick radius. Returns its timestamp and whether it is now selected.
    pub fn select_point(&mut self, at: PlotCoord) -> Option<(DateTime<Utc>, bool)> {
        let compound = self.active?;
        let window = self.viewport.current();
        let target = window.normalize(at);

        let nearest = self
            .displayed()
            .into_iter()
            .map(|p| {
                let n = window.normalize(p.at);
                let dist = (n.x - target.x).hypot(n.y - target.y);
                (dist, p.timestamp)
            })
            .min_by(|a, b| a.0.total_cmp(&b.0))?;

        if nearest.0 > self.settings.pick_radius {
            return None;
        }
        let selected = self.selections.toggle(compound, self.axes, nearest.1);
        log::debug!("Session: {compound} {} selected={selected}", nearest.1);
        Some((nearest.1, selected))
    }

    /// Add or subtract every displayed point inside the box. Points outside
    /// the box are never touched. Returns how many points changed state.
    pub fn box_select(&mut self, x: Range, y: Range, mode: BoxMode) -> usize {
        let Some(compound) = self.active else {
            return 0;
        };
        let axes = self.axes;
        let inside: Vec<DateTime<Utc>> = self
            .displayed()
            .into_iter()
            .filter(|p| x.contains(p.at.x) && y.contains(p.at.y))
            .map(|p| p.timestamp)
            .collect();

        let changed = inside
            .into_iter()
            .filter(|ts| match mode {
                BoxMode::Add => self.selections.insert(compound, axes, *ts),
                BoxMode::Subtract => self.selections.remove(compound, axes, ts),
            })
            .count();
        log::debug!("Session: box {mode:?} changed {changed} points of {compound}");
        changed
    }

    /// Forget the active compound's selections, under every axis pair.
    pub fn clear_plot(&mut self) {
        if let Some(compound) = self.active {
            self.selections.clear_compound(compound);
        }
    }

    pub fn clear_all(&mut self) {
        self.selections.clear_all();
    }

    // -- Viewport -----------------------------------------------------------

    /// Zoom into the box, remembering the current window for undo. Boxes
    /// narrower than `min_drag_fraction` of the visible span on either axis
    /// are rejected and leave the viewport alone.
    pub fn zoom(&mut self, x: Range, y: Range) -> Result<(), InteractionError> {
        let current = self.viewport.current();
        let min_x = current.x_range().span() * self.settings.min_drag_fraction;
        let min_y = current.y_range().span() * self.settings.min_drag_fraction;

        if x.span() <= 0.0 || y.span() <= 0.0 || x.span() < min_x || y.span() < min_y {
            return Err(InteractionError::DragTooSmall);
        }
        self.viewport.push(Viewport::from_ranges(x, y));
        Ok(())
    }

    /// Step back one zoom. `None` (and nothing changes) when there is no
    /// history.
    pub fn undo_zoom(&mut self) -> Option<Viewport> {
        let restored = self.viewport.undo();
        if restored.is_none() {
            log::debug!("Session: nothing to undo");
        }
        restored
    }

    /// Show the whole series and drop the zoom history.
    pub fn reset_axes(&mut self) {
        self.viewport.reset(self.full_extent());
    }

    /// Switch the field mapping by name. Unknown names leave state unchanged.
    pub fn set_axis(&mut self, x_field: &str, y_field: &str) -> Result<(), InteractionError> {
        let axes = AxisPair::parse(x_field, y_field)?;
        self.set_axes(axes);
        Ok(())
    }

    /// Switch the field mapping. Selections stay where they are, scoped to
    /// the pair they were made under; the view resets to the new extent.
    pub fn set_axes(&mut self, axes: AxisPair) {
        if axes == self.axes {
            return;
        }
        self.axes = axes;
        self.drag = DragState::Idle;
        self.viewport.reset(self.full_extent());
    }

    pub fn set_y_field(&mut self, y: Field) {
        self.set_axes(AxisPair::new(self.axes.x, y));
    }

    // -- Pointer ------------------------------------------------------------

    /// Feed one pointer event through the drag state machine and apply any
    /// resulting commit. A zoom box that is too small comes back as an error
    /// with the viewport untouched.
    pub fn pointer(&mut self, event: PointerEvent) -> Result<Option<DragCommit>, InteractionError> {
        let current = self.viewport.current();
        let threshold = DragThreshold {
            min_dx: current.x_range().span() * self.settings.min_drag_fraction,
            min_dy: current.y_range().span() * self.settings.min_drag_fraction,
        };

        let (next, commit) = drag::transition(self.drag, event, threshold);
        self.drag = next;

        match commit {
            Some(DragCommit::Box { x, y, mode }) => {
                self.box_select(x, y, mode);
            }
            Some(DragCommit::Zoom { x, y }) => self.zoom(x, y)?,
            None => {}
        }
        Ok(commit)
    }

    // -- Export / persistence -----------------------------------------------

    /// Every selection as flag records, ordered by compound, timestamp and
    /// axis pair. Independent of the order points were selected in.
    pub fn export_selection(&self) -> Vec<FlagRecord> {
        let mut flags: Vec<FlagRecord> = self
            .selections
            .iter()
            .map(|(compound, axes, ts)| FlagRecord::selected(compound, ts, axes))
            .collect();
        flags.sort_by_key(FlagRecord::sort_key);
        flags
    }

    /// Restore selections from a previous export. Entries that do not match
    /// a loaded record, or are not `selected`, are skipped.
    pub fn import_selection(&mut self, flags: &[FlagRecord]) -> usize {
        let mut imported = 0;
        for flag in flags.iter().filter(|f| f.selected) {
            let known = self
                .series
                .get(&flag.compound)
                .is_some_and(|records| records.iter().any(|c| c.timestamp() == flag.timestamp));
            if !known {
                log::warn!("Session: no {} record at {}; flag skipped", flag.compound, flag.timestamp);
                continue;
            }
            self.selections.insert(flag.compound, flag.axes(), flag.timestamp);
            imported += 1;
        }
        imported
    }

    /// Hand the export to `store` in the background. In-memory selections
    /// are kept whatever the outcome.
    pub fn save_selection(&self, store: Arc<dyn FlagStore>, context: SaveContext) -> SaveHandle {
        let flags = self.export_selection();
        log::info!(
            "Session: saving {} flags for {}/{}",
            flags.len(),
            context.user,
            context.session
        );
        SaveHandle::spawn(store, context, flags)
    }

    /// Save on the calling thread; for scripts and the batch tool.
    pub fn save_selection_blocking(
        &self,
        store: &dyn FlagStore,
        context: &SaveContext,
    ) -> Result<usize, PersistenceError> {
        let flags = self.export_selection();
        store
            .save(context, &flags)
            .map(|_| flags.len())
            .map_err(PersistenceError::Store)
    }

    // -- Rendering ----------------------------------------------------------

    pub fn frame(&self) -> RenderFrame {
        RenderFrame {
            compound: self.active,
            axes: self.axes,
            viewport: self.viewport.current(),
            points: self.displayed(),
            x_label: self.axes.x.label(),
            y_label: self.axes.y.label(),
            drag: self.drag,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::model::{timestamp_to_x, Measurement};
    use crate::session::drag::DragModifier;
    use chrono::TimeZone;

    fn cfc11() -> Compound {
        Compound::parse("CFC-11").unwrap()
    }

    fn day(d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2019, 3, d, 12, 0, 0).unwrap()
    }

    fn x(d: u32) -> f64 {
        timestamp_to_x(&day(d))
    }

    /// Ten days of CFC-11, mr = 230 + day, pa = 1000 - day.
    fn series(compound: Compound) -> Vec<CorrectedMeasurement> {
        (1..=10)
            .map(|d| {
                let mut m = Measurement::new(compound, day(d), Some(230.0 + f64::from(d)));
                m.peak_area = Some(1000.0 - f64::from(d));
                CorrectedMeasurement::untouched(m)
            })
            .collect()
    }

    fn session() -> FlaggingSession {
        let mut s = FlaggingSession::new(InteractionSettings::default());
        s.load_compound(cfc11(), series(cfc11()));
        s
    }

    fn box_over(from: u32, to: u32) -> (Range, Range) {
        (Range::new(x(from) - 60.0, x(to) + 60.0), Range::new(0.0, 1.0e4))
    }

    fn selected_days(s: &FlaggingSession) -> Vec<DateTime<Utc>> {
        s.displayed()
            .into_iter()
            .filter(|p| p.selected)
            .map(|p| p.timestamp)
            .collect()
    }

    #[test]
    fn click_toggles_nearest_point() {
        let mut s = session();
        let at = PlotCoord::new(x(4) + 30.0, 234.01);
        assert_eq!(s.select_point(at), Some((day(4), true)));
        assert_eq!(selected_days(&s), vec![day(4)]);
        assert_eq!(s.select_point(at), Some((day(4), false)));
        assert!(selected_days(&s).is_empty());
    }

    #[test]
    fn click_far_from_any_point_does_nothing() {
        let mut s = session();
        let vp = s.viewport();
        assert_eq!(s.select_point(PlotCoord::new(x(4), vp.y_max)), None);
        assert_eq!(s.selected_count(), 0);
    }

    #[test]
    fn subtract_box_only_empties_its_inside() {
        let mut s = session();
        let (bx, by) = box_over(3, 6);
        assert_eq!(s.box_select(bx, by, BoxMode::Add), 4);
        s.select_point(PlotCoord::new(x(9), 239.0));

        assert_eq!(s.box_select(bx, by, BoxMode::Subtract), 4);
        assert_eq!(selected_days(&s), vec![day(9)]);

        // repeating the subtraction is a no-op
        assert_eq!(s.box_select(bx, by, BoxMode::Subtract), 0);
        assert_eq!(selected_days(&s), vec![day(9)]);
    }

    #[test]
    fn zoom_then_undo_restores_previous_window() {
        let mut s = session();
        let full = s.viewport();
        let (ax, ay) = (Range::new(x(2), x(8)), Range::new(231.0, 239.0));
        let (bx, by) = (Range::new(x(3), x(5)), Range::new(232.0, 236.0));

        s.zoom(ax, ay).unwrap();
        s.zoom(bx, by).unwrap();
        assert_eq!(s.undo_zoom(), Some(Viewport::from_ranges(ax, ay)));
        assert_eq!(s.viewport(), Viewport::from_ranges(ax, ay));
        assert_eq!(s.undo_zoom(), Some(full));
        assert_eq!(s.undo_zoom(), None);
        assert_eq!(s.viewport(), full);
    }

    #[test]
    fn tiny_zoom_is_rejected() {
        let mut s = session();
        let before = s.viewport();
        let err = s.zoom(Range::new(x(2), x(2) + 1.0), Range::new(231.0, 239.0));
        assert_eq!(err, Err(InteractionError::DragTooSmall));
        assert_eq!(s.viewport(), before);
        assert_eq!(s.zoom_depth(), 0);
    }

    #[test]
    fn reset_axes_drops_history() {
        let mut s = session();
        let full = s.viewport();
        s.zoom(Range::new(x(2), x(8)), Range::new(231.0, 239.0)).unwrap();
        s.reset_axes();
        assert_eq!(s.viewport(), full);
        assert_eq!(s.undo_zoom(), None);
    }

    #[test]
    fn selection_is_scoped_to_axis_pair() {
        let mut s = session();
        s.select_point(PlotCoord::new(x(5), 235.0));
        assert_eq!(selected_days(&s), vec![day(5)]);

        s.set_axis("date", "pa").unwrap();
        assert!(selected_days(&s).is_empty());

        s.set_axis("date", "mr").unwrap();
        assert_eq!(selected_days(&s), vec![day(5)]);
    }

    #[test]
    fn unknown_field_leaves_state_unchanged() {
        let mut s = session();
        s.zoom(Range::new(x(2), x(8)), Range::new(231.0, 239.0)).unwrap();
        let before = (s.axes(), s.viewport(), s.zoom_depth());

        assert_eq!(
            s.set_axis("date", "ppm"),
            Err(InteractionError::UnknownField("ppm".into()))
        );
        assert_eq!((s.axes(), s.viewport(), s.zoom_depth()), before);
    }

    #[test]
    fn export_is_sorted_and_repeatable() {
        let ethane = Compound::parse("ethane").unwrap();
        let mut s = session();
        s.load_compound(ethane, series(ethane));

        s.set_compound(ethane).unwrap();
        s.select_point(PlotCoord::new(x(7), 237.0));
        s.set_compound(cfc11()).unwrap();
        s.select_point(PlotCoord::new(x(9), 239.0));
        s.select_point(PlotCoord::new(x(2), 232.0));

        let first = s.export_selection();
        assert_eq!(first, s.export_selection());
        let keys: Vec<_> = first.iter().map(|f| (f.compound, f.timestamp)).collect();
        assert_eq!(keys, vec![(cfc11(), day(2)), (cfc11(), day(9)), (ethane, day(7))]);
    }

    #[test]
    fn clear_plot_keeps_other_compounds() {
        let ethane = Compound::parse("ethane").unwrap();
        let mut s = session();
        s.load_compound(ethane, series(ethane));
        let (bx, by) = box_over(1, 3);
        s.box_select(bx, by, BoxMode::Add);
        s.set_compound(ethane).unwrap();
        s.box_select(bx, by, BoxMode::Add);

        s.clear_plot();
        assert_eq!(s.selected_count(), 3);
        s.clear_all();
        assert_eq!(s.selected_count(), 0);
    }

    #[test]
    fn dropped_records_are_not_displayed() {
        let mut records = series(cfc11());
        records[0].dropped = true;
        records[1].record.mixing_ratio = None;
        let mut s = FlaggingSession::default();
        s.load_compound(cfc11(), records);
        assert_eq!(s.displayed().len(), 8);
    }

    #[test]
    fn switching_to_unloaded_compound_fails() {
        let mut s = session();
        let err = s.set_compound(Compound::parse("SF6").unwrap());
        assert_eq!(err, Err(InteractionError::EmptySeries("SF6".into())));
        assert_eq!(s.active_compound(), Some(cfc11()));
    }

    #[test]
    fn pointer_drags_select_and_zoom() {
        let mut s = session();
        let (bx, by) = box_over(2, 4);

        s.pointer(PointerEvent::Down {
            at: PlotCoord::new(bx.min, by.min),
            modifier: DragModifier::Plain,
        })
        .unwrap();
        s.pointer(PointerEvent::Move { at: PlotCoord::new(bx.max, by.max) }).unwrap();
        let commit = s.pointer(PointerEvent::Up { at: PlotCoord::new(bx.max, by.max) }).unwrap();
        assert!(matches!(commit, Some(DragCommit::Box { mode: BoxMode::Add, .. })));
        assert_eq!(selected_days(&s), vec![day(2), day(3), day(4)]);

        s.pointer(PointerEvent::Down {
            at: PlotCoord::new(x(2), 231.0),
            modifier: DragModifier::Shift,
        })
        .unwrap();
        s.pointer(PointerEvent::Up { at: PlotCoord::new(x(6), 236.0) }).unwrap();
        assert_eq!(s.zoom_depth(), 1);
        assert!(s.drag_state().is_idle());
    }

    #[test]
    fn import_restores_exported_flags() {
        let mut s = session();
        let (bx, by) = box_over(5, 6);
        s.box_select(bx, by, BoxMode::Add);
        let exported = s.export_selection();

        let mut restored = session();
        let mut stray = exported[0].clone();
        stray.timestamp = day(20);
        let mut flags = exported.clone();
        flags.push(stray);

        assert_eq!(restored.import_selection(&flags), 2);
        assert_eq!(restored.export_selection(), exported);
    }
}
