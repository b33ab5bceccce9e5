use super::viewport::{PlotCoord, Range};

// ---------------------------------------------------------------------------
// Drag interaction state machine
// ---------------------------------------------------------------------------
//
//   state         event              next          commit
//   ─────────────────────────────────────────────────────────────────
//   Idle          Down(plain)        BoxDragging   –       (mode Add)
//   Idle          Down(alt)          BoxDragging   –       (mode Subtract)
//   Idle          Down(shift)        ZoomDragging  –
//   Idle          Move / Up / Cancel Idle          –
//   dragging      Move               dragging      –       (track pointer)
//   dragging      Down               dragging      –       (modifier is sticky)
//   BoxDragging   Up                 Idle          Box     (if past threshold)
//   ZoomDragging  Up                 Idle          Zoom    (if past threshold)
//   dragging      Cancel             Idle          –

/// Modifier keys held at pointer-down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DragModifier {
    Plain,
    Alt,
    Shift,
}

impl DragModifier {
    /// Shift wins over alt.
    pub fn from_keys(alt: bool, shift: bool) -> Self {
        if shift {
            DragModifier::Shift
        } else if alt {
            DragModifier::Alt
        } else {
            DragModifier::Plain
        }
    }
}

/// What a box-select does to the points inside the box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoxMode {
    /// Union the box contents into the selection.
    Add,
    /// Remove the box contents from the selection; points outside the box
    /// are untouched.
    Subtract,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PointerEvent {
    Down { at: PlotCoord, modifier: DragModifier },
    Move { at: PlotCoord },
    Up { at: PlotCoord },
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum DragState {
    #[default]
    Idle,
    BoxDragging {
        mode: BoxMode,
        start: PlotCoord,
        current: PlotCoord,
    },
    ZoomDragging {
        start: PlotCoord,
        current: PlotCoord,
    },
}

impl DragState {
    /// Corners of the rubber band currently being drawn.
    pub fn rubber_band(&self) -> Option<(PlotCoord, PlotCoord)> {
        match *self {
            DragState::Idle => None,
            DragState::BoxDragging { start, current, .. }
            | DragState::ZoomDragging { start, current } => Some((start, current)),
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, DragState::Idle)
    }
}

/// Effect of a completed drag, to be applied by the session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DragCommit {
    Box { x: Range, y: Range, mode: BoxMode },
    Zoom { x: Range, y: Range },
}

/// Minimum pointer travel, in plot units per axis, for a drag to count.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DragThreshold {
    pub min_dx: f64,
    pub min_dy: f64,
}

impl DragThreshold {
    fn exceeded(&self, start: PlotCoord, end: PlotCoord) -> bool {
        let dx = (end.x - start.x).abs();
        let dy = (end.y - start.y).abs();
        (dx > 0.0 || dy > 0.0) && (dx >= self.min_dx || dy >= self.min_dy)
    }
}

/// The transition function. Pure: same inputs, same outputs.
pub fn transition(
    state: DragState,
    event: PointerEvent,
    threshold: DragThreshold,
) -> (DragState, Option<DragCommit>) {
    use DragState::*;
    use PointerEvent::*;

    match (state, event) {
        (Idle, Down { at, modifier }) => {
            let next = match modifier {
                DragModifier::Plain => BoxDragging {
                    mode: BoxMode::Add,
                    start: at,
                    current: at,
                },
                DragModifier::Alt => BoxDragging {
                    mode: BoxMode::Subtract,
                    start: at,
                    current: at,
                },
                DragModifier::Shift => ZoomDragging { start: at, current: at },
            };
            (next, None)
        }
        (Idle, Move { .. } | Up { .. } | Cancel) => (Idle, None),

        (BoxDragging { mode, start, .. }, Move { at }) => (
            BoxDragging {
                mode,
                start,
                current: at,
            },
            None,
        ),
        (ZoomDragging { start, .. }, Move { at }) => (ZoomDragging { start, current: at }, None),

        (dragging @ (BoxDragging { .. } | ZoomDragging { .. }), Down { .. }) => (dragging, None),
        (BoxDragging { .. } | ZoomDragging { .. }, Cancel) => (Idle, None),

        (BoxDragging { mode, start, .. }, Up { at }) => {
            let commit = threshold.exceeded(start, at).then(|| DragCommit::Box {
                x: Range::new(start.x, at.x),
                y: Range::new(start.y, at.y),
                mode,
            });
            (Idle, commit)
        }
        (ZoomDragging { start, .. }, Up { at }) => {
            let commit = threshold.exceeded(start, at).then(|| DragCommit::Zoom {
                x: Range::new(start.x, at.x),
                y: Range::new(start.y, at.y),
            });
            (Idle, commit)
        }
    }
}
