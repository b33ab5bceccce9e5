// ---------------------------------------------------------------------------
// Plot-space geometry
// ---------------------------------------------------------------------------

/// A point in plot (data) coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlotCoord {
    pub x: f64,
    pub y: f64,
}

impl PlotCoord {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Closed interval; endpoints are ordered on construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
}

impl Range {
    pub fn new(a: f64, b: f64) -> Self {
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.min && v <= self.max
    }
}

/// The visible plot window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x_min: f64,
    pub x_max: f64,
    pub y_min: f64,
    pub y_max: f64,
}

impl Viewport {
    /// Shown when there is nothing to plot.
    pub const UNIT: Viewport = Viewport {
        x_min: 0.0,
        x_max: 1.0,
        y_min: 0.0,
        y_max: 1.0,
    };

    pub fn from_ranges(x: Range, y: Range) -> Self {
        Self {
            x_min: x.min,
            x_max: x.max,
            y_min: y.min,
            y_max: y.max,
        }
    }

    pub fn x_range(&self) -> Range {
        Range::new(self.x_min, self.x_max)
    }

    pub fn y_range(&self) -> Range {
        Range::new(self.y_min, self.y_max)
    }

    /// Smallest window holding every point, padded by `pad` of the span on
    /// each side. A flat axis gets a unit-wide window around its value.
    pub fn bounding(points: impl IntoIterator<Item = PlotCoord>, pad: f64) -> Option<Self> {
        let mut points = points.into_iter();
        let first = points.next()?;
        let (mut x_min, mut x_max, mut y_min, mut y_max) = (first.x, first.x, first.y, first.y);
        for p in points {
            x_min = x_min.min(p.x);
            x_max = x_max.max(p.x);
            y_min = y_min.min(p.y);
            y_max = y_max.max(p.y);
        }
        let (x_min, x_max) = padded(x_min, x_max, pad);
        let (y_min, y_max) = padded(y_min, y_max, pad);
        Some(Self {
            x_min,
            x_max,
            y_min,
            y_max,
        })
    }

    /// Position of `p` in window-relative units (0..1 across the window).
    pub fn normalize(&self, p: PlotCoord) -> PlotCoord {
        let x_span = (self.x_max - self.x_min).max(f64::MIN_POSITIVE);
        let y_span = (self.y_max - self.y_min).max(f64::MIN_POSITIVE);
        PlotCoord::new((p.x - self.x_min) / x_span, (p.y - self.y_min) / y_span)
    }
}

fn padded(min: f64, max: f64, pad: f64) -> (f64, f64) {
    let span = max - min;
    if span <= 0.0 {
        (min - 0.5, max + 0.5)
    } else {
        (min - span * pad, max + span * pad)
    }
}

// ---------------------------------------------------------------------------
// Zoom history
// ---------------------------------------------------------------------------

/// Current window plus the stack of windows to return to on undo.
/// Undone windows are discarded; there is no redo.
#[derive(Debug, Clone, PartialEq)]
pub struct ViewportState {
    current: Viewport,
    history: Vec<Viewport>,
}

impl ViewportState {
    pub fn new(initial: Viewport) -> Self {
        Self {
            current: initial,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> Viewport {
        self.current
    }

    pub fn depth(&self) -> usize {
        self.history.len()
    }

    /// Remember the current window, then show `next`.
    pub fn push(&mut self, next: Viewport) {
        self.history.push(self.current);
        self.current = next;
    }

    /// Return to the previous window, or `None` when there is none.
    pub fn undo(&mut self) -> Option<Viewport> {
        let previous = self.history.pop()?;
        self.current = previous;
        Some(previous)
    }

    /// Show `full` and forget all history.
    pub fn reset(&mut self, full: Viewport) {
        self.current = full;
        self.history.clear();
    }
}

impl Default for ViewportState {
    fn default() -> Self {
        Self::new(Viewport::UNIT)
    }
}
