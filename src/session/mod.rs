//! Interactive flagging of corrected series.
//!
//! ```text
//!  pointer / buttons
//!        │
//!        ▼
//!  drag::transition ──► DragCommit ──► FlaggingSession ──► RenderFrame ──► ui::plot
//!                                         │      │
//!                              SelectionSets  ViewportState
//!                                         │
//!                                         ▼
//!                              export_selection ──► FlagStore (worker thread)
//! ```

pub mod drag;
pub mod export;
pub mod flagging;
pub mod selection;
pub mod viewport;

pub use drag::{BoxMode, DragCommit, DragModifier, DragState, PointerEvent};
pub use export::{FilterFileStore, FlagRecord, FlagStore, JsonFlagStore, SaveContext, SaveHandle};
pub use flagging::{DisplayPoint, FlaggingSession, InteractionSettings, RenderFrame};
pub use selection::SelectionSets;
pub use viewport::{PlotCoord, Range, Viewport, ViewportState};
