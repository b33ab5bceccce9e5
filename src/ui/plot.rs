use eframe::egui::{self, Color32, Ui};
use egui_plot::{GridMark, Plot, PlotBounds, PlotPoints, PlotTransform, Points, Polygon};

use tracegas_qc::data::model::{x_to_timestamp, Field};
use tracegas_qc::session::{
    BoxMode, DisplayPoint, DragModifier, DragState, PlotCoord, PointerEvent,
};

use crate::color;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Flagging plot (central panel)
// ---------------------------------------------------------------------------

/// Render the active compound and route pointer input into the session.
///
/// egui_plot's own drag/zoom handling is switched off: the session owns the
/// viewport, and the plot only draws it.
pub fn flagging_plot(ui: &mut Ui, state: &mut AppState) {
    let Some(compound) = state.session.active_compound() else {
        ui.centered_and_justified(|ui: &mut Ui| {
            ui.heading("Open a feed or correct a measurement file  (File → …)");
        });
        return;
    };

    let frame = state.session.frame();
    let base = state.color_map.color_for(compound);
    let vp = frame.viewport;

    let (unselected, selected): (Vec<&DisplayPoint>, Vec<&DisplayPoint>) =
        frame.points.iter().partition(|p| !p.selected);
    let unselected: Vec<[f64; 2]> = unselected.iter().map(|p| [p.at.x, p.at.y]).collect();
    let selected: Vec<[f64; 2]> = selected.iter().map(|p| [p.at.x, p.at.y]).collect();

    let mut plot = Plot::new("flagging_plot")
        .x_axis_label(frame.x_label)
        .y_axis_label(frame.y_label)
        .allow_drag(false)
        .allow_zoom(false)
        .allow_scroll(false)
        .allow_boxed_zoom(false)
        .allow_double_click_reset(false);

    if frame.axes.x == Field::Date {
        plot = plot.x_axis_formatter(|mark: GridMark, _range: &std::ops::RangeInclusive<f64>| {
            x_to_timestamp(mark.value)
                .map(|ts| ts.format("%Y-%m-%d").to_string())
                .unwrap_or_default()
        });
    }

    let response = plot.show(ui, |plot_ui| {
        plot_ui.set_plot_bounds(PlotBounds::from_min_max([vp.x_min, vp.y_min], [vp.x_max, vp.y_max]));

        plot_ui.points(Points::new(unselected).radius(3.0).color(base).name(compound.name()));
        plot_ui.points(Points::new(selected).radius(4.0).color(color::SELECTED).name("flagged"));

        if let Some((a, b)) = frame.drag.rubber_band() {
            let fill = match frame.drag {
                DragState::BoxDragging { mode: BoxMode::Add, .. } => color::BOX_ADD,
                DragState::BoxDragging { mode: BoxMode::Subtract, .. } => color::BOX_SUBTRACT,
                _ => color::ZOOM_BOX,
            };
            let corners = PlotPoints::new(vec![[a.x, a.y], [b.x, a.y], [b.x, b.y], [a.x, b.y]]);
            plot_ui.polygon(Polygon::new(corners).fill_color(fill).stroke((1.0, Color32::GRAY)));
        }
    });

    handle_pointer(ui, state, &response.response, &response.transform);
}

/// Drag-related activity egui reported for the plot this frame.
#[derive(Debug, Clone, Copy, Default)]
struct Gesture {
    escape: bool,
    started: bool,
    dragging: bool,
    stopped: bool,
}

/// Translate egui pointer activity into session events.
fn handle_pointer(ui: &Ui, state: &mut AppState, response: &egui::Response, transform: &PlotTransform) {
    let at = ui
        .input(|i| i.pointer.interact_pos())
        .map(|pos| transform.value_from_position(pos))
        .map(|p| PlotCoord::new(p.x, p.y));

    if response.clicked() {
        if let Some(at) = at {
            if state.session.select_point(at).is_none() {
                log::debug!("Click at ({:.3}, {:.3}) hit no point", at.x, at.y);
            }
        }
        return;
    }

    let modifiers = ui.input(|i| i.modifiers);
    let gesture = Gesture {
        escape: ui.input(|i| i.key_pressed(egui::Key::Escape)),
        started: response.drag_started(),
        dragging: response.dragged(),
        stopped: response.drag_stopped(),
    };
    let modifier = DragModifier::from_keys(modifiers.alt, modifiers.shift);
    for event in drag_events(gesture, at, modifier) {
        feed(state, event);
    }
}

/// A release with no pointer position (outside the window) cancels the drag.
fn drag_events(gesture: Gesture, at: Option<PlotCoord>, modifier: DragModifier) -> Vec<PointerEvent> {
    let mut events = Vec::new();
    if gesture.escape {
        events.push(PointerEvent::Cancel);
    }
    let Some(at) = at else {
        if gesture.stopped {
            events.push(PointerEvent::Cancel);
        }
        return events;
    };
    if gesture.started {
        events.push(PointerEvent::Down { at, modifier });
    }
    if gesture.dragging {
        events.push(PointerEvent::Move { at });
    }
    if gesture.stopped {
        events.push(PointerEvent::Up { at });
    }
    events
}

fn feed(state: &mut AppState, event: PointerEvent) {
    if let Err(e) = state.session.pointer(event) {
        state.interaction_failed(e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_outside_the_plot_cancels() {
        let stopped = Gesture {
            stopped: true,
            ..Gesture::default()
        };
        assert_eq!(drag_events(stopped, None, DragModifier::Plain), vec![PointerEvent::Cancel]);
    }

    #[test]
    fn drag_frames_map_to_down_move_up() {
        let at = PlotCoord::new(1.0, 2.0);
        let started = Gesture {
            started: true,
            dragging: true,
            ..Gesture::default()
        };
        assert_eq!(
            drag_events(started, Some(at), DragModifier::Alt),
            vec![
                PointerEvent::Down {
                    at,
                    modifier: DragModifier::Alt
                },
                PointerEvent::Move { at },
            ]
        );

        let stopped = Gesture {
            stopped: true,
            ..Gesture::default()
        };
        assert_eq!(drag_events(stopped, Some(at), DragModifier::Plain), vec![PointerEvent::Up { at }]);
        assert!(drag_events(Gesture::default(), None, DragModifier::Plain).is_empty());
    }
}
