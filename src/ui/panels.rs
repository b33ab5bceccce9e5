use eframe::egui::{self, Color32, RichText, ScrollArea, Ui};
use egui_extras::{Column, TableBuilder};

use tracegas_qc::data::model::{format_timestamp, Field};

use crate::state::{AppState, Status};

// ---------------------------------------------------------------------------
// Left side panel – compounds, axes, actions
// ---------------------------------------------------------------------------

/// Render the left panel.
pub fn side_panel(ui: &mut Ui, state: &mut AppState) {
    ui.heading("Compounds");
    ui.separator();

    if state.session.loaded_compounds().next().is_none() {
        ui.label("No data loaded.");
        return;
    }

    ui.horizontal(|ui: &mut Ui| {
        ui.label("Filter");
        ui.text_edit_singleline(&mut state.compound_filter.query);
    });
    ui.checkbox(&mut state.compound_filter.flagged_only, "Flagged only");
    ui.separator();

    let active = state.session.active_compound();
    let compounds = state.visible_compounds();

    ScrollArea::vertical()
        .id_salt("compound_list")
        .max_height(ui.available_height() * 0.55)
        .auto_shrink([false, true])
        .show(ui, |ui: &mut Ui| {
            for summary in compounds {
                let c = summary.compound;
                let mut label = format!("{c}  ({})", summary.records - summary.dropped);
                if summary.flagged > 0 {
                    label.push_str(&format!("  ⚑{}", summary.flagged));
                }
                let text = RichText::new(label).color(state.color_map.color_for(c));
                if ui.selectable_label(active == Some(c), text).clicked() {
                    state.select_compound(c);
                }
            }
        });
    ui.separator();

    // ---- Y axis selector ----
    ui.strong("Y axis");
    let current = state.session.axes().y;
    egui::ComboBox::from_id_salt("y_axis")
        .selected_text(current.label())
        .show_ui(ui, |ui: &mut Ui| {
            for &field in Field::Y_FIELDS {
                if ui.selectable_label(current == field, field.label()).clicked() {
                    state.set_y_field(field);
                }
            }
        });
    ui.separator();

    // ---- Actions ----
    ui.horizontal_wrapped(|ui: &mut Ui| {
        if ui.button("Undo zoom").clicked() {
            state.undo_zoom();
        }
        if ui.button("Reset axes").clicked() {
            state.session.reset_axes();
        }
    });
    ui.horizontal_wrapped(|ui: &mut Ui| {
        if ui.button("Clear plot").clicked() {
            state.session.clear_plot();
        }
        if ui.button("Clear all").clicked() {
            state.session.clear_all();
        }
    });
    ui.add_enabled_ui(!state.saving(), |ui: &mut Ui| {
        if ui.button("Save selections").clicked() {
            state.save();
        }
    });

    ui.add_space(8.0);
    ui.label(
        RichText::new("drag: select · alt+drag: deselect · shift+drag: zoom · click: toggle")
            .small()
            .weak(),
    );
}

// ---------------------------------------------------------------------------
// Bottom panel – flagged points
// ---------------------------------------------------------------------------

pub fn flag_table(ui: &mut Ui, state: &AppState) {
    let flags = state.session.export_selection();
    ui.strong(format!("Flagged points ({})", flags.len()));

    TableBuilder::new(ui)
        .striped(true)
        .resizable(true)
        .cell_layout(egui::Layout::left_to_right(egui::Align::Center))
        .column(Column::auto().at_least(120.0))
        .column(Column::auto().at_least(150.0))
        .column(Column::remainder())
        .header(20.0, |mut header| {
            header.col(|ui| {
                ui.strong("Compound");
            });
            header.col(|ui| {
                ui.strong("Date");
            });
            header.col(|ui| {
                ui.strong("Axes");
            });
        })
        .body(|body| {
            body.rows(18.0, flags.len(), |mut row| {
                let flag = &flags[row.index()];
                row.col(|ui| {
                    ui.label(flag.compound.name());
                });
                row.col(|ui| {
                    ui.label(format_timestamp(&flag.timestamp));
                });
                row.col(|ui| {
                    ui.label(format!("{} / {}", flag.x_field, flag.y_field));
                });
            });
        });
}

// ---------------------------------------------------------------------------
// Top bar
// ---------------------------------------------------------------------------

/// Render the top menu / toolbar.
pub fn top_bar(ui: &mut Ui, state: &mut AppState) {
    egui::menu::bar(ui, |ui: &mut Ui| {
        ui.menu_button("File", |ui: &mut Ui| {
            if ui.button("Open feed…").clicked() {
                open_feed_dialog(state);
                ui.close_menu();
            }
            if ui.button("Open feed folder…").clicked() {
                open_feed_dir_dialog(state);
                ui.close_menu();
            }
            if ui.button("Correct measurements…").clicked() {
                correct_dialog(state, false);
                ui.close_menu();
            }
            if ui.button("Correct and average pairs…").clicked() {
                correct_dialog(state, true);
                ui.close_menu();
            }
            ui.separator();
            if ui.button("Import flags…").clicked() {
                import_flags_dialog(state);
                ui.close_menu();
            }
            if ui.button("Export flags…").clicked() {
                export_flags_dialog(state);
                ui.close_menu();
            }
            if ui.button("Export filter document…").clicked() {
                export_filter_dialog(state);
                ui.close_menu();
            }
        });

        ui.separator();

        if let Some(compound) = state.session.active_compound() {
            ui.label(format!(
                "{compound}: {} points shown, {} flagged in total",
                state.session.displayed().len(),
                state.session.selected_count()
            ));
        }

        ui.separator();

        match &state.status {
            Some(Status::Info(msg)) => {
                ui.label(msg);
            }
            Some(Status::Warning(msg)) => {
                ui.label(RichText::new(msg).color(Color32::from_rgb(230, 160, 40)));
            }
            Some(Status::Error(msg)) => {
                ui.label(RichText::new(msg).color(Color32::RED));
            }
            None => {}
        }
    });
}

// ---------------------------------------------------------------------------
// File dialogs
// ---------------------------------------------------------------------------

fn open_feed_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Open compound feed")
        .set_directory(&state.settings.feed_dir)
        .add_filter("JSON", &["json"])
        .pick_file();

    if let Some(path) = file {
        state.load_feed_file(&path);
    }
}

fn open_feed_dir_dialog(state: &mut AppState) {
    let dir = rfd::FileDialog::new()
        .set_title("Open feed folder")
        .set_directory(&state.settings.feed_dir)
        .pick_folder();

    if let Some(dir) = dir {
        state.load_feed_dir(&dir);
    }
}

fn correct_dialog(state: &mut AppState, average_pairs: bool) {
    let file = rfd::FileDialog::new()
        .set_title("Open raw measurements")
        .add_filter("Supported files", &["parquet", "pq", "json", "csv"])
        .add_filter("Parquet", &["parquet", "pq"])
        .add_filter("JSON", &["json"])
        .add_filter("CSV", &["csv"])
        .pick_file();

    if let Some(path) = file {
        state.correct_measurements(&path, average_pairs);
    }
}

fn import_flags_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Import flags")
        .set_directory(&state.settings.flags_dir)
        .add_filter("JSON", &["json"])
        .pick_file();

    if let Some(path) = file {
        state.import_flags(&path);
    }
}

fn export_flags_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Export flags")
        .set_file_name(format!("{}_{}.json", state.settings.user, state.settings.session))
        .add_filter("JSON", &["json"])
        .save_file();

    if let Some(path) = file {
        state.export_flags(&path);
    }
}

fn export_filter_dialog(state: &mut AppState) {
    let file = rfd::FileDialog::new()
        .set_title("Export filter document")
        .set_file_name("filters.json")
        .add_filter("JSON", &["json"])
        .save_file();

    if let Some(path) = file {
        state.export_filter_document(&path);
    }
}
