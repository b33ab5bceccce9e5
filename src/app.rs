use eframe::egui;

use tracegas_qc::config::Settings;

use crate::state::AppState;
use crate::ui::{panels, plot};

// ---------------------------------------------------------------------------
// eframe App implementation
// ---------------------------------------------------------------------------

pub struct FlaggingApp {
    pub state: AppState,
}

impl FlaggingApp {
    pub fn new(settings: Settings) -> Self {
        Self {
            state: AppState::new(settings),
        }
    }
}

impl eframe::App for FlaggingApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.state.poll_saves();
        if self.state.saving() {
            // keep polling while a worker is busy
            ctx.request_repaint_after(std::time::Duration::from_millis(100));
        }

        // ---- Top panel: menu bar ----
        egui::TopBottomPanel::top("top_bar").show(ctx, |ui| {
            panels::top_bar(ui, &mut self.state);
        });

        // ---- Bottom panel: flagged points ----
        egui::TopBottomPanel::bottom("flag_table")
            .resizable(true)
            .default_height(160.0)
            .show(ctx, |ui| {
                panels::flag_table(ui, &self.state);
            });

        // ---- Left side panel: compounds and actions ----
        egui::SidePanel::left("compound_panel")
            .default_width(240.0)
            .resizable(true)
            .show(ctx, |ui| {
                panels::side_panel(ui, &mut self.state);
            });

        // ---- Central panel: plot ----
        egui::CentralPanel::default().show(ctx, |ui| {
            plot::flagging_plot(ui, &mut self.state);
        });
    }
}
