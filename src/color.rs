use std::collections::BTreeMap;

use eframe::egui::Color32;
use palette::{Hsl, IntoColor, Srgb};

use tracegas_qc::data::model::Compound;

/// Fill of selected (flagged) points.
pub const SELECTED: Color32 = Color32::from_rgb(230, 60, 60);

/// Rubber band while box-selecting, and while box-deselecting.
pub const BOX_ADD: Color32 = Color32::from_rgba_premultiplied(60, 120, 220, 40);
pub const BOX_SUBTRACT: Color32 = Color32::from_rgba_premultiplied(220, 140, 40, 40);

/// Rubber band while zoom-dragging.
pub const ZOOM_BOX: Color32 = Color32::from_rgba_premultiplied(120, 120, 120, 40);

// ---------------------------------------------------------------------------
// Color palette generator
// ---------------------------------------------------------------------------

/// Generates `n` visually distinct colours using evenly spaced hues.
pub fn generate_palette(n: usize) -> Vec<Color32> {
    if n == 0 {
        return Vec::new();
    }
    (0..n)
        .map(|i| {
            let hue = (i as f32 / n as f32) * 360.0;
            let hsl = Hsl::new(hue, 0.75, 0.45);
            let rgb: Srgb = hsl.into_color();
            Color32::from_rgb(
                (rgb.red * 255.0) as u8,
                (rgb.green * 255.0) as u8,
                (rgb.blue * 255.0) as u8,
            )
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Compound → colour
// ---------------------------------------------------------------------------

/// One stable colour per monitored compound, so a compound keeps its colour
/// whatever else is loaded.
#[derive(Debug, Clone)]
pub struct ColorMap {
    mapping: BTreeMap<Compound, Color32>,
    default_color: Color32,
}

impl Default for ColorMap {
    fn default() -> Self {
        let palette = generate_palette(Compound::all().count());
        ColorMap {
            mapping: Compound::all().zip(palette).collect(),
            default_color: Color32::LIGHT_BLUE,
        }
    }
}

impl ColorMap {
    pub fn color_for(&self, compound: Compound) -> Color32 {
        self.mapping
            .get(&compound)
            .copied()
            .unwrap_or(self.default_color)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn palette_has_requested_size() {
        assert_eq!(generate_palette(0).len(), 0);
        assert_eq!(generate_palette(7).len(), 7);
    }

    #[test]
    fn every_compound_has_a_colour() {
        let map = ColorMap::default();
        let a = map.color_for(Compound::parse("CFC-11").unwrap());
        let b = map.color_for(Compound::parse("ethane").unwrap());
        assert_ne!(a, b);
    }
}
