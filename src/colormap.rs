//! Colormap definitions and the palette service
//!
//! Built-in ramps are stored as a few control points and expanded into
//! 256-entry palettes on demand.

use egui::Color32;

use crate::error::{Result, TraceError};

/// Number of entries in an expanded palette
pub const PALETTE_ENTRIES: usize = 256;

/// Available colormap types
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Colormap {
    #[default]
    Grayscale,
    Inferno,
    Magma,
    Viridis,
    Plasma,
    Jet,
    /// Diverging
    RdBu,
}

const INFERNO: &[(f64, [u8; 3])] = &[
    (0.0, [0, 0, 4]),
    (0.125, [31, 12, 72]),
    (0.25, [85, 15, 109]),
    (0.375, [136, 34, 106]),
    (0.5, [186, 54, 85]),
    (0.625, [227, 89, 51]),
    (0.75, [249, 140, 10]),
    (0.875, [249, 201, 50]),
    (1.0, [252, 255, 164]),
];

const MAGMA: &[(f64, [u8; 3])] = &[
    (0.0, [0, 0, 4]),
    (0.125, [28, 16, 68]),
    (0.25, [79, 18, 123]),
    (0.375, [129, 37, 129]),
    (0.5, [181, 54, 122]),
    (0.625, [229, 80, 100]),
    (0.75, [251, 135, 97]),
    (0.875, [254, 194, 135]),
    (1.0, [252, 253, 191]),
];

const VIRIDIS: &[(f64, [u8; 3])] = &[
    (0.0, [68, 1, 84]),
    (0.125, [71, 44, 122]),
    (0.25, [59, 81, 139]),
    (0.375, [44, 113, 142]),
    (0.5, [33, 144, 141]),
    (0.625, [39, 173, 129]),
    (0.75, [92, 200, 99]),
    (0.875, [170, 220, 50]),
    (1.0, [253, 231, 37]),
];

const PLASMA: &[(f64, [u8; 3])] = &[
    (0.0, [13, 8, 135]),
    (0.125, [75, 3, 161]),
    (0.25, [125, 3, 168]),
    (0.375, [168, 34, 150]),
    (0.5, [203, 70, 121]),
    (0.625, [229, 107, 93]),
    (0.75, [248, 148, 65]),
    (0.875, [253, 195, 40]),
    (1.0, [240, 249, 33]),
];

const JET: &[(f64, [u8; 3])] = &[
    (0.0, [0, 0, 128]),
    (0.125, [0, 0, 255]),
    (0.375, [0, 255, 255]),
    (0.625, [255, 255, 0]),
    (0.875, [255, 0, 0]),
    (1.0, [128, 0, 0]),
];

const RDBU: &[(f64, [u8; 3])] = &[
    (0.0, [103, 0, 31]),
    (0.25, [214, 96, 77]),
    (0.5, [247, 247, 247]),
    (0.75, [67, 147, 195]),
    (1.0, [5, 48, 97]),
];

impl Colormap {
    /// Get display name
    pub fn name(&self) -> &'static str {
        match self {
            Colormap::Grayscale => "Gray",
            Colormap::Inferno => "Inferno",
            Colormap::Magma => "Magma",
            Colormap::Viridis => "Viridis",
            Colormap::Plasma => "Plasma",
            Colormap::Jet => "Jet",
            Colormap::RdBu => "RdBu",
        }
    }

    /// Look up a colormap by name (case-insensitive)
    pub fn from_name(name: &str) -> Option<Colormap> {
        Self::all()
            .iter()
            .copied()
            .find(|c| c.name().eq_ignore_ascii_case(name.trim()))
    }

    pub fn all() -> &'static [Colormap] {
        &[
            Colormap::Grayscale,
            Colormap::Inferno,
            Colormap::Magma,
            Colormap::Viridis,
            Colormap::Plasma,
            Colormap::Jet,
            Colormap::RdBu,
        ]
    }

    /// Map a normalized value (0-1) to a color
    pub fn map(&self, t: f64) -> Color32 {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        match self {
            Colormap::Grayscale => Color32::from_gray((t * 255.0).round() as u8),
            Colormap::Inferno => interpolate(INFERNO, t),
            Colormap::Magma => interpolate(MAGMA, t),
            Colormap::Viridis => interpolate(VIRIDIS, t),
            Colormap::Plasma => interpolate(PLASMA, t),
            Colormap::Jet => interpolate(JET, t),
            Colormap::RdBu => interpolate(RDBU, t),
        }
    }
}

/// Piecewise-linear interpolation between control points
fn interpolate(stops: &[(f64, [u8; 3])], t: f64) -> Color32 {
    let upper = stops
        .iter()
        .position(|&(pos, _)| pos >= t)
        .unwrap_or(stops.len() - 1);
    if upper == 0 {
        let [r, g, b] = stops[0].1;
        return Color32::from_rgb(r, g, b);
    }
    let (p0, c0) = stops[upper - 1];
    let (p1, c1) = stops[upper];
    let f = if p1 > p0 { (t - p0) / (p1 - p0) } else { 0.0 };
    let lerp = |a: u8, b: u8| (a as f64 + (b as f64 - a as f64) * f).round() as u8;
    Color32::from_rgb(lerp(c0[0], c1[0]), lerp(c0[1], c1[1]), lerp(c0[2], c1[2]))
}

/// A named, ordered color ramp
#[derive(Clone, Debug, PartialEq)]
pub struct Palette {
    name: String,
    colors: Vec<Color32>,
}

impl Palette {
    /// Expand a colormap into a 256-entry ramp
    pub fn from_colormap(colormap: Colormap, reversed: bool) -> Self {
        let last = (PALETTE_ENTRIES - 1) as f64;
        let colors = (0..PALETTE_ENTRIES)
            .map(|i| {
                let t = i as f64 / last;
                colormap.map(if reversed { 1.0 - t } else { t })
            })
            .collect();
        let name = if reversed {
            format!("{}_r", colormap.name())
        } else {
            colormap.name().to_string()
        };
        Self { name, colors }
    }

    /// Build a palette from explicit colors, low end first. Needs at least one color.
    pub fn from_colors(name: impl Into<String>, colors: Vec<Color32>) -> Option<Self> {
        if colors.is_empty() {
            return None;
        }
        Some(Self {
            name: name.into(),
            colors,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn colors(&self) -> &[Color32] {
        &self.colors
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Color for a normalized value (0-1); NaN maps to the low end
    pub fn sample(&self, t: f64) -> Color32 {
        let t = if t.is_nan() { 0.0 } else { t.clamp(0.0, 1.0) };
        let idx = (t * (self.colors.len() - 1) as f64).round() as usize;
        self.colors[idx.min(self.colors.len() - 1)]
    }

    /// Resample the ramp to `entries` colors
    pub fn resampled(&self, entries: usize) -> Vec<Color32> {
        if entries <= 1 {
            return vec![self.sample(0.0); entries];
        }
        let last = (entries - 1) as f64;
        (0..entries).map(|i| self.sample(i as f64 / last)).collect()
    }
}

impl Default for Palette {
    fn default() -> Self {
        Palette::from_colormap(Colormap::default(), false)
    }
}

/// Source of named color ramps.
pub trait PaletteService {
    /// Palette registered under `name`, if any
    fn palette(&self, name: &str) -> Option<Palette>;

    /// All registered names
    fn names(&self) -> Vec<String>;

    /// Like [`PaletteService::palette`] but an unknown name is an error
    fn require(&self, name: &str) -> Result<Palette> {
        self.palette(name)
            .ok_or_else(|| TraceError::UnknownPalette(name.to_string()))
    }
}

/// The built-in colormaps. A trailing `_r` on a name selects the reversed ramp.
#[derive(Clone, Copy, Debug, Default)]
pub struct BuiltinPalettes;

impl PaletteService for BuiltinPalettes {
    fn palette(&self, name: &str) -> Option<Palette> {
        let name = name.trim();
        if let Some(colormap) = Colormap::from_name(name) {
            return Some(Palette::from_colormap(colormap, false));
        }
        let base = name.strip_suffix("_r")?;
        Colormap::from_name(base).map(|c| Palette::from_colormap(c, true))
    }

    fn names(&self) -> Vec<String> {
        Colormap::all().iter().map(|c| c.name().to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grayscale_endpoints() {
        assert_eq!(Colormap::Grayscale.map(0.0), Color32::from_gray(0));
        assert_eq!(Colormap::Grayscale.map(1.0), Color32::from_gray(255));
        assert_eq!(Colormap::Grayscale.map(2.0), Color32::from_gray(255));
        assert_eq!(Colormap::Grayscale.map(f64::NAN), Color32::from_gray(0));
    }

    #[test]
    fn test_interpolation_hits_control_points() {
        assert_eq!(Colormap::Viridis.map(0.0), Color32::from_rgb(68, 1, 84));
        assert_eq!(Colormap::Viridis.map(0.5), Color32::from_rgb(33, 144, 141));
        assert_eq!(Colormap::Viridis.map(1.0), Color32::from_rgb(253, 231, 37));
    }

    #[test]
    fn test_name_lookup() {
        for cmap in Colormap::all() {
            assert_eq!(Colormap::from_name(cmap.name()), Some(*cmap));
        }
        assert_eq!(Colormap::from_name("gray"), Some(Colormap::Grayscale));
        assert_eq!(Colormap::from_name("nope"), None);
    }

    #[test]
    fn test_palette_reversed() {
        let forward = Palette::from_colormap(Colormap::Inferno, false);
        let reversed = Palette::from_colormap(Colormap::Inferno, true);
        assert_eq!(forward.len(), PALETTE_ENTRIES);
        assert_eq!(forward.colors()[0], reversed.colors()[PALETTE_ENTRIES - 1]);
        assert_eq!(forward.sample(1.0), reversed.sample(0.0));
    }

    #[test]
    fn test_builtin_palette_service() {
        let service = BuiltinPalettes;
        assert_eq!(service.palette("Magma").unwrap().name(), "Magma");
        assert_eq!(service.palette("magma_r").unwrap().name(), "Magma_r");
        assert!(service.palette("unknown").is_none());
        assert!(matches!(service.require("unknown"), Err(TraceError::UnknownPalette(_))));
        assert_eq!(service.names().len(), Colormap::all().len());
    }

    #[test]
    fn test_reversed_name_resolves_to_same_palette() {
        let service = BuiltinPalettes;
        let reversed = service.palette("Magma_r").unwrap();
        assert_eq!(reversed.name(), "Magma_r");
        let again = service.palette(reversed.name()).unwrap();
        assert_eq!(again.name(), reversed.name());
        assert_eq!(again.colors(), reversed.colors());
    }

    #[test]
    fn test_resampled_keeps_ends() {
        let p = Palette::from_colormap(Colormap::Jet, false);
        let r = p.resampled(10);
        assert_eq!(r.len(), 10);
        assert_eq!(r[0], p.sample(0.0));
        assert_eq!(r[9], p.sample(1.0));
    }
}
