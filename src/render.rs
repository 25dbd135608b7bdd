//! Colour mapping and pixel buffers
//!
//! Turns a (binned) intensity array into display pixels. Two packings exist:
//! [`BitDepth::Paletted8`] stores one byte per pixel indexing a 256-entry
//! lookup table whose top four entries are reserved for cut, NaN and mask
//! colours, and [`BitDepth::Direct24`] stores a colour per pixel.

use egui::{Color32, ColorImage};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::colormap::Palette;
use crate::error::{Result, TraceError};
use crate::mip::Rgb;
use crate::statistics::{self, CancelToken, HistogramSettings};
use crate::viewport::IndexRect;

/// Palette entries available to the ramp in an 8-bit lookup table
pub const RAMP_ENTRIES: usize = 252;

/// Entries of the intensity legend
pub const INTENSITY_RAMP_LEN: usize = 256;

const MIN_CUT_INDEX: u8 = 252;
const MAX_CUT_INDEX: u8 = 253;
const NAN_INDEX: u8 = 254;
const MASK_INDEX: u8 = 255;

/// What happens to a value beyond a cut bound
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum CutAction {
    /// Colour as the bound itself
    Clamp,
    /// Draw in a sentinel colour
    Color(Color32),
    /// Colour as if there were no bound (NaN becomes transparent)
    PassThrough,
}

/// A cut threshold and its action. `bound: None` cuts at the display min/max.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CutBound {
    pub bound: Option<f64>,
    pub action: CutAction,
}

impl CutBound {
    /// Clamp at the display range
    pub const DISPLAY_RANGE: CutBound = CutBound {
        bound: None,
        action: CutAction::Clamp,
    };

    /// NaN drawn green
    pub const NAN_GREEN: CutBound = CutBound {
        bound: None,
        action: CutAction::Color(Color32::GREEN),
    };

    pub fn new(bound: Option<f64>, action: CutAction) -> Self {
        Self { bound, action }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitDepth {
    #[default]
    Paletted8,
    Direct24,
}

/// Everything that decides the colour of a sample
#[derive(Clone, Debug, PartialEq)]
pub struct ColorMapping {
    pub min: f64,
    pub max: f64,
    pub log_scale: bool,
    pub palette: Palette,
    pub min_cut: CutBound,
    pub max_cut: CutBound,
    pub nan_cut: CutBound,
    /// Opacity applied to every drawn pixel
    pub alpha: Option<u8>,
    /// Colour for masked pixels; transparent when unset
    pub mask_color: Option<Color32>,
    pub bit_depth: BitDepth,
}

impl Default for ColorMapping {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: 1.0,
            log_scale: false,
            palette: Palette::default(),
            min_cut: CutBound::DISPLAY_RANGE,
            max_cut: CutBound::DISPLAY_RANGE,
            nan_cut: CutBound::NAN_GREEN,
            alpha: None,
            mask_color: None,
            bit_depth: BitDepth::default(),
        }
    }
}

/// Where a sample lands after cut handling
#[derive(Clone, Copy, Debug, PartialEq)]
enum Sample {
    Ramp(f64),
    MinCut,
    MaxCut,
    Nan,
    Masked,
}

impl ColorMapping {
    /// Position of `value` on the palette (0-1) in the current scale
    pub fn normalized(&self, value: f64) -> f64 {
        let scale = |v: f64| {
            if !self.log_scale {
                v
            } else if v > 0.0 {
                v.log10()
            } else {
                f64::NAN
            }
        };
        let (v, lo, hi) = (scale(value), scale(self.min), scale(self.max));
        if v.is_nan() {
            return 0.0;
        }
        if !(hi > lo) {
            return if v >= hi { 1.0 } else { 0.0 };
        }
        ((v - lo) / (hi - lo)).clamp(0.0, 1.0)
    }

    fn classify(&self, value: f64) -> Sample {
        if value.is_nan() {
            return match self.nan_cut.action {
                CutAction::Clamp => Sample::Ramp(0.0),
                _ => Sample::Nan,
            };
        }
        let lo = self.min_cut.bound.unwrap_or(self.min);
        let hi = self.max_cut.bound.unwrap_or(self.max);
        if value < lo {
            match self.min_cut.action {
                CutAction::Clamp => Sample::Ramp(self.normalized(lo)),
                CutAction::Color(_) => Sample::MinCut,
                CutAction::PassThrough => Sample::Ramp(self.normalized(value)),
            }
        } else if value > hi {
            match self.max_cut.action {
                CutAction::Clamp => Sample::Ramp(self.normalized(hi)),
                CutAction::Color(_) => Sample::MaxCut,
                CutAction::PassThrough => Sample::Ramp(self.normalized(value)),
            }
        } else {
            Sample::Ramp(self.normalized(value))
        }
    }

    fn special_color(&self, sample: Sample) -> Color32 {
        let cut = |c: &CutBound| match c.action {
            CutAction::Color(color) => color,
            _ => Color32::TRANSPARENT,
        };
        match sample {
            Sample::Ramp(t) => self.palette.sample(t),
            Sample::MinCut => cut(&self.min_cut),
            Sample::MaxCut => cut(&self.max_cut),
            Sample::Nan => cut(&self.nan_cut),
            Sample::Masked => self.mask_color.unwrap_or(Color32::TRANSPARENT),
        }
    }

    fn with_alpha(&self, color: Color32) -> Color32 {
        match self.alpha {
            Some(alpha) if color != Color32::TRANSPARENT => {
                let [r, g, b, a] = color.to_srgba_unmultiplied();
                let a = (a as u32 * alpha as u32 / 255) as u8;
                Color32::from_rgba_unmultiplied(r, g, b, a)
            }
            _ => color,
        }
    }

    /// Display colour of a single value
    pub fn color_of(&self, value: f64) -> Color32 {
        self.with_alpha(self.special_color(self.classify(value)))
    }

    /// 256-entry table for paletted output
    fn lookup_table(&self) -> Vec<Color32> {
        let mut table = self.palette.resampled(RAMP_ENTRIES);
        table.extend([
            self.special_color(Sample::MinCut),
            self.special_color(Sample::MaxCut),
            self.special_color(Sample::Nan),
            self.special_color(Sample::Masked),
        ]);
        table.into_iter().map(|c| self.with_alpha(c)).collect()
    }

    fn index_of(&self, sample: Sample) -> u8 {
        match sample {
            Sample::Ramp(t) => (t.clamp(0.0, 1.0) * (RAMP_ENTRIES - 1) as f64).round() as u8,
            Sample::MinCut => MIN_CUT_INDEX,
            Sample::MaxCut => MAX_CUT_INDEX,
            Sample::Nan => NAN_INDEX,
            Sample::Masked => MASK_INDEX,
        }
    }
}

/// Row-major pixels, `size` is `[width, height]`
#[derive(Clone, Debug, PartialEq)]
pub enum PixelBuffer {
    Indexed {
        size: [usize; 2],
        indices: Vec<u8>,
        palette: Vec<Color32>,
    },
    Direct {
        size: [usize; 2],
        pixels: Vec<Color32>,
    },
}

impl PixelBuffer {
    pub fn size(&self) -> [usize; 2] {
        match self {
            PixelBuffer::Indexed { size, .. } | PixelBuffer::Direct { size, .. } => *size,
        }
    }

    pub fn width(&self) -> usize {
        self.size()[0]
    }

    pub fn height(&self) -> usize {
        self.size()[1]
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn bit_depth(&self) -> BitDepth {
        match self {
            PixelBuffer::Indexed { .. } => BitDepth::Paletted8,
            PixelBuffer::Direct { .. } => BitDepth::Direct24,
        }
    }

    /// Colour at column `x`, row `y`
    pub fn pixel(&self, x: usize, y: usize) -> Option<Color32> {
        let [w, h] = self.size();
        if x >= w || y >= h {
            return None;
        }
        let i = y * w + x;
        Some(match self {
            PixelBuffer::Indexed {
                indices, palette, ..
            } => palette
                .get(indices[i] as usize)
                .copied()
                .unwrap_or(Color32::TRANSPARENT),
            PixelBuffer::Direct { pixels, .. } => pixels[i],
        })
    }

    /// Copy out a sub-rectangle
    pub fn slice(&self, rect: IndexRect) -> Result<PixelBuffer> {
        let [w, h] = self.size();
        if rect.col + rect.cols > w || rect.row + rect.rows > h {
            return Err(TraceError::slice_out_of_bounds(rect.as_xywh(), w, h));
        }
        let size = [rect.cols, rect.rows];
        Ok(match self {
            PixelBuffer::Indexed {
                indices, palette, ..
            } => PixelBuffer::Indexed {
                size,
                indices: slice_rows(indices, w, rect),
                palette: palette.clone(),
            },
            PixelBuffer::Direct { pixels, .. } => PixelBuffer::Direct {
                size,
                pixels: slice_rows(pixels, w, rect),
            },
        })
    }

    /// Mirror columns and/or rows
    pub fn flipped(&self, columns: bool, rows: bool) -> PixelBuffer {
        if !columns && !rows {
            return self.clone();
        }
        let size = self.size();
        match self {
            PixelBuffer::Indexed {
                indices, palette, ..
            } => PixelBuffer::Indexed {
                size,
                indices: flip(indices, size, columns, rows),
                palette: palette.clone(),
            },
            PixelBuffer::Direct { pixels, .. } => PixelBuffer::Direct {
                size,
                pixels: flip(pixels, size, columns, rows),
            },
        }
    }

    /// Nearest-neighbour resize to `size`
    pub fn scaled_to(&self, size: [usize; 2]) -> PixelBuffer {
        let from = self.size();
        if size == from {
            return self.clone();
        }
        match self {
            PixelBuffer::Indexed {
                indices, palette, ..
            } => PixelBuffer::Indexed {
                size,
                indices: scale_nearest(indices, from, size),
                palette: palette.clone(),
            },
            PixelBuffer::Direct { pixels, .. } => PixelBuffer::Direct {
                size,
                pixels: scale_nearest(pixels, from, size),
            },
        }
    }

    /// Expand to an egui image
    pub fn to_color_image(&self) -> ColorImage {
        let [w, h] = self.size();
        let mut bytes = Vec::with_capacity(w * h * 4);
        match self {
            PixelBuffer::Indexed {
                indices, palette, ..
            } => {
                for &i in indices {
                    let c = palette.get(i as usize).copied().unwrap_or(Color32::TRANSPARENT);
                    bytes.extend_from_slice(&c.to_array());
                }
            }
            PixelBuffer::Direct { pixels, .. } => {
                for c in pixels {
                    bytes.extend_from_slice(&c.to_array());
                }
            }
        }
        ColorImage::from_rgba_premultiplied([w, h], &bytes)
    }
}

fn slice_rows<T: Copy>(data: &[T], width: usize, rect: IndexRect) -> Vec<T> {
    let mut out = Vec::with_capacity(rect.rows * rect.cols);
    for r in rect.row..rect.row + rect.rows {
        let start = r * width + rect.col;
        out.extend_from_slice(&data[start..start + rect.cols]);
    }
    out
}

fn flip<T: Copy>(data: &[T], [w, h]: [usize; 2], columns: bool, rows: bool) -> Vec<T> {
    let mut out = Vec::with_capacity(data.len());
    for y in 0..h {
        let sy = if rows { h - 1 - y } else { y };
        for x in 0..w {
            let sx = if columns { w - 1 - x } else { x };
            out.push(data[sy * w + sx]);
        }
    }
    out
}

fn scale_nearest<T: Copy>(data: &[T], [w, h]: [usize; 2], [dw, dh]: [usize; 2]) -> Vec<T> {
    if w == 0 || h == 0 {
        return Vec::new();
    }
    let mut out = Vec::with_capacity(dw * dh);
    for y in 0..dh {
        let sy = (y * h / dh).min(h - 1);
        for x in 0..dw {
            let sx = (x * w / dw).min(w - 1);
            out.push(data[sy * w + sx]);
        }
    }
    out
}

/// Colour an image.
///
/// With `rgb` the pixels come from it directly and the output is always
/// [`BitDepth::Direct24`]; otherwise `image` goes through the mapping at its
/// configured depth. `mask` entries that are `false` are drawn masked.
pub fn render_image(
    image: ArrayView2<'_, f64>,
    rgb: Option<ArrayView2<'_, Rgb>>,
    mask: Option<ArrayView2<'_, bool>>,
    mapping: &ColorMapping,
) -> Result<PixelBuffer> {
    let (rows, cols) = image.dim();
    if rows == 0 || cols == 0 {
        return Err(TraceError::empty(rows, cols));
    }
    let check = |dim: (usize, usize)| {
        if dim != (rows, cols) {
            Err(TraceError::ShapeMismatch {
                expected: [rows, cols],
                actual: [dim.0, dim.1],
            })
        } else {
            Ok(())
        }
    };
    if let Some(m) = &mask {
        check(m.dim())?;
    }
    let masked = |r: usize, c: usize| mask.as_ref().is_some_and(|m| !m[[r, c]]);
    let size = [cols, rows];

    if let Some(rgb) = rgb {
        check(rgb.dim())?;
        let mut pixels = Vec::with_capacity(rows * cols);
        for ((r, c), &[red, green, blue]) in rgb.indexed_iter() {
            let color = if masked(r, c) {
                mapping.special_color(Sample::Masked)
            } else {
                Color32::from_rgb(red, green, blue)
            };
            pixels.push(mapping.with_alpha(color));
        }
        return Ok(PixelBuffer::Direct { size, pixels });
    }

    let samples = image.indexed_iter().map(|((r, c), &v)| {
        if masked(r, c) {
            Sample::Masked
        } else {
            mapping.classify(v)
        }
    });

    Ok(match mapping.bit_depth {
        BitDepth::Paletted8 => PixelBuffer::Indexed {
            size,
            indices: samples.map(|s| mapping.index_of(s)).collect(),
            palette: mapping.lookup_table(),
        },
        BitDepth::Direct24 => PixelBuffer::Direct {
            size,
            pixels: samples
                .map(|s| mapping.with_alpha(mapping.special_color(s)))
                .collect(),
        },
    })
}

/// Values of the intensity legend, max first
pub fn intensity_ramp_values(mapping: &ColorMapping) -> Array2<f64> {
    let last = (INTENSITY_RAMP_LEN - 1) as f64;
    let geometric = mapping.log_scale && mapping.min > 0.0 && mapping.max > 0.0;
    Array2::from_shape_fn((INTENSITY_RAMP_LEN, 1), |(i, _)| {
        let f = 1.0 - i as f64 / last;
        if geometric {
            let (lo, hi) = (mapping.min.log10(), mapping.max.log10());
            10f64.powf(lo + f * (hi - lo))
        } else {
            mapping.min + f * (mapping.max - mapping.min)
        }
    })
}

/// The intensity legend: one column, max at the top, min at the bottom
pub fn intensity_ramp(mapping: &ColorMapping) -> Result<PixelBuffer> {
    render_image(intensity_ramp_values(mapping).view(), None, None, mapping)
}

/// Inputs for an [`ImageService`] call
#[derive(Clone, Copy, Debug)]
pub struct ImageServiceBean<'a> {
    pub image: ArrayView2<'a, f64>,
    pub rgb: Option<ArrayView2<'a, Rgb>>,
    pub mask: Option<ArrayView2<'a, bool>>,
    pub mapping: &'a ColorMapping,
    pub histogram: HistogramSettings,
    pub cancel: Option<&'a CancelToken>,
}

/// Statistics and pixel conversion, swappable by hosts
pub trait ImageService {
    /// Display range of the bean's image, `None` when no sample qualifies
    fn fast_statistics(&self, bean: &ImageServiceBean<'_>) -> Result<Option<(f64, f64)>>;

    /// Coloured pixels for the bean's image
    fn image_data(&self, bean: &ImageServiceBean<'_>) -> Result<PixelBuffer>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultImageService;

impl ImageService for DefaultImageService {
    fn fast_statistics(&self, bean: &ImageServiceBean<'_>) -> Result<Option<(f64, f64)>> {
        statistics::compute(
            bean.image,
            bean.mask,
            &bean.histogram,
            bean.mapping.log_scale,
            bean.cancel,
        )
    }

    fn image_data(&self, bean: &ImageServiceBean<'_>) -> Result<PixelBuffer> {
        render_image(bean.image, bean.rgb, bean.mask, bean.mapping)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::colormap::Colormap;
    use ndarray::array;

    fn mapping(bit_depth: BitDepth) -> ColorMapping {
        ColorMapping {
            min: 0.0,
            max: 10.0,
            bit_depth,
            ..Default::default()
        }
    }

    #[test]
    fn test_normalized_linear_and_log() {
        let mut m = mapping(BitDepth::Direct24);
        assert!((m.normalized(5.0) - 0.5).abs() < 1e-12);
        assert_eq!(m.normalized(-3.0), 0.0);
        assert_eq!(m.normalized(30.0), 1.0);

        m.min = 1.0;
        m.max = 100.0;
        m.log_scale = true;
        assert!((m.normalized(10.0) - 0.5).abs() < 1e-12);
        assert_eq!(m.normalized(-1.0), 0.0);
    }

    #[test]
    fn test_default_cuts_clamp_to_range() {
        let m = mapping(BitDepth::Direct24);
        assert_eq!(m.color_of(-5.0), m.palette.sample(0.0));
        assert_eq!(m.color_of(50.0), m.palette.sample(1.0));
        assert_eq!(m.color_of(f64::NAN), Color32::GREEN);
    }

    #[test]
    fn test_cut_actions() {
        let mut m = mapping(BitDepth::Direct24);
        m.min_cut = CutBound::new(Some(2.0), CutAction::Clamp);
        assert_eq!(m.color_of(1.0), m.palette.sample(0.2));
        m.min_cut = CutBound::new(Some(2.0), CutAction::PassThrough);
        assert_eq!(m.color_of(1.0), m.palette.sample(0.1));
        m.min_cut = CutBound::new(Some(2.0), CutAction::Color(Color32::BLUE));
        assert_eq!(m.color_of(1.0), Color32::BLUE);
        m.max_cut = CutBound::new(None, CutAction::Color(Color32::RED));
        assert_eq!(m.color_of(11.0), Color32::RED);
        assert_eq!(m.color_of(10.0), m.palette.sample(1.0));
    }

    #[test]
    fn test_nan_actions() {
        let mut m = mapping(BitDepth::Direct24);
        m.nan_cut = CutBound::new(None, CutAction::PassThrough);
        assert_eq!(m.color_of(f64::NAN), Color32::TRANSPARENT);
        m.nan_cut = CutBound::new(None, CutAction::Clamp);
        assert_eq!(m.color_of(f64::NAN), m.palette.sample(0.0));
    }

    #[test]
    fn test_masked_pixels_transparent_or_mask_color() {
        let image = array![[1.0, 2.0], [3.0, 4.0]];
        let mask = array![[true, false], [true, true]];
        for depth in [BitDepth::Paletted8, BitDepth::Direct24] {
            let mut m = mapping(depth);
            let buf = render_image(image.view(), None, Some(mask.view()), &m).unwrap();
            assert_eq!(buf.pixel(1, 0), Some(Color32::TRANSPARENT));
            assert_ne!(buf.pixel(0, 0), Some(Color32::TRANSPARENT));

            m.mask_color = Some(Color32::YELLOW);
            let buf = render_image(image.view(), None, Some(mask.view()), &m).unwrap();
            assert_eq!(buf.pixel(1, 0), Some(Color32::YELLOW));
        }
    }

    #[test]
    fn test_paletted_matches_ramp_ends_and_cuts() {
        let mut m = mapping(BitDepth::Paletted8);
        m.palette = Palette::from_colormap(Colormap::Viridis, false);
        m.max_cut = CutBound::new(Some(8.0), CutAction::Color(Color32::RED));
        let image = array![[0.0, 8.0, 9.0, f64::NAN]];
        let buf = render_image(image.view(), None, None, &m).unwrap();
        assert_eq!(buf.bit_depth(), BitDepth::Paletted8);
        assert_eq!(buf.size(), [4, 1]);
        assert_eq!(buf.pixel(0, 0), Some(m.palette.sample(0.0)));
        assert_eq!(buf.pixel(2, 0), Some(Color32::RED));
        assert_eq!(buf.pixel(3, 0), Some(Color32::GREEN));
        if let PixelBuffer::Indexed { indices, palette, .. } = &buf {
            assert_eq!(palette.len(), 256);
            assert_eq!(indices[2], MAX_CUT_INDEX);
            assert_eq!(indices[3], NAN_INDEX);
        }
    }

    #[test]
    fn test_rgb_is_always_direct() {
        let image = array![[0.0, 1.0]];
        let rgb = ndarray::Array2::from_shape_vec((1, 2), vec![[255u8, 0, 0], [0, 0, 255]]).unwrap();
        let m = mapping(BitDepth::Paletted8);
        let buf = render_image(image.view(), Some(rgb.view()), None, &m).unwrap();
        assert_eq!(buf.bit_depth(), BitDepth::Direct24);
        assert_eq!(buf.pixel(0, 0), Some(Color32::from_rgb(255, 0, 0)));
        assert_eq!(buf.pixel(1, 0), Some(Color32::from_rgb(0, 0, 255)));
    }

    #[test]
    fn test_alpha_applied() {
        let mut m = mapping(BitDepth::Direct24);
        m.alpha = Some(128);
        let c = m.color_of(10.0);
        assert_eq!(c.a(), 128);
        m.nan_cut = CutBound::new(None, CutAction::PassThrough);
        assert_eq!(m.color_of(f64::NAN), Color32::TRANSPARENT);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let image = array![[1.0, 2.0]];
        let mask = array![[true], [false]];
        let r = render_image(image.view(), None, Some(mask.view()), &mapping(BitDepth::Direct24));
        assert!(matches!(r, Err(TraceError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_slice_flip_scale() {
        let pixels: Vec<Color32> = (0..6).map(|i| Color32::from_gray(i * 10)).collect();
        let buf = PixelBuffer::Direct { size: [3, 2], pixels };

        let s = buf
            .slice(IndexRect { row: 1, col: 1, rows: 1, cols: 2 })
            .unwrap();
        assert_eq!(s.size(), [2, 1]);
        assert_eq!(s.pixel(0, 0), Some(Color32::from_gray(40)));

        let f = buf.flipped(true, true);
        assert_eq!(f.pixel(0, 0), Some(Color32::from_gray(50)));
        assert_eq!(f.pixel(2, 1), Some(Color32::from_gray(0)));

        let big = buf.scaled_to([6, 4]);
        assert_eq!(big.size(), [6, 4]);
        assert_eq!(big.pixel(1, 1), Some(Color32::from_gray(0)));
        assert_eq!(big.pixel(5, 3), Some(Color32::from_gray(50)));

        assert!(matches!(
            buf.slice(IndexRect { row: 0, col: 2, rows: 1, cols: 2 }),
            Err(TraceError::SliceOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_indexed_geometry_keeps_indices() {
        let buf = PixelBuffer::Indexed {
            size: [2, 1],
            indices: vec![7, 200],
            palette: (0..=255).map(Color32::from_gray).collect(),
        };
        let f = buf.flipped(true, false);
        assert_eq!(f.pixel(0, 0), Some(Color32::from_gray(200)));
        let image = f.to_color_image();
        assert_eq!(image.size, [2, 1]);
        assert_eq!(image.pixels[1], Color32::from_gray(7));
    }

    #[test]
    fn test_intensity_ramp() {
        let m = mapping(BitDepth::Paletted8);
        let ramp = intensity_ramp(&m).unwrap();
        assert_eq!(ramp.size(), [1, INTENSITY_RAMP_LEN]);
        assert_eq!(ramp.pixel(0, 0), Some(m.palette.sample(1.0)));
        assert_eq!(ramp.pixel(0, INTENSITY_RAMP_LEN - 1), Some(m.palette.sample(0.0)));

        let mut log = m.clone();
        log.min = 1.0;
        log.max = 1000.0;
        log.log_scale = true;
        let values = intensity_ramp_values(&log);
        assert!((values[[0, 0]] - 1000.0).abs() < 1e-6);
        assert!((values[[INTENSITY_RAMP_LEN - 1, 0]] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_default_image_service() {
        let mut image = ndarray::Array2::from_elem((4, 4), 1.0);
        image[[0, 0]] = 1.0e6;
        let mut mask = ndarray::Array2::from_elem((4, 4), true);
        mask[[0, 0]] = false;
        image[[3, 3]] = 5.0;
        let m = mapping(BitDepth::Direct24);
        let bean = ImageServiceBean {
            image: image.view(),
            rgb: None,
            mask: Some(mask.view()),
            mapping: &m,
            histogram: HistogramSettings::default(),
            cancel: None,
        };
        let service = DefaultImageService;
        assert_eq!(service.fast_statistics(&bean).unwrap(), Some((1.0, 5.0)));
        let buf = service.image_data(&bean).unwrap();
        assert_eq!(buf.pixel(0, 0), Some(Color32::TRANSPARENT));
    }
}
