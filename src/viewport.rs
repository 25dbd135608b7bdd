//! Mapping between axis ranges, array indices and viewport pixels
//!
//! Pure geometry with no egui event handling, so it can be unit tested in
//! isolation. Axis coordinates are converted to a continuous *display index*
//! along each dimension (sample `i` spans `[i, i + 1)`), binned, clipped, and
//! finally mirrored into array indices according to the image origin.

use egui::{Rect, Vec2};
use serde::{Deserialize, Serialize};

/// Smallest extent (in binned samples) a region is allowed to collapse to
pub const MINIMUM_ZOOM_SIZE: usize = 4;

/// Extent at or below which per-pixel value labels are worth drawing
pub const MINIMUM_LABEL_SIZE: usize = 10;

/// Binning keeps at least this many samples along the longest side
pub const MINIMUM_BINNED_SIDE: usize = 64;

/// Largest bin factor ever chosen
pub const MAX_BIN: u32 = 1024;

/// Default multiple of the screen size above which scaling is skipped
pub const SCREEN_GUARD_FACTOR: f32 = 2.0;

/// Visible range of one axis. `lower` may exceed `upper` for inverted axes.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub lower: f64,
    pub upper: f64,
}

impl AxisRange {
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// `(min, max)` regardless of orientation
    pub fn normalized(&self) -> (f64, f64) {
        if self.upper < self.lower {
            (self.upper, self.lower)
        } else {
            (self.lower, self.upper)
        }
    }

    pub fn span(&self) -> f64 {
        (self.upper - self.lower).abs()
    }
}

/// Which array corner sits at the display origin (top-left of the viewport)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageOrigin {
    #[default]
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl ImageOrigin {
    /// Columns run right to left on screen
    pub fn mirrors_columns(&self) -> bool {
        matches!(self, ImageOrigin::TopRight | ImageOrigin::BottomRight)
    }

    /// Rows run bottom to top on screen
    pub fn mirrors_rows(&self) -> bool {
        matches!(self, ImageOrigin::BottomLeft | ImageOrigin::BottomRight)
    }

    pub fn all() -> &'static [ImageOrigin] {
        &[
            ImageOrigin::TopLeft,
            ImageOrigin::TopRight,
            ImageOrigin::BottomLeft,
            ImageOrigin::BottomRight,
        ]
    }
}

/// Physical bounding box of an image whose axes are not index based,
/// e.g. one registered against others in a composite.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GlobalRange {
    /// `(min, max)` along the columns
    pub x: (f64, f64),
    /// `(min, max)` along the rows
    pub y: (f64, f64),
}

/// How axis coordinates along one dimension relate to sample indices
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum AxisMapping<'a> {
    /// Coordinates are indices
    Index,
    /// `labels[i]` is the coordinate of index `i`
    Labels(&'a [f64]),
    /// `labels[i]` is the centre of sample `i`; edge samples are padded by half a sample
    PaddedLabels(&'a [f64]),
    /// `len` samples spread evenly over `[min, max]`
    Uniform { min: f64, max: f64, len: usize },
}

impl<'a> AxisMapping<'a> {
    /// Pick the mapping for a dimension of `len` samples
    pub fn for_dimension(labels: Option<&'a [f64]>, global: Option<(f64, f64)>, len: usize) -> Self {
        match (labels, global) {
            // A lone label has no spacing to follow: one unit-wide sample centred on it
            (Some(l), _) if l.len() == 1 => AxisMapping::PaddedLabels(l),
            (Some(l), Some(_)) if !l.is_empty() => AxisMapping::PaddedLabels(l),
            (_, Some((min, max))) => AxisMapping::Uniform { min, max, len },
            (Some(l), None) if !l.is_empty() => AxisMapping::Labels(l),
            _ => AxisMapping::Index,
        }
    }

    /// Continuous display index of an axis coordinate
    pub fn continuous(&self, value: f64) -> f64 {
        match *self {
            AxisMapping::Index => value,
            AxisMapping::Labels(l) => interpolated_index(l, value),
            AxisMapping::PaddedLabels(l) => interpolated_index(l, value) + 0.5,
            AxisMapping::Uniform { min, max, len } => {
                let step = (max - min) / len.max(1) as f64;
                if step == 0.0 {
                    0.0
                } else {
                    (value - min) / step
                }
            }
        }
    }

    /// Full-resolution index bounds `[start, end)` covering the coordinates
    /// `a` and `b`, in either order
    fn covering(&self, a: f64, b: f64) -> (f64, f64) {
        let (lo, hi) = if self.continuous(b) < self.continuous(a) {
            (b, a)
        } else {
            (a, b)
        };
        match *self {
            AxisMapping::Labels(l) | AxisMapping::PaddedLabels(l) => (
                position_in_axis(l, lo, Rounding::Floor) as f64,
                (position_in_axis(l, hi, Rounding::Ceil) + 1) as f64,
            ),
            _ => (self.continuous(lo).floor(), self.continuous(hi).ceil()),
        }
    }
}

/// Direction to step when the nearest label is on the wrong side of a value
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rounding {
    Floor,
    Ceil,
}

/// Index of the label nearest `value` by absolute difference.
///
/// Ties go to the first label. With [`Rounding::Floor`] the index steps back
/// when the nearest label lies past `value` in index order, with
/// [`Rounding::Ceil`] it steps forward when it lies before. Labels may run
/// either way, so a floor/ceil pair always brackets `value` in index order.
/// The result is clamped to the label indices.
pub fn position_in_axis(labels: &[f64], value: f64, rounding: Rounding) -> usize {
    if labels.is_empty() {
        return 0;
    }
    let mut pos = 0;
    let mut best = f64::MAX;
    let mut dif = 0.0;
    for (i, &label) in labels.iter().enumerate() {
        let ad = (label - value).abs();
        if ad < best {
            best = ad;
            pos = i;
            dif = label - value;
        }
    }
    let increasing = labels[labels.len() - 1] >= labels[0];
    // Nearest label sits at a higher index than the value would
    let past = if increasing { dif > 0.0 } else { dif < 0.0 };
    let before = if increasing { dif < 0.0 } else { dif > 0.0 };
    match rounding {
        Rounding::Floor if past => pos.saturating_sub(1),
        Rounding::Ceil if before => (pos + 1).min(labels.len() - 1),
        _ => pos,
    }
}

/// Fractional index of `value` among monotonic labels, extrapolating past the ends
fn interpolated_index(labels: &[f64], value: f64) -> f64 {
    match labels.len() {
        0 => return value,
        1 => return value - labels[0],
        _ => {}
    }
    let increasing = labels[labels.len() - 1] >= labels[0];
    let before_start = if increasing {
        value < labels[0]
    } else {
        value > labels[0]
    };
    let segment = if before_start {
        0
    } else {
        labels
            .windows(2)
            .position(|w| {
                let (a, b) = (w[0].min(w[1]), w[0].max(w[1]));
                value >= a && value <= b
            })
            .unwrap_or(labels.len() - 2)
    };
    let (a, b) = (labels[segment], labels[segment + 1]);
    if b == a {
        segment as f64
    } else {
        segment as f64 + (value - a) / (b - a)
    }
}

/// Label value at a fractional index, extrapolating past the ends
fn interpolated_label(labels: &[f64], index: f64) -> f64 {
    match labels.len() {
        0 => index,
        1 => labels[0] + index,
        len => {
            let segment = (index.floor().max(0.0) as usize).min(len - 2);
            let (a, b) = (labels[segment], labels[segment + 1]);
            a + (index - segment as f64) * (b - a)
        }
    }
}

/// Convert an index-space point `[x, y]` (column, row) to label coordinates
pub fn point_in_axis_coordinates(
    point: [f64; 2],
    x_labels: Option<&[f64]>,
    y_labels: Option<&[f64]>,
) -> [f64; 2] {
    let convert = |v: f64, labels: Option<&[f64]>| match labels {
        Some(l) if !v.is_nan() => interpolated_label(l, v),
        _ => v,
    };
    [convert(point[0], x_labels), convert(point[1], y_labels)]
}

/// Convert a label-space point `[x, y]` back to fractional indices
pub fn point_in_image_coordinates(
    point: [f64; 2],
    x_labels: Option<&[f64]>,
    y_labels: Option<&[f64]>,
) -> [f64; 2] {
    let convert = |v: f64, labels: Option<&[f64]>| match labels {
        Some(l) if !v.is_nan() => interpolated_index(l, v),
        _ => v,
    };
    [convert(point[0], x_labels), convert(point[1], y_labels)]
}

/// Axis ranges showing the whole image
pub fn autoscale_ranges(
    shape: [usize; 2],
    x_labels: Option<&[f64]>,
    y_labels: Option<&[f64]>,
    global: Option<&GlobalRange>,
) -> (AxisRange, AxisRange) {
    if let Some(g) = global {
        return (AxisRange::new(g.x.0, g.x.1), AxisRange::new(g.y.0, g.y.1));
    }
    let full = |labels: Option<&[f64]>, len: usize| match labels {
        Some([only]) => AxisRange::new(only - 0.5, only + 0.5),
        Some(l) if !l.is_empty() => AxisRange::new(l[0], l[l.len() - 1]),
        _ => AxisRange::new(0.0, len as f64),
    };
    (full(x_labels, shape[1]), full(y_labels, shape[0]))
}

/// Pick the power-of-two bin for the current zoom.
///
/// The bin is the largest power of two whose binned span still covers the
/// viewport in both dimensions, capped so the longest binned side keeps at
/// least [`MINIMUM_BINNED_SIDE`] samples. `span` is the visible extent in
/// full-resolution samples as `[x, y]`; `shape` is `[rows, cols]`.
pub fn downsample_bin(viewport: Vec2, span: [f64; 2], shape: [usize; 2]) -> u32 {
    let (vw, vh) = (viewport.x as f64, viewport.y as f64);
    let mut bin = MAX_BIN;
    let mut i = 2;
    while i <= MAX_BIN {
        let f = i as f64;
        if vw > span[0] / f || vh > span[1] / f {
            bin = i / 2;
            break;
        }
        i *= 2;
    }

    let side = shape[0].max(shape[1]);
    let cap = side / MINIMUM_BINNED_SIDE;
    if cap < 1 {
        return 1;
    }
    let cap = 1u32 << (usize::BITS - 1 - cap.leading_zeros()).min(MAX_BIN.trailing_zeros());
    bin.min(cap).max(1)
}

/// Limits applied while mapping a region
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MapperLimits {
    pub minimum_zoom_size: usize,
    pub minimum_label_size: usize,
    /// Primary screen size in pixels
    pub screen_size: Vec2,
    pub screen_guard_factor: f32,
}

impl Default for MapperLimits {
    fn default() -> Self {
        Self {
            minimum_zoom_size: MINIMUM_ZOOM_SIZE,
            minimum_label_size: MINIMUM_LABEL_SIZE,
            screen_size: Vec2::new(1920.0, 1080.0),
            screen_guard_factor: SCREEN_GUARD_FACTOR,
        }
    }
}

/// Rectangle of array indices
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct IndexRect {
    pub row: usize,
    pub col: usize,
    pub rows: usize,
    pub cols: usize,
}

impl IndexRect {
    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    /// `[col, row, cols, rows]`, the order slice errors report
    pub fn as_xywh(&self) -> [usize; 4] {
        [self.col, self.row, self.cols, self.rows]
    }
}

/// Everything needed to map the viewport onto a binned array
#[derive(Clone, Copy, Debug)]
pub struct RegionRequest<'a> {
    /// Viewport in screen pixels
    pub viewport: Rect,
    pub x_range: AxisRange,
    pub y_range: AxisRange,
    pub bin: u32,
    /// `[rows, cols]` of the binned array
    pub binned_shape: [usize; 2],
    pub origin: ImageOrigin,
    pub x_axis: AxisMapping<'a>,
    pub y_axis: AxisMapping<'a>,
    pub limits: MapperLimits,
}

/// Result of mapping a viewport onto a binned array
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Region {
    /// Binned array indices to extract, already mirrored for the origin
    pub source: IndexRect,
    /// Destination `[width, height]` in pixels
    pub dest_size: [usize; 2],
    /// Screen pixels per binned sample
    pub scale: Vec2,
    /// Distance from the slice's leading edge to the viewport's, in screen
    /// pixels. Negative when the image starts inside the viewport.
    pub offset: Vec2,
    /// `[columns, rows]` to reverse after slicing: the origin's mirroring,
    /// toggled when an axis range runs against index order
    pub flip: [bool; 2],
    /// False when the screen guard tripped and the slice is drawn unscaled
    pub scaled: bool,
    pub maximum_zoom: bool,
    pub label_zoom: bool,
}

/// One dimension of a mapped region
#[derive(Clone, Copy, Debug, PartialEq)]
struct DimensionMap {
    /// First array index (mirrored)
    start: usize,
    len: usize,
    /// First display index of the slice
    display_start: usize,
    /// Continuous binned display bounds of the axis range (unclipped, ordered)
    lo: f64,
    hi: f64,
    /// The range's lower end maps to the higher display index
    reversed: bool,
    collapsed: bool,
}

impl DimensionMap {
    /// Screen distance from the slice's leading edge to the viewport's leading edge
    fn offset(&self, scale: f64) -> f64 {
        if self.reversed {
            ((self.display_start + self.len) as f64 - self.hi) * scale
        } else {
            (self.lo - self.display_start as f64) * scale
        }
    }
}

fn map_dimension(
    range: AxisRange,
    mapping: AxisMapping<'_>,
    bin: u32,
    len: usize,
    mirrored: bool,
    minimum_size: usize,
) -> DimensionMap {
    let b = bin.max(1) as f64;

    let d_lower = mapping.continuous(range.lower) / b;
    let d_upper = mapping.continuous(range.upper) / b;
    let reversed = d_upper < d_lower;
    let (c_lo, c_hi) = if reversed { (d_upper, d_lower) } else { (d_lower, d_upper) };
    let (i_lo, i_hi) = mapping.covering(range.lower, range.upper);

    let n = len as f64;
    let mut start = (i_lo / b).floor().clamp(0.0, n) as usize;
    let mut end = (i_hi / b).ceil().clamp(0.0, n) as usize;
    if end < start {
        std::mem::swap(&mut start, &mut end);
    }

    let floor = minimum_size.min(len);
    let collapsed = end - start <= minimum_size;
    if end - start < floor {
        end = (start + floor).min(len);
        start = end - floor;
    }

    let array_start = if mirrored { len - end } else { start };
    DimensionMap {
        start: array_start,
        len: end - start,
        display_start: start,
        lo: c_lo,
        hi: c_hi,
        reversed,
        collapsed,
    }
}

/// Work out which part of the binned array is visible and how to scale it.
///
/// Returns `None` for a zero-area viewport or a degenerate axis range.
pub fn compute_region(request: &RegionRequest<'_>) -> Option<Region> {
    let viewport = request.viewport;
    if viewport.width() < 1.0 || viewport.height() < 1.0 {
        return None;
    }
    let [rows, cols] = request.binned_shape;
    if rows == 0 || cols == 0 {
        return None;
    }
    let limits = request.limits;

    let x = map_dimension(
        request.x_range,
        request.x_axis,
        request.bin,
        cols,
        request.origin.mirrors_columns(),
        limits.minimum_zoom_size,
    );
    let y = map_dimension(
        request.y_range,
        request.y_axis,
        request.bin,
        rows,
        request.origin.mirrors_rows(),
        limits.minimum_zoom_size,
    );

    let x_spread = x.hi - x.lo;
    let y_spread = y.hi - y.lo;
    if !(x_spread > 0.0 && y_spread > 0.0) || !x_spread.is_finite() || !y_spread.is_finite() {
        return None;
    }

    let x_scale = viewport.width() as f64 / x_spread;
    let y_scale = viewport.height() as f64 / y_spread;

    let offset = Vec2::new(x.offset(x_scale) as f32, y.offset(y_scale) as f32);

    let scaled_width = (x.len as f64 * x_scale).round().max(1.0);
    let scaled_height = (y.len as f64 * y_scale).round().max(1.0);

    let max_width = (limits.screen_size.x * limits.screen_guard_factor) as f64;
    let max_height = (limits.screen_size.y * limits.screen_guard_factor) as f64;
    let scaled = scaled_width <= max_width && scaled_height <= max_height;
    let dest_size = if scaled {
        [scaled_width as usize, scaled_height as usize]
    } else {
        log::error!("Image scaling algorithm has malfunctioned and asked for an image bigger than the screen!");
        log::debug!("scaleWidth={scaled_width}");
        log::debug!("scaleHeight={scaled_height}");
        [x.len, y.len]
    };

    Some(Region {
        source: IndexRect {
            row: y.start,
            col: x.start,
            rows: y.len,
            cols: x.len,
        },
        dest_size,
        scale: Vec2::new(x_scale as f32, y_scale as f32),
        offset,
        flip: [
            request.origin.mirrors_columns() != x.reversed,
            request.origin.mirrors_rows() != y.reversed,
        ],
        scaled,
        maximum_zoom: x.collapsed || y.collapsed,
        label_zoom: x.len <= limits.minimum_label_size && y.len <= limits.minimum_label_size,
    })
}

/// Full-resolution array indices covered by the axis ranges, mirrored for the
/// origin. `shape` is `[rows, cols]`.
pub fn visible_index_rect(
    x_range: AxisRange,
    y_range: AxisRange,
    shape: [usize; 2],
    origin: ImageOrigin,
    x_axis: AxisMapping<'_>,
    y_axis: AxisMapping<'_>,
) -> IndexRect {
    let x = map_dimension(x_range, x_axis, 1, shape[1], origin.mirrors_columns(), 1);
    let y = map_dimension(y_range, y_axis, 1, shape[0], origin.mirrors_rows(), 1);
    IndexRect {
        row: y.start,
        col: x.start,
        rows: y.len,
        cols: x.len,
    }
}

/// Visible extent in full-resolution samples, `[x, y]`
pub fn index_span(
    x_range: AxisRange,
    y_range: AxisRange,
    x_axis: AxisMapping<'_>,
    y_axis: AxisMapping<'_>,
) -> [f64; 2] {
    let span = |range: AxisRange, mapping: AxisMapping<'_>| {
        let (lo, hi) = range.normalized();
        (mapping.continuous(hi) - mapping.continuous(lo)).abs()
    };
    [span(x_range, x_axis), span(y_range, y_axis)]
}
