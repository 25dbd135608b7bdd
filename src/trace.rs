//! The image trace: data, colour mapping and the paint pipeline
//!
//! [`ImageTrace`] owns the data, its mip caches and the colour-mapping state.
//! Hosts drive it from the UI thread: setters mark a dirty level, and
//! [`ImageTrace::paint`] resolves that level once, rebuilds the binned
//! coloured image if needed, then slices, flips and scales the visible region.
//! Background producers hand new data over through a [`DataUpdateSender`]; the
//! trace only touches it at the start of the next paint.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;

use egui::{Pos2, Rect, Vec2};
use ndarray::{s, Array2};

use crate::colormap::{BuiltinPalettes, Palette, PaletteService};
use crate::config::TraceConfig;
use crate::dirty::{DirtyLevel, DirtyState};
use crate::error::{Result, TraceError};
use crate::events::{ListenerId, ListenerKind, Listeners, TraceEvent};
use crate::mip::{DownsampleMode, Mips, Rgb};
use crate::render::{
    intensity_ramp, ColorMapping, CutBound, DefaultImageService, ImageService, ImageServiceBean,
    PixelBuffer,
};
use crate::statistics::{CancelToken, HistogramSettings, HistogramType};
use crate::viewport::{
    self, compute_region, downsample_bin, index_span, visible_index_rect, AxisMapping, AxisRange,
    GlobalRange, ImageOrigin, Region, RegionRequest,
};

/// Optional label axes. `x` labels the columns, `y` the rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Axes {
    pub x: Option<Arc<[f64]>>,
    pub y: Option<Arc<[f64]>>,
}

impl Axes {
    pub fn new(x: Option<Vec<f64>>, y: Option<Vec<f64>>) -> Self {
        Self {
            x: x.map(Arc::from),
            y: y.map(Arc::from),
        }
    }

    /// Check label lengths against `[rows, cols]`
    pub fn validate(&self, shape: [usize; 2]) -> Result<()> {
        if let Some(x) = &self.x {
            if x.len() != shape[1] {
                return Err(TraceError::AxisLength {
                    axis: 0,
                    len: x.len(),
                    expected: shape[1],
                });
            }
        }
        if let Some(y) = &self.y {
            if y.len() != shape[0] {
                return Err(TraceError::AxisLength {
                    axis: 1,
                    len: y.len(),
                    expected: shape[0],
                });
            }
        }
        Ok(())
    }
}

/// Data produced off the UI thread
#[derive(Debug)]
pub enum DataUpdate {
    Image { image: Array2<f64>, axes: Axes },
    Rgb { rgb: Array2<Rgb>, axes: Axes },
    Mask(Option<Array2<bool>>),
}

/// Sending half handed to background producers.
#[derive(Clone, Debug)]
pub struct DataUpdateSender(Sender<DataUpdate>);

impl DataUpdateSender {
    /// Queue an update. Returns false once the trace is gone.
    pub fn send(&self, update: DataUpdate) -> bool {
        self.0.send(update).is_ok()
    }
}

/// What the host wants painted this frame
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaintRequest {
    /// Screen rectangle the image is drawn into
    pub viewport: Rect,
    pub x_range: AxisRange,
    pub y_range: AxisRange,
}

/// A painted frame
#[derive(Clone, Debug)]
pub struct ScaledImage {
    pub buffer: PixelBuffer,
    /// Top-left of the viewport
    pub position: Pos2,
    /// Draw the buffer at `position - offset`
    pub offset: Vec2,
    pub bin: u32,
    pub region: Region,
    /// Increases with every new frame
    pub generation: u64,
}

impl ScaledImage {
    /// Where the buffer's top-left corner goes on screen
    pub fn draw_origin(&self) -> Pos2 {
        self.position - self.offset
    }
}

/// The value under a point
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PixelSample {
    pub row: usize,
    pub col: usize,
    pub value: f64,
    pub masked: bool,
}

/// Coloured copy of a binned level
#[derive(Debug)]
struct BinnedImage {
    bin: u32,
    buffer: PixelBuffer,
}

pub struct ImageTrace {
    config: TraceConfig,
    palettes: Box<dyn PaletteService>,
    service: Box<dyn ImageService>,

    image: Option<Arc<Array2<f64>>>,
    rgb: Option<Arc<Array2<Rgb>>>,
    mask: Option<Arc<Array2<bool>>>,
    axes: Axes,
    mips: Option<Mips>,
    data_version: u64,
    full_stats: Option<(u64, Option<(f64, f64)>)>,

    mapping: ColorMapping,
    histogram: HistogramSettings,
    origin: ImageOrigin,
    global_range: Option<GlobalRange>,

    dirty: DirtyState,
    listeners: Listeners,
    updates_tx: Sender<DataUpdate>,
    updates_rx: Receiver<DataUpdate>,
    cancel: CancelToken,
    image_update_active: bool,
    disposed: bool,

    current_bin: u32,
    binned: Option<BinnedImage>,
    ramp: Option<PixelBuffer>,
    frame: Option<ScaledImage>,
    last_request: Option<PaintRequest>,
    generation: u64,
    maximum_zoom: bool,
    label_zoom: bool,
}

impl ImageTrace {
    pub fn new(config: TraceConfig) -> Self {
        Self::with_services(config, Box::new(BuiltinPalettes), Box::new(DefaultImageService))
    }

    pub fn with_services(
        config: TraceConfig,
        palettes: Box<dyn PaletteService>,
        service: Box<dyn ImageService>,
    ) -> Self {
        let palette = palettes.palette(&config.palette).unwrap_or_else(|| {
            log::warn!("Unknown palette {:?}, using the default", config.palette);
            Palette::default()
        });
        let mapping = ColorMapping {
            log_scale: config.log_scale,
            palette,
            min_cut: config.min_cut,
            max_cut: config.max_cut,
            nan_cut: config.nan_cut,
            mask_color: config.mask_color,
            bit_depth: config.bit_depth,
            ..Default::default()
        };
        let histogram = config.histogram_settings();
        let (updates_tx, updates_rx) = mpsc::channel();
        Self {
            config,
            palettes,
            service,
            image: None,
            rgb: None,
            mask: None,
            axes: Axes::default(),
            mips: None,
            data_version: 0,
            full_stats: None,
            mapping,
            histogram,
            origin: ImageOrigin::default(),
            global_range: None,
            dirty: DirtyState::default(),
            listeners: Listeners::default(),
            updates_tx,
            updates_rx,
            cancel: CancelToken::new(),
            image_update_active: true,
            disposed: false,
            current_bin: 1,
            binned: None,
            ramp: None,
            frame: None,
            last_request: None,
            generation: 0,
            maximum_zoom: false,
            label_zoom: false,
        }
    }

    // ---- data ----

    /// Replace the image. The display range is recomputed from the whole
    /// image on first data, or on every update when histogram rescaling is on.
    pub fn set_data(&mut self, image: Array2<f64>, axes: Axes) -> Result<()> {
        self.replace_data(image, None, axes)
    }

    /// Replace the image with colour data. Statistics run on its luminance.
    pub fn set_rgb_data(&mut self, rgb: Array2<Rgb>, axes: Axes) -> Result<()> {
        let luminance = rgb.mapv(|[r, g, b]| 0.299 * r as f64 + 0.587 * g as f64 + 0.114 * b as f64);
        self.replace_data(luminance, Some(rgb), axes)
    }

    fn replace_data(&mut self, image: Array2<f64>, rgb: Option<Array2<Rgb>>, axes: Axes) -> Result<()> {
        let (rows, cols) = image.dim();
        if rows == 0 || cols == 0 {
            return Err(TraceError::empty(rows, cols));
        }
        axes.validate([rows, cols])?;

        let first = self.image.is_none();
        let image = Arc::new(image);
        let mut mips = Mips::new(Arc::clone(&image), self.config.downsample_mode, self.config.cache_budget_bytes);

        if let Some(mask) = self.mask.take() {
            let mask = Arc::new(reconcile_mask(&mask, (rows, cols)));
            mips.set_mask(Some(Arc::clone(&mask)));
            self.mask = Some(mask);
        }
        self.rgb = rgb.map(Arc::new);
        mips.set_rgb(self.rgb.clone());

        self.image = Some(image);
        self.axes = axes;
        self.mips = Some(mips);
        self.binned = None;
        self.data_version += 1;
        self.full_stats = None;

        if first || self.config.rescale_histogram {
            self.autoscale_display_range();
        }
        self.dirty.mark(DirtyLevel::ForceReimage);
        Ok(())
    }

    pub fn set_axes(&mut self, axes: Axes) -> Result<()> {
        if let Some(image) = &self.image {
            axes.validate([image.nrows(), image.ncols()])?;
        }
        self.axes = axes;
        self.dirty.mark(DirtyLevel::ReimageAllowed);
        Ok(())
    }

    pub fn data(&self) -> Option<&Arc<Array2<f64>>> {
        self.image.as_ref()
    }

    pub fn rgb_data(&self) -> Option<&Arc<Array2<Rgb>>> {
        self.rgb.as_ref()
    }

    pub fn axes(&self) -> &Axes {
        &self.axes
    }

    /// Set or clear the mask (`false` hides a sample). A mask whose shape
    /// differs from the image is resized to it.
    pub fn set_mask(&mut self, mask: Option<Array2<bool>>) {
        let mask = match (&self.image, mask) {
            (Some(image), Some(m)) => Some(Arc::new(reconcile_mask(&m, image.dim()))),
            (None, m) => m.map(Arc::new),
            (Some(_), None) => None,
        };
        self.mask = mask;
        self.remask();
    }

    pub fn mask(&self) -> Option<&Arc<Array2<bool>>> {
        self.mask.as_ref()
    }

    /// Rebuild everything derived from the mask
    pub fn remask(&mut self) {
        if let Some(mips) = &mut self.mips {
            mips.set_mask(self.mask.clone());
        }
        self.full_stats = None;
        self.dirty.mark(if self.config.rescale_histogram {
            DirtyLevel::Rehistogram
        } else {
            DirtyLevel::ForceReimage
        });
        self.fire(TraceEvent::MaskChanged);
    }

    /// Display range over the whole image, cached until the data or mask changes
    pub fn full_statistics(&mut self) -> Option<(f64, f64)> {
        if let Some((version, stats)) = self.full_stats {
            if version == self.data_version {
                return stats;
            }
        }
        let image = self.image.clone()?;
        let mask = self.mask.clone();
        let bean = ImageServiceBean {
            image: image.view(),
            rgb: None,
            mask: mask.as_ref().map(|m| m.view()),
            mapping: &self.mapping,
            histogram: self.histogram,
            cancel: Some(&self.cancel),
        };
        let stats = match self.service.fast_statistics(&bean) {
            Ok(stats) => stats,
            Err(e) => {
                log::warn!("Cannot compute image statistics: {e}");
                return None;
            }
        };
        self.full_stats = Some((self.data_version, stats));
        stats
    }

    fn autoscale_display_range(&mut self) {
        match self.full_statistics() {
            Some((min, max)) => {
                self.store_min(min);
                self.store_max(max);
            }
            None => log::debug!("No unmasked samples, keeping display range"),
        }
    }

    // ---- colour mapping ----

    pub fn mapping(&self) -> &ColorMapping {
        &self.mapping
    }

    pub fn min(&self) -> f64 {
        self.mapping.min
    }

    pub fn max(&self) -> f64 {
        self.mapping.max
    }

    fn store_min(&mut self, value: f64) -> bool {
        if self.mapping.min == value {
            return false;
        }
        self.mapping.min = value;
        self.fire(TraceEvent::MinChanged(value));
        true
    }

    fn store_max(&mut self, value: f64) -> bool {
        if self.mapping.max == value {
            return false;
        }
        self.mapping.max = value;
        self.fire(TraceEvent::MaxChanged(value));
        true
    }

    /// Lower end of the display range. Setting the current value does nothing.
    pub fn set_min(&mut self, value: f64) {
        if !value.is_finite() {
            log::warn!("Ignoring non-finite minimum {value}");
            return;
        }
        if self.store_min(value) {
            self.dirty.mark(DirtyLevel::ForceReimage);
        }
    }

    /// Upper end of the display range. Setting the current value does nothing.
    pub fn set_max(&mut self, value: f64) {
        if !value.is_finite() {
            log::warn!("Ignoring non-finite maximum {value}");
            return;
        }
        if self.store_max(value) {
            self.dirty.mark(DirtyLevel::ForceReimage);
        }
    }

    pub fn set_min_cut(&mut self, cut: CutBound) {
        if self.mapping.min_cut == cut {
            return;
        }
        self.mapping.min_cut = cut;
        self.config.min_cut = cut;
        self.dirty.mark(DirtyLevel::ForceReimage);
        self.fire(TraceEvent::MinCutChanged(cut));
    }

    pub fn set_max_cut(&mut self, cut: CutBound) {
        if self.mapping.max_cut == cut {
            return;
        }
        self.mapping.max_cut = cut;
        self.config.max_cut = cut;
        self.dirty.mark(DirtyLevel::ForceReimage);
        self.fire(TraceEvent::MaxCutChanged(cut));
    }

    pub fn set_nan_bound(&mut self, cut: CutBound) {
        if self.mapping.nan_cut == cut {
            return;
        }
        self.mapping.nan_cut = cut;
        self.config.nan_cut = cut;
        self.dirty.mark(DirtyLevel::ForceReimage);
        self.fire(TraceEvent::NanBoundChanged(cut));
    }

    /// Switch to a named palette from the palette service
    pub fn set_palette(&mut self, name: &str) -> Result<()> {
        let palette = self.palettes.require(name)?;
        self.config.palette = name.trim().to_string();
        self.set_palette_data(palette);
        Ok(())
    }

    pub fn set_palette_data(&mut self, palette: Palette) {
        if self.mapping.palette == palette {
            return;
        }
        let name = palette.name().to_string();
        self.mapping.palette = palette;
        self.dirty.mark(DirtyLevel::ForceReimage);
        self.fire(TraceEvent::PaletteChanged { name });
    }

    pub fn palette_names(&self) -> Vec<String> {
        self.palettes.names()
    }

    pub fn set_log_scale(&mut self, log_scale: bool) {
        if self.mapping.log_scale == log_scale {
            return;
        }
        self.mapping.log_scale = log_scale;
        self.config.log_scale = log_scale;
        self.full_stats = None;
        self.dirty.mark(DirtyLevel::Rehistogram);
    }

    pub fn set_alpha(&mut self, alpha: Option<u8>) {
        if self.mapping.alpha == alpha {
            return;
        }
        self.mapping.alpha = alpha;
        self.dirty.mark(DirtyLevel::ForceReimage);
    }

    pub fn histogram_type(&self) -> HistogramType {
        self.histogram.histogram_type
    }

    pub fn set_histogram_type(&mut self, histogram_type: HistogramType) {
        if self.histogram.histogram_type == histogram_type {
            return;
        }
        self.histogram.histogram_type = histogram_type;
        self.config.histogram_type = histogram_type;
        self.full_stats = None;
        self.dirty.mark(DirtyLevel::Rehistogram);
    }

    pub fn set_rescale_histogram(&mut self, rescale: bool) {
        if self.config.rescale_histogram == rescale {
            return;
        }
        self.config.rescale_histogram = rescale;
        self.fire(TraceEvent::RescaleHistogramChanged(rescale));
    }

    /// The legend matching the last painted frame
    pub fn intensity_ramp(&self) -> Option<&PixelBuffer> {
        self.ramp.as_ref()
    }

    // ---- downsampling ----

    pub fn downsample_mode(&self) -> DownsampleMode {
        self.config.downsample_mode
    }

    pub fn set_downsample_mode(&mut self, mode: DownsampleMode) {
        if self.config.downsample_mode == mode {
            return;
        }
        self.config.downsample_mode = mode;
        if let Some(mips) = &mut self.mips {
            mips.set_mode(mode);
        }
        self.binned = None;
        self.dirty.mark(DirtyLevel::ForceReimage);
    }

    /// Bin level of the last paint
    pub fn current_bin(&self) -> u32 {
        self.current_bin
    }

    /// The image at the current bin level
    pub fn downsampled(&mut self) -> Option<Arc<Array2<f64>>> {
        let bin = self.current_bin;
        self.mips.as_mut().map(|m| m.image.get(bin).array)
    }

    /// The mask at the current bin level
    pub fn downsampled_mask(&mut self) -> Option<Arc<Array2<bool>>> {
        let bin = self.current_bin;
        self.mips
            .as_mut()
            .and_then(|m| m.mask.as_mut())
            .map(|m| m.get(bin).array)
    }

    // ---- geometry ----

    pub fn image_origin(&self) -> ImageOrigin {
        self.origin
    }

    pub fn set_image_origin(&mut self, origin: ImageOrigin) {
        if self.origin == origin {
            return;
        }
        self.origin = origin;
        if let Some(mips) = &mut self.mips {
            mips.clear();
        }
        self.binned = None;
        self.dirty.mark(DirtyLevel::ForceReimage);
        self.fire(TraceEvent::ImageOriginChanged(origin));
    }

    pub fn global_range(&self) -> Option<GlobalRange> {
        self.global_range
    }

    pub fn set_global_range(&mut self, range: Option<GlobalRange>) {
        if self.global_range == range {
            return;
        }
        self.global_range = range;
        self.dirty.mark(DirtyLevel::ForceReimage);
    }

    /// Axis ranges showing the whole image
    pub fn autoscale_ranges(&self) -> Option<(AxisRange, AxisRange)> {
        let image = self.image.as_ref()?;
        Some(viewport::autoscale_ranges(
            [image.nrows(), image.ncols()],
            self.axes.x.as_deref(),
            self.axes.y.as_deref(),
            self.global_range.as_ref(),
        ))
    }

    /// Call when the host's axis ranges move
    pub fn axis_range_changed(&mut self) {
        self.dirty.mark(if self.config.rescale_histogram {
            DirtyLevel::Rehistogram
        } else {
            DirtyLevel::ReimageAllowed
        });
    }

    pub fn is_maximum_zoom(&self) -> bool {
        self.maximum_zoom
    }

    pub fn is_label_zoom(&self) -> bool {
        self.label_zoom
    }

    /// Value under a point given in axis coordinates `[x, y]`
    pub fn sample_at(&self, point: [f64; 2]) -> Option<PixelSample> {
        let image = self.image.as_ref()?;
        let (rows, cols) = image.dim();
        let x_axis = AxisMapping::for_dimension(self.axes.x.as_deref(), self.global_range.map(|g| g.x), cols);
        let y_axis = AxisMapping::for_dimension(self.axes.y.as_deref(), self.global_range.map(|g| g.y), rows);
        let (dx, dy) = (x_axis.continuous(point[0]), y_axis.continuous(point[1]));
        if !(dx >= 0.0 && dy >= 0.0) {
            return None;
        }
        let (c, r) = (dx.floor() as usize, dy.floor() as usize);
        if c >= cols || r >= rows {
            return None;
        }
        let col = if self.origin.mirrors_columns() { cols - 1 - c } else { c };
        let row = if self.origin.mirrors_rows() { rows - 1 - r } else { r };
        let masked = self.mask.as_ref().is_some_and(|m| !m[[row, col]]);
        Some(PixelSample {
            row,
            col,
            value: image[[row, col]],
            masked,
        })
    }

    // ---- lifecycle ----

    /// Recompute min/max from the visible data on the next paint
    pub fn rehistogram(&mut self) {
        self.dirty.mark(DirtyLevel::Rehistogram);
    }

    pub fn dirty_level(&self) -> DirtyLevel {
        self.dirty.pending()
    }

    /// Pause or resume painting and listener delivery
    pub fn set_image_update_active(&mut self, active: bool) {
        if self.image_update_active == active {
            return;
        }
        self.image_update_active = active;
        if active {
            self.dirty.mark(DirtyLevel::ForceReimage);
        }
    }

    /// Drop caches while hidden. The next paint rebuilds them.
    pub fn sleep(&mut self) {
        if let Some(mips) = &mut self.mips {
            mips.clear();
        }
        self.binned = None;
        self.frame = None;
        self.dirty.mark(DirtyLevel::ForceReimage);
    }

    /// Release everything. Paint does nothing afterwards.
    pub fn dispose(&mut self) {
        self.cancel.cancel();
        self.listeners.clear();
        self.image = None;
        self.rgb = None;
        self.mask = None;
        self.mips = None;
        self.binned = None;
        self.frame = None;
        self.ramp = None;
        self.disposed = true;
    }

    pub fn config(&self) -> &TraceConfig {
        &self.config
    }

    // ---- listeners ----

    pub fn add_palette_listener(&mut self, callback: impl FnMut(&TraceEvent) + 'static) -> ListenerId {
        self.listeners.add(ListenerKind::Palette, callback)
    }

    pub fn add_downsample_listener(&mut self, callback: impl FnMut(&TraceEvent) + 'static) -> ListenerId {
        self.listeners.add(ListenerKind::Downsample, callback)
    }

    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }

    fn fire(&mut self, event: TraceEvent) {
        if self.image_update_active {
            self.listeners.fire(&event);
        }
    }

    /// Sender for updates produced on other threads
    pub fn update_sender(&self) -> DataUpdateSender {
        DataUpdateSender(self.updates_tx.clone())
    }

    fn drain_updates(&mut self) {
        let mut data = None;
        let mut mask = None;
        while let Ok(update) = self.updates_rx.try_recv() {
            match update {
                DataUpdate::Mask(m) => mask = Some(m),
                other => data = Some(other),
            }
        }
        let applied = match data {
            Some(DataUpdate::Image { image, axes }) => self.set_data(image, axes),
            Some(DataUpdate::Rgb { rgb, axes }) => self.set_rgb_data(rgb, axes),
            _ => Ok(()),
        };
        if let Err(e) = applied {
            log::error!("Dropping data update: {e}");
        }
        if let Some(m) = mask {
            self.set_mask(m);
        }
    }

    // ---- paint ----

    /// Produce the frame for `request`.
    ///
    /// Returns the previous frame when nothing changed, when painting is
    /// paused, or when this paint fails; failures are logged.
    pub fn paint(&mut self, request: &PaintRequest) -> Option<&ScaledImage> {
        if self.disposed {
            return None;
        }
        self.drain_updates();
        if !self.image_update_active {
            return self.frame.as_ref();
        }

        let mut level = self.dirty.take();
        if self.last_request.as_ref() != Some(request) {
            level = level.max(DirtyLevel::ReimageAllowed);
        } else if level == DirtyLevel::NoReimage && self.frame.is_some() {
            return self.frame.as_ref();
        }

        match self.create_scaled_image(request, level) {
            Ok(Some(frame)) => {
                self.frame = Some(frame);
                self.last_request = Some(*request);
            }
            Ok(None) => log::trace!("Nothing to paint"),
            Err(e) => log::error!("Cannot create scaled image: {e}"),
        }
        self.frame.as_ref()
    }

    fn create_scaled_image(&mut self, request: &PaintRequest, level: DirtyLevel) -> Result<Option<ScaledImage>> {
        let Some(image) = self.image.clone() else {
            return Ok(None);
        };
        let (rows, cols) = image.dim();
        let axes = self.axes.clone();
        let x_axis = AxisMapping::for_dimension(axes.x.as_deref(), self.global_range.map(|g| g.x), cols);
        let y_axis = AxisMapping::for_dimension(axes.y.as_deref(), self.global_range.map(|g| g.y), rows);

        let span = index_span(request.x_range, request.y_range, x_axis, y_axis);
        let bin = downsample_bin(request.viewport.size(), span, [rows, cols]);
        if bin != self.current_bin {
            log::debug!("Downsample bin {} -> {}", self.current_bin, bin);
            self.current_bin = bin;
            self.fire(TraceEvent::DownsampleChanged { bin });
        }

        if level == DirtyLevel::Rehistogram {
            self.rehistogram_visible(request, x_axis, y_axis);
        }

        let bin_changed = self.binned.as_ref().map_or(true, |b| b.bin != bin);
        let rebuild = self.binned.is_none()
            || level >= DirtyLevel::ForceReimage
            || (level == DirtyLevel::ReimageAllowed && bin_changed);
        if rebuild {
            self.rebuild_binned(bin)?;
        }
        let Some(binned) = &self.binned else {
            return Ok(None);
        };

        let region_request = RegionRequest {
            viewport: request.viewport,
            x_range: request.x_range,
            y_range: request.y_range,
            bin: binned.bin,
            binned_shape: [binned.buffer.height(), binned.buffer.width()],
            origin: self.origin,
            x_axis,
            y_axis,
            limits: self.config.mapper_limits(),
        };
        let Some(region) = compute_region(&region_request) else {
            return Ok(None);
        };

        let slice = binned
            .buffer
            .slice(region.source)?
            .flipped(region.flip[0], region.flip[1]);
        let buffer = if region.scaled {
            slice.scaled_to(region.dest_size)
        } else {
            slice
        };
        let bin = binned.bin;

        self.maximum_zoom = region.maximum_zoom;
        self.label_zoom = region.label_zoom;
        self.generation += 1;
        Ok(Some(ScaledImage {
            buffer,
            position: request.viewport.min,
            offset: region.offset,
            bin,
            region,
            generation: self.generation,
        }))
    }

    fn rebuild_binned(&mut self, bin: u32) -> Result<()> {
        let Some(mips) = &mut self.mips else {
            return Ok(());
        };
        let level = mips.image.get(bin);
        let mask = mips.mask.as_mut().map(|m| m.get(level.bin).array);
        let rgb = mips.rgb.as_mut().map(|c| c.get(level.bin).array);

        let mask = mask.filter(|m| {
            let fits = m.dim() == level.array.dim();
            if !fits {
                log::warn!("Binned mask {:?} does not fit image {:?}", m.dim(), level.array.dim());
            }
            fits
        });

        let bean = ImageServiceBean {
            image: level.array.view(),
            rgb: rgb.as_ref().map(|c| c.view()),
            mask: mask.as_ref().map(|m| m.view()),
            mapping: &self.mapping,
            histogram: self.histogram,
            cancel: None,
        };
        let buffer = self.service.image_data(&bean)?;
        log::trace!("Coloured bin {} ({}x{})", level.bin, buffer.width(), buffer.height());
        self.binned = Some(BinnedImage {
            bin: level.bin,
            buffer,
        });

        self.ramp = match intensity_ramp(&self.mapping) {
            Ok(ramp) => Some(ramp),
            Err(e) => {
                log::warn!("Cannot build intensity ramp: {e}");
                None
            }
        };
        Ok(())
    }

    /// Set min/max from the full-resolution samples in view. A view with no
    /// unmasked samples keeps the current range.
    fn rehistogram_visible(&mut self, request: &PaintRequest, x_axis: AxisMapping<'_>, y_axis: AxisMapping<'_>) {
        let Some(image) = self.image.clone() else {
            return;
        };
        let mask = self.mask.clone();
        let rect = visible_index_rect(
            request.x_range,
            request.y_range,
            [image.nrows(), image.ncols()],
            self.origin,
            x_axis,
            y_axis,
        );
        if rect.is_empty() {
            return;
        }
        let rows = rect.row..rect.row + rect.rows;
        let cols = rect.col..rect.col + rect.cols;
        let view = image.slice(s![rows.clone(), cols.clone()]);
        let mask_view = mask.as_ref().map(|m| m.slice(s![rows, cols]));
        let bean = ImageServiceBean {
            image: view,
            rgb: None,
            mask: mask_view,
            mapping: &self.mapping,
            histogram: self.histogram,
            cancel: Some(&self.cancel),
        };
        match self.service.fast_statistics(&bean) {
            Ok(Some((min, max))) => {
                log::debug!("Rehistogram {min}..{max} over {rect:?}");
                self.store_min(min);
                self.store_max(max);
            }
            Ok(None) => log::debug!("No unmasked samples in view, keeping display range"),
            Err(e) => log::warn!("Rehistogram failed: {e}"),
        }
    }
}

impl std::fmt::Debug for ImageTrace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageTrace")
            .field("shape", &self.image.as_ref().map(|i| i.dim()))
            .field("current_bin", &self.current_bin)
            .field("origin", &self.origin)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

/// Resize `mask` to `shape`: overlapping entries are kept, the rest are valid
fn reconcile_mask(mask: &Array2<bool>, shape: (usize, usize)) -> Array2<bool> {
    if mask.dim() == shape {
        return mask.clone();
    }
    log::warn!("Mask shape {:?} does not match image {:?}, resizing", mask.dim(), shape);
    let mut out = Array2::from_elem(shape, true);
    let rows = mask.nrows().min(shape.0);
    let cols = mask.ncols().min(shape.1);
    out.slice_mut(s![..rows, ..cols])
        .assign(&mask.slice(s![..rows, ..cols]));
    out
}
