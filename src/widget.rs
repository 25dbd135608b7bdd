//! TraceWidget - an egui widget that drives an [`ImageTrace`]
//!
//! The widget owns the trace and the visible axis ranges. Interaction edits
//! the ranges, every frame asks the trace for a [`ScaledImage`](crate::trace::ScaledImage) covering the
//! widget, and the texture is re-uploaded only when the trace produced a new
//! generation. Overlays show the intensity legend, palette and downsampling
//! controls, and the value under the pointer.

use egui::{Color32, Key, PointerButton, Pos2, Rect, Response, TextureHandle, TextureOptions, Ui, Vec2};
use ndarray::Array2;

use crate::config::TraceConfig;
use crate::error::Result;
use crate::mip::DownsampleMode;
use crate::statistics::HistogramType;
use crate::trace::{Axes, ImageTrace, PaintRequest, PixelSample};
use crate::transform::{self, AxisView};
use crate::viewport::AxisRange;

/// Color bar width in pixels
const COLORBAR_WIDTH: f32 = 24.0;
/// Maximum color bar height in pixels
const COLORBAR_MAX_HEIGHT: f32 = 300.0;
/// Color bar margin from edge
const COLORBAR_MARGIN: f32 = 10.0;
/// Duration to show the zoom overlay after zooming
const ZOOM_OVERLAY_DURATION: f64 = 0.5;

/// Actions returned from zoom controls overlay
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ZoomAction {
    None,
    ZoomIn,
    ZoomOut,
    Reset,
}

/// Actions returned from the mapping controls overlay
#[derive(Clone, Debug, PartialEq)]
enum MappingAction {
    None,
    SetPalette(String),
    SetLogScale(bool),
    SetDownsampleMode(DownsampleMode),
    SetHistogramType(HistogramType),
    Rehistogram,
}

/// A self-contained widget for one image trace.
///
/// Multiple instances can coexist without sharing state.
pub struct TraceWidget {
    trace: ImageTrace,
    view: AxisView,

    // === Rendering state ===
    /// Texture of the last painted frame
    texture: Option<TextureHandle>,
    /// Generation the texture was uploaded from
    texture_generation: Option<u64>,
    colorbar_texture: Option<TextureHandle>,
    hover: Option<PixelSample>,
    /// Track when zoom was last changed (for overlay display)
    zoom_changed_time: Option<f64>,
    prev_zoom_level: f64,
    /// Set whenever ranges, data or mapping changed since the last call to
    /// [`TraceWidget::take_state_changed`]
    state_changed: bool,
}

impl Default for TraceWidget {
    fn default() -> Self {
        Self::new(TraceConfig::default())
    }
}

impl TraceWidget {
    pub fn new(config: TraceConfig) -> Self {
        Self::with_trace(ImageTrace::new(config))
    }

    /// Wrap an existing trace, e.g. one built with custom services
    pub fn with_trace(trace: ImageTrace) -> Self {
        let mut widget = Self {
            trace,
            view: AxisView::default(),
            texture: None,
            texture_generation: None,
            colorbar_texture: None,
            hover: None,
            zoom_changed_time: None,
            prev_zoom_level: 1.0,
            state_changed: false,
        };
        widget.sync_view();
        widget
    }

    // =========================================================================
    // Public API (called from outside, e.g., from JS via TraceHandle)
    // =========================================================================

    pub fn trace(&self) -> &ImageTrace {
        &self.trace
    }

    pub fn trace_mut(&mut self) -> &mut ImageTrace {
        self.state_changed = true;
        &mut self.trace
    }

    pub fn view(&self) -> &AxisView {
        &self.view
    }

    /// Replace the image. The view is reset only if the full extent moved.
    pub fn set_data(&mut self, image: Array2<f64>, axes: Axes) -> Result<()> {
        self.trace.set_data(image, axes)?;
        self.sync_view();
        self.state_changed = true;
        Ok(())
    }

    /// Replace the axis labels, refitting the view to the new extent
    pub fn set_axes(&mut self, axes: Axes) -> Result<()> {
        self.trace.set_axes(axes)?;
        self.sync_view();
        self.state_changed = true;
        Ok(())
    }

    pub fn set_mask(&mut self, mask: Option<Array2<bool>>) {
        self.trace.set_mask(mask);
        self.state_changed = true;
    }

    pub fn has_image(&self) -> bool {
        self.trace.data().is_some()
    }

    /// Zoom in by one step. Refused once the trace reports maximum zoom.
    pub fn zoom_in(&mut self, center: Option<Pos2>, viewport: Rect) {
        if self.trace.is_maximum_zoom() {
            log::debug!("Maximum zoom reached");
            return;
        }
        if self.view.zoom_in(center, viewport) {
            self.ranges_changed();
        }
    }

    pub fn zoom_out(&mut self, center: Option<Pos2>, viewport: Rect) {
        if self.view.zoom_out(center, viewport) {
            self.ranges_changed();
        }
    }

    /// Show the full extent
    pub fn zoom_to_fit(&mut self) {
        if !self.view.is_default() {
            self.view.reset();
            self.ranges_changed();
        }
    }

    /// Show exactly these axis ranges
    pub fn set_ranges(&mut self, x: AxisRange, y: AxisRange) {
        if self.view.x != x || self.view.y != y {
            self.view.x = x;
            self.view.y = y;
            self.ranges_changed();
        }
    }

    pub fn zoom_level(&self) -> f64 {
        self.view.zoom()
    }

    pub fn hover(&self) -> Option<PixelSample> {
        self.hover
    }

    /// True once after anything a host may mirror has changed
    pub fn take_state_changed(&mut self) -> bool {
        std::mem::take(&mut self.state_changed)
    }

    // =========================================================================
    // Internal helpers
    // =========================================================================

    fn ranges_changed(&mut self) {
        self.trace.axis_range_changed();
        self.state_changed = true;
    }

    /// Follow the trace's full extent, resetting the view when it moves
    fn sync_view(&mut self) {
        if let Some((x, y)) = self.trace.autoscale_ranges() {
            if self.view.set_full(x, y) {
                self.ranges_changed();
            }
        }
    }

    fn apply_mapping_action(&mut self, action: MappingAction) {
        match action {
            MappingAction::None => return,
            MappingAction::SetPalette(name) => {
                if let Err(e) = self.trace.set_palette(&name) {
                    log::warn!("{e}");
                }
            }
            MappingAction::SetLogScale(on) => self.trace.set_log_scale(on),
            MappingAction::SetDownsampleMode(mode) => self.trace.set_downsample_mode(mode),
            MappingAction::SetHistogramType(kind) => self.trace.set_histogram_type(kind),
            MappingAction::Rehistogram => self.trace.rehistogram(),
        }
        self.state_changed = true;
    }

    // =========================================================================
    // Main rendering
    // =========================================================================

    /// Show the widget, rendering into the given UI with a specified container size.
    pub fn show(&mut self, ui: &mut Ui, container_size: Vec2) -> Response {
        let ctx = ui.ctx().clone();
        let (rect, response) = ui.allocate_exact_size(container_size, egui::Sense::click_and_drag());

        self.handle_keyboard_input(&ctx, rect);
        self.handle_pointer_input(ui, &response, rect);

        let request = PaintRequest {
            viewport: rect,
            x_range: self.view.x,
            y_range: self.view.y,
        };
        let painted = match self.trace.paint(&request) {
            Some(frame) => {
                if self.texture_generation != Some(frame.generation) {
                    self.texture = Some(ctx.load_texture(
                        "trace",
                        frame.buffer.to_color_image(),
                        TextureOptions::NEAREST,
                    ));
                    self.texture_generation = Some(frame.generation);
                    self.colorbar_texture = None;
                }
                let size = Vec2::new(frame.buffer.width() as f32, frame.buffer.height() as f32);
                Some(Rect::from_min_size(frame.draw_origin(), size))
            }
            None => None,
        };
        // Updates sent from other threads are applied inside paint
        self.sync_view();

        let painter = ui.painter_at(rect);
        match (painted, &self.texture) {
            (Some(image_rect), Some(texture)) => {
                painter.image(
                    texture.id(),
                    image_rect,
                    Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                    Color32::WHITE,
                );
            }
            _ => {
                painter.text(
                    rect.center(),
                    egui::Align2::CENTER_CENTER,
                    "No image loaded",
                    egui::FontId::default(),
                    ui.style().visuals.text_color(),
                );
                return response;
            }
        }

        if self.colorbar_texture.is_none() {
            if let Some(ramp) = self.trace.intensity_ramp() {
                self.colorbar_texture = Some(ctx.load_texture(
                    "trace_colorbar",
                    ramp.to_color_image(),
                    TextureOptions::LINEAR,
                ));
            }
        }

        let current_zoom = self.zoom_level();
        let current_time = ctx.input(|i| i.time);
        if (current_zoom - self.prev_zoom_level).abs() > 0.001 {
            self.zoom_changed_time = Some(current_time);
            self.prev_zoom_level = current_zoom;
        }

        // Overlays collect actions which are applied after rendering
        let zoom_action = self.render_zoom_controls(&ctx, rect);
        let mapping_action = self.render_mapping_controls(&ctx);
        self.render_colorbar(&ctx, rect);
        self.render_zoom_info_overlay(&ctx, rect, current_time);
        self.render_hover_overlay(&ctx, rect);

        match zoom_action {
            ZoomAction::None => {}
            ZoomAction::ZoomIn => self.zoom_in(None, rect),
            ZoomAction::ZoomOut => self.zoom_out(None, rect),
            ZoomAction::Reset => self.zoom_to_fit(),
        }
        self.apply_mapping_action(mapping_action);

        response
    }

    fn handle_pointer_input(&mut self, ui: &Ui, response: &Response, rect: Rect) {
        let pointer = ui.input(|i| i.pointer.latest_pos()).filter(|p| rect.contains(*p));

        // Native zoom gesture, then plain scroll wheel
        let zoom_delta = ui.input(|i| i.zoom_delta());
        let scroll_delta = ui.input(|i| i.raw_scroll_delta);
        if let Some(pos) = pointer {
            let factor = if zoom_delta != 1.0 {
                zoom_delta
            } else if scroll_delta.y > 0.0 {
                transform::SCROLL_ZOOM_STEP
            } else if scroll_delta.y < 0.0 {
                1.0 / transform::SCROLL_ZOOM_STEP
            } else {
                1.0
            };
            let refused = factor > 1.0 && self.trace.is_maximum_zoom();
            if !refused && self.view.zoom_around_point(factor, pos, rect) {
                self.ranges_changed();
            }
        }

        if response.dragged_by(PointerButton::Primary) || response.dragged_by(PointerButton::Middle) {
            if self.view.pan_by(response.drag_delta(), rect) {
                self.ranges_changed();
            }
        }

        // Secondary click recomputes the display range from the visible data
        if response.clicked_by(PointerButton::Secondary) {
            self.trace.rehistogram();
            self.state_changed = true;
        }

        self.hover = response
            .hover_pos()
            .and_then(|pos| self.trace.sample_at(self.view.screen_to_axis(pos, rect)));
    }

    /// Handle keyboard shortcuts for zoom
    fn handle_keyboard_input(&mut self, ctx: &egui::Context, rect: Rect) {
        let (zoom_in, zoom_out, reset) = ctx.input(|i| {
            (
                i.key_pressed(Key::Equals) || i.key_pressed(Key::Plus),
                i.key_pressed(Key::Minus),
                i.key_pressed(Key::Num0),
            )
        });
        if zoom_in {
            self.zoom_in(None, rect);
        }
        if zoom_out {
            self.zoom_out(None, rect);
        }
        if reset {
            self.zoom_to_fit();
        }
    }

    /// Render zoom control buttons at bottom-right of widget.
    fn render_zoom_controls(&self, ctx: &egui::Context, widget_rect: Rect) -> ZoomAction {
        let button_size = egui::vec2(28.0, 28.0);
        let margin = 10.0;
        let spacing = 4.0;

        let num_buttons = 3.0;
        let base_x = widget_rect.max.x - margin - button_size.x * num_buttons - spacing * (num_buttons - 1.0);
        let base_y = widget_rect.max.y - margin - button_size.y;

        let mut action = ZoomAction::None;

        egui::Area::new(egui::Id::new("trace_zoom_controls"))
            .fixed_pos(egui::pos2(base_x, base_y))
            .show(ctx, |ui| {
                let text_color = get_overlay_text_color(ui);
                overlay_frame(ui).show(ui, |ui| {
                    ui.horizontal(|ui| {
                        ui.spacing_mut().item_spacing.x = spacing;

                        let can_reset = !self.view.is_default();
                        let reset_color = if can_reset { text_color } else { text_color.gamma_multiply(0.3) };
                        let reset_btn = egui::Button::new(egui::RichText::new("⟲").color(reset_color))
                            .fill(Color32::TRANSPARENT);
                        if ui.add_sized(button_size, reset_btn).clicked() && can_reset {
                            action = ZoomAction::Reset;
                        }

                        let minus_btn = egui::Button::new(egui::RichText::new("−").color(text_color))
                            .fill(Color32::TRANSPARENT);
                        if ui.add_sized(button_size, minus_btn).clicked() {
                            action = ZoomAction::ZoomOut;
                        }

                        let can_zoom_in = !self.trace.is_maximum_zoom();
                        let plus_color = if can_zoom_in { text_color } else { text_color.gamma_multiply(0.3) };
                        let plus_btn = egui::Button::new(egui::RichText::new("+").color(plus_color))
                            .fill(Color32::TRANSPARENT);
                        if ui.add_sized(button_size, plus_btn).clicked() && can_zoom_in {
                            action = ZoomAction::ZoomIn;
                        }
                    });
                });
            });

        action
    }

    /// Palette, scale and downsampling controls at the top-right
    fn render_mapping_controls(&self, ctx: &egui::Context) -> MappingAction {
        let margin = 10.0;
        let mut action = MappingAction::None;

        egui::Area::new(egui::Id::new("trace_mapping_controls"))
            .anchor(egui::Align2::RIGHT_TOP, egui::vec2(-margin, margin))
            .show(ctx, |ui| {
                let text_color = get_overlay_text_color(ui);
                let current_palette = self.trace.mapping().palette.name().to_string();
                let log_scale = self.trace.mapping().log_scale;
                let mode = self.trace.downsample_mode();
                let histogram = self.trace.histogram_type();

                ui.horizontal(|ui| {
                    ui.spacing_mut().item_spacing.x = 4.0;

                    overlay_frame(ui).show(ui, |ui| {
                        egui::ComboBox::from_id_salt("trace_palette")
                            .selected_text(egui::RichText::new(&current_palette).color(text_color))
                            .show_ui(ui, |ui| {
                                for name in self.trace.palette_names() {
                                    if ui.selectable_label(name == current_palette, &name).clicked() {
                                        action = MappingAction::SetPalette(name);
                                    }
                                }
                            });
                    });

                    overlay_frame(ui).show(ui, |ui| {
                        ui.horizontal(|ui| {
                            let lin = egui::RichText::new("Lin").color(text_color);
                            if ui.selectable_label(!log_scale, lin).clicked() && log_scale {
                                action = MappingAction::SetLogScale(false);
                            }
                            let log = egui::RichText::new("Log").color(text_color);
                            if ui.selectable_label(log_scale, log).clicked() && !log_scale {
                                action = MappingAction::SetLogScale(true);
                            }
                        });
                    });

                    overlay_frame(ui).show(ui, |ui| {
                        egui::ComboBox::from_id_salt("trace_downsample")
                            .selected_text(egui::RichText::new(mode.label()).color(text_color))
                            .show_ui(ui, |ui| {
                                for &m in DownsampleMode::all() {
                                    if ui.selectable_label(m == mode, m.label()).clicked() {
                                        action = MappingAction::SetDownsampleMode(m);
                                    }
                                }
                            });
                    });

                    overlay_frame(ui).show(ui, |ui| {
                        ui.horizontal(|ui| {
                            egui::ComboBox::from_id_salt("trace_histogram")
                                .selected_text(egui::RichText::new(histogram.label()).color(text_color))
                                .show_ui(ui, |ui| {
                                    for &h in HistogramType::all() {
                                        if ui.selectable_label(h == histogram, h.label()).clicked() {
                                            action = MappingAction::SetHistogramType(h);
                                        }
                                    }
                                });
                            let btn = egui::Button::new(egui::RichText::new("⟲").color(text_color))
                                .fill(Color32::TRANSPARENT);
                            if ui.add(btn).on_hover_text("Rescale to visible data").clicked() {
                                action = MappingAction::Rehistogram;
                            }
                        });
                    });
                });
            });

        action
    }

    /// Intensity legend with the display range at the top-left
    fn render_colorbar(&self, ctx: &egui::Context, widget_rect: Rect) {
        let Some(texture) = &self.colorbar_texture else {
            return;
        };
        let (min, max) = (self.trace.min(), self.trace.max());
        let bar_height = COLORBAR_MAX_HEIGHT.min(widget_rect.height() * 0.5);

        egui::Area::new(egui::Id::new("trace_colorbar"))
            .fixed_pos(egui::pos2(
                widget_rect.min.x + COLORBAR_MARGIN,
                widget_rect.min.y + COLORBAR_MARGIN,
            ))
            .show(ctx, |ui| {
                let bg = get_overlay_bg(ui);
                let text_color = get_overlay_text_color(ui);
                egui::Frame::popup(ui.style()).fill(bg).show(ui, |ui| {
                    ui.vertical(|ui| {
                        ui.label(egui::RichText::new(format_scientific(max)).color(text_color).small());

                        let (bar_rect, _) =
                            ui.allocate_exact_size(egui::vec2(COLORBAR_WIDTH, bar_height), egui::Sense::hover());
                        let painter = ui.painter();
                        painter.rect_filled(bar_rect.expand(1.0), 0.0, Color32::GRAY);
                        painter.image(
                            texture.id(),
                            bar_rect,
                            Rect::from_min_max(egui::pos2(0.0, 0.0), egui::pos2(1.0, 1.0)),
                            Color32::WHITE,
                        );

                        ui.label(egui::RichText::new(format_scientific(min)).color(text_color).small());
                    });
                });
            });
    }

    /// Zoom factor and bin level shortly after a zoom
    fn render_zoom_info_overlay(&self, ctx: &egui::Context, widget_rect: Rect, current_time: f64) {
        let should_show = self
            .zoom_changed_time
            .is_some_and(|t| (current_time - t) < ZOOM_OVERLAY_DURATION);
        if !should_show {
            return;
        }

        let text = format!(
            "{}  bin {}",
            format_zoom_multiple(self.zoom_level()),
            self.trace.current_bin()
        );

        egui::Area::new(egui::Id::new("trace_zoom_info"))
            .fixed_pos(egui::pos2(widget_rect.center().x - 60.0, widget_rect.center().y - 20.0))
            .show(ctx, |ui| {
                let text_color = get_overlay_text_color(ui);
                let bg = get_overlay_bg(ui);
                egui::Frame::popup(ui.style()).fill(bg).show(ui, |ui| {
                    ui.style_mut().wrap_mode = Some(egui::TextWrapMode::Extend);
                    ui.label(egui::RichText::new(text).color(text_color).size(24.0));
                });
            });
    }

    /// Render hover info overlay at bottom-left of widget
    fn render_hover_overlay(&self, ctx: &egui::Context, widget_rect: Rect) {
        let Some(sample) = self.hover else {
            return;
        };

        egui::Area::new(egui::Id::new("trace_hover"))
            .fixed_pos(egui::pos2(widget_rect.min.x + 10.0, widget_rect.max.y - 30.0))
            .show(ctx, |ui| {
                egui::Frame::popup(ui.style()).show(ui, |ui| {
                    ui.style_mut().wrap_mode = Some(egui::TextWrapMode::Extend);
                    ui.label(format_sample(&sample));
                });
            });
    }
}

/// Hover readout for one sample
fn format_sample(sample: &PixelSample) -> String {
    let value = if sample.masked {
        "masked".to_string()
    } else {
        format!("{:.6}", sample.value)
    };
    format!("Pixel ({}, {}): {}", sample.col, sample.row, value)
}

/// Format a float in scientific notation for compact display
fn format_scientific(v: f64) -> String {
    if v == 0.0 {
        "0".to_string()
    } else if v.abs() >= 1e4 || v.abs() < 1e-2 {
        format!("{:.2e}", v)
    } else {
        format!("{:.2}", v)
    }
}

/// Get a translucent background color appropriate for light/dark mode
fn get_overlay_bg(ui: &Ui) -> Color32 {
    if ui.visuals().dark_mode {
        Color32::from_black_alpha(180)
    } else {
        Color32::from_white_alpha(220)
    }
}

/// Get text color appropriate for light/dark mode overlays
fn get_overlay_text_color(ui: &Ui) -> Color32 {
    if ui.visuals().dark_mode {
        Color32::WHITE
    } else {
        Color32::from_gray(30)
    }
}

/// Frame for overlay controls that adapts to light/dark mode
fn overlay_frame(ui: &Ui) -> egui::Frame {
    egui::Frame::popup(ui.style()).fill(get_overlay_bg(ui))
}

fn format_zoom_multiple(zoom: f64) -> String {
    format!("{:.3}x", zoom)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport() -> Rect {
        Rect::from_min_size(Pos2::ZERO, Vec2::new(256.0, 256.0))
    }

    #[test]
    fn test_set_data_fits_view() {
        let mut widget = TraceWidget::default();
        assert!(!widget.has_image());
        widget
            .set_data(Array2::from_elem((100, 200), 1.0), Axes::default())
            .unwrap();
        assert!(widget.has_image());
        assert_eq!(widget.view().x, AxisRange::new(0.0, 200.0));
        assert_eq!(widget.view().y, AxisRange::new(0.0, 100.0));
        assert!(widget.take_state_changed());
        assert!(!widget.take_state_changed());
    }

    #[test]
    fn test_same_shape_keeps_zoom() {
        let mut widget = TraceWidget::default();
        widget.set_data(Array2::zeros((64, 64)), Axes::default()).unwrap();
        widget.zoom_in(None, viewport());
        let zoomed = widget.view().clone();
        widget.set_data(Array2::ones((64, 64)), Axes::default()).unwrap();
        assert_eq!(widget.view(), &zoomed);

        widget.set_data(Array2::ones((32, 64)), Axes::default()).unwrap();
        assert!(widget.view().is_default());
    }

    #[test]
    fn test_zoom_marks_trace_dirty() {
        use crate::dirty::DirtyLevel;

        let mut widget = TraceWidget::default();
        widget.set_data(Array2::zeros((64, 64)), Axes::default()).unwrap();
        widget.zoom_in(None, viewport());
        assert!(widget.trace().dirty_level() >= DirtyLevel::ReimageAllowed);
        assert!(widget.zoom_level() > 1.0);
        widget.zoom_to_fit();
        assert!((widget.zoom_level() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_format_sample() {
        let sample = PixelSample {
            row: 3,
            col: 7,
            value: 1.5,
            masked: false,
        };
        assert_eq!(format_sample(&sample), "Pixel (7, 3): 1.500000");
        let masked = PixelSample { masked: true, ..sample };
        assert_eq!(format_sample(&masked), "Pixel (7, 3): masked");
    }

    #[test]
    fn test_format_scientific() {
        assert_eq!(format_scientific(0.0), "0");
        assert_eq!(format_scientific(12.5), "12.50");
        assert_eq!(format_scientific(123456.0), "1.23e5");
    }
}
