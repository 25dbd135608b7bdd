//! Pan and zoom expressed as axis ranges
//!
//! The trace is driven by the visible axis ranges, so interaction edits those
//! directly instead of an image rectangle. Pure logic, unit tested without a
//! window.

use egui::{Pos2, Rect, Vec2};

use crate::viewport::AxisRange;

/// Zoom step multiplier for zoom in/out operations (buttons/keyboard)
pub const ZOOM_STEP: f32 = 1.25;

/// Zoom step multiplier for scroll wheel (smaller for finer control)
pub const SCROLL_ZOOM_STEP: f32 = 1.08;

/// Minimum zoom level (10% of the full extent)
pub const MIN_ZOOM: f64 = 0.1;

/// Maximum zoom level, relative to the full extent
pub const MAX_ZOOM: f64 = 10_000.0;

/// Visible axis ranges plus the full extent they reset to
#[derive(Clone, Debug, PartialEq)]
pub struct AxisView {
    pub x: AxisRange,
    pub y: AxisRange,
    full_x: AxisRange,
    full_y: AxisRange,
}

impl Default for AxisView {
    fn default() -> Self {
        Self::new(AxisRange::new(0.0, 1.0), AxisRange::new(0.0, 1.0))
    }
}

impl AxisView {
    /// Start showing the full extent
    pub fn new(full_x: AxisRange, full_y: AxisRange) -> Self {
        Self {
            x: full_x,
            y: full_y,
            full_x,
            full_y,
        }
    }

    /// Change the full extent, e.g. after new data. Returns true if it moved.
    pub fn set_full(&mut self, full_x: AxisRange, full_y: AxisRange) -> bool {
        if self.full_x == full_x && self.full_y == full_y {
            return false;
        }
        self.full_x = full_x;
        self.full_y = full_y;
        self.reset();
        true
    }

    /// Back to the full extent
    pub fn reset(&mut self) {
        self.x = self.full_x;
        self.y = self.full_y;
    }

    /// Check if the view shows the full extent (for showing/hiding the reset button)
    pub fn is_default(&self) -> bool {
        let close = |a: AxisRange, b: AxisRange| {
            let tol = b.span().max(f64::MIN_POSITIVE) * 1e-6;
            (a.lower - b.lower).abs() < tol && (a.upper - b.upper).abs() < tol
        };
        close(self.x, self.full_x) && close(self.y, self.full_y)
    }

    /// Full span over visible span along x: 1.0 shows everything
    pub fn zoom(&self) -> f64 {
        let span = self.x.span();
        if span > 0.0 {
            self.full_x.span() / span
        } else {
            MAX_ZOOM
        }
    }

    /// Zoom in by one step, centered on the given screen position
    pub fn zoom_in(&mut self, center: Option<Pos2>, viewport: Rect) -> bool {
        let center = center.unwrap_or(viewport.center());
        self.zoom_around_point(ZOOM_STEP, center, viewport)
    }

    /// Zoom out by one step, centered on the given screen position
    pub fn zoom_out(&mut self, center: Option<Pos2>, viewport: Rect) -> bool {
        let center = center.unwrap_or(viewport.center());
        self.zoom_around_point(1.0 / ZOOM_STEP, center, viewport)
    }

    /// Zoom by `zoom_delta` keeping the axis point under `screen_pos` fixed.
    /// Returns false when clamping leaves the zoom unchanged.
    pub fn zoom_around_point(&mut self, zoom_delta: f32, screen_pos: Pos2, viewport: Rect) -> bool {
        if zoom_delta == 1.0 || viewport.width() <= 0.0 || viewport.height() <= 0.0 {
            return false;
        }

        let old_zoom = self.zoom();
        let new_zoom = (old_zoom * zoom_delta as f64).clamp(MIN_ZOOM, MAX_ZOOM);
        if (new_zoom - old_zoom).abs() < old_zoom * 1e-6 {
            return false; // No change after clamping
        }

        let ratio = old_zoom / new_zoom;
        let [ax, ay] = self.screen_to_axis(screen_pos, viewport);
        let scale = |r: AxisRange, a: f64| AxisRange::new(a - (a - r.lower) * ratio, a + (r.upper - a) * ratio);
        self.x = scale(self.x, ax);
        self.y = scale(self.y, ay);
        true
    }

    /// Apply a pan delta (in screen pixels); content follows the pointer
    pub fn pan_by(&mut self, delta: Vec2, viewport: Rect) -> bool {
        if delta == Vec2::ZERO || viewport.width() <= 0.0 || viewport.height() <= 0.0 {
            return false;
        }
        let shift = |r: AxisRange, d: f32, extent: f32| {
            let s = -(d as f64) / extent as f64 * (r.upper - r.lower);
            AxisRange::new(r.lower + s, r.upper + s)
        };
        self.x = shift(self.x, delta.x, viewport.width());
        self.y = shift(self.y, delta.y, viewport.height());
        true
    }

    /// Axis coordinates `[x, y]` under a screen position
    pub fn screen_to_axis(&self, pos: Pos2, viewport: Rect) -> [f64; 2] {
        let fx = ((pos.x - viewport.min.x) / viewport.width()) as f64;
        let fy = ((pos.y - viewport.min.y) / viewport.height()) as f64;
        [
            self.x.lower + fx * (self.x.upper - self.x.lower),
            self.y.lower + fy * (self.y.upper - self.y.lower),
        ]
    }

    /// Screen position of axis coordinates `[x, y]`
    pub fn axis_to_screen(&self, point: [f64; 2], viewport: Rect) -> Pos2 {
        let fx = (point[0] - self.x.lower) / (self.x.upper - self.x.lower);
        let fy = (point[1] - self.y.lower) / (self.y.upper - self.y.lower);
        Pos2::new(
            viewport.min.x + fx as f32 * viewport.width(),
            viewport.min.y + fy as f32 * viewport.height(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn viewport() -> Rect {
        Rect::from_min_size(Pos2::new(0.0, 0.0), Vec2::new(200.0, 100.0))
    }

    fn view() -> AxisView {
        AxisView::new(AxisRange::new(0.0, 1000.0), AxisRange::new(0.0, 500.0))
    }

    #[test]
    fn test_default_view() {
        let v = view();
        assert!(v.is_default());
        assert!((v.zoom() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_reset() {
        let mut v = view();
        v.zoom_in(None, viewport());
        v.pan_by(Vec2::new(10.0, 5.0), viewport());
        assert!(!v.is_default());
        v.reset();
        assert!(v.is_default());
    }

    #[test]
    fn test_zoom_in_out() {
        let mut v = view();
        assert!(v.zoom_in(None, viewport()));
        assert!((v.zoom() - ZOOM_STEP as f64).abs() < 1e-4);
        assert!(v.zoom_out(None, viewport()));
        assert!((v.zoom() - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_zoom_clamping() {
        let mut v = view();
        for _ in 0..100 {
            v.zoom_out(None, viewport());
        }
        assert!((v.zoom() - MIN_ZOOM).abs() < 1e-6);
        assert!(!v.zoom_out(None, viewport()));
    }

    #[test]
    fn test_zoom_around_point_preserves_point() {
        let mut v = view();
        let vp = viewport();
        let cursor = Pos2::new(50.0, 80.0);
        let before = v.screen_to_axis(cursor, vp);
        v.zoom_around_point(2.0, cursor, vp);
        let after = v.screen_to_axis(cursor, vp);
        assert!((before[0] - after[0]).abs() < 1e-6);
        assert!((before[1] - after[1]).abs() < 1e-6);
        assert!((v.x.span() - 500.0).abs() < 1e-6);
    }

    #[test]
    fn test_pan_by() {
        let mut v = view();
        // 200 px show 1000 units: dragging 20 px right moves the view 100 units left
        v.pan_by(Vec2::new(20.0, 0.0), viewport());
        assert!((v.x.lower + 100.0).abs() < 1e-6);
        assert!((v.x.upper - 900.0).abs() < 1e-6);
        assert_eq!(v.y, AxisRange::new(0.0, 500.0));
    }

    #[test]
    fn test_screen_axis_round_trip() {
        let v = view();
        let vp = viewport();
        let p = v.screen_to_axis(Pos2::new(100.0, 25.0), vp);
        assert!((p[0] - 500.0).abs() < 1e-6);
        assert!((p[1] - 125.0).abs() < 1e-6);
        let back = v.axis_to_screen(p, vp);
        assert!((back.x - 100.0).abs() < 1e-3);
        assert!((back.y - 25.0).abs() < 1e-3);
    }

    #[test]
    fn test_inverted_axis() {
        let v = AxisView::new(AxisRange::new(10.0, 0.0), AxisRange::new(0.0, 10.0));
        let p = v.screen_to_axis(Pos2::new(0.0, 0.0), viewport());
        assert!((p[0] - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_set_full_resets() {
        let mut v = view();
        v.zoom_in(None, viewport());
        assert!(!v.set_full(AxisRange::new(0.0, 1000.0), AxisRange::new(0.0, 500.0)));
        assert!(!v.is_default());
        assert!(v.set_full(AxisRange::new(0.0, 10.0), AxisRange::new(0.0, 10.0)));
        assert!(v.is_default());
    }
}
