//! mipview - Cache-aware downsampling and viewport rendering of large 2D arrays
//!
//! An [`ImageTrace`] keeps a power-of-two mip cache of its image, works out
//! which slice of which level covers the viewport, colours it through a
//! palette and hands back a frame ready to blit. The same crate builds to
//! WebAssembly with an egui front end, so a page can show arrays it hands
//! over as typed buffers.
//!
//! ## Architecture
//!
//! - `mip`: downsampling operators and the bounded per-bin cache
//! - `viewport`: axis ranges to index rectangles, bin choice, scale and offset
//! - `render` / `colormap` / `statistics`: colour mapping and display range
//! - `trace`: the [`ImageTrace`] lifecycle tying these together
//! - `TraceWidget`: self-contained egui widget driving one trace
//! - `TraceApp`: thin eframe App shell that hosts the widget
//! - `TraceHandle`: WASM interface for JavaScript to control the viewer

#[cfg(target_arch = "wasm32")]
use std::cell::RefCell;
#[cfg(target_arch = "wasm32")]
use std::rc::Rc;
#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;
#[cfg(target_arch = "wasm32")]
use web_sys::HtmlCanvasElement;

#[cfg(target_arch = "wasm32")]
mod app;
pub mod colormap;
pub mod config;
pub mod dirty;
pub mod error;
pub mod events;
pub mod mip;
pub mod render;
pub mod statistics;
pub mod trace;
pub mod transform;
pub mod viewport;
pub mod widget;

pub use config::TraceConfig;
pub use error::TraceError;
pub use trace::{Axes, DataUpdate, DataUpdateSender, ImageTrace, PaintRequest, ScaledImage};
pub use widget::TraceWidget;

#[cfg(target_arch = "wasm32")]
use app::TraceApp;
#[cfg(target_arch = "wasm32")]
use mip::DownsampleMode;
#[cfg(target_arch = "wasm32")]
use statistics::HistogramType;
#[cfg(target_arch = "wasm32")]
use viewport::{AxisRange, ImageOrigin};

/// Callbacks that can be registered from JavaScript
#[cfg(target_arch = "wasm32")]
#[derive(Default)]
pub struct TraceCallbacks {
    /// Called when ranges, data or colour mapping change
    pub on_state_change: Option<js_sys::Function>,
    /// Called with `{ bin }` whenever the bin level changes
    pub on_downsample: Option<js_sys::Function>,
}

/// A handle to a viewer instance. Each handle manages its own canvas and trace.
///
/// The handle shares the widget with the running [`TraceApp`] so calls from
/// JavaScript take effect on the next frame.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub struct TraceHandle {
    widget: Rc<RefCell<TraceWidget>>,
    callbacks: Rc<RefCell<TraceCallbacks>>,
    /// The eframe runner (kept alive to maintain the render loop)
    runner: eframe::WebRunner,
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
impl TraceHandle {
    /// Create a new viewer attached to the given canvas element.
    ///
    /// `config_json` is an optional serialized [`TraceConfig`]; missing
    /// fields take their defaults.
    #[wasm_bindgen]
    pub async fn create(canvas: HtmlCanvasElement, config_json: Option<String>) -> Result<TraceHandle, JsValue> {
        #[cfg(debug_assertions)]
        {
            eframe::WebLogger::init(log::LevelFilter::Debug).ok();
        }
        #[cfg(not(debug_assertions))]
        {
            eframe::WebLogger::init(log::LevelFilter::Warn).ok();
        }

        let config = match config_json {
            Some(json) => TraceConfig::from_json(&json).map_err(to_js)?,
            None => TraceConfig::default(),
        };

        let widget = Rc::new(RefCell::new(TraceWidget::new(config)));
        let widget_for_app = widget.clone();
        let callbacks = Rc::new(RefCell::new(TraceCallbacks::default()));
        let callbacks_for_app = callbacks.clone();

        let callbacks_for_bin = callbacks.clone();
        widget.borrow_mut().trace_mut().add_downsample_listener(move |event| {
            if let events::TraceEvent::DownsampleChanged { bin } = event {
                let callback = callbacks_for_bin.borrow().on_downsample.clone();
                if let Some(callback) = callback {
                    let payload = js_sys::Object::new();
                    set_field(&payload, "bin", &JsValue::from(*bin));
                    if let Err(e) = callback.call1(&JsValue::NULL, &payload) {
                        log::error!("onDownsample callback failed: {e:?}");
                    }
                }
            }
        });

        let web_options = eframe::WebOptions::default();
        let runner = eframe::WebRunner::new();

        runner
            .start(
                canvas,
                web_options,
                Box::new(move |cc| Ok(Box::new(TraceApp::new(cc, widget_for_app, callbacks_for_app)))),
            )
            .await?;

        Ok(TraceHandle { widget, callbacks, runner })
    }

    /// Set the image data to display.
    ///
    /// # Arguments
    /// * `buffer` - ArrayBuffer containing the raw samples, row major
    /// * `width` - Number of columns
    /// * `height` - Number of rows
    /// * `array_type` - Rust-style type specifier: "i8", "u8", "i16", "u16",
    ///   "i32", "u32", "i64", "u64", "f32" or "f64" (default)
    #[wasm_bindgen(js_name = setImageData)]
    pub fn set_image_data(
        &self,
        buffer: &js_sys::ArrayBuffer,
        width: u32,
        height: u32,
        array_type: &str,
    ) -> Result<(), JsValue> {
        let samples = convert_buffer_to_f64(buffer, array_type)?;
        let image = ndarray::Array2::from_shape_vec((height as usize, width as usize), samples).map_err(|e| {
            JsValue::from_str(&format!("Buffer does not hold {width}x{height} samples: {e}"))
        })?;
        let axes = self.widget.borrow().trace().axes().clone();
        // Labels from a previous image rarely fit a new shape
        let axes = if axes.validate([height as usize, width as usize]).is_ok() {
            axes
        } else {
            Axes::default()
        };
        self.widget.borrow_mut().set_data(image, axes).map_err(to_js)
    }

    /// Set coordinate labels for the columns (`x`) and rows (`y`)
    #[wasm_bindgen(js_name = setAxes)]
    pub fn set_axes(&self, x: Option<Vec<f64>>, y: Option<Vec<f64>>) -> Result<(), JsValue> {
        self.widget.borrow_mut().set_axes(Axes::new(x, y)).map_err(to_js)
    }

    /// Set the mask; non-zero bytes are shown. Pass nothing to clear it.
    #[wasm_bindgen(js_name = setMask)]
    pub fn set_mask(&self, mask: Option<Vec<u8>>, width: u32, height: u32) -> Result<(), JsValue> {
        let mask = match mask {
            Some(bytes) => Some(
                ndarray::Array2::from_shape_vec((height as usize, width as usize), bytes)
                    .map_err(|e| JsValue::from_str(&format!("Mask does not hold {width}x{height} samples: {e}")))?
                    .mapv(|b| b != 0),
            ),
            None => None,
        };
        self.widget.borrow_mut().set_mask(mask);
        Ok(())
    }

    /// End event loop and release resources
    #[wasm_bindgen(js_name = destroy)]
    pub fn destroy(&self) {
        self.widget.borrow_mut().trace_mut().dispose();
        self.runner.destroy();
    }

    /// Reset zoom and pan to the full extent
    #[wasm_bindgen(js_name = zoomToFit)]
    pub fn zoom_to_fit(&self) {
        self.widget.borrow_mut().zoom_to_fit();
    }

    /// Get the visible ranges as [xmin, xmax, ymin, ymax] in axis coordinates
    #[wasm_bindgen(js_name = getViewBounds)]
    pub fn get_view_bounds(&self) -> js_sys::Float64Array {
        let widget = self.widget.borrow();
        let view = widget.view();
        let result = js_sys::Float64Array::new_with_length(4);
        result.copy_from(&[view.x.lower, view.x.upper, view.y.lower, view.y.upper]);
        result
    }

    /// Show the given axis ranges
    #[wasm_bindgen(js_name = setViewBounds)]
    pub fn set_view_bounds(&self, xmin: f64, xmax: f64, ymin: f64, ymax: f64) {
        self.widget
            .borrow_mut()
            .set_ranges(AxisRange::new(xmin, xmax), AxisRange::new(ymin, ymax));
    }

    /// Bin level of the last painted frame
    #[wasm_bindgen(js_name = currentBin)]
    pub fn current_bin(&self) -> u32 {
        self.widget.borrow().trace().current_bin()
    }

    #[wasm_bindgen(js_name = getPalette)]
    pub fn get_palette(&self) -> String {
        self.widget.borrow().trace().mapping().palette.name().to_string()
    }

    /// Select a palette by name; append "_r" for the reversed variant
    #[wasm_bindgen(js_name = setPalette)]
    pub fn set_palette(&self, name: &str) -> Result<(), JsValue> {
        self.widget.borrow_mut().trace_mut().set_palette(name).map_err(to_js)
    }

    #[wasm_bindgen(js_name = paletteNames)]
    pub fn palette_names(&self) -> Vec<String> {
        self.widget.borrow().trace().palette_names()
    }

    #[wasm_bindgen(js_name = setDownsampleMode)]
    pub fn set_downsample_mode(&self, mode: &str) -> Result<(), JsValue> {
        let mode = DownsampleMode::from_label(mode).map_err(to_js)?;
        self.widget.borrow_mut().trace_mut().set_downsample_mode(mode);
        Ok(())
    }

    #[wasm_bindgen(js_name = setHistogramType)]
    pub fn set_histogram_type(&self, kind: &str) -> Result<(), JsValue> {
        let kind = HistogramType::from_label(kind).map_err(to_js)?;
        self.widget.borrow_mut().trace_mut().set_histogram_type(kind);
        Ok(())
    }

    /// Get the display range as [min, max]
    #[wasm_bindgen(js_name = getValueRange)]
    pub fn get_value_range(&self) -> js_sys::Float64Array {
        let widget = self.widget.borrow();
        let result = js_sys::Float64Array::new_with_length(2);
        result.copy_from(&[widget.trace().min(), widget.trace().max()]);
        result
    }

    #[wasm_bindgen(js_name = setMin)]
    pub fn set_min(&self, value: f64) {
        self.widget.borrow_mut().trace_mut().set_min(value);
    }

    #[wasm_bindgen(js_name = setMax)]
    pub fn set_max(&self, value: f64) {
        self.widget.borrow_mut().trace_mut().set_max(value);
    }

    #[wasm_bindgen(js_name = setLogScale)]
    pub fn set_log_scale(&self, log_scale: bool) {
        self.widget.borrow_mut().trace_mut().set_log_scale(log_scale);
    }

    /// Corner of the array shown at the top-left: "top-left", "top-right",
    /// "bottom-left" or "bottom-right"
    #[wasm_bindgen(js_name = setOrigin)]
    pub fn set_origin(&self, origin: &str) -> Result<(), JsValue> {
        let origin = ImageOrigin::all()
            .iter()
            .copied()
            .find(|o| origin_label(*o) == origin)
            .ok_or_else(|| to_js(TraceError::unknown_label("origin", origin)))?;
        self.widget.borrow_mut().trace_mut().set_image_origin(origin);
        Ok(())
    }

    /// Recompute the display range from the visible data
    #[wasm_bindgen(js_name = rehistogram)]
    pub fn rehistogram(&self) {
        self.widget.borrow_mut().trace_mut().rehistogram();
    }

    /// Pause painting, e.g. while the canvas is hidden
    #[wasm_bindgen(js_name = setActive)]
    pub fn set_active(&self, active: bool) {
        let mut widget = self.widget.borrow_mut();
        widget.trace_mut().set_image_update_active(active);
        if !active {
            widget.trace_mut().sleep();
        }
    }

    /// Serialized preferences, suitable for `create`
    #[wasm_bindgen(js_name = configJson)]
    pub fn config_json(&self) -> Result<String, JsValue> {
        self.widget.borrow().trace().config().to_json().map_err(to_js)
    }

    // =========================================================================
    // Callback registration
    // =========================================================================

    /// Register a callback to be called when viewer state changes.
    /// The callback receives an object with the current state:
    /// { xlim, ylim, zoom, bin, min, max, palette, logScale, downsampleMode, histogramType, origin }
    #[wasm_bindgen(js_name = onStateChange)]
    pub fn on_state_change(&self, callback: js_sys::Function) {
        self.callbacks.borrow_mut().on_state_change = Some(callback);
    }

    /// Register a callback receiving `{ bin }` when the bin level changes
    #[wasm_bindgen(js_name = onDownsample)]
    pub fn on_downsample(&self, callback: js_sys::Function) {
        self.callbacks.borrow_mut().on_downsample = Some(callback);
    }

    /// Clear all registered callbacks.
    #[wasm_bindgen(js_name = clearCallbacks)]
    pub fn clear_callbacks(&self) {
        let mut callbacks = self.callbacks.borrow_mut();
        callbacks.on_state_change = None;
        callbacks.on_downsample = None;
    }
}

#[cfg(target_arch = "wasm32")]
fn to_js(e: TraceError) -> JsValue {
    JsValue::from_str(&e.to_string())
}

#[cfg(target_arch = "wasm32")]
fn origin_label(origin: ImageOrigin) -> &'static str {
    match origin {
        ImageOrigin::TopLeft => "top-left",
        ImageOrigin::TopRight => "top-right",
        ImageOrigin::BottomLeft => "bottom-left",
        ImageOrigin::BottomRight => "bottom-right",
    }
}

#[cfg(target_arch = "wasm32")]
fn set_field(object: &js_sys::Object, key: &str, value: &JsValue) {
    if let Err(e) = js_sys::Reflect::set(object, &JsValue::from_str(key), value) {
        log::warn!("Could not set {key}: {e:?}");
    }
}

/// State passed to `onStateChange`
#[cfg(target_arch = "wasm32")]
pub(crate) fn state_object(widget: &TraceWidget) -> JsValue {
    let trace = widget.trace();
    let view = widget.view();
    let state = js_sys::Object::new();
    let pair = |a: f64, b: f64| {
        let array = js_sys::Float64Array::new_with_length(2);
        array.copy_from(&[a, b]);
        JsValue::from(array)
    };
    set_field(&state, "xlim", &pair(view.x.lower, view.x.upper));
    set_field(&state, "ylim", &pair(view.y.lower, view.y.upper));
    set_field(&state, "zoom", &JsValue::from(widget.zoom_level()));
    set_field(&state, "bin", &JsValue::from(trace.current_bin()));
    set_field(&state, "min", &JsValue::from(trace.min()));
    set_field(&state, "max", &JsValue::from(trace.max()));
    set_field(&state, "palette", &JsValue::from_str(trace.mapping().palette.name()));
    set_field(&state, "logScale", &JsValue::from(trace.mapping().log_scale));
    set_field(&state, "downsampleMode", &JsValue::from_str(trace.downsample_mode().label()));
    set_field(&state, "histogramType", &JsValue::from_str(trace.histogram_type().label()));
    set_field(&state, "origin", &JsValue::from_str(origin_label(trace.image_origin())));
    state.into()
}

/// Convert a JavaScript ArrayBuffer to Vec<f64> based on ArrayType string.
/// ArrayType values are Rust-style type specifiers (i8, u8, i16, etc.).
#[cfg(target_arch = "wasm32")]
fn convert_buffer_to_f64(buffer: &js_sys::ArrayBuffer, array_type: &str) -> Result<Vec<f64>, JsValue> {
    let samples = match array_type {
        "i8" => js_sys::Int8Array::new(buffer).to_vec().into_iter().map(f64::from).collect(),
        "u8" => js_sys::Uint8Array::new(buffer).to_vec().into_iter().map(f64::from).collect(),
        "i16" => js_sys::Int16Array::new(buffer).to_vec().into_iter().map(f64::from).collect(),
        "u16" => js_sys::Uint16Array::new(buffer).to_vec().into_iter().map(f64::from).collect(),
        "i32" => js_sys::Int32Array::new(buffer).to_vec().into_iter().map(f64::from).collect(),
        "u32" => js_sys::Uint32Array::new(buffer).to_vec().into_iter().map(f64::from).collect(),
        // 64-bit integers lose precision above 2^53
        "i64" => {
            let view = js_sys::BigInt64Array::new(buffer);
            (0..view.length()).map(|i| view.get_index(i) as f64).collect()
        }
        "u64" => {
            let view = js_sys::BigUint64Array::new(buffer);
            (0..view.length()).map(|i| view.get_index(i) as f64).collect()
        }
        "f32" => js_sys::Float32Array::new(buffer).to_vec().into_iter().map(f64::from).collect(),
        "f64" => js_sys::Float64Array::new(buffer).to_vec(),
        other => {
            return Err(to_js(TraceError::unknown_label("array type", other)));
        }
    };
    Ok(samples)
}
