//! Thin eframe shell hosting a [`TraceWidget`]

use std::cell::RefCell;
use std::rc::Rc;

use wasm_bindgen::JsValue;

use crate::widget::TraceWidget;
use crate::{state_object, TraceCallbacks};

/// The egui application for one canvas
pub struct TraceApp {
    widget: Rc<RefCell<TraceWidget>>,
    callbacks: Rc<RefCell<TraceCallbacks>>,
}

impl TraceApp {
    pub fn new(
        _cc: &eframe::CreationContext<'_>,
        widget: Rc<RefCell<TraceWidget>>,
        callbacks: Rc<RefCell<TraceCallbacks>>,
    ) -> Self {
        Self { widget, callbacks }
    }

    fn notify_state_change(&self) {
        let state = state_object(&self.widget.borrow());
        let callback = self.callbacks.borrow().on_state_change.clone();
        if let Some(callback) = callback {
            if let Err(e) = callback.call1(&JsValue::NULL, &state) {
                log::error!("onStateChange callback failed: {e:?}");
            }
        }
    }
}

impl eframe::App for TraceApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        egui::CentralPanel::default()
            .frame(egui::Frame::NONE)
            .show(ctx, |ui| {
                let size = ui.available_size();
                self.widget.borrow_mut().show(ui, size);
            });

        if self.widget.borrow_mut().take_state_changed() {
            self.notify_state_change();
        }

        // Background data updates arrive without input events
        ctx.request_repaint_after(std::time::Duration::from_millis(100));
    }
}
