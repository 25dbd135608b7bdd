//! Listener registry for colour-mapping and downsample changes

use crate::render::CutBound;
use crate::viewport::ImageOrigin;

/// A change another component may want to mirror
#[derive(Clone, Debug, PartialEq)]
pub enum TraceEvent {
    PaletteChanged { name: String },
    MinChanged(f64),
    MaxChanged(f64),
    MinCutChanged(CutBound),
    MaxCutChanged(CutBound),
    NanBoundChanged(CutBound),
    MaskChanged,
    ImageOriginChanged(ImageOrigin),
    RescaleHistogramChanged(bool),
    DownsampleChanged { bin: u32 },
}

impl TraceEvent {
    pub fn kind(&self) -> ListenerKind {
        match self {
            TraceEvent::DownsampleChanged { .. } => ListenerKind::Downsample,
            _ => ListenerKind::Palette,
        }
    }
}

/// Which events a listener receives
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ListenerKind {
    /// Every colour-mapping, mask and origin change
    Palette,
    /// Bin level changes
    Downsample,
}

/// Handle returned on registration, used to remove the listener
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Callback = Box<dyn FnMut(&TraceEvent)>;

#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    entries: Vec<(ListenerId, ListenerKind, Callback)>,
}

impl Listeners {
    pub fn add(&mut self, kind: ListenerKind, callback: impl FnMut(&TraceEvent) + 'static) -> ListenerId {
        let id = ListenerId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, kind, Box::new(callback)));
        id
    }

    /// Returns false if `id` was not registered
    pub fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _, _)| *entry != id);
        self.entries.len() != before
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Deliver `event` to every listener of its kind
    pub fn fire(&mut self, event: &TraceEvent) {
        let kind = event.kind();
        for (_, k, callback) in self.entries.iter_mut() {
            if *k == kind {
                callback(event);
            }
        }
    }
}

impl std::fmt::Debug for Listeners {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listeners")
            .field("count", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_fire_routes_by_kind() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut listeners = Listeners::default();

        let palette_seen = Rc::clone(&seen);
        listeners.add(ListenerKind::Palette, move |e| {
            palette_seen.borrow_mut().push(("palette", e.clone()))
        });
        let downsample_seen = Rc::clone(&seen);
        listeners.add(ListenerKind::Downsample, move |e| {
            downsample_seen.borrow_mut().push(("downsample", e.clone()))
        });

        listeners.fire(&TraceEvent::MinChanged(1.0));
        listeners.fire(&TraceEvent::DownsampleChanged { bin: 4 });

        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], ("palette", TraceEvent::MinChanged(1.0)));
        assert_eq!(seen[1], ("downsample", TraceEvent::DownsampleChanged { bin: 4 }));
    }

    #[test]
    fn test_remove_listener() {
        let count = Rc::new(RefCell::new(0));
        let mut listeners = Listeners::default();
        let c = Rc::clone(&count);
        let id = listeners.add(ListenerKind::Palette, move |_| *c.borrow_mut() += 1);
        listeners.fire(&TraceEvent::MaskChanged);
        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.fire(&TraceEvent::MaskChanged);
        assert_eq!(*count.borrow(), 1);
        assert!(listeners.is_empty());
    }
}
