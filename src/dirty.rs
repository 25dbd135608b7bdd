//! Outstanding re-render work between paints

/// How much work the next paint must do. Each level includes the work of
/// the levels below it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum DirtyLevel {
    /// Reuse the coloured image as is
    #[default]
    NoReimage,
    /// Rebuild only if the bin level changed
    ReimageAllowed,
    /// Rebuild the coloured image
    ForceReimage,
    /// Recompute min/max from the visible data, then rebuild
    Rehistogram,
}

/// Pending dirty level of a trace.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirtyState {
    pending: DirtyLevel,
}

impl DirtyState {
    /// Raise the pending level. A lower request never replaces a higher one.
    pub fn mark(&mut self, level: DirtyLevel) {
        self.pending = self.pending.max(level);
    }

    pub fn pending(&self) -> DirtyLevel {
        self.pending
    }

    /// Resolve the pending level and reset it; called once per paint
    pub fn take(&mut self) -> DirtyLevel {
        std::mem::take(&mut self.pending)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_levels_are_ordered() {
        assert!(DirtyLevel::NoReimage < DirtyLevel::ReimageAllowed);
        assert!(DirtyLevel::ReimageAllowed < DirtyLevel::ForceReimage);
        assert!(DirtyLevel::ForceReimage < DirtyLevel::Rehistogram);
    }

    #[test]
    fn test_mark_never_regresses() {
        let mut state = DirtyState::default();
        state.mark(DirtyLevel::ForceReimage);
        state.mark(DirtyLevel::ReimageAllowed);
        assert_eq!(state.pending(), DirtyLevel::ForceReimage);
        state.mark(DirtyLevel::Rehistogram);
        state.mark(DirtyLevel::NoReimage);
        assert_eq!(state.pending(), DirtyLevel::Rehistogram);
    }

    #[test]
    fn test_take_resets_once() {
        let mut state = DirtyState::default();
        state.mark(DirtyLevel::ReimageAllowed);
        assert_eq!(state.take(), DirtyLevel::ReimageAllowed);
        assert_eq!(state.take(), DirtyLevel::NoReimage);
    }
}
