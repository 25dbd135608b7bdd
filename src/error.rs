//! Error types for mipview.
//!
//! Everything fallible in the core returns [`Result`]. The paint path never lets
//! one of these escape: it logs and keeps the previous frame.

use thiserror::Error;

/// Result type alias for mipview operations.
pub type Result<T> = std::result::Result<T, TraceError>;

/// Errors that can occur while downsampling, mapping or colouring an image.
#[derive(Debug, Error)]
pub enum TraceError {
    /// The array has no samples along at least one dimension.
    #[error("Array is empty: shape {rows}x{cols}")]
    EmptyArray { rows: usize, cols: usize },

    /// Bin levels are positive powers of two.
    #[error("Invalid bin level: {0}")]
    InvalidBin(u32),

    /// An axis label array does not match the dimension it labels.
    #[error("Axis {axis} has {len} labels but the image has {expected} samples along it")]
    AxisLength {
        axis: usize,
        len: usize,
        expected: usize,
    },

    /// Two arrays that must share a shape do not.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: [usize; 2],
        actual: [usize; 2],
    },

    /// A slice request fell outside the buffer it was cut from.
    #[error("Slice {rect:?} is outside a {width}x{height} buffer")]
    SliceOutOfBounds {
        rect: [usize; 4],
        width: usize,
        height: usize,
    },

    /// A full statistics pass was cancelled.
    #[error("Statistics pass cancelled")]
    Cancelled,

    /// No palette is registered under the name.
    #[error("Unknown palette: {0}")]
    UnknownPalette(String),

    /// A persisted label did not name a known variant.
    #[error("Unknown {kind}: {label}")]
    UnknownLabel { kind: &'static str, label: String },

    /// The configuration could not be parsed or written.
    #[error("Configuration error: {0}")]
    Config(#[from] serde_json::Error),
}

impl TraceError {
    /// Create an EmptyArray error.
    pub fn empty(rows: usize, cols: usize) -> Self {
        Self::EmptyArray { rows, cols }
    }

    /// Create a SliceOutOfBounds error for `[x, y, width, height]`.
    pub fn slice_out_of_bounds(rect: [usize; 4], width: usize, height: usize) -> Self {
        Self::SliceOutOfBounds {
            rect,
            width,
            height,
        }
    }

    /// Create an UnknownLabel error.
    pub fn unknown_label(kind: &'static str, label: impl Into<String>) -> Self {
        Self::UnknownLabel {
            kind,
            label: label.into(),
        }
    }
}
