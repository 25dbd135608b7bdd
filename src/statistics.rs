//! Display range statistics
//!
//! Computes the min/max used for colour mapping from an image, honouring the
//! mask and the histogram type. Masked, non-finite and (in log scale)
//! non-positive samples never contribute.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceError};

/// Upper bound on samples visited by a fast statistics pass
pub const DEFAULT_SAMPLE_TARGET: usize = 1 << 18;

/// How the display range is derived from the sample distribution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum HistogramType {
    /// Plain extrema
    #[default]
    MinMax,
    /// Minimum up to twice the mean's distance above it
    Mean,
    /// Minimum up to twice the median's distance above it
    Median,
    /// Low and high quantiles, ignoring outliers
    OutlierValues,
}

impl HistogramType {
    pub fn label(&self) -> &'static str {
        match self {
            HistogramType::MinMax => "Min/Max",
            HistogramType::Mean => "Mean",
            HistogramType::Median => "Median",
            HistogramType::OutlierValues => "Outlier Values",
        }
    }

    pub fn from_label(label: &str) -> Result<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|h| h.label().eq_ignore_ascii_case(label.trim()))
            .ok_or_else(|| TraceError::unknown_label("histogram type", label))
    }

    pub fn all() -> &'static [HistogramType] {
        &[
            HistogramType::MinMax,
            HistogramType::Mean,
            HistogramType::Median,
            HistogramType::OutlierValues,
        ]
    }
}

/// Whether every sample is visited or a strided subset
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum StatisticsMode {
    Full,
    #[default]
    Fast,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HistogramSettings {
    pub histogram_type: HistogramType,
    pub mode: StatisticsMode,
    /// Low quantile for [`HistogramType::OutlierValues`]
    pub outlier_low: f64,
    /// High quantile for [`HistogramType::OutlierValues`]
    pub outlier_high: f64,
    pub sample_target: usize,
}

impl Default for HistogramSettings {
    fn default() -> Self {
        Self {
            histogram_type: HistogramType::default(),
            mode: StatisticsMode::default(),
            outlier_low: 0.01,
            outlier_high: 0.99,
            sample_target: DEFAULT_SAMPLE_TARGET,
        }
    }
}

/// Cooperative cancellation flag for long statistics passes.
///
/// Clones share the flag, so one can be handed to another thread.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Compute the display range of `image`.
///
/// Returns `Ok(None)` when no sample qualifies (for example a fully masked
/// image). A full pass checks `cancel` once per row.
pub fn compute(
    image: ArrayView2<'_, f64>,
    mask: Option<ArrayView2<'_, bool>>,
    settings: &HistogramSettings,
    log_scale: bool,
    cancel: Option<&CancelToken>,
) -> Result<Option<(f64, f64)>> {
    let (rows, cols) = image.dim();
    if let Some(m) = &mask {
        if m.dim() != (rows, cols) {
            return Err(TraceError::ShapeMismatch {
                expected: [rows, cols],
                actual: [m.nrows(), m.ncols()],
            });
        }
    }

    let stride = match settings.mode {
        StatisticsMode::Full => 1,
        StatisticsMode::Fast => sample_stride(rows * cols, settings.sample_target),
    };
    let keep_values = matches!(
        settings.histogram_type,
        HistogramType::Median | HistogramType::OutlierValues
    );

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut sum = 0.0;
    let mut count = 0usize;
    let mut values = Vec::new();

    for r in (0..rows).step_by(stride) {
        if cancel.is_some_and(CancelToken::is_cancelled) {
            return Err(TraceError::Cancelled);
        }
        for c in (0..cols).step_by(stride) {
            if let Some(m) = &mask {
                if !m[[r, c]] {
                    continue;
                }
            }
            let v = image[[r, c]];
            if !v.is_finite() || (log_scale && v <= 0.0) {
                continue;
            }
            min = min.min(v);
            max = max.max(v);
            sum += v;
            count += 1;
            if keep_values {
                values.push(v);
            }
        }
    }

    if count == 0 {
        return Ok(None);
    }

    let range = match settings.histogram_type {
        HistogramType::MinMax => (min, max),
        HistogramType::Mean => centred(min, max, sum / count as f64),
        HistogramType::Median => {
            values.sort_unstable_by(f64::total_cmp);
            centred(min, max, quantile(&values, 0.5))
        }
        HistogramType::OutlierValues => {
            values.sort_unstable_by(f64::total_cmp);
            let lo = quantile(&values, settings.outlier_low.clamp(0.0, 1.0));
            let hi = quantile(&values, settings.outlier_high.clamp(0.0, 1.0));
            if lo < hi {
                (lo, hi)
            } else {
                (min, max)
            }
        }
    };
    Ok(Some(range))
}

/// Stride per dimension so roughly `target` samples are visited
fn sample_stride(total: usize, target: usize) -> usize {
    if target == 0 || total <= target {
        return 1;
    }
    ((total as f64 / target as f64).sqrt().ceil() as usize).max(1)
}

fn centred(min: f64, max: f64, centre: f64) -> (f64, f64) {
    (min, (min + 2.0 * (centre - min)).min(max))
}

/// Nearest-rank quantile of sorted values
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let idx = ((sorted.len() - 1) as f64 * q).round() as usize;
    sorted[idx.min(sorted.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, Array2};

    fn settings(histogram_type: HistogramType) -> HistogramSettings {
        HistogramSettings {
            histogram_type,
            mode: StatisticsMode::Full,
            ..Default::default()
        }
    }

    #[test]
    fn test_min_max_ignores_non_finite() {
        let a = array![[1.0, f64::NAN], [f64::INFINITY, 5.0]];
        let r = compute(a.view(), None, &settings(HistogramType::MinMax), false, None).unwrap();
        assert_eq!(r, Some((1.0, 5.0)));
    }

    #[test]
    fn test_masked_outlier_does_not_contribute() {
        let mut a = Array2::from_shape_fn((8, 8), |(r, c)| (r + c) as f64);
        a[[3, 3]] = 1.0e9;
        let mut mask = Array2::from_elem((8, 8), true);
        mask[[3, 3]] = false;
        let r = compute(a.view(), Some(mask.view()), &settings(HistogramType::MinMax), false, None)
            .unwrap();
        assert_eq!(r, Some((0.0, 14.0)));
    }

    #[test]
    fn test_fully_masked_gives_none() {
        let a = Array2::from_elem((4, 4), 3.0);
        let mask = Array2::from_elem((4, 4), false);
        let r = compute(a.view(), Some(mask.view()), &settings(HistogramType::Mean), false, None)
            .unwrap();
        assert_eq!(r, None);
    }

    #[test]
    fn test_log_scale_ignores_non_positive() {
        let a = array![[-5.0, 0.0], [2.0, 10.0]];
        let r = compute(a.view(), None, &settings(HistogramType::MinMax), true, None).unwrap();
        assert_eq!(r, Some((2.0, 10.0)));
    }

    #[test]
    fn test_mean_range_clamped_to_max() {
        // mean = 2.5, min + 2 * (mean - min) = 4.0, clamped to max 4.0
        let a = array![[1.0, 2.0], [3.0, 4.0]];
        let r = compute(a.view(), None, &settings(HistogramType::Mean), false, None).unwrap();
        assert_eq!(r, Some((1.0, 4.0)));

        // A bright outlier pulls the mean but not up to itself
        let b = array![[0.0, 0.0], [0.0, 100.0]];
        let r = compute(b.view(), None, &settings(HistogramType::Mean), false, None).unwrap();
        assert_eq!(r, Some((0.0, 50.0)));
    }

    #[test]
    fn test_median_range() {
        let a = array![[0.0, 1.0, 2.0], [3.0, 4.0, 1000.0]];
        let (lo, hi) = compute(a.view(), None, &settings(HistogramType::Median), false, None)
            .unwrap()
            .unwrap();
        assert_eq!(lo, 0.0);
        // Nearest-rank median of six values is the fourth (3.0)
        assert_eq!(hi, 6.0);
    }

    #[test]
    fn test_outlier_values_quantiles() {
        let a = Array2::from_shape_fn((10, 10), |(r, c)| (r * 10 + c) as f64);
        let mut s = settings(HistogramType::OutlierValues);
        s.outlier_low = 0.1;
        s.outlier_high = 0.9;
        let (lo, hi) = compute(a.view(), None, &s, false, None).unwrap().unwrap();
        assert!((lo - 10.0).abs() < 1.0);
        assert!((hi - 89.0).abs() < 1.0);
    }

    #[test]
    fn test_fast_mode_samples() {
        let a = Array2::from_shape_fn((100, 100), |(r, c)| (r * 100 + c) as f64);
        let s = HistogramSettings {
            mode: StatisticsMode::Fast,
            sample_target: 100,
            ..Default::default()
        };
        let (lo, hi) = compute(a.view(), None, &s, false, None).unwrap().unwrap();
        assert_eq!(lo, 0.0);
        // Stride 10 never reaches the last row or column
        assert!(hi < 9999.0);
        assert_eq!(sample_stride(10_000, 100), 10);
        assert_eq!(sample_stride(50, 100), 1);
    }

    #[test]
    fn test_cancelled_full_pass() {
        let a = Array2::<f64>::zeros((16, 16));
        let cancel = CancelToken::new();
        let shared = cancel.clone();
        shared.cancel();
        assert!(cancel.is_cancelled());
        let r = compute(a.view(), None, &settings(HistogramType::MinMax), false, Some(&cancel));
        assert!(matches!(r, Err(TraceError::Cancelled)));
    }

    #[test]
    fn test_mask_shape_mismatch() {
        let a = Array2::<f64>::zeros((4, 4));
        let mask = Array2::from_elem((2, 4), true);
        let r = compute(a.view(), Some(mask.view()), &settings(HistogramType::MinMax), false, None);
        assert!(matches!(r, Err(TraceError::ShapeMismatch { .. })));
    }

    #[test]
    fn test_histogram_labels() {
        for h in HistogramType::all() {
            assert_eq!(HistogramType::from_label(h.label()).unwrap(), *h);
        }
        assert!(HistogramType::from_label("mode").is_err());
    }
}
