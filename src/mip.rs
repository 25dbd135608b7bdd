//! Multi-resolution downsampling of the image, its mask and RGB data
//!
//! Each level is a `bin x bin` block reduction of the full array. Levels are
//! built lazily, shared through `Arc` so repeated requests hand back the same
//! allocation, and evicted least-recently-used under a byte budget.

use std::sync::Arc;

use lru::LruCache;
use ndarray::{s, Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceError};

/// 8-bit RGB sample
pub type Rgb = [u8; 3];

/// Default byte budget shared by the binned levels of one cache
pub const DEFAULT_CACHE_BUDGET: usize = 256 * 1024 * 1024;

/// How a `bin x bin` block is reduced to one sample
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DownsampleMode {
    Mean,
    #[default]
    Maximum,
    Minimum,
    /// Top-left sample of each block
    Point,
}

impl DownsampleMode {
    /// Label used in persisted preferences
    pub fn label(&self) -> &'static str {
        match self {
            DownsampleMode::Mean => "Mean",
            DownsampleMode::Maximum => "Maximum",
            DownsampleMode::Minimum => "Minimum",
            DownsampleMode::Point => "Point",
        }
    }

    /// Parse a persisted label (case-insensitive)
    pub fn from_label(label: &str) -> Result<Self> {
        Self::all()
            .iter()
            .copied()
            .find(|m| m.label().eq_ignore_ascii_case(label.trim()))
            .ok_or_else(|| TraceError::unknown_label("downsample mode", label))
    }

    pub fn all() -> &'static [DownsampleMode] {
        &[
            DownsampleMode::Mean,
            DownsampleMode::Maximum,
            DownsampleMode::Minimum,
            DownsampleMode::Point,
        ]
    }
}

/// Block reduction for an element type.
pub trait Downsample: Clone {
    /// Reduce a non-empty block to a single sample
    fn reduce(block: ArrayView2<'_, Self>, mode: DownsampleMode) -> Self;
}

impl Downsample for f64 {
    fn reduce(block: ArrayView2<'_, f64>, mode: DownsampleMode) -> f64 {
        let finite = block.iter().copied().filter(|v| !v.is_nan());
        match mode {
            DownsampleMode::Point => block[[0, 0]],
            DownsampleMode::Mean => {
                let (sum, count) = finite.fold((0.0, 0usize), |(s, c), v| (s + v, c + 1));
                if count == 0 {
                    f64::NAN
                } else {
                    sum / count as f64
                }
            }
            DownsampleMode::Maximum => finite.reduce(f64::max).unwrap_or(f64::NAN),
            DownsampleMode::Minimum => finite.reduce(f64::min).unwrap_or(f64::NAN),
        }
    }
}

/// Masks always keep the minimum: one masked (`false`) sample masks the block.
impl Downsample for bool {
    fn reduce(block: ArrayView2<'_, bool>, _mode: DownsampleMode) -> bool {
        block.iter().all(|&valid| valid)
    }
}

impl Downsample for Rgb {
    fn reduce(block: ArrayView2<'_, Rgb>, mode: DownsampleMode) -> Rgb {
        match mode {
            DownsampleMode::Point => block[[0, 0]],
            DownsampleMode::Mean => {
                let mut sum = [0u32; 3];
                for px in block.iter() {
                    for (acc, &c) in sum.iter_mut().zip(px) {
                        *acc += c as u32;
                    }
                }
                let n = block.len().max(1) as u32;
                [(sum[0] / n) as u8, (sum[1] / n) as u8, (sum[2] / n) as u8]
            }
            DownsampleMode::Maximum => block.iter().fold([0u8; 3], |acc, px| {
                [acc[0].max(px[0]), acc[1].max(px[1]), acc[2].max(px[2])]
            }),
            DownsampleMode::Minimum => block.iter().fold([u8::MAX; 3], |acc, px| {
                [acc[0].min(px[0]), acc[1].min(px[1]), acc[2].min(px[2])]
            }),
        }
    }
}

/// Reduce `bin x bin` blocks of `array`.
///
/// The output is `ceil(rows / bin) x ceil(cols / bin)`; blocks on the last row
/// and column reduce over the samples that exist.
pub fn downsample<T: Downsample>(
    array: &Array2<T>,
    bin: u32,
    mode: DownsampleMode,
) -> Result<Array2<T>> {
    if bin == 0 || !bin.is_power_of_two() {
        return Err(TraceError::InvalidBin(bin));
    }
    let (rows, cols) = array.dim();
    if rows == 0 || cols == 0 {
        return Err(TraceError::empty(rows, cols));
    }

    let b = bin as usize;
    let out_rows = rows.div_ceil(b);
    let out_cols = cols.div_ceil(b);
    Ok(Array2::from_shape_fn((out_rows, out_cols), |(i, j)| {
        let r0 = i * b;
        let c0 = j * b;
        let block = array.slice(s![r0..(r0 + b).min(rows), c0..(c0 + b).min(cols)]);
        T::reduce(block, mode)
    }))
}

/// A level handed out by [`MipCache::get`]
#[derive(Debug)]
pub struct MipLevel<T> {
    /// Bin factor the array was actually reduced with
    pub bin: u32,
    pub array: Arc<Array2<T>>,
}

impl<T> Clone for MipLevel<T> {
    fn clone(&self) -> Self {
        Self {
            bin: self.bin,
            array: Arc::clone(&self.array),
        }
    }
}

/// Binned copies of one array, keyed by bin factor.
#[derive(Debug)]
pub struct MipCache<T> {
    base: Arc<Array2<T>>,
    mode: DownsampleMode,
    levels: LruCache<u32, Arc<Array2<T>>>,
    budget_bytes: usize,
    /// Level served by the last successful `get`, the fallback when a build fails
    last_served: Option<MipLevel<T>>,
}

impl<T: Downsample> MipCache<T> {
    pub fn new(base: Arc<Array2<T>>, mode: DownsampleMode, budget_bytes: usize) -> Self {
        Self {
            base,
            mode,
            levels: LruCache::unbounded(),
            budget_bytes,
            last_served: None,
        }
    }

    pub fn mode(&self) -> DownsampleMode {
        self.mode
    }

    /// Change the reduction; every level built with the old one is dropped
    pub fn set_mode(&mut self, mode: DownsampleMode) {
        if self.mode != mode {
            self.mode = mode;
            self.clear();
        }
    }

    /// Drop every binned level
    pub fn clear(&mut self) {
        self.levels.clear();
        self.last_served = None;
    }

    /// Bins currently resident, smallest first
    pub fn resident_bins(&self) -> Vec<u32> {
        let mut bins: Vec<u32> = self.levels.iter().map(|(&bin, _)| bin).collect();
        bins.sort_unstable();
        bins
    }

    /// Bytes held by binned levels
    pub fn resident_bytes(&self) -> usize {
        self.levels.iter().map(|(_, array)| array_bytes(array)).sum()
    }

    /// Get the array binned by `bin`, building it if it is not resident.
    ///
    /// A failed build is logged and the previously served level is returned
    /// instead, so the returned [`MipLevel::bin`] may differ from `bin`.
    pub fn get(&mut self, bin: u32) -> MipLevel<T> {
        if bin <= 1 {
            log::trace!("No downsample bin (or bin=1)");
            let level = MipLevel {
                bin: 1,
                array: Arc::clone(&self.base),
            };
            self.last_served = Some(level.clone());
            return level;
        }

        if let Some(array) = self.levels.get(&bin) {
            log::trace!("Downsample bin used, {bin}");
            let level = MipLevel {
                bin,
                array: Arc::clone(array),
            };
            self.last_served = Some(level.clone());
            return level;
        }

        match downsample(&self.base, bin, self.mode) {
            Ok(array) => {
                let array = Arc::new(array);
                self.insert(bin, Arc::clone(&array));
                log::trace!("Downsample bin created, {bin}");
                let level = MipLevel { bin, array };
                self.last_served = Some(level.clone());
                level
            }
            Err(e) => {
                log::error!("Cannot downsample to bin {bin}: {e}");
                self.last_served.clone().unwrap_or_else(|| MipLevel {
                    bin: 1,
                    array: Arc::clone(&self.base),
                })
            }
        }
    }

    /// Store a level, evicting least-recently-used ones until it fits the budget
    fn insert(&mut self, bin: u32, array: Arc<Array2<T>>) {
        let incoming = array_bytes(&array);
        let mut resident = self.resident_bytes();
        while resident + incoming > self.budget_bytes {
            let Some((evicted_bin, evicted)) = self.levels.pop_lru() else {
                break;
            };
            log::debug!("Evicting downsample bin {evicted_bin}");
            resident -= array_bytes(&evicted);
        }
        self.levels.put(bin, array);
    }
}

fn array_bytes<T>(array: &Array2<T>) -> usize {
    array.len() * std::mem::size_of::<T>()
}

/// The caches owned by one trace: intensity, mask and (for colour images) RGB.
///
/// The mask always reduces with [`DownsampleMode::Minimum`] whatever the image
/// mode is, so thin masked features survive binning.
#[derive(Debug)]
pub struct Mips {
    pub image: MipCache<f64>,
    pub mask: Option<MipCache<bool>>,
    pub rgb: Option<MipCache<Rgb>>,
    budget_bytes: usize,
}

impl Mips {
    pub fn new(image: Arc<Array2<f64>>, mode: DownsampleMode, budget_bytes: usize) -> Self {
        Self {
            image: MipCache::new(image, mode, budget_bytes),
            mask: None,
            rgb: None,
            budget_bytes,
        }
    }

    pub fn set_mask(&mut self, mask: Option<Arc<Array2<bool>>>) {
        self.mask = mask.map(|m| MipCache::new(m, DownsampleMode::Minimum, self.budget_bytes));
    }

    pub fn set_rgb(&mut self, rgb: Option<Arc<Array2<Rgb>>>) {
        let mode = self.image.mode();
        self.rgb = rgb.map(|c| MipCache::new(c, mode, self.budget_bytes));
    }

    /// Change the image (and RGB) reduction. Mask levels do not depend on it
    /// but are dropped too so every level is rebuilt together.
    pub fn set_mode(&mut self, mode: DownsampleMode) {
        self.image.set_mode(mode);
        if let Some(rgb) = &mut self.rgb {
            rgb.set_mode(mode);
        }
        if let Some(mask) = &mut self.mask {
            mask.clear();
        }
    }

    /// Drop every binned level of every cache
    pub fn clear(&mut self) {
        self.image.clear();
        if let Some(mask) = &mut self.mask {
            mask.clear();
        }
        if let Some(rgb) = &mut self.rgb {
            rgb.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ramp(rows: usize, cols: usize) -> Array2<f64> {
        Array2::from_shape_fn((rows, cols), |(r, c)| (r * cols + c) as f64)
    }

    #[test]
    fn test_downsample_modes() {
        let a = array![[1.0, 2.0], [3.0, 8.0]];
        assert_eq!(downsample(&a, 2, DownsampleMode::Maximum).unwrap()[[0, 0]], 8.0);
        assert_eq!(downsample(&a, 2, DownsampleMode::Minimum).unwrap()[[0, 0]], 1.0);
        assert_eq!(downsample(&a, 2, DownsampleMode::Point).unwrap()[[0, 0]], 1.0);
        assert!((downsample(&a, 2, DownsampleMode::Mean).unwrap()[[0, 0]] - 3.5).abs() < 1e-12);
    }

    #[test]
    fn test_downsample_partial_edge_blocks() {
        let a = ramp(5, 3);
        let d = downsample(&a, 2, DownsampleMode::Maximum).unwrap();
        assert_eq!(d.dim(), (3, 2));
        // Last row block only holds row 4
        assert_eq!(d[[2, 1]], 14.0);
    }

    #[test]
    fn test_downsample_skips_nan() {
        let a = array![[f64::NAN, 2.0], [4.0, f64::NAN]];
        assert_eq!(downsample(&a, 2, DownsampleMode::Maximum).unwrap()[[0, 0]], 4.0);
        assert!((downsample(&a, 2, DownsampleMode::Mean).unwrap()[[0, 0]] - 3.0).abs() < 1e-12);

        let all_nan = Array2::from_elem((2, 2), f64::NAN);
        assert!(downsample(&all_nan, 2, DownsampleMode::Minimum).unwrap()[[0, 0]].is_nan());
    }

    #[test]
    fn test_mask_downsample_preserves_masked_pixels() {
        let mut mask = Array2::from_elem((4, 4), true);
        mask[[3, 0]] = false;
        // Any mode: one false sample masks the whole block
        let d = downsample(&mask, 2, DownsampleMode::Maximum).unwrap();
        assert_eq!(d, array![[true, true], [false, true]]);
    }

    #[test]
    fn test_rgb_downsample_per_channel() {
        let a: Array2<Rgb> =
            Array2::from_shape_vec((2, 2), vec![[10, 0, 200], [20, 50, 0], [30, 0, 0], [40, 10, 100]])
                .unwrap();
        assert_eq!(downsample(&a, 2, DownsampleMode::Maximum).unwrap()[[0, 0]], [40, 50, 200]);
        assert_eq!(downsample(&a, 2, DownsampleMode::Mean).unwrap()[[0, 0]], [25, 15, 75]);
    }

    #[test]
    fn test_downsample_rejects_bad_input() {
        let a = ramp(4, 4);
        assert!(matches!(downsample(&a, 0, DownsampleMode::Mean), Err(TraceError::InvalidBin(0))));
        assert!(matches!(downsample(&a, 3, DownsampleMode::Mean), Err(TraceError::InvalidBin(3))));
        let empty = Array2::<f64>::zeros((0, 4));
        assert!(matches!(downsample(&empty, 2, DownsampleMode::Mean), Err(TraceError::EmptyArray { .. })));
    }

    #[test]
    fn test_bin_one_returns_base_without_copy() {
        let base = Arc::new(ramp(8, 8));
        let mut cache = MipCache::new(Arc::clone(&base), DownsampleMode::Mean, DEFAULT_CACHE_BUDGET);
        let level = cache.get(1);
        assert_eq!(level.bin, 1);
        assert!(Arc::ptr_eq(&level.array, &base));
        assert!(cache.resident_bins().is_empty());
    }

    #[test]
    fn test_repeated_get_is_reference_stable() {
        let mut cache = MipCache::new(Arc::new(ramp(64, 64)), DownsampleMode::Mean, DEFAULT_CACHE_BUDGET);
        let first = cache.get(4);
        let second = cache.get(4);
        assert!(Arc::ptr_eq(&first.array, &second.array));

        cache.clear();
        let rebuilt = cache.get(4);
        assert!(!Arc::ptr_eq(&first.array, &rebuilt.array));
        assert_eq!(*first.array, *rebuilt.array);
    }

    #[test]
    fn test_sample_count_decreases_with_bin() {
        let mut cache = MipCache::new(Arc::new(ramp(100, 37)), DownsampleMode::Maximum, DEFAULT_CACHE_BUDGET);
        let mut previous = usize::MAX;
        for bin in [1, 2, 4, 8, 16, 32, 64] {
            let count = cache.get(bin).array.len();
            assert!(count <= previous, "bin {bin} has {count} samples, more than {previous}");
            previous = count;
        }
    }

    #[test]
    fn test_eviction_is_least_recently_used() {
        // 64x64 f64: bin 2 = 8 KiB, bin 4 = 2 KiB, bin 8 = 512 B
        let budget = 8 * 1024 + 2 * 1024;
        let mut cache = MipCache::new(Arc::new(ramp(64, 64)), DownsampleMode::Mean, budget);
        cache.get(2);
        cache.get(4);
        cache.get(2); // bin 4 is now the oldest
        cache.get(8);
        assert_eq!(cache.resident_bins(), vec![2, 8]);
        assert!(cache.resident_bytes() <= budget);
    }

    #[test]
    fn test_failed_build_falls_back_to_previous_level() {
        let mut cache = MipCache::new(Arc::new(ramp(16, 16)), DownsampleMode::Mean, DEFAULT_CACHE_BUDGET);
        let good = cache.get(2);
        let fallback = cache.get(3);
        assert_eq!(fallback.bin, 2);
        assert!(Arc::ptr_eq(&good.array, &fallback.array));
    }

    #[test]
    fn test_mips_clear_drops_image_and_mask_levels() {
        let mut mips = Mips::new(Arc::new(ramp(16, 16)), DownsampleMode::Mean, DEFAULT_CACHE_BUDGET);
        mips.set_mask(Some(Arc::new(Array2::from_elem((16, 16), true))));
        mips.image.get(2);
        mips.mask.as_mut().unwrap().get(2);
        mips.clear();
        assert!(mips.image.resident_bins().is_empty());
        assert!(mips.mask.as_ref().unwrap().resident_bins().is_empty());
        assert_eq!(mips.mask.as_ref().unwrap().mode(), DownsampleMode::Minimum);
    }

    #[test]
    fn test_mode_labels() {
        for mode in DownsampleMode::all() {
            assert_eq!(DownsampleMode::from_label(mode.label()).unwrap(), *mode);
        }
        assert_eq!(DownsampleMode::from_label("mean").unwrap(), DownsampleMode::Mean);
        assert!(DownsampleMode::from_label("median").is_err());
    }
}
