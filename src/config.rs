//! Persisted trace preferences
//!
//! Hosts load a [`TraceConfig`] from JSON at startup and save it back when
//! the trace reports a change; every field has a default so older files
//! keep loading.

use egui::{Color32, Vec2};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::mip::{DownsampleMode, DEFAULT_CACHE_BUDGET};
use crate::render::{BitDepth, CutBound};
use crate::statistics::{HistogramSettings, HistogramType, StatisticsMode, DEFAULT_SAMPLE_TARGET};
use crate::viewport::{MapperLimits, MINIMUM_LABEL_SIZE, MINIMUM_ZOOM_SIZE, SCREEN_GUARD_FACTOR};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    pub palette: String,
    pub downsample_mode: DownsampleMode,
    pub histogram_type: HistogramType,
    pub statistics_mode: StatisticsMode,
    pub outlier_low: f64,
    pub outlier_high: f64,
    pub sample_target: usize,
    pub log_scale: bool,
    pub bit_depth: BitDepth,
    pub min_cut: CutBound,
    pub max_cut: CutBound,
    pub nan_cut: CutBound,
    pub mask_color: Option<Color32>,
    /// Recompute min/max from the visible slice on every zoom or pan
    pub rescale_histogram: bool,
    pub label_zoom_enabled: bool,
    pub minimum_zoom_size: usize,
    pub minimum_label_size: usize,
    /// Primary screen size in pixels
    pub screen_size: [f32; 2],
    pub screen_guard_factor: f32,
    pub cache_budget_bytes: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            palette: "Gray".to_string(),
            downsample_mode: DownsampleMode::default(),
            histogram_type: HistogramType::default(),
            statistics_mode: StatisticsMode::default(),
            outlier_low: 0.01,
            outlier_high: 0.99,
            sample_target: DEFAULT_SAMPLE_TARGET,
            log_scale: false,
            bit_depth: BitDepth::default(),
            min_cut: CutBound::DISPLAY_RANGE,
            max_cut: CutBound::DISPLAY_RANGE,
            nan_cut: CutBound::NAN_GREEN,
            mask_color: None,
            rescale_histogram: false,
            label_zoom_enabled: true,
            minimum_zoom_size: MINIMUM_ZOOM_SIZE,
            minimum_label_size: MINIMUM_LABEL_SIZE,
            screen_size: [1920.0, 1080.0],
            screen_guard_factor: SCREEN_GUARD_FACTOR,
            cache_budget_bytes: DEFAULT_CACHE_BUDGET,
        }
    }
}

impl TraceConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn histogram_settings(&self) -> HistogramSettings {
        HistogramSettings {
            histogram_type: self.histogram_type,
            mode: self.statistics_mode,
            outlier_low: self.outlier_low,
            outlier_high: self.outlier_high,
            sample_target: self.sample_target,
        }
    }

    pub fn mapper_limits(&self) -> MapperLimits {
        MapperLimits {
            minimum_zoom_size: self.minimum_zoom_size.max(1),
            minimum_label_size: if self.label_zoom_enabled {
                self.minimum_label_size
            } else {
                0
            },
            screen_size: Vec2::new(self.screen_size[0], self.screen_size[1]),
            screen_guard_factor: self.screen_guard_factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::CutAction;

    #[test]
    fn test_json_round_trip() {
        let mut config = TraceConfig::default();
        config.palette = "Viridis_r".to_string();
        config.downsample_mode = DownsampleMode::Mean;
        config.max_cut = CutBound::new(Some(1000.0), CutAction::Color(Color32::RED));
        config.mask_color = Some(Color32::from_rgb(10, 20, 30));
        let json = config.to_json().unwrap();
        assert_eq!(TraceConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let config = TraceConfig::from_json(r#"{ "palette": "Magma", "log_scale": true }"#).unwrap();
        assert_eq!(config.palette, "Magma");
        assert!(config.log_scale);
        assert_eq!(config.minimum_zoom_size, MINIMUM_ZOOM_SIZE);
        assert_eq!(config.screen_guard_factor, SCREEN_GUARD_FACTOR);
        assert_eq!(config.nan_cut, CutBound::NAN_GREEN);
    }

    #[test]
    fn test_malformed_json_is_config_error() {
        let err = TraceConfig::from_json("{ palette: ").unwrap_err();
        assert!(matches!(err, crate::error::TraceError::Config(_)));
    }

    #[test]
    fn test_label_zoom_disabled() {
        let config = TraceConfig {
            label_zoom_enabled: false,
            ..Default::default()
        };
        assert_eq!(config.mapper_limits().minimum_label_size, 0);
        assert_eq!(TraceConfig::default().mapper_limits(), MapperLimits::default());
    }
}
