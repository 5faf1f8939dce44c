use crate::{
    error::{JarvisError, Result},
    pixel::HsvRange,
    sketch::GridConfig,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Single-frame detector tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Skin box in HSV space.
    #[serde(default)]
    pub hsv: HsvRange,

    /// Accepted blob area range, in pixels at detection resolution.
    #[serde(default = "default::min_hand_area")]
    pub min_hand_area: i32,
    #[serde(default = "default::max_hand_area")]
    pub max_hand_area: i32,
    #[serde(default = "default::min_confidence")]
    pub min_confidence: f32,

    #[serde(default = "default::enable_morphology")]
    pub enable_morphology: bool,
    #[serde(default = "default::morph_iterations")]
    pub morph_iterations: u32,

    #[serde(default = "default::enable_gesture")]
    pub enable_gesture: bool,
    /// Frames of gesture history for mode stabilization.
    #[serde(default = "default::gesture_history")]
    pub gesture_history: usize,

    /// Integer downscale applied before detection. 1 disables.
    #[serde(default = "default::downscale_factor")]
    pub downscale_factor: u32,
}

/// Wrapper-level tuning: tracking, lighting, quality filtering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductionConfig {
    #[serde(default = "default::enable_tracking")]
    pub enable_tracking: bool,
    #[serde(default = "default::tracking_history_frames")]
    pub tracking_history_frames: usize,
    #[serde(default = "default::tracking_iou_threshold")]
    pub tracking_iou_threshold: f32,

    #[serde(default = "default::adaptive_lighting")]
    pub adaptive_lighting: bool,
    #[serde(default = "default::lighting_adaptation_rate")]
    pub lighting_adaptation_rate: f32,

    #[serde(default = "default::gesture_stabilization_frames")]
    pub gesture_stabilization_frames: usize,
    #[serde(default = "default::gesture_confidence_threshold")]
    pub gesture_confidence_threshold: f32,

    #[serde(default = "default::enable_roi_tracking")]
    pub enable_roi_tracking: bool,
    #[serde(default = "default::roi_expansion_pixels")]
    pub roi_expansion_pixels: i32,

    #[serde(default = "default::filter_low_confidence")]
    pub filter_low_confidence: bool,
    #[serde(default = "default::min_detection_quality")]
    pub min_detection_quality: f32,
}

/// Stage geometry and pacing for the four-thread pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default = "default::camera_width")]
    pub camera_width: u32,
    #[serde(default = "default::camera_height")]
    pub camera_height: u32,
    #[serde(default = "default::camera_fps")]
    pub camera_fps: u32,
    #[serde(default = "default::detect_width")]
    pub detect_width: u32,
    #[serde(default = "default::detect_height")]
    pub detect_height: u32,
    #[serde(default = "default::queue_depth")]
    pub queue_depth: usize,
}

/// Drawing state machine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PadConfig {
    #[serde(default = "default::required_confirmation_frames")]
    pub required_confirmation_frames: u32,
    #[serde(default = "default::position_tolerance_percent")]
    pub position_tolerance_percent: f32,
    #[serde(default = "default::smoothing_window")]
    pub smoothing_window: usize,
    #[serde(default = "default::jitter_threshold_percent")]
    pub jitter_threshold_percent: f32,
    #[serde(default = "default::predictive_smoothing")]
    pub predictive_smoothing: bool,
    #[serde(default = "default::anti_aliasing")]
    pub anti_aliasing: bool,
    /// Confidence a pointing/peace hand needs to move the pen.
    #[serde(default = "default::draw_confidence")]
    pub draw_confidence: f32,
    /// Confidence a non-drawing gesture needs to count as a state change.
    #[serde(default = "default::gesture_change_confidence")]
    pub gesture_change_confidence: f32,
    /// Movement from the start anchor that releases the start state, percent.
    #[serde(default = "default::restart_distance_percent")]
    pub restart_distance_percent: f32,
    /// Lines shorter than this are discarded, percent.
    #[serde(default = "default::min_line_length_percent")]
    pub min_line_length_percent: f32,
    #[serde(default = "default::line_color")]
    pub line_color: u32,
    #[serde(default = "default::line_thickness")]
    pub line_thickness: u32,
}

mod default {
    pub fn min_hand_area() -> i32 {
        3000
    }
    pub fn max_hand_area() -> i32 {
        150_000
    }
    pub fn min_confidence() -> f32 {
        0.35
    }
    pub fn enable_morphology() -> bool {
        true
    }
    pub fn morph_iterations() -> u32 {
        1
    }
    pub fn enable_gesture() -> bool {
        true
    }
    pub fn gesture_history() -> usize {
        7
    }
    pub fn downscale_factor() -> u32 {
        1
    }

    pub fn enable_tracking() -> bool {
        true
    }
    pub fn tracking_history_frames() -> usize {
        5
    }
    pub fn tracking_iou_threshold() -> f32 {
        0.25
    }
    pub fn adaptive_lighting() -> bool {
        true
    }
    pub fn lighting_adaptation_rate() -> f32 {
        0.1
    }
    pub fn gesture_stabilization_frames() -> usize {
        7
    }
    pub fn gesture_confidence_threshold() -> f32 {
        0.6
    }
    pub fn enable_roi_tracking() -> bool {
        false
    }
    pub fn roi_expansion_pixels() -> i32 {
        80
    }
    pub fn filter_low_confidence() -> bool {
        true
    }
    pub fn min_detection_quality() -> f32 {
        0.40
    }

    pub fn camera_width() -> u32 {
        640
    }
    pub fn camera_height() -> u32 {
        480
    }
    pub fn camera_fps() -> u32 {
        30
    }
    pub fn detect_width() -> u32 {
        224
    }
    pub fn detect_height() -> u32 {
        224
    }
    pub fn queue_depth() -> usize {
        8
    }

    pub fn required_confirmation_frames() -> u32 {
        2
    }
    pub fn position_tolerance_percent() -> f32 {
        3.0
    }
    pub fn smoothing_window() -> usize {
        9
    }
    pub fn jitter_threshold_percent() -> f32 {
        1.5
    }
    pub fn predictive_smoothing() -> bool {
        true
    }
    pub fn anti_aliasing() -> bool {
        true
    }
    pub fn draw_confidence() -> f32 {
        0.65
    }
    pub fn gesture_change_confidence() -> f32 {
        0.6
    }
    pub fn restart_distance_percent() -> f32 {
        5.0
    }
    pub fn min_line_length_percent() -> f32 {
        1.0
    }
    pub fn line_color() -> u32 {
        0x00FF_FFFF
    }
    pub fn line_thickness() -> u32 {
        3
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            hsv: HsvRange::default(),
            min_hand_area: default::min_hand_area(),
            max_hand_area: default::max_hand_area(),
            min_confidence: default::min_confidence(),
            enable_morphology: default::enable_morphology(),
            morph_iterations: default::morph_iterations(),
            enable_gesture: default::enable_gesture(),
            gesture_history: default::gesture_history(),
            downscale_factor: default::downscale_factor(),
        }
    }
}

impl Default for ProductionConfig {
    fn default() -> Self {
        ProductionConfig {
            enable_tracking: default::enable_tracking(),
            tracking_history_frames: default::tracking_history_frames(),
            tracking_iou_threshold: default::tracking_iou_threshold(),
            adaptive_lighting: default::adaptive_lighting(),
            lighting_adaptation_rate: default::lighting_adaptation_rate(),
            gesture_stabilization_frames: default::gesture_stabilization_frames(),
            gesture_confidence_threshold: default::gesture_confidence_threshold(),
            enable_roi_tracking: default::enable_roi_tracking(),
            roi_expansion_pixels: default::roi_expansion_pixels(),
            filter_low_confidence: default::filter_low_confidence(),
            min_detection_quality: default::min_detection_quality(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            camera_width: default::camera_width(),
            camera_height: default::camera_height(),
            camera_fps: default::camera_fps(),
            detect_width: default::detect_width(),
            detect_height: default::detect_height(),
            queue_depth: default::queue_depth(),
        }
    }
}

impl Default for PadConfig {
    fn default() -> Self {
        PadConfig {
            required_confirmation_frames: default::required_confirmation_frames(),
            position_tolerance_percent: default::position_tolerance_percent(),
            smoothing_window: default::smoothing_window(),
            jitter_threshold_percent: default::jitter_threshold_percent(),
            predictive_smoothing: default::predictive_smoothing(),
            anti_aliasing: default::anti_aliasing(),
            draw_confidence: default::draw_confidence(),
            gesture_change_confidence: default::gesture_change_confidence(),
            restart_distance_percent: default::restart_distance_percent(),
            min_line_length_percent: default::min_line_length_percent(),
            line_color: default::line_color(),
            line_thickness: default::line_thickness(),
        }
    }
}

impl DetectorConfig {
    /// Reject configurations the detector cannot run with. An inverted hue
    /// range is allowed and simply matches nothing.
    pub fn validate(&self) -> Result<()> {
        let h = &self.hsv;
        let bounds = [
            ("hue_min", h.hue_min, 179),
            ("hue_max", h.hue_max, 179),
            ("sat_min", h.sat_min, 255),
            ("sat_max", h.sat_max, 255),
            ("val_min", h.val_min, 255),
            ("val_max", h.val_max, 255),
        ];
        for (name, value, max) in bounds {
            if value < 0 || value > max {
                return Err(JarvisError::InvalidConfig(format!(
                    "{name} = {value} outside 0..={max}"
                )));
            }
        }
        if self.min_hand_area <= 0 || self.max_hand_area <= self.min_hand_area {
            return Err(JarvisError::InvalidConfig(format!(
                "hand area range [{}, {}] is empty",
                self.min_hand_area, self.max_hand_area
            )));
        }
        if self.downscale_factor < 1 {
            return Err(JarvisError::InvalidConfig(
                "downscale_factor must be at least 1".into(),
            ));
        }
        if self.gesture_history == 0 {
            return Err(JarvisError::InvalidConfig(
                "gesture_history must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Everything tunable in one file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub production: ProductionConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub pad: PadConfig,
    #[serde(default)]
    pub grid: GridConfig,
}

impl Config {
    pub fn config_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| JarvisError::InvalidConfig("no config directory".into()))?;
        path.push("jarvis");

        if !path.exists() {
            std::fs::create_dir(&path)?;
        }

        path.push("config.ron");
        Ok(path)
    }

    /// Load from disk, falling back to defaults when the file is missing or
    /// broken. Broken files are logged, never overwritten silently.
    pub fn from_disk(path: &Path) -> Config {
        tracing::info!("load config from {}", path.display());
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Config::default();
            }
            Err(err) => {
                tracing::error!("could not read config: {err}");
                return Config::default();
            }
        };

        match ron::from_str(&contents) {
            Ok(config) => config,
            Err(err) => {
                tracing::error!("could not parse config: {err}");
                Config::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        tracing::info!("save config to {}", path.display());
        std::fs::write(path, self.to_ron_string())?;
        Ok(())
    }

    pub fn to_ron_string(&self) -> String {
        let contents = ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::new()
                .new_line(String::from("\n"))
                .indentor(String::from("  "))
                .compact_arrays(true),
        )
        .expect("config serializes");

        format!("// generated, edit while jarvis is stopped\n{contents}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(DetectorConfig::default().validate().is_ok());
    }

    #[test]
    fn bad_ranges_are_rejected() {
        let mut config = DetectorConfig::default();
        config.hsv.hue_max = 200;
        assert!(matches!(
            config.validate(),
            Err(JarvisError::InvalidConfig(_))
        ));

        let mut config = DetectorConfig::default();
        config.min_hand_area = 5000;
        config.max_hand_area = 100;
        assert!(config.validate().is_err());

        let mut config = DetectorConfig::default();
        config.downscale_factor = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_hue_range_is_allowed() {
        let mut config = DetectorConfig::default();
        config.hsv.hue_min = 100;
        config.hsv.hue_max = 10;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_ron_round_trip() {
        let config = Config::default();
        let text = config.to_ron_string();
        let stripped = text.lines().skip(1).collect::<Vec<_>>().join("\n");
        let back: Config = ron::from_str(&stripped).unwrap();
        assert_eq!(back.detector.min_hand_area, config.detector.min_hand_area);
        assert_eq!(back.pad.smoothing_window, config.pad.smoothing_window);
    }

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let partial: DetectorConfig = ron::from_str("(min_hand_area: 1234)").unwrap();
        assert_eq!(partial.min_hand_area, 1234);
        assert_eq!(partial.max_hand_area, 150_000);
        assert_eq!(partial.gesture_history, 7);
    }
}
