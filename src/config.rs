//! Detection configuration.
//!
//! `DetectionConfig` is fixed for the lifetime of a session. The handful of
//! settings an operator may adjust while a camera is running live in
//! `SharedConfig`, where every field is its own atomic cell so the next frame
//! sees either the old or the new value, never a mix.

use crate::core_modules::shot::LaserColor;
use crate::error::{DetectionError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU32, Ordering};
use std::sync::{PoisonError, RwLock};

/// Whether shots outside the calibrated projection area are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationOption {
    /// Report shots anywhere in the enabled sectors.
    #[default]
    Everywhere,
    /// Drop shots whose centroid falls outside the calibration bounds.
    OnlyInBounds,
}

/// Axis-aligned projection boundary in frame pixel coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationBounds {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub option: CalibrationOption,
}

impl CalibrationBounds {
    pub fn new(x: f64, y: f64, width: f64, height: f64, option: CalibrationOption) -> Self {
        Self {
            x,
            y,
            width,
            height,
            option,
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    /// True when a centroid at `(x, y)` should be reported.
    pub fn admits(&self, x: f64, y: f64) -> bool {
        match self.option {
            CalibrationOption::Everywhere => true,
            CalibrationOption::OnlyInBounds => self.contains(x, y),
        }
    }

    fn validate(&self) -> Result<()> {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        if !finite || self.width <= 0.0 || self.height <= 0.0 {
            return Err(DetectionError::rejected(
                "calibration",
                format!("bounds {self:?} must be finite with positive size"),
            ));
        }
        Ok(())
    }
}

/// Session-start configuration for the shot-detection engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Rows in the sector grid.
    pub sector_rows: usize,
    /// Columns in the sector grid.
    pub sector_columns: usize,
    /// Minimum rise of the brightest channel over the background for a candidate pixel.
    pub detection_threshold: f32,
    /// How far the dominant channel must exceed the others (0-255 scale).
    pub color_dominance_margin: u8,
    /// A pixel with every channel at or above this level counts as a blown-out laser core.
    pub saturation_level: u8,
    /// Per-frame blend rate of the background model toward the current frame.
    pub background_decay: f32,
    /// Frames that only seed the background model.
    pub warmup_frames: u32,
    /// Candidate pixels above this fraction of the frame mean global motion; the frame is dropped.
    pub max_candidate_fraction: f32,
    pub min_blob_pixels: usize,
    pub max_blob_pixels: usize,
    /// Largest allowed long-side / short-side ratio of a blob's bounding box.
    pub max_aspect_ratio: f64,
    /// Relative margin by which red or green energy must win to classify a blob.
    pub color_margin: f64,
    /// Report blobs whose color could not be classified.
    pub report_unknown_color: bool,
    /// Laser color to ignore entirely, e.g. ambient light of the same hue.
    pub ignore_laser_color: Option<LaserColor>,
    /// Pixel radius within which candidates in nearby frames are the same flash.
    pub dedup_radius: f64,
    /// Frames a flash may go unseen before it is finalized.
    pub dedup_window: u64,
    /// Minimum spacing between reported shots, in milliseconds. Zero disables.
    pub min_shot_interval_ms: u64,
    pub marker_radius: u32,
    pub debug_mode: bool,
    /// Frame rate assumed for recorded sources without timestamps.
    pub expected_fps: f64,
    /// Live sessions below this measured rate raise a warning.
    pub min_fps: f64,
    /// Sustained mean luminance below this raises a warning.
    pub min_average_luminance: f64,
    /// Corrupt-frame ratio over the health window above which a warning is raised.
    pub max_corrupt_ratio: f64,
    /// Frames per health measurement window.
    pub health_window: usize,
    /// Threads used for the per-frame difference pass. Zero means one per CPU.
    pub worker_threads: usize,
    pub calibration: Option<CalibrationBounds>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            sector_rows: 3,
            sector_columns: 3,
            detection_threshold: 45.0,
            color_dominance_margin: 25,
            saturation_level: 235,
            background_decay: 0.05,
            warmup_frames: 1,
            max_candidate_fraction: 0.02,
            min_blob_pixels: 4,
            max_blob_pixels: 900,
            max_aspect_ratio: 3.0,
            color_margin: 0.2,
            report_unknown_color: false,
            ignore_laser_color: None,
            dedup_radius: 12.0,
            dedup_window: 3,
            min_shot_interval_ms: 0,
            marker_radius: 2,
            debug_mode: false,
            expected_fps: 30.0,
            min_fps: 15.0,
            min_average_luminance: 20.0,
            max_corrupt_ratio: 0.1,
            health_window: 30,
            worker_threads: 0,
            calibration: None,
        }
    }
}

impl DetectionConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn with_debug(mut self, debug_mode: bool) -> Self {
        self.debug_mode = debug_mode;
        self
    }

    pub fn with_ignored_color(mut self, color: Option<LaserColor>) -> Self {
        self.ignore_laser_color = color;
        self
    }

    pub fn with_calibration(mut self, bounds: CalibrationBounds) -> Self {
        self.calibration = Some(bounds);
        self
    }

    /// Checks every field, naming the first invalid one.
    pub fn validate(&self) -> Result<()> {
        if !(1..=32).contains(&self.sector_rows) || !(1..=32).contains(&self.sector_columns) {
            return Err(DetectionError::rejected(
                "sector_grid",
                format!(
                    "{}x{} is outside 1..=32",
                    self.sector_rows, self.sector_columns
                ),
            ));
        }
        validate_threshold(self.detection_threshold)?;
        if !(self.background_decay > 0.0 && self.background_decay < 1.0) {
            return Err(DetectionError::rejected(
                "background_decay",
                format!("{} must lie in (0, 1)", self.background_decay),
            ));
        }
        if !(self.max_candidate_fraction > 0.0 && self.max_candidate_fraction <= 1.0) {
            return Err(DetectionError::rejected(
                "max_candidate_fraction",
                format!("{} must lie in (0, 1]", self.max_candidate_fraction),
            ));
        }
        if self.min_blob_pixels == 0 || self.max_blob_pixels < self.min_blob_pixels {
            return Err(DetectionError::rejected(
                "blob_size",
                format!(
                    "min {} / max {} must satisfy 1 <= min <= max",
                    self.min_blob_pixels, self.max_blob_pixels
                ),
            ));
        }
        if !(self.max_aspect_ratio >= 1.0) {
            return Err(DetectionError::rejected(
                "max_aspect_ratio",
                format!("{} must be at least 1", self.max_aspect_ratio),
            ));
        }
        if !(self.color_margin >= 0.0) || !self.color_margin.is_finite() {
            return Err(DetectionError::rejected(
                "color_margin",
                format!("{} must be finite and non-negative", self.color_margin),
            ));
        }
        if !(self.dedup_radius > 0.0) || self.dedup_window == 0 {
            return Err(DetectionError::rejected(
                "dedup",
                format!(
                    "radius {} and window {} must be positive",
                    self.dedup_radius, self.dedup_window
                ),
            ));
        }
        if !(self.expected_fps > 0.0) || !(self.min_fps >= 0.0) {
            return Err(DetectionError::rejected(
                "fps",
                format!(
                    "expected {} must be positive, minimum {} non-negative",
                    self.expected_fps, self.min_fps
                ),
            ));
        }
        if self.health_window == 0 {
            return Err(DetectionError::rejected("health_window", "must be positive"));
        }
        if let Some(bounds) = &self.calibration {
            bounds.validate()?;
        }
        Ok(())
    }
}

fn validate_threshold(value: f32) -> Result<()> {
    if value.is_finite() && value > 0.0 && value <= 255.0 {
        Ok(())
    } else {
        Err(DetectionError::rejected(
            "detection_threshold",
            format!("{value} must lie in (0, 255]"),
        ))
    }
}

const NO_COLOR: u8 = 0;
const RED: u8 = 1;
const GREEN: u8 = 2;

fn encode_color(color: Option<LaserColor>) -> u8 {
    match color {
        None => NO_COLOR,
        Some(LaserColor::Red) => RED,
        Some(LaserColor::Green) => GREEN,
    }
}

fn decode_color(raw: u8) -> Option<LaserColor> {
    match raw {
        RED => Some(LaserColor::Red),
        GREEN => Some(LaserColor::Green),
        _ => None,
    }
}

/// The runtime-adjustable values as one frame sees them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameSettings {
    pub detection_threshold: f32,
    pub debug_mode: bool,
    pub ignore_laser_color: Option<LaserColor>,
    pub calibration: Option<CalibrationBounds>,
}

/// Configuration shared read-mostly between sessions and the embedder.
#[derive(Debug)]
pub struct SharedConfig {
    base: DetectionConfig,
    detection_threshold: AtomicU32,
    debug_mode: AtomicBool,
    ignore_laser_color: AtomicU8,
    calibration: RwLock<Option<CalibrationBounds>>,
}

impl SharedConfig {
    pub fn new(base: DetectionConfig) -> Result<Self> {
        base.validate()?;
        Ok(Self {
            detection_threshold: AtomicU32::new(base.detection_threshold.to_bits()),
            debug_mode: AtomicBool::new(base.debug_mode),
            ignore_laser_color: AtomicU8::new(encode_color(base.ignore_laser_color)),
            calibration: RwLock::new(base.calibration),
            base,
        })
    }

    /// The session-start values. Runtime-adjustable fields may have moved on; use `snapshot`.
    pub fn base(&self) -> &DetectionConfig {
        &self.base
    }

    pub fn snapshot(&self) -> FrameSettings {
        FrameSettings {
            detection_threshold: self.detection_threshold(),
            debug_mode: self.debug_mode(),
            ignore_laser_color: self.ignore_laser_color(),
            calibration: *self
                .calibration
                .read()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }

    pub fn detection_threshold(&self) -> f32 {
        f32::from_bits(self.detection_threshold.load(Ordering::Acquire))
    }

    /// Rejected values leave the previous threshold in place.
    pub fn set_detection_threshold(&self, value: f32) -> Result<()> {
        if let Err(err) = validate_threshold(value) {
            if self.debug_mode() {
                log::warn!("keeping detection threshold {}: {err}", self.detection_threshold());
            }
            return Err(err);
        }
        self.detection_threshold
            .store(value.to_bits(), Ordering::Release);
        Ok(())
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode.load(Ordering::Acquire)
    }

    pub fn set_debug_mode(&self, enabled: bool) {
        self.debug_mode.store(enabled, Ordering::Release);
    }

    pub fn ignore_laser_color(&self) -> Option<LaserColor> {
        decode_color(self.ignore_laser_color.load(Ordering::Acquire))
    }

    pub fn set_ignore_laser_color(&self, color: Option<LaserColor>) {
        self.ignore_laser_color
            .store(encode_color(color), Ordering::Release);
    }

    pub fn set_calibration(&self, bounds: Option<CalibrationBounds>) -> Result<()> {
        if let Some(bounds) = &bounds {
            if let Err(err) = bounds.validate() {
                if self.debug_mode() {
                    log::warn!("keeping previous calibration bounds: {err}");
                }
                return Err(err);
            }
        }
        *self
            .calibration
            .write()
            .unwrap_or_else(PoisonError::into_inner) = bounds;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        DetectionConfig::default().validate().unwrap();
    }

    #[test]
    fn toml_overrides_only_named_fields() {
        let config = DetectionConfig::from_toml_str(
            r#"
            detection_threshold = 60.0
            ignore_laser_color = "green"
            debug_mode = true

            [calibration]
            x = 10.0
            y = 20.0
            width = 300.0
            height = 200.0
            option = "only_in_bounds"
            "#,
        )
        .unwrap();

        assert_eq!(config.detection_threshold, 60.0);
        assert_eq!(config.ignore_laser_color, Some(LaserColor::Green));
        assert!(config.debug_mode);
        assert_eq!(config.sector_rows, 3);
        let bounds = config.calibration.unwrap();
        assert_eq!(bounds.option, CalibrationOption::OnlyInBounds);
        assert!(bounds.admits(15.0, 25.0));
        assert!(!bounds.admits(5.0, 25.0));
    }

    #[test]
    fn invalid_file_values_are_rejected() {
        let err = DetectionConfig::from_toml_str("background_decay = 1.5").unwrap_err();
        assert!(matches!(
            err,
            DetectionError::ConfigurationRejected { ref field, .. } if field == "background_decay"
        ));
    }

    #[test]
    fn rejected_threshold_keeps_previous_value() {
        let shared = SharedConfig::new(DetectionConfig::default().with_debug(true)).unwrap();
        shared.set_detection_threshold(70.0).unwrap();

        assert!(shared.set_detection_threshold(f32::NAN).is_err());
        assert!(shared.set_detection_threshold(-3.0).is_err());
        assert!(shared.set_detection_threshold(300.0).is_err());
        assert_eq!(shared.detection_threshold(), 70.0);
    }

    #[test]
    fn snapshot_reflects_runtime_updates() {
        let shared = SharedConfig::new(DetectionConfig::default()).unwrap();
        shared.set_ignore_laser_color(Some(LaserColor::Red));
        shared
            .set_calibration(Some(CalibrationBounds::new(
                0.0,
                0.0,
                100.0,
                100.0,
                CalibrationOption::OnlyInBounds,
            )))
            .unwrap();

        let settings = shared.snapshot();
        assert_eq!(settings.ignore_laser_color, Some(LaserColor::Red));
        assert!(settings.calibration.is_some());

        assert!(
            shared
                .set_calibration(Some(CalibrationBounds::new(
                    0.0,
                    0.0,
                    -1.0,
                    5.0,
                    CalibrationOption::Everywhere
                )))
                .is_err()
        );
        assert!(shared.snapshot().calibration.is_some());
    }
}
