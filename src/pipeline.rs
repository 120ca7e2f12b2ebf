// THEORY:
// The `pipeline` module is the per-frame driver of the shot detector. It owns
// every piece of state that lives across frames for one camera (the background
// model and the deduplicator) and runs the stages in a fixed order:
//
//   Stage 1: Temporal Analysis   - background difference, candidate pixels
//   Stage 1.5: Scene Stability   - a frame where too much changed is dropped
//   Stage 2: Spatial Grouping    - clusters, centroids, color, containment
//   Stage 3: Behavioral Analysis - multi-frame flashes collapse into shots
//
// Runtime settings (threshold, ignored color, calibration) and the sector
// flags are snapshotted once at the top of each frame, so every stage of that
// frame sees the same values.

use crate::config::SharedConfig;
use crate::core_modules::background::{BackgroundModel, DifferenceParams};
use crate::core_modules::candidate_extractor::ExtractorParams;
use crate::core_modules::candidate_extractor::candidate_extractor;
use crate::core_modules::deduplicator::Deduplicator;
use crate::core_modules::frame::Frame;
use crate::core_modules::sector_grid::SectorGrid;
use crate::core_modules::shot::Shot;
use crate::core_modules::utils::image_helper::image_helper;
use crate::error::{DetectionError, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// What one frame produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FrameReport {
    pub frame_index: u64,
    /// Shots released by this frame, in dispatch order.
    pub shots: Vec<Shot>,
    /// Candidate pixels before the excessive-motion check.
    pub candidate_pixels: usize,
    /// Clusters that survived the extractor.
    pub candidates: usize,
    pub mean_luminance: f64,
    /// The whole frame was discarded as global motion.
    pub rejected_for_motion: bool,
}

/// One camera's detection state.
pub struct ShotPipeline {
    config: Arc<SharedConfig>,
    grid: Arc<SectorGrid>,
    background: BackgroundModel,
    deduplicator: Deduplicator,
    debug_dump: Option<PathBuf>,
}

impl ShotPipeline {
    /// The grid must have the configured shape; it cannot change during a session.
    pub fn new(config: Arc<SharedConfig>, grid: Arc<SectorGrid>) -> Result<Self> {
        let base = config.base();
        if grid.rows() != base.sector_rows || grid.columns() != base.sector_columns {
            return Err(DetectionError::rejected(
                "sector_grid",
                format!(
                    "grid is {}x{} but the configuration asks for {}x{}",
                    grid.rows(),
                    grid.columns(),
                    base.sector_rows,
                    base.sector_columns
                ),
            ));
        }
        let background = BackgroundModel::new(base.worker_threads);
        log::debug!("difference pass on {} thread(s)", background.worker_threads());
        let deduplicator = Deduplicator::new(
            base.dedup_radius,
            base.dedup_window,
            Duration::from_millis(base.min_shot_interval_ms),
            base.marker_radius,
        );
        Ok(Self {
            config,
            grid,
            background,
            deduplicator,
            debug_dump: None,
        })
    }

    /// In debug mode, writes each frame's candidate map as a PNG into `directory`.
    pub fn with_debug_dump(mut self, directory: impl Into<PathBuf>) -> Self {
        self.debug_dump = Some(directory.into());
        self
    }

    pub fn grid(&self) -> &Arc<SectorGrid> {
        &self.grid
    }

    pub fn background(&self) -> &BackgroundModel {
        &self.background
    }

    pub fn process_frame(&mut self, frame: &Frame) -> FrameReport {
        let settings = self.config.snapshot();
        let sectors = self.grid.snapshot();
        let base = self.config.base();

        // Stage 1: Temporal Analysis
        let params = DifferenceParams {
            detection_threshold: settings.detection_threshold,
            dominance_margin: base.color_dominance_margin,
            saturation_level: base.saturation_level,
            ignore_laser_color: settings.ignore_laser_color,
        };
        let mut map = self.background.process(
            frame,
            &sectors,
            &params,
            base.background_decay,
            base.warmup_frames,
        );
        let candidate_pixels = map.count();

        // Stage 1.5: Scene Stability
        let limit = base.max_candidate_fraction as f64 * frame.pixel_count() as f64;
        let rejected_for_motion = candidate_pixels as f64 > limit;
        if rejected_for_motion {
            log::debug!(
                "frame {}: {candidate_pixels} candidate pixels exceed the motion limit of {limit:.0}, frame dropped",
                frame.index()
            );
            map.clear();
        }

        if settings.debug_mode && !map.is_empty() {
            if let Some(directory) = &self.debug_dump {
                let path = directory.join(format!("candidates_{:06}.png", frame.index()));
                if let Err(err) = image_helper::save_candidate_map(&path, &map) {
                    log::warn!("could not write {}: {err}", path.display());
                }
            }
        }

        // Stage 2: Spatial Grouping
        let extractor = ExtractorParams {
            min_blob_pixels: base.min_blob_pixels,
            max_blob_pixels: base.max_blob_pixels,
            max_aspect_ratio: base.max_aspect_ratio,
            color_margin: base.color_margin,
            report_unknown_color: base.report_unknown_color,
            ignore_laser_color: settings.ignore_laser_color,
            calibration: settings.calibration,
        };
        let candidates = candidate_extractor::find_candidates(
            &map,
            frame.index(),
            frame.timestamp(),
            &sectors,
            &extractor,
        );
        let candidate_count = candidates.len();

        // Stage 3: Behavioral Analysis
        let shots = self.deduplicator.observe(frame.index(), candidates);
        for shot in &shots {
            log::debug!("released {shot}");
        }

        FrameReport {
            frame_index: frame.index(),
            shots,
            candidate_pixels,
            candidates: candidate_count,
            mean_luminance: frame.mean_luminance(),
            rejected_for_motion,
        }
    }

    /// Releases every flash still being tracked. Call at end of stream.
    pub fn finish(&mut self) -> Vec<Shot> {
        self.deduplicator.flush()
    }

    /// Forgets the background and every open flash.
    pub fn reset(&mut self) {
        self.background.reset();
        self.deduplicator.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DetectionConfig;
    use crate::core_modules::shot::ShotColor;
    use image::{Rgb, RgbImage};

    fn pipeline() -> ShotPipeline {
        let config = Arc::new(SharedConfig::new(DetectionConfig::default()).unwrap());
        let grid = Arc::new(SectorGrid::new(3, 3).unwrap());
        ShotPipeline::new(config, grid).unwrap()
    }

    fn frame(index: u64, flash: Option<(u32, u32, [u8; 3])>) -> Frame {
        let mut image = RgbImage::from_pixel(120, 90, Rgb([60, 60, 60]));
        if let Some((cx, cy, color)) = flash {
            for y in cy - 2..=cy + 2 {
                for x in cx - 2..=cx + 2 {
                    image.put_pixel(x, y, Rgb(color));
                }
            }
        }
        Frame::from_image(image, index, Duration::from_millis(index * 33))
    }

    #[test]
    fn flash_becomes_one_shot() {
        let mut pipeline = pipeline();
        let mut shots = Vec::new();
        for i in 0..10 {
            let flash = (3..=4).contains(&i).then_some((40, 50, [250, 40, 40]));
            shots.extend(pipeline.process_frame(&frame(i, flash)).shots);
        }
        shots.extend(pipeline.finish());

        assert_eq!(shots.len(), 1);
        assert_eq!(shots[0].color, ShotColor::Red);
        assert_eq!(shots[0].frame_index, 3);
        assert_eq!(shots[0].duration_frames, 2);
        assert!((shots[0].x - 40.0).abs() < 1e-6);
    }

    #[test]
    fn global_change_is_dropped_as_motion() {
        let mut pipeline = pipeline();
        pipeline.process_frame(&frame(0, None));
        let red_wash = RgbImage::from_pixel(120, 90, Rgb([250, 40, 40]));
        let report = pipeline.process_frame(&Frame::from_image(red_wash, 1, Duration::ZERO));
        assert!(report.rejected_for_motion);
        assert_eq!(report.candidates, 0);
        assert!(pipeline.finish().is_empty());
    }

    #[test]
    fn mismatched_grid_is_rejected() {
        let config = Arc::new(SharedConfig::new(DetectionConfig::default()).unwrap());
        let grid = Arc::new(SectorGrid::new(4, 4).unwrap());
        assert!(ShotPipeline::new(config, grid).is_err());
    }

    #[test]
    fn debug_mode_dumps_candidate_maps() {
        let dir = tempfile::tempdir().unwrap();
        let config = Arc::new(SharedConfig::new(DetectionConfig::default().with_debug(true)).unwrap());
        let grid = Arc::new(SectorGrid::new(3, 3).unwrap());
        let mut pipeline = ShotPipeline::new(config, grid)
            .unwrap()
            .with_debug_dump(dir.path());

        pipeline.process_frame(&frame(0, None));
        pipeline.process_frame(&frame(1, Some((60, 45, [40, 250, 40]))));
        assert!(dir.path().join("candidates_000001.png").exists());
    }

    #[test]
    fn reset_clears_open_flashes() {
        let mut pipeline = pipeline();
        pipeline.process_frame(&frame(0, None));
        pipeline.process_frame(&frame(1, Some((40, 50, [250, 40, 40]))));
        pipeline.reset();
        assert!(pipeline.finish().is_empty());
        assert_eq!(pipeline.background().frames_seen(), 0);
    }
}
