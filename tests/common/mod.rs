#![allow(dead_code)]

use image::{Rgb, RgbImage};
use laser_vision::{
    CameraEvent, DetectionConfig, EventRecorder, FrameSource, SectorGrid, Session, SessionStatus,
    SharedConfig, Shot, ShotCollector,
};
use std::sync::Arc;

pub const WIDTH: u32 = 640;
pub const HEIGHT: u32 = 480;
pub const GRAY: u8 = 60;
pub const RED: [u8; 3] = [250, 40, 40];
pub const GREEN: [u8; 3] = [40, 250, 60];

/// A rectangle of laser light. Its centroid is the rectangle's center.
#[derive(Debug, Clone, Copy)]
pub struct Spot {
    pub x0: u32,
    pub y0: u32,
    pub width: u32,
    pub height: u32,
    pub color: [u8; 3],
}

impl Spot {
    /// A `size` x `size` square centered on integer coordinates (`size` odd).
    pub fn centered(x: u32, y: u32, size: u32, color: [u8; 3]) -> Self {
        Self {
            x0: x - size / 2,
            y0: y - size / 2,
            width: size,
            height: size,
            color,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x0 as f64 + (self.width - 1) as f64 / 2.0,
            self.y0 as f64 + (self.height - 1) as f64 / 2.0,
        )
    }
}

/// Mid-gray room with a little deterministic sensor noise.
pub fn background(seed: u64) -> RgbImage {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    RgbImage::from_fn(WIDTH, HEIGHT, |_, _| {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        let jitter = ((state >> 33) % 5) as u8;
        let level = GRAY - 2 + jitter;
        Rgb([level, level, level])
    })
}

pub fn paint(image: &mut RgbImage, spot: &Spot) {
    for y in spot.y0..spot.y0 + spot.height {
        for x in spot.x0..spot.x0 + spot.width {
            image.put_pixel(x, y, Rgb(spot.color));
        }
    }
}

/// `frames` frames; `spots_at(index)` lists the spots lit in that frame.
pub fn sequence(frames: u64, spots_at: impl Fn(u64) -> Vec<Spot>) -> Vec<RgbImage> {
    (0..frames)
        .map(|index| {
            let mut image = background(index);
            for spot in spots_at(index) {
                paint(&mut image, &spot);
            }
            image
        })
        .collect()
}

pub struct Outcome {
    pub shots: Vec<Shot>,
    pub events: Vec<CameraEvent>,
    pub status: SessionStatus,
}

pub async fn run_source<S: FrameSource + 'static>(
    source: S,
    config: DetectionConfig,
    grid: Arc<SectorGrid>,
) -> Outcome {
    let shared = Arc::new(SharedConfig::new(config).unwrap());
    let collector = ShotCollector::new();
    let recorder = EventRecorder::new();
    let session = Session::start(
        source,
        shared,
        grid,
        Arc::new(collector.clone()),
        Arc::new(recorder.clone()),
    )
    .unwrap();
    let status = session.wait_for_completion().await;
    Outcome {
        shots: collector.shots(),
        events: recorder.events(),
        status,
    }
}

pub async fn run_frames(images: Vec<RgbImage>, config: DetectionConfig) -> Outcome {
    let grid = Arc::new(SectorGrid::new(config.sector_rows, config.sector_columns).unwrap());
    run_source(
        laser_vision::MemorySource::new("synthetic", images),
        config,
        grid,
    )
    .await
}
