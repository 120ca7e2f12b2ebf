// THEORY:
// A `ShotCandidate` is the spatial layer's summary of one connected cluster of
// candidate pixels in a single frame. It turns a scatter of flagged pixels into
// one object with a sub-pixel centroid, an area, a bounding box and a color
// verdict.
//
// Key architectural principles:
// 1.  **Snapshot, not history**: a candidate knows the frame it came from and
//     nothing about the frames before it. Stitching candidates across frames
//     into one shot is the deduplicator's job.
// 2.  **Stateless Data Container**: like `Pixel` and `Frame`, this struct only
//     carries data. The extractor builds it; the deduplicator consumes it.

use crate::core_modules::shot::ShotColor;
use std::time::Duration;

/// A simple struct to represent a pixel coordinate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: u32,
    pub y: u32,
}

/// A single, spatially coherent flash candidate detected in one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct ShotCandidate {
    /// Identifier unique within its frame only.
    pub id: u64,
    /// Centroid weighted by each pixel's brightness rise.
    pub x: f64,
    pub y: f64,
    pub pixel_count: usize,
    /// Top-left and bottom-right pixel of the enclosing box, inclusive.
    pub bounding_box: (Point, Point),
    pub color: ShotColor,
    /// Summed positive red rise over the cluster.
    pub red_energy: f64,
    /// Summed positive green rise over the cluster.
    pub green_energy: f64,
    pub frame_index: u64,
    pub timestamp: Duration,
}

impl ShotCandidate {
    pub fn width(&self) -> u32 {
        self.bounding_box.1.x - self.bounding_box.0.x + 1
    }

    pub fn height(&self) -> u32 {
        self.bounding_box.1.y - self.bounding_box.0.y + 1
    }

    /// Long side over short side of the bounding box.
    pub fn aspect_ratio(&self) -> f64 {
        let (w, h) = (self.width() as f64, self.height() as f64);
        w.max(h) / w.min(h)
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        ((self.x - x).powi(2) + (self.y - y).powi(2)).sqrt()
    }
}
