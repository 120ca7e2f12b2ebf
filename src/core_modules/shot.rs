// THEORY:
// A `Shot` is the only thing the engine hands to the outside world. Everything
// upstream (candidate pixels, blobs, tracked flashes) exists to decide *that* a
// laser pulse happened, *where*, in *what color* and *when*. What the pulse hit
// is somebody else's problem.
//
// A shot is immutable once finalized and moves into the listener on dispatch.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// A laser color the engine can be told to ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaserColor {
    Red,
    Green,
}

/// Color classification of a detected flash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShotColor {
    Red,
    Green,
    /// Neither channel won by the classification margin.
    Unknown,
}

impl ShotColor {
    pub fn laser(self) -> Option<LaserColor> {
        match self {
            ShotColor::Red => Some(LaserColor::Red),
            ShotColor::Green => Some(LaserColor::Green),
            ShotColor::Unknown => None,
        }
    }
}

impl From<LaserColor> for ShotColor {
    fn from(color: LaserColor) -> Self {
        match color {
            LaserColor::Red => ShotColor::Red,
            LaserColor::Green => ShotColor::Green,
        }
    }
}

impl fmt::Display for ShotColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShotColor::Red => write!(f, "red"),
            ShotColor::Green => write!(f, "green"),
            ShotColor::Unknown => write!(f, "unknown"),
        }
    }
}

/// A finalized, deduplicated detection event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shot {
    /// Centroid in frame pixel coordinates, sub-pixel precision.
    pub x: f64,
    pub y: f64,
    pub color: ShotColor,
    /// Sequence index of the first frame the flash was seen in.
    pub frame_index: u64,
    /// Offset of that frame from the start of the session.
    pub timestamp: Duration,
    /// Number of frames the flash spanned.
    pub duration_frames: u32,
    /// Radius used by front-ends when drawing a marker for this shot.
    pub marker_radius: u32,
}

impl Shot {
    pub fn timestamp_ms(&self) -> u128 {
        self.timestamp.as_millis()
    }

    pub fn distance_to(&self, x: f64, y: f64) -> f64 {
        ((self.x - x).powi(2) + (self.y - y).powi(2)).sqrt()
    }
}

impl fmt::Display for Shot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} shot at ({:.1}, {:.1}) frame {} t={}ms ({} frames)",
            self.color,
            self.x,
            self.y,
            self.frame_index,
            self.timestamp_ms(),
            self.duration_frames
        )
    }
}
