// THEORY:
// A `Frame` is the uniform currency of the pipeline: a tightly packed RGB8
// buffer plus the two temporal coordinates every later stage needs, the
// sequence index and the capture offset from the start of the session. Whatever
// the frame source produced (decoded stills, camera buffers, RGBA from a GUI
// toolkit) is normalized into this shape once, at the edge.
//
// Frames are immutable after construction and owned by whichever stage is
// currently working on them.

use crate::core_modules::pixel::pixel::{CHANNELS, Pixel};
use crate::error::{DetectionError, Result};
use image::RgbImage;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    width: u32,
    height: u32,
    data: Vec<u8>,
    index: u64,
    timestamp: Duration,
}

impl Frame {
    pub fn from_image(image: RgbImage, index: u64, timestamp: Duration) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            data: image.into_raw(),
            index,
            timestamp,
        }
    }

    /// Wraps a packed RGB8 buffer. A length mismatch is a corrupt unit of video.
    pub fn from_rgb(
        width: u32,
        height: u32,
        data: Vec<u8>,
        index: u64,
        timestamp: Duration,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(DetectionError::corrupt(
                "rgb buffer",
                format!("expected {expected} bytes for {width}x{height}, got {}", data.len()),
            ));
        }
        Ok(Self {
            width,
            height,
            data,
            index,
            timestamp,
        })
    }

    /// Drops the alpha channel of a packed RGBA8 buffer.
    pub fn from_rgba(
        width: u32,
        height: u32,
        rgba: &[u8],
        index: u64,
        timestamp: Duration,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if rgba.len() != expected {
            return Err(DetectionError::corrupt(
                "rgba buffer",
                format!("expected {expected} bytes for {width}x{height}, got {}", rgba.len()),
            ));
        }
        let data = rgba
            .chunks_exact(4)
            .flat_map(|px| [px[0], px[1], px[2]])
            .collect();
        Self::from_rgb(width, height, data, index, timestamp)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn pixel(&self, x: u32, y: u32) -> Pixel {
        let offset = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Pixel::from(&self.data[offset..offset + CHANNELS])
    }

    /// Average Rec. 601 luminance over the whole frame.
    pub fn mean_luminance(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        let total: f64 = self
            .data
            .chunks_exact(CHANNELS)
            .map(|px| Pixel::from(px).luminance() as f64)
            .sum();
        total / self.pixel_count() as f64
    }
}
