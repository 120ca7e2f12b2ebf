pub mod image_helper {
    use crate::core_modules::background::CandidateMap;
    use crate::core_modules::frame::Frame;
    use crate::error::{DetectionError, Result};
    use image::ImageEncoder;
    use std::path::Path;

    /// Writes a packed RGB8 buffer as a PNG.
    pub fn save_rgb(path: impl AsRef<Path>, width: u32, height: u32, buffer: &[u8]) -> Result<()> {
        let expected = width as usize * height as usize * 3;
        if buffer.len() != expected {
            return Err(DetectionError::corrupt(
                "png export",
                format!("expected {expected} bytes for {width}x{height}, got {}", buffer.len()),
            ));
        }
        let output = std::io::BufWriter::new(std::fs::File::create(path)?);
        let encoder = image::codecs::png::PngEncoder::new(output);
        encoder.write_image(buffer, width, height, image::ExtendedColorType::Rgb8)?;
        Ok(())
    }

    pub fn save_frame(path: impl AsRef<Path>, frame: &Frame) -> Result<()> {
        save_rgb(path, frame.width(), frame.height(), frame.data())
    }

    /// Debug view of a candidate map: candidates in their dominant energy's
    /// color on black, everything else black.
    pub fn save_candidate_map(path: impl AsRef<Path>, map: &CandidateMap) -> Result<()> {
        let (width, height) = (map.width(), map.height());
        let mut buffer = vec![0u8; width as usize * height as usize * 3];
        for y in 0..height {
            for x in 0..width {
                let Some(deviation) = map.get(x, y) else {
                    continue;
                };
                let offset = (y as usize * width as usize + x as usize) * 3;
                let px = if deviation.red_energy >= deviation.green_energy {
                    [255, 64, 64]
                } else {
                    [64, 255, 64]
                };
                buffer[offset..offset + 3].copy_from_slice(&px);
            }
        }
        save_rgb(path, width, height, &buffer)
    }
}

#[cfg(test)]
mod tests {

    use super::image_helper::*;
    use crate::core_modules::background::CandidateMap;
    use crate::core_modules::frame::Frame;
    use crate::core_modules::smart_pixel::smart_pixel::Deviation;
    use std::time::Duration;

    #[test]
    fn save_gradient_file() {
        let dir = tempfile::tempdir().unwrap();
        let (width, height) = (64u32, 32u32);
        let mut buffer = vec![0u8; (width * height * 3) as usize];
        let mut intensity = 0u8;
        for px in buffer.chunks_mut(3) {
            px.fill(intensity);
            intensity = intensity.wrapping_add(1);
        }
        let frame = Frame::from_rgb(width, height, buffer, 0, Duration::ZERO).unwrap();
        let path = dir.path().join("gradient.png");

        save_frame(&path, &frame).expect("Error Saving File.");

        let loaded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(loaded.dimensions(), (width, height));
        assert_eq!(loaded.get_pixel(5, 0).0, [5, 5, 5]);
    }

    #[test]
    fn save_candidate_mask_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut map = CandidateMap::empty(10, 10);
        map.insert(
            3,
            4,
            Deviation {
                brightness: 90.0,
                red_energy: 0.0,
                green_energy: 90.0,
            },
        );
        let path = dir.path().join("mask.png");

        save_candidate_map(&path, &map).expect("Error Saving File.");

        let loaded = image::open(&path).unwrap().to_rgb8();
        assert_eq!(loaded.get_pixel(3, 4).0, [64, 255, 64]);
        assert_eq!(loaded.get_pixel(0, 0).0, [0, 0, 0]);
    }

    #[test]
    fn mismatched_buffer_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        assert!(save_rgb(dir.path().join("bad.png"), 4, 4, &[0u8; 10]).is_err());
    }
}
