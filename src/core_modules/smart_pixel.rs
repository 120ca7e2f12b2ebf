// THEORY:
// The `SmartPixel` module provides the comparative half of pixel analysis. It
// wraps a "dumb" `Pixel` from the current frame and measures it against the
// background model's estimate for the same location.
//
// Key architectural principles:
// 1.  **Comparative Analysis**: `deviation_from` only makes sense against a
//     baseline. The background estimate keeps f32 channels so slow drift is not
//     lost to rounding.
// 2.  **Multiple "Lenses"**: the rise of the brightest channel (HSV value)
//     decides *whether* something flashed. The positive red/green rise decides
//     *what color* it was, and the pixel's own balance decides whether it looks
//     like a laser at all.

pub mod smart_pixel {
    use crate::core_modules::pixel::pixel::{Dominance, Pixel};
    use crate::core_modules::shot::LaserColor;

    /// The background model's running estimate for one pixel.
    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    pub struct BackgroundPixel {
        pub red: f32,
        pub green: f32,
        pub blue: f32,
    }

    impl From<Pixel> for BackgroundPixel {
        fn from(pixel: Pixel) -> Self {
            Self {
                red: pixel.red as f32,
                green: pixel.green as f32,
                blue: pixel.blue as f32,
            }
        }
    }

    impl BackgroundPixel {
        pub fn value(&self) -> f32 {
            self.red.max(self.green).max(self.blue)
        }

        /// Exponential decay toward `pixel` at `rate` in (0, 1).
        #[inline]
        pub fn blend_toward(&mut self, pixel: Pixel, rate: f32) {
            self.red += (pixel.red as f32 - self.red) * rate;
            self.green += (pixel.green as f32 - self.green) * rate;
            self.blue += (pixel.blue as f32 - self.blue) * rate;
        }
    }

    /// How far a pixel rose above its background.
    #[derive(Debug, Clone, Copy, PartialEq, Default)]
    pub struct Deviation {
        /// Signed change of the brightest channel.
        pub brightness: f32,
        /// Positive part of the red channel change.
        pub red_energy: f32,
        /// Positive part of the green channel change.
        pub green_energy: f32,
    }

    /// Whether a pixel's own color balance looks like a laser.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum LaserHue {
        Red,
        Green,
        /// Every channel clipped: the sensor saw the core of a flash.
        Overexposed,
    }

    impl LaserHue {
        pub fn matches(self, color: LaserColor) -> bool {
            matches!(
                (self, color),
                (LaserHue::Red, LaserColor::Red) | (LaserHue::Green, LaserColor::Green)
            )
        }
    }

    /// An analytical tool that wraps a `Pixel` to compare it against a baseline.
    pub struct SmartPixel {
        pub pixel: Pixel,
    }

    impl SmartPixel {
        pub fn new(pixel: Pixel) -> Self {
            Self { pixel }
        }

        pub fn deviation_from(&self, background: &BackgroundPixel) -> Deviation {
            Deviation {
                brightness: self.pixel.value() as f32 - background.value(),
                red_energy: (self.pixel.red as f32 - background.red).max(0.0),
                green_energy: (self.pixel.green as f32 - background.green).max(0.0),
            }
        }

        pub fn laser_hue(&self, dominance_margin: u8, saturation_level: u8) -> Option<LaserHue> {
            if self.pixel.is_saturated(saturation_level) {
                return Some(LaserHue::Overexposed);
            }
            match self.pixel.dominance(dominance_margin) {
                Dominance::Red => Some(LaserHue::Red),
                Dominance::Green => Some(LaserHue::Green),
                Dominance::Balanced => None,
            }
        }
    }
}
