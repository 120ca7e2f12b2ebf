// THEORY (1D Pixel Heuristics):
// The `Pixel` module is the most fundamental unit of the shot detector. It is a
// "dumb" data container for a single RGB pixel plus a few 1-dimensional
// heuristics: metrics computed from this pixel alone, with no knowledge of its
// neighbors in space or time. Anything that compares against the background
// belongs in `SmartPixel` (pairwise), and anything spatial in the extractor.
//
// Heuristic families (all single-pixel):
// - Brightness: luminance (Rec. 601), HSV value (max channel), raw channel sum
// - Color balance: which channel dominates and by how much
// - Exposure: whether the sensor clipped every channel (a blown-out laser core)

pub mod pixel {
    pub type Channel = u8;
    pub type Luminance = f32;
    pub type Sum = u16;

    pub const CHANNELS: usize = 3;

    /// A "dumb" data container representing a single RGB pixel.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Pixel {
        pub red: Channel,
        pub green: Channel,
        pub blue: Channel,
    }

    /// The channel that carries most of a pixel's energy.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub enum Dominance {
        Red,
        Green,
        /// No single channel wins by the margin.
        Balanced,
    }

    impl From<&[u8]> for Pixel {
        /// Reads the first three bytes as R, G, B. Extra bytes (alpha) are ignored.
        fn from(bytes: &[u8]) -> Self {
            Pixel::new(bytes[0], bytes[1], bytes[2])
        }
    }

    impl From<image::Rgb<u8>> for Pixel {
        fn from(rgb: image::Rgb<u8>) -> Self {
            Pixel::new(rgb.0[0], rgb.0[1], rgb.0[2])
        }
    }

    impl Pixel {
        pub const fn new(red: Channel, green: Channel, blue: Channel) -> Self {
            Pixel { red, green, blue }
        }

        /// Luminance estimate (Rec. 601 luma) on the 0..255 scale.
        pub fn luminance(&self) -> Luminance {
            luminance_of(self.red as f32, self.green as f32, self.blue as f32)
        }

        /// HSV value: the brightest channel. A laser saturates one channel long
        /// before it moves luminance much, so this is the flash detector's lens.
        pub fn value(&self) -> Channel {
            self.red.max(self.green).max(self.blue)
        }

        /// Fast brightness proxy: raw RGB channel sum.
        pub fn sum(&self) -> Sum {
            self.red as Sum + self.green as Sum + self.blue as Sum
        }

        /// Red or green must beat both other channels by `margin`.
        pub fn dominance(&self, margin: u8) -> Dominance {
            let margin = margin as i16;
            let (r, g, b) = (self.red as i16, self.green as i16, self.blue as i16);
            if r - g >= margin && r - b >= margin {
                Dominance::Red
            } else if g - r >= margin && g - b >= margin {
                Dominance::Green
            } else {
                Dominance::Balanced
            }
        }

        /// Every channel at or above `level`.
        pub fn is_saturated(&self, level: Channel) -> bool {
            self.red >= level && self.green >= level && self.blue >= level
        }
    }

    /// Rec. 601 weights, shared with the background model which stores f32 channels.
    #[inline]
    pub fn luminance_of(red: f32, green: f32, blue: f32) -> Luminance {
        0.299 * red + 0.587 * green + 0.114 * blue
    }
}
