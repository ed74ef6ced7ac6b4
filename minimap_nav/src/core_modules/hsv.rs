// THEORY (single-pixel colour space):
// The `hsv` module is the most fundamental unit of the marker detector. It turns
// one BGR pixel into the hue/saturation/value triple the colour masks are defined
// in, with no knowledge of neighbours. Anything that needs another pixel (masks,
// morphology, contours) lives in higher modules.
//
// Scale: values follow the 8-bit convention used by common vision toolkits so
// ranges tuned elsewhere can be pasted in unchanged:
//   • hue:        0..=179 (degrees / 2)
//   • saturation: 0..=255 (chroma / value)
//   • value:      0..=255 (max channel)
//
// Hue wraparound: red sits on both ends of the hue circle, which is why the
// secondary marker mask is the union of two ranges (`HsvRange` pairs).

pub mod hsv {
    use serde::{Deserialize, Serialize};

    pub type Hue = u8;
    pub type Saturation = u8;
    pub type Value = u8;

    /// A pixel in 8-bit HSV.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Hsv {
        pub h: Hue,
        pub s: Saturation,
        pub v: Value,
    }

    impl Hsv {
        /// Converts one BGR pixel.
        #[inline]
        pub fn from_bgr(blue: u8, green: u8, red: u8) -> Self {
            let maximum_channel = red.max(green).max(blue);
            let minimum_channel = red.min(green).min(blue);
            let chroma = (maximum_channel - minimum_channel) as f32;

            let v = maximum_channel;
            let s = if maximum_channel == 0 {
                0
            } else {
                (chroma * 255.0 / maximum_channel as f32).round() as u8
            };

            if chroma <= 0.0 {
                return Hsv { h: 0, s, v };
            }

            let (r, g, b) = (red as f32, green as f32, blue as f32);
            let (base_difference, sector_offset) = if maximum_channel == red {
                (g - b, 0.0)
            } else if maximum_channel == green {
                (b - r, 2.0)
            } else {
                (r - g, 4.0)
            };

            let mut hue_degrees = (base_difference / chroma + sector_offset) * 60.0;
            if hue_degrees < 0.0 {
                hue_degrees += 360.0;
            }
            let half = (hue_degrees / 2.0).round() as u16;
            Hsv {
                h: if half >= 180 { 0 } else { half as u8 },
                s,
                v,
            }
        }

        /// Saturation normalized to 0.0..=1.0.
        pub fn saturation_normalized(&self) -> f64 {
            self.s as f64 / 255.0
        }

        /// Value normalized to 0.0..=1.0.
        pub fn value_normalized(&self) -> f64 {
            self.v as f64 / 255.0
        }
    }

    /// An inclusive box in HSV space.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct HsvRange {
        pub lower: [u8; 3],
        pub upper: [u8; 3],
    }

    impl HsvRange {
        pub const fn new(lower: [u8; 3], upper: [u8; 3]) -> Self {
            Self { lower, upper }
        }

        #[inline]
        pub fn contains(&self, px: Hsv) -> bool {
            px.h >= self.lower[0]
                && px.h <= self.upper[0]
                && px.s >= self.lower[1]
                && px.s <= self.upper[1]
                && px.v >= self.lower[2]
                && px.v <= self.upper[2]
        }
    }

    /// Converts a whole interleaved BGR buffer.
    pub fn convert_bgr_buffer(data: &[u8]) -> Vec<Hsv> {
        data.chunks_exact(3)
            .map(|px| Hsv::from_bgr(px[0], px[1], px[2]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::hsv::*;

    #[test]
    fn primary_colours_land_on_expected_hues() {
        // pure red, green, blue in BGR order
        assert_eq!(Hsv::from_bgr(0, 0, 255), Hsv { h: 0, s: 255, v: 255 });
        assert_eq!(Hsv::from_bgr(0, 255, 0), Hsv { h: 60, s: 255, v: 255 });
        assert_eq!(Hsv::from_bgr(255, 0, 0), Hsv { h: 120, s: 255, v: 255 });
    }

    #[test]
    fn yellow_is_hue_thirty() {
        let px = Hsv::from_bgr(0, 255, 255);
        assert_eq!(px.h, 30);
        assert_eq!(px.s, 255);
    }

    #[test]
    fn greys_have_no_saturation() {
        let px = Hsv::from_bgr(90, 90, 90);
        assert_eq!(px, Hsv { h: 0, s: 0, v: 90 });
        assert_eq!(Hsv::from_bgr(0, 0, 0), Hsv::default());
    }

    #[test]
    fn magenta_red_wraps_near_top_of_hue_scale() {
        // r=255, b=30: hue just below 360 degrees
        let px = Hsv::from_bgr(30, 0, 255);
        assert!(px.h >= 170, "hue was {}", px.h);
    }

    #[test]
    fn range_is_inclusive() {
        let range = HsvRange::new([20, 100, 100], [35, 255, 255]);
        assert!(range.contains(Hsv { h: 20, s: 100, v: 100 }));
        assert!(range.contains(Hsv { h: 35, s: 255, v: 255 }));
        assert!(!range.contains(Hsv { h: 36, s: 200, v: 200 }));
    }
}
