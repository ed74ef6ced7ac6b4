// THEORY:
// The `BgrImage` is the raw sensory input of the engine: a small, owned,
// interleaved BGR buffer holding the cropped minimap. Frame acquisition and the
// choice of crop live outside the engine, so this module only offers what the
// detector and the tester need: a length-checked constructor, conversion from
// the `image` crate's RGB buffers, and a bounds-clamped crop.

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::error::{NavError, Result};

pub const CHANNELS: usize = 3;

/// A rectangular area of a larger frame, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// An interleaved 8-bit BGR image.
#[derive(Debug, Clone, PartialEq)]
pub struct BgrImage {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

impl BgrImage {
    /// A black image of the given size.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![0u8; width as usize * height as usize * CHANNELS],
        }
    }

    /// Wraps an existing BGR buffer, rejecting buffers of the wrong length.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * CHANNELS;
        if data.len() != expected {
            return Err(NavError::InvalidConfiguration(format!(
                "BGR buffer of {} bytes does not match {}x{} ({} bytes)",
                data.len(),
                width,
                height,
                expected
            )));
        }
        Ok(Self { width, height, data })
    }

    /// Converts an `image` RGB buffer by swapping the red and blue channels.
    pub fn from_rgb_image(rgb: &RgbImage) -> Self {
        let mut data = Vec::with_capacity(rgb.as_raw().len());
        for px in rgb.pixels() {
            data.extend_from_slice(&[px[2], px[1], px[0]]);
        }
        Self {
            width: rgb.width(),
            height: rgb.height(),
            data,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Returns the `[b, g, r]` triple at `(x, y)`.
    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = (y as usize * self.width as usize + x as usize) * CHANNELS;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    #[inline]
    pub fn put_pixel(&mut self, x: u32, y: u32, bgr: [u8; 3]) {
        let i = (y as usize * self.width as usize + x as usize) * CHANNELS;
        self.data[i..i + CHANNELS].copy_from_slice(&bgr);
    }

    /// Copies out `region`, clamped to the image bounds. A region entirely
    /// outside the image yields an empty image.
    pub fn crop(&self, region: Region) -> BgrImage {
        let x0 = region.x.min(self.width);
        let y0 = region.y.min(self.height);
        let x1 = region.x.saturating_add(region.width).min(self.width);
        let y1 = region.y.saturating_add(region.height).min(self.height);
        let (w, h) = (x1 - x0, y1 - y0);

        let mut data = Vec::with_capacity(w as usize * h as usize * CHANNELS);
        for y in y0..y1 {
            let start = (y as usize * self.width as usize + x0 as usize) * CHANNELS;
            data.extend_from_slice(&self.data[start..start + w as usize * CHANNELS]);
        }
        BgrImage { width: w, height: h, data }
    }
}
