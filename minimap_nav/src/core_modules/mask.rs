// THEORY:
// A `Mask` is the binary view of the minimap for one marker class: every pixel
// is either "the right colour" or not. Masks are built from the HSV buffer by
// range tests and then cleaned with 3x3 morphology:
//   open  (erode → dilate) drops isolated speckles smaller than the kernel,
//   close (dilate → erode) fills pinholes inside markers.
// Pixels outside the image are ignored by the kernel rather than treated as
// background, so markers touching the border are not eaten away.

use crate::core_modules::hsv::hsv::{Hsv, HsvRange};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    pub width: u32,
    pub height: u32,
    data: Vec<bool>,
}

impl Mask {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            data: vec![false; width as usize * height as usize],
        }
    }

    /// Marks every pixel that falls inside any of `ranges`.
    pub fn from_ranges(hsv: &[Hsv], width: u32, height: u32, ranges: &[HsvRange]) -> Self {
        let data = hsv
            .iter()
            .map(|px| ranges.iter().any(|range| range.contains(*px)))
            .collect();
        Self { width, height, data }
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.data[y as usize * self.width as usize + x as usize]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, on: bool) {
        let i = y as usize * self.width as usize + x as usize;
        self.data[i] = on;
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|on| **on).count()
    }

    pub fn erode(&self) -> Mask {
        self.apply_kernel(Morph::Erode)
    }

    pub fn dilate(&self) -> Mask {
        self.apply_kernel(Morph::Dilate)
    }

    pub fn open(&self) -> Mask {
        self.erode().dilate()
    }

    pub fn close(&self) -> Mask {
        self.dilate().erode()
    }

    /// Open then close: the speckle filter applied before contour extraction.
    pub fn denoise(&self) -> Mask {
        self.open().close()
    }

    fn apply_kernel(&self, op: Morph) -> Mask {
        let (w, h) = (self.width as i64, self.height as i64);
        let mut out = Mask::new(self.width, self.height);
        for y in 0..h {
            for x in 0..w {
                let mut inside = 0u8;
                let mut on = 0u8;
                for dy in -1i64..=1 {
                    for dx in -1i64..=1 {
                        let (nx, ny) = (x + dx, y + dy);
                        if nx < 0 || ny < 0 || nx >= w || ny >= h {
                            continue;
                        }
                        inside += 1;
                        if self.get(nx as u32, ny as u32) {
                            on += 1;
                        }
                    }
                }
                let result = match op {
                    Morph::Erode => on == inside,
                    Morph::Dilate => on > 0,
                };
                out.set(x as u32, y as u32, result);
            }
        }
        out
    }
}

#[derive(Debug, Clone, Copy)]
enum Morph {
    Erode,
    Dilate,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(mask: &mut Mask, x0: u32, y0: u32, size: u32) {
        for y in y0..y0 + size {
            for x in x0..x0 + size {
                mask.set(x, y, true);
            }
        }
    }

    #[test]
    fn open_removes_speckles_but_keeps_markers() {
        let mut mask = Mask::new(20, 20);
        mask.set(2, 2, true);
        square(&mut mask, 10, 10, 5);
        let opened = mask.open();
        assert!(!opened.get(2, 2));
        assert_eq!(opened.count(), 25);
    }

    #[test]
    fn close_fills_pinholes() {
        let mut mask = Mask::new(20, 20);
        square(&mut mask, 5, 5, 7);
        mask.set(8, 8, false);
        let closed = mask.close();
        assert!(closed.get(8, 8));
        assert_eq!(closed.count(), 49);
    }

    #[test]
    fn border_pixels_survive_erosion() {
        let mut mask = Mask::new(6, 6);
        square(&mut mask, 0, 0, 4);
        assert!(mask.erode().get(0, 0));
    }
}
