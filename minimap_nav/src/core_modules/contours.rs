// THEORY:
// The `contours` module is the spatial grouping layer of the detector. It turns a
// cleaned binary `Mask` into a list of `Blob`s, one per 8-connected region.
//
// Algorithm steps:
// 1.  **Labelling**: A raster scan seeds a flood fill at every unvisited mask
//     pixel. The fill gathers the region's pixels, bounding box, centroid and
//     mean saturation/value. Seeds are found in raster order, so blob ids follow
//     discovery order, which the detector relies on for deterministic ties.
// 2.  **Boundary Tracing**: Starting at the region's first (top-most, left-most)
//     pixel, a Moore-neighbour trace walks the outer boundary clockwise until it
//     re-enters the start pixel along the first edge.
// 3.  **Shape Metrics**: The traced chain gives the perimeter (unit steps along
//     axes, √2 along diagonals) and the polygon area (shoelace). Circularity is
//     `4πA / P²`; bounding-box extents give diameter and aspect ratio.

use crate::core_modules::detection::{Blob, BoundingBox};
use crate::core_modules::hsv::hsv::Hsv;
use crate::core_modules::mask::Mask;

/// Clockwise on screen (y grows downwards), starting east.
const DIRECTIONS: [(i64, i64); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];
const WEST: usize = 4;

/// Finds every 8-connected region in `mask`. `hsv` must be the buffer the mask
/// was built from; it supplies the colour statistics.
pub fn find_blobs(mask: &Mask, hsv: &[Hsv]) -> Vec<Blob> {
    let (w, h) = (mask.width as usize, mask.height as usize);
    let mut labels = vec![0usize; w * h];
    let mut blobs = Vec::new();

    for y in 0..h {
        for x in 0..w {
            if labels[y * w + x] != 0 || !mask.get(x as u32, y as u32) {
                continue;
            }
            let label = blobs.len() + 1;
            let pixels = flood_fill(mask, &mut labels, (x, y), label);
            blobs.push(build_blob(label - 1, &pixels, &labels, label, w, h, hsv));
        }
    }
    blobs
}

/// Gathers all pixels 8-connected to `seed`, marking them with `label`.
fn flood_fill(mask: &Mask, labels: &mut [usize], seed: (usize, usize), label: usize) -> Vec<(usize, usize)> {
    let (w, h) = (mask.width as i64, mask.height as i64);
    let mut pixels = Vec::new();
    let mut stack = vec![seed];
    labels[seed.1 * w as usize + seed.0] = label;

    while let Some((cx, cy)) = stack.pop() {
        pixels.push((cx, cy));
        for (dx, dy) in DIRECTIONS {
            let (nx, ny) = (cx as i64 + dx, cy as i64 + dy);
            if nx < 0 || ny < 0 || nx >= w || ny >= h {
                continue;
            }
            let idx = ny as usize * w as usize + nx as usize;
            if labels[idx] == 0 && mask.get(nx as u32, ny as u32) {
                labels[idx] = label;
                stack.push((nx as usize, ny as usize));
            }
        }
    }
    pixels
}

fn build_blob(
    id: usize,
    pixels: &[(usize, usize)],
    labels: &[usize],
    label: usize,
    w: usize,
    h: usize,
    hsv: &[Hsv],
) -> Blob {
    let mut bbox = BoundingBox {
        min_x: u32::MAX,
        min_y: u32::MAX,
        max_x: 0,
        max_y: 0,
    };
    let (mut sum_x, mut sum_y) = (0.0, 0.0);
    let (mut sum_s, mut sum_v) = (0.0, 0.0);
    // raster-first pixel: smallest y, then smallest x
    let mut start = pixels[0];

    for &(x, y) in pixels {
        bbox.min_x = bbox.min_x.min(x as u32);
        bbox.min_y = bbox.min_y.min(y as u32);
        bbox.max_x = bbox.max_x.max(x as u32);
        bbox.max_y = bbox.max_y.max(y as u32);
        sum_x += x as f64;
        sum_y += y as f64;
        let px = hsv[y * w + x];
        sum_s += px.saturation_normalized();
        sum_v += px.value_normalized();
        if (y, x) < (start.1, start.0) {
            start = (x, y);
        }
    }

    let n = pixels.len() as f64;
    let contour = trace_boundary(labels, label, w, h, start);
    let perimeter = chain_length(&contour);
    let contour_area = polygon_area(&contour);
    let circularity = if perimeter > 0.0 {
        (4.0 * std::f64::consts::PI * contour_area / (perimeter * perimeter)).clamp(0.0, 1.0)
    } else {
        0.0
    };
    let (bw, bh) = (bbox.width() as f64, bbox.height() as f64);

    Blob {
        id,
        bounding_box: bbox,
        pixel_count: pixels.len(),
        centroid: (sum_x / n, sum_y / n),
        contour_area,
        perimeter,
        circularity,
        diameter: (bw + bh) / 2.0,
        aspect_ratio: bw / bh,
        mean_saturation: sum_s / n,
        mean_value: sum_v / n,
    }
}

/// Moore-neighbour trace of the outer boundary. The returned chain starts and
/// ends at `start`; an isolated pixel yields just `[start]`.
pub fn trace_boundary(labels: &[usize], label: usize, w: usize, h: usize, start: (usize, usize)) -> Vec<(i64, i64)> {
    let inside = |x: i64, y: i64| -> bool {
        x >= 0 && y >= 0 && (x as usize) < w && (y as usize) < h && labels[y as usize * w + x as usize] == label
    };

    let origin = (start.0 as i64, start.1 as i64);
    let mut contour = vec![origin];
    let mut current = origin;
    // the west neighbour of a raster-first pixel is always background
    let mut backtrack = WEST;
    let mut first_step: Option<(i64, i64)> = None;
    let step_limit = 4 * w * h + 8;

    for _ in 0..step_limit {
        let mut next = None;
        for k in 0..8 {
            let d = (backtrack + k) % 8;
            let (dx, dy) = DIRECTIONS[d];
            let candidate = (current.0 + dx, current.1 + dy);
            if inside(candidate.0, candidate.1) {
                next = Some((candidate, d));
                break;
            }
        }

        let Some((candidate, d)) = next else {
            break;
        };

        if current == origin {
            match first_step {
                None => first_step = Some(candidate),
                Some(first) if first == candidate => break,
                Some(_) => {}
            }
        }

        contour.push(candidate);
        current = candidate;
        // resume the clockwise sweep at the background pixel examined just
        // before `candidate`, expressed relative to the new position
        backtrack = if d % 2 == 0 { (d + 6) % 8 } else { (d + 5) % 8 };
    }
    contour
}

fn chain_length(contour: &[(i64, i64)]) -> f64 {
    contour
        .windows(2)
        .map(|pair| {
            let (dx, dy) = (pair[1].0 - pair[0].0, pair[1].1 - pair[0].1);
            if dx != 0 && dy != 0 {
                std::f64::consts::SQRT_2
            } else {
                1.0
            }
        })
        .sum()
}

fn polygon_area(contour: &[(i64, i64)]) -> f64 {
    let twice: i64 = contour
        .windows(2)
        .map(|pair| pair[0].0 * pair[1].1 - pair[1].0 * pair[0].1)
        .sum();
    (twice as f64 / 2.0).abs()
}
