// THEORY:
// Data containers passed between the detector and everything downstream.
//
// 1.  `Blob` is a "dumb" snapshot of one connected region of a colour mask in a
//     single frame: bounding box, centroid, shape metrics and mean colour. It has
//     no memory of previous frames.
// 2.  `DetectionResult` is what the rest of the engine consumes: the selected
//     primary marker (the controlled agent) and every surviving secondary marker.
//     Coordinates are relative to the cropped minimap, (0, 0) at its top-left.
//     When `detected` is false the coordinates carry no meaning, which is why
//     consumers go through `PrimaryMarker::position()`.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// A pixel position on the minimap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: Position) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Inclusive pixel bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
}

impl BoundingBox {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn overlaps(&self, other: &BoundingBox) -> bool {
        self.min_x <= other.max_x
            && other.min_x <= self.max_x
            && self.min_y <= other.max_y
            && other.min_y <= self.max_y
    }
}

/// One connected region of a colour mask within a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    /// Discovery order within the frame (raster scan). Not persistent.
    pub id: usize,
    pub bounding_box: BoundingBox,
    pub pixel_count: usize,
    /// Mean of the member pixel coordinates.
    pub centroid: (f64, f64),
    /// Polygon area enclosed by the traced outer contour.
    pub contour_area: f64,
    /// Length of the traced outer contour.
    pub perimeter: f64,
    /// `4πA / P²`, clamped to 0.0..=1.0.
    pub circularity: f64,
    /// Mean of the bounding-box width and height.
    pub diameter: f64,
    /// Bounding-box width over height.
    pub aspect_ratio: f64,
    /// Mean HSV saturation of the member pixels, 0.0..=1.0.
    pub mean_saturation: f64,
    /// Mean HSV value of the member pixels, 0.0..=1.0.
    pub mean_value: f64,
}

/// The controlled agent's marker.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PrimaryMarker {
    pub detected: bool,
    pub x: i32,
    pub y: i32,
    pub confidence: f64,
}

impl PrimaryMarker {
    pub fn lost() -> Self {
        Self::default()
    }

    pub fn at(position: Position, confidence: f64) -> Self {
        Self {
            detected: true,
            x: position.x,
            y: position.y,
            confidence,
        }
    }

    /// The marker position, only when it was actually detected.
    pub fn position(&self) -> Option<Position> {
        self.detected.then(|| Position::new(self.x, self.y))
    }
}

/// Every other marker on the minimap. Existence and count only.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SecondaryMarkers {
    pub detected: bool,
    pub count: usize,
    pub positions: Vec<Position>,
}

impl SecondaryMarkers {
    pub fn from_positions(positions: Vec<Position>) -> Self {
        Self {
            detected: !positions.is_empty(),
            count: positions.len(),
            positions,
        }
    }
}

/// The detector's output for one frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DetectionResult {
    pub primary: PrimaryMarker,
    pub secondary: SecondaryMarkers,
    /// Milliseconds since the Unix epoch.
    pub timestamp_ms: u64,
}

impl DetectionResult {
    pub fn new(primary: PrimaryMarker, secondary: SecondaryMarkers) -> Self {
        Self {
            primary,
            secondary,
            timestamp_ms: now_millis(),
        }
    }

    /// A result carrying only a detected primary marker. Handy for feeding
    /// positions from simulations and tests.
    pub fn at(position: Position) -> Self {
        Self::new(PrimaryMarker::at(position, 1.0), SecondaryMarkers::default())
    }

    pub fn lost() -> Self {
        Self::new(PrimaryMarker::lost(), SecondaryMarkers::default())
    }

    pub fn player_position(&self) -> Option<Position> {
        self.primary.position()
    }
}

pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn undetected_primary_exposes_no_position() {
        let marker = PrimaryMarker { detected: false, x: 40, y: 12, confidence: 0.9 };
        assert_eq!(marker.position(), None);
        assert_eq!(PrimaryMarker::at(Position::new(3, 4), 0.5).position(), Some(Position::new(3, 4)));
    }

    #[test]
    fn bounding_box_overlap() {
        let a = BoundingBox { min_x: 0, min_y: 0, max_x: 4, max_y: 4 };
        let b = BoundingBox { min_x: 4, min_y: 4, max_x: 8, max_y: 8 };
        let c = BoundingBox { min_x: 5, min_y: 0, max_x: 8, max_y: 3 };
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert_eq!(a.width(), 5);
    }

    #[test]
    fn secondary_markers_count_positions() {
        let markers = SecondaryMarkers::from_positions(vec![Position::new(1, 1), Position::new(5, 5)]);
        assert!(markers.detected);
        assert_eq!(markers.count, 2);
        assert!(!SecondaryMarkers::from_positions(Vec::new()).detected);
    }
}
