// THEORY:
// The `BlobDetector` is the engine of the perception layer. It takes the cropped
// minimap (a few hundred pixels on a side) and reports where the controlled
// agent's marker is and where every other marker is.
//
// Key algorithm steps:
// 1.  **Colour Space**: BGR → HSV, so marker colours become simple boxes.
// 2.  **Masks**: one HSV range for the primary marker; the union of two ranges
//     for the secondary markers, whose red hue wraps around 0°/360°.
// 3.  **Denoise**: 3x3 open then close removes speckles and fills pinholes.
// 4.  **Contours**: connected regions and their traced outlines (`contours`).
// 5.  **Shape Filter**: diameter bounds, circularity and aspect ratio per class;
//     the primary filter is stricter because the agent marker is small and
//     uniform.
// 6.  **Primary Selection**: among survivors, the highest
//     `sizeScore(d) × saturation × value × circularity` wins. A crisp marker
//     away from the centre beats a washed-out one near it. Ties keep the
//     earliest blob in discovery order.
// 7.  **Secondary Markers**: every survivor is reported, minus later blobs whose
//     bounding box overlaps an earlier one. No identity across frames.
// 8.  **Smoothing**: the selected primary centroid goes through an EMA
//     (`smoothing`); the policy for frames without a primary is configurable.

use serde::{Deserialize, Serialize};

use crate::core_modules::bgr_image::BgrImage;
use crate::core_modules::contours;
use crate::core_modules::detection::{Blob, DetectionResult, Position, PrimaryMarker, SecondaryMarkers};
use crate::core_modules::hsv::hsv::{HsvRange, convert_bgr_buffer};
use crate::core_modules::mask::Mask;
use crate::core_modules::smoothing::{PositionSmoother, StalePolicy};

/// Shape gate applied to one marker class.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BlobFilter {
    pub min_diameter: f64,
    pub max_diameter: f64,
    pub min_circularity: f64,
    #[serde(default = "default_min_aspect")]
    pub min_aspect: f64,
    #[serde(default = "default_max_aspect")]
    pub max_aspect: f64,
}

impl BlobFilter {
    pub fn accepts(&self, blob: &Blob) -> bool {
        blob.diameter >= self.min_diameter
            && blob.diameter <= self.max_diameter
            && blob.circularity >= self.min_circularity
            && blob.aspect_ratio >= self.min_aspect
            && blob.aspect_ratio <= self.max_aspect
    }
}

/// Tunables for the detector. The defaults suit a yellow agent dot and red
/// markers on a typical game minimap.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_primary_range")]
    pub primary_range: HsvRange,
    #[serde(default = "default_secondary_ranges")]
    pub secondary_ranges: [HsvRange; 2],
    #[serde(default = "default_primary_filter")]
    pub primary_filter: BlobFilter,
    #[serde(default = "default_secondary_filter")]
    pub secondary_filter: BlobFilter,
    /// Diameters in this range score 1.0 for size.
    #[serde(default = "default_preferred_diameter")]
    pub preferred_diameter: (f64, f64),
    /// How quickly the size score falls off outside the preferred range, in px.
    #[serde(default = "default_size_decay")]
    pub size_decay: f64,
    #[serde(default = "default_ema_alpha")]
    pub ema_alpha: f64,
    #[serde(default)]
    pub stale_policy: StalePolicy,
    /// Per-frame budget; the detection feed warns when it is exceeded.
    #[serde(default = "default_soft_deadline_ms")]
    pub soft_deadline_ms: u64,
}

fn default_min_aspect() -> f64 {
    0.5
}
fn default_max_aspect() -> f64 {
    2.0
}
fn default_primary_range() -> HsvRange {
    HsvRange::new([20, 100, 100], [35, 255, 255])
}
fn default_secondary_ranges() -> [HsvRange; 2] {
    [
        HsvRange::new([0, 100, 100], [10, 255, 255]),
        HsvRange::new([170, 100, 100], [179, 255, 255]),
    ]
}
fn default_primary_filter() -> BlobFilter {
    BlobFilter {
        min_diameter: 4.0,
        max_diameter: 16.0,
        min_circularity: 0.71,
        min_aspect: default_min_aspect(),
        max_aspect: default_max_aspect(),
    }
}
fn default_secondary_filter() -> BlobFilter {
    BlobFilter {
        min_diameter: 4.0,
        max_diameter: 80.0,
        min_circularity: 0.65,
        min_aspect: default_min_aspect(),
        max_aspect: default_max_aspect(),
    }
}
fn default_preferred_diameter() -> (f64, f64) {
    (6.0, 10.0)
}
fn default_size_decay() -> f64 {
    4.0
}
fn default_ema_alpha() -> f64 {
    0.3
}
fn default_soft_deadline_ms() -> u64 {
    15
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            primary_range: default_primary_range(),
            secondary_ranges: default_secondary_ranges(),
            primary_filter: default_primary_filter(),
            secondary_filter: default_secondary_filter(),
            preferred_diameter: default_preferred_diameter(),
            size_decay: default_size_decay(),
            ema_alpha: default_ema_alpha(),
            stale_policy: StalePolicy::default(),
            soft_deadline_ms: default_soft_deadline_ms(),
        }
    }
}

/// Everything the detector found in one frame before smoothing. Useful for
/// overlays and tuning.
#[derive(Debug, Clone, Default)]
pub struct FrameAnalysis {
    pub primary_candidates: Vec<Blob>,
    pub secondary_markers: Vec<Blob>,
    /// Index into `primary_candidates` of the selected marker.
    pub selected: Option<usize>,
    pub selected_score: f64,
}

pub struct BlobDetector {
    config: DetectorConfig,
    smoother: PositionSmoother,
}

impl BlobDetector {
    pub fn new(config: DetectorConfig) -> Self {
        let smoother = PositionSmoother::new(config.ema_alpha, config.stale_policy);
        Self { config, smoother }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Runs the full pipeline on one region, including temporal smoothing.
    pub fn detect(&mut self, region: &BgrImage) -> DetectionResult {
        if region.is_empty() {
            self.smoother.reset();
            return DetectionResult::lost();
        }

        let analysis = self.analyze(region);
        let raw = analysis.selected.map(|i| {
            let blob = &analysis.primary_candidates[i];
            (blob.centroid, analysis.selected_score)
        });
        let primary = self.smoother.update(raw, (region.width, region.height));

        let positions = analysis
            .secondary_markers
            .iter()
            .map(|blob| centroid_pixel(blob))
            .collect();

        DetectionResult::new(primary, SecondaryMarkers::from_positions(positions))
    }

    /// The stateless part of detection: masks, contours, filters and selection.
    pub fn analyze(&self, region: &BgrImage) -> FrameAnalysis {
        if region.is_empty() {
            return FrameAnalysis::default();
        }

        // --- 1. Colour Space ---
        let hsv = convert_bgr_buffer(&region.data);

        // --- 2 & 3. Masks + Denoise ---
        let primary_mask =
            Mask::from_ranges(&hsv, region.width, region.height, &[self.config.primary_range]).denoise();
        let secondary_mask =
            Mask::from_ranges(&hsv, region.width, region.height, &self.config.secondary_ranges).denoise();

        // --- 4 & 5. Contours + Shape Filter ---
        let primary_candidates: Vec<Blob> = contours::find_blobs(&primary_mask, &hsv)
            .into_iter()
            .filter(|blob| self.config.primary_filter.accepts(blob))
            .collect();
        let secondary_candidates = contours::find_blobs(&secondary_mask, &hsv)
            .into_iter()
            .filter(|blob| self.config.secondary_filter.accepts(blob));

        // --- 6. Primary Selection ---
        let (selected, selected_score) = match self.select_primary(&primary_candidates) {
            Some((index, score)) => (Some(index), score),
            None => (None, 0.0),
        };

        // --- 7. Secondary Deduplication ---
        let mut secondary_markers: Vec<Blob> = Vec::new();
        for blob in secondary_candidates {
            if secondary_markers
                .iter()
                .all(|kept| !kept.bounding_box.overlaps(&blob.bounding_box))
            {
                secondary_markers.push(blob);
            }
        }

        FrameAnalysis {
            primary_candidates,
            secondary_markers,
            selected,
            selected_score,
        }
    }

    /// Picks the best-scoring candidate. Only a strictly higher score displaces
    /// the current best, so ties resolve to the earliest candidate.
    pub fn select_primary(&self, candidates: &[Blob]) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, blob) in candidates.iter().enumerate() {
            let score = self.score(blob);
            if best.is_none_or(|(_, best_score)| score > best_score) {
                best = Some((i, score));
            }
        }
        best
    }

    pub fn score(&self, blob: &Blob) -> f64 {
        self.size_score(blob.diameter) * blob.mean_saturation * blob.mean_value * blob.circularity
    }

    /// 1.0 inside the preferred diameter range, exponential decay outside it.
    pub fn size_score(&self, diameter: f64) -> f64 {
        let (lo, hi) = self.config.preferred_diameter;
        let distance = if diameter < lo {
            lo - diameter
        } else if diameter > hi {
            diameter - hi
        } else {
            0.0
        };
        (-distance / self.config.size_decay.max(f64::EPSILON)).exp()
    }

    /// Drops the smoothing history, e.g. after the minimap region changed.
    pub fn reset(&mut self) {
        self.smoother.reset();
    }
}

fn centroid_pixel(blob: &Blob) -> Position {
    Position::new(blob.centroid.0.round() as i32, blob.centroid.1.round() as i32)
}
