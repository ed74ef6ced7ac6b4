// THEORY:
// The `smoothing` module adds memory to an otherwise stateless detector. Raw
// marker centroids jitter by a pixel or two from frame to frame as the marker's
// anti-aliased edge crosses the colour thresholds; an exponential moving average
// (`s = α·x + (1-α)·s_prev`) removes that jitter while still following real
// movement within a few frames.
//
// Lifecycle:
// - **Detected**: the average absorbs the new sample (the first sample seeds it).
// - **Missed**: what to report is a policy choice (`StalePolicy`). Either the
//   marker is reported lost immediately and the average is dropped, or the last
//   smoothed position is held for a bounded number of frames with decaying
//   confidence, after which the marker is reported lost.

use serde::{Deserialize, Serialize};

use crate::core_modules::detection::{Position, PrimaryMarker};

/// What to report for the primary marker on a frame where it was not found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum StalePolicy {
    /// Report not-detected and reset the average.
    #[default]
    ReportLost,
    /// Keep reporting the last smoothed position for up to `max_frames`
    /// consecutive misses.
    HoldLast { max_frames: u32 },
}

#[derive(Debug, Clone)]
pub struct PositionSmoother {
    alpha: f64,
    policy: StalePolicy,
    state: Option<(f64, f64)>,
    last_confidence: f64,
    frames_since_seen: u32,
}

impl PositionSmoother {
    pub fn new(alpha: f64, policy: StalePolicy) -> Self {
        Self {
            alpha: alpha.clamp(f64::EPSILON, 1.0),
            policy,
            state: None,
            last_confidence: 0.0,
            frames_since_seen: 0,
        }
    }

    /// Feeds one frame's raw centroid (or `None` when the marker was not
    /// found) and returns the marker to report. `bounds` is the region size;
    /// reported positions always lie inside it.
    pub fn update(&mut self, raw: Option<((f64, f64), f64)>, bounds: (u32, u32)) -> PrimaryMarker {
        match raw {
            Some(((x, y), confidence)) => {
                let smoothed = match self.state {
                    Some((sx, sy)) => (
                        self.alpha * x + (1.0 - self.alpha) * sx,
                        self.alpha * y + (1.0 - self.alpha) * sy,
                    ),
                    None => (x, y),
                };
                self.state = Some(smoothed);
                self.last_confidence = confidence;
                self.frames_since_seen = 0;
                PrimaryMarker::at(to_pixel(smoothed, bounds), confidence)
            }
            None => self.on_miss(bounds),
        }
    }

    fn on_miss(&mut self, bounds: (u32, u32)) -> PrimaryMarker {
        match (self.policy, self.state) {
            (StalePolicy::HoldLast { max_frames }, Some(held)) if self.frames_since_seen < max_frames => {
                self.frames_since_seen += 1;
                let confidence = self.last_confidence * 0.5f64.powi(self.frames_since_seen as i32);
                PrimaryMarker::at(to_pixel(held, bounds), confidence)
            }
            _ => {
                self.reset();
                PrimaryMarker::lost()
            }
        }
    }

    pub fn reset(&mut self) {
        self.state = None;
        self.last_confidence = 0.0;
        self.frames_since_seen = 0;
    }

    pub fn smoothed(&self) -> Option<(f64, f64)> {
        self.state
    }
}

fn to_pixel((x, y): (f64, f64), (width, height): (u32, u32)) -> Position {
    let max_x = width.saturating_sub(1) as f64;
    let max_y = height.saturating_sub(1) as f64;
    Position::new(x.round().clamp(0.0, max_x) as i32, y.round().clamp(0.0, max_y) as i32)
}
