// THEORY:
// The hand-off point between the detection producer and the orchestrator. The
// producer overwrites, the orchestrator snapshots: latest value wins, no queue
// and no backpressure. A stale read of up to one polling interval is expected.
// A mutex-protected copy is enough because a `DetectionResult` is tiny and the
// lock is never held across an await.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core_modules::detection::{DetectionResult, Position};
use crate::core_modules::interrupt::StopSignal;
use crate::error::Result;
use crate::services::FrameSource;

#[derive(Debug, Default)]
struct CellState {
    latest: Option<DetectionResult>,
    available: bool,
}

#[derive(Debug, Clone, Default)]
pub struct DetectionCell {
    inner: Arc<Mutex<CellState>>,
}

impl DetectionCell {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrites the latest value and marks the source available.
    pub fn publish(&self, result: DetectionResult) {
        let mut state = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.latest = Some(result);
        state.available = true;
    }

    /// Marks the source unavailable, e.g. the minimap region was unset.
    pub fn clear(&self) {
        let mut state = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.latest = None;
        state.available = false;
    }
}

impl FrameSource for DetectionCell {
    fn latest_detection(&self) -> Option<DetectionResult> {
        let state = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        state.latest.clone()
    }

    fn is_available(&self) -> bool {
        self.inner.lock().map(|state| state.available).unwrap_or(false)
    }
}

/// Polls `source` up to `retries` times, `interval` apart, for a detected
/// primary marker. `Ok(None)` when every poll came back empty.
pub async fn sample_position(
    source: &dyn FrameSource,
    stop: &StopSignal,
    retries: u32,
    interval: Duration,
) -> Result<Option<Position>> {
    for attempt in 0..retries.max(1) {
        stop.check()?;
        if let Some(pos) = source.latest_detection().and_then(|d| d.player_position()) {
            return Ok(Some(pos));
        }
        if attempt + 1 < retries {
            stop.sleep(interval).await?;
        }
    }
    Ok(None)
}
