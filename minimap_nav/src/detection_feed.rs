// THEORY:
// The detection feed is the producer side of the latest-detection cell. Frames
// (already cropped to the minimap) arrive over an mpsc channel from whatever
// captures them; a single worker task runs the `BlobDetector` on each and
// overwrites the cell. The orchestrator never waits on this task: it only
// snapshots the cell on its own schedule.
//
// Detection is bounded and linear in region size, so one worker is enough.
// Frames that blow the soft per-frame budget are logged, not dropped.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core_modules::bgr_image::BgrImage;
use crate::core_modules::blob_detector::{BlobDetector, DetectorConfig};
use crate::core_modules::detection::DetectionResult;
use crate::core_modules::detection_cell::DetectionCell;

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeedStats {
    pub frames: u64,
    pub over_deadline: u64,
    pub total_time: Duration,
    pub max_time: Duration,
}

impl FeedStats {
    pub fn mean_time(&self) -> Duration {
        if self.frames == 0 {
            Duration::ZERO
        } else {
            self.total_time / self.frames as u32
        }
    }
}

pub struct DetectionFeed {
    detector: BlobDetector,
    cell: DetectionCell,
    deadline: Duration,
    stats: Arc<Mutex<FeedStats>>,
}

impl DetectionFeed {
    pub fn new(config: DetectorConfig, cell: DetectionCell) -> Self {
        let deadline = Duration::from_millis(config.soft_deadline_ms);
        Self {
            detector: BlobDetector::new(config),
            cell,
            deadline,
            stats: Arc::default(),
        }
    }

    pub fn cell(&self) -> &DetectionCell {
        &self.cell
    }

    /// Shared view of the timing counters; stays valid after `spawn`.
    pub fn stats_handle(&self) -> Arc<Mutex<FeedStats>> {
        self.stats.clone()
    }

    /// Detects on one region and publishes the result.
    pub fn process(&mut self, region: &BgrImage) -> DetectionResult {
        let started = Instant::now();
        let result = self.detector.detect(region);
        let elapsed = started.elapsed();

        if elapsed > self.deadline {
            warn!(elapsed_ms = elapsed.as_secs_f64() * 1000.0, "detection over frame budget");
        }
        if let Ok(mut stats) = self.stats.lock() {
            stats.frames += 1;
            stats.total_time += elapsed;
            stats.max_time = stats.max_time.max(elapsed);
            if elapsed > self.deadline {
                stats.over_deadline += 1;
            }
        }

        self.cell.publish(result.clone());
        result
    }

    /// Runs the feed as a worker task until every sender is dropped. The cell
    /// is marked unavailable when the feed ends.
    pub fn spawn(mut self, mut frames: mpsc::Receiver<BgrImage>) -> JoinHandle<()> {
        tokio::spawn(async move {
            while let Some(region) = frames.recv().await {
                self.process(&region);
            }
            debug!("frame channel closed, detection feed ending");
            self.cell.clear();
        })
    }
}
