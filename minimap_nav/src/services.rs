//! Seams to the collaborators the engine drives but does not own: the source of
//! detections, the rotation player, and the store of recorded key sequences.
//! Key injection lives in `core_modules::keypad`.

use futures::future::BoxFuture;

use crate::core_modules::detection::DetectionResult;
use crate::core_modules::interrupt::StopSignal;
use crate::core_modules::keypad::{KeyInjector, KeySequence};

/// Non-blocking access to the most recent detection.
pub trait FrameSource: Send + Sync {
    /// The latest published detection, if any frame has been processed.
    fn latest_detection(&self) -> Option<DetectionResult>;

    /// Whether a region is configured and frames are flowing.
    fn is_available(&self) -> bool;
}

/// Plays an opaque recorded rotation. Implementations must watch `stop` and
/// return promptly once it fires.
pub trait RotationPlayer: Send + Sync {
    /// Resolves to `true` when the rotation ran to completion.
    fn play<'a>(
        &'a self,
        resource_id: &'a str,
        speed: f64,
        jitter_time: f64,
        jitter_hold: f64,
        stop: StopSignal,
    ) -> BoxFuture<'a, bool>;
}

/// Resolves `pathfinding_sequence` ids to recorded key sequences.
pub trait SequenceLibrary: Send + Sync {
    fn load(&self, id: &str) -> Option<KeySequence>;
}

/// A library with nothing in it.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSequences;

impl SequenceLibrary for NoSequences {
    fn load(&self, _id: &str) -> Option<KeySequence> {
        None
    }
}

/// Everything an orchestrator run needs from the outside world.
pub struct NavServices {
    pub frames: std::sync::Arc<dyn FrameSource>,
    pub rotations: std::sync::Arc<dyn RotationPlayer>,
    pub keys: Box<dyn KeyInjector>,
    pub sequences: std::sync::Arc<dyn SequenceLibrary>,
}
