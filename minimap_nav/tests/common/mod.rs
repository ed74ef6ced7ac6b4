#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use minimap_nav::{
    DetectionResult, FrameSource, Key, KeyInjector, KeySequence, NavConfig, NavServices, Position,
    RotationPlayer, SequenceLibrary, StopSignal, Waypoint,
};

#[derive(Debug, Default)]
struct FrameState {
    position: Option<Position>,
    unavailable: bool,
}

/// A frame source whose position is set by the test (or by other mocks).
#[derive(Debug, Clone, Default)]
pub struct ScriptedFrames {
    state: Arc<Mutex<FrameState>>,
}

impl ScriptedFrames {
    pub fn at(x: i32, y: i32) -> Self {
        let frames = Self::default();
        frames.set(Some(Position::new(x, y)));
        frames
    }

    pub fn unavailable() -> Self {
        let frames = Self::default();
        frames.state.lock().unwrap().unavailable = true;
        frames
    }

    pub fn set(&self, position: Option<Position>) {
        self.state.lock().unwrap().position = position;
    }

    pub fn set_available(&self, available: bool) {
        self.state.lock().unwrap().unavailable = !available;
    }
}

impl FrameSource for ScriptedFrames {
    fn latest_detection(&self) -> Option<DetectionResult> {
        let state = self.state.lock().unwrap();
        Some(match state.position {
            Some(pos) => DetectionResult::at(pos),
            None => DetectionResult::lost(),
        })
    }

    fn is_available(&self) -> bool {
        !self.state.lock().unwrap().unavailable
    }
}

/// Records every key event; never moves anything.
#[derive(Debug, Clone, Default)]
pub struct RecordingKeys {
    log: Arc<Mutex<Vec<(String, bool)>>>,
}

impl RecordingKeys {
    pub fn holds_of(&self, key: &str) -> usize {
        self.log.lock().unwrap().iter().filter(|(k, down)| k == key && *down).count()
    }

    pub fn event_count(&self) -> usize {
        self.log.lock().unwrap().len()
    }

    /// Every hold was matched by a release.
    pub fn all_released(&self) -> bool {
        let log = self.log.lock().unwrap();
        let mut balance: HashMap<&str, i32> = HashMap::new();
        for (key, down) in log.iter() {
            *balance.entry(key.as_str()).or_default() += if *down { 1 } else { -1 };
        }
        balance.values().all(|b| *b <= 0)
    }
}

impl KeyInjector for RecordingKeys {
    fn hold(&mut self, key: &Key) -> minimap_nav::Result<()> {
        self.log.lock().unwrap().push((key.as_str().to_string(), true));
        Ok(())
    }

    fn release(&mut self, key: &Key) -> minimap_nav::Result<()> {
        self.log.lock().unwrap().push((key.as_str().to_string(), false));
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RotationScript {
    pub duration: Duration,
    pub moves_to: Option<Position>,
}

/// Plays rotations by waiting their scripted duration (interruptibly), then
/// optionally moving the agent.
#[derive(Clone, Default)]
pub struct ScriptedRotations {
    frames: ScriptedFrames,
    scripts: HashMap<String, RotationScript>,
    played: Arc<Mutex<Vec<String>>>,
}

impl ScriptedRotations {
    pub fn new(frames: &ScriptedFrames) -> Self {
        Self {
            frames: frames.clone(),
            ..Self::default()
        }
    }

    pub fn script(mut self, id: &str, duration_ms: u64, moves_to: Option<(i32, i32)>) -> Self {
        self.scripts.insert(
            id.to_string(),
            RotationScript {
                duration: Duration::from_millis(duration_ms),
                moves_to: moves_to.map(|(x, y)| Position::new(x, y)),
            },
        );
        self
    }

    pub fn played(&self) -> Vec<String> {
        self.played.lock().unwrap().clone()
    }
}

impl RotationPlayer for ScriptedRotations {
    fn play<'a>(
        &'a self,
        resource_id: &'a str,
        _speed: f64,
        _jitter_time: f64,
        _jitter_hold: f64,
        stop: StopSignal,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            self.played.lock().unwrap().push(resource_id.to_string());
            let script = self.scripts.get(resource_id).copied().unwrap_or(RotationScript {
                duration: Duration::from_millis(200),
                moves_to: None,
            });
            if stop.sleep(script.duration).await.is_err() {
                return false;
            }
            if let Some(pos) = script.moves_to {
                self.frames.set(Some(pos));
            }
            true
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemorySequences(pub HashMap<String, KeySequence>);

impl SequenceLibrary for MemorySequences {
    fn load(&self, id: &str) -> Option<KeySequence> {
        self.0.get(id).cloned()
    }
}

pub fn services(frames: &ScriptedFrames, rotations: &ScriptedRotations, keys: &RecordingKeys) -> NavServices {
    NavServices {
        frames: Arc::new(frames.clone()),
        rotations: Arc::new(rotations.clone()),
        keys: Box::new(keys.clone()),
        sequences: Arc::new(MemorySequences::default()),
    }
}

pub fn waypoint(id: &str, x: i32, y: i32, order: i32, rotations: &[&str]) -> Waypoint {
    let mut wp = Waypoint::new(id, x, y, order);
    wp.rotation_paths = rotations.iter().map(|r| r.to_string()).collect();
    wp.rotation_mode = minimap_nav::RotationMode::Single;
    wp
}

pub fn config(waypoints: Vec<Waypoint>) -> NavConfig {
    let mut config = NavConfig {
        waypoints,
        ..NavConfig::default()
    };
    config.timings.rng_seed = Some(1);
    config
}
