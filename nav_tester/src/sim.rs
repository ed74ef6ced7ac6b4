// THEORY:
// A closed-loop stand-in for the game so a full run can be exercised without
// hardware. The simulated agent lives on a blank minimap:
// - held directional keys move it at a fixed speed, integrated lazily on every
//   key event and every read;
// - jump or teleport taps add a burst in the held direction (or vertically when
//   up/down is held);
// - rope-lift and y-axis skills lift it;
// - the portal key, pressed with nothing held, sends it to the next portal exit.
// A camera task renders the agent as a yellow marker and feeds the real
// detector, so the orchestrator only ever sees what detection reports.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use minimap_nav::config::NavConfig;
use minimap_nav::core_modules::pathfinding::PathfindingConfig;
use minimap_nav::services::SequenceLibrary;
use minimap_nav::{BgrImage, Key, KeyInjector, KeySequence, Position, RotationPlayer, StopSignal};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

const MARKER_BGR: [u8; 3] = [0, 255, 255];
const MARGIN: i32 = 20;

#[derive(Debug, Clone, Copy)]
pub struct Physics {
    pub walk_px_per_sec: f64,
    pub burst_px: f64,
    pub lift_px: f64,
    pub drop_px: f64,
}

impl Default for Physics {
    fn default() -> Self {
        Self {
            walk_px_per_sec: 30.0,
            burst_px: 25.0,
            lift_px: 15.0,
            drop_px: 15.0,
        }
    }
}

/// Which aliases mean what to the simulated agent.
#[derive(Debug, Clone, Default)]
struct Keymap {
    bursts: HashSet<Key>,
    lifts: HashSet<Key>,
    diagonal: Option<Key>,
    portal: Option<Key>,
}

impl Keymap {
    fn from_config(config: &NavConfig) -> Self {
        let mut map = Keymap {
            portal: Some(config.run.portal_key()),
            ..Keymap::default()
        };
        map.bursts.insert(config.run.jump_key.clone());
        match &config.pathfinding {
            PathfindingConfig::Other {
                rope_lift_key,
                diagonal_movement_key,
                y_axis_jump_skill,
                ..
            } => {
                map.lifts.extend(rope_lift_key.iter().cloned());
                map.lifts.extend(y_axis_jump_skill.iter().cloned());
                map.diagonal = diagonal_movement_key.clone();
            }
            PathfindingConfig::Magician {
                rope_lift_key,
                teleport_skill,
            } => {
                map.lifts.extend(rope_lift_key.iter().cloned());
                map.bursts.insert(teleport_skill.clone());
            }
        }
        map
    }
}

#[derive(Debug)]
struct Agent {
    x: f64,
    y: f64,
    held: HashSet<String>,
    updated: Instant,
    next_exit: usize,
}

/// Shared state of the simulated agent and its minimap.
#[derive(Clone)]
pub struct SimWorld {
    agent: Arc<Mutex<Agent>>,
    physics: Physics,
    keymap: Arc<Keymap>,
    exits: Arc<Vec<Position>>,
    width: u32,
    height: u32,
}

impl SimWorld {
    /// A world sized to hold every waypoint, with the agent `offset` pixels
    /// left of the first one.
    pub fn from_config(config: &NavConfig, physics: Physics, offset: i32) -> Self {
        let mut waypoints = config.waypoints.clone();
        waypoints.sort_by_key(|w| w.order);

        let max_x = waypoints.iter().map(|w| w.x).max().unwrap_or(0);
        let max_y = waypoints.iter().map(|w| w.y).max().unwrap_or(0);
        let width = (max_x + MARGIN * 2).max(64) as u32;
        let height = (max_y + MARGIN * 2).max(48) as u32;

        let start = waypoints
            .first()
            .map(|w| Position::new(w.x - offset, w.y))
            .unwrap_or(Position::new(MARGIN, MARGIN));
        let exits = waypoints
            .iter()
            .filter(|w| w.is_teleport_point)
            .map(|w| w.position())
            .collect();

        let world = Self {
            agent: Arc::new(Mutex::new(Agent {
                x: start.x as f64,
                y: start.y as f64,
                held: HashSet::new(),
                updated: Instant::now(),
                next_exit: 0,
            })),
            physics,
            keymap: Arc::new(Keymap::from_config(config)),
            exits: Arc::new(exits),
            width,
            height,
        };
        world.with_agent(|agent| world.clamp(agent));
        world
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn position(&self) -> Position {
        self.with_agent(|agent| {
            self.integrate(agent);
            Position::new(agent.x.round() as i32, agent.y.round() as i32)
        })
    }

    /// Draws the agent onto a blank minimap.
    pub fn render(&self) -> BgrImage {
        let pos = self.position();
        let mut img = BgrImage::new(self.width, self.height);
        for dy in -3..=3i32 {
            for dx in -3..=3i32 {
                if dx.abs() == 3 && dy.abs() == 3 {
                    continue;
                }
                let (x, y) = (pos.x + dx, pos.y + dy);
                if x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height {
                    img.put_pixel(x as u32, y as u32, MARKER_BGR);
                }
            }
        }
        img
    }

    /// Renders frames into `frames` every `period` until the receiver closes
    /// or `stop` fires. Frames are dropped while the detector is busy.
    pub fn spawn_camera(&self, frames: mpsc::Sender<BgrImage>, period: Duration, stop: StopSignal) -> JoinHandle<()> {
        let world = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                tokio::select! {
                    _ = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        match frames.try_send(world.render()) {
                            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => {}
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                    }
                }
            }
            debug!("camera stopped");
        })
    }

    fn with_agent<T>(&self, f: impl FnOnce(&mut Agent) -> T) -> T {
        let mut agent = self.agent.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut agent)
    }

    fn integrate(&self, agent: &mut Agent) {
        let now = Instant::now();
        let dt = (now - agent.updated).as_secs_f64();
        agent.updated = now;
        let step = self.physics.walk_px_per_sec * dt;
        if agent.held.contains("right") {
            agent.x += step;
        }
        if agent.held.contains("left") {
            agent.x -= step;
        }
        self.clamp(agent);
    }

    fn clamp(&self, agent: &mut Agent) {
        agent.x = agent.x.clamp(4.0, self.width as f64 - 5.0);
        agent.y = agent.y.clamp(4.0, self.height as f64 - 5.0);
    }

    fn heading(agent: &Agent) -> f64 {
        match (agent.held.contains("left"), agent.held.contains("right")) {
            (true, false) => -1.0,
            (false, true) => 1.0,
            _ => 0.0,
        }
    }

    fn key_down(&self, key: &Key) {
        let physics = self.physics;
        let keymap = self.keymap.clone();
        self.with_agent(|agent| {
            self.integrate(agent);
            let heading = Self::heading(agent);

            if keymap.diagonal.as_ref() == Some(key) {
                agent.x += heading * physics.burst_px / 2.0;
                agent.y += physics.drop_px;
            } else if keymap.lifts.contains(key) {
                agent.y -= physics.lift_px;
            } else if keymap.bursts.contains(key) {
                if heading != 0.0 {
                    agent.x += heading * physics.burst_px;
                } else if agent.held.contains("up") {
                    agent.y -= physics.lift_px;
                } else if agent.held.contains("down") {
                    agent.y += physics.drop_px;
                } else if keymap.portal.as_ref() == Some(key) {
                    self.take_portal(agent);
                }
            } else if keymap.portal.as_ref() == Some(key) && agent.held.is_empty() {
                self.take_portal(agent);
            }
            agent.held.insert(key.as_str().to_string());
            self.clamp(agent);
        });
    }

    fn take_portal(&self, agent: &mut Agent) {
        if self.exits.is_empty() {
            return;
        }
        let exit = self.exits[agent.next_exit % self.exits.len()];
        agent.next_exit += 1;
        agent.x = exit.x as f64;
        agent.y = exit.y as f64;
        debug!(?exit, "portal");
    }

    fn key_up(&self, key: &Key) {
        self.with_agent(|agent| {
            self.integrate(agent);
            agent.held.remove(key.as_str());
        });
    }
}

/// Routes injected keys into the simulated agent.
pub struct SimKeys {
    world: SimWorld,
}

impl SimKeys {
    pub fn new(world: &SimWorld) -> Self {
        Self { world: world.clone() }
    }
}

impl KeyInjector for SimKeys {
    fn hold(&mut self, key: &Key) -> minimap_nav::Result<()> {
        self.world.key_down(key);
        Ok(())
    }

    fn release(&mut self, key: &Key) -> minimap_nav::Result<()> {
        self.world.key_up(key);
        Ok(())
    }
}

/// Plays every rotation as an interruptible wait of fixed length.
pub struct SimRotations {
    pub duration: Duration,
}

impl RotationPlayer for SimRotations {
    fn play<'a>(
        &'a self,
        resource_id: &'a str,
        speed: f64,
        _jitter_time: f64,
        _jitter_hold: f64,
        stop: StopSignal,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let length = self.duration.div_f64(speed.max(0.01));
            debug!(resource_id, ?length, "playing rotation");
            stop.sleep(length).await.is_ok()
        })
    }
}

/// Loads recorded pathfinding sequences from `<dir>/<id>.json`.
pub struct DirSequences {
    pub dir: PathBuf,
}

impl SequenceLibrary for DirSequences {
    fn load(&self, id: &str) -> Option<KeySequence> {
        let path = self.dir.join(format!("{id}.json"));
        let text = std::fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(sequence) => Some(sequence),
            Err(err) => {
                warn!(path = %path.display(), %err, "unreadable key sequence");
                None
            }
        }
    }
}
