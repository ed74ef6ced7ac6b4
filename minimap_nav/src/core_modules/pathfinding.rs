// THEORY:
// The `PathfindingController` closes the gap between the agent and a waypoint
// it has not reached, using timed key presses and position feedback.
//
// Strategy, in priority order:
// 1.  **Recorded sequence**: a waypoint may name a recorded key sequence. It is
//     replayed verbatim with no feedback mid-replay; if the agent still misses
//     the waypoint afterwards the class strategy takes over.
// 2.  **Class strategy**: one discrete move per attempt, chosen from the
//     remaining horizontal and vertical error:
//     - long horizontal (> threshold): direction + double jump (`other`) or
//       direction + teleport (`magician`);
//     - short horizontal: hold the direction for a time that grows linearly
//       with distance (0.12 s at 1 px up to 2.0 s at the threshold);
//     - ascent: a ladder of methods (rope lift, double jump up, Y-axis skill or
//       up + teleport), escalating whenever a climb fails to gain height;
//     - descent: down + jump (`other`) or down + teleport (`magician`);
//     - diagonal: a single combined press when the target is lower and a
//       diagonal skill is configured, otherwise the larger axis first.
//
// After every move the controller waits for the move to finish plus one
// detection interval (≈0.8 s horizontal, ≈1.0 s vertical) before re-sampling;
// deciding on the pre-move position would repeat the same move twice. The
// attempt count is capped; running out is reported, not raised.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core_modules::detection::Position;
use crate::core_modules::detection_cell::sample_position;
use crate::core_modules::keypad::{Key, KeyPad};
use crate::core_modules::waypoint::Waypoint;
use crate::error::{NavError, Result};
use crate::services::{FrameSource, SequenceLibrary};

/// Movement capabilities of the controlled agent's class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "class_type", rename_all = "snake_case")]
pub enum PathfindingConfig {
    Other {
        #[serde(default)]
        rope_lift_key: Option<Key>,
        #[serde(default)]
        diagonal_movement_key: Option<Key>,
        #[serde(default = "default_true")]
        double_jump_up_allowed: bool,
        #[serde(default)]
        y_axis_jump_skill: Option<Key>,
    },
    Magician {
        #[serde(default)]
        rope_lift_key: Option<Key>,
        teleport_skill: Key,
    },
}

fn default_true() -> bool {
    true
}

impl Default for PathfindingConfig {
    fn default() -> Self {
        PathfindingConfig::Other {
            rope_lift_key: None,
            diagonal_movement_key: None,
            double_jump_up_allowed: true,
            y_axis_jump_skill: None,
        }
    }
}

impl PathfindingConfig {
    pub fn validate(&self) -> Result<()> {
        if let PathfindingConfig::Magician { teleport_skill, .. } = self {
            if teleport_skill.as_str().trim().is_empty() {
                return Err(NavError::InvalidConfiguration(
                    "magician pathfinding requires a teleport_skill".into(),
                ));
            }
        }
        Ok(())
    }

    /// Ascent methods in the order they are tried.
    pub fn ascent_methods(&self) -> Vec<AscentMethod> {
        let mut methods = Vec::new();
        match self {
            PathfindingConfig::Other {
                rope_lift_key,
                double_jump_up_allowed,
                y_axis_jump_skill,
                ..
            } => {
                if let Some(key) = rope_lift_key {
                    methods.push(AscentMethod::RopeLift(key.clone()));
                }
                if *double_jump_up_allowed {
                    methods.push(AscentMethod::DoubleJumpUp);
                }
                if let Some(key) = y_axis_jump_skill {
                    methods.push(AscentMethod::YAxisSkill(key.clone()));
                }
            }
            PathfindingConfig::Magician {
                rope_lift_key,
                teleport_skill,
            } => {
                if let Some(key) = rope_lift_key {
                    methods.push(AscentMethod::RopeLift(key.clone()));
                }
                methods.push(AscentMethod::UpTeleport(teleport_skill.clone()));
            }
        }
        if methods.is_empty() {
            methods.push(AscentMethod::PlainJump);
        }
        methods
    }

    fn augment(&self) -> Augment {
        match self {
            PathfindingConfig::Other { .. } => Augment::Jump,
            PathfindingConfig::Magician { teleport_skill, .. } => Augment::Teleport(teleport_skill.clone()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AscentMethod {
    RopeLift(Key),
    DoubleJumpUp,
    YAxisSkill(Key),
    UpTeleport(Key),
    PlainJump,
}

/// What gets pressed alongside a direction for long moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Augment {
    Jump,
    Teleport(Key),
}

/// One discrete movement decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Move {
    Walk { direction: Key, duration: Duration },
    Dash { direction: Key, augment: Augment },
    Ascend(AscentMethod),
    Descend(Augment),
    DiagonalSkill { direction: Key, skill: Key },
}

impl Move {
    fn is_horizontal(&self) -> bool {
        matches!(self, Move::Walk { .. } | Move::Dash { .. })
    }
}

/// Walks the ascent methods, staying on the last one once exhausted.
#[derive(Debug, Clone)]
pub struct AscentLadder {
    methods: Vec<AscentMethod>,
    index: usize,
}

impl AscentLadder {
    pub fn new(methods: Vec<AscentMethod>) -> Self {
        let methods = if methods.is_empty() { vec![AscentMethod::PlainJump] } else { methods };
        Self { methods, index: 0 }
    }

    pub fn current(&self) -> &AscentMethod {
        &self.methods[self.index]
    }

    pub fn escalate(&mut self) {
        self.index = (self.index + 1).min(self.methods.len() - 1);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PathfindingSettings {
    pub max_attempts: u32,
    /// Horizontal distance (px) above which moves are augmented.
    pub horizontal_threshold: i32,
    pub min_hold: Duration,
    pub max_hold: Duration,
    pub settle_horizontal: Duration,
    pub settle_vertical: Duration,
    /// Gap between the two taps of a double jump.
    pub jump_gap: Duration,
    pub detection_retries: u32,
    pub detection_interval: Duration,
}

impl Default for PathfindingSettings {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            horizontal_threshold: 50,
            min_hold: Duration::from_millis(120),
            max_hold: Duration::from_millis(2000),
            settle_horizontal: Duration::from_millis(800),
            settle_vertical: Duration::from_millis(1000),
            jump_gap: Duration::from_millis(120),
            detection_retries: 3,
            detection_interval: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationOutcome {
    Reached { attempts: u32, position: Position },
    Exhausted { attempts: u32, position: Position },
}

impl NavigationOutcome {
    pub fn is_reached(&self) -> bool {
        matches!(self, NavigationOutcome::Reached { .. })
    }
}

pub struct PathfindingController {
    config: PathfindingConfig,
    jump_key: Key,
    settings: PathfindingSettings,
}

impl PathfindingController {
    pub fn new(config: PathfindingConfig, jump_key: Key, settings: PathfindingSettings) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            jump_key,
            settings,
        })
    }

    pub fn config(&self) -> &PathfindingConfig {
        &self.config
    }

    pub fn settings(&self) -> &PathfindingSettings {
        &self.settings
    }

    /// Hold time for a short horizontal move of `distance` px.
    pub fn hold_duration(&self, distance: i32) -> Duration {
        let threshold = self.settings.horizontal_threshold.max(2);
        let d = distance.abs().clamp(1, threshold);
        let fraction = (d - 1) as f64 / (threshold - 1) as f64;
        let (lo, hi) = (self.settings.min_hold.as_secs_f64(), self.settings.max_hold.as_secs_f64());
        Duration::from_secs_f64(lo + fraction * (hi - lo))
    }

    /// Chooses the next move from `pos` toward `target`; `None` once there.
    pub fn plan(&self, pos: Position, target: &Waypoint, ladder: &AscentLadder) -> Option<Move> {
        let dx = target.horizontal_error(pos);
        let dy = target.vertical_error(pos);

        if dx != 0 && dy != 0 {
            if let PathfindingConfig::Other {
                diagonal_movement_key: Some(skill),
                ..
            } = &self.config
            {
                if dy > 0 {
                    return Some(Move::DiagonalSkill {
                        direction: direction_of(dx),
                        skill: skill.clone(),
                    });
                }
            }
            return if dx.abs() >= dy.abs() {
                Some(self.horizontal_move(dx))
            } else {
                Some(self.vertical_move(dy, ladder))
            };
        }
        if dx != 0 {
            return Some(self.horizontal_move(dx));
        }
        if dy != 0 {
            return Some(self.vertical_move(dy, ladder));
        }
        None
    }

    fn horizontal_move(&self, dx: i32) -> Move {
        let direction = direction_of(dx);
        if dx.abs() > self.settings.horizontal_threshold {
            Move::Dash {
                direction,
                augment: self.config.augment(),
            }
        } else {
            Move::Walk {
                direction,
                duration: self.hold_duration(dx),
            }
        }
    }

    fn vertical_move(&self, dy: i32, ladder: &AscentLadder) -> Move {
        if dy < 0 {
            Move::Ascend(ladder.current().clone())
        } else {
            Move::Descend(self.config.augment())
        }
    }

    /// Drives the agent from `current` toward `target`.
    pub async fn navigate_to(
        &self,
        keypad: &mut KeyPad,
        frames: &dyn FrameSource,
        sequences: &dyn SequenceLibrary,
        current: Position,
        target: &Waypoint,
    ) -> Result<NavigationOutcome> {
        let mut pos = current;
        let mut attempts = 0;

        if let Some(sequence_id) = &target.pathfinding_sequence {
            match sequences.load(sequence_id) {
                Some(sequence) => {
                    info!(waypoint = %target.name, sequence = %sequence_id, "replaying recorded path");
                    attempts += 1;
                    keypad.replay(&sequence).await?;
                    keypad.pause(self.settings.settle_vertical).await?;
                    pos = self.resample(keypad, frames).await?.unwrap_or(pos);
                }
                None => warn!(sequence = %sequence_id, "recorded path not found, using class strategy"),
            }
        }

        let mut ladder = AscentLadder::new(self.config.ascent_methods());
        while attempts < self.settings.max_attempts {
            if target.is_hit(pos) {
                return Ok(NavigationOutcome::Reached { attempts, position: pos });
            }
            let Some(next) = self.plan(pos, target, &ladder) else {
                break;
            };
            attempts += 1;
            debug!(attempt = attempts, ?pos, ?next, waypoint = %target.name, "pathfinding move");

            self.execute(keypad, &next).await?;
            let settle = if next.is_horizontal() {
                self.settings.settle_horizontal
            } else {
                self.settings.settle_vertical
            };
            keypad.pause(settle).await?;

            let before = target.vertical_error(pos).abs();
            match self.resample(keypad, frames).await? {
                Some(sampled) => pos = sampled,
                None => warn!(attempt = attempts, "no detection after move, keeping last position"),
            }
            if matches!(next, Move::Ascend(_)) && target.vertical_error(pos).abs() >= before {
                ladder.escalate();
            }
        }

        if target.is_hit(pos) {
            Ok(NavigationOutcome::Reached { attempts, position: pos })
        } else {
            info!(waypoint = %target.name, attempts, "pathfinding attempts exhausted");
            Ok(NavigationOutcome::Exhausted { attempts, position: pos })
        }
    }

    async fn resample(&self, keypad: &KeyPad, frames: &dyn FrameSource) -> Result<Option<Position>> {
        sample_position(
            frames,
            keypad.stop_signal(),
            self.settings.detection_retries,
            self.settings.detection_interval,
        )
        .await
    }

    /// Emits the key presses for one move.
    pub async fn execute(&self, keypad: &mut KeyPad, next: &Move) -> Result<()> {
        match next {
            Move::Walk { direction, duration } => keypad.press(direction, *duration).await,
            Move::Dash { direction, augment } => {
                keypad.hold(direction)?;
                let result = self.augmented_burst(keypad, augment).await;
                let released = keypad.release(direction);
                result?;
                released
            }
            Move::Ascend(method) => self.ascend(keypad, method).await,
            Move::Descend(Augment::Jump) => {
                let down = Key::down();
                keypad.hold(&down)?;
                let result = keypad.tap(&self.jump_key).await;
                let released = keypad.release(&down);
                result?;
                released
            }
            Move::Descend(Augment::Teleport(skill)) => {
                keypad.press_all(&[Key::down(), skill.clone()], self.settings.min_hold).await
            }
            Move::DiagonalSkill { direction, skill } => {
                let combo = [direction.clone(), self.jump_key.clone(), Key::up(), skill.clone()];
                keypad.press_all(&combo, self.settings.min_hold).await
            }
        }
    }

    async fn augmented_burst(&self, keypad: &mut KeyPad, augment: &Augment) -> Result<()> {
        match augment {
            Augment::Jump => {
                keypad.tap(&self.jump_key).await?;
                keypad.gap(self.settings.jump_gap).await?;
                keypad.tap(&self.jump_key).await?;
            }
            Augment::Teleport(skill) => keypad.tap(skill).await?,
        }
        keypad.gap(self.settings.jump_gap).await
    }

    async fn ascend(&self, keypad: &mut KeyPad, method: &AscentMethod) -> Result<()> {
        match method {
            AscentMethod::RopeLift(key) => keypad.tap(key).await,
            AscentMethod::DoubleJumpUp => {
                let up = Key::up();
                keypad.hold(&up)?;
                let result = self.augmented_burst(keypad, &Augment::Jump).await;
                let released = keypad.release(&up);
                result?;
                released
            }
            AscentMethod::YAxisSkill(key) => {
                keypad.tap(&self.jump_key).await?;
                keypad.gap(self.settings.jump_gap).await?;
                keypad.tap(key).await
            }
            AscentMethod::UpTeleport(skill) => {
                keypad.press_all(&[Key::up(), skill.clone()], self.settings.min_hold).await
            }
            AscentMethod::PlainJump => keypad.tap(&self.jump_key).await,
        }
    }
}

fn direction_of(dx: i32) -> Key {
    if dx > 0 { Key::right() } else { Key::left() }
}
