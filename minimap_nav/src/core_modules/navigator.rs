// THEORY:
// The `PointNavigator` is the memory of a run. It walks an ordered list of
// waypoints as a small state machine:
//
//   AwaitingHit(i) --hit--> PlayingRotation(i) --advance--> AwaitingHit((i+1) mod N)
//
// Wrapping from the last waypoint back to index 0 completes a cycle. The
// navigator owns `NavigationState`; everything else only reads it.
//
// On a hit it picks which linked rotation to play:
// - `random`: uniform each hit, from a seedable generator.
// - `sequential`: a per-waypoint cursor that survives the whole run, including
//   resets caused by unexpected teleports.
// - `single`: always the first entry.
// A waypoint without rotations (or with `auto_play` off) plays nothing but
// still advances.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::core_modules::detection::Position;
use crate::core_modules::waypoint::{RotationMode, Waypoint};
use crate::error::{NavError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavPhase {
    AwaitingHit(usize),
    PlayingRotation(usize),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NavigationState {
    pub current_point_index: usize,
    pub total_points: usize,
    pub rotations_played_count: u64,
    pub cycles_completed: u32,
    pub last_rotation_played: Option<String>,
}

/// Outcome of moving past the current waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advance {
    Next(usize),
    /// Wrapped back to index 0; carries the new cycle count.
    CycleCompleted(u32),
}

pub struct PointNavigator {
    waypoints: Vec<Waypoint>,
    phase: NavPhase,
    state: NavigationState,
    cursors: Vec<usize>,
    rng: StdRng,
}

impl PointNavigator {
    /// Builds a navigator over `waypoints`, visited in ascending `order`.
    pub fn new(mut waypoints: Vec<Waypoint>, seed: Option<u64>) -> Result<Self> {
        if waypoints.is_empty() {
            return Err(NavError::InvalidConfiguration("no waypoints configured".into()));
        }
        waypoints.sort_by_key(|wp| wp.order);
        let total_points = waypoints.len();
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            cursors: vec![0; total_points],
            waypoints,
            phase: NavPhase::AwaitingHit(0),
            state: NavigationState {
                total_points,
                ..NavigationState::default()
            },
            rng,
        })
    }

    pub fn waypoints(&self) -> &[Waypoint] {
        &self.waypoints
    }

    pub fn phase(&self) -> NavPhase {
        self.phase
    }

    pub fn state(&self) -> &NavigationState {
        &self.state
    }

    pub fn current_index(&self) -> usize {
        self.state.current_point_index
    }

    pub fn current(&self) -> &Waypoint {
        &self.waypoints[self.state.current_point_index]
    }

    pub fn is_hit(&self, pos: Position) -> bool {
        self.current().is_hit(pos)
    }

    /// Registers a hit on the current waypoint and returns the rotation to
    /// play, if any.
    pub fn on_hit(&mut self) -> Option<String> {
        let index = self.current_index();
        self.phase = NavPhase::PlayingRotation(index);
        self.select_rotation(index)
    }

    /// Chooses a rotation for waypoint `index` according to its mode. Advances
    /// the sequential cursor.
    pub fn select_rotation(&mut self, index: usize) -> Option<String> {
        let wp = self.waypoints.get(index)?;
        if !wp.has_playable_rotation() {
            return None;
        }
        let paths = &wp.rotation_paths;
        let pick = match wp.rotation_mode {
            RotationMode::Single => 0,
            RotationMode::Random => self.rng.gen_range(0..paths.len()),
            RotationMode::Sequential => {
                let cursor = self.cursors[index] % paths.len();
                self.cursors[index] = (cursor + 1) % paths.len();
                cursor
            }
        };
        Some(paths[pick].clone())
    }

    pub fn record_rotation(&mut self, resource_id: &str) {
        self.state.rotations_played_count += 1;
        self.state.last_rotation_played = Some(resource_id.to_string());
    }

    pub fn advance(&mut self) -> Advance {
        let next = (self.current_index() + 1) % self.waypoints.len();
        self.state.current_point_index = next;
        self.phase = NavPhase::AwaitingHit(next);
        if next == 0 {
            self.state.cycles_completed += 1;
            Advance::CycleCompleted(self.state.cycles_completed)
        } else {
            Advance::Next(next)
        }
    }

    /// Back to the first waypoint. Counters and sequential cursors are kept.
    pub fn reset(&mut self) {
        self.state.current_point_index = 0;
        self.phase = NavPhase::AwaitingHit(0);
    }
}
