//! Status snapshots and lifecycle notifications published by a run.

use serde::{Deserialize, Serialize};

use crate::core_modules::detection::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestratorState {
    #[default]
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: OrchestratorState,
    pub enabled: bool,
    pub current_point_index: usize,
    pub current_point_name: Option<String>,
    pub total_points: usize,
    pub last_rotation_played: Option<String>,
    pub rotations_played_count: u64,
    pub cycles_completed: u32,
    pub player_position: Option<Position>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NavEvent {
    RunStarted { total_points: usize, loop_count: u32 },
    RunStopped { reason: StopReason },
    RotationStarted { waypoint: String, rotation: String },
    RotationFinished { waypoint: String, rotation: String, completed: bool },
    WaypointReached { index: usize, waypoint: String },
    WaypointSkipped { index: usize, waypoint: String, attempts: u32 },
    CycleCompleted { cycles: u32 },
    UnexpectedTeleport { cause: String },
    FatalError { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum StopReason {
    /// Every configured loop finished.
    Completed,
    /// A stop was requested from outside.
    Requested,
    /// A fatal error ended the run.
    Failed(String),
}
