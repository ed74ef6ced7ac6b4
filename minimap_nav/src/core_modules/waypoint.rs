// THEORY:
// A `Waypoint` is a configured spot on the minimap ("departure point") with a
// tolerance rule that decides when the agent counts as having reached it. The
// rule is one of seven modes: a box (`both`), a band along one axis (`x_axis`,
// `y_axis`), or a half-plane (`x_greater`, `x_less`, `y_greater`, `y_less`).
// Half-plane modes ignore `tolerance_value`; they are strict comparisons.

use serde::{Deserialize, Serialize};

use crate::core_modules::detection::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToleranceMode {
    #[default]
    Both,
    XAxis,
    YAxis,
    XGreater,
    XLess,
    YGreater,
    YLess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationMode {
    #[default]
    Random,
    Sequential,
    Single,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub x: i32,
    pub y: i32,
    pub order: i32,
    #[serde(default)]
    pub tolerance_mode: ToleranceMode,
    #[serde(default = "default_tolerance")]
    pub tolerance_value: i32,
    #[serde(default)]
    pub rotation_paths: Vec<String>,
    #[serde(default)]
    pub rotation_mode: RotationMode,
    #[serde(default)]
    pub is_teleport_point: bool,
    #[serde(default = "default_auto_play")]
    pub auto_play: bool,
    #[serde(default)]
    pub pathfinding_sequence: Option<String>,
}

fn default_tolerance() -> i32 {
    5
}

fn default_auto_play() -> bool {
    true
}

impl Waypoint {
    /// A plain waypoint with `both` tolerance and no rotations.
    pub fn new(id: impl Into<String>, x: i32, y: i32, order: i32) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            x,
            y,
            order,
            tolerance_mode: ToleranceMode::Both,
            tolerance_value: default_tolerance(),
            rotation_paths: Vec::new(),
            rotation_mode: RotationMode::Random,
            is_teleport_point: false,
            auto_play: true,
            pathfinding_sequence: None,
        }
    }

    pub fn position(&self) -> Position {
        Position::new(self.x, self.y)
    }

    pub fn is_hit(&self, pos: Position) -> bool {
        let t = self.tolerance_value;
        match self.tolerance_mode {
            ToleranceMode::Both => (pos.x - self.x).abs() <= t && (pos.y - self.y).abs() <= t,
            ToleranceMode::XAxis => (pos.x - self.x).abs() <= t,
            ToleranceMode::YAxis => (pos.y - self.y).abs() <= t,
            ToleranceMode::XGreater => pos.x > self.x,
            ToleranceMode::XLess => pos.x < self.x,
            ToleranceMode::YGreater => pos.y > self.y,
            ToleranceMode::YLess => pos.y < self.y,
        }
    }

    /// Whether a hit leads to rotation playback.
    pub fn has_playable_rotation(&self) -> bool {
        self.auto_play && !self.rotation_paths.is_empty()
    }

    /// Signed horizontal distance still to cover, 0 when the mode ignores x or
    /// x is already satisfied.
    pub fn horizontal_error(&self, pos: Position) -> i32 {
        let dx = self.x - pos.x;
        match self.tolerance_mode {
            ToleranceMode::Both | ToleranceMode::XAxis if dx.abs() <= self.tolerance_value => 0,
            ToleranceMode::Both | ToleranceMode::XAxis => dx,
            ToleranceMode::XGreater if pos.x > self.x => 0,
            ToleranceMode::XGreater => dx + 1,
            ToleranceMode::XLess if pos.x < self.x => 0,
            ToleranceMode::XLess => dx - 1,
            _ => 0,
        }
    }

    /// Signed vertical distance still to cover (positive means downwards on
    /// screen), 0 when the mode ignores y or y is already satisfied.
    pub fn vertical_error(&self, pos: Position) -> i32 {
        let dy = self.y - pos.y;
        match self.tolerance_mode {
            ToleranceMode::Both | ToleranceMode::YAxis if dy.abs() <= self.tolerance_value => 0,
            ToleranceMode::Both | ToleranceMode::YAxis => dy,
            ToleranceMode::YGreater if pos.y > self.y => 0,
            ToleranceMode::YGreater => dy + 1,
            ToleranceMode::YLess if pos.y < self.y => 0,
            ToleranceMode::YLess => dy - 1,
            _ => 0,
        }
    }
}
