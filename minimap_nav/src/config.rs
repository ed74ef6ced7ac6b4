//! Run configuration, loaded from a single TOML document.
//!
//! ```toml
//! [run]
//! loop_count = 3
//! jump_key = "alt"
//!
//! [pathfinding]
//! class_type = "magician"
//! teleport_skill = "x"
//!
//! [[waypoints]]
//! id = "a"
//! x = 40
//! y = 60
//! order = 0
//! rotation_paths = ["rot_a"]
//! ```

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core_modules::blob_detector::DetectorConfig;
use crate::core_modules::keypad::Key;
use crate::core_modules::pathfinding::{PathfindingConfig, PathfindingSettings};
use crate::core_modules::port_flow::{PortDetector, PortFlowSettings};
use crate::core_modules::waypoint::Waypoint;
use crate::error::{NavError, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NavConfig {
    #[serde(default)]
    pub run: RunConfig,
    #[serde(default)]
    pub pathfinding: PathfindingConfig,
    #[serde(default)]
    pub waypoints: Vec<Waypoint>,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub timings: NavTimings,
    #[serde(default)]
    pub policy: NavPolicy,
}

/// Fixed for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_loop_count")]
    pub loop_count: u32,
    #[serde(default = "default_speed")]
    pub speed: f64,
    #[serde(default)]
    pub jitter_time: f64,
    #[serde(default)]
    pub jitter_hold: f64,
    #[serde(default = "default_jump_key")]
    pub jump_key: Key,
    /// Falls back to `jump_key`.
    #[serde(default)]
    pub portal_key: Option<Key>,
}

fn default_loop_count() -> u32 {
    1
}
fn default_speed() -> f64 {
    1.0
}
fn default_jump_key() -> Key {
    Key::new("space")
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            loop_count: default_loop_count(),
            speed: default_speed(),
            jitter_time: 0.0,
            jitter_hold: 0.0,
            jump_key: default_jump_key(),
            portal_key: None,
        }
    }
}

impl RunConfig {
    pub fn portal_key(&self) -> Key {
        self.portal_key.clone().unwrap_or_else(|| self.jump_key.clone())
    }
}

/// Every wait and cap in the engine, in milliseconds where it is a duration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NavTimings {
    pub poll_interval_ms: u64,
    pub post_rotation_pause_ms: u64,
    pub settle_horizontal_ms: u64,
    pub settle_vertical_ms: u64,
    pub port_stabilization_ms: u64,
    pub teleport_pause_ms: u64,
    pub key_tap_ms: u64,
    pub jump_gap_ms: u64,
    pub detection_retries: u32,
    pub detection_interval_ms: u64,
    pub max_pathfinding_attempts: u32,
    pub horizontal_threshold_px: i32,
    pub teleport_jump_px: f64,
    pub detection_lost_timeout_ms: u64,
    /// Seeds key jitter and random rotation choice. Random when unset.
    pub rng_seed: Option<u64>,
}

impl Default for NavTimings {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            post_rotation_pause_ms: 500,
            settle_horizontal_ms: 800,
            settle_vertical_ms: 1000,
            port_stabilization_ms: 500,
            teleport_pause_ms: 1000,
            key_tap_ms: 60,
            jump_gap_ms: 120,
            detection_retries: 3,
            detection_interval_ms: 100,
            max_pathfinding_attempts: 10,
            horizontal_threshold_px: 50,
            teleport_jump_px: 50.0,
            detection_lost_timeout_ms: 2000,
            rng_seed: None,
        }
    }
}

impl NavTimings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn post_rotation_pause(&self) -> Duration {
        Duration::from_millis(self.post_rotation_pause_ms)
    }

    pub fn teleport_pause(&self) -> Duration {
        Duration::from_millis(self.teleport_pause_ms)
    }

    pub fn key_tap(&self) -> Duration {
        Duration::from_millis(self.key_tap_ms)
    }

    pub fn pathfinding_settings(&self) -> PathfindingSettings {
        PathfindingSettings {
            max_attempts: self.max_pathfinding_attempts,
            horizontal_threshold: self.horizontal_threshold_px,
            settle_horizontal: Duration::from_millis(self.settle_horizontal_ms),
            settle_vertical: Duration::from_millis(self.settle_vertical_ms),
            jump_gap: Duration::from_millis(self.jump_gap_ms),
            detection_retries: self.detection_retries,
            detection_interval: Duration::from_millis(self.detection_interval_ms),
            ..PathfindingSettings::default()
        }
    }

    pub fn port_flow_settings(&self) -> PortFlowSettings {
        PortFlowSettings {
            stabilization: Duration::from_millis(self.port_stabilization_ms),
            detection_retries: self.detection_retries,
            detection_interval: Duration::from_millis(self.detection_interval_ms),
            ..PortFlowSettings::default()
        }
    }

    pub fn port_detector(&self) -> PortDetector {
        PortDetector::new(
            self.teleport_jump_px,
            Duration::from_millis(self.detection_lost_timeout_ms),
        )
    }
}

/// What to do when pathfinding gives up on a waypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExhaustionPolicy {
    /// Advance past the waypoint without playing its rotation.
    #[default]
    SkipWaypoint,
    /// Stop the run with `NavigationExhausted`.
    AbortRun,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NavPolicy {
    #[serde(default)]
    pub on_navigation_exhausted: ExhaustionPolicy,
}

impl NavConfig {
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_toml_str(&content)
    }

    /// Parses a TOML document. A waypoint written without `name` is named
    /// after its `id`.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        for wp in &mut config.waypoints {
            if wp.name.is_empty() {
                wp.name = wp.id.clone();
            }
        }
        Ok(config)
    }

    /// Start-time checks. A run never enters RUNNING with a config that fails
    /// here.
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(NavError::InvalidConfiguration(msg));

        if self.waypoints.is_empty() {
            return invalid("at least one waypoint is required".into());
        }
        let mut ids = HashSet::new();
        let mut orders = HashSet::new();
        for wp in &self.waypoints {
            if !ids.insert(wp.id.as_str()) {
                return invalid(format!("duplicate waypoint id '{}'", wp.id));
            }
            if !orders.insert(wp.order) {
                return invalid(format!("duplicate waypoint order {}", wp.order));
            }
            if wp.tolerance_value < 1 {
                return invalid(format!("waypoint '{}' has tolerance_value < 1", wp.id));
            }
        }
        if !self.waypoints.iter().any(|wp| !wp.rotation_paths.is_empty()) {
            return invalid("no waypoint has a rotation to play".into());
        }
        if self.run.loop_count < 1 {
            return invalid("loop_count must be at least 1".into());
        }
        if !(self.run.speed > 0.0) {
            return invalid("speed must be positive".into());
        }
        if !(self.detector.ema_alpha > 0.0 && self.detector.ema_alpha <= 1.0) {
            return invalid("detector.ema_alpha must be in (0, 1]".into());
        }
        self.pathfinding.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::smoothing::StalePolicy;

    const SAMPLE: &str = r#"
        [run]
        loop_count = 2
        jump_key = "alt"

        [pathfinding]
        class_type = "other"
        rope_lift_key = "c"
        diagonal_movement_key = "d"

        [[waypoints]]
        id = "a"
        x = 0
        y = 0
        order = 0
        rotation_paths = ["r1"]
        rotation_mode = "single"

        [[waypoints]]
        id = "b"
        x = 100
        y = 0
        order = 1
        is_teleport_point = true

        [detector]
        stale_policy = { mode = "hold_last", max_frames = 3 }

        [timings]
        poll_interval_ms = 250
        rng_seed = 9

        [policy]
        on_navigation_exhausted = "abort_run"
    "#;

    #[test]
    fn parses_full_document() {
        let config = NavConfig::from_toml_str(SAMPLE).unwrap();
        config.validate().unwrap();
        assert_eq!(config.run.loop_count, 2);
        assert_eq!(config.run.portal_key(), Key::new("alt"));
        assert_eq!(config.waypoints.len(), 2);
        assert!(config.waypoints[1].is_teleport_point);
        assert_eq!(config.detector.stale_policy, StalePolicy::HoldLast { max_frames: 3 });
        assert_eq!(config.timings.poll_interval(), Duration::from_millis(250));
        assert_eq!(config.timings.settle_vertical_ms, 1000);
        assert_eq!(config.timings.rng_seed, Some(9));
        assert_eq!(config.policy.on_navigation_exhausted, ExhaustionPolicy::AbortRun);
        assert!(matches!(config.pathfinding, PathfindingConfig::Other { double_jump_up_allowed: true, .. }));
    }

    #[test]
    fn minimal_document_uses_defaults() {
        let config = NavConfig::from_toml_str(
            r#"
            [[waypoints]]
            id = "a"
            x = 1
            y = 2
            order = 0
            rotation_paths = ["r"]
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.run, RunConfig::default());
        assert_eq!(config.policy.on_navigation_exhausted, ExhaustionPolicy::SkipWaypoint);
        assert_eq!(config.detector.stale_policy, StalePolicy::ReportLost);
    }

    #[test]
    fn unnamed_waypoint_takes_its_id() {
        let config = NavConfig::from_toml_str(
            r#"
            [[waypoints]]
            id = "ledge"
            x = 1
            y = 2
            order = 0
            rotation_paths = ["r"]

            [[waypoints]]
            id = "rope"
            name = "Rope Top"
            x = 5
            y = 2
            order = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.waypoints[0].name, "ledge");
        assert_eq!(config.waypoints[1].name, "Rope Top");
    }

    #[test]
    fn rejects_bad_documents() {
        let base = NavConfig::from_toml_str(SAMPLE).unwrap();

        let mut empty = base.clone();
        empty.waypoints.clear();
        assert!(matches!(empty.validate(), Err(NavError::InvalidConfiguration(_))));

        let mut no_rotations = base.clone();
        for wp in &mut no_rotations.waypoints {
            wp.rotation_paths.clear();
        }
        assert!(no_rotations.validate().is_err());

        let mut duplicate = base.clone();
        duplicate.waypoints[1].id = "a".into();
        assert!(duplicate.validate().is_err());

        let mut zero_loops = base.clone();
        zero_loops.run.loop_count = 0;
        assert!(zero_loops.validate().is_err());

        let mut tight = base;
        tight.waypoints[0].tolerance_value = 0;
        assert!(tight.validate().is_err());

        let magician = NavConfig::from_toml_str("[pathfinding]\nclass_type = \"magician\"\n");
        assert!(matches!(magician, Err(NavError::ConfigParse(_))));
    }
}
