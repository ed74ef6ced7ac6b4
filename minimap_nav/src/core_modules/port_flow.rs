// THEORY:
// Portals relocate the agent instantly, so the usual "move a bit, look again"
// loop does not apply to them.
//
// `PortFlowHandler` drives a portal waypoint:
// 1.  Press the activation key.
// 2.  Wait a fixed stabilisation interval for the relocation animation.
// 3.  Re-sample and hit-test. On a miss, nudge horizontally toward the portal
//     and go again.
// Three attempts at most. Running out is fatal to the whole run: a portal that
// will not take us is not something more retries fix.
//
// `PortDetector` watches every orchestrator poll for relocations nobody asked
// for: a jump larger than a pixel threshold between consecutive samples, or no
// detection for longer than a timeout. Either means the navigator's idea of
// "where we are in the route" can no longer be trusted. The orchestrator
// re-baselines the detector after its own actions so intended moves never
// trigger it.

use std::fmt;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{info, warn};

use crate::core_modules::detection::Position;
use crate::core_modules::detection_cell::sample_position;
use crate::core_modules::keypad::{Key, KeyPad};
use crate::core_modules::waypoint::Waypoint;
use crate::error::{NavError, Result};
use crate::services::FrameSource;

#[derive(Debug, Clone, PartialEq)]
pub struct PortFlowSettings {
    pub max_attempts: u32,
    pub stabilization: Duration,
    /// Horizontal nudge per pixel of misalignment.
    pub alignment_per_px: Duration,
    pub max_alignment: Duration,
    pub detection_retries: u32,
    pub detection_interval: Duration,
}

impl Default for PortFlowSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            stabilization: Duration::from_millis(500),
            alignment_per_px: Duration::from_millis(20),
            max_alignment: Duration::from_millis(1000),
            detection_retries: 3,
            detection_interval: Duration::from_millis(100),
        }
    }
}

pub struct PortFlowHandler {
    portal_key: Key,
    settings: PortFlowSettings,
}

impl PortFlowHandler {
    pub fn new(portal_key: Key, settings: PortFlowSettings) -> Self {
        Self { portal_key, settings }
    }

    /// Takes the portal toward `target`. Returns the position reached, or
    /// `PortFlowFailure` once every attempt missed.
    pub async fn execute(
        &self,
        keypad: &mut KeyPad,
        frames: &dyn FrameSource,
        current: Position,
        target: &Waypoint,
    ) -> Result<Position> {
        let mut pos = current;
        let attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=attempts {
            info!(waypoint = %target.name, attempt, "activating portal");
            keypad.tap(&self.portal_key).await?;
            keypad.pause(self.settings.stabilization).await?;

            let sampled = sample_position(
                frames,
                keypad.stop_signal(),
                self.settings.detection_retries,
                self.settings.detection_interval,
            )
            .await?;
            match sampled {
                Some(p) if target.is_hit(p) => {
                    info!(waypoint = %target.name, attempt, "portal reached");
                    return Ok(p);
                }
                Some(p) => pos = p,
                None => warn!(attempt, "no detection after portal activation"),
            }

            if attempt < attempts {
                self.align(keypad, pos, target).await?;
            }
        }

        Err(NavError::PortFlowFailure {
            waypoint: target.name.clone(),
            attempts,
        })
    }

    async fn align(&self, keypad: &mut KeyPad, pos: Position, target: &Waypoint) -> Result<()> {
        let dx = target.horizontal_error(pos);
        if dx == 0 {
            return Ok(());
        }
        let direction = if dx > 0 { Key::right() } else { Key::left() };
        let hold = (self.settings.alignment_per_px * dx.unsigned_abs()).min(self.settings.max_alignment);
        keypad.press(&direction, hold).await
    }
}

/// Why the agent is believed to have been relocated.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TeleportCause {
    Jump { from: Position, to: Position, distance: f64 },
    Lost { for_duration: Duration },
}

impl fmt::Display for TeleportCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeleportCause::Jump { from, to, distance } => write!(
                f,
                "position jumped {distance:.0}px from ({}, {}) to ({}, {})",
                from.x, from.y, to.x, to.y
            ),
            TeleportCause::Lost { for_duration } => {
                write!(f, "no detection for {:.1}s", for_duration.as_secs_f64())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct PortDetector {
    jump_threshold: f64,
    lost_timeout: Duration,
    last_position: Option<Position>,
    last_seen: Option<Instant>,
}

impl Default for PortDetector {
    fn default() -> Self {
        Self::new(50.0, Duration::from_secs(2))
    }
}

impl PortDetector {
    pub fn new(jump_threshold: f64, lost_timeout: Duration) -> Self {
        Self {
            jump_threshold,
            lost_timeout,
            last_position: None,
            last_seen: None,
        }
    }

    /// Feeds one poll's position. Fires at most once per jump, and once per
    /// detection outage.
    pub fn observe(&mut self, position: Option<Position>, now: Instant) -> Option<TeleportCause> {
        match position {
            Some(to) => {
                let cause = self.last_position.and_then(|from| {
                    let distance = from.distance_to(to);
                    (distance > self.jump_threshold).then_some(TeleportCause::Jump { from, to, distance })
                });
                self.last_position = Some(to);
                self.last_seen = Some(now);
                cause
            }
            None => {
                let since = self.last_seen?;
                let for_duration = now.saturating_duration_since(since);
                if for_duration > self.lost_timeout {
                    self.last_position = None;
                    self.last_seen = None;
                    Some(TeleportCause::Lost { for_duration })
                } else {
                    None
                }
            }
        }
    }

    /// Accepts `position` as the new reference without judging the move.
    /// Without a position the outage clock restarts, unless the outage was
    /// already reported: that one stays closed until the marker is seen again.
    pub fn rebaseline(&mut self, position: Option<Position>, now: Instant) {
        match position {
            Some(_) => {
                self.last_position = position;
                self.last_seen = Some(now);
            }
            None if self.last_seen.is_some() => self.last_seen = Some(now),
            None => {}
        }
    }
}
