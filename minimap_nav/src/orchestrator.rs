// THEORY:
// The `orchestrator` module is the top-level API of the navigation engine. A
// `CvAutoOrchestrator` is built once per run from a `NavConfig` and the external
// services, and owns everything the run mutates: the navigator, the key pad,
// the pathfinding and portal controllers, and the teleport watchdog. Nothing is
// process-global, so independent runs never share state.
//
// Lifecycle: IDLE → RUNNING → STOPPING → STOPPED. Start preconditions are
// checked while still IDLE; a run that fails them never starts.
//
// Each RUNNING tick (every ~500 ms):
// 1.  Snapshot the latest detection; an unavailable source is waited out.
// 2.  Feed the position to the `PortDetector`; an unexpected teleport resets
//     the navigator to the first waypoint and pauses briefly.
//     Both come back from the tick as recoverable `NavError`s; anything
//     `is_fatal` ends the run.
// 3.  Hit-test the current waypoint. On a hit, play the selected rotation and
//     advance; wrapping past the last waypoint completes a cycle, and the run
//     ends once `loop_count` cycles are done.
// 4.  On a miss, take the portal (teleport waypoints) or pathfind. Portal
//     exhaustion is fatal; pathfinding exhaustion follows the configured policy.
// 5.  Re-baseline the teleport watchdog after any action we took ourselves.
//
// Every wait goes through the stop signal, so a stop ends the run within
// milliseconds wherever control currently is. Keys still held are released on
// every exit path.

use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::config::{ExhaustionPolicy, NavConfig};
use crate::core_modules::detection::Position;
use crate::core_modules::interrupt::StopSignal;
use crate::core_modules::keypad::KeyPad;
use crate::core_modules::navigator::{Advance, NavigationState, PointNavigator};
use crate::core_modules::pathfinding::{NavigationOutcome, PathfindingController};
use crate::core_modules::port_flow::{PortDetector, PortFlowHandler};
use crate::error::{NavError, Result};
use crate::events::{NavEvent, OrchestratorState, StatusSnapshot, StopReason};
use crate::services::{FrameSource, NavServices, RotationPlayer, SequenceLibrary};

const EVENT_CAPACITY: usize = 64;

/// How a run ended when it ended without a fatal error.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub reason: StopReason,
    pub state: NavigationState,
}

pub struct CvAutoOrchestrator {
    config: NavConfig,
    services: NavServices,
    stop: StopSignal,
    status_tx: watch::Sender<StatusSnapshot>,
    events_tx: broadcast::Sender<NavEvent>,
}

impl CvAutoOrchestrator {
    pub fn new(config: NavConfig, services: NavServices) -> Self {
        let (status_tx, _) = watch::channel(StatusSnapshot {
            total_points: config.waypoints.len(),
            ..StatusSnapshot::default()
        });
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            config,
            services,
            stop: StopSignal::new(),
            status_tx,
            events_tx,
        }
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NavEvent> {
        self.events_tx.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<NavEvent> {
        self.events_tx.clone()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status_tx.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_tx.subscribe()
    }

    /// Start preconditions: a valid config with at least one playable rotation
    /// and a live detection source.
    pub fn validate(&self) -> Result<()> {
        self.config.validate()?;
        if !self.services.frames.is_available() {
            return Err(NavError::DetectionUnavailable);
        }
        Ok(())
    }

    /// Validates, then runs on a new task.
    pub fn spawn(self) -> Result<RunHandle> {
        self.validate()?;
        let stop = self.stop.clone();
        let status = self.status_tx.subscribe();
        let events = self.events_tx.clone();
        let task = tokio::spawn(self.run());
        Ok(RunHandle {
            stop,
            status,
            events,
            task: Some(task),
        })
    }

    /// Runs to completion. Fatal errors come back as `Err` after the run has
    /// reached STOPPED; a requested stop is a normal outcome.
    pub async fn run(self) -> Result<RunOutcome> {
        self.validate()?;
        let Self {
            config,
            services,
            stop,
            status_tx,
            events_tx,
        } = self;

        let mut run = ActiveRun::new(config, services, stop, status_tx, events_tx)?;
        run.publish(OrchestratorState::Running);
        run.emit(NavEvent::RunStarted {
            total_points: run.navigator.state().total_points,
            loop_count: run.config.run.loop_count,
        });
        info!(
            waypoints = run.navigator.state().total_points,
            loop_count = run.config.run.loop_count,
            "navigation run started"
        );

        let result = run.drive().await;

        run.publish(OrchestratorState::Stopping);
        if let Err(err) = run.keypad.release_all() {
            warn!(%err, "could not release every key on exit");
        }

        let (reason, outcome) = match result {
            Ok(()) => (StopReason::Completed, Ok(())),
            Err(NavError::Cancelled) => (StopReason::Requested, Ok(())),
            Err(err) => {
                error!(%err, "navigation run failed");
                run.emit(NavEvent::FatalError { reason: err.to_string() });
                (StopReason::Failed(err.to_string()), Err(err))
            }
        };
        info!(?reason, "navigation run stopped");
        run.emit(NavEvent::RunStopped { reason: reason.clone() });
        run.publish(OrchestratorState::Stopped);

        outcome.map(|()| RunOutcome {
            reason,
            state: run.navigator.state().clone(),
        })
    }
}

/// Control surface for a spawned run.
pub struct RunHandle {
    stop: StopSignal,
    status: watch::Receiver<StatusSnapshot>,
    events: broadcast::Sender<NavEvent>,
    task: Option<JoinHandle<Result<RunOutcome>>>,
}

impl RunHandle {
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn status(&self) -> StatusSnapshot {
        self.status.borrow().clone()
    }

    pub fn status_receiver(&self) -> watch::Receiver<StatusSnapshot> {
        self.status.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NavEvent> {
        self.events.subscribe()
    }

    pub fn event_sender(&self) -> broadcast::Sender<NavEvent> {
        self.events.clone()
    }

    pub async fn join(mut self) -> Result<RunOutcome> {
        let task = self
            .task
            .take()
            .ok_or_else(|| NavError::InvalidState("run already joined".into()))?;
        match task.await {
            Ok(result) => result,
            Err(err) => Err(NavError::InvalidState(format!("run task ended abnormally: {err}"))),
        }
    }
}

enum Tick {
    Continue,
    Finished,
}

/// Everything a RUNNING orchestrator mutates.
struct ActiveRun {
    config: NavConfig,
    frames: Arc<dyn FrameSource>,
    rotations: Arc<dyn RotationPlayer>,
    sequences: Arc<dyn SequenceLibrary>,
    keypad: KeyPad,
    navigator: PointNavigator,
    pathfinder: PathfindingController,
    port_flow: PortFlowHandler,
    port_detector: PortDetector,
    stop: StopSignal,
    status_tx: watch::Sender<StatusSnapshot>,
    events_tx: broadcast::Sender<NavEvent>,
    state: OrchestratorState,
    player_position: Option<Position>,
    source_was_available: bool,
}

impl ActiveRun {
    fn new(
        config: NavConfig,
        services: NavServices,
        stop: StopSignal,
        status_tx: watch::Sender<StatusSnapshot>,
        events_tx: broadcast::Sender<NavEvent>,
    ) -> Result<Self> {
        let seed = config.timings.rng_seed;
        let navigator = PointNavigator::new(config.waypoints.clone(), seed)?;
        let keypad = KeyPad::new(services.keys, stop.clone(), seed.map(|s| s.wrapping_add(1)))
            .with_tap_duration(config.timings.key_tap());
        let pathfinder = PathfindingController::new(
            config.pathfinding.clone(),
            config.run.jump_key.clone(),
            config.timings.pathfinding_settings(),
        )?;
        let port_flow = PortFlowHandler::new(config.run.portal_key(), config.timings.port_flow_settings());
        let mut port_detector = config.timings.port_detector();

        let player_position = services.frames.latest_detection().and_then(|d| d.player_position());
        port_detector.rebaseline(player_position, Instant::now());

        Ok(Self {
            frames: services.frames,
            rotations: services.rotations,
            sequences: services.sequences,
            keypad,
            navigator,
            pathfinder,
            port_flow,
            port_detector,
            stop,
            status_tx,
            events_tx,
            state: OrchestratorState::Idle,
            player_position,
            source_was_available: true,
            config,
        })
    }

    async fn drive(&mut self) -> Result<()> {
        loop {
            self.stop.check()?;
            match self.tick().await {
                Ok(Tick::Finished) => return Ok(()),
                Ok(Tick::Continue) => {}
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => self.recover(err).await?,
            }
            self.stop.sleep(self.config.timings.poll_interval()).await?;
        }
    }

    /// Handles an error that leaves the run going. `Cancelled` is passed back.
    async fn recover(&mut self, err: NavError) -> Result<()> {
        match err {
            NavError::DetectionUnavailable => {
                if self.source_was_available {
                    warn!(error = %err, "idling until detection returns");
                    self.source_was_available = false;
                }
                self.port_detector.rebaseline(None, Instant::now());
                Ok(())
            }
            NavError::UnexpectedTeleport { ref cause } => {
                warn!(error = %err, "resetting to the first waypoint");
                self.emit(NavEvent::UnexpectedTeleport { cause: cause.clone() });
                self.navigator.reset();
                self.publish(self.state);
                self.keypad.pause(self.config.timings.teleport_pause()).await?;
                self.rebaseline();
                Ok(())
            }
            other => Err(other),
        }
    }

    async fn tick(&mut self) -> Result<Tick> {
        // --- 1. Detection snapshot ---
        if !self.frames.is_available() {
            return Err(NavError::DetectionUnavailable);
        }
        self.source_was_available = true;
        let position = self.sample();
        self.player_position = position;
        self.publish(self.state);

        // --- 2. Teleport watchdog ---
        if let Some(cause) = self.port_detector.observe(position, Instant::now()) {
            return Err(NavError::UnexpectedTeleport { cause: cause.to_string() });
        }

        let Some(pos) = position else {
            debug!("primary marker not detected this tick");
            return Ok(Tick::Continue);
        };

        // --- 3. Hit → rotation → advance ---
        if self.navigator.is_hit(pos) {
            let tick = self.on_hit().await?;
            self.rebaseline();
            return Ok(tick);
        }

        // --- 4. Miss → portal or pathfinding ---
        let target = self.navigator.current().clone();
        let tick = if target.is_teleport_point {
            self.port_flow
                .execute(&mut self.keypad, self.frames.as_ref(), pos, &target)
                .await?;
            Tick::Continue
        } else {
            let outcome = self
                .pathfinder
                .navigate_to(
                    &mut self.keypad,
                    self.frames.as_ref(),
                    self.sequences.as_ref(),
                    pos,
                    &target,
                )
                .await?;
            match outcome {
                NavigationOutcome::Reached { attempts, .. } => {
                    debug!(waypoint = %target.name, attempts, "pathfinding reached waypoint");
                    Tick::Continue
                }
                NavigationOutcome::Exhausted { attempts, .. } => self.on_exhausted(attempts)?,
            }
        };

        // --- 5. Our own moves are not teleports ---
        self.rebaseline();
        Ok(tick)
    }

    async fn on_hit(&mut self) -> Result<Tick> {
        let index = self.navigator.current_index();
        let waypoint = self.navigator.current().name.clone();
        info!(index, %waypoint, "waypoint reached");
        self.emit(NavEvent::WaypointReached {
            index,
            waypoint: waypoint.clone(),
        });

        if let Some(rotation) = self.navigator.on_hit() {
            self.emit(NavEvent::RotationStarted {
                waypoint: waypoint.clone(),
                rotation: rotation.clone(),
            });
            info!(%rotation, %waypoint, "playing rotation");
            let run = &self.config.run;
            let completed = self
                .rotations
                .play(&rotation, run.speed, run.jitter_time, run.jitter_hold, self.stop.clone())
                .await;
            if completed {
                self.navigator.record_rotation(&rotation);
            } else {
                warn!(%rotation, "rotation did not complete");
            }
            self.emit(NavEvent::RotationFinished {
                waypoint,
                rotation,
                completed,
            });
            self.stop.check()?;
            self.publish(self.state);
            self.keypad.pause(self.config.timings.post_rotation_pause()).await?;
        }

        Ok(self.advance())
    }

    fn on_exhausted(&mut self, attempts: u32) -> Result<Tick> {
        let index = self.navigator.current_index();
        let waypoint = self.navigator.current().name.clone();
        match self.config.policy.on_navigation_exhausted {
            ExhaustionPolicy::SkipWaypoint => {
                warn!(index, %waypoint, attempts, "waypoint unreachable, skipping");
                self.emit(NavEvent::WaypointSkipped {
                    index,
                    waypoint,
                    attempts,
                });
                Ok(self.advance())
            }
            ExhaustionPolicy::AbortRun => Err(NavError::NavigationExhausted { waypoint, attempts }),
        }
    }

    fn advance(&mut self) -> Tick {
        let advance = self.navigator.advance();
        self.publish(self.state);
        match advance {
            Advance::Next(next) => {
                debug!(next, "advanced to next waypoint");
                Tick::Continue
            }
            Advance::CycleCompleted(cycles) => {
                info!(cycles, "cycle completed");
                self.emit(NavEvent::CycleCompleted { cycles });
                if cycles >= self.config.run.loop_count {
                    Tick::Finished
                } else {
                    Tick::Continue
                }
            }
        }
    }

    fn sample(&self) -> Option<Position> {
        self.frames.latest_detection().and_then(|d| d.player_position())
    }

    fn rebaseline(&mut self) {
        let position = self.sample();
        self.player_position = position.or(self.player_position);
        self.port_detector.rebaseline(position, Instant::now());
    }

    fn emit(&self, event: NavEvent) {
        // no subscribers is fine
        let _ = self.events_tx.send(event);
    }

    fn publish(&mut self, state: OrchestratorState) {
        self.state = state;
        let nav = self.navigator.state();
        let snapshot = StatusSnapshot {
            state,
            enabled: state == OrchestratorState::Running,
            current_point_index: nav.current_point_index,
            current_point_name: Some(self.navigator.current().name.clone()),
            total_points: nav.total_points,
            last_rotation_played: nav.last_rotation_played.clone(),
            rotations_played_count: nav.rotations_played_count,
            cycles_completed: nav.cycles_completed,
            player_position: self.player_position,
        };
        self.status_tx.send_replace(snapshot);
    }
}
