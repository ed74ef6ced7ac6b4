mod common;

use std::time::Duration;

use common::{RecordingKeys, ScriptedFrames, ScriptedRotations, config, services, waypoint};
use minimap_nav::{
    CvAutoOrchestrator, ExhaustionPolicy, NavError, NavEvent, OrchestratorState, Position, RunHandle, StopReason,
};
use tokio::sync::broadcast;
use tokio::time::{Instant, timeout};

fn drain(events: &mut broadcast::Receiver<NavEvent>) -> Vec<NavEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}

/// Stops `handle` and checks the run reaches STOPPED within 50 ms.
async fn stop_promptly(handle: RunHandle) {
    let status = handle.status_receiver();
    let stopped_at = Instant::now();
    handle.stop();
    let outcome = timeout(Duration::from_millis(50), handle.join())
        .await
        .expect("run did not stop within 50ms")
        .unwrap();
    assert!(stopped_at.elapsed() <= Duration::from_millis(50));
    assert_eq!(outcome.reason, StopReason::Requested);
    assert_eq!(status.borrow().state, OrchestratorState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn two_waypoint_loop_runs_to_completion() {
    let frames = ScriptedFrames::at(1, 1);
    let rotations = ScriptedRotations::new(&frames)
        .script("R1", 300, Some((98, 2)))
        .script("R2", 300, None);
    let keys = RecordingKeys::default();
    let mut cfg = config(vec![waypoint("A", 0, 0, 0, &["R1"]), waypoint("B", 100, 0, 1, &["R2"])]);
    cfg.run.loop_count = 1;

    let orchestrator = CvAutoOrchestrator::new(cfg, services(&frames, &rotations, &keys));
    let mut events = orchestrator.subscribe();
    let status = orchestrator.status_receiver();
    assert_eq!(status.borrow().state, OrchestratorState::Idle);

    let outcome = orchestrator.run().await.unwrap();

    assert_eq!(outcome.reason, StopReason::Completed);
    assert_eq!(outcome.state.rotations_played_count, 2);
    assert_eq!(outcome.state.cycles_completed, 1);
    assert_eq!(outcome.state.current_point_index, 0);
    assert_eq!(rotations.played(), ["R1", "R2"]);
    assert_eq!(keys.holds_of("right"), 0);

    let snapshot = status.borrow().clone();
    assert_eq!(snapshot.state, OrchestratorState::Stopped);
    assert!(!snapshot.enabled);
    assert_eq!(snapshot.last_rotation_played.as_deref(), Some("R2"));
    assert_eq!(snapshot.player_position, Some(Position::new(98, 2)));

    let events = drain(&mut events);
    assert!(matches!(events.first(), Some(NavEvent::RunStarted { total_points: 2, loop_count: 1 })));
    let rotations_started: Vec<_> = events
        .iter()
        .filter_map(|e| match e {
            NavEvent::RotationStarted { rotation, .. } => Some(rotation.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(rotations_started, ["R1", "R2"]);
    assert!(events.contains(&NavEvent::CycleCompleted { cycles: 1 }));
    assert!(!events.iter().any(|e| matches!(e, NavEvent::UnexpectedTeleport { .. })));
    assert_eq!(events.last(), Some(&NavEvent::RunStopped { reason: StopReason::Completed }));
}

#[tokio::test(start_paused = true)]
async fn loop_count_sets_the_number_of_cycles() {
    let frames = ScriptedFrames::at(1, 1);
    let rotations = ScriptedRotations::new(&frames)
        .script("R1", 100, Some((98, 2)))
        .script("R2", 100, Some((1, 1)));
    let keys = RecordingKeys::default();
    let mut cfg = config(vec![waypoint("A", 0, 0, 0, &["R1"]), waypoint("B", 100, 0, 1, &["R2"])]);
    cfg.run.loop_count = 2;

    let outcome = CvAutoOrchestrator::new(cfg, services(&frames, &rotations, &keys))
        .run()
        .await
        .unwrap();
    assert_eq!(outcome.state.cycles_completed, 2);
    assert_eq!(rotations.played(), ["R1", "R2", "R1", "R2"]);
}

#[tokio::test(start_paused = true)]
async fn portal_failure_is_fatal() {
    let frames = ScriptedFrames::at(0, 0);
    let rotations = ScriptedRotations::new(&frames);
    let keys = RecordingKeys::default();
    let mut gate = waypoint("gate", 200, 0, 0, &["R1"]);
    gate.is_teleport_point = true;
    let cfg = config(vec![gate]);

    let orchestrator = CvAutoOrchestrator::new(cfg, services(&frames, &rotations, &keys));
    let mut events = orchestrator.subscribe();
    let status = orchestrator.status_receiver();

    let err = orchestrator.run().await.unwrap_err();
    assert!(matches!(err, NavError::PortFlowFailure { attempts: 3, .. }), "{err}");
    assert_eq!(keys.holds_of("space"), 3);
    assert!(keys.all_released());
    assert_eq!(status.borrow().state, OrchestratorState::Stopped);

    let events = drain(&mut events);
    assert!(events.iter().any(|e| matches!(e, NavEvent::FatalError { .. })));
    assert!(matches!(
        events.last(),
        Some(NavEvent::RunStopped { reason: StopReason::Failed(_) })
    ));
    assert!(rotations.played().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unreachable_waypoint_is_skipped_by_default() {
    let frames = ScriptedFrames::at(0, 0);
    let rotations = ScriptedRotations::new(&frames);
    let keys = RecordingKeys::default();
    let cfg = config(vec![waypoint("far", 300, 0, 0, &["R1"]), waypoint("here", 0, 2, 1, &["R2"])]);
    assert_eq!(cfg.policy.on_navigation_exhausted, ExhaustionPolicy::SkipWaypoint);

    let orchestrator = CvAutoOrchestrator::new(cfg, services(&frames, &rotations, &keys));
    let mut events = orchestrator.subscribe();
    let outcome = orchestrator.run().await.unwrap();

    assert_eq!(outcome.reason, StopReason::Completed);
    assert_eq!(rotations.played(), ["R2"]);
    assert_eq!(outcome.state.cycles_completed, 1);
    assert!(drain(&mut events).contains(&NavEvent::WaypointSkipped {
        index: 0,
        waypoint: "far".into(),
        attempts: 10,
    }));
    assert!(keys.holds_of("right") >= 10);
    assert!(keys.all_released());
}

#[tokio::test(start_paused = true)]
async fn unreachable_waypoint_aborts_under_abort_policy() {
    let frames = ScriptedFrames::at(0, 0);
    let rotations = ScriptedRotations::new(&frames);
    let keys = RecordingKeys::default();
    let mut cfg = config(vec![waypoint("far", 300, 0, 0, &["R1"]), waypoint("here", 0, 2, 1, &["R2"])]);
    cfg.policy.on_navigation_exhausted = ExhaustionPolicy::AbortRun;

    let err = CvAutoOrchestrator::new(cfg, services(&frames, &rotations, &keys))
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, NavError::NavigationExhausted { attempts: 10, ref waypoint } if waypoint == "far"));
    assert!(rotations.played().is_empty());
}

#[tokio::test(start_paused = true)]
async fn start_preconditions_are_enforced() {
    let frames = ScriptedFrames::at(0, 0);
    let rotations = ScriptedRotations::new(&frames);
    let keys = RecordingKeys::default();

    let empty = CvAutoOrchestrator::new(config(Vec::new()), services(&frames, &rotations, &keys));
    assert!(matches!(empty.validate(), Err(NavError::InvalidConfiguration(_))));

    let silent = CvAutoOrchestrator::new(
        config(vec![waypoint("a", 0, 0, 0, &[])]),
        services(&frames, &rotations, &keys),
    );
    let status = silent.status_receiver();
    assert!(matches!(silent.spawn(), Err(NavError::InvalidConfiguration(_))));
    assert_eq!(status.borrow().state, OrchestratorState::Idle);

    let blind = ScriptedFrames::unavailable();
    let no_source = CvAutoOrchestrator::new(
        config(vec![waypoint("a", 0, 0, 0, &["R1"])]),
        services(&blind, &rotations, &keys),
    );
    assert!(matches!(no_source.run().await, Err(NavError::DetectionUnavailable)));
    assert!(rotations.played().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unexpected_teleport_resets_to_first_waypoint() {
    let frames = ScriptedFrames::at(1, 1);
    let rotations = ScriptedRotations::new(&frames).script("R1", 100, None);
    let keys = RecordingKeys::default();
    let cfg = config(vec![waypoint("A", 0, 0, 0, &["R1"]), waypoint("B", 100, 0, 1, &["R2"])]);

    let handle = CvAutoOrchestrator::new(cfg, services(&frames, &rotations, &keys))
        .spawn()
        .unwrap();
    let mut events = handle.subscribe();
    let mut status = handle.status_receiver();

    status.wait_for(|s| s.current_point_index == 1).await.unwrap();
    // relocated by something other than the engine
    frames.set(Some(Position::new(150, 90)));

    let cause = timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(NavEvent::UnexpectedTeleport { cause }) = events.recv().await {
                return cause;
            }
        }
    })
    .await
    .expect("no teleport reported");
    assert!(cause.contains("jumped"), "{cause}");
    assert_eq!(handle.status().current_point_index, 0);

    stop_promptly(handle).await;
}

#[tokio::test(start_paused = true)]
async fn long_marker_outage_reports_one_teleport() {
    let frames = ScriptedFrames::at(1, 1);
    let rotations = ScriptedRotations::new(&frames).script("R1", 100, None);
    let keys = RecordingKeys::default();
    let mut cfg = config(vec![waypoint("A", 0, 0, 0, &["R1"]), waypoint("B", 100, 0, 1, &["R2"])]);
    cfg.run.loop_count = 100;

    let handle = CvAutoOrchestrator::new(cfg, services(&frames, &rotations, &keys))
        .spawn()
        .unwrap();
    let mut events = handle.subscribe();
    let mut status = handle.status_receiver();

    status.wait_for(|s| s.current_point_index == 1).await.unwrap();
    frames.set(None);
    // five lost timeouts' worth of ticks with no marker
    tokio::time::sleep(Duration::from_secs(10)).await;

    let teleports = drain(&mut events)
        .into_iter()
        .filter(|e| matches!(e, NavEvent::UnexpectedTeleport { .. }))
        .count();
    assert_eq!(teleports, 1);
    assert_eq!(handle.status().current_point_index, 0);
    assert_eq!(handle.status().state, OrchestratorState::Running);

    // the marker coming back is a fresh reference, not a jump
    frames.set(Some(Position::new(1, 1)));
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(
        !drain(&mut events)
            .iter()
            .any(|e| matches!(e, NavEvent::UnexpectedTeleport { .. }))
    );

    stop_promptly(handle).await;
}

#[tokio::test(start_paused = true)]
async fn detection_outage_mid_run_idles_then_resumes() {
    let frames = ScriptedFrames::at(1, 1);
    let rotations = ScriptedRotations::new(&frames)
        .script("R1", 300, Some((98, 2)))
        .script("R2", 300, None);
    let keys = RecordingKeys::default();
    let mut cfg = config(vec![waypoint("A", 0, 0, 0, &["R1"]), waypoint("B", 100, 0, 1, &["R2"])]);
    cfg.run.loop_count = 1;

    let handle = CvAutoOrchestrator::new(cfg, services(&frames, &rotations, &keys))
        .spawn()
        .unwrap();
    let mut events = handle.subscribe();
    let mut status = handle.status_receiver();

    status.wait_for(|s| s.current_point_index == 1).await.unwrap();
    frames.set_available(false);
    let key_events = keys.event_count();

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(keys.event_count(), key_events);
    assert_eq!(rotations.played(), ["R1"]);
    assert_eq!(handle.status().state, OrchestratorState::Running);
    assert_eq!(handle.status().current_point_index, 1);
    assert!(
        !drain(&mut events)
            .iter()
            .any(|e| matches!(e, NavEvent::UnexpectedTeleport { .. } | NavEvent::RotationStarted { .. }))
    );

    frames.set_available(true);
    let outcome = timeout(Duration::from_secs(5), handle.join())
        .await
        .expect("run did not finish after detection returned")
        .unwrap();
    assert_eq!(outcome.reason, StopReason::Completed);
    assert_eq!(rotations.played(), ["R1", "R2"]);
    assert!(keys.all_released());
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_navigation_wait() {
    let frames = ScriptedFrames::at(0, 0);
    let rotations = ScriptedRotations::new(&frames);
    let keys = RecordingKeys::default();
    let mut cfg = config(vec![waypoint("far", 300, 0, 0, &["R1"])]);
    cfg.timings.settle_horizontal_ms = 60_000;

    let handle = CvAutoOrchestrator::new(cfg, services(&frames, &rotations, &keys))
        .spawn()
        .unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(keys.holds_of("right") >= 1);
    assert_eq!(handle.status().state, OrchestratorState::Running);

    stop_promptly(handle).await;
    assert!(keys.all_released());
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_rotation_playback() {
    let frames = ScriptedFrames::at(0, 0);
    let rotations = ScriptedRotations::new(&frames).script("R1", 60_000, None);
    let keys = RecordingKeys::default();
    let cfg = config(vec![waypoint("A", 0, 0, 0, &["R1"])]);

    let handle = CvAutoOrchestrator::new(cfg, services(&frames, &rotations, &keys))
        .spawn()
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(rotations.played(), ["R1"]);

    stop_promptly(handle).await;
}

#[tokio::test(start_paused = true)]
async fn stop_interrupts_portal_stabilisation() {
    let frames = ScriptedFrames::at(0, 0);
    let rotations = ScriptedRotations::new(&frames);
    let keys = RecordingKeys::default();
    let mut gate = waypoint("gate", 200, 0, 0, &["R1"]);
    gate.is_teleport_point = true;
    let mut cfg = config(vec![gate]);
    cfg.timings.port_stabilization_ms = 60_000;

    let handle = CvAutoOrchestrator::new(cfg, services(&frames, &rotations, &keys))
        .spawn()
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(keys.holds_of("space"), 1);

    stop_promptly(handle).await;
    assert!(keys.all_released());
}
