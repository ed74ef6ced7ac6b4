// THEORY:
// This file is the main entry point for the `minimap_nav` library crate. It
// exposes the `CvAutoOrchestrator` and the data structures around it (config,
// services, status and events) as the high-level interface of the navigation
// engine.
//
// Layering, leaves first:
// - `core_modules`: the marker detector (colour masks, contours, scoring,
//   smoothing), the waypoint navigator, pathfinding and portal handling, the
//   key layer and the interruptible wait they all share.
// - `detection_feed`: runs the detector on incoming minimap crops and keeps the
//   latest result for the orchestrator.
// - `orchestrator`: the run loop and its failure-escalation policy.

pub mod config;
pub mod core_modules;
pub mod detection_feed;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod services;

pub use config::{ExhaustionPolicy, NavConfig, NavPolicy, NavTimings, RunConfig};
pub use core_modules::bgr_image::{BgrImage, Region};
pub use core_modules::blob_detector::{BlobDetector, DetectorConfig};
pub use core_modules::detection::{DetectionResult, Position};
pub use core_modules::detection_cell::DetectionCell;
pub use core_modules::interrupt::StopSignal;
pub use core_modules::keypad::{Key, KeyInjector, KeySequence};
pub use core_modules::pathfinding::PathfindingConfig;
pub use core_modules::waypoint::{RotationMode, ToleranceMode, Waypoint};
pub use detection_feed::DetectionFeed;
pub use error::{NavError, Result};
pub use events::{NavEvent, OrchestratorState, StatusSnapshot, StopReason};
pub use orchestrator::{CvAutoOrchestrator, RunHandle, RunOutcome};
pub use services::{FrameSource, NavServices, RotationPlayer, SequenceLibrary};
