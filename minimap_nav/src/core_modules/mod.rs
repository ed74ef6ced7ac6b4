// Perception first (pixels up to detections), then navigation and actuation.
pub mod hsv;
pub mod bgr_image;
pub mod mask;
pub mod contours;
pub mod detection;
pub mod smoothing;
pub mod blob_detector;
pub mod detection_cell;
pub mod interrupt;
pub mod keypad;
pub mod waypoint;
pub mod navigator;
pub mod pathfinding;
pub mod port_flow;
