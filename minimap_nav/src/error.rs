//! Error taxonomy for the navigation engine.

use thiserror::Error;

/// Every failure the engine can report, from detection outages to fatal
/// portal failures.
#[derive(Error, Debug)]
pub enum NavError {
    #[error("Detection unavailable: no frame or minimap region is configured")]
    DetectionUnavailable,

    #[error("Navigation exhausted: waypoint '{waypoint}' not reached after {attempts} attempts")]
    NavigationExhausted { waypoint: String, attempts: u32 },

    #[error("Port flow failed: waypoint '{waypoint}' not reached after {attempts} portal attempts")]
    PortFlowFailure { waypoint: String, attempts: u32 },

    #[error("Unexpected teleport: {cause}")]
    UnexpectedTeleport { cause: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Key injection failed: {0}")]
    KeyInjection(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

impl NavError {
    /// Whether this error ends the run. Recoverable errors are logged and the
    /// loop carries on. `NavigationExhausted` only exists as an error under the
    /// `abort_run` policy; `skip_waypoint` turns exhaustion into a skip instead.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            NavError::DetectionUnavailable
                | NavError::UnexpectedTeleport { .. }
                | NavError::Cancelled
        )
    }
}

pub type Result<T> = std::result::Result<T, NavError>;
