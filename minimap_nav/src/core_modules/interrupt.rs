// THEORY:
// Every wait in the engine (settle pauses, key holds, stabilisation delays,
// rotation playback) must end promptly when a stop is requested. `StopSignal`
// is a shared flag backed by a `watch` channel: `sleep` races the timer against
// the flag changing, so a stop wakes every pending wait immediately instead of
// on the next polling tick.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::{NavError, Result};

#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Requests a stop. Idempotent.
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once a stop has been requested.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // the sender lives in `self`, so the channel cannot close under us
        let _ = rx.wait_for(|stopped| *stopped).await;
    }

    /// Waits for `duration` unless a stop arrives first.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        if self.is_stopped() {
            return Err(NavError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(NavError::Cancelled),
            _ = tokio::time::sleep(duration) => {
                if self.is_stopped() { Err(NavError::Cancelled) } else { Ok(()) }
            }
        }
    }

    /// `Err(Cancelled)` when a stop has been requested.
    pub fn check(&self) -> Result<()> {
        if self.is_stopped() {
            Err(NavError::Cancelled)
        } else {
            Ok(())
        }
    }
}
