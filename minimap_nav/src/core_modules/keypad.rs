// THEORY:
// The key layer sits between movement decisions and the raw key-event sink.
// - `KeyInjector` is the primitive sink: hold and release a key.
// - `KeyPad` owns the injector for the length of a run; owning it is what makes
//   the orchestrator the only writer. It turns primitives into timed actions
//   (`tap`, `press`, `gap`) with ±10% humanlike jitter, and every wait goes
//   through the stop signal. A cancelled press still releases its keys.
// - `KeySequence` is a recorded list of down/up events with millisecond
//   offsets, replayed verbatim: no jitter, no position feedback.

use std::fmt;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::core_modules::interrupt::StopSignal;
use crate::error::Result;

/// A key alias understood by the injector ("left", "alt", "space", ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(pub String);

impl Key {
    pub fn new(alias: impl Into<String>) -> Self {
        Self(alias.into())
    }

    pub fn left() -> Self {
        Self::new("left")
    }

    pub fn right() -> Self {
        Self::new("right")
    }

    pub fn up() -> Self {
        Self::new("up")
    }

    pub fn down() -> Self {
        Self::new("down")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Key {
    fn from(alias: &str) -> Self {
        Self::new(alias)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Raw key-event emission. Timed `press` and `tap` are composed on top of
/// these in `KeyPad`.
pub trait KeyInjector: Send + Sync {
    fn hold(&mut self, key: &Key) -> Result<()>;
    fn release(&mut self, key: &Key) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyAction {
    Down,
    Up,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyEvent {
    pub key: Key,
    pub action: KeyAction,
    /// Offset from the start of the sequence.
    pub at_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySequence {
    pub events: Vec<KeyEvent>,
}

impl KeySequence {
    pub fn duration(&self) -> Duration {
        Duration::from_millis(self.events.iter().map(|e| e.at_ms).max().unwrap_or(0))
    }
}

pub const DEFAULT_JITTER: f64 = 0.10;

pub struct KeyPad {
    injector: Box<dyn KeyInjector>,
    stop: StopSignal,
    rng: StdRng,
    jitter: f64,
    tap_duration: Duration,
    held: Vec<Key>,
}

impl KeyPad {
    pub fn new(injector: Box<dyn KeyInjector>, stop: StopSignal, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            injector,
            stop,
            rng,
            jitter: DEFAULT_JITTER,
            tap_duration: Duration::from_millis(60),
            held: Vec::new(),
        }
    }

    pub fn with_tap_duration(mut self, duration: Duration) -> Self {
        self.tap_duration = duration;
        self
    }

    /// Relative jitter applied to every press, hold and gap. 0 disables it.
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter.clamp(0.0, 0.5);
        self
    }

    pub fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    pub fn held(&self) -> &[Key] {
        &self.held
    }

    /// `duration` scaled by a uniform factor in `[1 - jitter, 1 + jitter]`.
    pub fn jittered(&mut self, duration: Duration) -> Duration {
        if self.jitter <= 0.0 {
            return duration;
        }
        let factor = self.rng.gen_range((1.0 - self.jitter)..=(1.0 + self.jitter));
        duration.mul_f64(factor)
    }

    pub fn hold(&mut self, key: &Key) -> Result<()> {
        self.injector.hold(key)?;
        if !self.held.contains(key) {
            self.held.push(key.clone());
        }
        Ok(())
    }

    pub fn release(&mut self, key: &Key) -> Result<()> {
        self.held.retain(|k| k != key);
        self.injector.release(key)
    }

    pub async fn tap(&mut self, key: &Key) -> Result<()> {
        let duration = self.tap_duration;
        self.press(key, duration).await
    }

    pub async fn press(&mut self, key: &Key, duration: Duration) -> Result<()> {
        self.press_all(std::slice::from_ref(key), duration).await
    }

    /// Holds every key in `keys` together for a jittered `duration`, then
    /// releases them in reverse order, even when the wait was cancelled.
    pub async fn press_all(&mut self, keys: &[Key], duration: Duration) -> Result<()> {
        for key in keys {
            if let Err(err) = self.hold(key) {
                let _ = self.release_keys(keys);
                return Err(err);
            }
        }
        let hold_for = self.jittered(duration);
        debug!(?keys, ?hold_for, "press");
        let waited = self.stop.sleep(hold_for).await;
        let released = self.release_keys(keys);
        waited?;
        released
    }

    /// A jittered pause between key actions.
    pub async fn gap(&mut self, duration: Duration) -> Result<()> {
        let wait = self.jittered(duration);
        self.stop.sleep(wait).await
    }

    /// An exact, unjittered wait (settle times, stabilisation).
    pub async fn pause(&self, duration: Duration) -> Result<()> {
        self.stop.sleep(duration).await
    }

    /// Replays `sequence` with its recorded timings.
    pub async fn replay(&mut self, sequence: &KeySequence) -> Result<()> {
        let mut events: Vec<&KeyEvent> = sequence.events.iter().collect();
        events.sort_by_key(|e| e.at_ms);
        let started = Instant::now();

        for event in events {
            let due = started + Duration::from_millis(event.at_ms);
            let now = Instant::now();
            if due > now {
                if let Err(err) = self.stop.sleep(due - now).await {
                    let _ = self.release_all();
                    return Err(err);
                }
            }
            let step = match event.action {
                KeyAction::Down => self.hold(&event.key),
                KeyAction::Up => self.release(&event.key),
            };
            if let Err(err) = step {
                let _ = self.release_all();
                return Err(err);
            }
        }
        // recordings sometimes end with keys still down
        self.release_all()
    }

    /// Releases every key still held. Reports the first failure after trying
    /// all of them.
    pub fn release_all(&mut self) -> Result<()> {
        let held = std::mem::take(&mut self.held);
        let mut first_err = None;
        for key in held.iter().rev() {
            if let Err(err) = self.injector.release(key) {
                warn!(%key, %err, "release failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    fn release_keys(&mut self, keys: &[Key]) -> Result<()> {
        let mut first_err = None;
        for key in keys.iter().rev() {
            if let Err(err) = self.release(key) {
                warn!(%key, %err, "release failed");
                first_err.get_or_insert(err);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::NavError;
    use std::sync::{Arc, Mutex};

    type Log = Arc<Mutex<Vec<(Duration, String, bool)>>>;

    struct Recorder {
        origin: Instant,
        log: Log,
    }

    impl KeyInjector for Recorder {
        fn hold(&mut self, key: &Key) -> Result<()> {
            self.log.lock().unwrap().push((self.origin.elapsed(), key.0.clone(), true));
            Ok(())
        }

        fn release(&mut self, key: &Key) -> Result<()> {
            self.log.lock().unwrap().push((self.origin.elapsed(), key.0.clone(), false));
            Ok(())
        }
    }

    fn keypad(stop: StopSignal) -> (KeyPad, Log) {
        let log: Log = Arc::default();
        let recorder = Recorder { origin: Instant::now(), log: log.clone() };
        (KeyPad::new(Box::new(recorder), stop, Some(3)), log)
    }

    #[test]
    fn jitter_stays_within_ten_percent() {
        let (mut pad, _) = keypad(StopSignal::new());
        let base = Duration::from_millis(1000);
        for _ in 0..500 {
            let d = pad.jittered(base);
            assert!(d >= Duration::from_millis(900) && d <= Duration::from_millis(1100), "{d:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn press_holds_then_releases() {
        let (mut pad, log) = keypad(StopSignal::new());
        pad.press(&Key::left(), Duration::from_millis(500)).await.unwrap();
        let log = log.lock().unwrap();
        assert_eq!(log.len(), 2);
        assert!(log[0].2 && !log[1].2);
        let held_for = log[1].0 - log[0].0;
        assert!(held_for >= Duration::from_millis(450) && held_for <= Duration::from_millis(550));
        assert!(pad.held().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_press_still_releases() {
        let stop = StopSignal::new();
        let (mut pad, log) = keypad(stop.clone());
        let stopper = {
            let stop = stop.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                stop.stop();
            })
        };
        let result = pad
            .press_all(&[Key::right(), Key::new("alt")], Duration::from_secs(60))
            .await;
        stopper.await.unwrap();
        assert!(matches!(result, Err(NavError::Cancelled)));
        let log = log.lock().unwrap();
        assert_eq!(log.iter().filter(|e| !e.2).count(), 2);
        assert!(log.last().unwrap().0 < Duration::from_millis(50));
        assert!(pad.held().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn replay_preserves_recorded_timings() {
        let (mut pad, log) = keypad(StopSignal::new());
        let sequence = KeySequence {
            events: vec![
                KeyEvent { key: Key::right(), action: KeyAction::Down, at_ms: 0 },
                KeyEvent { key: Key::new("alt"), action: KeyAction::Down, at_ms: 150 },
                KeyEvent { key: Key::new("alt"), action: KeyAction::Up, at_ms: 230 },
                KeyEvent { key: Key::right(), action: KeyAction::Up, at_ms: 900 },
            ],
        };
        assert_eq!(sequence.duration(), Duration::from_millis(900));
        pad.replay(&sequence).await.unwrap();
        let times: Vec<u128> = log.lock().unwrap().iter().map(|e| e.0.as_millis()).collect();
        assert_eq!(times, [0, 150, 230, 900]);
    }

    #[tokio::test(start_paused = true)]
    async fn release_all_clears_leftover_keys() {
        let (mut pad, log) = keypad(StopSignal::new());
        pad.hold(&Key::up()).unwrap();
        pad.hold(&Key::left()).unwrap();
        pad.release_all().unwrap();
        assert!(pad.held().is_empty());
        assert_eq!(log.lock().unwrap().iter().filter(|e| !e.2).count(), 2);
    }
}
