//! Per-backend cooldown breaker.
//!
//! A failing backend is marked down for a fixed cooldown window instead of
//! being retried on every call. Eligibility comes back when the window
//! elapses; there is no half-open probing state — the next real call after
//! the window is the probe.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing::warn;

/// Tracks whether one backend is currently in its cooldown window.
///
/// State lives in the instance; the composite store owns one breaker per
/// backend, constructed at composition time.
#[derive(Debug)]
pub struct CooldownBreaker {
    cooldown: Duration,
    tripped_at: Mutex<Option<Instant>>,
}

impl CooldownBreaker {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            tripped_at: Mutex::new(None),
        }
    }

    /// Whether a call may go through right now.
    ///
    /// A breaker whose window has elapsed reports `true` but stays tripped
    /// until [`reset`](Self::reset); a failed probe call re-trips it with a
    /// fresh window.
    pub fn try_acquire(&self) -> bool {
        let tripped_at = self.tripped_at.lock().expect("breaker lock poisoned");
        match *tripped_at {
            Some(at) => at.elapsed() >= self.cooldown,
            None => true,
        }
    }

    /// Start (or restart) the cooldown window after a failure.
    pub fn trip(&self, backend: &str) {
        let mut tripped_at = self.tripped_at.lock().expect("breaker lock poisoned");
        if tripped_at.is_none() {
            warn!(backend, cooldown_secs = self.cooldown.as_secs_f64(), "backend entering cooldown");
        }
        *tripped_at = Some(Instant::now());
    }

    /// Clear the breaker after a successful call.
    pub fn reset(&self) {
        let mut tripped_at = self.tripped_at.lock().expect("breaker lock poisoned");
        *tripped_at = None;
    }

    /// Whether the backend is currently inside its cooldown window.
    pub fn is_cooling_down(&self) -> bool {
        !self.try_acquire()
    }
}
