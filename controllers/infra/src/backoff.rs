//! # Fibonacci Backoff
//!
//! Per-object retry delays for failed reconciles. Delays grow along the
//! Fibonacci sequence (5s, 5s, 10s, 15s, 25s, ...) and are capped, so a
//! persistently failing object does not hammer the cloud agent while a
//! transient failure is retried quickly.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Fibonacci backoff calculator
///
/// Each backoff is the sum of the previous two, starting from `min`.
#[derive(Debug, Clone)]
pub struct FibonacciBackoff {
    min_secs: u64,
    prev_secs: u64,
    current_secs: u64,
    max_secs: u64,
}

impl FibonacciBackoff {
    /// Create a new backoff with minimum and maximum delays
    #[must_use]
    pub fn new(min: Duration, max: Duration) -> Self {
        let min_secs = min.as_secs().max(1);
        Self {
            min_secs,
            prev_secs: 0,
            current_secs: min_secs,
            max_secs: max.as_secs().max(min_secs),
        }
    }

    /// Get the next delay and advance the sequence
    pub fn next_backoff(&mut self) -> Duration {
        let result = self.current_secs;
        let next = self.prev_secs + self.current_secs;
        self.prev_secs = self.current_secs;
        self.current_secs = std::cmp::min(next, self.max_secs);
        Duration::from_secs(result)
    }

    /// Reset the backoff to the initial state
    pub fn reset(&mut self) {
        self.prev_secs = 0;
        self.current_secs = self.min_secs;
    }
}

/// Backoff state per object key (`kind/namespace/name`)
#[derive(Debug, Clone)]
pub struct RetryTracker {
    min: Duration,
    max: Duration,
    states: Arc<Mutex<HashMap<String, FibonacciBackoff>>>,
}

impl Default for RetryTracker {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(300))
    }
}

impl RetryTracker {
    pub fn new(min: Duration, max: Duration) -> Self {
        Self { min, max, states: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Delay before retrying `key` after another failure.
    pub fn next_delay(&self, key: &str) -> Duration {
        let mut states = self.states.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        states
            .entry(key.to_string())
            .or_insert_with(|| FibonacciBackoff::new(self.min, self.max))
            .next_backoff()
    }

    /// Forget the failure history of `key` after a successful reconcile.
    pub fn reset(&self, key: &str) {
        let mut states = self.states.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        states.remove(key);
    }
}
