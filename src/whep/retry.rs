//! Reconnect backoff for the event stream

use std::time::Duration;

use crate::config::EventStreamConfig;

/// Exponential reconnect backoff
///
/// Delays double from the initial value up to the cap. `next_delay` returns
/// `None` once `max_attempts` consecutive attempts have failed; a successful
/// connection calls `reset` and the count starts over.
#[derive(Debug, Clone)]
pub struct Backoff {
    initial: Duration,
    max: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl Backoff {
    pub fn new(initial: Duration, max: Duration, max_attempts: u32) -> Self {
        Self {
            initial,
            max: max.max(initial),
            max_attempts,
            attempt: 0,
        }
    }

    pub fn from_config(config: &EventStreamConfig) -> Self {
        Self::new(
            Duration::from_millis(config.initial_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts,
        )
    }

    /// Server-requested reconnection time replaces the initial delay
    pub fn set_initial(&mut self, initial: Duration) {
        self.initial = initial;
        self.max = self.max.max(initial);
    }

    /// Delay before the next attempt, or `None` when attempts are exhausted
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempt >= self.max_attempts {
            return None;
        }

        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        let delay = self.initial.saturating_mul(factor).min(self.max);
        self.attempt += 1;
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Consecutive failed attempts so far
    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}
