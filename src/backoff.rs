//! Reconnect backoff.
//!
//! The delay starts at the configured floor, grows by `factor` after every
//! failed attempt up to the ceiling, and drops back to the floor as soon as a
//! connection is established.

use std::time::Duration;

use rand::Rng;

use crate::config::BackoffConfig;

/// Backoff state plus the switch that stops reconnecting altogether.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: BackoffConfig,
    /// Delay the next retry will wait (before jitter).
    delay: Duration,
    /// Failed attempts since the last successful connection.
    retries: u32,
    /// Cleared by an explicit disconnect.
    retrying: bool,
}

impl ReconnectPolicy {
    pub fn new(config: BackoffConfig) -> Self {
        let delay = config.initial_delay();
        Self {
            config,
            delay,
            retries: 0,
            retrying: false,
        }
    }

    /// Back to the floor delay.
    pub fn reset(&mut self) {
        self.delay = self.config.initial_delay();
        self.retries = 0;
    }

    /// Delay to wait before the next attempt; grows the delay for the one
    /// after.
    pub fn next_delay(&mut self) -> Duration {
        let wait = self.jittered(self.delay);
        self.retries += 1;

        let max = self.config.max_delay();
        let grown = (self.delay.as_nanos() as f64 * self.config.factor.max(1.0)).round();
        self.delay = if grown >= max.as_nanos() as f64 {
            max
        } else {
            Duration::from_nanos(grown as u64)
        };

        wait
    }

    fn jittered(&self, delay: Duration) -> Duration {
        let jitter = self.config.jitter;
        if jitter <= 0.0 || delay.is_zero() {
            return delay;
        }
        let nanos = delay.as_nanos() as f64;
        let spread = nanos * jitter;
        let value = rand::thread_rng().gen_range((nanos - spread).max(0.0)..=(nanos + spread));
        Duration::from_nanos(value.round() as u64).min(self.config.max_delay())
    }

    /// Current (un-jittered) delay.
    pub fn current_delay(&self) -> Duration {
        self.delay
    }

    /// Failed attempts since the last reset.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn is_retrying(&self) -> bool {
        self.retrying
    }

    /// Allow reconnecting (on `connect`).
    pub fn start(&mut self) {
        self.retrying = true;
    }

    /// Stop reconnecting for good (on `disconnect`).
    pub fn stop(&mut self) {
        self.retrying = false;
        self.reset();
    }
}
