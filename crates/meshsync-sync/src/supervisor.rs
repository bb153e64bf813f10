//! Reconnect loop with capped exponential backoff.

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Backoff between connection attempts. Durations are in milliseconds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_ms: u64,
    pub max_ms: u64,
    pub multiplier: f64,
    /// Fraction of the delay added or removed at random, in `[0, 1]`.
    pub jitter: f64,
    /// A connection that stayed up this long resets the backoff.
    pub reset_after_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: 1_000,
            max_ms: 60_000,
            multiplier: 2.0,
            jitter: 0.2,
            reset_after_ms: 60_000,
        }
    }
}

/// Delay generator for consecutive failed attempts.
#[derive(Clone, Debug)]
pub struct Backoff {
    config: BackoffConfig,
    attempt: u32,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, attempt: 0 }
    }

    /// Delay before the next attempt. Never exceeds `max_ms`.
    pub fn next_delay(&mut self) -> Duration {
        let base = self.config.initial_ms as f64 * self.config.multiplier.powi(self.attempt as i32);
        let capped = base.min(self.config.max_ms as f64);
        self.attempt = self.attempt.saturating_add(1);

        let jitter = self.config.jitter.clamp(0.0, 1.0);
        let factor = if jitter > 0.0 {
            rand::thread_rng().gen_range(1.0 - jitter..=1.0 + jitter)
        } else {
            1.0
        };
        let millis = (capped * factor).min(self.config.max_ms as f64).max(0.0);
        Duration::from_millis(millis as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

/// Run `connect` until `cancel` fires, waiting a backoff delay between
/// attempts. Both a failed and a cleanly closed connection are retried.
pub async fn supervise<F, Fut, E>(
    name: &str,
    config: BackoffConfig,
    cancel: CancellationToken,
    mut connect: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Display,
{
    let reset_after = Duration::from_millis(config.reset_after_ms);
    let mut backoff = Backoff::new(config);

    while !cancel.is_cancelled() {
        let started = Instant::now();
        let result = tokio::select! {
            _ = cancel.cancelled() => return,
            result = connect() => result,
        };
        match result {
            Ok(()) => tracing::info!(routine = name, "connection closed"),
            Err(e) => tracing::error!(routine = name, error = %e, "connection failed"),
        }
        if started.elapsed() >= reset_after {
            backoff.reset();
        }

        let delay = backoff.next_delay();
        tracing::info!(routine = name, delay_ms = delay.as_millis() as u64, "reconnecting");
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
