//! Reconnect backoff
//!
//! Delay for attempt `n` is `min(initial * 2^(n-1), max)`, perturbed by a
//! symmetric jitter of `±jitter * base` and floored at `min`.

use std::time::Duration;

use rand::Rng;

/// Backoff tuning
#[derive(Debug, Clone, PartialEq)]
pub struct BackoffPolicy {
    /// Delay before the first reconnect attempt
    pub initial_delay: Duration,
    /// Cap on the un-jittered delay
    pub max_delay: Duration,
    /// Floor on the final, jittered delay
    pub min_delay: Duration,
    /// Jitter as a fraction of the base delay (0.2 = ±20%)
    pub jitter: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            min_delay: Duration::from_millis(500),
            jitter: 0.2,
        }
    }
}

impl BackoffPolicy {
    /// Un-jittered delay for a 1-based attempt number
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let initial_ms = self.initial_delay.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let factor = 2u64.saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(initial_ms.saturating_mul(factor).min(max_ms))
    }

    /// Apply a jitter factor in `[-jitter, jitter]` to a base delay and floor the result
    pub fn apply_jitter(&self, base: Duration, factor: f64) -> Duration {
        let base_ms = base.as_millis() as f64;
        let jittered = (base_ms + base_ms * factor).max(0.0);
        Duration::from_millis(jittered.round() as u64).max(self.min_delay)
    }
}

/// Attempt counter plus delay computation
///
/// The counter only grows until [`Backoff::reset`] is called on a
/// successful open.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: BackoffPolicy,
    attempt: u32,
}

impl Backoff {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    /// Number of reconnects scheduled since the last successful open
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    /// Count a new attempt and return its jittered delay
    pub fn next_delay(&mut self) -> Duration {
        self.next_delay_with(&mut rand::rng())
    }

    pub fn next_delay_with<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Duration {
        self.attempt = self.attempt.saturating_add(1);
        let base = self.policy.base_delay(self.attempt);
        let spread = self.policy.jitter.abs();
        let factor = if spread > 0.0 {
            rng.random_range(-spread..=spread)
        } else {
            0.0
        };
        self.policy.apply_jitter(base, factor)
    }
}
