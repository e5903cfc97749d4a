//! Retry policy: attempt budget plus exponential backoff with jitter.

use rand::Rng;
use std::time::Duration;

use crate::config::FetchConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
    /// Fractional jitter: the delay is scaled by a factor in `[1 - j, 1 + j]`.
    pub jitter: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FetchConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            base_delay: Duration::from_millis(config.backoff_base_ms),
            multiplier: config.backoff_multiplier,
            jitter: config.backoff_jitter,
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Whether another attempt is allowed after `attempt` (1-based) failed.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Un-jittered delay after failed attempt `attempt` (1-based):
    /// `base * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn nominal_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exp);
        Duration::from_secs_f64(secs.min(self.max_delay.as_secs_f64()))
    }

    /// Jittered delay, never below `floor` (e.g. a server `Retry-After`).
    pub fn delay(&self, attempt: u32, floor: Option<Duration>) -> Duration {
        let nominal = self.nominal_delay(attempt).as_secs_f64();
        let factor = if self.jitter > 0.0 {
            rand::thread_rng().gen_range((1.0 - self.jitter)..=(1.0 + self.jitter))
        } else {
            1.0
        };
        let jittered = Duration::from_secs_f64((nominal * factor).min(self.max_delay.as_secs_f64()));
        match floor {
            Some(floor) => jittered.max(floor.min(self.max_delay)),
            None => jittered,
        }
    }
}
