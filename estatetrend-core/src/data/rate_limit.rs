//! Token-bucket rate limiter shared by all fetch workers.
//!
//! Caps upstream throughput independently of the worker count: with the
//! default 1 token/s and a burst of 1, eight workers still issue at most one
//! request per second between them.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Slowest refill rate a bucket accepts: one token per hour.
pub const MIN_RATE_PER_SEC: f64 = 1.0 / 3600.0;

/// Longest single wait `try_acquire` reports.
const MAX_WAIT: Duration = Duration::from_secs(3600);

/// How often a stoppable wait re-checks its stop condition.
const STOP_POLL: Duration = Duration::from_millis(25);

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Blocking token bucket.
#[derive(Debug)]
pub struct TokenBucket {
    state: Mutex<Bucket>,
    rate_per_sec: f64,
    capacity: f64,
}

impl TokenBucket {
    /// `rate_per_sec` tokens are added per second up to `burst` tokens.
    /// The bucket starts full. Rates below [`MIN_RATE_PER_SEC`], including
    /// zero, negative and NaN, are raised to it.
    pub fn new(rate_per_sec: f64, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        let rate_per_sec = if rate_per_sec.is_finite() {
            rate_per_sec.max(MIN_RATE_PER_SEC)
        } else if rate_per_sec == f64::INFINITY {
            f64::MAX
        } else {
            MIN_RATE_PER_SEC
        };
        Self {
            state: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            rate_per_sec,
            capacity,
        }
    }

    /// Take one token if available, otherwise report how long until one is.
    pub fn try_acquire(&self) -> Result<(), Duration> {
        let mut bucket = self.state.lock().unwrap_or_else(|p| p.into_inner());
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            Ok(())
        } else {
            let deficit = 1.0 - bucket.tokens;
            let wait = Duration::try_from_secs_f64(deficit / self.rate_per_sec)
                .unwrap_or(MAX_WAIT)
                .min(MAX_WAIT);
            Err(wait)
        }
    }

    /// Block until a token is available and take it.
    ///
    /// The lock is never held while sleeping.
    pub fn acquire(&self) {
        while let Err(wait) = self.try_acquire() {
            std::thread::sleep(wait);
        }
    }

    /// Like [`acquire`](Self::acquire), but gives up as soon as `stop`
    /// returns true. Returns whether a token was taken.
    ///
    /// `stop` is checked before every attempt and at least every 25ms while
    /// waiting.
    pub fn acquire_until(&self, stop: impl Fn() -> bool) -> bool {
        loop {
            if stop() {
                return false;
            }
            match self.try_acquire() {
                Ok(()) => return true,
                Err(wait) => std::thread::sleep(wait.min(STOP_POLL)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_full_up_to_burst() {
        let bucket = TokenBucket::new(1.0, 3);
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_ok());
        assert!(bucket.try_acquire().is_err());
    }

    #[test]
    fn reports_wait_when_empty() {
        let bucket = TokenBucket::new(1.0, 1);
        bucket.try_acquire().unwrap();
        let wait = bucket.try_acquire().unwrap_err();
        assert!(wait > Duration::from_millis(900));
        assert!(wait <= Duration::from_secs(1));
    }

    #[test]
    fn refills_over_time() {
        let bucket = TokenBucket::new(100.0, 1);
        bucket.try_acquire().unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert!(bucket.try_acquire().is_ok());
    }

    #[test]
    fn acquire_paces_callers() {
        let bucket = TokenBucket::new(50.0, 1);
        let start = Instant::now();
        for _ in 0..4 {
            bucket.acquire();
        }
        // First token is free, the other three wait ~20ms each.
        assert!(start.elapsed() >= Duration::from_millis(55));
    }

    // ── Degenerate rates ─────────────────────────────────────────────

    #[test]
    fn tiny_or_zero_rate_reports_bounded_wait() {
        for rate in [0.0, 1e-20, -5.0, f64::NAN, f64::NEG_INFINITY] {
            let bucket = TokenBucket::new(rate, 1);
            assert!(bucket.try_acquire().is_ok(), "rate {rate}");
            let wait = bucket.try_acquire().unwrap_err();
            assert!(wait <= MAX_WAIT, "rate {rate}: {wait:?}");
            assert!(wait > Duration::from_secs(3000), "rate {rate}: {wait:?}");
        }
    }

    // ── Stoppable acquire ────────────────────────────────────────────

    #[test]
    fn acquire_until_takes_available_token() {
        let bucket = TokenBucket::new(1.0, 1);
        assert!(bucket.acquire_until(|| false));
        assert!(bucket.try_acquire().is_err());
    }

    #[test]
    fn acquire_until_gives_up_when_stopped_while_waiting() {
        let bucket = TokenBucket::new(MIN_RATE_PER_SEC, 1);
        bucket.try_acquire().unwrap();

        let start = Instant::now();
        let deadline = start + Duration::from_millis(60);
        let acquired = bucket.acquire_until(|| Instant::now() >= deadline);

        assert!(!acquired);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn acquire_until_does_not_take_token_when_already_stopped() {
        let bucket = TokenBucket::new(1.0, 1);
        assert!(!bucket.acquire_until(|| true));
        assert!(bucket.try_acquire().is_ok());
    }
}
