//! Retry pacing for storage writes that must eventually land.
//!
//! Used by the persistence loop (batched telemetry flushes) and by mission
//! workers retrying a completion write. The first failure waits `initial`,
//! each further consecutive failure doubles the wait up to `ceiling`, and a
//! success clears the streak.

use rand::Rng;
use std::time::{Duration, Instant};

const JITTER_RATIO: f64 = 0.2;

#[derive(Debug, Clone)]
pub struct RetryBackoff {
    initial: Duration,
    ceiling: Duration,
    failures: u32,
    retry_at: Option<Instant>,
}

impl RetryBackoff {
    pub fn new(initial: Duration, ceiling: Duration) -> Self {
        let initial = initial.max(Duration::from_millis(1));
        Self {
            initial,
            ceiling: ceiling.max(initial),
            failures: 0,
            retry_at: None,
        }
    }

    /// Consecutive failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    pub fn ready(&self) -> bool {
        self.ready_at(Instant::now())
    }

    pub fn ready_at(&self, now: Instant) -> bool {
        self.retry_at.map_or(true, |at| now >= at)
    }

    /// Un-jittered wait after the current failure streak.
    pub fn delay(&self) -> Duration {
        if self.failures == 0 {
            return Duration::ZERO;
        }
        let doublings = (self.failures - 1).min(31);
        self.initial
            .saturating_mul(1u32 << doublings)
            .min(self.ceiling)
    }

    /// Clear the streak. Returns how many failures preceded this success.
    pub fn record_success(&mut self) -> u32 {
        self.retry_at = None;
        std::mem::take(&mut self.failures)
    }

    pub fn record_failure(&mut self) -> Duration {
        self.record_failure_at(Instant::now())
    }

    /// Extend the streak and return the jittered wait before the next try.
    pub fn record_failure_at(&mut self, now: Instant) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = self.delay();
        let wait = delay + jitter(delay);
        self.retry_at = Some(now + wait);
        wait
    }
}

fn jitter(delay: Duration) -> Duration {
    let max_ms = (delay.as_millis() as f64 * JITTER_RATIO) as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..=max_ms))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_backoff_is_ready() {
        let backoff = RetryBackoff::new(Duration::from_millis(10), Duration::from_secs(1));
        assert!(backoff.ready());
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.delay(), Duration::ZERO);
    }

    #[test]
    fn first_failure_waits_initial_then_doubles() {
        let mut backoff = RetryBackoff::new(Duration::from_millis(100), Duration::from_secs(10));
        let now = Instant::now();

        let wait = backoff.record_failure_at(now);
        assert!(wait >= Duration::from_millis(100) && wait <= Duration::from_millis(120));
        assert!(!backoff.ready_at(now));
        assert!(backoff.ready_at(now + Duration::from_millis(121)));

        backoff.record_failure_at(now);
        assert_eq!(backoff.delay(), Duration::from_millis(200));
        backoff.record_failure_at(now);
        assert_eq!(backoff.delay(), Duration::from_millis(400));
        assert_eq!(backoff.failures(), 3);
    }

    #[test]
    fn delay_is_capped() {
        let mut backoff = RetryBackoff::new(Duration::from_millis(10), Duration::from_millis(40));
        let now = Instant::now();
        for _ in 0..50 {
            let wait = backoff.record_failure_at(now);
            assert!(wait <= Duration::from_millis(48));
        }
        assert_eq!(backoff.delay(), Duration::from_millis(40));
    }

    #[test]
    fn success_reports_and_clears_the_streak() {
        let mut backoff = RetryBackoff::new(Duration::from_millis(10), Duration::from_secs(1));
        backoff.record_failure();
        backoff.record_failure();
        assert_eq!(backoff.record_success(), 2);
        assert!(backoff.ready());
        assert_eq!(backoff.record_success(), 0);
    }
}
