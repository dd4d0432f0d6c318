//! Per-upstream circuit breaker: consecutive connect/I/O
//! failures mark an upstream `Unhealthy` for an exponentially growing
//! cooldown (1s up to 60s), independent of what the Health Monitor reports,
//! to prevent thundering-herd reconnect storms. The circuit resets on the
//! first successful probe.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pgfleet_metrics::Metrics;

const INITIAL_COOLDOWN: Duration = Duration::from_secs(1);
const MAX_COOLDOWN: Duration = Duration::from_secs(60);

/// Tracks failure streaks and cooldown state for one upstream. `Instant`
/// values are stored as nanos-since-construction so the type stays
/// `Send + Sync` without an `Instant` behind a lock.
pub struct CircuitBreaker {
    epoch: Instant,
    consecutive_failures: AtomicU32,
    open_until_nanos: AtomicU64,
    metrics: Arc<Metrics>,
}

impl CircuitBreaker {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            epoch: Instant::now(),
            consecutive_failures: AtomicU32::new(0),
            open_until_nanos: AtomicU64::new(0),
            metrics,
        }
    }

    /// Whether the breaker currently forbids new connection attempts.
    pub fn is_open(&self) -> bool {
        let open_until = self.open_until_nanos.load(Ordering::Acquire);
        open_until != 0 && self.now_nanos() < open_until
    }

    /// Records a failed connect/I/O attempt, opening (or extending) the
    /// cooldown window with exponential backoff. Only the failure that
    /// actually trips the breaker closed-to-open is counted in
    /// `circuit_breaker_trips_total`; subsequent failures while already open
    /// just extend the cooldown.
    pub fn record_failure(&self) {
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures == 1 {
            self.metrics.circuit_breaker_trips_total.inc();
        }
        let cooldown = Self::cooldown_for(failures);
        let until = self.now_nanos() + cooldown.as_nanos() as u64;
        self.open_until_nanos.store(until, Ordering::Release);
    }

    /// Records a successful probe or connect, resetting the breaker.
    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
        self.open_until_nanos.store(0, Ordering::Release);
    }

    fn cooldown_for(consecutive_failures: u32) -> Duration {
        let shift = consecutive_failures.saturating_sub(1).min(6);
        let scaled = INITIAL_COOLDOWN.saturating_mul(1 << shift);
        scaled.min(MAX_COOLDOWN)
    }

    fn now_nanos(&self) -> u64 {
        self.epoch.elapsed().as_nanos() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker() -> CircuitBreaker {
        CircuitBreaker::new(Arc::new(Metrics::new()))
    }

    #[test]
    fn fresh_breaker_is_closed() {
        let breaker = breaker();
        assert!(!breaker.is_open());
    }

    #[test]
    fn failure_opens_the_circuit() {
        let breaker = breaker();
        breaker.record_failure();
        assert!(breaker.is_open());
    }

    #[test]
    fn success_resets_the_circuit() {
        let breaker = breaker();
        breaker.record_failure();
        breaker.record_success();
        assert!(!breaker.is_open());
    }

    #[test]
    fn cooldown_grows_exponentially_and_caps_at_sixty_seconds() {
        assert_eq!(CircuitBreaker::cooldown_for(1), Duration::from_secs(1));
        assert_eq!(CircuitBreaker::cooldown_for(2), Duration::from_secs(2));
        assert_eq!(CircuitBreaker::cooldown_for(3), Duration::from_secs(4));
        assert_eq!(CircuitBreaker::cooldown_for(10), Duration::from_secs(60));
    }

    #[test]
    fn only_the_closed_to_open_transition_counts_as_a_trip() {
        let metrics = Arc::new(Metrics::new());
        let breaker = CircuitBreaker::new(metrics.clone());
        breaker.record_failure();
        breaker.record_failure();
        breaker.record_failure();
        assert_eq!(metrics.circuit_breaker_trips_total.get(), 1);

        breaker.record_success();
        breaker.record_failure();
        assert_eq!(metrics.circuit_breaker_trips_total.get(), 2);
    }
}
