//! Circuit Breaker (C2, §3.6, §4.2).
//!
//! Wraps a single logical operation (one provider client, one tool) in a
//! CLOSED/OPEN/HALF_OPEN state machine. This is a breaker over one
//! operation, not a per-key registry: the worker pool (§4.11) and the
//! orchestrator construct one breaker per provider client they hold.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Observable state of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Tunables (§3.6). `trip_on` filters which errors count as failures by
/// substring match against the error's `Display` output; an empty list
/// means every error counts.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub reset_timeout: Duration,
    pub half_open_requests: u32,
    pub trip_on: Vec<String>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: env_or("SWARM_CIRCUIT_FAILURE_THRESHOLD", 5),
            reset_timeout: Duration::from_millis(env_or("SWARM_CIRCUIT_RESET_TIMEOUT_MS", 30_000)),
            half_open_requests: env_or("SWARM_CIRCUIT_HALF_OPEN_REQUESTS", 1),
            trip_on: Vec::new(),
        }
    }
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default)
}

#[derive(Debug, Error)]
pub enum CircuitBreakerError<E> {
    #[error("circuit is open; retry after {retry_after_ms}ms")]
    Open { retry_after_ms: u64 },
    #[error(transparent)]
    Inner(E),
}

struct Inner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_successes: u32,
    half_open_in_flight: u32,
}

/// A circuit breaker around one logical operation (§4.2).
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_successes: 0,
                half_open_in_flight: 0,
            }),
        }
    }

    pub fn state(&self) -> CircuitState {
        self.transition_if_due();
        self.inner.lock().unwrap().state
    }

    /// Advance OPEN -> HALF_OPEN once `reset_timeout` has elapsed.
    fn transition_if_due(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::Open {
            if let Some(opened_at) = inner.opened_at {
                if opened_at.elapsed() >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.half_open_in_flight = 0;
                    info!("circuit breaker transitioning to half_open");
                }
            }
        }
    }

    fn should_trip(&self, error: &dyn std::fmt::Display) -> bool {
        if self.config.trip_on.is_empty() {
            return true;
        }
        let rendered = error.to_string().to_lowercase();
        self.config.trip_on.iter().any(|needle| rendered.contains(&needle.to_lowercase()))
    }

    /// Run `op` through the breaker. Rejects immediately without running
    /// `op` if the circuit is OPEN, or if it is HALF_OPEN and the probe
    /// budget (`half_open_requests`) is already spent.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.transition_if_due();

        {
            let mut inner = self.inner.lock().unwrap();
            match inner.state {
                CircuitState::Open => {
                    let retry_after_ms = inner
                        .opened_at
                        .map(|t| self.config.reset_timeout.saturating_sub(t.elapsed()).as_millis() as u64)
                        .unwrap_or(0);
                    return Err(CircuitBreakerError::Open { retry_after_ms });
                }
                CircuitState::HalfOpen => {
                    if inner.half_open_in_flight >= self.config.half_open_requests {
                        return Err(CircuitBreakerError::Open { retry_after_ms: 0 });
                    }
                    inner.half_open_in_flight += 1;
                }
                CircuitState::Closed => {}
            }
        }

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(error) => {
                if self.should_trip(&error) {
                    self.record_failure();
                } else {
                    self.release_half_open_slot();
                }
                Err(CircuitBreakerError::Inner(error))
            }
        }
    }

    fn release_half_open_slot(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == CircuitState::HalfOpen {
            inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
        }
    }

    fn record_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_requests {
                    inner.state = CircuitState::Closed;
                    inner.consecutive_failures = 0;
                    inner.opened_at = None;
                    info!("circuit breaker closed after successful half_open probe");
                }
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    inner.opened_at = Some(Instant::now());
                    warn!(
                        failures = inner.consecutive_failures,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen => {
                inner.half_open_in_flight = inner.half_open_in_flight.saturating_sub(1);
                inner.state = CircuitState::Open;
                inner.opened_at = Some(Instant::now());
                warn!("circuit breaker reopened after failed half_open probe");
            }
            CircuitState::Open => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn breaker(threshold: u32) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_millis(50),
            half_open_requests: 1,
            trip_on: Vec::new(),
        })
    }

    #[tokio::test]
    async fn opens_after_failure_threshold() {
        let b = breaker(3);
        for _ in 0..3 {
            let _ = b.execute(|| async { Err::<(), _>("boom") }).await;
        }
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn rejects_without_calling_op_while_open() {
        let b = breaker(1);
        let _ = b.execute(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(b.state(), CircuitState::Open);

        let called = std::sync::atomic::AtomicBool::new(false);
        let result = b
            .execute(|| async {
                called.store(true, std::sync::atomic::Ordering::SeqCst);
                Ok::<_, &str>(())
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Open { .. })));
        assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
    }

    #[tokio::test]
    async fn half_open_success_closes_circuit() {
        let b = breaker(1);
        let _ = b.execute(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(b.state(), CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let result = b.execute(|| async { Ok::<_, &str>(()) }).await;
        assert!(result.is_ok());
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_failure_reopens_circuit() {
        let b = breaker(1);
        let _ = b.execute(|| async { Err::<(), _>("boom") }).await;
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(b.state(), CircuitState::HalfOpen);

        let _ = b.execute(|| async { Err::<(), _>("still broken") }).await;
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn trip_on_filters_which_errors_count() {
        let b = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(50),
            half_open_requests: 1,
            trip_on: vec!["rate_limit".to_string()],
        });
        let _ = b.execute(|| async { Err::<(), _>("validation error") }).await;
        assert_eq!(b.state(), CircuitState::Closed);

        let _ = b.execute(|| async { Err::<(), _>("rate_limit exceeded") }).await;
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn trip_on_matches_case_insensitively() {
        let b = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: 1,
            reset_timeout: Duration::from_millis(50),
            half_open_requests: 1,
            trip_on: vec!["Rate_Limit".to_string()],
        });
        let _ = b.execute(|| async { Err::<(), _>("RATE_LIMIT EXCEEDED") }).await;
        assert_eq!(b.state(), CircuitState::Open);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures_in_closed_state() {
        let b = breaker(2);
        let _ = b.execute(|| async { Err::<(), _>("boom") }).await;
        let _ = b.execute(|| async { Ok::<_, &str>(()) }).await;
        let _ = b.execute(|| async { Err::<(), _>("boom") }).await;
        assert_eq!(b.state(), CircuitState::Closed);
    }
}
