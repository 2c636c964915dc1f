//! Circuit Breaker Pattern
//!
//! Stops calling the OCR upstream after repeated failures and probes it
//! with a single trial call once a cooldown has elapsed.

use crate::domain::errors::GatewayError;
use crate::domain::ports::Clock;
use crate::domain::value_objects::CircuitState;
use crate::infrastructure::metrics::MetricsAggregator;
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Wait reported to callers turned away while a half-open trial is running.
pub const TRIAL_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Circuit breaker configuration.
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time to stay open before allowing a trial call
    pub cooldown: Duration,
    /// Successful trials needed to close again
    pub half_open_success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
            half_open_success_threshold: 1,
        }
    }
}

#[derive(Debug, Default)]
struct BreakerInner {
    state: CircuitState,
    consecutive_failures: u32,
    last_failure_at_ms: Option<u64>,
    half_open_successes: u32,
    trial_in_flight: bool,
}

/// Read-only view for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub half_open_successes: u32,
    pub last_failure_at_ms: Option<u64>,
    pub trial_in_flight: bool,
}

/// Breaker guarding a single upstream.
///
/// All transitions happen under one short-held lock; the protected call
/// itself runs outside it.
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerInner>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsAggregator>,
}

impl CircuitBreaker {
    pub fn new(
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner::default()),
            clock,
            metrics,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `op` through the breaker.
    ///
    /// While open, fails fast with [`GatewayError::CircuitOpen`] without
    /// invoking `op`. Only upstream failures (timeouts and server or
    /// transport errors) count against the circuit.
    pub async fn execute<T, F, Fut>(&self, op: F) -> Result<T, GatewayError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let permit = self.acquire()?;
        let result = op().await;
        match &result {
            Ok(_) => permit.succeeded(),
            Err(e) if e.counts_as_failure() => permit.failed(),
            Err(_) => drop(permit),
        }
        result
    }

    /// Current state without applying time-based transitions.
    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            half_open_successes: inner.half_open_successes,
            last_failure_at_ms: inner.last_failure_at_ms,
            trial_in_flight: inner.trial_in_flight,
        }
    }

    /// Force the circuit closed and forget all failures.
    pub fn reset(&self) {
        *self.inner.lock() = BreakerInner::default();
        tracing::info!("circuit breaker manually reset");
    }

    fn acquire(&self) -> Result<CallPermit<'_>, GatewayError> {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => Ok(CallPermit::new(self, false)),
            CircuitState::Open => {
                let now = self.clock.now_millis();
                let opened_at = inner.last_failure_at_ms.unwrap_or(now);
                let elapsed = Duration::from_millis(now.saturating_sub(opened_at));

                if elapsed >= self.config.cooldown {
                    inner.state = CircuitState::HalfOpen;
                    inner.half_open_successes = 0;
                    inner.trial_in_flight = true;
                    tracing::info!("circuit breaker half-open, admitting trial call");
                    Ok(CallPermit::new(self, true))
                } else {
                    Err(GatewayError::CircuitOpen {
                        retry_after: self.config.cooldown - elapsed,
                    })
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Err(GatewayError::CircuitOpen {
                        retry_after: TRIAL_RETRY_AFTER.min(self.config.cooldown),
                    })
                } else {
                    inner.trial_in_flight = true;
                    Ok(CallPermit::new(self, true))
                }
            }
        }
    }

    fn on_success(&self, trial: bool) {
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures = 0;
            }
            CircuitState::HalfOpen if trial => {
                inner.trial_in_flight = false;
                inner.half_open_successes += 1;
                if inner.half_open_successes >= self.config.half_open_success_threshold {
                    *inner = BreakerInner::default();
                    tracing::info!("circuit breaker closed (upstream recovered)");
                }
            }
            // Late result of a call admitted before the circuit opened.
            _ => {}
        }
    }

    fn on_failure(&self, trial: bool) {
        let now = self.clock.now_millis();
        let mut inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => {
                inner.consecutive_failures += 1;
                inner.last_failure_at_ms = Some(now);
                if inner.consecutive_failures >= self.config.failure_threshold {
                    inner.state = CircuitState::Open;
                    self.metrics.record_circuit_breaker_trip();
                    tracing::warn!(
                        failures = inner.consecutive_failures,
                        cooldown_ms = self.config.cooldown.as_millis() as u64,
                        "circuit breaker opened"
                    );
                }
            }
            CircuitState::HalfOpen if trial => {
                inner.state = CircuitState::Open;
                inner.trial_in_flight = false;
                inner.half_open_successes = 0;
                inner.last_failure_at_ms = Some(now);
                self.metrics.record_circuit_breaker_trip();
                tracing::warn!("circuit breaker re-opened (trial call failed)");
            }
            _ => {}
        }
    }

    fn release_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }
}

/// Admission to one protected call.
///
/// Dropping an unsettled trial permit (neutral outcome or abandoned
/// future) reopens the half-open gate for the next caller.
struct CallPermit<'a> {
    breaker: &'a CircuitBreaker,
    trial: bool,
    settled: bool,
}

impl<'a> CallPermit<'a> {
    fn new(breaker: &'a CircuitBreaker, trial: bool) -> Self {
        Self {
            breaker,
            trial,
            settled: false,
        }
    }

    fn succeeded(mut self) {
        self.settled = true;
        self.breaker.on_success(self.trial);
    }

    fn failed(mut self) {
        self.settled = true;
        self.breaker.on_failure(self.trial);
    }
}

impl Drop for CallPermit<'_> {
    fn drop(&mut self) {
        if self.trial && !self.settled {
            self.breaker.release_trial();
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::domain::ports::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, cooldown_ms: u64) -> (Arc<CircuitBreaker>, Arc<ManualClock>, Arc<MetricsAggregator>) {
        let clock = Arc::new(ManualClock::new(10_000));
        let metrics = Arc::new(MetricsAggregator::new());
        let cb = CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold: threshold,
                cooldown: Duration::from_millis(cooldown_ms),
                half_open_success_threshold: 1,
            },
            clock.clone(),
            metrics.clone(),
        );
        (Arc::new(cb), clock, metrics)
    }

    fn upstream_down() -> GatewayError {
        GatewayError::Upstream {
            status: Some(502),
            message: "bad gateway".into(),
        }
    }

    async fn fail(cb: &CircuitBreaker) -> Result<(), GatewayError> {
        cb.execute(|| async { Err::<(), _>(upstream_down()) }).await
    }

    async fn succeed(cb: &CircuitBreaker) -> Result<(), GatewayError> {
        cb.execute(|| async { Ok::<_, GatewayError>(()) }).await
    }

    #[test]
    fn test_config_default() {
        let config = CircuitBreakerConfig::default();
        assert_eq!(config.failure_threshold, 3);
        assert_eq!(config.cooldown, Duration::from_secs(30));
        assert_eq!(config.half_open_success_threshold, 1);
    }

    #[tokio::test]
    async fn test_opens_after_threshold() {
        let (cb, _, metrics) = breaker(3, 30_000);
        for _ in 0..2 {
            assert!(fail(&cb).await.is_err());
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        assert!(fail(&cb).await.is_err());
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(metrics.snapshot().circuit_breaker_trips, 1);
    }

    #[tokio::test]
    async fn test_success_resets_consecutive_failures() {
        let (cb, _, _) = breaker(3, 30_000);
        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        succeed(&cb).await.unwrap();
        assert_eq!(cb.snapshot().consecutive_failures, 0);
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_open_rejects_without_calling_op() {
        let (cb, clock, _) = breaker(1, 30_000);
        fail(&cb).await.unwrap_err();

        clock.advance(Duration::from_secs(10));
        let calls = AtomicU32::new(0);
        let res = cb
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, GatewayError>(()) }
            })
            .await;

        assert_eq!(
            res.unwrap_err(),
            GatewayError::CircuitOpen {
                retry_after: Duration::from_secs(20)
            }
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_half_open_trial_success_closes() {
        let (cb, clock, _) = breaker(1, 30_000);
        fail(&cb).await.unwrap_err();
        clock.advance(Duration::from_secs(30));

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_half_open_trial_failure_reopens_with_fresh_cooldown() {
        let (cb, clock, metrics) = breaker(1, 30_000);
        fail(&cb).await.unwrap_err();
        clock.advance(Duration::from_secs(31));

        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(metrics.snapshot().circuit_breaker_trips, 2);

        clock.advance(Duration::from_secs(29));
        assert!(matches!(
            succeed(&cb).await,
            Err(GatewayError::CircuitOpen { .. })
        ));
        clock.advance(Duration::from_secs(1));
        assert!(succeed(&cb).await.is_ok());
    }

    #[tokio::test]
    async fn test_multiple_trial_successes_required() {
        let clock = Arc::new(ManualClock::new(0));
        let cb = CircuitBreaker::new(
            CircuitBreakerConfig {
                failure_threshold: 1,
                cooldown: Duration::from_millis(100),
                half_open_success_threshold: 2,
            },
            clock.clone(),
            Arc::new(MetricsAggregator::new()),
        );
        fail(&cb).await.unwrap_err();
        clock.advance(Duration::from_millis(100));

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert_eq!(cb.snapshot().half_open_successes, 1);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_half_open_admits_single_trial() {
        let (cb, clock, _) = breaker(1, 30_000);
        fail(&cb).await.unwrap_err();
        clock.advance(Duration::from_secs(30));

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_cb = cb.clone();
        let trial = tokio::spawn(async move {
            trial_cb
                .execute(|| async move {
                    let _ = release_rx.await;
                    Ok::<_, GatewayError>("trial")
                })
                .await
        });

        while !cb.snapshot().trial_in_flight {
            tokio::task::yield_now().await;
        }

        let calls = AtomicU32::new(0);
        let concurrent = cb
            .execute(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, GatewayError>("other") }
            })
            .await;
        assert_eq!(
            concurrent,
            Err(GatewayError::CircuitOpen {
                retry_after: TRIAL_RETRY_AFTER
            })
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        release_tx.send(()).unwrap();
        assert_eq!(trial.await.unwrap().unwrap(), "trial");
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_abandoned_trial_releases_gate() {
        let (cb, clock, _) = breaker(1, 1_000);
        fail(&cb).await.unwrap_err();
        clock.advance(Duration::from_secs(1));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(10),
            cb.execute(|| async {
                std::future::pending::<()>().await;
                Ok::<_, GatewayError>(())
            }),
        )
        .await;
        assert!(abandoned.is_err());
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.snapshot().trial_in_flight);

        succeed(&cb).await.unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_invalid_input_is_neutral() {
        let (cb, clock, _) = breaker(2, 1_000);
        for _ in 0..5 {
            let res = cb
                .execute(|| async { Err::<(), _>(GatewayError::InvalidInput("bad".into())) })
                .await;
            assert!(matches!(res, Err(GatewayError::InvalidInput(_))));
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.snapshot().consecutive_failures, 0);

        fail(&cb).await.unwrap_err();
        fail(&cb).await.unwrap_err();
        clock.advance(Duration::from_secs(1));

        cb.execute(|| async { Err::<(), _>(GatewayError::InvalidInput("bad".into())) })
            .await
            .unwrap_err();
        assert_eq!(cb.state(), CircuitState::HalfOpen);
        assert!(!cb.snapshot().trial_in_flight);
    }

    #[tokio::test]
    async fn test_stale_failure_does_not_reopen_half_open() {
        let (cb, clock, metrics) = breaker(1, 1_000);

        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        let started = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let slow_cb = cb.clone();
        let slow_started = started.clone();
        let slow = tokio::spawn(async move {
            slow_cb
                .execute(|| async move {
                    slow_started.store(true, Ordering::SeqCst);
                    let _ = release_rx.await;
                    Err::<(), _>(upstream_down())
                })
                .await
        });
        while !started.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }

        fail(&cb).await.unwrap_err();
        clock.advance(Duration::from_secs(1));
        let (trial_tx, trial_rx) = tokio::sync::oneshot::channel::<()>();
        let trial_cb = cb.clone();
        let trial = tokio::spawn(async move {
            trial_cb
                .execute(|| async move {
                    let _ = trial_rx.await;
                    Ok::<_, GatewayError>(())
                })
                .await
        });
        while !cb.snapshot().trial_in_flight {
            tokio::task::yield_now().await;
        }

        release_tx.send(()).unwrap();
        slow.await.unwrap().unwrap_err();
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        trial_tx.send(()).unwrap();
        trial.await.unwrap().unwrap();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(metrics.snapshot().circuit_breaker_trips, 1);
    }

    #[tokio::test]
    async fn test_reset() {
        let (cb, _, _) = breaker(1, 60_000);
        fail(&cb).await.unwrap_err();
        assert_eq!(cb.state(), CircuitState::Open);
        cb.reset();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert!(succeed(&cb).await.is_ok());
    }

    #[tokio::test]
    #[tracing_test::traced_test]
    async fn test_transitions_are_logged() {
        let (cb, clock, _) = breaker(1, 1_000);
        fail(&cb).await.unwrap_err();
        clock.advance(Duration::from_secs(1));
        succeed(&cb).await.unwrap();
        assert!(logs_contain("circuit breaker opened"));
        assert!(logs_contain("circuit breaker closed"));
    }
}
