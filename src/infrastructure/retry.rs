//! Retry Handler
//!
//! Re-runs transiently failing upstream calls with capped exponential
//! backoff and jitter.

use crate::domain::errors::GatewayError;
use crate::infrastructure::shutdown::ShutdownController;
use crate::infrastructure::sleeper::{Sleeper, TokioSleeper};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Retry configuration.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the second attempt
    pub base_delay: Duration,
    /// Upper bound on any single delay (before jitter)
    pub max_delay: Duration,
    /// Growth factor between consecutive delays
    pub multiplier: f64,
    /// Add uniform jitter in `[0, delay)`
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            base_delay: Duration::from_millis(1500),
            max_delay: Duration::from_millis(5000),
            multiplier: 1.5,
            jitter: true,
        }
    }
}

pub struct RetryHandler {
    config: RetryConfig,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self::with_sleeper(config, Arc::new(TokioSleeper))
    }

    pub fn with_sleeper(config: RetryConfig, sleeper: Arc<dyn Sleeper>) -> Self {
        Self { config, sleeper }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    /// Backoff before `attempt` (2-based), without jitter.
    ///
    /// `min(max_delay, base_delay * multiplier^(attempt - 2))`
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(2) as i32;
        let base_ms = self.config.base_delay.as_millis() as f64;
        let max_ms = self.config.max_delay.as_millis() as f64;
        let delay_ms = (base_ms * self.config.multiplier.powi(exponent)).min(max_ms);
        Duration::from_millis(delay_ms.max(0.0) as u64)
    }

    fn delay_for(&self, attempt: u32) -> Duration {
        let delay = self.backoff_delay(attempt);
        let delay_ms = delay.as_millis() as u64;
        if !self.config.jitter || delay_ms == 0 {
            return delay;
        }
        let jitter = rand::thread_rng().gen_range(0..delay_ms);
        delay + Duration::from_millis(jitter)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// `op` receives the 1-based attempt number. Non-retryable errors are
    /// returned at once; after the last attempt the last error is returned
    /// unchanged. Cancelling `cancel` aborts both a running attempt and a
    /// pending backoff with [`GatewayError::Cancelled`].
    pub async fn execute<T, F, Fut>(
        &self,
        label: &str,
        cancel: &ShutdownController,
        mut op: F,
    ) -> Result<T, GatewayError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, GatewayError>>,
    {
        let max_attempts = self.config.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            if cancel.is_shutdown() {
                return Err(GatewayError::Cancelled);
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                res = op(attempt) => res,
            };

            let err = match outcome {
                Ok(value) => {
                    if attempt > 1 {
                        tracing::info!(op = label, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => e,
            };

            if !err.is_retryable() {
                tracing::debug!(op = label, attempt, error = %err, "not retryable");
                return Err(err);
            }

            if attempt >= max_attempts {
                tracing::error!(op = label, attempts = attempt, error = %err, "all retry attempts failed");
                return Err(err);
            }

            attempt += 1;
            let delay = self.delay_for(attempt);
            tracing::warn!(
                op = label,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying after transient failure"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                _ = self.sleeper.sleep(delay) => {}
            }
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::infrastructure::sleeper::RecordingSleeper;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn no_jitter(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            jitter: false,
            ..Default::default()
        }
    }

    fn server_error() -> GatewayError {
        GatewayError::Upstream {
            status: Some(503),
            message: "unavailable".into(),
        }
    }

    #[test]
    fn test_default_config() {
        let config = RetryConfig::default();
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.base_delay, Duration::from_millis(1500));
        assert_eq!(config.max_delay, Duration::from_millis(5000));
        assert_eq!(config.multiplier, 1.5);
        assert!(config.jitter);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let handler = RetryHandler::new(RetryConfig::default());
        assert_eq!(handler.backoff_delay(2), Duration::from_millis(1500));
        assert_eq!(handler.backoff_delay(3), Duration::from_millis(2250));
        assert_eq!(handler.backoff_delay(4), Duration::from_millis(3375));
        assert_eq!(handler.backoff_delay(5), Duration::from_millis(5000));
        assert_eq!(handler.backoff_delay(10), Duration::from_millis(5000));
    }

    #[test]
    fn test_jitter_stays_in_range() {
        let handler = RetryHandler::new(RetryConfig::default());
        for _ in 0..100 {
            let d = handler.delay_for(2);
            assert!(d >= Duration::from_millis(1500));
            assert!(d < Duration::from_millis(3000));
        }
    }

    #[tokio::test]
    async fn test_first_attempt_success_does_not_sleep() {
        let sleeper = RecordingSleeper::new();
        let handler = RetryHandler::with_sleeper(no_jitter(3), Arc::new(sleeper.clone()));
        let cancel = ShutdownController::new();

        let res = handler.execute("t", &cancel, |_| async { Ok::<_, GatewayError>(7) }).await;
        assert_eq!(res.unwrap(), 7);
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let sleeper = RecordingSleeper::new();
        let handler = RetryHandler::with_sleeper(no_jitter(3), Arc::new(sleeper.clone()));
        let cancel = ShutdownController::new();
        let calls = AtomicU32::new(0);

        let res = handler
            .execute("t", &cancel, |attempt| {
                calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt < 3 {
                        Err(server_error())
                    } else {
                        Ok("done")
                    }
                }
            })
            .await;

        assert_eq!(res.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(
            sleeper.calls(),
            vec![Duration::from_millis(1500), Duration::from_millis(2250)]
        );
    }

    #[tokio::test]
    async fn test_non_retryable_returns_immediately() {
        let sleeper = RecordingSleeper::new();
        let handler = RetryHandler::with_sleeper(no_jitter(5), Arc::new(sleeper.clone()));
        let cancel = ShutdownController::new();
        let calls = AtomicU32::new(0);

        let res: Result<(), _> = handler
            .execute("t", &cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(GatewayError::InvalidInput("bad image".into())) }
            })
            .await;

        assert_eq!(res.unwrap_err(), GatewayError::InvalidInput("bad image".into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(sleeper.calls().is_empty());
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let sleeper = RecordingSleeper::new();
        let handler = RetryHandler::with_sleeper(no_jitter(2), Arc::new(sleeper.clone()));
        let cancel = ShutdownController::new();

        let res: Result<(), _> = handler
            .execute("t", &cancel, |attempt| async move {
                Err(GatewayError::Upstream {
                    status: Some(500 + attempt as u16),
                    message: format!("attempt {}", attempt),
                })
            })
            .await;

        assert_eq!(
            res.unwrap_err(),
            GatewayError::Upstream {
                status: Some(502),
                message: "attempt 2".into()
            }
        );
        assert_eq!(sleeper.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_timeouts_are_retried() {
        let sleeper = RecordingSleeper::new();
        let handler = RetryHandler::with_sleeper(no_jitter(2), Arc::new(sleeper));
        let cancel = ShutdownController::new();
        let calls = AtomicU32::new(0);

        let res: Result<(), _> = handler
            .execute("t", &cancel, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(GatewayError::UpstreamTimeout(Duration::from_secs(30))) }
            })
            .await;

        assert!(matches!(res, Err(GatewayError::UpstreamTimeout(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let handler = RetryHandler::with_sleeper(no_jitter(3), Arc::new(RecordingSleeper::new()));
        let cancel = ShutdownController::new();
        cancel.shutdown();

        let res = handler
            .execute("t", &cancel, |_| async { Ok::<_, GatewayError>(1) })
            .await;
        assert_eq!(res.unwrap_err(), GatewayError::Cancelled);
    }

    #[tokio::test]
    async fn test_cancel_during_backoff() {
        let handler = RetryHandler::new(RetryConfig {
            max_attempts: 3,
            base_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(60),
            multiplier: 1.0,
            jitter: false,
        });
        let cancel = ShutdownController::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.shutdown();
        });

        let start = std::time::Instant::now();
        let res: Result<(), _> = handler
            .execute("t", &cancel, |_| async { Err(server_error()) })
            .await;

        assert_eq!(res.unwrap_err(), GatewayError::Cancelled);
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_cancel_during_attempt() {
        let handler = RetryHandler::with_sleeper(no_jitter(3), Arc::new(RecordingSleeper::new()));
        let cancel = ShutdownController::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.shutdown();
        });

        let res: Result<(), _> = handler
            .execute("t", &cancel, |_| async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok::<_, GatewayError>(())
            })
            .await;

        assert_eq!(res.unwrap_err(), GatewayError::Cancelled);
    }
}
