//! Rate Limiter
//!
//! Tiered fixed-window admission control keyed by anonymous client id.

use crate::domain::entities::RateLimitDecision;
use crate::domain::errors::GatewayError;
use crate::domain::ports::{Clock, CounterStore};
use crate::domain::value_objects::{ClientId, RateLimitTier};
use crate::infrastructure::metrics::MetricsAggregator;
use std::sync::Arc;
use std::time::Duration;

/// Budget for one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierPolicy {
    /// Requests admitted per window
    pub limit: u32,
    /// Window length
    pub window: Duration,
}

impl TierPolicy {
    pub const fn per_minute(limit: u32) -> Self {
        Self {
            limit,
            window: Duration::from_secs(60),
        }
    }

    pub const fn per_hour(limit: u32) -> Self {
        Self {
            limit,
            window: Duration::from_secs(3600),
        }
    }

    pub fn window_ms(&self) -> u64 {
        self.window.as_millis() as u64
    }
}

/// Per-tier policies.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub api: TierPolicy,
    pub marking: TierPolicy,
    pub upload: TierPolicy,
    pub waitlist: TierPolicy,
}

impl RateLimitConfig {
    pub fn policy(&self, tier: RateLimitTier) -> TierPolicy {
        match tier {
            RateLimitTier::Api => self.api,
            RateLimitTier::Marking => self.marking,
            RateLimitTier::Upload => self.upload,
            RateLimitTier::Waitlist => self.waitlist,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            api: TierPolicy::per_minute(60),
            marking: TierPolicy::per_minute(10),
            upload: TierPolicy::per_minute(5),
            waitlist: TierPolicy::per_hour(5),
        }
    }
}

/// Fixed-window rate limiter over a pluggable [`CounterStore`].
///
/// Windows reset once their duration has elapsed, not continuously, so a
/// client can be admitted up to `2 * limit` times around a window
/// boundary. Rejected requests are not counted.
pub struct TieredRateLimiter {
    config: RateLimitConfig,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
    metrics: Arc<MetricsAggregator>,
}

impl TieredRateLimiter {
    pub fn new(
        config: RateLimitConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
        metrics: Arc<MetricsAggregator>,
    ) -> Self {
        Self {
            config,
            store,
            clock,
            metrics,
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    pub fn store_name(&self) -> &'static str {
        self.store.name()
    }

    pub fn key(tier: RateLimitTier, client: &ClientId) -> String {
        format!("ratelimit:{}:{}", tier.as_str(), client.as_str())
    }

    /// Count one request against `tier` for `client`.
    pub async fn check(
        &self,
        tier: RateLimitTier,
        client: &ClientId,
    ) -> Result<RateLimitDecision, GatewayError> {
        let policy = self.config.policy(tier);
        let key = Self::key(tier, client);
        let now = self.clock.now_millis();

        let window = self
            .store
            .try_acquire(&key, policy.limit, policy.window_ms(), now)
            .await?;

        let reset_at_ms = window.window_start_ms.saturating_add(policy.window_ms());
        let decision = RateLimitDecision {
            allowed: window.admitted,
            limit: policy.limit,
            remaining: policy.limit.saturating_sub(window.count),
            retry_after_ms: if window.admitted {
                0
            } else {
                reset_at_ms.saturating_sub(now).max(1)
            },
            reset_at_ms,
        };

        if decision.allowed {
            tracing::debug!(
                tier = tier.as_str(),
                key = %key,
                remaining = decision.remaining,
                "request admitted"
            );
        } else {
            self.metrics.record_rate_limit_hit();
            tracing::warn!(
                tier = tier.as_str(),
                key = %key,
                limit = policy.limit,
                retry_after_ms = decision.retry_after_ms,
                "rate limit exceeded"
            );
        }

        Ok(decision)
    }

    /// Like [`check`](Self::check) but turns a rejection into an error.
    pub async fn enforce(
        &self,
        tier: RateLimitTier,
        client: &ClientId,
    ) -> Result<RateLimitDecision, GatewayError> {
        let decision = self.check(tier, client).await?;
        if decision.allowed {
            Ok(decision)
        } else {
            Err(GatewayError::RateLimitExceeded {
                tier: tier.as_str().to_string(),
                limit: decision.limit,
                retry_after_ms: decision.retry_after_ms,
            })
        }
    }

    /// Drop elapsed windows from the store.
    pub async fn purge_expired(&self) -> Result<usize, GatewayError> {
        self.store.purge_expired(self.clock.now_millis()).await
    }

    /// Spawn the periodic purge of elapsed windows.
    pub fn start_purge_task(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let limiter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                match limiter.purge_expired().await {
                    Ok(0) => {}
                    Ok(removed) => {
                        tracing::debug!("rate limit purge: removed {} windows", removed)
                    }
                    Err(e) => tracing::warn!("rate limit purge failed: {}", e),
                }
            }
        })
    }
}
