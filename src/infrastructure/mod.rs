//! Infrastructure Layer
//!
//! Resilience and admission-control components wrapped around the OCR
//! upstream: rate limiting, circuit breaking, retries, caching, metrics
//! and graceful shutdown.

pub mod circuit_breaker;
pub mod metrics;
pub mod rate_limiter;
pub mod response_cache;
pub mod retry;
pub mod shutdown;
pub mod sleeper;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot};
pub use metrics::MetricsAggregator;
pub use rate_limiter::{RateLimitConfig, TierPolicy, TieredRateLimiter};
pub use response_cache::{CacheConfig, ResponseCache};
pub use retry::{RetryConfig, RetryHandler};
pub use shutdown::{shutdown_signal, InFlightGuard, ShutdownController};
pub use sleeper::{RecordingSleeper, Sleeper, TokioSleeper};
