//! Gateway Errors
//!
//! Typed failures shared by every resilience layer and mapped to HTTP
//! responses by the inbound adapter.

use std::time::Duration;
use thiserror::Error;

/// Every failure a protected request can end in.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Admission refused by the tiered rate limiter.
    #[error("rate limit exceeded for tier {tier}: {limit} requests per window, retry in {retry_after_ms}ms")]
    RateLimitExceeded {
        tier: String,
        limit: u32,
        retry_after_ms: u64,
    },

    /// The circuit breaker is rejecting calls to the upstream.
    #[error("circuit breaker is open, OCR service temporarily unavailable (retry in {}s)", .retry_after.as_secs())]
    CircuitOpen { retry_after: Duration },

    /// A single upstream attempt exceeded its hard timeout.
    #[error("upstream call timed out after {0:?}")]
    UpstreamTimeout(Duration),

    /// The upstream answered with a server error or could not be reached.
    #[error("upstream error (status {status:?}): {message}")]
    Upstream { status: Option<u16>, message: String },

    /// The request itself is unacceptable; retrying cannot help.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The operation was cancelled before it completed.
    #[error("operation cancelled")]
    Cancelled,

    /// The rate-limit counter store could not be reached.
    #[error("counter store error: {0}")]
    CounterStore(String),
}

impl GatewayError {
    /// Whether another attempt of the same operation could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::UpstreamTimeout(_) => true,
            GatewayError::Upstream { status, .. } => match status {
                Some(code) => *code >= 500,
                None => true,
            },
            _ => false,
        }
    }

    /// Whether this outcome says the upstream is unhealthy.
    ///
    /// Bad input and cancellation are neutral: they neither trip nor
    /// heal the circuit breaker.
    pub fn counts_as_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::UpstreamTimeout(_) | GatewayError::Upstream { .. }
        )
    }

    /// Short machine-readable label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            GatewayError::RateLimitExceeded { .. } => "rate_limited",
            GatewayError::CircuitOpen { .. } => "circuit_open",
            GatewayError::UpstreamTimeout(_) => "upstream_timeout",
            GatewayError::Upstream { .. } => "upstream_error",
            GatewayError::InvalidInput(_) => "invalid_input",
            GatewayError::Cancelled => "cancelled",
            GatewayError::CounterStore(_) => "counter_store",
        }
    }
}
