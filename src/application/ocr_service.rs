//! OCR Service - Main application use case
//!
//! Runs one OCR request through validation, the response cache and the
//! resilience chain around the upstream, recording metrics on the way.

use crate::domain::entities::{OcrOutcome, OcrRequest, OcrResult};
use crate::domain::errors::GatewayError;
use crate::domain::ports::OcrUpstream;
use crate::domain::services::ImagePolicy;
use crate::infrastructure::{
    CircuitBreaker, MetricsAggregator, ResponseCache, RetryHandler, ShutdownController,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// OCR service - main application use case.
///
/// The circuit breaker wraps the whole retry sequence: a request counts
/// against the circuit once, and only after its retries are exhausted.
pub struct OcrService {
    upstream: Arc<dyn OcrUpstream>,
    cache: Arc<ResponseCache>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryHandler,
    metrics: Arc<MetricsAggregator>,
    attempt_timeout: Duration,
}

impl OcrService {
    pub fn new(
        upstream: Arc<dyn OcrUpstream>,
        cache: Arc<ResponseCache>,
        breaker: Arc<CircuitBreaker>,
        retry: RetryHandler,
        metrics: Arc<MetricsAggregator>,
        attempt_timeout: Duration,
    ) -> Self {
        Self {
            upstream,
            cache,
            breaker,
            retry,
            metrics,
            attempt_timeout,
        }
    }

    /// Recognise the text in `request`.
    ///
    /// Identical images with the same languages are served from the
    /// cache without reaching the upstream.
    pub async fn recognize(
        &self,
        request: OcrRequest,
        cancel: &ShutdownController,
    ) -> Result<OcrOutcome, GatewayError> {
        let started = Instant::now();
        self.metrics.record_request();

        let request = match ImagePolicy::validate(request) {
            Ok(r) => r,
            Err(e) => {
                self.metrics.record_failure();
                tracing::debug!(error = %e, "rejected OCR request");
                return Err(e);
            }
        };

        let cache_key = ResponseCache::generate_key(&request.image, &request.languages);

        if let Some(result) = self.cache.get(&cache_key) {
            self.metrics.record_cache_hit();
            self.metrics.record_success(elapsed_ms(started));
            return Ok(OcrOutcome {
                result,
                cached: true,
                cache_key,
            });
        }
        self.metrics.record_cache_miss();

        match self.call_upstream(&request, cancel).await {
            Ok(mut result) => {
                let latency = elapsed_ms(started);
                result.processing_time_ms = latency;
                self.cache.set_default(&cache_key, result.clone());
                self.metrics.record_success(latency);
                tracing::info!(
                    latency_ms = latency,
                    regions = result.detected_regions,
                    "OCR request completed"
                );
                Ok(OcrOutcome {
                    result,
                    cached: false,
                    cache_key,
                })
            }
            Err(e) => {
                self.metrics.record_failure();
                if matches!(e, GatewayError::CircuitOpen { .. }) {
                    self.metrics.record_circuit_rejection();
                }
                tracing::warn!(kind = e.kind(), error = %e, "OCR request failed");
                Err(e)
            }
        }
    }

    async fn call_upstream(
        &self,
        request: &OcrRequest,
        cancel: &ShutdownController,
    ) -> Result<OcrResult, GatewayError> {
        let upstream = &*self.upstream;
        let timeout = self.attempt_timeout;

        self.breaker
            .execute(|| {
                self.retry.execute("ocr upstream", cancel, move |attempt| async move {
                    tracing::debug!(attempt, "calling OCR upstream");
                    match tokio::time::timeout(timeout, upstream.recognize(request)).await {
                        Ok(res) => res,
                        Err(_) => Err(GatewayError::UpstreamTimeout(timeout)),
                    }
                })
            })
            .await
    }

    /// Probe the upstream's own health endpoint.
    pub async fn upstream_health(&self) -> bool {
        self.upstream.health().await
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn metrics(&self) -> &MetricsAggregator {
        &self.metrics
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
