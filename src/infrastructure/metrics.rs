//! Metrics Aggregator
//!
//! Process-wide counters for the OCR request path with Prometheus
//! text exposition.

use crate::domain::entities::MetricsSnapshot;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Latency samples kept for the health endpoint.
const RECENT_LATENCY_SAMPLES: usize = 100;

/// Lock-free request counters.
///
/// Increments come from many in-flight requests at once; only the
/// recent-latency ring takes a (short) lock.
#[derive(Debug, Default)]
pub struct MetricsAggregator {
    total_requests: AtomicU64,
    successes: AtomicU64,
    failures: AtomicU64,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    circuit_breaker_trips: AtomicU64,
    circuit_rejections: AtomicU64,
    rate_limit_hits: AtomicU64,
    latency_sum_ms: AtomicU64,
    latency_count: AtomicU64,
    recent_latencies: Mutex<VecDeque<u64>>,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_request(&self) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_success(&self, latency_ms: u64) {
        self.successes.fetch_add(1, Ordering::Relaxed);
        self.latency_sum_ms.fetch_add(latency_ms, Ordering::Relaxed);
        self.latency_count.fetch_add(1, Ordering::Relaxed);

        let mut recent = self.recent_latencies.lock();
        if recent.len() == RECENT_LATENCY_SAMPLES {
            recent.pop_front();
        }
        recent.push_back(latency_ms);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_breaker_trip(&self) {
        self.circuit_breaker_trips.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_circuit_rejection(&self) {
        self.circuit_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit_hit(&self) {
        self.rate_limit_hits.fetch_add(1, Ordering::Relaxed);
    }

    /// Consistent-enough view of all counters with derived rates.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let successes = self.successes.load(Ordering::Relaxed);
        let failures = self.failures.load(Ordering::Relaxed);
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let latency_sum_ms = self.latency_sum_ms.load(Ordering::Relaxed);
        let latency_count = self.latency_count.load(Ordering::Relaxed);

        let avg_latency_ms = if latency_count == 0 {
            0.0
        } else {
            latency_sum_ms as f64 / latency_count as f64
        };

        MetricsSnapshot {
            total_requests,
            successes,
            failures,
            cache_hits,
            cache_misses,
            circuit_breaker_trips: self.circuit_breaker_trips.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
            rate_limit_hits: self.rate_limit_hits.load(Ordering::Relaxed),
            latency_sum_ms,
            latency_count,
            success_rate: percentage(successes, successes + failures),
            cache_hit_rate: percentage(cache_hits, cache_hits + cache_misses),
            avg_latency_ms,
            recent_latencies_ms: self.recent_latencies.lock().iter().copied().collect(),
        }
    }

    /// Zero every counter.
    pub fn reset(&self) {
        for counter in [
            &self.total_requests,
            &self.successes,
            &self.failures,
            &self.cache_hits,
            &self.cache_misses,
            &self.circuit_breaker_trips,
            &self.circuit_rejections,
            &self.rate_limit_hits,
            &self.latency_sum_ms,
            &self.latency_count,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.recent_latencies.lock().clear();
        tracing::info!("metrics reset");
    }

    /// Export metrics in Prometheus text format.
    pub fn export_prometheus(&self) -> String {
        let s = self.snapshot();
        let mut output = String::new();

        let counters: [(&str, &str, u64); 8] = [
            ("ocr_gateway_requests_total", "Total OCR requests received", s.total_requests),
            ("ocr_gateway_successes_total", "OCR requests that returned text", s.successes),
            ("ocr_gateway_failures_total", "OCR requests that failed", s.failures),
            ("ocr_gateway_cache_hits_total", "Responses served from cache", s.cache_hits),
            ("ocr_gateway_cache_misses_total", "Cache lookups that missed", s.cache_misses),
            (
                "ocr_gateway_circuit_breaker_trips_total",
                "Transitions of the circuit breaker into open",
                s.circuit_breaker_trips,
            ),
            (
                "ocr_gateway_circuit_rejections_total",
                "Calls rejected by an open circuit",
                s.circuit_rejections,
            ),
            (
                "ocr_gateway_rate_limit_hits_total",
                "Requests rejected by the rate limiter",
                s.rate_limit_hits,
            ),
        ];

        for (name, help, value) in counters {
            output.push_str(&format!("# HELP {} {}\n", name, help));
            output.push_str(&format!("# TYPE {} counter\n", name));
            output.push_str(&format!("{} {}\n", name, value));
        }

        output.push_str("# HELP ocr_gateway_latency_ms Latency of successful OCR requests\n");
        output.push_str("# TYPE ocr_gateway_latency_ms summary\n");
        output.push_str(&format!("ocr_gateway_latency_ms_sum {}\n", s.latency_sum_ms));
        output.push_str(&format!("ocr_gateway_latency_ms_count {}\n", s.latency_count));

        output.push_str("# HELP ocr_gateway_success_rate Percentage of completed requests that succeeded\n");
        output.push_str("# TYPE ocr_gateway_success_rate gauge\n");
        output.push_str(&format!("ocr_gateway_success_rate {}\n", s.success_rate));

        output.push_str("# HELP ocr_gateway_cache_hit_rate Percentage of cache lookups that hit\n");
        output.push_str("# TYPE ocr_gateway_cache_hit_rate gauge\n");
        output.push_str(&format!("ocr_gateway_cache_hit_rate {}\n", s.cache_hit_rate));

        output
    }

    /// Log one summary line.
    pub fn log_summary(&self) {
        let s = self.snapshot();
        if s.total_requests == 0 {
            return;
        }
        tracing::info!(
            total = s.total_requests,
            success_rate = s.success_rate,
            cache_hit_rate = s.cache_hit_rate,
            avg_latency_ms = s.avg_latency_ms,
            trips = s.circuit_breaker_trips,
            rate_limited = s.rate_limit_hits,
            "ocr metrics summary"
        );
    }

    /// Spawn a task logging the summary every `every`.
    pub fn start_summary_task(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let metrics = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.tick().await;
            loop {
                interval.tick().await;
                metrics.log_summary();
            }
        })
    }
}

/// Percentage rounded to two decimals; zero when there is no data.
fn percentage(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 10_000.0).round() / 100.0
}
