//! Domain Entities - Core business objects
//!
//! These entities represent the core concepts of the OCR gateway domain.
//! They have no I/O dependencies and contain only business logic.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// An image submitted for text recognition.
#[derive(Debug, Clone)]
pub struct OcrRequest {
    /// Raw image bytes
    pub image: Bytes,
    /// Client-supplied file name
    pub file_name: String,
    /// Declared MIME type (image/png, image/jpeg, ...)
    pub content_type: String,
    /// Requested recognition languages (ISO 639-1)
    pub languages: Vec<String>,
}

impl OcrRequest {
    pub fn new(image: impl Into<Bytes>, file_name: &str, content_type: &str) -> Self {
        Self {
            image: image.into(),
            file_name: file_name.to_string(),
            content_type: content_type.to_string(),
            languages: vec!["en".to_string()],
        }
    }

    /// Replace the requested languages.
    pub fn with_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.languages = languages.into_iter().map(Into::into).collect();
        self
    }

    pub fn size(&self) -> usize {
        self.image.len()
    }
}

/// Text recognised by the upstream OCR service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub text: String,
    /// Mean confidence, 0-100
    pub confidence: f64,
    /// Wall time spent producing this result
    pub processing_time_ms: u64,
    /// Primary language of the result
    pub language: String,
    /// Number of text regions found
    pub detected_regions: u32,
}

/// Outcome of one pass through the OCR request path.
#[derive(Debug, Clone)]
pub struct OcrOutcome {
    pub result: OcrResult,
    /// True when served from the response cache
    pub cached: bool,
    pub cache_key: String,
}

/// A cached upstream result addressed by a hash of its inputs.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub value: OcrResult,
    pub created_at_ms: u64,
    pub expires_at_ms: u64,
}

impl CacheEntry {
    /// An entry is served while `now <= expires_at`.
    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms > self.expires_at_ms
    }
}

/// Fixed counting window for one `tier:client` key.
///
/// The window resets when `window_ms` has elapsed since `window_start_ms`.
/// Because the reset is per window and not sliding, a client may be
/// admitted up to `2 * limit` times across a window boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitWindow {
    pub key: String,
    pub window_start_ms: u64,
    pub count: u32,
    pub limit: u32,
    pub window_ms: u64,
}

impl RateLimitWindow {
    /// Create an empty window starting at `now_ms`.
    pub fn new(key: &str, limit: u32, window_ms: u64, now_ms: u64) -> Self {
        Self {
            key: key.to_string(),
            window_start_ms: now_ms,
            count: 0,
            limit,
            window_ms,
        }
    }

    pub fn is_expired(&self, now_ms: u64) -> bool {
        now_ms.saturating_sub(self.window_start_ms) >= self.window_ms
    }

    /// Read-check-increment in one step.
    ///
    /// Callers must hold exclusive access to the window. Rejected attempts
    /// leave the count untouched.
    pub fn admit(&mut self, now_ms: u64) -> bool {
        if self.is_expired(now_ms) {
            self.window_start_ms = now_ms;
            self.count = 0;
        }
        if self.count < self.limit {
            self.count += 1;
            true
        } else {
            false
        }
    }

    /// When the current window ends.
    pub fn reset_at_ms(&self) -> u64 {
        self.window_start_ms.saturating_add(self.window_ms)
    }

    pub fn state(&self, admitted: bool) -> WindowState {
        WindowState {
            count: self.count,
            window_start_ms: self.window_start_ms,
            admitted,
        }
    }
}

/// What a counter store reports back after an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    pub count: u32,
    pub window_start_ms: u64,
    pub admitted: bool,
}

/// Result of a rate-limit check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Zero when allowed
    pub retry_after_ms: u64,
    /// Wall-clock end of the current window
    pub reset_at_ms: u64,
}

/// Point-in-time view of the gateway counters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub total_requests: u64,
    pub successes: u64,
    pub failures: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub circuit_breaker_trips: u64,
    pub circuit_rejections: u64,
    pub rate_limit_hits: u64,
    pub latency_sum_ms: u64,
    pub latency_count: u64,
    /// Percentage of completed requests that succeeded
    pub success_rate: f64,
    /// Percentage of cache lookups that hit
    pub cache_hit_rate: f64,
    pub avg_latency_ms: f64,
    pub recent_latencies_ms: Vec<u64>,
}
