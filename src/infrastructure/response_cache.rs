//! Response Cache
//!
//! Content-addressed cache of OCR results. Identical image bytes with the
//! same languages hash to the same key, so a hit is always a valid answer.

use crate::domain::entities::{CacheEntry, OcrResult};
use crate::domain::ports::Clock;
use crate::domain::services::ImagePolicy;
use dashmap::DashMap;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Response cache configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Lifetime of an entry
    pub default_ttl: Duration,
    /// Maximum number of entries (0 = unbounded)
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl: Duration::from_secs(24 * 60 * 60),
            max_entries: 1000,
        }
    }
}

/// TTL cache with lazy expiry.
///
/// Expired entries are dropped when read, by [`purge_expired`](Self::purge_expired),
/// or to make room at capacity (oldest entry first).
pub struct ResponseCache {
    config: CacheConfig,
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            entries: DashMap::new(),
            clock,
        }
    }

    /// Derive the cache key for an image and its recognition languages.
    ///
    /// Languages are normalised first so `["FR", "en"]` and `["en", "fr"]`
    /// share a key. Every field is length-prefixed, so no image and
    /// language list can collide with another by shifting bytes between them.
    pub fn generate_key(image: &[u8], languages: &[String]) -> String {
        let languages = ImagePolicy::normalize_languages(languages);
        let mut hasher = Sha256::new();
        hasher.update((image.len() as u64).to_le_bytes());
        hasher.update(image);
        for language in &languages {
            hasher.update((language.len() as u64).to_le_bytes());
            hasher.update(language.as_bytes());
        }
        format!("ocr:{:x}", hasher.finalize())
    }

    /// Look up a live entry. Expired entries are evicted and read as a miss.
    pub fn get(&self, key: &str) -> Option<OcrResult> {
        let now = self.clock.now_millis();
        if let Some(entry) = self.entries.get(key) {
            if !entry.is_expired(now) {
                return Some(entry.value.clone());
            }
        } else {
            return None;
        }

        self.entries.remove_if(key, |_, e| e.is_expired(now));
        tracing::debug!(key = %key, "cache entry expired");
        None
    }

    /// Store a value with an explicit TTL. Last write wins.
    pub fn set(&self, key: &str, value: OcrResult, ttl: Duration) {
        let now = self.clock.now_millis();

        if self.config.max_entries > 0
            && !self.entries.contains_key(key)
            && self.entries.len() >= self.config.max_entries
        {
            self.make_room(now);
        }

        self.entries.insert(
            key.to_string(),
            CacheEntry {
                key: key.to_string(),
                value,
                created_at_ms: now,
                expires_at_ms: now.saturating_add(ttl.as_millis() as u64),
            },
        );
    }

    /// Store a value with the configured TTL.
    pub fn set_default(&self, key: &str, value: OcrResult) {
        self.set(key, value, self.config.default_ttl);
    }

    pub fn remove(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn default_ttl(&self) -> Duration {
        self.config.default_ttl
    }

    /// Remove every expired entry. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    fn make_room(&self, now: u64) {
        self.entries.retain(|_, e| !e.is_expired(now));
        if self.entries.len() < self.config.max_entries {
            return;
        }

        let oldest = self
            .entries
            .iter()
            .min_by_key(|e| e.created_at_ms)
            .map(|e| e.key().clone());
        if let Some(key) = oldest {
            self.entries.remove(&key);
            tracing::debug!(key = %key, "cache full, evicted oldest entry");
        }
    }

    /// Spawn the periodic expiry sweep.
    pub fn start_sweep_task(self: &Arc<Self>, every: Duration) -> tokio::task::JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            loop {
                interval.tick().await;
                let removed = cache.purge_expired();
                if removed > 0 {
                    tracing::debug!("cache sweep: removed {} expired entries", removed);
                }
            }
        })
    }
}
