//! DashMap Counter Store
//!
//! Implements CounterStore in process memory using DashMap entry locks.

use crate::domain::entities::{RateLimitWindow, WindowState};
use crate::domain::errors::GatewayError;
use crate::domain::ports::CounterStore;
use async_trait::async_trait;
use dashmap::DashMap;

/// In-process window store for single-instance deployments.
///
/// The read-check-increment runs while holding the shard lock for the
/// key, so concurrent checks for one key are serialised.
#[derive(Debug, Default)]
pub struct DashMapCounterStore {
    windows: DashMap<String, RateLimitWindow>,
}

impl DashMapCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Copy of the current window for `key`, if any.
    pub fn window(&self, key: &str) -> Option<RateLimitWindow> {
        self.windows.get(key).map(|w| w.clone())
    }
}

#[async_trait]
impl CounterStore for DashMapCounterStore {
    async fn try_acquire(
        &self,
        key: &str,
        limit: u32,
        window_ms: u64,
        now_ms: u64,
    ) -> Result<WindowState, GatewayError> {
        let mut window = self
            .windows
            .entry(key.to_string())
            .or_insert_with(|| RateLimitWindow::new(key, limit, window_ms, now_ms));

        window.limit = limit;
        window.window_ms = window_ms;
        let admitted = window.admit(now_ms);
        Ok(window.state(admitted))
    }

    async fn purge_expired(&self, now_ms: u64) -> Result<usize, GatewayError> {
        let before = self.windows.len();
        self.windows.retain(|_, w| !w.is_expired(now_ms));
        Ok(before.saturating_sub(self.windows.len()))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
