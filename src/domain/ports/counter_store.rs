//! Counter Store Port
//!
//! Defines the interface for atomic rate-limit window storage.

use crate::domain::entities::WindowState;
use crate::domain::errors::GatewayError;
use async_trait::async_trait;

/// Storage for fixed-window rate-limit counters.
///
/// This is an outbound port. Implementations must perform the
/// read-check-increment of [`try_acquire`](CounterStore::try_acquire) as a
/// single atomic step per key, so concurrent callers never admit more
/// than `limit` requests in one window. An in-process map is enough for a
/// single instance; an external store shares counters across replicas.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Try to admit one request for `key`.
    ///
    /// Starts a fresh window when none exists or the current one has
    /// elapsed. Rejected attempts do not increment the count.
    async fn try_acquire(
        &self,
        key: &str,
        limit: u32,
        window_ms: u64,
        now_ms: u64,
    ) -> Result<WindowState, GatewayError>;

    /// Drop windows that have elapsed. Returns how many were removed.
    async fn purge_expired(&self, now_ms: u64) -> Result<usize, GatewayError>;

    /// Store name for logs and health output.
    fn name(&self) -> &'static str;
}
