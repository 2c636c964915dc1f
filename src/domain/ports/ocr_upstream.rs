//! OCR Upstream Port
//!
//! Defines the interface to the external text-recognition service.

use crate::domain::entities::{OcrRequest, OcrResult};
use crate::domain::errors::GatewayError;
use async_trait::async_trait;

/// The remote OCR service.
///
/// This is an outbound port. The service is slow and unreliable; callers
/// wrap it in timeouts, retries and a circuit breaker. Implementations
/// classify failures: client errors as `InvalidInput`, server and
/// transport errors as `Upstream`.
#[async_trait]
pub trait OcrUpstream: Send + Sync {
    /// Recognise the text in one image.
    async fn recognize(&self, request: &OcrRequest) -> Result<OcrResult, GatewayError>;

    /// Probe the service's health endpoint.
    async fn health(&self) -> bool;
}
