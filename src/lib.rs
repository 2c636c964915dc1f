//! ocr-gateway Library
//!
//! Admission control and resilience layer in front of an OCR service,
//! exposed as a library for integration tests and embedding.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod infrastructure;

// Re-export commonly used types
pub use application::OcrService;
pub use config::{load_config, Config, ConfigError};
pub use domain::entities::{OcrOutcome, OcrRequest, OcrResult, RateLimitDecision};
pub use domain::errors::GatewayError;
pub use domain::ports::{Clock, CounterStore, OcrUpstream};
pub use domain::value_objects::{CircuitState, ClientId, RateLimitTier};
