//! Adapters Layer
//!
//! Inbound adapters drive the application (HTTP API); outbound adapters
//! implement domain ports (counter stores, OCR upstream).

pub mod inbound;
pub mod outbound;
