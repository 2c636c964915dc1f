//! Application Layer
//!
//! Use cases orchestrating domain services and infrastructure.

mod ocr_service;

pub use ocr_service::OcrService;
