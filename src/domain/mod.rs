//! Domain Layer
//!
//! Entities, value objects, errors, pure services and the outbound ports
//! the resilience layer talks through.

pub mod entities;
pub mod errors;
pub mod ports;
pub mod services;
pub mod value_objects;

pub use errors::GatewayError;
