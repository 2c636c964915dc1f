//! Value Objects - Immutable domain primitives
//!
//! Value objects are identified by their value rather than identity.
//! They are immutable and can be freely shared.

use serde::{Deserialize, Serialize};

/// Route class with its own admission budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateLimitTier {
    /// General API traffic
    Api,
    /// AI marking requests
    Marking,
    /// Image uploads sent to OCR
    Upload,
    /// Waitlist sign-ups
    Waitlist,
}

impl RateLimitTier {
    pub const ALL: [RateLimitTier; 4] = [
        RateLimitTier::Api,
        RateLimitTier::Marking,
        RateLimitTier::Upload,
        RateLimitTier::Waitlist,
    ];

    /// Parse a tier name; unknown names fall back to `Api`.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "marking" => Self::Marking,
            "upload" => Self::Upload,
            "waitlist" => Self::Waitlist,
            _ => Self::Api,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Api => "api",
            Self::Marking => "marking",
            Self::Upload => "upload",
            Self::Waitlist => "waitlist",
        }
    }
}

impl Default for RateLimitTier {
    fn default() -> Self {
        Self::Api
    }
}

impl std::fmt::Display for RateLimitTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Anonymous client identity used as the rate-limit key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientId(String);

impl ClientId {
    /// Marker used when no trusted header carries an address.
    pub const UNKNOWN: &'static str = "unknown";

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn unknown() -> Self {
        Self(Self::UNKNOWN.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_unknown(&self) -> bool {
        self.0 == Self::UNKNOWN
    }
}

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    /// Normal operation - calls pass through
    Closed,
    /// Tripped - calls rejected without reaching the upstream
    Open,
    /// Probing recovery - a single trial call is allowed
    HalfOpen,
}

impl Default for CircuitState {
    fn default() -> Self {
        CircuitState::Closed
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_tier_from_str() {
        assert_eq!(RateLimitTier::from_str("marking"), RateLimitTier::Marking);
        assert_eq!(RateLimitTier::from_str("UPLOAD"), RateLimitTier::Upload);
        assert_eq!(RateLimitTier::from_str("waitlist"), RateLimitTier::Waitlist);
        assert_eq!(RateLimitTier::from_str("whatever"), RateLimitTier::Api);
    }

    #[test]
    fn test_tier_round_trip_names() {
        for tier in RateLimitTier::ALL {
            assert_eq!(RateLimitTier::from_str(tier.as_str()), tier);
        }
        assert_eq!(RateLimitTier::default(), RateLimitTier::Api);
        assert_eq!(RateLimitTier::Upload.to_string(), "upload");
    }

    #[test]
    fn test_client_id() {
        let id = ClientId::new("203.0.113.9");
        assert_eq!(id.as_str(), "203.0.113.9");
        assert!(!id.is_unknown());
        assert!(ClientId::unknown().is_unknown());
    }

    #[test]
    fn test_circuit_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half-open");
        assert_eq!(CircuitState::default(), CircuitState::Closed);
    }

    #[test]
    fn test_circuit_state_serializes_like_display() {
        for state in [CircuitState::Closed, CircuitState::Open, CircuitState::HalfOpen] {
            assert_eq!(serde_json::to_value(state).unwrap(), state.to_string());
        }
        assert_eq!(
            serde_json::to_string(&CircuitState::HalfOpen).unwrap(),
            "\"half-open\""
        );
    }
}
