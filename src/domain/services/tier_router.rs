//! Tier Router Service
//!
//! Pure domain logic mapping request paths to rate-limit tiers.

use crate::domain::value_objects::RateLimitTier;

/// Paths that bypass admission control entirely.
///
/// Payment webhooks must never be throttled and the auth provider
/// applies its own limits.
const SKIP_PREFIXES: [&str; 2] = ["/api/stripe/webhook", "/api/auth/"];

/// Maps a request path to the tier that rations it.
///
/// Returns `None` for paths outside the API surface and for skipped
/// routes. Matching is by prefix, most specific first.
pub struct TierRouter;

impl TierRouter {
    pub fn resolve(path: &str) -> Option<RateLimitTier> {
        if !path.starts_with("/api/") {
            return None;
        }
        if SKIP_PREFIXES.iter().any(|p| path.starts_with(p)) {
            return None;
        }

        let tier = if path.starts_with("/api/mark") {
            RateLimitTier::Marking
        } else if path.starts_with("/api/ocr") {
            RateLimitTier::Upload
        } else if path.starts_with("/api/waitlist") {
            RateLimitTier::Waitlist
        } else {
            RateLimitTier::Api
        };
        Some(tier)
    }

    pub fn is_skipped(path: &str) -> bool {
        SKIP_PREFIXES.iter().any(|p| path.starts_with(p))
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn test_marking_routes() {
        assert_eq!(TierRouter::resolve("/api/mark"), Some(RateLimitTier::Marking));
        assert_eq!(
            TierRouter::resolve("/api/mark/batch"),
            Some(RateLimitTier::Marking)
        );
    }

    #[test]
    fn test_ocr_routes_use_upload_tier() {
        assert_eq!(TierRouter::resolve("/api/ocr"), Some(RateLimitTier::Upload));
    }

    #[test]
    fn test_waitlist_route() {
        assert_eq!(
            TierRouter::resolve("/api/waitlist"),
            Some(RateLimitTier::Waitlist)
        );
    }

    #[test]
    fn test_default_api_tier() {
        assert_eq!(TierRouter::resolve("/api/answers/42"), Some(RateLimitTier::Api));
        assert_eq!(TierRouter::resolve("/api/dashboard"), Some(RateLimitTier::Api));
    }

    #[test]
    fn test_skipped_routes() {
        assert_eq!(TierRouter::resolve("/api/stripe/webhook"), None);
        assert_eq!(TierRouter::resolve("/api/auth/callback"), None);
        assert!(TierRouter::is_skipped("/api/auth/session"));
        assert!(!TierRouter::is_skipped("/api/ocr"));
    }

    #[test]
    fn test_non_api_paths_are_not_limited() {
        assert_eq!(TierRouter::resolve("/health"), None);
        assert_eq!(TierRouter::resolve("/metrics"), None);
        assert_eq!(TierRouter::resolve("/"), None);
    }
}
