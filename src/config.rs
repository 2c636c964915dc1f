//! Gateway configuration, loaded from `OCR_GATEWAY_*` environment
//! variables and validated once at startup.

use crate::domain::services::DEFAULT_TRUSTED_HEADERS;
use crate::infrastructure::{
    CacheConfig, CircuitBreakerConfig, RateLimitConfig, RetryConfig, TierPolicy,
};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const PREFIX: &str = "OCR_GATEWAY_";

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("missing required setting {0}")]
    Missing(String),

    #[error("invalid value {value:?} for {key}: {reason}")]
    Invalid {
        key: String,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub listen_addr: String,

    // Upstream OCR service
    pub upstream_url: String,
    pub upstream_api_key: Option<String>,
    pub upstream_timeout: Duration,

    // Resilience
    pub retry: RetryConfig,
    pub breaker: CircuitBreakerConfig,

    // Response cache
    pub cache: CacheConfig,
    pub cache_sweep_interval: Duration,

    // Admission control
    pub rate_limits: RateLimitConfig,
    pub rate_limit_purge_interval: Duration,
    pub trusted_ip_headers: Vec<String>,
    pub redis_url: Option<String>,

    pub metrics_summary_interval: Duration,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:8080".to_string(),
            upstream_url: "http://127.0.0.1:8000".to_string(),
            upstream_api_key: None,
            upstream_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            cache: CacheConfig::default(),
            cache_sweep_interval: Duration::from_secs(30 * 60),
            rate_limits: RateLimitConfig::default(),
            rate_limit_purge_interval: Duration::from_secs(5 * 60),
            trusted_ip_headers: DEFAULT_TRUSTED_HEADERS
                .iter()
                .map(|h| h.to_string())
                .collect(),
            redis_url: None,
            metrics_summary_interval: Duration::from_secs(10 * 60),
            debug: false,
        }
    }
}

impl Config {
    /// Reject settings the gateway cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.upstream_url.starts_with("http://") || self.upstream_url.starts_with("https://"))
        {
            return Err(invalid(
                "UPSTREAM_URL",
                &self.upstream_url,
                "must be an http(s) URL",
            ));
        }
        if self.upstream_timeout.is_zero() {
            return Err(invalid("UPSTREAM_TIMEOUT_MS", "0", "must be positive"));
        }

        if self.retry.max_attempts == 0 {
            return Err(invalid("RETRY_MAX_ATTEMPTS", "0", "must be at least 1"));
        }
        if self.retry.multiplier.is_nan() || self.retry.multiplier < 1.0 {
            return Err(invalid(
                "RETRY_MULTIPLIER",
                &self.retry.multiplier.to_string(),
                "must be at least 1.0",
            ));
        }
        if self.retry.base_delay > self.retry.max_delay {
            return Err(invalid(
                "RETRY_BASE_DELAY_MS",
                &self.retry.base_delay.as_millis().to_string(),
                "must not exceed RETRY_MAX_DELAY_MS",
            ));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(invalid("BREAKER_FAILURE_THRESHOLD", "0", "must be at least 1"));
        }
        if self.breaker.half_open_success_threshold == 0 {
            return Err(invalid("BREAKER_HALF_OPEN_SUCCESSES", "0", "must be at least 1"));
        }

        for (key, policy) in [
            ("RATE_LIMIT_API", self.rate_limits.api),
            ("RATE_LIMIT_MARKING", self.rate_limits.marking),
            ("RATE_LIMIT_UPLOAD", self.rate_limits.upload),
            ("RATE_LIMIT_WAITLIST", self.rate_limits.waitlist),
        ] {
            if policy.limit == 0 || policy.window.is_zero() {
                return Err(invalid(
                    key,
                    &format!("{}/{}", policy.limit, policy.window_ms()),
                    "limit and window must be positive",
                ));
            }
        }

        if self.cache.default_ttl.is_zero() {
            return Err(invalid("CACHE_TTL_SECS", "0", "must be positive"));
        }
        for (key, interval) in [
            ("CACHE_SWEEP_SECS", self.cache_sweep_interval),
            ("RATE_LIMIT_PURGE_SECS", self.rate_limit_purge_interval),
            ("METRICS_SUMMARY_SECS", self.metrics_summary_interval),
        ] {
            if interval.is_zero() {
                return Err(invalid(key, "0", "must be positive"));
            }
        }
        Ok(())
    }
}

fn invalid(key: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        key: format!("{}{}", PREFIX, key),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Load configuration from the process environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(|key| std::env::var(key).ok())
}

/// Load configuration through `lookup`, which maps a full variable name
/// to its value.
pub fn load_config_from<F>(lookup: F) -> Result<Config, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let env = Env { lookup };
    let defaults = Config::default();

    let upstream_url = env
        .string("UPSTREAM_URL")
        .ok_or_else(|| ConfigError::Missing(format!("{}UPSTREAM_URL", PREFIX)))?;

    let retry = RetryConfig {
        max_attempts: env.parse("RETRY_MAX_ATTEMPTS", defaults.retry.max_attempts)?,
        base_delay: env.millis("RETRY_BASE_DELAY_MS", defaults.retry.base_delay)?,
        max_delay: env.millis("RETRY_MAX_DELAY_MS", defaults.retry.max_delay)?,
        multiplier: env.parse("RETRY_MULTIPLIER", defaults.retry.multiplier)?,
        jitter: defaults.retry.jitter,
    };

    let breaker = CircuitBreakerConfig {
        failure_threshold: env.parse(
            "BREAKER_FAILURE_THRESHOLD",
            defaults.breaker.failure_threshold,
        )?,
        cooldown: env.millis("BREAKER_COOLDOWN_MS", defaults.breaker.cooldown)?,
        half_open_success_threshold: env.parse(
            "BREAKER_HALF_OPEN_SUCCESSES",
            defaults.breaker.half_open_success_threshold,
        )?,
    };

    let cache = CacheConfig {
        default_ttl: env.secs("CACHE_TTL_SECS", defaults.cache.default_ttl)?,
        max_entries: env.parse("CACHE_MAX_ENTRIES", defaults.cache.max_entries)?,
    };

    let rate_limits = RateLimitConfig {
        api: env.tier("RATE_LIMIT_API", defaults.rate_limits.api)?,
        marking: env.tier("RATE_LIMIT_MARKING", defaults.rate_limits.marking)?,
        upload: env.tier("RATE_LIMIT_UPLOAD", defaults.rate_limits.upload)?,
        waitlist: env.tier("RATE_LIMIT_WAITLIST", defaults.rate_limits.waitlist)?,
    };

    let trusted_ip_headers = env
        .string("TRUSTED_IP_HEADERS")
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or(defaults.trusted_ip_headers);

    let cfg = Config {
        listen_addr: env.string("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
        upstream_url: upstream_url.trim_end_matches('/').to_string(),
        upstream_api_key: env.string("UPSTREAM_API_KEY"),
        upstream_timeout: env.millis("UPSTREAM_TIMEOUT_MS", defaults.upstream_timeout)?,
        retry,
        breaker,
        cache,
        cache_sweep_interval: env.secs("CACHE_SWEEP_SECS", defaults.cache_sweep_interval)?,
        rate_limits,
        rate_limit_purge_interval: env.secs(
            "RATE_LIMIT_PURGE_SECS",
            defaults.rate_limit_purge_interval,
        )?,
        trusted_ip_headers,
        redis_url: env.string("REDIS_URL"),
        metrics_summary_interval: env.secs(
            "METRICS_SUMMARY_SECS",
            defaults.metrics_summary_interval,
        )?,
        debug: (env.lookup)("DEBUG").is_some(),
    };

    cfg.validate()?;
    Ok(cfg)
}

struct Env<F> {
    lookup: F,
}

impl<F> Env<F>
where
    F: Fn(&str) -> Option<String>,
{
    /// Non-empty, trimmed value of `OCR_GATEWAY_<key>`.
    fn string(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{}{}", PREFIX, key))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn parse<T>(&self, key: &str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.string(key) {
            Some(raw) => raw
                .parse()
                .map_err(|e: T::Err| invalid(key, &raw, &e.to_string())),
            None => Ok(default),
        }
    }

    fn millis(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_millis() as u64)
            .map(Duration::from_millis)
    }

    fn secs(&self, key: &str, default: Duration) -> Result<Duration, ConfigError> {
        self.parse(key, default.as_secs()).map(Duration::from_secs)
    }

    /// `limit/window_ms`, e.g. `5/60000`.
    fn tier(&self, key: &str, default: TierPolicy) -> Result<TierPolicy, ConfigError> {
        let Some(raw) = self.string(key) else {
            return Ok(default);
        };
        let (limit, window) = raw
            .split_once('/')
            .ok_or_else(|| invalid(key, &raw, "expected limit/window_ms"))?;
        let limit: u32 = limit
            .trim()
            .parse()
            .map_err(|_| invalid(key, &raw, "limit is not a number"))?;
        let window_ms: u64 = window
            .trim()
            .parse()
            .map_err(|_| invalid(key, &raw, "window_ms is not a number"))?;
        Ok(TierPolicy {
            limit,
            window: Duration::from_millis(window_ms),
        })
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        load_config_from(|key| vars.get(key).cloned())
    }

    const UPSTREAM: (&str, &str) = ("OCR_GATEWAY_UPSTREAM_URL", "http://ocr.internal:8000/");

    #[test]
    fn test_defaults() {
        let cfg = load(&[UPSTREAM]).unwrap();
        assert_eq!(cfg.listen_addr, "0.0.0.0:8080");
        assert_eq!(cfg.upstream_url, "http://ocr.internal:8000");
        assert_eq!(cfg.upstream_timeout, Duration::from_secs(30));
        assert_eq!(cfg.retry.max_attempts, 2);
        assert_eq!(cfg.breaker.failure_threshold, 3);
        assert_eq!(cfg.breaker.cooldown, Duration::from_secs(30));
        assert_eq!(cfg.cache.default_ttl, Duration::from_secs(86_400));
        assert_eq!(cfg.cache.max_entries, 1000);
        assert_eq!(cfg.rate_limits.upload, TierPolicy::per_minute(5));
        assert_eq!(cfg.rate_limits.waitlist, TierPolicy::per_hour(5));
        assert_eq!(cfg.trusted_ip_headers.len(), 3);
        assert!(cfg.redis_url.is_none());
        assert!(!cfg.debug);
    }

    #[test]
    fn test_missing_upstream() {
        assert_eq!(
            load(&[]).unwrap_err(),
            ConfigError::Missing("OCR_GATEWAY_UPSTREAM_URL".into())
        );
    }

    #[test]
    fn test_overrides() {
        let cfg = load(&[
            UPSTREAM,
            ("OCR_GATEWAY_LISTEN_ADDR", "127.0.0.1:9000"),
            ("OCR_GATEWAY_UPSTREAM_API_KEY", "secret"),
            ("OCR_GATEWAY_RETRY_MAX_ATTEMPTS", "4"),
            ("OCR_GATEWAY_RETRY_MULTIPLIER", "2.0"),
            ("OCR_GATEWAY_BREAKER_COOLDOWN_MS", "5000"),
            ("OCR_GATEWAY_RATE_LIMIT_UPLOAD", "20/1000"),
            ("OCR_GATEWAY_TRUSTED_IP_HEADERS", "X-Real-IP"),
            ("OCR_GATEWAY_REDIS_URL", "redis://cache:6379"),
            ("DEBUG", "1"),
        ])
        .unwrap();
        assert_eq!(cfg.listen_addr, "127.0.0.1:9000");
        assert_eq!(cfg.upstream_api_key.as_deref(), Some("secret"));
        assert_eq!(cfg.retry.max_attempts, 4);
        assert_eq!(cfg.retry.multiplier, 2.0);
        assert_eq!(cfg.breaker.cooldown, Duration::from_secs(5));
        assert_eq!(cfg.rate_limits.upload.limit, 20);
        assert_eq!(cfg.rate_limits.upload.window, Duration::from_secs(1));
        assert_eq!(cfg.trusted_ip_headers, vec!["x-real-ip"]);
        assert_eq!(cfg.redis_url.as_deref(), Some("redis://cache:6379"));
        assert!(cfg.debug);
    }

    #[test]
    fn test_rejects_unparseable_values() {
        let err = load(&[UPSTREAM, ("OCR_GATEWAY_RETRY_MAX_ATTEMPTS", "many")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref key, .. } if key == "OCR_GATEWAY_RETRY_MAX_ATTEMPTS"));

        let err = load(&[UPSTREAM, ("OCR_GATEWAY_RATE_LIMIT_API", "60")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_rejects_zero_limits_and_thresholds() {
        for (key, value) in [
            ("OCR_GATEWAY_RATE_LIMIT_MARKING", "0/60000"),
            ("OCR_GATEWAY_RATE_LIMIT_WAITLIST", "5/0"),
            ("OCR_GATEWAY_BREAKER_FAILURE_THRESHOLD", "0"),
            ("OCR_GATEWAY_BREAKER_HALF_OPEN_SUCCESSES", "0"),
            ("OCR_GATEWAY_RETRY_MAX_ATTEMPTS", "0"),
            ("OCR_GATEWAY_UPSTREAM_TIMEOUT_MS", "0"),
            ("OCR_GATEWAY_CACHE_SWEEP_SECS", "0"),
        ] {
            let err = load(&[UPSTREAM, (key, value)]).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { key: ref k, .. } if k == key),
                "{} accepted {}",
                key,
                value
            );
        }
    }

    #[test]
    fn test_rejects_inconsistent_retry() {
        let err = load(&[
            UPSTREAM,
            ("OCR_GATEWAY_RETRY_BASE_DELAY_MS", "9000"),
            ("OCR_GATEWAY_RETRY_MAX_DELAY_MS", "1000"),
        ])
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));

        let err = load(&[UPSTREAM, ("OCR_GATEWAY_RETRY_MULTIPLIER", "0.5")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_rejects_non_http_upstream() {
        let err = load(&[("OCR_GATEWAY_UPSTREAM_URL", "ftp://ocr")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }
}
