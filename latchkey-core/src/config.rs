//! Configuration types
//!
//! Configuration is loaded from `LATCHKEY_*` environment variables with
//! defaults matching the component defaults. Unparseable values fall back
//! to the default; `validate()` rejects values no component can honour.

use crate::constants::*;
use crate::{ConfigError, LatchkeyResult};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

// ============================================================================
// CACHE
// ============================================================================

/// Versioned page cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Namespace prefix for every cache key.
    pub key_prefix: String,
    /// TTL of a cached page, in seconds.
    pub entry_ttl_secs: u64,
    /// TTL of a dataset version counter, in seconds.
    pub version_ttl_secs: u64,
    pub default_limit: u64,
    pub default_offset: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            key_prefix: DEFAULT_CACHE_KEY_PREFIX.to_string(),
            entry_ttl_secs: DEFAULT_PAGE_TTL_SECS,
            version_ttl_secs: DEFAULT_VERSION_TTL_SECS,
            default_limit: DEFAULT_PAGE_LIMIT,
            default_offset: 0,
        }
    }
}

impl CacheConfig {
    /// Set the key prefix.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the page TTL.
    pub fn with_entry_ttl(mut self, secs: u64) -> Self {
        self.entry_ttl_secs = secs;
        self
    }

    /// Set the version counter TTL.
    pub fn with_version_ttl(mut self, secs: u64) -> Self {
        self.version_ttl_secs = secs;
        self
    }
}

// ============================================================================
// LOCK
// ============================================================================

/// Key locker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// Lease after which a held lock is force-released.
    pub lease_ttl: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            lease_ttl: Duration::from_millis(DEFAULT_LOCK_TTL_MS),
        }
    }
}

// ============================================================================
// RETRY
// ============================================================================

/// Retry executor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub interval: Duration,
    /// Surface exhaustion as a failed `OperationResult` instead of an error.
    pub return_result_object: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_RETRY_ATTEMPTS,
            interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
            return_result_object: false,
        }
    }
}

impl RetryConfig {
    pub fn new(max_attempts: u32, interval: Duration) -> Self {
        Self {
            max_attempts,
            interval,
            return_result_object: false,
        }
    }

    /// Report exhaustion as a value rather than an error.
    pub fn returning_result_object(mut self) -> Self {
        self.return_result_object = true;
        self
    }
}

// ============================================================================
// TELEMETRY
// ============================================================================

/// Tracing subscriber settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub log_filter: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_filter: DEFAULT_LOG_FILTER.to_string(),
            json: false,
        }
    }
}

// ============================================================================
// MASTER CONFIG
// ============================================================================

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LatchkeyConfig {
    pub cache: CacheConfig,
    pub lock: LockConfig,
    pub retry: RetryConfig,
    pub telemetry: TelemetryConfig,
}

impl LatchkeyConfig {
    /// Create LatchkeyConfig from environment variables.
    ///
    /// Environment variables:
    /// - `LATCHKEY_CACHE_KEY_PREFIX`: Cache key namespace (default: "paginated-cache")
    /// - `LATCHKEY_CACHE_ENTRY_TTL_SECS`: Page TTL (default: 1800)
    /// - `LATCHKEY_CACHE_VERSION_TTL_SECS`: Version counter TTL (default: 86400)
    /// - `LATCHKEY_CACHE_DEFAULT_LIMIT`: Page size when unspecified (default: 10)
    /// - `LATCHKEY_LOCK_TTL_MS`: Lock lease (default: 15000)
    /// - `LATCHKEY_RETRY_MAX_ATTEMPTS`: Attempts per retried task (default: 3)
    /// - `LATCHKEY_RETRY_INTERVAL_MS`: Delay between attempts (default: 500)
    /// - `LATCHKEY_RETRY_RETURN_RESULT`: "true" to report exhaustion as a value (default: false)
    /// - `LATCHKEY_LOG_FILTER`: Tracing filter (default: "latchkey=info,info")
    /// - `LATCHKEY_LOG_JSON`: "true" for JSON log lines (default: false)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let cache = CacheConfig {
            key_prefix: lookup("LATCHKEY_CACHE_KEY_PREFIX")
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.cache.key_prefix),
            entry_ttl_secs: parse_or(
                &lookup,
                "LATCHKEY_CACHE_ENTRY_TTL_SECS",
                defaults.cache.entry_ttl_secs,
            ),
            version_ttl_secs: parse_or(
                &lookup,
                "LATCHKEY_CACHE_VERSION_TTL_SECS",
                defaults.cache.version_ttl_secs,
            ),
            default_limit: parse_or(
                &lookup,
                "LATCHKEY_CACHE_DEFAULT_LIMIT",
                defaults.cache.default_limit,
            ),
            default_offset: defaults.cache.default_offset,
        };

        let lock = LockConfig {
            lease_ttl: Duration::from_millis(parse_or(
                &lookup,
                "LATCHKEY_LOCK_TTL_MS",
                DEFAULT_LOCK_TTL_MS,
            )),
        };

        let retry = RetryConfig {
            max_attempts: parse_or(
                &lookup,
                "LATCHKEY_RETRY_MAX_ATTEMPTS",
                defaults.retry.max_attempts,
            ),
            interval: Duration::from_millis(parse_or(
                &lookup,
                "LATCHKEY_RETRY_INTERVAL_MS",
                DEFAULT_RETRY_INTERVAL_MS,
            )),
            return_result_object: lookup("LATCHKEY_RETRY_RETURN_RESULT")
                .map(|s| s.to_lowercase() == "true" || s == "1")
                .unwrap_or(false),
        };

        let telemetry = TelemetryConfig {
            log_filter: lookup("LATCHKEY_LOG_FILTER").unwrap_or(defaults.telemetry.log_filter),
            json: lookup("LATCHKEY_LOG_JSON")
                .map(|s| s.to_lowercase() == "true" || s == "1")
                .unwrap_or(false),
        };

        Self {
            cache,
            lock,
            retry,
            telemetry,
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - cache key prefix is non-empty
    /// - all TTLs and the lock lease are positive
    /// - retry attempts > 0
    pub fn validate(&self) -> LatchkeyResult<()> {
        if self.cache.key_prefix.trim().is_empty() {
            return Err(invalid("cache.key_prefix", "", "must not be empty"));
        }
        if self.cache.entry_ttl_secs == 0 {
            return Err(invalid("cache.entry_ttl_secs", "0", "must be positive"));
        }
        if self.cache.version_ttl_secs == 0 {
            return Err(invalid("cache.version_ttl_secs", "0", "must be positive"));
        }
        if self.lock.lease_ttl.is_zero() {
            return Err(invalid("lock.lease_ttl", "0ms", "must be positive"));
        }
        if self.retry.max_attempts == 0 {
            return Err(invalid("retry.max_attempts", "0", "must be at least 1"));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup(name)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn invalid(field: &str, value: &str, reason: &str) -> crate::LatchkeyError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
    .into()
}
