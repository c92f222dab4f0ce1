//! Constants for latchkey
//!
//! Defaults shared by the config layer and the components themselves.

// ============================================================================
// PAGINATED CACHE
// ============================================================================

/// Namespace prefix for every paginated cache key.
pub const DEFAULT_CACHE_KEY_PREFIX: &str = "paginated-cache";

/// Default TTL for a cached page (30 minutes).
pub const DEFAULT_PAGE_TTL_SECS: u64 = 60 * 30;

/// Default TTL for a dataset version counter (24 hours).
pub const DEFAULT_VERSION_TTL_SECS: u64 = 60 * 60 * 24;

/// Default page size used when a caller does not pass one.
pub const DEFAULT_PAGE_LIMIT: u64 = 10;

// ============================================================================
// LOCKING
// ============================================================================

/// Default lease before a held lock is force-released (15 seconds).
pub const DEFAULT_LOCK_TTL_MS: u64 = 15_000;

// ============================================================================
// RETRY
// ============================================================================

/// Default number of attempts for a retried task.
pub const DEFAULT_RETRY_ATTEMPTS: u32 = 3;

/// Default delay between attempts.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 500;

// ============================================================================
// TELEMETRY
// ============================================================================

/// Default tracing filter directive.
pub const DEFAULT_LOG_FILTER: &str = "latchkey=info,info";
