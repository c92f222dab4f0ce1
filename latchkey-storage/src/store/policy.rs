//! Write and expiry policies accepted by a key-value store.

use latchkey_core::PolicyError;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// SET POLICY
// ============================================================================

/// How a `set` interacts with an existing key and its TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SetPolicy {
    /// Unconditional write; clears any TTL.
    Plain,
    /// Unconditional write with a fresh TTL (required).
    WithTtl,
    /// Unconditional write that preserves the current TTL.
    KeepTtl,
    /// Write only if the key exists (`XX`).
    IfExists,
    /// Write only if the key is absent (`NX`).
    IfNotExists,
}

impl SetPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetPolicy::Plain => "plain",
            SetPolicy::WithTtl => "with-ttl",
            SetPolicy::KeepTtl => "keep-ttl",
            SetPolicy::IfExists => "if-exists",
            SetPolicy::IfNotExists => "if-not-exists",
        }
    }
}

impl fmt::Display for SetPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SetPolicy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "plain" => Ok(SetPolicy::Plain),
            "with-ttl" => Ok(SetPolicy::WithTtl),
            "keep-ttl" => Ok(SetPolicy::KeepTtl),
            "if-exists" | "xx" => Ok(SetPolicy::IfExists),
            "if-not-exists" | "nx" => Ok(SetPolicy::IfNotExists),
            _ => Err(PolicyError::UnknownSetPolicy(s.to_string())),
        }
    }
}

/// Policy plus optional TTL for a `set` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetOptions {
    pub policy: SetPolicy,
    pub ttl_secs: Option<u64>,
}

impl SetOptions {
    pub fn plain() -> Self {
        Self {
            policy: SetPolicy::Plain,
            ttl_secs: None,
        }
    }

    pub fn with_ttl(ttl_secs: u64) -> Self {
        Self {
            policy: SetPolicy::WithTtl,
            ttl_secs: Some(ttl_secs),
        }
    }

    pub fn keep_ttl() -> Self {
        Self {
            policy: SetPolicy::KeepTtl,
            ttl_secs: None,
        }
    }

    pub fn if_exists(ttl_secs: Option<u64>) -> Self {
        Self {
            policy: SetPolicy::IfExists,
            ttl_secs,
        }
    }

    pub fn if_not_exists(ttl_secs: Option<u64>) -> Self {
        Self {
            policy: SetPolicy::IfNotExists,
            ttl_secs,
        }
    }

    /// Reject combinations no backend can honour.
    pub fn validate(&self) -> Result<(), PolicyError> {
        match (self.policy, self.ttl_secs) {
            (SetPolicy::WithTtl, None) => Err(PolicyError::TtlRequired {
                policy: SetPolicy::WithTtl.as_str(),
            }),
            (SetPolicy::KeepTtl | SetPolicy::Plain, Some(_)) => {
                Err(PolicyError::InvalidArgument {
                    field: "ttl_secs".to_string(),
                    reason: format!("not accepted by set policy {}", self.policy),
                })
            }
            (_, Some(0)) => Err(PolicyError::InvalidArgument {
                field: "ttl_secs".to_string(),
                reason: "must be positive".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

impl Default for SetOptions {
    fn default() -> Self {
        Self::plain()
    }
}

// ============================================================================
// EXPIRE POLICY
// ============================================================================

/// Condition under which `expire` applies a TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpirePolicy {
    Always,
    /// Only when the key has no expiry (`NX`).
    IfNoExpiry,
    /// Only when the key already has an expiry (`XX`).
    IfHasExpiry,
    /// Only when the new TTL is greater than the current one (`GT`).
    IfGreater,
    /// Only when the new TTL is less than the current one (`LT`).
    IfLess,
}

impl ExpirePolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpirePolicy::Always => "always",
            ExpirePolicy::IfNoExpiry => "nx",
            ExpirePolicy::IfHasExpiry => "xx",
            ExpirePolicy::IfGreater => "gt",
            ExpirePolicy::IfLess => "lt",
        }
    }

    /// Whether a TTL of `new_secs` should replace `current`.
    pub fn permits(&self, current: TtlStatus, new_secs: u64) -> bool {
        match (self, current) {
            (_, TtlStatus::Missing) => false,
            (ExpirePolicy::Always, _) => true,
            (ExpirePolicy::IfNoExpiry, TtlStatus::Persistent) => true,
            (ExpirePolicy::IfNoExpiry, TtlStatus::Expires(_)) => false,
            (ExpirePolicy::IfHasExpiry, TtlStatus::Persistent) => false,
            (ExpirePolicy::IfHasExpiry, TtlStatus::Expires(_)) => true,
            // A persistent key counts as infinite TTL.
            (ExpirePolicy::IfGreater, TtlStatus::Persistent) => false,
            (ExpirePolicy::IfGreater, TtlStatus::Expires(secs)) => new_secs > secs,
            (ExpirePolicy::IfLess, TtlStatus::Persistent) => true,
            (ExpirePolicy::IfLess, TtlStatus::Expires(secs)) => new_secs < secs,
        }
    }
}

impl fmt::Display for ExpirePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExpirePolicy {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "always" | "" => Ok(ExpirePolicy::Always),
            "nx" => Ok(ExpirePolicy::IfNoExpiry),
            "xx" => Ok(ExpirePolicy::IfHasExpiry),
            "gt" => Ok(ExpirePolicy::IfGreater),
            "lt" => Ok(ExpirePolicy::IfLess),
            _ => Err(PolicyError::UnknownExpirePolicy(s.to_string())),
        }
    }
}

/// Policy plus TTL for an `expire` call or an expiry attached to an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpireOptions {
    pub policy: ExpirePolicy,
    pub ttl_secs: u64,
}

impl ExpireOptions {
    pub fn always(ttl_secs: u64) -> Self {
        Self {
            policy: ExpirePolicy::Always,
            ttl_secs,
        }
    }

    pub fn if_no_expiry(ttl_secs: u64) -> Self {
        Self {
            policy: ExpirePolicy::IfNoExpiry,
            ttl_secs,
        }
    }
}

// ============================================================================
// TTL STATUS
// ============================================================================

/// Remaining lifetime of a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtlStatus {
    /// Key does not exist.
    Missing,
    /// Key exists without an expiry.
    Persistent,
    /// Key expires in this many seconds.
    Expires(u64),
}

impl TtlStatus {
    /// Redis numeric encoding: -2 missing, -1 persistent, else seconds.
    pub fn as_redis(&self) -> i64 {
        match self {
            TtlStatus::Missing => -2,
            TtlStatus::Persistent => -1,
            TtlStatus::Expires(secs) => *secs as i64,
        }
    }

    pub fn from_redis(value: i64) -> Self {
        match value {
            -2 => TtlStatus::Missing,
            v if v < 0 => TtlStatus::Persistent,
            v => TtlStatus::Expires(v as u64),
        }
    }

    pub fn exists(&self) -> bool {
        !matches!(self, TtlStatus::Missing)
    }
}
