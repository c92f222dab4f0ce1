//! Atomic script catalogue.
//!
//! Every script takes the target key as its only key argument and its
//! numeric arguments as strings. Remote backends run the Lua source; the
//! in-memory backend interprets the script under its own lock. Either way a
//! script is indivisible with respect to other clients of the same store.

use latchkey_core::{LatchkeyError, LatchkeyResult, PolicyError, StoreError};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// LUA SOURCES
// ============================================================================

pub const INCR_BY_AND_SET_TTL_IF_ABSENT: &str = r#"
local existed = redis.call("EXISTS", KEYS[1])
local value = redis.call("INCRBY", KEYS[1], ARGV[1])
if existed == 0 then
  redis.call("EXPIRE", KEYS[1], ARGV[2])
end
return value
"#;

pub const DECR_BY_AND_SET_TTL_IF_ABSENT: &str = r#"
local existed = redis.call("EXISTS", KEYS[1])
local value = redis.call("DECRBY", KEYS[1], ARGV[1])
if existed == 0 then
  redis.call("EXPIRE", KEYS[1], ARGV[2])
end
return value
"#;

pub const INCR_BY_IF_EXISTS: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 1 then
  redis.call("INCRBY", KEYS[1], ARGV[1])
end

return redis.call("GET", KEYS[1])
"#;

pub const DECR_BY_IF_EXISTS: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 1 then
  redis.call("DECRBY", KEYS[1], ARGV[1])
end

return redis.call("GET", KEYS[1])
"#;

pub const INCR_BY_AND_ENSURE_TTL: &str = r#"
local inc = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])

redis.call("INCRBY", KEYS[1], inc)

if redis.call("TTL", KEYS[1]) == -1 then
  redis.call("EXPIRE", KEYS[1], ttl)
end

return tonumber(redis.call("GET", KEYS[1]))
"#;

pub const DECR_BY_AND_ENSURE_TTL: &str = r#"
local dec = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])

redis.call("DECRBY", KEYS[1], dec)

if redis.call("TTL", KEYS[1]) == -1 then
  redis.call("EXPIRE", KEYS[1], ttl)
end

return tonumber(redis.call("GET", KEYS[1]))
"#;

// Float replies are truncated to integers by redis, so the value travels as a bulk string.
pub const INCR_BY_FLOAT_AND_ENSURE_TTL: &str = r#"
local inc = tonumber(ARGV[1])
local ttl = tonumber(ARGV[2])

redis.call("INCRBYFLOAT", KEYS[1], inc)

if redis.call("TTL", KEYS[1]) == -1 then
  redis.call("EXPIRE", KEYS[1], ttl)
end

return redis.call("GET", KEYS[1])
"#;

pub const INCR_BY_FLOAT_AND_SET_TTL_IF_ABSENT: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 0 then
  redis.call("INCRBYFLOAT", KEYS[1], ARGV[1])
  redis.call("EXPIRE", KEYS[1], ARGV[2])
end

return redis.call("GET", KEYS[1])
"#;

pub const INCR_BY_FLOAT_IF_EXISTS: &str = r#"
if redis.call("EXISTS", KEYS[1]) == 1 then
  redis.call("INCRBYFLOAT", KEYS[1], ARGV[1])
end

return redis.call("GET", KEYS[1])
"#;

// Replies `{ttl, refreshed}` so an untouched TTL equal to the new one stays distinguishable.
pub const REFRESH_TTL_IF_BELOW_THRESHOLD: &str = r#"
local ttl = redis.call("TTL", KEYS[1])

if ttl == -2 then
  return {-2, 0}
end

local threshold = tonumber(ARGV[1])
local newTTL    = tonumber(ARGV[2])

if ttl == -1 or ttl < threshold then
  redis.call("EXPIRE", KEYS[1], newTTL)
  return {newTTL, 1}
end

return {ttl, 0}
"#;

pub const INCR_THEN_COMPARE: &str = r#"
local op  = ARGV[1]
local rhs = tonumber(ARGV[2])
if rhs == nil then
  return redis.error_reply("rhs is not numeric")
end
if op ~= "lt" and op ~= "lte" and op ~= "eq" and op ~= "gte" and op ~= "gt" then
  return redis.error_reply("unknown operator")
end

local value = redis.call("INCR", KEYS[1])

if op == "lt" then return value < rhs and 1 or 0 end
if op == "lte" then return value <= rhs and 1 or 0 end
if op == "eq" then return value == rhs and 1 or 0 end
if op == "gte" then return value >= rhs and 1 or 0 end
return value > rhs and 1 or 0
"#;

// ============================================================================
// SCRIPT CATALOGUE
// ============================================================================

/// The fixed set of atomic scripts the runner depends on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicScript {
    IncrByAndSetTtlIfAbsent,
    DecrByAndSetTtlIfAbsent,
    IncrByIfExists,
    DecrByIfExists,
    IncrByAndEnsureTtl,
    DecrByAndEnsureTtl,
    IncrByFloatAndEnsureTtl,
    IncrByFloatAndSetTtlIfAbsent,
    IncrByFloatIfExists,
    RefreshTtlIfBelowThreshold,
    IncrThenCompare,
}

impl AtomicScript {
    pub const ALL: [AtomicScript; 11] = [
        AtomicScript::IncrByAndSetTtlIfAbsent,
        AtomicScript::DecrByAndSetTtlIfAbsent,
        AtomicScript::IncrByIfExists,
        AtomicScript::DecrByIfExists,
        AtomicScript::IncrByAndEnsureTtl,
        AtomicScript::DecrByAndEnsureTtl,
        AtomicScript::IncrByFloatAndEnsureTtl,
        AtomicScript::IncrByFloatAndSetTtlIfAbsent,
        AtomicScript::IncrByFloatIfExists,
        AtomicScript::RefreshTtlIfBelowThreshold,
        AtomicScript::IncrThenCompare,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            AtomicScript::IncrByAndSetTtlIfAbsent => "incr_by_and_set_ttl_if_absent",
            AtomicScript::DecrByAndSetTtlIfAbsent => "decr_by_and_set_ttl_if_absent",
            AtomicScript::IncrByIfExists => "incr_by_if_exists",
            AtomicScript::DecrByIfExists => "decr_by_if_exists",
            AtomicScript::IncrByAndEnsureTtl => "incr_by_and_ensure_ttl",
            AtomicScript::DecrByAndEnsureTtl => "decr_by_and_ensure_ttl",
            AtomicScript::IncrByFloatAndEnsureTtl => "incr_by_float_and_ensure_ttl",
            AtomicScript::IncrByFloatAndSetTtlIfAbsent => "incr_by_float_and_set_ttl_if_absent",
            AtomicScript::IncrByFloatIfExists => "incr_by_float_if_exists",
            AtomicScript::RefreshTtlIfBelowThreshold => "refresh_ttl_if_below_threshold",
            AtomicScript::IncrThenCompare => "incr_then_compare",
        }
    }

    pub fn lua_source(&self) -> &'static str {
        match self {
            AtomicScript::IncrByAndSetTtlIfAbsent => INCR_BY_AND_SET_TTL_IF_ABSENT,
            AtomicScript::DecrByAndSetTtlIfAbsent => DECR_BY_AND_SET_TTL_IF_ABSENT,
            AtomicScript::IncrByIfExists => INCR_BY_IF_EXISTS,
            AtomicScript::DecrByIfExists => DECR_BY_IF_EXISTS,
            AtomicScript::IncrByAndEnsureTtl => INCR_BY_AND_ENSURE_TTL,
            AtomicScript::DecrByAndEnsureTtl => DECR_BY_AND_ENSURE_TTL,
            AtomicScript::IncrByFloatAndEnsureTtl => INCR_BY_FLOAT_AND_ENSURE_TTL,
            AtomicScript::IncrByFloatAndSetTtlIfAbsent => INCR_BY_FLOAT_AND_SET_TTL_IF_ABSENT,
            AtomicScript::IncrByFloatIfExists => INCR_BY_FLOAT_IF_EXISTS,
            AtomicScript::RefreshTtlIfBelowThreshold => REFRESH_TTL_IF_BELOW_THRESHOLD,
            AtomicScript::IncrThenCompare => INCR_THEN_COMPARE,
        }
    }

    /// Number of `KEYS` the script reads.
    pub fn key_count(&self) -> usize {
        1
    }

    /// Number of `ARGV` entries the script reads.
    pub fn arg_count(&self) -> usize {
        match self {
            AtomicScript::IncrByIfExists
            | AtomicScript::DecrByIfExists
            | AtomicScript::IncrByFloatIfExists => 1,
            _ => 2,
        }
    }

    /// Check a call against the script's arity contract.
    pub fn check_arity(&self, keys: &[String], args: &[String]) -> Result<(), StoreError> {
        if keys.len() != self.key_count() || args.len() != self.arg_count() {
            return Err(StoreError::ScriptArity {
                script: self.name(),
                expected_keys: self.key_count(),
                expected_args: self.arg_count(),
                got_keys: keys.len(),
                got_args: args.len(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for AtomicScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// SCRIPT REPLY
// ============================================================================

/// Raw reply of a script evaluation.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptReply {
    Nil,
    Integer(i64),
    Text(String),
    Array(Vec<ScriptReply>),
}

impl ScriptReply {
    /// Interpret the reply as an optional integer (`Nil` → `None`).
    pub fn into_integer(self, script: AtomicScript) -> LatchkeyResult<Option<i64>> {
        match self {
            ScriptReply::Nil => Ok(None),
            ScriptReply::Integer(v) => Ok(Some(v)),
            ScriptReply::Text(s) => s.trim().parse::<i64>().map(Some).map_err(|_| {
                StoreError::ScriptArgument {
                    script: script.name(),
                    reason: format!("reply {:?} is not an integer", s),
                }
                .into()
            }),
            ScriptReply::Array(items) => Err(not_scalar(script, &items)),
        }
    }

    /// Interpret the reply as an optional float (`Nil` → `None`).
    pub fn into_float(self, script: AtomicScript) -> LatchkeyResult<Option<f64>> {
        match self {
            ScriptReply::Nil => Ok(None),
            ScriptReply::Integer(v) => Ok(Some(v as f64)),
            ScriptReply::Text(s) => s.trim().parse::<f64>().map(Some).map_err(|_| {
                StoreError::ScriptArgument {
                    script: script.name(),
                    reason: format!("reply {:?} is not a number", s),
                }
                .into()
            }),
            ScriptReply::Array(items) => Err(not_scalar(script, &items)),
        }
    }

    /// Interpret the reply as an array of integers. `Nil` elements are rejected.
    pub fn into_integers(self, script: AtomicScript) -> LatchkeyResult<Vec<i64>> {
        let items = match self {
            ScriptReply::Array(items) => items,
            other => {
                return Err(StoreError::ScriptArgument {
                    script: script.name(),
                    reason: format!("reply {:?} is not an array", other),
                }
                .into())
            }
        };
        items
            .into_iter()
            .map(|item| {
                item.into_integer(script)?.ok_or_else(|| {
                    StoreError::ScriptArgument {
                        script: script.name(),
                        reason: "array element is nil".to_string(),
                    }
                    .into()
                })
            })
            .collect()
    }
}

fn not_scalar(script: AtomicScript, items: &[ScriptReply]) -> LatchkeyError {
    StoreError::ScriptArgument {
        script: script.name(),
        reason: format!("reply is an array of {} elements", items.len()),
    }
    .into()
}

// ============================================================================
// COMPARE OPERATOR
// ============================================================================

/// Comparison applied by `IncrThenCompare`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CompareOp {
    Lt,
    Lte,
    Eq,
    Gte,
    Gt,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Lt => "lt",
            CompareOp::Lte => "lte",
            CompareOp::Eq => "eq",
            CompareOp::Gte => "gte",
            CompareOp::Gt => "gt",
        }
    }

    pub fn evaluate(&self, lhs: i64, rhs: i64) -> bool {
        self.matches(lhs.cmp(&rhs))
    }

    /// Whether `lhs.cmp(rhs) == ordering` satisfies the operator.
    pub fn matches(&self, ordering: Ordering) -> bool {
        match self {
            CompareOp::Lt => ordering == Ordering::Less,
            CompareOp::Lte => ordering != Ordering::Greater,
            CompareOp::Eq => ordering == Ordering::Equal,
            CompareOp::Gte => ordering != Ordering::Less,
            CompareOp::Gt => ordering == Ordering::Greater,
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CompareOp {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lt" => Ok(CompareOp::Lt),
            "lte" => Ok(CompareOp::Lte),
            "eq" => Ok(CompareOp::Eq),
            "gte" => Ok(CompareOp::Gte),
            "gt" => Ok(CompareOp::Gt),
            _ => Err(PolicyError::UnknownCompareOperator(s.to_string())),
        }
    }
}
