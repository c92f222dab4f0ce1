//! Key-value store abstraction.
//!
//! The store is the only shared mutable resource in latchkey. Everything
//! that must hold across processes routes through its conditional writes
//! and its atomic scripts.

mod memory;
pub mod policy;
pub mod script;

pub use memory::InMemoryKeyValueStore;
pub use policy::{ExpireOptions, ExpirePolicy, SetOptions, SetPolicy, TtlStatus};
pub use script::{AtomicScript, CompareOp, ScriptReply};

use async_trait::async_trait;
use latchkey_core::LatchkeyResult;

/// Key-value store contract consumed by the cache and the atomic runner.
///
/// Keys and values are strings. Numeric operations fail with
/// `StoreError::NotAnInteger` / `NotAFloat` when the stored value does not
/// parse. Connectivity loss surfaces as `StoreError::Transport`, which
/// callers may retry.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read a value, `None` if absent or expired.
    async fn get(&self, key: &str) -> LatchkeyResult<Option<String>>;

    /// Read a value and parse it as an integer.
    async fn get_integer(&self, key: &str) -> LatchkeyResult<Option<i64>>;

    /// Write a value under the given policy.
    ///
    /// Returns `false` when a conditional policy declined the write.
    async fn set(&self, key: &str, value: &str, options: SetOptions) -> LatchkeyResult<bool>;

    /// Add `delta` to an integer (absent counts as 0), then apply `expire` if given.
    async fn incr_by(
        &self,
        key: &str,
        delta: i64,
        expire: Option<ExpireOptions>,
    ) -> LatchkeyResult<i64>;

    /// Subtract `delta` from an integer (absent counts as 0), then apply `expire` if given.
    async fn decr_by(
        &self,
        key: &str,
        delta: i64,
        expire: Option<ExpireOptions>,
    ) -> LatchkeyResult<i64>;

    /// Add `delta` to a float (absent counts as 0), then apply `expire` if given.
    async fn incr_by_float(
        &self,
        key: &str,
        delta: f64,
        expire: Option<ExpireOptions>,
    ) -> LatchkeyResult<f64>;

    /// Apply a TTL subject to the policy and report the resulting TTL.
    async fn expire(&self, key: &str, options: ExpireOptions) -> LatchkeyResult<TtlStatus>;

    async fn ttl(&self, key: &str) -> LatchkeyResult<TtlStatus>;

    /// Delete keys, returning how many existed.
    async fn delete(&self, keys: &[String]) -> LatchkeyResult<u64>;

    /// Delete every key matching a glob pattern (`*`, `?`).
    async fn delete_by_pattern(&self, pattern: &str) -> LatchkeyResult<u64>;

    /// Evaluate an atomic script. Nothing else observes the key mid-script.
    async fn eval_script(
        &self,
        script: &AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> LatchkeyResult<ScriptReply>;
}
