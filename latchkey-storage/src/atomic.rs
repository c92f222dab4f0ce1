//! Atomic counter and TTL operations.
//!
//! Each operation is one script evaluation, so the read-decide-write
//! sequence it performs cannot interleave with other store clients.

use crate::store::{AtomicScript, CompareOp, KeyValueStore, ScriptReply};
use latchkey_core::{LatchkeyResult, StoreError};
use std::sync::Arc;

/// Outcome of `refresh_ttl_if_below_threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlRefresh {
    /// Key does not exist; nothing was written.
    Absent,
    /// TTL was missing or below the threshold and now equals this value.
    Refreshed(u64),
    /// TTL was at or above the threshold and left alone.
    Unchanged(u64),
}

/// Runs the atomic script catalogue against a store.
#[derive(Clone)]
pub struct AtomicOpRunner {
    store: Arc<dyn KeyValueStore>,
}

impl AtomicOpRunner {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    async fn eval(
        &self,
        script: AtomicScript,
        key: &str,
        args: Vec<String>,
    ) -> LatchkeyResult<ScriptReply> {
        let keys = vec![key.to_string()];
        script.check_arity(&keys, &args)?;
        let reply = self.store.eval_script(&script, &keys, &args).await?;
        tracing::trace!(script = %script, key = %key, reply = ?reply, "Script evaluated");
        Ok(reply)
    }

    async fn eval_integer(
        &self,
        script: AtomicScript,
        key: &str,
        args: Vec<String>,
    ) -> LatchkeyResult<i64> {
        self.eval(script, key, args)
            .await?
            .into_integer(script)?
            .ok_or_else(|| {
                StoreError::NotAnInteger {
                    key: key.to_string(),
                }
                .into()
            })
    }

    async fn eval_float(
        &self,
        script: AtomicScript,
        key: &str,
        args: Vec<String>,
    ) -> LatchkeyResult<f64> {
        self.eval(script, key, args)
            .await?
            .into_float(script)?
            .ok_or_else(|| {
                StoreError::NotAFloat {
                    key: key.to_string(),
                }
                .into()
            })
    }

    // ========================================================================
    // INCREMENT / DECREMENT
    // ========================================================================

    /// Add `delta`; when the key was absent, set its TTL in the same step.
    /// An existing key keeps its TTL. Returns the new value.
    pub async fn increment_setting_ttl_if_absent(
        &self,
        key: &str,
        delta: i64,
        ttl_secs: u64,
    ) -> LatchkeyResult<i64> {
        self.eval_integer(
            AtomicScript::IncrByAndSetTtlIfAbsent,
            key,
            vec![delta.to_string(), ttl_secs.to_string()],
        )
        .await
    }

    pub async fn decrement_setting_ttl_if_absent(
        &self,
        key: &str,
        delta: i64,
        ttl_secs: u64,
    ) -> LatchkeyResult<i64> {
        self.eval_integer(
            AtomicScript::DecrByAndSetTtlIfAbsent,
            key,
            vec![delta.to_string(), ttl_secs.to_string()],
        )
        .await
    }

    /// Add `delta` only if the key exists. `None` means the key is absent
    /// and stays absent.
    pub async fn increment_if_exists(&self, key: &str, delta: i64) -> LatchkeyResult<Option<i64>> {
        let script = AtomicScript::IncrByIfExists;
        self.eval(script, key, vec![delta.to_string()])
            .await?
            .into_integer(script)
    }

    pub async fn decrement_if_exists(&self, key: &str, delta: i64) -> LatchkeyResult<Option<i64>> {
        let script = AtomicScript::DecrByIfExists;
        self.eval(script, key, vec![delta.to_string()])
            .await?
            .into_integer(script)
    }

    /// Add `delta`, then set the TTL only if the key has none.
    pub async fn ensure_ttl_on_increment(
        &self,
        key: &str,
        delta: i64,
        ttl_secs: u64,
    ) -> LatchkeyResult<i64> {
        self.eval_integer(
            AtomicScript::IncrByAndEnsureTtl,
            key,
            vec![delta.to_string(), ttl_secs.to_string()],
        )
        .await
    }

    pub async fn ensure_ttl_on_decrement(
        &self,
        key: &str,
        delta: i64,
        ttl_secs: u64,
    ) -> LatchkeyResult<i64> {
        self.eval_integer(
            AtomicScript::DecrByAndEnsureTtl,
            key,
            vec![delta.to_string(), ttl_secs.to_string()],
        )
        .await
    }

    pub async fn ensure_ttl_on_float_increment(
        &self,
        key: &str,
        delta: f64,
        ttl_secs: u64,
    ) -> LatchkeyResult<f64> {
        self.eval_float(
            AtomicScript::IncrByFloatAndEnsureTtl,
            key,
            vec![delta.to_string(), ttl_secs.to_string()],
        )
        .await
    }

    /// Seed an absent key with `delta` and a TTL. An existing key is left
    /// untouched. Returns the value now stored.
    pub async fn increment_float_setting_ttl_if_absent(
        &self,
        key: &str,
        delta: f64,
        ttl_secs: u64,
    ) -> LatchkeyResult<f64> {
        self.eval_float(
            AtomicScript::IncrByFloatAndSetTtlIfAbsent,
            key,
            vec![delta.to_string(), ttl_secs.to_string()],
        )
        .await
    }

    /// Add `delta` only if the key exists. `None` means the key is absent.
    pub async fn increment_float_if_exists(
        &self,
        key: &str,
        delta: f64,
    ) -> LatchkeyResult<Option<f64>> {
        let script = AtomicScript::IncrByFloatIfExists;
        self.eval(script, key, vec![delta.to_string()])
            .await?
            .into_float(script)
    }

    // ========================================================================
    // TTL REFRESH
    // ========================================================================

    /// Reset the TTL to `new_ttl_secs` when it is missing or below
    /// `threshold_secs`.
    pub async fn refresh_ttl_if_below_threshold(
        &self,
        key: &str,
        threshold_secs: u64,
        new_ttl_secs: u64,
    ) -> LatchkeyResult<TtlRefresh> {
        let script = AtomicScript::RefreshTtlIfBelowThreshold;
        let reply = self
            .eval(
                script,
                key,
                vec![threshold_secs.to_string(), new_ttl_secs.to_string()],
            )
            .await?
            .into_integers(script)?;

        match reply.as_slice() {
            [ttl, _] if *ttl < 0 => Ok(TtlRefresh::Absent),
            [ttl, 1] => Ok(TtlRefresh::Refreshed(*ttl as u64)),
            [ttl, 0] => Ok(TtlRefresh::Unchanged(*ttl as u64)),
            other => Err(StoreError::ScriptArgument {
                script: script.name(),
                reason: format!("unexpected reply {:?}", other),
            }
            .into()),
        }
    }

    // ========================================================================
    // COMPARE
    // ========================================================================

    /// Add 1, then compare the new value against `rhs`.
    pub async fn increment_then_compare(
        &self,
        key: &str,
        op: CompareOp,
        rhs: i64,
    ) -> LatchkeyResult<bool> {
        self.increment_then_compare_raw(key, op.as_str(), &rhs.to_string())
            .await
    }

    /// String-typed variant; the script validates the operator and operand
    /// before incrementing.
    pub async fn increment_then_compare_raw(
        &self,
        key: &str,
        op: &str,
        rhs: &str,
    ) -> LatchkeyResult<bool> {
        let outcome = self
            .eval_integer(
                AtomicScript::IncrThenCompare,
                key,
                vec![op.to_string(), rhs.to_string()],
            )
            .await?;
        Ok(outcome == 1)
    }
}

impl std::fmt::Debug for AtomicOpRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicOpRunner").finish_non_exhaustive()
    }
}
