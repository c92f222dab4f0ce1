//! In-memory key-value store.
//!
//! Reference backend used by tests and single-process deployments. Expiry is
//! lazy: an expired key is dropped the first time it is touched. Deadlines
//! use `tokio::time::Instant`, so paused-clock tests can advance them.

use super::policy::{ExpireOptions, SetOptions, SetPolicy, TtlStatus};
use super::script::{AtomicScript, CompareOp, ScriptReply};
use super::KeyValueStore;
use async_trait::async_trait;
use latchkey_core::{LatchkeyResult, PolicyError, StoreError};
use regex::Regex;
use std::cmp::Ordering;
use std::collections::HashMap;
use tokio::sync::Mutex;
use tokio::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| deadline > now)
    }
}

// ============================================================================
// KEYSPACE
// ============================================================================

/// The map plus the primitive operations scripts are composed of.
#[derive(Debug, Default)]
struct Keyspace {
    entries: HashMap<String, Entry>,
}

impl Keyspace {
    fn live(&mut self, key: &str, now: Instant) -> Option<&mut Entry> {
        if self.entries.get(key).is_some_and(|e| !e.is_live(now)) {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn exists(&mut self, key: &str, now: Instant) -> bool {
        self.live(key, now).is_some()
    }

    fn ttl(&mut self, key: &str, now: Instant) -> TtlStatus {
        match self.live(key, now) {
            None => TtlStatus::Missing,
            Some(Entry {
                expires_at: None, ..
            }) => TtlStatus::Persistent,
            Some(Entry {
                expires_at: Some(deadline),
                ..
            }) => {
                let ms = deadline.saturating_duration_since(now).as_millis() as u64;
                TtlStatus::Expires((ms + 500) / 1000)
            }
        }
    }

    fn set_ttl(&mut self, key: &str, ttl_secs: u64, now: Instant) {
        if ttl_secs == 0 {
            self.entries.remove(key);
            return;
        }
        if let Some(entry) = self.live(key, now) {
            entry.expires_at = Some(now + Duration::from_secs(ttl_secs));
        }
    }

    fn expire(&mut self, key: &str, options: ExpireOptions, now: Instant) -> TtlStatus {
        let current = self.ttl(key, now);
        if options.policy.permits(current, options.ttl_secs) {
            self.set_ttl(key, options.ttl_secs, now);
        }
        self.ttl(key, now)
    }

    /// Add to an integer value, keeping its TTL. Absent counts as 0.
    fn incr(&mut self, key: &str, delta: i64, now: Instant) -> Result<i64, StoreError> {
        let not_an_integer = || StoreError::NotAnInteger {
            key: key.to_string(),
        };
        let (current, expires_at) = match self.live(key, now) {
            Some(entry) => (
                entry.value.parse::<i64>().map_err(|_| not_an_integer())?,
                entry.expires_at,
            ),
            None => (0, None),
        };
        let next = current.checked_add(delta).ok_or_else(not_an_integer)?;
        self.entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    fn incr_float(&mut self, key: &str, delta: f64, now: Instant) -> Result<f64, StoreError> {
        let not_a_float = || StoreError::NotAFloat {
            key: key.to_string(),
        };
        let (current, expires_at) = match self.live(key, now) {
            Some(entry) => (
                entry.value.parse::<f64>().map_err(|_| not_a_float())?,
                entry.expires_at,
            ),
            None => (0.0, None),
        };
        let next = current + delta;
        if !next.is_finite() {
            return Err(not_a_float());
        }
        self.entries.insert(
            key.to_string(),
            Entry {
                value: next.to_string(),
                expires_at,
            },
        );
        Ok(next)
    }

    fn set(
        &mut self,
        key: &str,
        value: &str,
        options: SetOptions,
        now: Instant,
    ) -> Result<bool, PolicyError> {
        options.validate()?;
        let existing = self.live(key, now).map(|e| e.expires_at);
        let fresh = options
            .ttl_secs
            .map(|secs| now + Duration::from_secs(secs));

        let expires_at = match (options.policy, existing) {
            (SetPolicy::IfExists, None) | (SetPolicy::IfNotExists, Some(_)) => return Ok(false),
            (SetPolicy::KeepTtl, existing) => existing.flatten(),
            _ => fresh,
        };

        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at,
            },
        );
        Ok(true)
    }

    fn delete_matching(&mut self, pattern: &Regex, now: Instant) -> u64 {
        self.entries.retain(|_, entry| entry.is_live(now));
        let before = self.entries.len();
        self.entries.retain(|key, _| !pattern.is_match(key));
        (before - self.entries.len()) as u64
    }

    // ------------------------------------------------------------------------
    // Script interpretation
    // ------------------------------------------------------------------------

    fn text_or_nil(&mut self, key: &str, now: Instant) -> ScriptReply {
        match self.live(key, now) {
            Some(entry) => ScriptReply::Text(entry.value.clone()),
            None => ScriptReply::Nil,
        }
    }

    fn eval(
        &mut self,
        script: AtomicScript,
        key: &str,
        args: &[String],
        now: Instant,
    ) -> LatchkeyResult<ScriptReply> {
        let reply = match script {
            AtomicScript::IncrByAndSetTtlIfAbsent | AtomicScript::DecrByAndSetTtlIfAbsent => {
                let delta = signed_delta(script, int_arg(script, args, 0)?)?;
                let ttl = positive_arg(script, args, 1)?;
                let existed = self.exists(key, now);
                let value = self.incr(key, delta, now)?;
                if !existed {
                    self.set_ttl(key, ttl, now);
                }
                ScriptReply::Integer(value)
            }
            AtomicScript::IncrByIfExists | AtomicScript::DecrByIfExists => {
                let delta = signed_delta(script, int_arg(script, args, 0)?)?;
                if self.exists(key, now) {
                    self.incr(key, delta, now)?;
                }
                self.text_or_nil(key, now)
            }
            AtomicScript::IncrByAndEnsureTtl | AtomicScript::DecrByAndEnsureTtl => {
                let delta = signed_delta(script, int_arg(script, args, 0)?)?;
                let ttl = positive_arg(script, args, 1)?;
                let value = self.incr(key, delta, now)?;
                if self.ttl(key, now) == TtlStatus::Persistent {
                    self.set_ttl(key, ttl, now);
                }
                ScriptReply::Integer(value)
            }
            AtomicScript::IncrByFloatAndEnsureTtl => {
                let delta = float_arg(script, args, 0)?;
                let ttl = positive_arg(script, args, 1)?;
                let value = self.incr_float(key, delta, now)?;
                if self.ttl(key, now) == TtlStatus::Persistent {
                    self.set_ttl(key, ttl, now);
                }
                ScriptReply::Text(value.to_string())
            }
            AtomicScript::IncrByFloatAndSetTtlIfAbsent => {
                let delta = float_arg(script, args, 0)?;
                let ttl = positive_arg(script, args, 1)?;
                if !self.exists(key, now) {
                    self.incr_float(key, delta, now)?;
                    self.set_ttl(key, ttl, now);
                }
                self.text_or_nil(key, now)
            }
            AtomicScript::IncrByFloatIfExists => {
                let delta = float_arg(script, args, 0)?;
                if self.exists(key, now) {
                    self.incr_float(key, delta, now)?;
                }
                self.text_or_nil(key, now)
            }
            AtomicScript::RefreshTtlIfBelowThreshold => {
                let threshold = int_arg(script, args, 0)?;
                let new_ttl = positive_arg(script, args, 1)?;
                let (ttl, refreshed) = match self.ttl(key, now) {
                    TtlStatus::Missing => (TtlStatus::Missing.as_redis(), 0),
                    TtlStatus::Expires(secs) if (secs as i64) >= threshold => (secs as i64, 0),
                    _ => {
                        self.set_ttl(key, new_ttl, now);
                        (new_ttl as i64, 1)
                    }
                };
                ScriptReply::Array(vec![
                    ScriptReply::Integer(ttl),
                    ScriptReply::Integer(refreshed),
                ])
            }
            AtomicScript::IncrThenCompare => {
                let op: CompareOp = args[0].parse().map_err(|_| StoreError::ScriptArgument {
                    script: script.name(),
                    reason: "unknown operator".to_string(),
                })?;
                let rhs = float_arg(script, args, 1).map_err(|_| StoreError::ScriptArgument {
                    script: script.name(),
                    reason: "rhs is not numeric".to_string(),
                })?;
                let value = self.incr(key, 1, now)?;
                let ordering = (value as f64).partial_cmp(&rhs).unwrap_or(Ordering::Less);
                ScriptReply::Integer(i64::from(op.matches(ordering)))
            }
        };
        Ok(reply)
    }
}

fn int_arg(script: AtomicScript, args: &[String], index: usize) -> Result<i64, StoreError> {
    args[index]
        .trim()
        .parse::<i64>()
        .map_err(|_| StoreError::ScriptArgument {
            script: script.name(),
            reason: format!("argument {} ({:?}) is not an integer", index + 1, args[index]),
        })
}

fn positive_arg(script: AtomicScript, args: &[String], index: usize) -> Result<u64, StoreError> {
    let value = int_arg(script, args, index)?;
    u64::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| StoreError::ScriptArgument {
            script: script.name(),
            reason: format!("argument {} must be a positive number of seconds", index + 1),
        })
}

fn float_arg(script: AtomicScript, args: &[String], index: usize) -> Result<f64, StoreError> {
    args[index]
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| StoreError::ScriptArgument {
            script: script.name(),
            reason: format!("argument {} ({:?}) is not a number", index + 1, args[index]),
        })
}

fn signed_delta(script: AtomicScript, delta: i64) -> Result<i64, StoreError> {
    match script {
        AtomicScript::DecrByAndSetTtlIfAbsent
        | AtomicScript::DecrByIfExists
        | AtomicScript::DecrByAndEnsureTtl => {
            delta.checked_neg().ok_or_else(|| StoreError::ScriptArgument {
                script: script.name(),
                reason: "decrement out of range".to_string(),
            })
        }
        _ => Ok(delta),
    }
}

/// Translate a store glob (`*`, `?`, `\` escapes) into an anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<Regex, PolicyError> {
    let mut source = String::with_capacity(pattern.len() + 2);
    source.push('^');
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            '\\' => {
                if let Some(escaped) = chars.next() {
                    source.push_str(&regex::escape(&escaped.to_string()));
                }
            }
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|e| PolicyError::InvalidArgument {
        field: "pattern".to_string(),
        reason: e.to_string(),
    })
}

// ============================================================================
// STORE
// ============================================================================

/// Single-mutex in-memory store. Every call, scripts included, runs under
/// the one lock, so each call is indivisible.
#[derive(Debug, Default)]
pub struct InMemoryKeyValueStore {
    keyspace: Mutex<Keyspace>,
}

impl InMemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let keyspace = self.keyspace.lock().await;
        keyspace.entries.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl KeyValueStore for InMemoryKeyValueStore {
    async fn get(&self, key: &str) -> LatchkeyResult<Option<String>> {
        let mut keyspace = self.keyspace.lock().await;
        Ok(keyspace
            .live(key, Instant::now())
            .map(|entry| entry.value.clone()))
    }

    async fn get_integer(&self, key: &str) -> LatchkeyResult<Option<i64>> {
        match self.get(key).await? {
            None => Ok(None),
            Some(value) => value.parse::<i64>().map(Some).map_err(|_| {
                StoreError::NotAnInteger {
                    key: key.to_string(),
                }
                .into()
            }),
        }
    }

    async fn set(&self, key: &str, value: &str, options: SetOptions) -> LatchkeyResult<bool> {
        let mut keyspace = self.keyspace.lock().await;
        Ok(keyspace.set(key, value, options, Instant::now())?)
    }

    async fn incr_by(
        &self,
        key: &str,
        delta: i64,
        expire: Option<ExpireOptions>,
    ) -> LatchkeyResult<i64> {
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock().await;
        let value = keyspace.incr(key, delta, now)?;
        if let Some(options) = expire {
            keyspace.expire(key, options, now);
        }
        Ok(value)
    }

    async fn decr_by(
        &self,
        key: &str,
        delta: i64,
        expire: Option<ExpireOptions>,
    ) -> LatchkeyResult<i64> {
        let negated = delta.checked_neg().ok_or_else(|| StoreError::NotAnInteger {
            key: key.to_string(),
        })?;
        self.incr_by(key, negated, expire).await
    }

    async fn incr_by_float(
        &self,
        key: &str,
        delta: f64,
        expire: Option<ExpireOptions>,
    ) -> LatchkeyResult<f64> {
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock().await;
        let value = keyspace.incr_float(key, delta, now)?;
        if let Some(options) = expire {
            keyspace.expire(key, options, now);
        }
        Ok(value)
    }

    async fn expire(&self, key: &str, options: ExpireOptions) -> LatchkeyResult<TtlStatus> {
        let mut keyspace = self.keyspace.lock().await;
        Ok(keyspace.expire(key, options, Instant::now()))
    }

    async fn ttl(&self, key: &str) -> LatchkeyResult<TtlStatus> {
        let mut keyspace = self.keyspace.lock().await;
        Ok(keyspace.ttl(key, Instant::now()))
    }

    async fn delete(&self, keys: &[String]) -> LatchkeyResult<u64> {
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock().await;
        let mut removed = 0;
        for key in keys {
            if keyspace.exists(key, now) {
                keyspace.entries.remove(key);
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn delete_by_pattern(&self, pattern: &str) -> LatchkeyResult<u64> {
        let regex = glob_to_regex(pattern)?;
        let now = Instant::now();
        let mut keyspace = self.keyspace.lock().await;
        let removed = keyspace.delete_matching(&regex, now);

        tracing::debug!(pattern = %pattern, removed = removed, "Deleted keys by pattern");
        Ok(removed)
    }

    async fn eval_script(
        &self,
        script: &AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> LatchkeyResult<ScriptReply> {
        script.check_arity(keys, args)?;
        let mut keyspace = self.keyspace.lock().await;
        keyspace.eval(*script, &keys[0], args, Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ExpirePolicy;
    use latchkey_core::LatchkeyError;
    use proptest::prelude::*;
    use std::sync::Arc;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_ttl_expires_lazily() {
        let store = InMemoryKeyValueStore::new();
        assert!(store
            .set("a", "1", SetOptions::with_ttl(10))
            .await
            .expect("set should succeed"));
        assert_eq!(store.ttl("a").await.unwrap(), TtlStatus::Expires(10));

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(store.ttl("a").await.unwrap(), TtlStatus::Expires(6));

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(store.get("a").await.unwrap(), None);
        assert_eq!(store.ttl("a").await.unwrap(), TtlStatus::Missing);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_policies() {
        let store = InMemoryKeyValueStore::new();

        assert!(!store.set("k", "x", SetOptions::if_exists(None)).await.unwrap());
        assert!(store.set("k", "first", SetOptions::if_not_exists(Some(30))).await.unwrap());
        assert!(!store.set("k", "second", SetOptions::if_not_exists(None)).await.unwrap());
        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("first"));

        assert!(store.set("k", "kept", SetOptions::keep_ttl()).await.unwrap());
        assert_eq!(store.ttl("k").await.unwrap(), TtlStatus::Expires(30));

        assert!(store.set("k", "plain", SetOptions::plain()).await.unwrap());
        assert_eq!(store.ttl("k").await.unwrap(), TtlStatus::Persistent);

        let err = store
            .set(
                "k",
                "v",
                SetOptions {
                    policy: SetPolicy::WithTtl,
                    ttl_secs: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, LatchkeyError::Policy(PolicyError::TtlRequired { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_incr_keeps_ttl_and_rejects_text() {
        let store = InMemoryKeyValueStore::new();
        store.set("n", "4", SetOptions::with_ttl(20)).await.unwrap();
        assert_eq!(store.incr_by("n", 3, None).await.unwrap(), 7);
        assert_eq!(store.decr_by("n", 10, None).await.unwrap(), -3);
        assert_eq!(store.ttl("n").await.unwrap(), TtlStatus::Expires(20));

        store.set("t", "hello", SetOptions::plain()).await.unwrap();
        let err = store.incr_by("t", 1, None).await.unwrap_err();
        assert!(matches!(err, LatchkeyError::Store(StoreError::NotAnInteger { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_incr_with_expire_policy() {
        let store = InMemoryKeyValueStore::new();
        store
            .incr_by("n", 1, Some(ExpireOptions::if_no_expiry(60)))
            .await
            .unwrap();
        store
            .incr_by("n", 1, Some(ExpireOptions::if_no_expiry(5)))
            .await
            .unwrap();
        assert_eq!(store.ttl("n").await.unwrap(), TtlStatus::Expires(60));

        let status = store
            .expire(
                "n",
                ExpireOptions {
                    policy: ExpirePolicy::IfGreater,
                    ttl_secs: 90,
                },
            )
            .await
            .unwrap();
        assert_eq!(status, TtlStatus::Expires(90));

        let value = store.incr_by_float("f", 1.5, None).await.unwrap();
        assert_eq!(value, 1.5);
        assert_eq!(store.get("f").await.unwrap().as_deref(), Some("1.5"));
    }

    #[tokio::test]
    async fn test_delete_by_pattern() {
        let store = InMemoryKeyValueStore::new();
        for key in ["cache:a:1", "cache:a:2", "cache:b:1", "other"] {
            store.set(key, "v", SetOptions::plain()).await.unwrap();
        }
        assert_eq!(store.delete_by_pattern("cache:a:*").await.unwrap(), 2);
        assert_eq!(store.delete_by_pattern("cache:?:1").await.unwrap(), 1);
        assert_eq!(store.len().await, 1);
        assert_eq!(store.delete(&strings(&["other", "ghost"])).await.unwrap(), 1);
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_script_set_ttl_if_absent() {
        let store = InMemoryKeyValueStore::new();
        let script = AtomicScript::IncrByAndSetTtlIfAbsent;
        let keys = strings(&["k"]);

        let reply = store
            .eval_script(&script, &keys, &strings(&["5", "10"]))
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Integer(5));

        tokio::time::advance(Duration::from_secs(3)).await;
        let reply = store
            .eval_script(&script, &keys, &strings(&["5", "10"]))
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Integer(10));
        assert_eq!(store.ttl("k").await.unwrap(), TtlStatus::Expires(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_script_refresh_ttl() {
        let store = InMemoryKeyValueStore::new();
        let script = AtomicScript::RefreshTtlIfBelowThreshold;
        let keys = strings(&["k"]);
        let args = strings(&["30", "120"]);

        let pair = |ttl, refreshed| {
            ScriptReply::Array(vec![ScriptReply::Integer(ttl), ScriptReply::Integer(refreshed)])
        };

        let reply = store.eval_script(&script, &keys, &args).await.unwrap();
        assert_eq!(reply, pair(-2, 0));

        store.set("k", "v", SetOptions::plain()).await.unwrap();
        let reply = store.eval_script(&script, &keys, &args).await.unwrap();
        assert_eq!(reply, pair(120, 1));

        let reply = store.eval_script(&script, &keys, &args).await.unwrap();
        assert_eq!(reply, pair(120, 0));

        tokio::time::advance(Duration::from_secs(100)).await;
        let reply = store.eval_script(&script, &keys, &args).await.unwrap();
        assert_eq!(reply, pair(120, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_script_float_set_ttl_if_absent_only_seeds() {
        let store = InMemoryKeyValueStore::new();
        let script = AtomicScript::IncrByFloatAndSetTtlIfAbsent;
        let keys = strings(&["f"]);

        let reply = store
            .eval_script(&script, &keys, &strings(&["1.5", "10"]))
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Text("1.5".to_string()));
        assert_eq!(store.ttl("f").await.unwrap(), TtlStatus::Expires(10));

        tokio::time::advance(Duration::from_secs(4)).await;
        let reply = store
            .eval_script(&script, &keys, &strings(&["1.5", "10"]))
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Text("1.5".to_string()));
        assert_eq!(store.ttl("f").await.unwrap(), TtlStatus::Expires(6));
    }

    #[tokio::test]
    async fn test_script_float_if_exists() {
        let store = InMemoryKeyValueStore::new();
        let script = AtomicScript::IncrByFloatIfExists;
        let keys = strings(&["f"]);

        let reply = store
            .eval_script(&script, &keys, &strings(&["0.5"]))
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Nil);
        assert_eq!(store.get("f").await.unwrap(), None);

        store.set("f", "2", SetOptions::plain()).await.unwrap();
        let reply = store
            .eval_script(&script, &keys, &strings(&["0.5"]))
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Text("2.5".to_string()));

        let err = store
            .eval_script(&script, &keys, &strings(&["half"]))
            .await
            .unwrap_err();
        assert!(matches!(err, LatchkeyError::Store(StoreError::ScriptArgument { .. })));
    }

    #[tokio::test]
    async fn test_script_compare_rejects_bad_arguments_without_incrementing() {
        let store = InMemoryKeyValueStore::new();
        let script = AtomicScript::IncrThenCompare;
        let keys = strings(&["k"]);

        let err = store
            .eval_script(&script, &keys, &strings(&["ne", "1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, LatchkeyError::Store(StoreError::ScriptArgument { .. })));

        let err = store
            .eval_script(&script, &keys, &strings(&["lt", "ten"]))
            .await
            .unwrap_err();
        assert!(matches!(err, LatchkeyError::Store(StoreError::ScriptArgument { .. })));
        assert_eq!(store.get("k").await.unwrap(), None);

        let reply = store
            .eval_script(&script, &keys, &strings(&["lte", "1"]))
            .await
            .unwrap();
        assert_eq!(reply, ScriptReply::Integer(1));
    }

    #[tokio::test]
    async fn test_script_arity_checked() {
        let store = InMemoryKeyValueStore::new();
        let err = store
            .eval_script(&AtomicScript::IncrByIfExists, &strings(&["a", "b"]), &strings(&["1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, LatchkeyError::Store(StoreError::ScriptArity { .. })));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_scripts_lose_no_updates() {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let mut handles = Vec::new();
        for _ in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .eval_script(
                        &AtomicScript::IncrByAndSetTtlIfAbsent,
                        &["counter".to_string()],
                        &["1".to_string(), "60".to_string()],
                    )
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("task should join").expect("eval should succeed");
        }
        assert_eq!(store.get_integer("counter").await.unwrap(), Some(64));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(200))]

        #[test]
        fn prop_literal_glob_matches_only_itself(key in "[a-z:\\.\\-\\[\\]\\(\\)]{1,20}", other in "[a-z]{1,20}") {
            let regex = glob_to_regex(&key).expect("literal pattern should compile");
            prop_assert!(regex.is_match(&key));
            if other != key {
                prop_assert!(!regex.is_match(&other));
            }
        }

        #[test]
        fn prop_prefix_glob_matches_extensions(prefix in "[a-z:]{0,10}", suffix in "[a-z0-9:]{0,10}") {
            let regex = glob_to_regex(&format!("{}*", prefix)).expect("prefix pattern should compile");
            let candidate = format!("{}{}", prefix, suffix);
            prop_assert!(regex.is_match(&candidate));
        }
    }
}
