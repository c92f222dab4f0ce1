//! Latchkey Test Utilities
//!
//! Shared test infrastructure for the latchkey workspace:
//! - Fault-injecting store and task registry doubles
//! - Proptest generators for filters, windows and configs
//! - Fixtures wiring the in-memory store into caches, locks and queues
//! - Assertions for latchkey error variants

pub use latchkey_core::{
    CacheConfig, LatchkeyConfig, LatchkeyError, LatchkeyResult, LockConfig, LockError,
    OperationResult, PageResult, PolicyError, QueueError, RetryConfig, RetryError, StoreError,
    TaskError,
};
pub use latchkey_storage::{
    AtomicOpRunner, AtomicScript, ExpireOptions, InMemoryKeyValueStore, KeyValueStore,
    PageCacheRegistry, PageWindow, ScriptReply, SetOptions, TtlStatus, VersionedPageCache,
};
pub use latchkey_workflow::{
    DelayedTask, DelayedTaskOptions, DelayedTaskRegistry, LockTable, TaskRegistry,
};

use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

// ============================================================================
// FAULT INJECTION
// ============================================================================

/// Store wrapper that fails the next N calls with `StoreError::Transport`.
///
/// Every call counts toward `calls()`, failed or not.
pub struct FlakyStore {
    inner: Arc<dyn KeyValueStore>,
    failures_left: AtomicU32,
    calls: AtomicU64,
}

impl FlakyStore {
    pub fn new(inner: Arc<dyn KeyValueStore>, failures: u32) -> Self {
        Self {
            inner,
            failures_left: AtomicU32::new(failures),
            calls: AtomicU64::new(0),
        }
    }

    /// Wrap a fresh in-memory store.
    pub fn in_memory(failures: u32) -> Self {
        Self::new(Arc::new(InMemoryKeyValueStore::new()), failures)
    }

    /// Queue `n` more failures.
    pub fn fail_next(&self, n: u32) {
        self.failures_left.fetch_add(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &Arc<dyn KeyValueStore> {
        &self.inner
    }

    fn gate(&self, op: &str) -> LatchkeyResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failed = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            tracing::debug!(op = op, "Injected store failure");
            return Err(StoreError::Transport {
                reason: format!("injected failure during {}", op),
            }
            .into());
        }
        Ok(())
    }
}

impl std::fmt::Debug for FlakyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyStore")
            .field("failures_left", &self.failures_left)
            .field("calls", &self.calls)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyValueStore for FlakyStore {
    async fn get(&self, key: &str) -> LatchkeyResult<Option<String>> {
        self.gate("get")?;
        self.inner.get(key).await
    }

    async fn get_integer(&self, key: &str) -> LatchkeyResult<Option<i64>> {
        self.gate("get_integer")?;
        self.inner.get_integer(key).await
    }

    async fn set(&self, key: &str, value: &str, options: SetOptions) -> LatchkeyResult<bool> {
        self.gate("set")?;
        self.inner.set(key, value, options).await
    }

    async fn incr_by(
        &self,
        key: &str,
        delta: i64,
        expire: Option<ExpireOptions>,
    ) -> LatchkeyResult<i64> {
        self.gate("incr_by")?;
        self.inner.incr_by(key, delta, expire).await
    }

    async fn decr_by(
        &self,
        key: &str,
        delta: i64,
        expire: Option<ExpireOptions>,
    ) -> LatchkeyResult<i64> {
        self.gate("decr_by")?;
        self.inner.decr_by(key, delta, expire).await
    }

    async fn incr_by_float(
        &self,
        key: &str,
        delta: f64,
        expire: Option<ExpireOptions>,
    ) -> LatchkeyResult<f64> {
        self.gate("incr_by_float")?;
        self.inner.incr_by_float(key, delta, expire).await
    }

    async fn expire(&self, key: &str, options: ExpireOptions) -> LatchkeyResult<TtlStatus> {
        self.gate("expire")?;
        self.inner.expire(key, options).await
    }

    async fn ttl(&self, key: &str) -> LatchkeyResult<TtlStatus> {
        self.gate("ttl")?;
        self.inner.ttl(key).await
    }

    async fn delete(&self, keys: &[String]) -> LatchkeyResult<u64> {
        self.gate("delete")?;
        self.inner.delete(keys).await
    }

    async fn delete_by_pattern(&self, pattern: &str) -> LatchkeyResult<u64> {
        self.gate("delete_by_pattern")?;
        self.inner.delete_by_pattern(pattern).await
    }

    async fn eval_script(
        &self,
        script: &AtomicScript,
        keys: &[String],
        args: &[String],
    ) -> LatchkeyResult<ScriptReply> {
        self.gate(script.name())?;
        self.inner.eval_script(script, keys, args).await
    }
}

/// Task registry whose `register` always fails. Lookups see an empty registry.
#[derive(Debug, Default)]
pub struct FailingTaskRegistry {
    attempts: AtomicU32,
}

impl FailingTaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rejected `register` calls.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskRegistry for FailingTaskRegistry {
    async fn register(&self, _options: DelayedTaskOptions) -> LatchkeyResult<Arc<DelayedTask>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Transport {
            reason: "task registry unavailable".to_string(),
        }
        .into())
    }

    async fn count(&self) -> LatchkeyResult<usize> {
        Ok(0)
    }

    async fn tasks(&self) -> LatchkeyResult<Vec<Arc<DelayedTask>>> {
        Ok(Vec::new())
    }

    async fn task_by_id(&self, _id: &str) -> LatchkeyResult<Option<Arc<DelayedTask>>> {
        Ok(None)
    }

    async fn cancel_task_by_id(&self, id: &str) -> LatchkeyResult<()> {
        Err(TaskError::NotFound { id: id.to_string() }.into())
    }

    async fn start_task_by_id(&self, id: &str) -> LatchkeyResult<()> {
        Err(TaskError::NotFound { id: id.to_string() }.into())
    }

    async fn remove_task_by_id(&self, _id: &str) -> LatchkeyResult<bool> {
        Ok(false)
    }
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a test-writer subscriber once per process. Later calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for latchkey inputs.

    use super::*;
    use proptest::prelude::*;
    use serde_json::{Map, Value};
    use std::time::Duration;

    /// Generate a dataset name safe to embed in store keys.
    pub fn arb_dataset_name() -> impl Strategy<Value = String> {
        "[a-z][a-z0-9_-]{0,15}"
    }

    /// Generate a scalar JSON value.
    pub fn arb_json_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            "[a-zA-Z0-9 ]{0,12}".prop_map(Value::String),
        ]
    }

    /// Generate a filter object, nested at most two levels deep.
    pub fn arb_filter() -> impl Strategy<Value = Value> {
        let leaf = prop::collection::btree_map("[a-z]{1,6}", arb_json_scalar(), 0..4);
        prop::collection::btree_map(
            "[a-z]{1,6}",
            prop_oneof![
                arb_json_scalar(),
                leaf.prop_map(|m| Value::Object(m.into_iter().collect::<Map<_, _>>())),
            ],
            0..6,
        )
        .prop_map(|m| Value::Object(m.into_iter().collect()))
    }

    /// Generate a page window.
    pub fn arb_page_window() -> impl Strategy<Value = PageWindow> {
        (1u64..200, 0u64..10_000).prop_map(|(limit, offset)| PageWindow::new(limit, offset))
    }

    /// Generate a retry config with short intervals.
    pub fn arb_retry_config() -> impl Strategy<Value = RetryConfig> {
        (1u32..6, 1u64..500, any::<bool>()).prop_map(|(attempts, interval_ms, as_result)| {
            let config = RetryConfig::new(attempts, Duration::from_millis(interval_ms));
            if as_result {
                config.returning_result_object()
            } else {
                config
            }
        })
    }

    /// Generate a cache config that passes validation.
    pub fn arb_cache_config() -> impl Strategy<Value = CacheConfig> {
        ("[a-z]{1,10}", 1u64..7200, 1u64..172_800).prop_map(|(prefix, entry, version)| {
            CacheConfig::default()
                .with_prefix(prefix)
                .with_entry_ttl(entry)
                .with_version_ttl(version)
        })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-wired components for common scenarios.

    use super::*;
    use std::time::Duration;

    pub fn memory_store() -> Arc<InMemoryKeyValueStore> {
        Arc::new(InMemoryKeyValueStore::new())
    }

    /// Page cache over `store` with default settings.
    pub fn page_cache(store: Arc<dyn KeyValueStore>) -> Arc<VersionedPageCache> {
        Arc::new(VersionedPageCache::new(store, CacheConfig::default()))
    }

    /// Page of `n` consecutive integers starting at `window.offset`.
    pub fn numbered_page(window: PageWindow, total: u64) -> PageResult<u64> {
        let rows = (window.offset..window.offset + window.limit)
            .take_while(|row| *row < total)
            .collect();
        PageResult::new(rows, total, window.limit, window.offset)
    }

    pub fn lock_config(lease_ms: u64) -> LockConfig {
        LockConfig {
            lease_ttl: Duration::from_millis(lease_ms),
        }
    }

    /// Lock table backed by a fresh in-process registry.
    pub fn lock_table(lease_ms: u64) -> (LockTable, Arc<DelayedTaskRegistry>) {
        let registry = Arc::new(DelayedTaskRegistry::new());
        let table = LockTable::new(registry.clone(), lock_config(lease_ms));
        (table, registry)
    }

    pub fn fast_retry(max_attempts: u32) -> RetryConfig {
        RetryConfig::new(max_attempts, Duration::from_millis(10))
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on latchkey error variants.

    use super::*;

    #[track_caller]
    pub fn assert_transport_error<T: std::fmt::Debug>(result: &LatchkeyResult<T>) {
        match result {
            Err(LatchkeyError::Store(StoreError::Transport { .. })) => {}
            other => panic!("Expected Transport error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_exhausted<T: std::fmt::Debug>(result: &LatchkeyResult<T>, attempts: u32) {
        match result {
            Err(LatchkeyError::Retry(RetryError::Exhausted { max_attempts, .. })) => {
                assert_eq!(*max_attempts, attempts, "Wrong attempt count in Exhausted error");
            }
            other => panic!("Expected Exhausted error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_lease_error<T: std::fmt::Debug>(result: &LatchkeyResult<T>) {
        match result {
            Err(LatchkeyError::Lock(LockError::Lease { .. })) => {}
            other => panic!("Expected Lease error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_policy_error<T: std::fmt::Debug>(result: &LatchkeyResult<T>) {
        match result {
            Err(LatchkeyError::Policy(_)) => {}
            other => panic!("Expected Policy error, got: {:?}", other),
        }
    }
}
