//! Versioned pagination cache.
//!
//! Every dataset owns a version counter. A cached page lives at
//! `<page key>:version:<n>`, so bumping the counter makes every page of the
//! dataset unreachable in one write. Stale entries are never read again and
//! fall out of the store through their TTL.

use super::fingerprint;
use crate::atomic::AtomicOpRunner;
use crate::store::{KeyValueStore, SetOptions};
use latchkey_core::{CacheConfig, LatchkeyResult, PageResult, StoreError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Limit/offset pair addressing one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageWindow {
    pub limit: u64,
    pub offset: u64,
}

impl PageWindow {
    pub fn new(limit: u64, offset: u64) -> Self {
        Self { limit, offset }
    }
}

// ============================================================================
// VERSIONED PAGE CACHE
// ============================================================================

/// Page cache over a shared store, addressed by dataset name.
pub struct VersionedPageCache {
    store: Arc<dyn KeyValueStore>,
    runner: AtomicOpRunner,
    config: CacheConfig,
}

impl VersionedPageCache {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        let runner = AtomicOpRunner::new(store.clone());
        Self {
            store,
            runner,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Window used when a caller does not pick one.
    pub fn default_window(&self) -> PageWindow {
        PageWindow::new(self.config.default_limit, self.config.default_offset)
    }

    /// Bind this cache to one dataset name.
    pub fn dataset(self: &Arc<Self>, name: impl Into<String>) -> DatasetCache {
        DatasetCache {
            cache: Arc::clone(self),
            dataset: name.into(),
        }
    }

    pub fn cache_key_for(
        &self,
        dataset: &str,
        filter: &Value,
        window: PageWindow,
    ) -> LatchkeyResult<String> {
        Ok(fingerprint::cache_key_for(
            &self.config.key_prefix,
            dataset,
            filter,
            window.limit,
            window.offset,
        )?)
    }

    fn version_key(&self, dataset: &str) -> LatchkeyResult<String> {
        fingerprint::check_dataset(dataset)?;
        Ok(fingerprint::version_key(&self.config.key_prefix, dataset))
    }

    /// Current dataset version; an absent counter reads as 0.
    pub async fn current_version(&self, dataset: &str) -> LatchkeyResult<i64> {
        let key = self.version_key(dataset)?;
        Ok(self.store.get_integer(&key).await?.unwrap_or(0))
    }

    /// Read a page at the current version only. Older versions are never
    /// consulted.
    pub async fn get<T>(
        &self,
        dataset: &str,
        filter: &Value,
        window: PageWindow,
    ) -> LatchkeyResult<Option<PageResult<T>>>
    where
        T: DeserializeOwned,
    {
        let page_key = self.cache_key_for(dataset, filter, window)?;
        let version = self.current_version(dataset).await?;
        if version == 0 {
            tracing::debug!(dataset = %dataset, "Page cache miss: dataset never cached");
            return Ok(None);
        }

        let entry_key = fingerprint::versioned_key(&page_key, version);
        let Some(payload) = self.store.get(&entry_key).await? else {
            tracing::debug!(dataset = %dataset, version = version, "Page cache miss");
            return Ok(None);
        };

        match serde_json::from_str::<PageResult<T>>(&payload) {
            Ok(page) => {
                tracing::debug!(dataset = %dataset, version = version, "Page cache hit");
                Ok(Some(page))
            }
            Err(e) => {
                tracing::warn!(
                    dataset = %dataset,
                    key = %entry_key,
                    error = %e,
                    "Undecodable cached page treated as miss"
                );
                Ok(None)
            }
        }
    }

    /// Store a page with the configured entry TTL.
    pub async fn set<T>(
        &self,
        dataset: &str,
        filter: &Value,
        window: PageWindow,
        page: &PageResult<T>,
    ) -> LatchkeyResult<bool>
    where
        T: Serialize,
    {
        self.set_with_ttl(dataset, filter, window, page, self.config.entry_ttl_secs)
            .await
    }

    /// Store a page at the current version if nobody has yet.
    ///
    /// A dataset at version 0 is bumped to 1 first. Returns `false` when
    /// another writer already populated this page for the version.
    pub async fn set_with_ttl<T>(
        &self,
        dataset: &str,
        filter: &Value,
        window: PageWindow,
        page: &PageResult<T>,
        ttl_secs: u64,
    ) -> LatchkeyResult<bool>
    where
        T: Serialize,
    {
        let page_key = self.cache_key_for(dataset, filter, window)?;
        let payload = serde_json::to_string(page).map_err(|e| StoreError::Serialization {
            key: page_key.clone(),
            reason: e.to_string(),
        })?;

        if self.current_version(dataset).await? == 0 {
            self.bump(dataset).await?;
        }
        // Re-read: a concurrent first writer may have bumped as well.
        let version = self.current_version(dataset).await?;
        let entry_key = fingerprint::versioned_key(&page_key, version);

        let written = self
            .store
            .set(&entry_key, &payload, SetOptions::if_not_exists(Some(ttl_secs)))
            .await?;

        tracing::debug!(
            dataset = %dataset,
            version = version,
            written = written,
            "Page cache write"
        );
        Ok(written)
    }

    /// Invalidate every cached page of a dataset with the configured version TTL.
    pub async fn bump(&self, dataset: &str) -> LatchkeyResult<i64> {
        self.bump_with_ttl(dataset, self.config.version_ttl_secs)
            .await
    }

    /// Advance the dataset version by exactly 1. The TTL applies only when
    /// the counter is created.
    pub async fn bump_with_ttl(&self, dataset: &str, ttl_secs: u64) -> LatchkeyResult<i64> {
        let key = self.version_key(dataset)?;
        let version = self
            .runner
            .increment_setting_ttl_if_absent(&key, 1, ttl_secs)
            .await?;
        tracing::info!(dataset = %dataset, version = version, "Page cache version bumped");
        Ok(version)
    }

    /// Delete every cached page of a dataset. The version counter stays, so
    /// the version never moves backwards.
    pub async fn purge(&self, dataset: &str) -> LatchkeyResult<u64> {
        fingerprint::check_dataset(dataset)?;
        let pattern = fingerprint::dataset_pages_pattern(&self.config.key_prefix, dataset);
        let removed = self.store.delete_by_pattern(&pattern).await?;
        tracing::info!(dataset = %dataset, removed = removed, "Page cache purged");
        Ok(removed)
    }
}

impl std::fmt::Debug for VersionedPageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedPageCache")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// DATASET HANDLE
// ============================================================================

/// A `VersionedPageCache` bound to one dataset name.
#[derive(Debug, Clone)]
pub struct DatasetCache {
    cache: Arc<VersionedPageCache>,
    dataset: String,
}

impl DatasetCache {
    pub fn name(&self) -> &str {
        &self.dataset
    }

    pub fn default_window(&self) -> PageWindow {
        self.cache.default_window()
    }

    pub fn cache_key_for(&self, filter: &Value, window: PageWindow) -> LatchkeyResult<String> {
        self.cache.cache_key_for(&self.dataset, filter, window)
    }

    pub async fn current_version(&self) -> LatchkeyResult<i64> {
        self.cache.current_version(&self.dataset).await
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        filter: &Value,
        window: PageWindow,
    ) -> LatchkeyResult<Option<PageResult<T>>> {
        self.cache.get(&self.dataset, filter, window).await
    }

    pub async fn set<T: Serialize>(
        &self,
        filter: &Value,
        window: PageWindow,
        page: &PageResult<T>,
    ) -> LatchkeyResult<bool> {
        self.cache.set(&self.dataset, filter, window, page).await
    }

    pub async fn set_with_ttl<T: Serialize>(
        &self,
        filter: &Value,
        window: PageWindow,
        page: &PageResult<T>,
        ttl_secs: u64,
    ) -> LatchkeyResult<bool> {
        self.cache
            .set_with_ttl(&self.dataset, filter, window, page, ttl_secs)
            .await
    }

    pub async fn bump(&self) -> LatchkeyResult<i64> {
        self.cache.bump(&self.dataset).await
    }

    pub async fn purge(&self) -> LatchkeyResult<u64> {
        self.cache.purge(&self.dataset).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{InMemoryKeyValueStore, TtlStatus};
    use serde_json::json;
    use std::time::Duration;

    fn cache() -> (Arc<InMemoryKeyValueStore>, Arc<VersionedPageCache>) {
        let store = Arc::new(InMemoryKeyValueStore::new());
        let cache = Arc::new(VersionedPageCache::new(store.clone(), CacheConfig::default()));
        (store, cache)
    }

    fn page(rows: &[&str]) -> PageResult<String> {
        PageResult::new(
            rows.iter().map(|s| s.to_string()).collect(),
            rows.len() as u64,
            10,
            0,
        )
    }

    #[tokio::test]
    async fn test_get_on_fresh_dataset_is_miss() {
        let (_store, cache) = cache();
        assert_eq!(cache.current_version("orders").await.unwrap(), 0);
        let got: Option<PageResult<String>> = cache
            .get("orders", &Value::Null, PageWindow::new(10, 0))
            .await
            .expect("get should succeed");
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_first_set_establishes_version_one() {
        let (_store, cache) = cache();
        let filter = json!({"status": "open", "region": "eu"});
        let window = PageWindow::new(10, 0);

        let written = cache
            .set("orders", &filter, window, &page(&["a", "b"]))
            .await
            .expect("set should succeed");
        assert!(written);
        assert_eq!(cache.current_version("orders").await.unwrap(), 1);

        let reordered = json!({"region": "eu", "status": "open"});
        let got = cache
            .get::<String>("orders", &reordered, window)
            .await
            .unwrap();
        assert_eq!(got, Some(page(&["a", "b"])));

        let other = cache
            .get::<String>("orders", &filter, PageWindow::new(10, 10))
            .await
            .unwrap();
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn test_first_writer_wins_within_version() {
        let (_store, cache) = cache();
        let window = PageWindow::new(10, 0);
        assert!(cache.set("d", &Value::Null, window, &page(&["first"])).await.unwrap());
        assert!(!cache.set("d", &Value::Null, window, &page(&["second"])).await.unwrap());

        let got = cache.get::<String>("d", &Value::Null, window).await.unwrap();
        assert_eq!(got, Some(page(&["first"])));
    }

    #[tokio::test]
    async fn test_bump_hides_previous_version() {
        let (store, cache) = cache();
        let window = PageWindow::new(10, 0);
        cache.set("d", &Value::Null, window, &page(&["old"])).await.unwrap();

        assert_eq!(cache.bump("d").await.unwrap(), 2);
        let got = cache.get::<String>("d", &Value::Null, window).await.unwrap();
        assert!(got.is_none());

        // The stale entry still exists until its TTL lapses.
        let page_key = cache.cache_key_for("d", &Value::Null, window).unwrap();
        let stale = fingerprint::versioned_key(&page_key, 1);
        assert!(store.get(&stale).await.unwrap().is_some());

        cache.set("d", &Value::Null, window, &page(&["new"])).await.unwrap();
        let got = cache.get::<String>("d", &Value::Null, window).await.unwrap();
        assert_eq!(got, Some(page(&["new"])));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_bumps_lose_nothing() {
        let (_store, cache) = cache();
        let mut handles = Vec::new();
        for _ in 0..40 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move { cache.bump("d").await }));
        }
        for handle in handles {
            handle.await.expect("task should join").expect("bump should succeed");
        }
        assert_eq!(cache.current_version("d").await.unwrap(), 40);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ttls_follow_config() {
        let (store, cache) = cache();
        let window = PageWindow::new(10, 0);
        cache.set("d", &Value::Null, window, &page(&["x"])).await.unwrap();

        let version_key = fingerprint::version_key("paginated-cache", "d");
        assert_eq!(store.ttl(&version_key).await.unwrap(), TtlStatus::Expires(86_400));

        let page_key = cache.cache_key_for("d", &Value::Null, window).unwrap();
        let entry = fingerprint::versioned_key(&page_key, 1);
        assert_eq!(store.ttl(&entry).await.unwrap(), TtlStatus::Expires(1_800));

        tokio::time::advance(Duration::from_secs(1_801)).await;
        assert!(cache.get::<String>("d", &Value::Null, window).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_undecodable_payload_is_miss() {
        let (store, cache) = cache();
        let window = PageWindow::new(10, 0);
        cache.bump("d").await.unwrap();
        let page_key = cache.cache_key_for("d", &Value::Null, window).unwrap();
        store
            .set(&fingerprint::versioned_key(&page_key, 1), "not json", SetOptions::plain())
            .await
            .unwrap();

        let got = cache.get::<String>("d", &Value::Null, window).await.unwrap();
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_non_object_filter_is_policy_error() {
        let (_store, cache) = cache();
        let err = cache
            .get::<String>("d", &json!([1]), PageWindow::new(10, 0))
            .await
            .unwrap_err();
        assert!(matches!(err, latchkey_core::LatchkeyError::Policy(_)));
    }

    #[tokio::test]
    async fn test_purge_removes_only_that_dataset() {
        let (store, cache) = cache();
        let window = PageWindow::new(10, 0);
        cache.set("a", &Value::Null, window, &page(&["x"])).await.unwrap();
        cache.set("b", &Value::Null, window, &page(&["y"])).await.unwrap();

        assert_eq!(cache.purge("a").await.unwrap(), 1);
        assert_eq!(cache.current_version("a").await.unwrap(), 1);
        assert_eq!(cache.current_version("b").await.unwrap(), 1);
        assert_eq!(store.len().await, 3);
        assert!(cache.get::<String>("a", &Value::Null, window).await.unwrap().is_none());
        assert!(cache.get::<String>("b", &Value::Null, window).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_keeps_version_monotonic() {
        let (_store, cache) = cache();
        let window = PageWindow::new(10, 0);
        cache.set("orders", &Value::Null, window, &page(&["x"])).await.unwrap();
        cache.bump("orders").await.unwrap();

        cache.purge("orders").await.unwrap();
        assert_eq!(cache.current_version("orders").await.unwrap(), 2);
        assert_eq!(cache.bump("orders").await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_purge_leaves_prefixed_dataset_alone() {
        let (_store, cache) = cache();
        let window = PageWindow::new(10, 0);
        cache.set("orders", &Value::Null, window, &page(&["o"])).await.unwrap();
        cache.set("orders_archived", &Value::Null, window, &page(&["a"])).await.unwrap();

        assert_eq!(cache.purge("orders").await.unwrap(), 1);
        assert_eq!(cache.current_version("orders_archived").await.unwrap(), 1);
        assert_eq!(
            cache
                .get::<String>("orders_archived", &Value::Null, window)
                .await
                .unwrap(),
            Some(page(&["a"]))
        );
    }

    #[tokio::test]
    async fn test_dataset_name_with_separator_is_rejected() {
        let (store, cache) = cache();
        let window = PageWindow::new(10, 0);
        cache.set("orders", &Value::Null, window, &page(&["o"])).await.unwrap();

        for result in [
            cache.set("orders:archived", &Value::Null, window, &page(&["a"])).await,
            cache.purge("orders:archived").await.map(|_| true),
            cache.bump("orders:archived").await.map(|_| true),
            cache.current_version("orders:archived").await.map(|_| true),
        ] {
            assert!(matches!(
                result,
                Err(latchkey_core::LatchkeyError::Policy(
                    latchkey_core::PolicyError::InvalidArgument { .. }
                ))
            ));
        }
        assert_eq!(store.len().await, 2);
        assert_eq!(cache.current_version("orders").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dataset_handle_delegates() {
        let (_store, cache) = cache();
        let orders = cache.dataset("orders");
        let window = orders.default_window();
        assert_eq!(window, PageWindow::new(10, 0));

        orders.set(&Value::Null, window, &page(&["o"])).await.unwrap();
        assert_eq!(orders.current_version().await.unwrap(), 1);
        assert_eq!(
            orders.get::<String>(&Value::Null, window).await.unwrap(),
            Some(page(&["o"]))
        );
        assert_eq!(orders.bump().await.unwrap(), 2);
        assert!(orders.get::<String>(&Value::Null, window).await.unwrap().is_none());
    }
}
