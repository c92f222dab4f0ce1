//! Per-dataset cache handles.

use super::page_cache::{DatasetCache, VersionedPageCache};
use crate::store::KeyValueStore;
use dashmap::DashMap;
use latchkey_core::CacheConfig;
use std::sync::Arc;

/// Hands out one shared `DatasetCache` per dataset name.
#[derive(Debug, Clone)]
pub struct PageCacheRegistry {
    cache: Arc<VersionedPageCache>,
    datasets: Arc<DashMap<String, Arc<DatasetCache>>>,
}

impl PageCacheRegistry {
    pub fn new(store: Arc<dyn KeyValueStore>, config: CacheConfig) -> Self {
        Self::from_cache(Arc::new(VersionedPageCache::new(store, config)))
    }

    pub fn from_cache(cache: Arc<VersionedPageCache>) -> Self {
        Self {
            cache,
            datasets: Arc::new(DashMap::new()),
        }
    }

    /// Create-or-get the handle for `dataset`.
    pub fn create(&self, dataset: &str) -> Arc<DatasetCache> {
        self.datasets
            .entry(dataset.to_string())
            .or_insert_with(|| {
                tracing::debug!(dataset = %dataset, "Registered page cache");
                Arc::new(self.cache.dataset(dataset))
            })
            .clone()
    }

    pub fn get(&self, dataset: &str) -> Option<Arc<DatasetCache>> {
        self.datasets.get(dataset).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    pub fn cache(&self) -> &Arc<VersionedPageCache> {
        &self.cache
    }
}
