//! Cross-crate scenarios: page cache, locks, retries and queues wired
//! together over the in-memory store.

use latchkey_test_utils::fixtures::{
    fast_retry, lock_table, memory_store, numbered_page, page_cache,
};
use latchkey_test_utils::{
    assertions, init_test_tracing, FailingTaskRegistry, FlakyStore, KeyValueStore, LatchkeyError,
    LockConfig, PageCacheRegistry, PageResult, PageWindow, VersionedPageCache,
};
use latchkey_workflow::{KeyLocker, RetryExecutor, SerialTaskQueue, TaskRegistry};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bumps_never_lose_an_increment() {
    init_test_tracing();
    let cache = page_cache(memory_store());

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let cache = cache.clone();
            tokio::spawn(async move { cache.bump("orders").await })
        })
        .collect();

    let mut versions = Vec::new();
    for handle in handles {
        versions.push(handle.await.expect("join").expect("bump should succeed"));
    }
    versions.sort_unstable();

    assert_eq!(versions, (1..=32).collect::<Vec<i64>>());
    assert_eq!(cache.current_version("orders").await.unwrap(), 32);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_first_writer_wins_at_a_version() {
    let cache = page_cache(memory_store());
    cache.bump("orders").await.unwrap();
    let filter = json!({"status": "open"});
    let window = PageWindow::new(10, 0);

    let handles: Vec<_> = (0..16u64)
        .map(|writer| {
            let cache = cache.clone();
            let filter = filter.clone();
            tokio::spawn(async move {
                let page = PageResult::new(vec![writer], 16, 10, 0);
                cache.set("orders", &filter, window, &page).await
            })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.expect("join").expect("set should succeed") {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert!(cache
        .get::<u64>("orders", &filter, window)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_bump_hides_pages_written_before_it() {
    let registry = PageCacheRegistry::new(memory_store(), Default::default());
    let invoices = registry.create("invoices");
    let filter = json!({"customer": 7, "tags": ["a", "b"]});
    let window = invoices.default_window();
    let page = numbered_page(window, 42);

    assert!(invoices.set(&filter, window, &page).await.unwrap());
    assert_eq!(invoices.get::<u64>(&filter, window).await.unwrap(), Some(page));

    invoices.bump().await.unwrap();
    assert!(invoices.get::<u64>(&filter, window).await.unwrap().is_none());

    // Same handle comes back from the registry.
    assert!(Arc::ptr_eq(&invoices, &registry.create("invoices")));
}

#[tokio::test(start_paused = true)]
async fn test_retry_absorbs_transient_store_failures() {
    init_test_tracing();
    let flaky = Arc::new(FlakyStore::in_memory(2));
    let cache = Arc::new(VersionedPageCache::new(
        flaky.clone() as Arc<dyn KeyValueStore>,
        Default::default(),
    ));
    let mut executor = RetryExecutor::new("bump-orders", &fast_retry(3));

    let version = executor
        .run(|| {
            let cache = cache.clone();
            async move { cache.bump("orders").await }
        })
        .await
        .expect("third attempt should reach the store");

    assert_eq!(version, 1);
    assert_eq!(flaky.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhausts_when_store_stays_down() {
    let flaky = Arc::new(FlakyStore::in_memory(10));
    let cache = Arc::new(VersionedPageCache::new(
        flaky.clone() as Arc<dyn KeyValueStore>,
        Default::default(),
    ));
    let mut executor = RetryExecutor::new("bump-orders", &fast_retry(3));

    let result = executor
        .run(|| {
            let cache = cache.clone();
            async move { cache.bump("orders").await }
        })
        .await;

    assertions::assert_exhausted(&result, 3);
    assert_eq!(flaky.calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_failed_lease_registration_leaves_lock_free() {
    let registry = Arc::new(FailingTaskRegistry::new());
    let locker = KeyLocker::new("reports", registry.clone(), &LockConfig::default());

    let result = locker.obtain_lock().await;
    assertions::assert_lease_error(&result);
    assert!(!locker.is_locked());
    assert_eq!(registry.attempts(), 1);

    assertions::assert_lease_error(&locker.try_obtain_lock().await);
    assert!(!locker.is_locked());
}

#[tokio::test(start_paused = true)]
async fn test_lease_expiry_hands_lock_to_waiter() {
    let (table, registry) = lock_table(100);
    let stuck = table.obtain_lock("ledger").await.unwrap();

    let waiter = {
        let locker = table.locker("ledger");
        tokio::spawn(async move { locker.obtain_lock().await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    let next = waiter.await.expect("join").expect("waiter should get the lock");
    assert!(!stuck.is_held());
    assert!(next.is_held());

    // The stale holder cannot free the new generation.
    stuck.release().await.unwrap();
    assert!(table.locker("ledger").is_locked());

    next.release().await.unwrap();
    assert!(!table.locker("ledger").is_locked());
    assert_eq!(registry.count().await.unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lock_prevents_cache_stampede() {
    let cache = page_cache(memory_store());
    let (table, _registry) = lock_table(5_000);
    let table = Arc::new(table);
    let computed = Arc::new(AtomicUsize::new(0));
    let filter = json!({"region": "eu"});
    let window = PageWindow::new(5, 0);

    let readers: Vec<_> = (0..12)
        .map(|_| {
            let cache = cache.clone();
            let table = table.clone();
            let computed = computed.clone();
            let filter = filter.clone();
            tokio::spawn(async move {
                if let Some(page) = cache.get::<u64>("stock", &filter, window).await? {
                    return Ok::<_, LatchkeyError>(page);
                }
                let key = cache.cache_key_for("stock", &filter, window)?;
                let guard = table.obtain_lock(&key).await?;
                let page = match cache.get::<u64>("stock", &filter, window).await? {
                    Some(page) => page,
                    None => {
                        computed.fetch_add(1, Ordering::SeqCst);
                        let page = numbered_page(window, 20);
                        cache.set("stock", &filter, window, &page).await?;
                        page
                    }
                };
                guard.release().await?;
                Ok(page)
            })
        })
        .collect();

    for reader in readers {
        let page = reader.await.expect("join").expect("reader should succeed");
        assert_eq!(page.rows, vec![0, 1, 2, 3, 4]);
    }
    assert_eq!(computed.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_serial_queue_orders_cache_writes() {
    let cache = page_cache(memory_store());
    let queue = SerialTaskQueue::new();
    let filter = json!({});
    let window = PageWindow::new(2, 0);

    let write = {
        let cache = cache.clone();
        let filter = filter.clone();
        queue.push("stock", "write", move || async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cache
                .set("stock", &filter, window, &numbered_page(window, 2))
                .await
        })
    };
    let invalidate = {
        let cache = cache.clone();
        queue.push("stock", "invalidate", move || async move { cache.bump("stock").await })
    };

    assert!(write.await.unwrap());
    assert_eq!(invalidate.await.unwrap(), 2);
    assert!(cache.get::<u64>("stock", &filter, window).await.unwrap().is_none());
}
