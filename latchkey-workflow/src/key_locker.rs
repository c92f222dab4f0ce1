//! Lease-guarded key locks.
//!
//! Each `KeyLocker` publishes its `LockStatus` on a `watch` channel.
//! Acquisition is a test-and-set inside `send_if_modified`, so of several
//! waiters woken by one release exactly one wins; the others go back to
//! waiting. Every acquisition carries a generation. Releases and lease
//! expiries only unlock their own generation, so a holder whose lease has
//! lapsed cannot free its successor's lock.
//!
//! The lock is process-local. Remote backing would replace the watch
//! channel with a compare-and-set key in the shared store.

use crate::delayed_task::{DelayedTask, DelayedTaskOptions};
use crate::registry::TaskRegistry;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use latchkey_core::{LatchkeyResult, LockConfig, LockError};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;

/// Snapshot of a lock broadcast to waiters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockStatus {
    pub is_locked: bool,
    pub last_action: DateTime<Utc>,
    /// Incremented on every acquisition.
    pub generation: u64,
}

impl LockStatus {
    fn unlocked() -> Self {
        Self {
            is_locked: false,
            last_action: Utc::now(),
            generation: 0,
        }
    }
}

/// Unlock only if `generation` still holds the lock.
fn unlock_generation(state: &watch::Sender<LockStatus>, generation: u64) -> bool {
    state.send_if_modified(|status| {
        if !status.is_locked || status.generation != generation {
            return false;
        }
        status.is_locked = false;
        status.last_action = Utc::now();
        true
    })
}

// ============================================================================
// KEY LOCKER
// ============================================================================

/// Single-holder lock for one name.
pub struct KeyLocker {
    name: String,
    state: Arc<watch::Sender<LockStatus>>,
    registry: Arc<dyn TaskRegistry>,
    lease_ttl: Duration,
}

impl KeyLocker {
    pub fn new(
        name: impl Into<String>,
        registry: Arc<dyn TaskRegistry>,
        config: &LockConfig,
    ) -> Self {
        let (state, _) = watch::channel(LockStatus::unlocked());
        Self {
            name: name.into(),
            state: Arc::new(state),
            registry,
            lease_ttl: config.lease_ttl,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    pub fn status(&self) -> LockStatus {
        *self.state.borrow()
    }

    pub fn is_locked(&self) -> bool {
        self.state.borrow().is_locked
    }

    /// Watch lock transitions.
    pub fn subscribe(&self) -> watch::Receiver<LockStatus> {
        self.state.subscribe()
    }

    fn try_acquire(&self) -> Option<u64> {
        let mut acquired = None;
        self.state.send_if_modified(|status| {
            if status.is_locked {
                return false;
            }
            status.is_locked = true;
            status.generation += 1;
            status.last_action = Utc::now();
            acquired = Some(status.generation);
            true
        });
        acquired
    }

    /// Wait until the lock is free, take it and register its lease.
    ///
    /// Fails with `LockError::Lease` if the registry rejects the lease; the
    /// lock is left unlocked in that case.
    pub async fn obtain_lock(&self) -> LatchkeyResult<LockGuard> {
        let mut rx = self.state.subscribe();
        loop {
            if let Some(generation) = self.try_acquire() {
                return self.grant(generation).await;
            }
            tracing::debug!(lock = %self.name, "Waiting for lock release");
            rx.wait_for(|status| !status.is_locked)
                .await
                .map_err(|_| LockError::Closed {
                    name: self.name.clone(),
                })?;
        }
    }

    /// Take the lock only if it is free right now.
    pub async fn try_obtain_lock(&self) -> LatchkeyResult<Option<LockGuard>> {
        match self.try_acquire() {
            Some(generation) => self.grant(generation).await.map(Some),
            None => Ok(None),
        }
    }

    /// `obtain_lock` bounded by `timeout`.
    pub async fn obtain_lock_within(&self, timeout: Duration) -> LatchkeyResult<LockGuard> {
        match tokio::time::timeout(timeout, self.obtain_lock()).await {
            Ok(result) => result,
            Err(_) => Err(LockError::WaitTimeout {
                name: self.name.clone(),
                waited: timeout,
            }
            .into()),
        }
    }

    async fn grant(&self, generation: u64) -> LatchkeyResult<LockGuard> {
        // Unlocks if this future is dropped or the lease fails.
        let pending = PendingGrant {
            state: &self.state,
            generation,
            armed: true,
        };

        let state = Arc::clone(&self.state);
        let name = self.name.clone();
        let lease_options = DelayedTaskOptions::new(self.lease_ttl, move || {
            if unlock_generation(&state, generation) {
                tracing::warn!(
                    lock = %name,
                    generation = generation,
                    "Lock lease expired, force-released"
                );
            }
        })
        .start_on_create();

        let lease = self
            .registry
            .register(lease_options)
            .await
            .map_err(|e| LockError::Lease {
                name: self.name.clone(),
                source: Box::new(e),
            })?;

        pending.disarm();
        tracing::debug!(lock = %self.name, generation = generation, "Lock obtained");

        Ok(LockGuard {
            name: self.name.clone(),
            generation,
            state: Arc::clone(&self.state),
            lease,
            registry: Arc::clone(&self.registry),
            released: false,
        })
    }
}

impl std::fmt::Debug for KeyLocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyLocker")
            .field("name", &self.name)
            .field("status", &self.status())
            .field("lease_ttl", &self.lease_ttl)
            .finish_non_exhaustive()
    }
}

struct PendingGrant<'a> {
    state: &'a watch::Sender<LockStatus>,
    generation: u64,
    armed: bool,
}

impl PendingGrant<'_> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PendingGrant<'_> {
    fn drop(&mut self) {
        if self.armed {
            unlock_generation(self.state, self.generation);
        }
    }
}

// ============================================================================
// LOCK GUARD
// ============================================================================

/// Proof of holding a lock. Releases on `release()` or on drop.
pub struct LockGuard {
    name: String,
    generation: u64,
    state: Arc<watch::Sender<LockStatus>>,
    lease: Arc<DelayedTask>,
    registry: Arc<dyn TaskRegistry>,
    released: bool,
}

impl LockGuard {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn lease(&self) -> &Arc<DelayedTask> {
        &self.lease
    }

    /// False once released or once the lease expired.
    pub fn is_held(&self) -> bool {
        let status = self.state.borrow();
        status.is_locked && status.generation == self.generation
    }

    /// Unlock now and drop the lease from the registry.
    pub async fn release(mut self) -> LatchkeyResult<()> {
        self.released = true;
        self.unlock_and_cancel();
        self.registry.remove_task_by_id(self.lease.id()).await?;
        Ok(())
    }

    fn unlock_and_cancel(&self) {
        if unlock_generation(&self.state, self.generation) {
            tracing::debug!(lock = %self.name, generation = self.generation, "Lock released");
        }
        self.lease.cancel();
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        self.unlock_and_cancel();

        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let registry = Arc::clone(&self.registry);
        let lease_id = self.lease.id().to_string();
        let name = self.name.clone();
        handle.spawn(async move {
            if let Err(e) = registry.remove_task_by_id(&lease_id).await {
                tracing::warn!(lock = %name, error = %e, "Failed to drop lock lease");
            }
        });
    }
}

impl std::fmt::Debug for LockGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockGuard")
            .field("name", &self.name)
            .field("generation", &self.generation)
            .field("lease_id", &self.lease.id())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// LOCK TABLE
// ============================================================================

/// Lazily creates one `KeyLocker` per lock name.
pub struct LockTable {
    lockers: DashMap<String, Arc<KeyLocker>>,
    registry: Arc<dyn TaskRegistry>,
    config: LockConfig,
}

impl LockTable {
    pub fn new(registry: Arc<dyn TaskRegistry>, config: LockConfig) -> Self {
        Self {
            lockers: DashMap::new(),
            registry,
            config,
        }
    }

    pub fn locker(&self, name: &str) -> Arc<KeyLocker> {
        self.lockers
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(KeyLocker::new(name, Arc::clone(&self.registry), &self.config))
            })
            .clone()
    }

    pub async fn obtain_lock(&self, name: &str) -> LatchkeyResult<LockGuard> {
        self.locker(name).obtain_lock().await
    }

    pub fn len(&self) -> usize {
        self.lockers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lockers.is_empty()
    }
}

impl std::fmt::Debug for LockTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockTable")
            .field("lockers", &self.lockers.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
