//! Latchkey Storage - Store Contract, Atomic Scripts and Page Cache
//!
//! Defines the key-value store abstraction latchkey coordinates through,
//! the atomic counter/TTL operations built on its scripts, and the
//! versioned pagination cache.

pub mod atomic;
pub mod cache;
pub mod store;

pub use atomic::{AtomicOpRunner, TtlRefresh};
pub use cache::{DatasetCache, PageCacheRegistry, PageWindow, VersionedPageCache};
pub use store::{
    AtomicScript, CompareOp, ExpireOptions, ExpirePolicy, InMemoryKeyValueStore, KeyValueStore,
    ScriptReply, SetOptions, SetPolicy, TtlStatus,
};
