//! Versioned pagination cache.

pub mod fingerprint;
mod page_cache;
mod registry;

pub use fingerprint::{cache_key_for, canonical_filter, filter_fingerprint};
pub use page_cache::{DatasetCache, PageWindow, VersionedPageCache};
pub use registry::PageCacheRegistry;
