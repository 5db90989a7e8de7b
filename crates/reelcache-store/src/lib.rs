//! Reelcache-Store: content-addressed on-disk cache for downloaded videos.
//!
//! Entries are plain files named `{sha256(url)}.{extension}` inside a single
//! cache directory. There is no index: existence is checked by probing the
//! path directly, so the store survives process restarts without any
//! bookkeeping.
//!
//! - [`CacheKey`]: deterministic key derived from a source URL
//! - [`CacheStore`]: lookup, atomic store, removal, listing
//! - [`EvictionPolicy`]: size and age bounds, least-recently-used first
//!
//! # Examples
//!
//! ```
//! use reelcache_store::{CacheKey, CacheStore, EvictionPolicy};
//!
//! let dir = tempfile::tempdir().unwrap();
//! let store = CacheStore::open(dir.path(), EvictionPolicy::unbounded()).unwrap();
//! let key = CacheKey::from_url("https://cdn.example.com/v/1.mp4");
//!
//! assert!(store.lookup(&key, "mp4").is_none());
//! let entry = store.store(&key, b"video bytes", "mp4").unwrap();
//! assert_eq!(std::fs::read(&entry.path).unwrap(), b"video bytes");
//! ```

pub mod eviction;
pub mod key;
pub mod store;

pub use eviction::{EvictionPolicy, EvictionReport};
pub use key::CacheKey;
pub use store::{CacheEntry, CacheStore};
