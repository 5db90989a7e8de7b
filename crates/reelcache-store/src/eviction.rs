//! Eviction policy for the on-disk cache.
//!
//! Expired entries go first, then the least-recently-used entries (oldest
//! modification time) until the store fits within its byte budget.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use std::time::Duration;

use crate::store::CacheEntry;

/// Bounds applied to the cache directory after every store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EvictionPolicy {
    /// Maximum total bytes to keep on disk. `0` disables the size bound.
    pub max_bytes: u64,
    /// Entries not used for longer than this are removed.
    pub max_age: Option<Duration>,
}

impl EvictionPolicy {
    pub fn new(max_bytes: u64, max_age: Option<Duration>) -> Self {
        Self { max_bytes, max_age }
    }

    /// A policy that never evicts anything.
    pub fn unbounded() -> Self {
        Self {
            max_bytes: 0,
            max_age: None,
        }
    }

    fn is_expired(&self, entry: &CacheEntry, now: DateTime<Utc>) -> bool {
        let Some(max_age) = self.max_age else {
            return false;
        };
        let age = now.signed_duration_since(entry.modified);
        age.to_std().map(|age| age > max_age).unwrap_or(false)
    }

    /// Pick the entries to remove, returned as indices into `entries`.
    ///
    /// The entry at `keep` (usually the one just written) is never selected.
    pub fn plan(&self, entries: &[CacheEntry], now: DateTime<Utc>, keep: Option<&Path>) -> Vec<usize> {
        let kept = |entry: &CacheEntry| keep.is_some_and(|p| entry.path == p);

        let mut victims: Vec<usize> = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| !kept(e) && self.is_expired(e, now))
            .map(|(i, _)| i)
            .collect();

        if self.max_bytes == 0 {
            return victims;
        }

        let mut total: u64 = entries
            .iter()
            .enumerate()
            .filter(|(i, _)| !victims.contains(i))
            .map(|(_, e)| e.size)
            .sum();

        if total <= self.max_bytes {
            return victims;
        }

        let mut by_age: Vec<usize> = (0..entries.len())
            .filter(|i| !victims.contains(i) && !kept(&entries[*i]))
            .collect();
        by_age.sort_by_key(|i| entries[*i].modified);

        for i in by_age {
            if total <= self.max_bytes {
                break;
            }
            total = total.saturating_sub(entries[i].size);
            victims.push(i);
        }

        victims
    }
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        // 512 MiB, 7 days
        Self::new(512 * 1024 * 1024, Some(Duration::from_secs(60 * 60 * 24 * 7)))
    }
}

/// Summary of one eviction pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub removed: usize,
    pub freed_bytes: u64,
    pub remaining_bytes: u64,
}
