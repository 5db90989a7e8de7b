//! Filesystem-backed cache store.
//!
//! Organizes downloaded videos as `{root}/{key}.{extension}`. Writes go to a
//! temporary file in the same directory and are renamed into place, so a
//! reader probing the path sees either the previous complete file or the new
//! complete file, never a partial one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use reelcache_common::{CacheError, CacheResult};
use serde::Serialize;
use walkdir::WalkDir;

use crate::eviction::{EvictionPolicy, EvictionReport};
use crate::key::CacheKey;

/// Prefix used for in-flight temporary files.
const TEMP_PREFIX: &str = ".incoming-";

/// A complete cached video on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub extension: String,
    /// Absolute path of the cached file.
    pub path: PathBuf,
    /// Size of the file in bytes.
    pub size: u64,
    /// Last modification (or last use) time; drives LRU eviction.
    pub modified: DateTime<Utc>,
}

impl CacheEntry {
    /// Entry for a file this store owns: a key-shaped stem with an
    /// extension. Temporary files and unrelated names give `None`.
    fn from_path(path: &Path) -> Option<Self> {
        if is_temp_file(path) {
            return None;
        }
        let stem = path.file_stem()?.to_str()?;
        let extension = path.extension()?.to_str()?.to_string();
        let key = CacheKey::from_file_stem(stem)?;
        let metadata = fs::metadata(path).ok()?;
        if !metadata.is_file() {
            return None;
        }
        let modified = metadata.modified().unwrap_or_else(|_| SystemTime::now());

        Some(Self {
            key,
            extension,
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: DateTime::<Utc>::from(modified),
        })
    }
}

/// Content-addressed store for completed downloads.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: PathBuf,
    policy: EvictionPolicy,
}

impl CacheStore {
    /// Open (and create if needed) a cache rooted at `root`.
    pub fn open(root: impl Into<PathBuf>, policy: EvictionPolicy) -> CacheResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        tracing::debug!(root = %root.display(), "Opened cache store");
        Ok(Self { root, policy })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> EvictionPolicy {
        self.policy
    }

    /// Deterministic path for a key and extension, whether or not it exists.
    pub fn path_for(&self, key: &CacheKey, extension: &str) -> PathBuf {
        self.root.join(key.file_name(extension))
    }

    /// Probe for a cached entry.
    ///
    /// A hit refreshes the file's modification time so that eviction treats
    /// it as recently used.
    pub fn lookup(&self, key: &CacheKey, extension: &str) -> Option<CacheEntry> {
        let path = self.path_for(key, extension);
        if !path.is_file() {
            return None;
        }

        if let Err(e) = touch(&path) {
            tracing::debug!(path = %path.display(), error = %e, "Failed to refresh cache entry mtime");
        }

        CacheEntry::from_path(&path)
    }

    /// Like [`lookup`](Self::lookup) but reports a miss as
    /// [`CacheError::NotFound`].
    pub fn get(&self, key: &CacheKey, extension: &str) -> CacheResult<CacheEntry> {
        self.lookup(key, extension)
            .ok_or_else(|| CacheError::not_found(key.file_name(extension)))
    }

    /// Write `bytes` as the entry for `key`, replacing any previous entry.
    pub fn store(&self, key: &CacheKey, bytes: &[u8], extension: &str) -> CacheResult<CacheEntry> {
        let path = self.path_for(key, extension);

        let mut temp = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .tempfile_in(&self.root)
            .map_err(|e| CacheError::write_failure(&path, e))?;
        temp.write_all(bytes)
            .and_then(|_| temp.as_file().sync_all())
            .map_err(|e| CacheError::write_failure(&path, e))?;
        temp.persist(&path)
            .map_err(|e| CacheError::write_failure(&path, e.error))?;

        tracing::info!(
            key = %key,
            bytes = bytes.len(),
            path = %path.display(),
            "Stored video in cache"
        );

        match self.evict_except(Some(&path)) {
            Ok(report) if report.removed > 0 => {
                tracing::info!(
                    removed = report.removed,
                    freed_bytes = report.freed_bytes,
                    "Evicted cache entries"
                );
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(error = %e, "Cache eviction failed"),
        }

        CacheEntry::from_path(&path).ok_or_else(|| {
            CacheError::write_failure(
                &path,
                std::io::Error::new(std::io::ErrorKind::NotFound, "entry vanished after write"),
            )
        })
    }

    /// Remove a single entry. Returns whether a file was removed.
    pub fn remove(&self, key: &CacheKey, extension: &str) -> CacheResult<bool> {
        let path = self.path_for(key, extension);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// List every complete entry in the cache directory.
    pub fn entries(&self) -> CacheResult<Vec<CacheEntry>> {
        let mut entries = Vec::new();

        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(cache_entry) = CacheEntry::from_path(entry.path()) {
                entries.push(cache_entry);
            }
        }

        Ok(entries)
    }

    /// Total bytes held by complete entries.
    pub fn total_size(&self) -> CacheResult<u64> {
        Ok(self.entries()?.iter().map(|e| e.size).sum())
    }

    /// Remove every entry (and stale temporary files). Returns the number of
    /// entries removed.
    pub fn clear(&self) -> CacheResult<usize> {
        let mut removed = 0;

        for entry in WalkDir::new(&self.root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let is_temp = is_temp_file(path);

            if is_temp || CacheEntry::from_path(path).is_some() {
                fs::remove_file(path)?;
                if !is_temp {
                    removed += 1;
                }
            }
        }

        tracing::info!(removed, root = %self.root.display(), "Cleared cache");
        Ok(removed)
    }

    /// Apply the eviction policy to the whole cache.
    pub fn evict(&self) -> CacheResult<EvictionReport> {
        self.evict_except(None)
    }

    fn evict_except(&self, keep: Option<&Path>) -> CacheResult<EvictionReport> {
        let entries = self.entries()?;
        let victims = self.policy.plan(&entries, Utc::now(), keep);

        let mut report = EvictionReport::default();
        for i in &victims {
            let entry = &entries[*i];
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    report.removed += 1;
                    report.freed_bytes += entry.size;
                    tracing::debug!(key = %entry.key, size = entry.size, "Evicted cache entry");
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        let total: u64 = entries.iter().map(|e| e.size).sum();
        report.remaining_bytes = total.saturating_sub(report.freed_bytes);
        Ok(report)
    }
}

fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(TEMP_PREFIX))
}

fn touch(path: &Path) -> std::io::Result<()> {
    let file = fs::File::options().write(true).open(path)?;
    file.set_modified(SystemTime::now())
}
