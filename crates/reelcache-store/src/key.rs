//! Cache key derivation.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Deterministic cache key for a source URL.
///
/// The key is the lowercase hex SHA-256 of the URL string, so the same URL
/// maps to the same file name across process restarts and the name is always
/// safe to use on any filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a URL.
    pub fn from_url(url: &str) -> Self {
        let digest = Sha256::digest(url.as_bytes());
        Self(hex::encode(digest))
    }

    /// Parse a key back from a cache file stem. Returns `None` if the stem is
    /// not a 64-character hex digest.
    pub fn from_file_stem(stem: &str) -> Option<Self> {
        let valid = stem.len() == 64 && stem.chars().all(|c| c.is_ascii_hexdigit());
        valid.then(|| Self(stem.to_ascii_lowercase()))
    }

    /// File name for this key with the given (already normalized) extension.
    pub fn file_name(&self, extension: &str) -> String {
        format!("{}.{}", self.0, extension)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
