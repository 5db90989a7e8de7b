//! Error types used throughout reelcache.
//!
//! Errors are split by the layer that produces them: the on-disk cache store,
//! the network fetch, and the playback controller that ties both together.

use std::path::PathBuf;
use std::time::Duration;

/// Errors produced by the on-disk cache store.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Writing a completed download to disk failed.
    #[error("Failed to write cache entry {path:?}: {source}")]
    WriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// No entry exists for the key. This is a cache-miss signal.
    #[error("Cache entry not found: {0}")]
    NotFound(String),

    /// Any other I/O operation on the cache directory failed.
    #[error("Cache IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CacheError {
    /// Create a new NotFound error.
    pub fn not_found<S: Into<String>>(key: S) -> Self {
        Self::NotFound(key.into())
    }

    /// Create a new WriteFailure error for the given path.
    pub fn write_failure(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::WriteFailure {
            path: path.into(),
            source,
        }
    }

    /// Whether this error only signals a cache miss.
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Result type alias for cache store operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors produced by a network fetch session.
///
/// Cloneable so the terminal outcome of a fetch can be shared with every
/// observer of the session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The transport failed (connection reset, DNS, TLS, body read).
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status.
    #[error("Unexpected HTTP status: {0}")]
    Status(u16),

    /// No response event arrived within the idle timeout.
    #[error("Fetch timed out after {0:?}")]
    Timeout(Duration),

    /// A second fetch was started on a session that already has one.
    #[error("Fetch already active for this session")]
    AlreadyActive,

    /// The fetch was cancelled before it completed.
    #[error("Fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Create a new Network error.
    pub fn network<S: Into<String>>(msg: S) -> Self {
        Self::Network(msg.into())
    }
}

/// Errors surfaced by the playback controller.
#[derive(Debug, thiserror::Error)]
pub enum PlaybackError {
    /// The configured URL could not be parsed or redirected.
    #[error("Invalid video URL: {0}")]
    InvalidUrl(String),

    /// The operation requires an active session.
    #[error("Playback session is not active")]
    Disposed,

    /// Starting the backing fetch failed.
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl PlaybackError {
    /// Create a new InvalidUrl error.
    pub fn invalid_url<S: Into<String>>(msg: S) -> Self {
        Self::InvalidUrl(msg.into())
    }
}
