use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use reelcache_store::{CacheStore, EvictionPolicy};

use crate::streaming::{PlaybackOptions, DEFAULT_REDIRECT_SCHEME};

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    #[serde(default)]
    pub playback: PlaybackConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// Directory holding cached videos (tilde is expanded)
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Size bound for the whole cache in bytes (0 = unbounded)
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,

    /// Entries untouched for longer than this are evicted (0 = keep forever)
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("~/.cache/reelcache")
}

fn default_max_bytes() -> u64 {
    512 * 1024 * 1024
}

fn default_max_age_secs() -> u64 {
    7 * 24 * 60 * 60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_bytes: default_max_bytes(),
            max_age_secs: default_max_age_secs(),
        }
    }
}

impl CacheConfig {
    /// Cache directory with `~` expanded.
    pub fn resolved_dir(&self) -> PathBuf {
        let raw = self.dir.to_string_lossy();
        PathBuf::from(shellexpand::tilde(raw.as_ref()).as_ref())
    }

    pub fn eviction_policy(&self) -> EvictionPolicy {
        let max_age = (self.max_age_secs > 0).then(|| Duration::from_secs(self.max_age_secs));
        EvictionPolicy::new(self.max_bytes, max_age)
    }

    /// Open (and create) the cache directory with this policy.
    pub fn open_store(&self) -> Result<CacheStore> {
        let dir = self.resolved_dir();
        CacheStore::open(&dir, self.eviction_policy())
            .with_context(|| format!("Failed to open cache directory: {:?}", dir))
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// Maximum silence between two network events before the fetch fails
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Private scheme given to the player on a cache miss
    #[serde(default = "default_redirect_scheme")]
    pub redirect_scheme: String,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_redirect_scheme() -> String {
    DEFAULT_REDIRECT_SCHEME.to_string()
}

fn default_user_agent() -> String {
    concat!("reelcache/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            redirect_scheme: default_redirect_scheme(),
            user_agent: default_user_agent(),
        }
    }
}

impl FetchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PlaybackConfig {
    /// Extension used when the feed item does not carry one
    #[serde(default = "default_extension")]
    pub default_extension: String,

    /// Loop videos when they reach the end (default: true)
    #[serde(default = "default_looping")]
    pub looping: bool,

    /// Size of the headless player's first info+data request
    #[serde(default = "default_probe_bytes")]
    pub probe_bytes: u64,

    /// Size of the headless player's follow-up data requests
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,
}

fn default_extension() -> String {
    "mp4".to_string()
}

fn default_looping() -> bool {
    true
}

fn default_probe_bytes() -> u64 {
    2
}

fn default_chunk_size() -> u64 {
    256 * 1024
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            default_extension: default_extension(),
            looping: default_looping(),
            probe_bytes: default_probe_bytes(),
            chunk_size: default_chunk_size(),
        }
    }
}

impl From<&Config> for PlaybackOptions {
    fn from(config: &Config) -> Self {
        Self {
            redirect_scheme: config.fetch.redirect_scheme.to_ascii_lowercase(),
            default_extension: config.playback.default_extension.clone(),
            looping: config.playback.looping,
            idle_timeout: config.fetch.timeout(),
        }
    }
}
