//! Shared test harness for integration tests.
//!
//! Provides [`TestHarness`] which owns a temporary cache directory, a
//! [`ScriptedTransport`] standing in for the network and a
//! [`RecordingPlayer`] standing in for the platform player.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use reelcache::streaming::testing::{RecordingPlayer, ScriptedTransport};
use reelcache::streaming::{
    cache_key, LoadingRequest, PlaybackController, PlaybackOptions, PlayerSource, RequestEvents,
    ResourceLoader, Transport,
};
use reelcache_store::{CacheStore, EvictionPolicy};
use reqwest::Url;
use tempfile::TempDir;

/// Test harness wrapping a cache store in a temp dir and scripted collaborators.
pub struct TestHarness {
    pub dir: TempDir,
    pub store: Arc<CacheStore>,
    pub transport: Arc<ScriptedTransport>,
    pub player: RecordingPlayer,
}

impl TestHarness {
    /// Harness whose fetches serve `body` immediately in `chunk_size` pieces.
    pub fn canned(body: &[u8], chunk_size: usize) -> Self {
        Self::with_transport(ScriptedTransport::canned(body.to_vec(), "video/mp4", chunk_size))
    }

    /// Harness whose fetches are driven by hand through `FetchScript`s.
    pub fn scripted() -> Self {
        Self::with_transport(ScriptedTransport::scripted())
    }

    pub fn with_transport(transport: ScriptedTransport) -> Self {
        let dir = tempfile::tempdir().expect("failed to create temp dir");
        let store = CacheStore::open(dir.path(), EvictionPolicy::unbounded())
            .expect("failed to open cache store");

        Self {
            dir,
            store: Arc::new(store),
            transport: Arc::new(transport),
            player: RecordingPlayer::new(),
        }
    }

    /// A controller wired to this harness' store, transport and player.
    pub fn controller(&self) -> PlaybackController<RecordingPlayer> {
        self.controller_with(self.transport.clone())
    }

    pub fn controller_with(
        &self,
        transport: Arc<dyn Transport>,
    ) -> PlaybackController<RecordingPlayer> {
        let options = PlaybackOptions {
            idle_timeout: Duration::from_secs(5),
            ..PlaybackOptions::default()
        };
        PlaybackController::new(self.player.clone(), self.store.clone(), transport, options)
    }

    /// Loader and redirected URL of the source the player was last given.
    pub fn intercepted(&self) -> (Url, Arc<dyn ResourceLoader>) {
        match self.player.source() {
            Some(PlayerSource::Intercepted { url, loader }) => (url, loader),
            other => panic!("player is not streaming: {:?}", other),
        }
    }

    /// Schedule a data read the way the player would.
    pub fn read(&self, offset: u64, length: u64) -> RequestEvents {
        let (url, loader) = self.intercepted();
        let (request, events) = LoadingRequest::data(url, offset, Some(length));
        assert!(loader.on_schedule(request), "loader declined the read");
        events
    }

    pub fn is_cached(&self, url: &str) -> bool {
        let url = Url::parse(url).expect("test URL");
        self.store.lookup(&cache_key(&url), "mp4").is_some()
    }
}

/// Deterministic fake video bytes.
pub fn video_bytes(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
