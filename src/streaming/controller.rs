//! Playback session controller.
//!
//! One controller drives one player (one feed cell). Each `configure` starts
//! a new playback session: the cache is checked first and a hit is played
//! straight from disk. On a miss the player is pointed at a redirected URL
//! served by a [`ResourceInterceptor`], whose single fetch feeds both the
//! player and the cache.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use reelcache_common::paths::normalize_extension;
use reelcache_common::{Dimensions, PlaybackError, SessionId, VideoGravity};
use reelcache_store::{CacheKey, CacheStore};
use reqwest::Url;
use serde::Serialize;

use super::fetch::{cache_key, FetchContext, FetchOutcome};
use super::interceptor::{ResourceInterceptor, DEFAULT_REDIRECT_SCHEME};
use super::player::{Player, PlayerSource, ResourceLoader};
use super::transport::Transport;

/// Where a controller is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    Idle,
    CacheLookupPending,
    LocalPlayback,
    RemoteStreaming,
    Disposed,
}

impl PlaybackState {
    fn is_loaded(self) -> bool {
        matches!(self, Self::LocalPlayback | Self::RemoteStreaming)
    }
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::CacheLookupPending => "cache_lookup_pending",
            Self::LocalPlayback => "local_playback",
            Self::RemoteStreaming => "remote_streaming",
            Self::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Settings a controller applies to every session.
#[derive(Debug, Clone)]
pub struct PlaybackOptions {
    pub redirect_scheme: String,
    pub default_extension: String,
    pub looping: bool,
    pub idle_timeout: Duration,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            redirect_scheme: DEFAULT_REDIRECT_SCHEME.to_string(),
            default_extension: "mp4".to_string(),
            looping: true,
            idle_timeout: Duration::from_secs(60),
        }
    }
}

/// Drives one player through cache lookup, streaming and teardown.
pub struct PlaybackController<P: Player> {
    player: P,
    store: Arc<CacheStore>,
    transport: Arc<dyn Transport>,
    options: PlaybackOptions,
    state: PlaybackState,
    session_id: Option<SessionId>,
    interceptor: Option<Arc<ResourceInterceptor>>,
}

impl<P: Player> PlaybackController<P> {
    pub fn new(
        player: P,
        store: Arc<CacheStore>,
        transport: Arc<dyn Transport>,
        options: PlaybackOptions,
    ) -> Self {
        Self {
            player,
            store,
            transport,
            options,
            state: PlaybackState::Idle,
            session_id: None,
            interceptor: None,
        }
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Identifier of the current (or last) playback session.
    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    pub fn player(&self) -> &P {
        &self.player
    }

    pub fn player_mut(&mut self) -> &mut P {
        &mut self.player
    }

    pub fn options(&self) -> &PlaybackOptions {
        &self.options
    }

    /// Interceptor of the current streaming session.
    pub fn interceptor(&self) -> Option<&Arc<ResourceInterceptor>> {
        self.interceptor.as_ref()
    }

    /// Start a playback session for `url`.
    ///
    /// Any previous session is torn down first. `extension` falls back to the
    /// configured default and names the cache file for both lookup and store.
    pub async fn configure(
        &mut self,
        url: &str,
        extension: Option<&str>,
        dimensions: Dimensions,
    ) -> Result<PlaybackState, PlaybackError> {
        self.release_session();

        let url = Url::parse(url).map_err(|e| PlaybackError::invalid_url(format!("{}: {}", url, e)))?;
        if url.scheme().eq_ignore_ascii_case(&self.options.redirect_scheme) {
            return Err(PlaybackError::invalid_url(format!(
                "{} already uses the redirect scheme",
                url
            )));
        }

        let extension = normalize_extension(extension, &self.options.default_extension);
        let gravity = dimensions.gravity();
        let session_id = SessionId::new();
        self.session_id = Some(session_id);
        self.state = PlaybackState::CacheLookupPending;

        let key = cache_key(&url);
        let cached = {
            let store = Arc::clone(&self.store);
            let key = key.clone();
            let extension = extension.clone();
            tokio::task::spawn_blocking(move || store.lookup(&key, &extension))
                .await
                .unwrap_or_else(|e| {
                    tracing::warn!(session_id = %session_id, error = %e, "Cache lookup task failed");
                    None
                })
        };

        match cached {
            Some(entry) => {
                tracing::info!(
                    session_id = %session_id,
                    url = %url,
                    key = %key,
                    bytes = entry.size,
                    "Cache hit, playing local file"
                );
                self.player.load(PlayerSource::Local(entry.path), gravity);
                self.state = PlaybackState::LocalPlayback;
            }
            None => {
                if let Err(e) = self.start_streaming(session_id, &url, &key, extension, gravity) {
                    tracing::warn!(session_id = %session_id, url = %url, error = %e, "Failed to start streaming");
                    self.session_id = None;
                    self.state = PlaybackState::Idle;
                    return Err(e);
                }
                self.state = PlaybackState::RemoteStreaming;
            }
        }

        self.player.set_looping(self.options.looping);
        Ok(self.state)
    }

    /// End the session: stop the fetch, finish pending reads, unload the
    /// player. Safe to call any number of times.
    pub fn cancel(&mut self) {
        if self.state == PlaybackState::Disposed {
            return;
        }
        self.release_session();
        self.state = PlaybackState::Disposed;
    }

    /// Seek to the start and play again.
    pub fn replay(&mut self) -> Result<(), PlaybackError> {
        if !self.state.is_loaded() {
            return Err(PlaybackError::Disposed);
        }
        self.player.seek_to_start();
        self.player.play();
        Ok(())
    }

    pub fn play(&mut self) {
        if self.state.is_loaded() {
            self.player.play();
        }
    }

    pub fn pause(&mut self) {
        if self.state.is_loaded() {
            self.player.pause();
        }
    }

    /// Wait for the current download to finish. `None` when nothing is
    /// being downloaded (cache hit, idle or disposed).
    pub async fn wait_for_download(&self) -> Option<FetchOutcome> {
        let session = self.interceptor.as_ref()?.session()?;
        Some(session.wait().await)
    }

    /// Build the interceptor, start its fetch and load the redirected URL.
    /// The player is only touched once everything else succeeded.
    fn start_streaming(
        &mut self,
        session_id: SessionId,
        url: &Url,
        key: &CacheKey,
        extension: String,
        gravity: VideoGravity,
    ) -> Result<(), PlaybackError> {
        let ctx = FetchContext {
            transport: Arc::clone(&self.transport),
            store: Arc::clone(&self.store),
            idle_timeout: self.options.idle_timeout,
            runtime: tokio::runtime::Handle::current(),
        };
        let interceptor = Arc::new(ResourceInterceptor::new(
            url.clone(),
            &self.options.redirect_scheme,
            extension,
            ctx,
        )?);
        // Start the shared fetch now; player reads join it
        interceptor.ensure_session()?;

        tracing::info!(
            session_id = %session_id,
            url = %url,
            key = %key,
            redirect = %interceptor.redirected_url(),
            "Cache miss, streaming"
        );

        let loader: Arc<dyn ResourceLoader> = interceptor.clone();
        let source = PlayerSource::Intercepted {
            url: interceptor.redirected_url().clone(),
            loader,
        };
        self.interceptor = Some(interceptor);
        self.player.load(source, gravity);
        Ok(())
    }

    fn release_session(&mut self) {
        if let Some(interceptor) = self.interceptor.take() {
            interceptor.cancel();
        }
        if self.state.is_loaded() {
            self.player.unload();
        }
        if let Some(session_id) = self.session_id {
            if self.state != PlaybackState::Idle && self.state != PlaybackState::Disposed {
                tracing::debug!(session_id = %session_id, state = %self.state, "Released playback session");
            }
        }
        if self.state != PlaybackState::Disposed {
            self.state = PlaybackState::Idle;
        }
    }
}

impl<P: Player> Drop for PlaybackController<P> {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl<P: Player> fmt::Debug for PlaybackController<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PlaybackController")
            .field("state", &self.state)
            .field("session_id", &self.session_id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
