//! Seams to the external video player.
//!
//! The player owns decoding, rendering and read scheduling. This crate only
//! tells it what to load, and, when streaming, hands it a [`ResourceLoader`]
//! to which it delegates every read of the redirected URL.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use reelcache_common::VideoGravity;
use reqwest::Url;

use super::request::{LoadingRequest, RequestId};

/// Interception protocol the player calls into for redirected URLs.
pub trait ResourceLoader: Send + Sync {
    /// Offer a loading request. Returning `true` means this loader will
    /// answer it; `false` means the player has to load it some other way.
    fn on_schedule(&self, request: LoadingRequest) -> bool;

    /// The player no longer needs the request (seek, teardown).
    fn on_cancel(&self, id: RequestId);
}

/// What the player should play.
#[derive(Clone)]
pub enum PlayerSource {
    /// A complete file in the local cache.
    Local(PathBuf),
    /// A redirected URL whose reads go through `loader`.
    Intercepted {
        url: Url,
        loader: Arc<dyn ResourceLoader>,
    },
}

impl fmt::Debug for PlayerSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => f.debug_tuple("Local").field(path).finish(),
            Self::Intercepted { url, .. } => f
                .debug_struct("Intercepted")
                .field("url", &url.as_str())
                .finish_non_exhaustive(),
        }
    }
}

/// Playback transport controlled by the session controller.
pub trait Player: Send {
    /// Replace the current item with `source`.
    fn load(&mut self, source: PlayerSource, gravity: VideoGravity);

    /// Loop the current item when it reaches the end.
    fn set_looping(&mut self, looping: bool);

    /// Drop the current item and release everything tied to it.
    fn unload(&mut self);

    fn seek_to_start(&mut self);

    fn play(&mut self);

    fn pause(&mut self);
}
