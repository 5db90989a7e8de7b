//! Streaming cache-and-playback pipeline.
//!
//! A cache miss is served by one download that feeds two consumers: the
//! player, whose range reads are answered from the bytes received so far,
//! and the cache store, which gets the whole asset once the download ends.
//!
//! # Flow
//!
//! - [`PlaybackController::configure`] looks the URL up in the cache
//! - Hit: the player loads the local file, no network involved
//! - Miss: the player loads a redirected URL and hands its reads to a
//!   [`ResourceInterceptor`], which owns the [`FetchSession`]
//! - The fetch appends chunks to a [`ByteAccumulator`] and re-runs the
//!   [`RequestQueue`] after every event

mod accumulator;
mod controller;
mod fetch;
mod interceptor;
mod player;
mod queue;
mod request;
// Scripted network and recording player for tests, not end-user API
#[doc(hidden)]
pub mod testing;
mod transport;

pub use accumulator::ByteAccumulator;
pub use controller::{PlaybackController, PlaybackOptions, PlaybackState};
pub use fetch::{cache_key, FetchContext, FetchOutcome, FetchPhase, FetchSession};
pub use interceptor::{redirect_url, restore_url, ResourceInterceptor, DEFAULT_REDIRECT_SCHEME};
pub use player::{Player, PlayerSource, ResourceLoader};
pub use queue::RequestQueue;
pub use request::{
    Completion, DataRange, LoadingEvent, LoadingRequest, RequestEvents, RequestId, RequestKind,
    RequestOutcome,
};
pub use transport::{FetchEvent, HttpTransport, Transport};
