//! Test doubles for the streaming pipeline.
//!
//! [`ScriptedTransport`] replaces the network: each fetch is either answered
//! from a canned body or driven step by step through a [`FetchScript`].
//! [`RecordingPlayer`] records what the controller asked the player to do.

use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use reelcache_common::{ContentInfo, FetchError, VideoGravity};
use reqwest::Url;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use super::player::{Player, PlayerSource};
use super::transport::{FetchEvent, Transport};

enum Mode {
    Canned {
        body: Bytes,
        content_type: String,
        chunk_size: usize,
    },
    Scripted,
}

/// Handle for feeding events into one scripted fetch.
#[derive(Debug, Clone)]
pub struct FetchScript {
    url: Url,
    tx: mpsc::UnboundedSender<FetchEvent>,
}

impl FetchScript {
    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn headers(&self, content_type: &str, content_length: Option<u64>) {
        let info = ContentInfo::new(Some(content_type.to_string()), content_length);
        let _ = self.tx.send(FetchEvent::HeadersReceived(info));
    }

    pub fn chunk(&self, bytes: &[u8]) {
        let _ = self
            .tx
            .send(FetchEvent::ChunkReceived(Bytes::copy_from_slice(bytes)));
    }

    pub fn complete(&self) {
        let _ = self.tx.send(FetchEvent::Completed(Ok(())));
    }

    pub fn fail(&self, error: FetchError) {
        let _ = self.tx.send(FetchEvent::Completed(Err(error)));
    }

    /// Whether the fetch side has gone away (task finished or cancelled).
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// In-memory transport for tests.
pub struct ScriptedTransport {
    mode: Mode,
    scripts: Mutex<Vec<FetchScript>>,
}

impl ScriptedTransport {
    /// Every fetch immediately serves `body` in `chunk_size` pieces.
    pub fn canned(body: impl Into<Bytes>, content_type: &str, chunk_size: usize) -> Self {
        Self {
            mode: Mode::Canned {
                body: body.into(),
                content_type: content_type.to_string(),
                chunk_size: chunk_size.max(1),
            },
            scripts: Mutex::new(Vec::new()),
        }
    }

    /// Every fetch waits for events pushed through its [`FetchScript`].
    pub fn scripted() -> Self {
        Self {
            mode: Mode::Scripted,
            scripts: Mutex::new(Vec::new()),
        }
    }

    /// Number of fetches started so far.
    pub fn fetch_count(&self) -> usize {
        self.scripts.lock().len()
    }

    /// URLs fetched, in order.
    pub fn fetched_urls(&self) -> Vec<Url> {
        self.scripts.lock().iter().map(|s| s.url.clone()).collect()
    }

    /// Script for the `index`-th fetch.
    pub fn script(&self, index: usize) -> Option<FetchScript> {
        self.scripts.lock().get(index).cloned()
    }

    /// Wait until at least `count` fetches were started.
    pub async fn wait_for_fetches(&self, count: usize) {
        while self.fetch_count() < count {
            tokio::task::yield_now().await;
        }
    }
}

impl Transport for ScriptedTransport {
    fn fetch(&self, url: Url) -> BoxStream<'static, FetchEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        let script = FetchScript { url, tx };

        if let Mode::Canned {
            body,
            content_type,
            chunk_size,
        } = &self.mode
        {
            script.headers(content_type, Some(body.len() as u64));
            for start in (0..body.len()).step_by(*chunk_size) {
                let end = (start + chunk_size).min(body.len());
                script.chunk(&body[start..end]);
            }
            script.complete();
        }

        self.scripts.lock().push(script);
        UnboundedReceiverStream::new(rx).boxed()
    }
}

/// A transport whose streams never yield anything.
#[derive(Debug, Default)]
pub struct SilentTransport;

impl Transport for SilentTransport {
    fn fetch(&self, _url: Url) -> BoxStream<'static, FetchEvent> {
        stream::pending().boxed()
    }
}

/// What a [`RecordingPlayer`] was asked to do.
#[derive(Debug, Clone, PartialEq)]
pub enum PlayerCall {
    LoadLocal(std::path::PathBuf, VideoGravity),
    LoadIntercepted(Url, VideoGravity),
    SetLooping(bool),
    Unload,
    SeekToStart,
    Play,
    Pause,
}

/// Player that records calls and keeps the last intercepted source around so
/// tests can schedule loading requests against it.
#[derive(Clone, Default)]
pub struct RecordingPlayer {
    calls: Arc<Mutex<Vec<PlayerCall>>>,
    source: Arc<Mutex<Option<PlayerSource>>>,
}

impl RecordingPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<PlayerCall> {
        self.calls.lock().clone()
    }

    /// The currently loaded source, if any.
    pub fn source(&self) -> Option<PlayerSource> {
        self.source.lock().clone()
    }
}

impl Player for RecordingPlayer {
    fn load(&mut self, source: PlayerSource, gravity: VideoGravity) {
        let call = match &source {
            PlayerSource::Local(path) => PlayerCall::LoadLocal(path.clone(), gravity),
            PlayerSource::Intercepted { url, .. } => PlayerCall::LoadIntercepted(url.clone(), gravity),
        };
        self.calls.lock().push(call);
        *self.source.lock() = Some(source);
    }

    fn set_looping(&mut self, looping: bool) {
        self.calls.lock().push(PlayerCall::SetLooping(looping));
    }

    fn unload(&mut self) {
        self.calls.lock().push(PlayerCall::Unload);
        *self.source.lock() = None;
    }

    fn seek_to_start(&mut self) {
        self.calls.lock().push(PlayerCall::SeekToStart);
    }

    fn play(&mut self) {
        self.calls.lock().push(PlayerCall::Play);
    }

    fn pause(&mut self) {
        self.calls.lock().push(PlayerCall::Pause);
    }
}
