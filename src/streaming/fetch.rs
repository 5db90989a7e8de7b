//! Network fetch session.
//!
//! One fetch per playback session downloads the whole asset. Every event from
//! the transport is applied under the pipeline lock: headers are stored once,
//! chunks are appended to the accumulator, and after each step the request
//! queue is given another pass. On success the accumulated bytes are flushed
//! to the cache store; on failure or cancellation every pending request is
//! finished so the player never waits on bytes that will not come.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use parking_lot::Mutex;
use reelcache_common::{ContentInfo, FetchError};
use reelcache_store::{CacheEntry, CacheKey, CacheStore};
use reqwest::Url;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::accumulator::ByteAccumulator;
use super::queue::RequestQueue;
use super::request::{Completion, LoadingRequest, RequestId};
use super::transport::{FetchEvent, Transport};

/// Upper bound on buffer space reserved up front from an announced length.
const MAX_RESERVE: u64 = 256 * 1024 * 1024;

/// Cache key for a source URL.
///
/// Derived from the parsed URL so that spelling differences the parser
/// normalizes (scheme and host case, default port, empty path) share one
/// cache entry.
pub fn cache_key(url: &Url) -> CacheKey {
    CacheKey::from_url(url.as_str())
}

/// Everything a fetch session needs from its surroundings.
#[derive(Clone)]
pub struct FetchContext {
    pub transport: Arc<dyn Transport>,
    pub store: Arc<CacheStore>,
    /// Maximum time between two transport events.
    pub idle_timeout: Duration,
    /// Runtime the fetch task is spawned on; lets the player schedule reads
    /// from threads outside the runtime.
    pub runtime: tokio::runtime::Handle,
}

/// Terminal result of a fetch session.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchOutcome {
    /// Download finished and was written to the cache.
    Cached(CacheEntry),
    /// Download finished but was not cached.
    Uncached { bytes: u64, reason: String },
    Failed(FetchError),
    Cancelled,
}

impl FetchOutcome {
    pub fn is_cached(&self) -> bool {
        matches!(self, Self::Cached(_))
    }
}

/// Lifecycle of the download behind a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchPhase {
    Idle,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl FetchPhase {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

struct PipelineState {
    queue: RequestQueue,
    info: Option<ContentInfo>,
    phase: FetchPhase,
}

/// Accumulator, request queue and response metadata shared between the
/// fetch task and the player's scheduling calls.
struct Pipeline {
    accumulator: ByteAccumulator,
    state: Mutex<PipelineState>,
}

impl Pipeline {
    fn new() -> Self {
        Self {
            accumulator: ByteAccumulator::new(),
            state: Mutex::new(PipelineState {
                queue: RequestQueue::new(),
                info: None,
                phase: FetchPhase::Idle,
            }),
        }
    }

    fn admit(&self, mut request: LoadingRequest) {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        match state.phase {
            FetchPhase::Idle | FetchPhase::Streaming => {
                state.queue.enqueue(request);
                state
                    .queue
                    .process_pending(&self.accumulator, state.info.as_ref(), None);
            }
            FetchPhase::Completed => {
                // Everything there is to know is known: serve it or give up
                state.queue.enqueue(request);
                let total = self.accumulator.total_length();
                state
                    .queue
                    .process_pending(&self.accumulator, state.info.as_ref(), Some(total));
                state.queue.drain(Completion::Aborted);
            }
            FetchPhase::Failed | FetchPhase::Cancelled => {
                request.finish(Completion::Aborted);
            }
        }
    }

    fn cancel_request(&self, id: RequestId) -> bool {
        self.state.lock().queue.cancel(id)
    }

    fn set_streaming(&self) {
        let mut state = self.state.lock();
        if state.phase == FetchPhase::Idle {
            state.phase = FetchPhase::Streaming;
        }
    }

    fn on_headers(&self, info: ContentInfo) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.phase.is_terminal() {
            return;
        }
        if state.info.is_none() {
            if let Some(len) = info.content_length {
                self.accumulator.reserve(len.min(MAX_RESERVE) as usize);
            }
            state.info = Some(info);
        }
        state
            .queue
            .process_pending(&self.accumulator, state.info.as_ref(), None);
    }

    fn on_chunk(&self, chunk: &[u8]) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.phase.is_terminal() {
            return;
        }
        self.accumulator.append(chunk);
        state
            .queue
            .process_pending(&self.accumulator, state.info.as_ref(), None);
    }

    /// Serve the final pass and finish whatever the download could not satisfy.
    fn complete(&self) -> (u64, Option<u64>, usize) {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        let total = self.accumulator.total_length();
        if !state.phase.is_terminal() {
            state.phase = FetchPhase::Completed;
            state
                .queue
                .process_pending(&self.accumulator, state.info.as_ref(), Some(total));
        }
        let expected = state.info.as_ref().and_then(|i| i.content_length);
        let aborted = state.queue.drain(Completion::Aborted);
        (total, expected, aborted)
    }

    /// Move to a terminal failure phase and abort every pending request.
    fn abort(&self, phase: FetchPhase) -> usize {
        let mut state = self.state.lock();
        if !state.phase.is_terminal() {
            state.phase = phase;
        }
        state.queue.drain(Completion::Aborted)
    }
}

/// One download of a remote asset, shared by the player's reads and the
/// cache population.
pub struct FetchSession {
    url: Url,
    key: CacheKey,
    extension: String,
    ctx: FetchContext,
    pipeline: Arc<Pipeline>,
    started: AtomicBool,
    cancel: CancellationToken,
    outcome: Arc<watch::Sender<Option<FetchOutcome>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FetchSession {
    /// Create an idle session for `url`. Nothing happens until [`start`](Self::start).
    pub fn new(url: Url, extension: impl Into<String>, ctx: FetchContext) -> Self {
        let key = cache_key(&url);
        let (outcome, _) = watch::channel(None);

        Self {
            url,
            key,
            extension: extension.into(),
            ctx,
            pipeline: Arc::new(Pipeline::new()),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            outcome: Arc::new(outcome),
            task: Mutex::new(None),
        }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn phase(&self) -> FetchPhase {
        self.pipeline.state.lock().phase
    }

    pub fn content_info(&self) -> Option<ContentInfo> {
        self.pipeline.state.lock().info.clone()
    }

    pub fn downloaded_bytes(&self) -> u64 {
        self.pipeline.accumulator.total_length()
    }

    pub fn pending_requests(&self) -> usize {
        self.pipeline.state.lock().queue.len()
    }

    /// Start the download. A session downloads at most once.
    pub fn start(&self) -> Result<(), FetchError> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::Cancelled);
        }
        if self.started.swap(true, Ordering::AcqRel) {
            tracing::error!(url = %self.url, "Fetch started twice on one session");
            return Err(FetchError::AlreadyActive);
        }

        tracing::info!(url = %self.url, key = %self.key, "Starting fetch");

        let task = FetchTask {
            url: self.url.clone(),
            key: self.key.clone(),
            extension: self.extension.clone(),
            transport: Arc::clone(&self.ctx.transport),
            store: Arc::clone(&self.ctx.store),
            idle_timeout: self.ctx.idle_timeout,
            pipeline: Arc::clone(&self.pipeline),
            cancel: self.cancel.clone(),
            outcome: Arc::clone(&self.outcome),
        };
        let handle = self.ctx.runtime.spawn(task.run());
        *self.task.lock() = Some(handle);
        Ok(())
    }

    /// Hand a player request to the pipeline.
    pub fn enqueue(&self, request: LoadingRequest) {
        self.pipeline.admit(request);
    }

    /// Remove a request the player abandoned.
    pub fn cancel_request(&self, id: RequestId) -> bool {
        self.pipeline.cancel_request(id)
    }

    /// Stop the download and abort every pending request. Safe to call more
    /// than once and from any thread.
    pub fn cancel(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();

        let aborted = self.pipeline.abort(FetchPhase::Cancelled);
        publish(&self.outcome, FetchOutcome::Cancelled);
        // The task observes the token and exits on its own
        drop(self.task.lock().take());

        tracing::debug!(url = %self.url, aborted, "Fetch session cancelled");
    }

    /// Current outcome, if the session has finished.
    pub fn outcome(&self) -> Option<FetchOutcome> {
        self.outcome.borrow().clone()
    }

    /// Wait for the session to finish.
    pub async fn wait(&self) -> FetchOutcome {
        let mut rx = self.outcome.subscribe();
        let result = rx.wait_for(|o| o.is_some()).await;
        match result {
            Ok(outcome) => outcome.clone().unwrap_or(FetchOutcome::Cancelled),
            Err(_) => FetchOutcome::Cancelled,
        }
    }
}

impl Drop for FetchSession {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for FetchSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchSession")
            .field("url", &self.url.as_str())
            .field("key", &self.key)
            .field("started", &self.is_started())
            .field("cancelled", &self.is_cancelled())
            .finish_non_exhaustive()
    }
}

fn publish(tx: &watch::Sender<Option<FetchOutcome>>, outcome: FetchOutcome) {
    tx.send_if_modified(|current| {
        if current.is_none() {
            *current = Some(outcome);
            true
        } else {
            false
        }
    });
}

struct FetchTask {
    url: Url,
    key: CacheKey,
    extension: String,
    transport: Arc<dyn Transport>,
    store: Arc<CacheStore>,
    idle_timeout: Duration,
    pipeline: Arc<Pipeline>,
    cancel: CancellationToken,
    outcome: Arc<watch::Sender<Option<FetchOutcome>>>,
}

impl FetchTask {
    async fn run(self) {
        let mut events = self.transport.fetch(self.url.clone());
        self.pipeline.set_streaming();

        let result = loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                next = tokio::time::timeout(self.idle_timeout, events.next()) => next,
            };

            match next {
                Err(_) => break Err(FetchError::Timeout(self.idle_timeout)),
                Ok(None) => break Err(FetchError::network("stream ended without completion")),
                Ok(Some(FetchEvent::HeadersReceived(info))) => {
                    tracing::debug!(
                        url = %self.url,
                        content_type = ?info.content_type,
                        content_length = ?info.content_length,
                        "Received response headers"
                    );
                    self.pipeline.on_headers(info);
                }
                Ok(Some(FetchEvent::ChunkReceived(chunk))) => {
                    self.pipeline.on_chunk(&chunk);
                }
                Ok(Some(FetchEvent::Completed(result))) => break result,
            }
        };
        drop(events);

        let outcome = match result {
            Ok(()) => self.finish_success().await,
            Err(error) => {
                let aborted = self.pipeline.abort(FetchPhase::Failed);
                tracing::warn!(
                    url = %self.url,
                    error = %error,
                    received = self.pipeline.accumulator.total_length(),
                    aborted,
                    "Fetch failed"
                );
                FetchOutcome::Failed(error)
            }
        };

        publish(&self.outcome, outcome);
    }

    async fn finish_success(&self) -> FetchOutcome {
        let (total, expected, aborted) = self.pipeline.complete();
        tracing::info!(url = %self.url, bytes = total, aborted, "Fetch completed");

        if self.cancel.is_cancelled() {
            tracing::debug!(url = %self.url, bytes = total, "Session cancelled, discarding download");
            return FetchOutcome::Cancelled;
        }

        if total == 0 {
            return FetchOutcome::Uncached {
                bytes: 0,
                reason: "empty body".to_string(),
            };
        }
        if let Some(expected) = expected.filter(|e| *e != total) {
            tracing::warn!(
                url = %self.url,
                expected,
                received = total,
                "Download length mismatch, not caching"
            );
            return FetchOutcome::Uncached {
                bytes: total,
                reason: format!("received {} of {} bytes", total, expected),
            };
        }

        let bytes = self.pipeline.accumulator.snapshot();
        let store = Arc::clone(&self.store);
        let key = self.key.clone();
        let extension = self.extension.clone();
        let cancel = self.cancel.clone();
        let written = tokio::task::spawn_blocking(move || {
            if cancel.is_cancelled() {
                return None;
            }
            Some(store.store(&key, &bytes, &extension))
        })
        .await;

        match written {
            Ok(None) => FetchOutcome::Cancelled,
            Ok(Some(Ok(entry))) => FetchOutcome::Cached(entry),
            Ok(Some(Err(e))) => {
                tracing::warn!(url = %self.url, error = %e, "Failed to cache download");
                FetchOutcome::Uncached {
                    bytes: total,
                    reason: e.to_string(),
                }
            }
            Err(e) => {
                tracing::error!(url = %self.url, error = %e, "Cache writer task failed");
                FetchOutcome::Uncached {
                    bytes: total,
                    reason: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::streaming::request::RequestEvents;
    use crate::streaming::testing::{ScriptedTransport, SilentTransport};
    use assert_matches::assert_matches;
    use reelcache_store::EvictionPolicy;
    use tempfile::TempDir;

    const URL: &str = "https://cdn.example.com/v/1.mp4";

    fn source(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn context(transport: Arc<dyn Transport>) -> (FetchContext, TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = CacheStore::open(dir.path(), EvictionPolicy::unbounded()).unwrap();
        let ctx = FetchContext {
            transport,
            store: Arc::new(store),
            idle_timeout: Duration::from_secs(60),
            runtime: tokio::runtime::Handle::current(),
        };
        (ctx, dir)
    }

    fn data(offset: u64, length: u64) -> (LoadingRequest, RequestEvents) {
        let url = Url::parse("streaming://cdn.example.com/v/1.mp4").unwrap();
        LoadingRequest::data(url, offset, Some(length))
    }

    #[tokio::test]
    async fn test_download_is_served_and_cached() {
        let body = source(10_000);
        let transport = Arc::new(ScriptedTransport::canned(body.clone(), "video/mp4", 1024));
        let (ctx, _dir) = context(transport.clone());
        let store = Arc::clone(&ctx.store);

        let session = FetchSession::new(Url::parse(URL).unwrap(), "mp4", ctx);
        let (request, events) = data(5000, 3000);
        session.enqueue(request);
        session.start().unwrap();

        let outcome = session.wait().await;
        let entry = assert_matches!(outcome, FetchOutcome::Cached(entry) => entry);
        assert_eq!(std::fs::read(&entry.path).unwrap(), body);
        assert_eq!(transport.fetch_count(), 1);
        assert_eq!(session.phase(), FetchPhase::Completed);

        let served = events.collect().await;
        assert_eq!(served.data, &body[5000..8000]);
        assert_eq!(served.completion, Some(Completion::Satisfied));

        let key = cache_key(&Url::parse(URL).unwrap());
        assert_eq!(session.key(), &key);
        assert!(store.lookup(&key, "mp4").is_some());
    }

    #[test]
    fn test_cache_key_uses_normalized_url() {
        let shouting = Url::parse("HTTPS://CDN.Example.com:443/v/1.mp4").unwrap();
        let plain = Url::parse(URL).unwrap();
        assert_eq!(cache_key(&shouting), cache_key(&plain));
        assert_ne!(cache_key(&shouting), CacheKey::from_url("HTTPS://CDN.Example.com:443/v/1.mp4"));
    }

    #[tokio::test]
    async fn test_completion_after_cancel_is_not_cached() {
        let body = source(4096);
        let transport = Arc::new(ScriptedTransport::scripted());
        let (ctx, _dir) = context(transport.clone());
        let store = Arc::clone(&ctx.store);
        let url = Url::parse(URL).unwrap();

        let task = FetchTask {
            url: url.clone(),
            key: cache_key(&url),
            extension: "mp4".to_string(),
            transport,
            store: Arc::clone(&store),
            idle_timeout: ctx.idle_timeout,
            pipeline: Arc::new(Pipeline::new()),
            cancel: CancellationToken::new(),
            outcome: Arc::new(watch::channel(None).0),
        };
        task.pipeline.set_streaming();
        task.pipeline.on_headers(ContentInfo::new(Some("video/mp4".into()), Some(4096)));
        task.pipeline.on_chunk(&body);

        // The whole body arrived, then the player went away
        task.cancel.cancel();
        let outcome = task.finish_success().await;

        assert_eq!(outcome, FetchOutcome::Cancelled);
        assert!(store.entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_start_is_rejected() {
        let transport = Arc::new(ScriptedTransport::scripted());
        let (ctx, _dir) = context(transport.clone());
        let session = FetchSession::new(Url::parse(URL).unwrap(), "mp4", ctx);

        session.start().unwrap();
        assert_eq!(session.start(), Err(FetchError::AlreadyActive));

        transport.wait_for_fetches(1).await;
        assert_eq!(transport.fetch_count(), 1);
    }

    #[tokio::test]
    async fn test_failure_aborts_pending_and_skips_cache() {
        let body = source(8192);
        let transport = Arc::new(ScriptedTransport::scripted());
        let (ctx, _dir) = context(transport.clone());
        let store = Arc::clone(&ctx.store);
        let session = FetchSession::new(Url::parse(URL).unwrap(), "mp4", ctx);

        session.start().unwrap();
        transport.wait_for_fetches(1).await;
        let script = transport.script(0).unwrap();

        let (first, first_events) = data(5000, 1000);
        let (second, second_events) = data(6000, 2000);
        session.enqueue(first);
        session.enqueue(second);

        script.headers("video/mp4", Some(8192));
        script.chunk(&body[..4096]);
        script.fail(FetchError::network("connection reset"));

        let outcome = session.wait().await;
        assert_matches!(outcome, FetchOutcome::Failed(FetchError::Network(_)));

        for events in [first_events, second_events] {
            let served = events.collect().await;
            assert!(served.data.is_empty());
            assert_eq!(served.completion, Some(Completion::Aborted));
            assert_eq!(served.finish_count, 1);
        }
        assert!(store.entries().unwrap().is_empty());
        assert_eq!(session.pending_requests(), 0);
    }

    #[tokio::test]
    async fn test_cancel_finishes_every_pending_request_once() {
        let transport: Arc<dyn Transport> = Arc::new(SilentTransport);
        let (ctx, _dir) = context(transport);
        let session = FetchSession::new(Url::parse(URL).unwrap(), "mp4", ctx);
        session.start().unwrap();

        let mut receivers = Vec::new();
        for i in 0..7 {
            let (request, events) = data(i * 100, 100);
            session.enqueue(request);
            receivers.push(events);
        }
        assert_eq!(session.pending_requests(), 7);

        session.cancel();
        session.cancel();

        assert_eq!(session.wait().await, FetchOutcome::Cancelled);
        assert_eq!(session.pending_requests(), 0);
        for events in receivers {
            let served = events.collect().await;
            assert_eq!(served.finish_count, 1);
            assert_eq!(served.completion, Some(Completion::Aborted));
        }
        assert_eq!(session.start(), Err(FetchError::Cancelled));
    }

    #[tokio::test]
    async fn test_length_mismatch_is_not_cached() {
        let transport = Arc::new(ScriptedTransport::scripted());
        let (ctx, _dir) = context(transport.clone());
        let store = Arc::clone(&ctx.store);
        let session = FetchSession::new(Url::parse(URL).unwrap(), "mp4", ctx);
        session.start().unwrap();
        transport.wait_for_fetches(1).await;

        let script = transport.script(0).unwrap();
        script.headers("video/mp4", Some(2000));
        script.chunk(&source(1500));
        script.complete();

        let outcome = session.wait().await;
        assert_matches!(outcome, FetchOutcome::Uncached { bytes: 1500, .. });
        assert!(store.entries().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_request_after_completion_is_served_immediately() {
        let body = source(4000);
        let transport = Arc::new(ScriptedTransport::canned(body.clone(), "video/mp4", 512));
        let (ctx, _dir) = context(transport);
        let session = FetchSession::new(Url::parse(URL).unwrap(), "mp4", ctx);
        session.start().unwrap();
        assert!(session.wait().await.is_cached());

        let (inside, inside_events) = data(1000, 500);
        let (beyond, beyond_events) = data(3900, 500);
        session.enqueue(inside);
        session.enqueue(beyond);

        let served = inside_events.collect().await;
        assert_eq!(served.data, &body[1000..1500]);
        assert_eq!(served.completion, Some(Completion::Satisfied));

        // The resource ends at 4000: the tail is delivered, then the request is finished
        let served = beyond_events.collect().await;
        assert_eq!(served.data, &body[3900..]);
        assert_eq!(served.completion, Some(Completion::Aborted));
    }

    #[tokio::test]
    async fn test_idle_timeout_fails_fetch() {
        let transport: Arc<dyn Transport> = Arc::new(SilentTransport);
        let (mut ctx, _dir) = context(transport);
        ctx.idle_timeout = Duration::from_millis(50);
        let session = FetchSession::new(Url::parse(URL).unwrap(), "mp4", ctx);

        let (request, events) = data(0, 10);
        session.enqueue(request);
        session.start().unwrap();

        assert_eq!(
            session.wait().await,
            FetchOutcome::Failed(FetchError::Timeout(Duration::from_millis(50)))
        );
        assert_eq!(events.collect().await.completion, Some(Completion::Aborted));
    }

    #[tokio::test]
    async fn test_player_cancel_removes_request() {
        let transport = Arc::new(ScriptedTransport::scripted());
        let (ctx, _dir) = context(transport.clone());
        let session = FetchSession::new(Url::parse(URL).unwrap(), "mp4", ctx);
        session.start().unwrap();

        let (request, mut events) = data(0, 10);
        let id = request.id();
        session.enqueue(request);
        assert!(session.cancel_request(id));
        assert!(!session.cancel_request(id));
        assert_eq!(session.pending_requests(), 0);
        assert_eq!(events.drain_now().finish_count, 0);
    }
}
