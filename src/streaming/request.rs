//! Loading requests issued by the player.
//!
//! The player asks either for content information (type, length, range
//! support), for a byte range, or both at once. Answers flow back to the
//! player over a per-request channel as [`LoadingEvent`]s. Every request that
//! the player did not cancel itself ends with exactly one
//! [`LoadingEvent::Finished`], even if it is dropped without being answered.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use reelcache_common::ContentInfo;
use reqwest::Url;
use tokio::sync::mpsc;

static NEXT_REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier the player uses to cancel a request it scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(u64);

impl RequestId {
    fn next() -> Self {
        Self(NEXT_REQUEST_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How a request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Everything the request asked for was delivered.
    Satisfied,
    /// The request was finished without (all of) its data: the fetch failed,
    /// was cancelled, or the resource ended before the requested range.
    Aborted,
}

/// Event delivered to the player for one request.
#[derive(Debug, Clone, PartialEq)]
pub enum LoadingEvent {
    ContentInfo(ContentInfo),
    Data(Bytes),
    Finished(Completion),
}

/// What a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Info,
    Data,
    InfoAndData,
}

/// Byte range portion of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataRange {
    pub requested_offset: u64,
    /// `None` means "to the end of the resource".
    pub requested_length: Option<u64>,
    /// First byte not yet delivered.
    pub current_offset: u64,
}

impl DataRange {
    fn new(offset: u64, length: Option<u64>) -> Self {
        Self {
            requested_offset: offset,
            requested_length: length,
            current_offset: offset,
        }
    }

    /// Exclusive end of the range, if it can be determined yet.
    pub fn end(&self, content_length: Option<u64>) -> Option<u64> {
        match self.requested_length {
            Some(len) => Some(self.requested_offset.saturating_add(len)),
            None => content_length,
        }
    }
}

/// A pending read issued by the player.
pub struct LoadingRequest {
    id: RequestId,
    url: Url,
    wants_info: bool,
    info_sent: bool,
    data: Option<DataRange>,
    events: mpsc::UnboundedSender<LoadingEvent>,
    done: bool,
}

impl LoadingRequest {
    /// Ask for content information only.
    pub fn info(url: Url) -> (Self, RequestEvents) {
        Self::build(url, true, None)
    }

    /// Ask for `length` bytes at `offset`, or to the end when `length` is `None`.
    pub fn data(url: Url, offset: u64, length: Option<u64>) -> (Self, RequestEvents) {
        Self::build(url, false, Some(DataRange::new(offset, length)))
    }

    /// Ask for content information and a byte range in one request, as
    /// players do for their first probe of an asset.
    pub fn info_and_data(url: Url, offset: u64, length: Option<u64>) -> (Self, RequestEvents) {
        Self::build(url, true, Some(DataRange::new(offset, length)))
    }

    fn build(url: Url, wants_info: bool, data: Option<DataRange>) -> (Self, RequestEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = RequestId::next();
        let request = Self {
            id,
            url,
            wants_info,
            info_sent: false,
            data,
            events: tx,
            done: false,
        };
        (request, RequestEvents { id, rx })
    }

    pub fn id(&self) -> RequestId {
        self.id
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn kind(&self) -> RequestKind {
        match (self.wants_info, self.data.is_some()) {
            (true, true) => RequestKind::InfoAndData,
            (true, false) => RequestKind::Info,
            _ => RequestKind::Data,
        }
    }

    pub fn data_range(&self) -> Option<&DataRange> {
        self.data.as_ref()
    }

    /// Whether the info portion (if any) still awaits content information.
    pub fn needs_info(&self) -> bool {
        self.wants_info && !self.info_sent
    }

    /// Send content information, once.
    pub(crate) fn fill_info(&mut self, info: &ContentInfo) {
        if self.needs_info() {
            self.info_sent = true;
            self.send(LoadingEvent::ContentInfo(info.clone()));
        }
    }

    /// Deliver the next slice of the data range and advance it.
    pub(crate) fn respond(&mut self, bytes: Bytes) {
        if let Some(range) = self.data.as_mut() {
            range.current_offset += bytes.len() as u64;
        }
        if !bytes.is_empty() {
            self.send(LoadingEvent::Data(bytes));
        }
    }

    /// Finish the request. Only the first call has any effect.
    pub(crate) fn finish(&mut self, completion: Completion) {
        if self.done {
            return;
        }
        self.done = true;
        self.send(LoadingEvent::Finished(completion));
    }

    /// Drop the request without signalling: the player abandoned it or is
    /// going to load it some other way.
    pub(crate) fn release(mut self) {
        self.done = true;
    }

    pub fn is_finished(&self) -> bool {
        self.done
    }

    fn send(&self, event: LoadingEvent) {
        // The player may have gone away; nothing is waiting in that case.
        let _ = self.events.send(event);
    }
}

impl Drop for LoadingRequest {
    fn drop(&mut self) {
        if !self.done {
            tracing::trace!(request_id = %self.id, "Loading request dropped unanswered");
            self.finish(Completion::Aborted);
        }
    }
}

impl fmt::Debug for LoadingRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadingRequest")
            .field("id", &self.id)
            .field("url", &self.url.as_str())
            .field("kind", &self.kind())
            .field("data", &self.data)
            .field("done", &self.done)
            .finish()
    }
}

/// Player-side receiver for one request's events.
#[derive(Debug)]
pub struct RequestEvents {
    id: RequestId,
    rx: mpsc::UnboundedReceiver<LoadingEvent>,
}

/// Everything a request produced, gathered until it finished.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOutcome {
    pub info: Option<ContentInfo>,
    pub data: Vec<u8>,
    /// `None` when the request ended without a `Finished` event (cancelled by
    /// the player).
    pub completion: Option<Completion>,
    /// Number of `Finished` events observed.
    pub finish_count: usize,
}

impl RequestEvents {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Next event, or `None` once the request is gone and all events were read.
    pub async fn recv(&mut self) -> Option<LoadingEvent> {
        self.rx.recv().await
    }

    /// Non-blocking variant of [`recv`](Self::recv).
    pub fn try_recv(&mut self) -> Option<LoadingEvent> {
        self.rx.try_recv().ok()
    }

    /// Read events until the request is dropped by the pipeline.
    pub async fn collect(mut self) -> RequestOutcome {
        let mut outcome = RequestOutcome::default();
        while let Some(event) = self.rx.recv().await {
            outcome.apply(event);
        }
        outcome
    }

    /// Drain whatever is buffered right now without waiting.
    pub fn drain_now(&mut self) -> RequestOutcome {
        let mut outcome = RequestOutcome::default();
        while let Ok(event) = self.rx.try_recv() {
            outcome.apply(event);
        }
        outcome
    }
}

impl RequestOutcome {
    fn apply(&mut self, event: LoadingEvent) {
        match event {
            LoadingEvent::ContentInfo(info) => self.info = Some(info),
            LoadingEvent::Data(bytes) => self.data.extend_from_slice(&bytes),
            LoadingEvent::Finished(completion) => {
                self.finish_count += 1;
                self.completion.get_or_insert(completion);
            }
        }
    }
}
