//! Queue of loading requests waiting on a download.
//!
//! Each pass walks the queue in FIFO order and answers as much of every
//! request as the accumulator currently holds. Partially answered requests
//! stay queued for the next pass, which runs whenever new bytes arrive.

use reelcache_common::ContentInfo;

use super::accumulator::ByteAccumulator;
use super::request::{Completion, LoadingRequest, RequestId};

/// Pending loading requests for one fetch.
#[derive(Debug, Default)]
pub struct RequestQueue {
    requests: Vec<LoadingRequest>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, request: LoadingRequest) {
        tracing::trace!(request_id = %request.id(), kind = ?request.kind(), "Enqueued loading request");
        self.requests.push(request);
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    pub fn contains(&self, id: RequestId) -> bool {
        self.requests.iter().any(|r| r.id() == id)
    }

    /// Answer every request as far as the accumulator allows.
    ///
    /// `final_length` is set once the download has finished; it lets
    /// to-the-end requests complete when the server never announced a length.
    /// Returns the number of requests that were satisfied and removed.
    pub fn process_pending(
        &mut self,
        accumulator: &ByteAccumulator,
        info: Option<&ContentInfo>,
        final_length: Option<u64>,
    ) -> usize {
        let before = self.requests.len();
        let content_length = info.and_then(|i| i.content_length).or(final_length);

        self.requests.retain_mut(|request| {
            if let Some(info) = info {
                request.fill_info(info);
            }

            let data_done = match request.data_range().copied() {
                None => true,
                Some(range) => {
                    let end = range.end(content_length);
                    respond_available(request, accumulator, range.current_offset, end);
                    let current = request
                        .data_range()
                        .map(|r| r.current_offset)
                        .unwrap_or(range.current_offset);
                    end.is_some_and(|end| current >= end)
                }
            };

            if data_done && !request.needs_info() {
                request.finish(Completion::Satisfied);
                false
            } else {
                true
            }
        });

        let satisfied = before - self.requests.len();
        if satisfied > 0 {
            tracing::trace!(satisfied, pending = self.requests.len(), "Satisfied loading requests");
        }
        satisfied
    }

    /// Remove a request the player abandoned. No completion is sent.
    pub fn cancel(&mut self, id: RequestId) -> bool {
        match self.requests.iter().position(|r| r.id() == id) {
            Some(index) => {
                self.requests.remove(index).release();
                true
            }
            None => false,
        }
    }

    /// Finish and remove every queued request. Returns how many were drained.
    pub fn drain(&mut self, completion: Completion) -> usize {
        let count = self.requests.len();
        for mut request in self.requests.drain(..) {
            request.finish(completion);
        }
        count
    }
}

/// Deliver `min(end - current, available - current)` bytes, or everything
/// available when the end is not known yet.
fn respond_available(
    request: &mut LoadingRequest,
    accumulator: &ByteAccumulator,
    current: u64,
    end: Option<u64>,
) {
    let wanted = match end {
        Some(end) if end <= current => return,
        Some(end) => end - current,
        None => u64::MAX - current,
    };

    if let Some(bytes) = accumulator.read_range(current, wanted) {
        if !bytes.is_empty() {
            request.respond(bytes);
        }
    }
}
