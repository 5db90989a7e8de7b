//! Resource interceptor for redirected URLs.
//!
//! On a cache miss the player is pointed at the original URL with its scheme
//! swapped for a private one, so its own network stack cannot load it and
//! every read is offered to the interceptor instead. The interceptor restores
//! the original URL and feeds all reads from one shared fetch session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use reelcache_common::{FetchError, PlaybackError};
use reqwest::Url;

use super::fetch::{FetchContext, FetchSession};
use super::player::ResourceLoader;
use super::request::{LoadingRequest, RequestId};

/// Default private scheme for redirected URLs.
pub const DEFAULT_REDIRECT_SCHEME: &str = "streaming";

/// Replace the scheme of `url`, keeping every other part as is.
fn with_scheme(url: &Url, scheme: &str) -> Result<Url, PlaybackError> {
    if scheme.is_empty() {
        return Err(PlaybackError::invalid_url("empty scheme"));
    }
    // Url::set_scheme refuses to move between special and non-special schemes
    let rest = &url.as_str()[url.scheme().len()..];
    Url::parse(&format!("{}{}", scheme, rest))
        .map_err(|e| PlaybackError::invalid_url(format!("{}{}: {}", scheme, rest, e)))
}

/// URL the player is given on a cache miss.
pub fn redirect_url(url: &Url, scheme: &str) -> Result<Url, PlaybackError> {
    with_scheme(url, scheme)
}

/// Original URL behind a redirected one.
pub fn restore_url(url: &Url, original_scheme: &str) -> Result<Url, PlaybackError> {
    with_scheme(url, original_scheme)
}

/// Answers the player's loading requests for one redirected URL.
pub struct ResourceInterceptor {
    original: Url,
    redirected: Url,
    extension: String,
    ctx: FetchContext,
    session: Mutex<Option<Arc<FetchSession>>>,
    cancelled: AtomicBool,
}

impl ResourceInterceptor {
    pub fn new(
        original: Url,
        redirect_scheme: &str,
        extension: impl Into<String>,
        ctx: FetchContext,
    ) -> Result<Self, PlaybackError> {
        let redirected = redirect_url(&original, redirect_scheme)?;
        Ok(Self {
            original,
            redirected,
            extension: extension.into(),
            ctx,
            session: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        })
    }

    pub fn original_url(&self) -> &Url {
        &self.original
    }

    /// URL to hand to the player.
    pub fn redirected_url(&self) -> &Url {
        &self.redirected
    }

    pub fn redirect_scheme(&self) -> &str {
        self.redirected.scheme()
    }

    /// The fetch session, creating and starting it on first use.
    pub fn ensure_session(&self) -> Result<Arc<FetchSession>, FetchError> {
        let mut slot = self.session.lock();
        if self.cancelled.load(Ordering::Acquire) {
            return Err(FetchError::Cancelled);
        }
        if let Some(session) = slot.as_ref() {
            return Ok(Arc::clone(session));
        }

        let fetch_url = restore_url(&self.redirected, self.original.scheme())
            .map_err(|e| FetchError::network(e.to_string()))?;
        let session = Arc::new(FetchSession::new(
            fetch_url,
            self.extension.clone(),
            self.ctx.clone(),
        ));
        session.start()?;
        *slot = Some(Arc::clone(&session));
        Ok(session)
    }

    /// The fetch session, if one was started.
    pub fn session(&self) -> Option<Arc<FetchSession>> {
        self.session.lock().clone()
    }

    /// Tear down the fetch and finish every pending request.
    pub fn cancel(&self) {
        let session = {
            let mut slot = self.session.lock();
            self.cancelled.store(true, Ordering::Release);
            slot.take()
        };
        if let Some(session) = session {
            session.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl ResourceLoader for ResourceInterceptor {
    fn on_schedule(&self, request: LoadingRequest) -> bool {
        if request.url().scheme() != self.redirected.scheme() {
            tracing::debug!(
                request_id = %request.id(),
                url = %request.url(),
                "Declining request outside the redirect scheme"
            );
            request.release();
            return false;
        }

        match self.ensure_session() {
            Ok(session) => session.enqueue(request),
            Err(e) => {
                // Dropping the request finishes it
                tracing::debug!(request_id = %request.id(), error = %e, "No fetch for request");
            }
        }
        true
    }

    fn on_cancel(&self, id: RequestId) {
        if let Some(session) = self.session() {
            if session.cancel_request(id) {
                tracing::trace!(request_id = %id, "Player cancelled loading request");
            }
        }
    }
}

impl Drop for ResourceInterceptor {
    fn drop(&mut self) {
        self.cancel();
    }
}
