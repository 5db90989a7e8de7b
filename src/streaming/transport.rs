//! Network transport seam for fetch sessions.
//!
//! A transport turns a URL into an ordered stream of [`FetchEvent`]s: the
//! response headers once, then body chunks, then a single completion. The
//! fetch session is the only subscriber, so no callbacks are registered
//! anywhere.

use std::time::Duration;

use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reelcache_common::{ContentInfo, FetchError};
use reqwest::header::{CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client, Url};

/// Connection timeout for origin requests.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One step of a download.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchEvent {
    HeadersReceived(ContentInfo),
    ChunkReceived(Bytes),
    Completed(Result<(), FetchError>),
}

/// Source of download event streams.
pub trait Transport: Send + Sync {
    /// Start fetching `url`. The stream ends after a `Completed` event.
    fn fetch(&self, url: Url) -> BoxStream<'static, FetchEvent>;
}

/// HTTP(S) transport backed by `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(user_agent: &str) -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(user_agent)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Failed to build HTTP client with timeout: {}", e);
                Client::new()
            });

        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(concat!("reelcache/", env!("CARGO_PKG_VERSION")))
    }
}

impl Transport for HttpTransport {
    fn fetch(&self, url: Url) -> BoxStream<'static, FetchEvent> {
        let client = self.client.clone();

        let events = async_stream::stream! {
            let response = match client
                .get(url.clone())
                .header(CACHE_CONTROL, "no-cache")
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    yield FetchEvent::Completed(Err(map_reqwest_error(e)));
                    return;
                }
            };

            let status = response.status();
            if !status.is_success() {
                tracing::warn!(url = %url, status = status.as_u16(), "Origin returned error status");
                yield FetchEvent::Completed(Err(FetchError::Status(status.as_u16())));
                return;
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
            yield FetchEvent::HeadersReceived(ContentInfo::new(
                content_type,
                response.content_length(),
            ));

            let mut body = response.bytes_stream();
            while let Some(chunk) = body.next().await {
                match chunk {
                    Ok(bytes) => {
                        yield FetchEvent::ChunkReceived(bytes);
                    }
                    Err(e) => {
                        yield FetchEvent::Completed(Err(map_reqwest_error(e)));
                        return;
                    }
                }
            }

            yield FetchEvent::Completed(Ok(()));
        };

        events.boxed()
    }
}

fn map_reqwest_error(e: reqwest::Error) -> FetchError {
    FetchError::network(e.to_string())
}
