//! Stream transport
//!
//! The connection manager only needs "open a byte stream for this URL and
//! token". [`HttpTransport`] does that with reqwest; tests substitute
//! scripted transports.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use reqwest::header::{HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::Client;
use tracing::{debug, instrument};
use url::Url;

use crate::error::Result;
use crate::streaming::{StreamError, StreamResult};

/// How long an error response body may take before it is abandoned
const ERROR_BODY_TIMEOUT: Duration = Duration::from_millis(500);

/// Body of an open push stream
pub type ByteStream = Pin<Box<dyn Stream<Item = StreamResult<Bytes>> + Send>>;

/// One request to open the push stream
#[derive(Clone)]
pub struct StreamRequest {
    /// Full stream URL
    pub url: Url,
    /// Bearer token
    pub credential: String,
}

impl std::fmt::Debug for StreamRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamRequest")
            .field("url", &self.url.as_str())
            .field("credential", &"<redacted>")
            .finish()
    }
}

/// Opens push streams
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the stream; `Err` for transport failures and non-success statuses
    async fn open(&self, request: StreamRequest) -> StreamResult<ByteStream>;
}

/// reqwest-backed transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Create a transport with the given connect timeout
    ///
    /// No overall request timeout is set: the response body stays open for
    /// the lifetime of the stream.
    pub fn new(connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder().connect_timeout(connect_timeout).build()?;
        Ok(Self { client })
    }

    /// Wrap an existing reqwest client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self))]
    async fn open(&self, request: StreamRequest) -> StreamResult<ByteStream> {
        let auth = HeaderValue::from_str(&format!("Bearer {}", request.credential))
            .map_err(|e| StreamError::InvalidCredential(e.to_string()))?;

        debug!("Connecting to push stream: {}", request.url);

        let response = self
            .client
            .get(request.url)
            .header(AUTHORIZATION, auth)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            // The error body may never end; fall back to the reason phrase
            let body = tokio::time::timeout(ERROR_BODY_TIMEOUT, response.text()).await;
            let message = match body {
                Ok(Ok(text)) if !text.is_empty() => text,
                _ => status.canonical_reason().unwrap_or_default().to_string(),
            };
            return Err(StreamError::Server {
                status: status.as_u16(),
                message,
            });
        }

        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(StreamError::from)),
        ))
    }
}
