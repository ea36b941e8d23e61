//! Test utilities for dnotes-client
//!
//! Provides a throwaway push server for end-to-end tests and a scripted
//! transport for lifecycle tests that run on a paused clock.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::time::Instant;
use url::Url;

use crate::config::StreamConfig;
use crate::streaming::{StreamError, StreamResult};
use crate::transport::{ByteStream, StreamRequest, Transport};
use crate::Result;

/// A test server that automatically shuts down when dropped
pub struct TestServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<tokio::sync::oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    /// Serve an axum Router on an ephemeral local port
    ///
    /// # Example
    ///
    /// ```ignore
    /// use dnotes_client::testing::{PushScript, TestServer};
    ///
    /// let script = PushScript::new("jwt").chunk("data: {}\n\n");
    /// let server = TestServer::start(script.router()).await?;
    /// let config = server.stream_config();
    /// ```
    pub async fn start(router: axum::Router) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();

        let handle = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async {
                    let _ = shutdown_rx.await;
                })
                .await
                .ok();
        });

        // Give server a moment to start
        tokio::time::sleep(Duration::from_millis(10)).await;

        Ok(Self {
            addr,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    /// Get the base URL of the test server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// API base of the test server (`/api`)
    pub fn api_base(&self) -> Result<Url> {
        Ok(Url::parse(&format!("{}/api", self.base_url()))?)
    }

    /// Client configuration pointing at this server
    pub fn stream_config(&self) -> Result<StreamConfig> {
        let mut config = StreamConfig::default();
        config.endpoint.api_base = Some(self.api_base()?);
        config.connect_timeout_ms = 2_000;
        Ok(config)
    }

    /// Shutdown the server gracefully
    ///
    /// Streams held open by the server would block a graceful shutdown
    /// forever, so the server task is aborted after a short grace period.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(mut handle) = self.handle.take() {
            if tokio::time::timeout(Duration::from_secs(1), &mut handle)
                .await
                .is_err()
            {
                handle.abort();
            }
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

/// What a mock push endpoint sends on each connection
#[derive(Debug, Clone)]
pub struct PushScript {
    token: String,
    chunks: Vec<String>,
    hold_open: bool,
    failure: Option<StatusCode>,
    connections: Arc<AtomicUsize>,
}

impl PushScript {
    /// Accept only `Bearer <token>`
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            chunks: Vec::new(),
            hold_open: false,
            failure: None,
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Append a body chunk, sent as-is
    pub fn chunk(mut self, chunk: impl Into<String>) -> Self {
        self.chunks.push(chunk.into());
        self
    }

    /// Keep the body open after the last chunk
    pub fn hold_open(mut self) -> Self {
        self.hold_open = true;
        self
    }

    /// Answer authorized requests with `status` and an error body that
    /// never ends
    pub fn fail_with(mut self, status: StatusCode) -> Self {
        self.failure = Some(status);
        self
    }

    /// Number of authorized connections served so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Router serving `GET /api/sse`
    pub fn router(&self) -> axum::Router {
        let script = self.clone();
        axum::Router::new().route(
            "/api/sse",
            get(move |headers: HeaderMap| {
                let script = script.clone();
                async move { script.respond(&headers) }
            }),
        )
    }

    fn respond(&self, headers: &HeaderMap) -> Response {
        let expected = format!("Bearer {}", self.token);
        let authorized = headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            == Some(expected.as_str());
        if !authorized {
            return (StatusCode::UNAUTHORIZED, "missing or bad token").into_response();
        }

        self.connections.fetch_add(1, Ordering::SeqCst);

        if let Some(status) = self.failure {
            let body = stream::once(async { Ok::<_, Infallible>(Bytes::from("overloaded")) })
                .chain(stream::pending());
            return (status, Body::from_stream(body)).into_response();
        }

        let chunks = stream::iter(
            self.chunks
                .clone()
                .into_iter()
                .map(|c| Ok::<_, Infallible>(Bytes::from(c))),
        );
        let body: BoxStream<'static, std::result::Result<Bytes, Infallible>> = if self.hold_open
        {
            chunks.chain(stream::pending()).boxed()
        } else {
            chunks.boxed()
        };

        (
            [(header::CONTENT_TYPE, "text/event-stream")],
            Body::from_stream(body),
        )
            .into_response()
    }
}

/// One scripted reply of [`ScriptedTransport`]
#[derive(Debug, Clone)]
pub enum Scripted {
    /// Fail to open with this HTTP status
    Reject(u16),
    /// Open, send the chunks, then end the body
    Stream(Vec<String>),
    /// Open, send the chunks, then stay open
    Open(Vec<String>),
    /// Never finish opening
    Hang,
}

#[derive(Debug, Default)]
struct ScriptState {
    queue: VecDeque<Scripted>,
    opens: Vec<Instant>,
    last_credential: Option<String>,
}

/// Transport that replays queued replies and records every open
///
/// When the queue is empty every open is rejected with 503.
#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<ScriptState>>,
}

impl ScriptedTransport {
    /// Create a transport with an empty script
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply
    pub fn push(&self, reply: Scripted) {
        self.state.lock().queue.push_back(reply);
    }

    /// Number of open attempts
    pub fn open_count(&self) -> usize {
        self.state.lock().opens.len()
    }

    /// Instants of every open attempt
    pub fn open_times(&self) -> Vec<Instant> {
        self.state.lock().opens.clone()
    }

    /// Credential of the latest open attempt
    pub fn last_credential(&self) -> Option<String> {
        self.state.lock().last_credential.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, request: StreamRequest) -> StreamResult<ByteStream> {
        let reply = {
            let mut state = self.state.lock();
            state.opens.push(Instant::now());
            state.last_credential = Some(request.credential);
            state.queue.pop_front().unwrap_or(Scripted::Reject(503))
        };

        let body = |chunks: Vec<String>| {
            stream::iter(
                chunks
                    .into_iter()
                    .map(|c| Ok::<_, StreamError>(Bytes::from(c))),
            )
        };

        match reply {
            Scripted::Reject(status) => Err(StreamError::Server {
                status,
                message: "scripted rejection".to_string(),
            }),
            Scripted::Stream(chunks) => Ok(Box::pin(body(chunks))),
            Scripted::Open(chunks) => Ok(Box::pin(body(chunks).chain(stream::pending()))),
            Scripted::Hang => std::future::pending().await,
        }
    }
}

/// Wait for a condition with timeout
pub async fn wait_for<F>(condition: F, timeout: Duration) -> bool
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;

    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    condition()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_format() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let url = format!("http://{}", addr);
        assert_eq!(url, "http://127.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_scripted_transport_defaults_to_rejection() {
        let transport = ScriptedTransport::new();
        let request = StreamRequest {
            url: Url::parse("http://localhost/api/sse").unwrap(),
            credential: "jwt".into(),
        };

        let err = transport.open(request).await.err().unwrap();
        assert!(matches!(err, StreamError::Server { status: 503, .. }));
        assert_eq!(transport.open_count(), 1);
        assert_eq!(transport.last_credential().as_deref(), Some("jwt"));
    }
}
