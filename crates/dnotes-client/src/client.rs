//! Push stream connection manager

use std::fmt;
use std::sync::{Arc, Weak};

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::AbortHandle;
use tracing::{debug, info, instrument, warn};

use crate::bus::{BusPublisher, EventBus};
use crate::config::StreamConfig;
use crate::credential::CredentialSource;
use crate::dedup::DedupGuard;
use crate::error::Result;
use crate::router::{Dispatch, EventRouter, Handler};
use crate::session::StreamSession;
use crate::streaming::{FrameKind, FrameParser, StreamError};
use crate::transport::{HttpTransport, StreamRequest, Transport};

/// Lifecycle state of the push stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected
    Idle,
    /// Open request in flight
    Connecting,
    /// Stream open and being read
    Open,
    /// Stream ended, failed or was disconnected
    Closed,
}

/// How one connection ended
#[derive(Debug)]
enum Termination {
    /// Could not open (transport error, non-success status, bad URL)
    Rejected(StreamError),
    /// Read error after the stream opened
    Failed(StreamError),
    /// Server closed the body
    Ended,
    /// Lifecycle was cancelled while the open was in flight
    Cancelled,
}

struct Lifecycle {
    state: ConnectionState,
    /// Reconnect attempts made since the last successful open
    attempts: u32,
    /// Bumped by `disconnect()`; tasks from an older epoch stand down
    epoch: u64,
    task: Option<AbortHandle>,
}

struct Inner {
    config: StreamConfig,
    credentials: Arc<dyn CredentialSource>,
    transport: Arc<dyn Transport>,
    router: EventRouter,
    dedup: DedupGuard,
    session: StreamSession,
    lifecycle: Mutex<Lifecycle>,
}

/// Disconnects and releases handlers when the last client handle is dropped
struct OwnerGuard(Arc<Inner>);

impl Drop for OwnerGuard {
    fn drop(&mut self) {
        self.0.disconnect();
        // Handlers may own anything; the connection tasks must not keep it
        self.0.router.clear();
    }
}

/// Server-push client for DailyNotes
///
/// Owns the long-lived stream connection, its reconnect budget, the handler
/// registry and the local-echo dedup guard. All methods are synchronous; the
/// connection itself runs on Tokio tasks, so [`connect`](Self::connect) must
/// be called from within a runtime.
///
/// Stream failures are never returned to the caller. They are logged and
/// retried with exponential backoff until the budget runs out.
///
/// Every clone is an owner: the stream is closed when the last one is
/// dropped. A handler registered on the client must therefore not capture a
/// `PushClient`, or the client owns itself and never shuts down. Capture
/// [`dedup()`](Self::dedup) clones or a [`WeakPushClient`] instead.
///
/// # Example
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use dnotes_client::{handler, EventBus, FrameKind, PushClient, SharedCredential, StreamConfig};
///
/// # async fn example() -> dnotes_client::Result<()> {
/// let token = SharedCredential::with_token("jwt");
/// let bus = EventBus::new();
/// let client = PushClient::builder(StreamConfig::from_env()?)
///     .credentials(Arc::new(token))
///     .bus(Arc::new(bus.clone()))
///     .build()?;
///
/// let on_note = handler(|payload| println!("note changed: {:?}", payload.note_uuid));
/// client.on(FrameKind::NoteUpdated, &on_note);
/// client.connect();
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct PushClient {
    inner: Arc<Inner>,
    _owner: Arc<OwnerGuard>,
}

impl PushClient {
    /// Create a client with the HTTP transport and a private bus
    pub fn new(config: StreamConfig, credentials: Arc<dyn CredentialSource>) -> Result<Self> {
        Self::builder(config).credentials(credentials).build()
    }

    /// Start building a client
    pub fn builder(config: StreamConfig) -> PushClientBuilder {
        PushClientBuilder {
            config,
            credentials: None,
            transport: None,
            bus: None,
        }
    }

    /// A handle that does not keep the client alive, for use in handlers
    pub fn downgrade(&self) -> WeakPushClient {
        WeakPushClient {
            owner: Arc::downgrade(&self._owner),
        }
    }

    /// Open the stream unless it is already open or opening
    ///
    /// Does nothing when no credential is available.
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Close the stream and stop automatic reconnects
    ///
    /// Any reconnect timer that is already pending will stand down when it
    /// fires. Calling this more than once is harmless.
    pub fn disconnect(&self) {
        self.inner.disconnect();
    }

    /// Restore the full reconnect budget, e.g. after a fresh sign-in
    pub fn reset_reconnect(&self) {
        let mut lifecycle = self.inner.lifecycle.lock();
        lifecycle.attempts = 0;
        debug!("push stream reconnect budget reset");
    }

    /// Register `handler` for frames of `kind`
    pub fn on(&self, kind: FrameKind, handler: &Handler) {
        self.inner.router.on(kind, handler);
    }

    /// Remove `handler` from frames of `kind`
    pub fn off(&self, kind: &FrameKind, handler: &Handler) {
        self.inner.router.off(kind, handler);
    }

    /// Id of this client instance
    pub fn session_id(&self) -> &str {
        self.inner.session.id()
    }

    /// The session of this client instance
    pub fn session(&self) -> &StreamSession {
        &self.inner.session
    }

    /// Record a local mutation of `id`
    pub fn mark_updated_locally(&self, id: &str) {
        self.inner.dedup.mark_updated_locally(id);
    }

    /// Whether `id` was changed locally within the dedup window
    pub fn was_recently_updated(&self, id: &str) -> bool {
        self.inner.dedup.was_recently_updated(id)
    }

    /// Current lifecycle state
    pub fn state(&self) -> ConnectionState {
        self.inner.lifecycle.lock().state
    }

    /// Reconnect attempts made since the last successful open
    pub fn attempts(&self) -> u32 {
        self.inner.lifecycle.lock().attempts
    }

    /// The handler registry
    pub fn router(&self) -> &EventRouter {
        &self.inner.router
    }

    /// The dedup guard
    pub fn dedup(&self) -> &DedupGuard {
        &self.inner.dedup
    }

    /// The active configuration
    pub fn config(&self) -> &StreamConfig {
        &self.inner.config
    }
}

impl fmt::Debug for PushClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = self.inner.lifecycle.lock();
        f.debug_struct("PushClient")
            .field("session", &self.inner.session.id())
            .field("state", &lifecycle.state)
            .field("attempts", &lifecycle.attempts)
            .finish_non_exhaustive()
    }
}

/// Non-owning handle to a [`PushClient`]
#[derive(Clone)]
pub struct WeakPushClient {
    owner: Weak<OwnerGuard>,
}

impl WeakPushClient {
    /// The client, unless every owning handle has been dropped
    pub fn upgrade(&self) -> Option<PushClient> {
        let owner = self.owner.upgrade()?;
        Some(PushClient {
            inner: Arc::clone(&owner.0),
            _owner: owner,
        })
    }
}

impl fmt::Debug for WeakPushClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakPushClient")
            .field("alive", &(self.owner.strong_count() > 0))
            .finish()
    }
}

/// Builder for [`PushClient`]
pub struct PushClientBuilder {
    config: StreamConfig,
    credentials: Option<Arc<dyn CredentialSource>>,
    transport: Option<Arc<dyn Transport>>,
    bus: Option<Arc<dyn BusPublisher>>,
}

impl PushClientBuilder {
    /// Credential accessor; without one the client never connects
    pub fn credentials(mut self, credentials: Arc<dyn CredentialSource>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Transport used to open the stream (default: [`HttpTransport`])
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Bus that receives the renamed events (default: a private [`EventBus`])
    pub fn bus(mut self, bus: Arc<dyn BusPublisher>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Build the client
    pub fn build(self) -> Result<PushClient> {
        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(self.config.connect_timeout())?),
        };
        let credentials: Arc<dyn CredentialSource> = match self.credentials {
            Some(credentials) => credentials,
            None => Arc::new(|| None::<String>),
        };
        let bus: Arc<dyn BusPublisher> = match self.bus {
            Some(bus) => bus,
            None => Arc::new(EventBus::new()),
        };

        let inner = Arc::new(Inner {
            dedup: DedupGuard::new(self.config.dedup_window()),
            config: self.config,
            credentials,
            transport,
            router: EventRouter::new(bus),
            session: StreamSession::generate(),
            lifecycle: Mutex::new(Lifecycle {
                state: ConnectionState::Idle,
                attempts: 0,
                epoch: 0,
                task: None,
            }),
        });

        Ok(PushClient {
            _owner: Arc::new(OwnerGuard(Arc::clone(&inner))),
            inner,
        })
    }
}

impl Inner {
    fn connect(self: &Arc<Self>) {
        let Some(credential) = self.credentials.credential() else {
            debug!("no credential, push stream stays closed");
            return;
        };

        let mut lifecycle = self.lifecycle.lock();
        if matches!(
            lifecycle.state,
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            return;
        }

        lifecycle.state = ConnectionState::Connecting;
        let epoch = lifecycle.epoch;
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move {
            let termination = inner.stream_once(epoch, credential).await;
            inner.finish(epoch, termination);
        });
        lifecycle.task = Some(task.abort_handle());
    }

    fn disconnect(&self) {
        let mut lifecycle = self.lifecycle.lock();
        if let Some(task) = lifecycle.task.take() {
            task.abort();
        }
        lifecycle.epoch += 1;
        lifecycle.attempts = self.config.reconnect.max_attempts;
        if lifecycle.state != ConnectionState::Idle {
            lifecycle.state = ConnectionState::Closed;
        }
        debug!("push stream disconnected");
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.lifecycle.lock().epoch == epoch
    }

    #[instrument(skip(self, credential), fields(session = %self.session))]
    async fn stream_once(&self, epoch: u64, credential: String) -> Termination {
        let url = match self.config.endpoint.stream_url() {
            Ok(url) => url,
            Err(e) => return Termination::Rejected(e.into()),
        };

        let mut body = match self.transport.open(StreamRequest { url, credential }).await {
            Ok(body) => body,
            Err(e) => return Termination::Rejected(e),
        };

        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.epoch != epoch {
                return Termination::Cancelled;
            }
            lifecycle.state = ConnectionState::Open;
            lifecycle.attempts = 0;
        }
        debug!("push stream open");

        let mut parser = FrameParser::new();
        while let Some(chunk) = body.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => return Termination::Failed(e),
            };
            for frame in parser.feed(bytes) {
                if !self.is_current(epoch) {
                    return Termination::Cancelled;
                }
                if let Dispatch::Dropped(reason) = self.router.dispatch(&frame) {
                    debug!(event = %frame.event_type, ?reason, "push frame dropped");
                }
            }
        }

        Termination::Ended
    }

    fn finish(self: &Arc<Self>, epoch: u64, termination: Termination) {
        match &termination {
            Termination::Rejected(e) => warn!("push stream could not open: {}", e),
            Termination::Failed(e) => warn!("push stream failed: {}", e),
            Termination::Ended => debug!("push stream ended by server"),
            Termination::Cancelled => return,
        }

        {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.epoch != epoch {
                return;
            }
            lifecycle.state = ConnectionState::Closed;
            lifecycle.task = None;
        }

        self.schedule_reconnect(epoch);
    }

    fn schedule_reconnect(self: &Arc<Self>, epoch: u64) {
        let policy = self.config.reconnect;
        let (attempt, delay) = {
            let mut lifecycle = self.lifecycle.lock();
            if lifecycle.epoch != epoch {
                return;
            }
            if !policy.allows(lifecycle.attempts) {
                info!(
                    attempts = lifecycle.attempts,
                    "push stream reconnect budget exhausted"
                );
                return;
            }
            lifecycle.attempts += 1;
            (
                lifecycle.attempts,
                policy.delay_for_attempt(lifecycle.attempts),
            )
        };

        debug!(
            attempt,
            max_attempts = policy.max_attempts,
            delay_ms = delay.as_millis() as u64,
            "scheduling push stream reconnect"
        );

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;

            if !inner.is_current(epoch) {
                debug!(attempt, "push stream reconnect cancelled");
                return;
            }
            if inner.credentials.credential().is_none() {
                debug!(attempt, "push stream reconnect skipped, signed out");
                return;
            }
            inner.connect();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::SharedCredential;
    use crate::router::handler;
    use crate::testing::{Scripted, ScriptedTransport};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn client_with(
        transport: &ScriptedTransport,
        credentials: SharedCredential,
    ) -> PushClient {
        PushClient::builder(StreamConfig::default())
            .credentials(Arc::new(credentials))
            .transport(Arc::new(transport.clone()))
            .build()
            .unwrap()
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_secs(120)).await;
    }

    fn gaps(transport: &ScriptedTransport) -> Vec<u64> {
        transport
            .open_times()
            .windows(2)
            .map(|w| (w[1] - w[0]).as_millis() as u64)
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_without_credential_is_noop() {
        let transport = ScriptedTransport::new();
        let client = client_with(&transport, SharedCredential::new());

        client.connect();
        settle().await;

        assert_eq!(transport.open_count(), 0);
        assert_eq!(client.state(), ConnectionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_exhausts_after_five_attempts() {
        let transport = ScriptedTransport::new();
        let client = client_with(&transport, SharedCredential::with_token("jwt"));

        client.connect();
        settle().await;

        // Initial open plus five automatic reconnects, then nothing
        assert_eq!(transport.open_count(), 6);
        assert_eq!(gaps(&transport), vec![1000, 2000, 4000, 8000, 16000]);
        assert_eq!(client.attempts(), 5);
        assert_eq!(client.state(), ConnectionState::Closed);

        settle().await;
        assert_eq!(transport.open_count(), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restores_budget_and_delays() {
        let transport = ScriptedTransport::new();
        let client = client_with(&transport, SharedCredential::with_token("jwt"));

        client.connect();
        settle().await;
        assert_eq!(transport.open_count(), 6);

        client.reset_reconnect();
        assert_eq!(client.attempts(), 0);
        client.connect();
        settle().await;

        assert_eq!(transport.open_count(), 12);
        assert_eq!(
            gaps(&transport)[6..].to_vec(),
            vec![1000, 2000, 4000, 8000, 16000]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_successful_open_resets_attempts() {
        let transport = ScriptedTransport::new();
        transport.push(Scripted::Reject(503));
        transport.push(Scripted::Reject(502));
        transport.push(Scripted::Stream(vec![
            "event: connected\ndata: {}\n\n".to_string(),
        ]));
        let client = client_with(&transport, SharedCredential::with_token("jwt"));

        client.connect();
        // Two failures (1s + 2s), then the stream opens and ends
        tokio::time::sleep(Duration::from_millis(3500)).await;

        // Open succeeded on the third attempt, then the body ended and the
        // first reconnect of a fresh budget was scheduled
        assert_eq!(transport.open_count(), 3);
        assert_eq!(client.attempts(), 1);
        assert_eq!(gaps(&transport), vec![1000, 2000]);

        client.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_defeats_pending_timer() {
        let transport = ScriptedTransport::new();
        let client = client_with(&transport, SharedCredential::with_token("jwt"));

        client.connect();
        // First open failed; a 1s reconnect timer is pending
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(transport.open_count(), 1);

        client.disconnect();
        settle().await;

        assert_eq!(transport.open_count(), 1);
        assert_eq!(client.state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_while_connecting() {
        let transport = ScriptedTransport::new();
        transport.push(Scripted::Reject(503));
        transport.push(Scripted::Hang);
        let client = client_with(&transport, SharedCredential::with_token("jwt"));

        client.connect();
        // Timer fires at 1s and the second open hangs
        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(transport.open_count(), 2);
        assert_eq!(client.state(), ConnectionState::Connecting);

        client.disconnect();
        client.disconnect();
        settle().await;

        assert_eq!(transport.open_count(), 2);
        assert_eq!(client.state(), ConnectionState::Closed);
        assert_eq!(client.attempts(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_is_noop_while_connecting() {
        let transport = ScriptedTransport::new();
        transport.push(Scripted::Hang);
        let client = client_with(&transport, SharedCredential::with_token("jwt"));

        client.connect();
        client.connect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        client.connect();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(transport.open_count(), 1);
        client.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_rechecks_credential() {
        let transport = ScriptedTransport::new();
        let credentials = SharedCredential::with_token("jwt");
        let client = client_with(&transport, credentials.clone());

        client.connect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        credentials.clear();
        settle().await;

        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_reach_handlers_in_order() {
        let transport = ScriptedTransport::new();
        transport.push(Scripted::Open(vec![
            "event: note_updated\ndata: {\"note_uuid\":\"n1\"}\n".to_string(),
            "\n: ping\nevent: note_updated\nda".to_string(),
            "ta: {\"note_uuid\":\"n2\"}\n\n".to_string(),
        ]));
        let client = client_with(&transport, SharedCredential::with_token("jwt"));

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let on_note = {
            let seen = Arc::clone(&seen);
            handler(move |payload| seen.lock().push(payload.note_uuid.clone().unwrap()))
        };
        client.on(FrameKind::NoteUpdated, &on_note);

        client.connect();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(*seen.lock(), vec!["n1".to_string(), "n2".to_string()]);
        assert_eq!(client.state(), ConnectionState::Open);
        assert_eq!(transport.last_credential().as_deref(), Some("jwt"));
        client.disconnect();
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_last_handle_disconnects() {
        let transport = ScriptedTransport::new();
        let client = client_with(&transport, SharedCredential::with_token("jwt"));
        let clone = client.clone();

        client.connect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        drop(client);
        drop(clone);
        settle().await;

        assert_eq!(transport.open_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_handlers_holding_weak_handles_do_not_keep_client_alive() {
        let transport = ScriptedTransport::new();
        let client = client_with(&transport, SharedCredential::with_token("jwt"));

        let on_note = {
            let weak = client.downgrade();
            let dedup = client.dedup().clone();
            handler(move |payload| {
                let local = payload
                    .entity_id()
                    .is_some_and(|id| dedup.was_recently_updated(id));
                if !local {
                    if let Some(client) = weak.upgrade() {
                        client.mark_updated_locally("seen");
                    }
                }
            })
        };
        client.on(FrameKind::NoteUpdated, &on_note);
        let weak = client.downgrade();
        let registered = Arc::clone(&on_note);
        drop(on_note);

        client.connect();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(weak.upgrade().is_some());
        drop(client);
        settle().await;

        // One failed open, and no reconnects once the last owner is gone
        assert_eq!(transport.open_count(), 1);
        assert!(weak.upgrade().is_none());
        // The router let go of the handler
        assert_eq!(Arc::strong_count(&registered), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_upgraded_handle_counts_as_owner() {
        let transport = ScriptedTransport::new();
        let client = client_with(&transport, SharedCredential::with_token("jwt"));
        let weak = client.downgrade();

        let upgraded = weak.upgrade().unwrap();
        drop(client);
        upgraded.connect();
        tokio::time::sleep(Duration::from_millis(1500)).await;

        // Still owned: the first reconnect ran
        assert_eq!(transport.open_count(), 2);
        drop(upgraded);
        settle().await;
        assert_eq!(transport.open_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_passthrough() {
        let transport = ScriptedTransport::new();
        let client = client_with(&transport, SharedCredential::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let h = handler(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        client.on(FrameKind::TaskUpdated, &h);
        client.off(&FrameKind::TaskUpdated, &h);
        assert_eq!(client.router().handler_count(&FrameKind::TaskUpdated), 0);

        client.mark_updated_locally("n1");
        assert!(client.was_recently_updated("n1"));
        tokio::time::advance(Duration::from_millis(2000)).await;
        assert!(!client.was_recently_updated("n1"));
        assert!(!client.session_id().is_empty());
    }
}
