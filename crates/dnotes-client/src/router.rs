//! Per-event-type handler registry and bus fan-out

use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::bus::{BusEvent, BusPublisher};
use crate::streaming::{BusEventKind, Frame, FrameKind, PushPayload};

/// A push event handler
///
/// Handlers are compared by identity, so keep the `Arc` around to remove it
/// again with [`EventRouter::off`].
pub type Handler = Arc<dyn Fn(&PushPayload) + Send + Sync>;

/// Wrap a closure as a [`Handler`]
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&PushPayload) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Outcome of routing one frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The payload decoded and was handed out
    Delivered {
        /// Handlers invoked
        handlers: usize,
        /// Handlers that panicked
        failed: usize,
        /// Bus event published, if the kind is rebroadcast
        broadcast: Option<BusEventKind>,
    },
    /// The frame was discarded
    Dropped(DropReason),
}

/// Why a frame was discarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DropReason {
    /// The data was not a JSON object
    MalformedPayload(String),
}

/// Routes decoded frames to registered handlers and the bus
pub struct EventRouter {
    handlers: Mutex<HashMap<FrameKind, Vec<Handler>>>,
    bus: Arc<dyn BusPublisher>,
}

impl EventRouter {
    /// Create a router publishing to `bus`
    pub fn new(bus: Arc<dyn BusPublisher>) -> Self {
        Self {
            handlers: Mutex::new(HashMap::new()),
            bus,
        }
    }

    /// Register `handler` for `kind`; registering it twice is a no-op
    pub fn on(&self, kind: FrameKind, handler: &Handler) {
        let mut handlers = self.handlers.lock();
        let set = handlers.entry(kind).or_default();
        if !set.iter().any(|h| Arc::ptr_eq(h, handler)) {
            set.push(Arc::clone(handler));
        }
    }

    /// Remove `handler` from `kind`; removing an unknown handler is a no-op
    pub fn off(&self, kind: &FrameKind, handler: &Handler) {
        let mut handlers = self.handlers.lock();
        if let Some(set) = handlers.get_mut(kind) {
            set.retain(|h| !Arc::ptr_eq(h, handler));
            if set.is_empty() {
                handlers.remove(kind);
            }
        }
    }

    /// Remove every handler
    pub fn clear(&self) {
        self.handlers.lock().clear();
    }

    /// Number of handlers registered for `kind`
    pub fn handler_count(&self, kind: &FrameKind) -> usize {
        self.handlers.lock().get(kind).map_or(0, Vec::len)
    }

    /// Decode `frame` and deliver it to handlers and the bus
    pub fn dispatch(&self, frame: &Frame) -> Dispatch {
        let payload = match frame.decode() {
            Ok(payload) => payload,
            Err(e) => {
                warn!(event = %frame.event_type, "dropping push frame: {}", e);
                return Dispatch::Dropped(DropReason::MalformedPayload(e.to_string()));
            }
        };

        let kind = frame.kind();

        // Snapshot so handlers may call on/off without deadlocking
        let handlers: Vec<Handler> = self
            .handlers
            .lock()
            .get(&kind)
            .cloned()
            .unwrap_or_default();

        let mut failed = 0;
        for handler in &handlers {
            if catch_unwind(AssertUnwindSafe(|| handler(&payload))).is_err() {
                failed += 1;
                warn!(event = %kind, "push event handler panicked");
            }
        }

        if kind == FrameKind::Connected {
            debug!(session = ?payload.session_id, "push stream acknowledged");
        }

        let broadcast = kind.bus_event();
        if let Some(bus_kind) = broadcast {
            self.bus.publish(BusEvent {
                kind: bus_kind,
                payload,
            });
        }

        Dispatch::Delivered {
            handlers: handlers.len(),
            failed,
            broadcast,
        }
    }
}

impl fmt::Debug for EventRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let handlers = self.handlers.lock();
        f.debug_struct("EventRouter")
            .field("kinds", &handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
