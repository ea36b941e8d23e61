//! Process-wide broadcast of renamed push events
//!
//! Consumers that never registered a handler on the router (sidebars,
//! calendars, kanban boards) listen here instead.

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::streaming::{BusEventKind, PushPayload};

/// Default capacity of the bus channel
pub const DEFAULT_BUS_CAPACITY: usize = 256;

/// An event published on the bus
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BusEvent {
    /// Renamed event key
    pub kind: BusEventKind,
    /// Decoded payload of the originating frame
    pub payload: PushPayload,
}

/// Sink for bus events, injected into the router
pub trait BusPublisher: Send + Sync {
    /// Publish one event to every current listener
    fn publish(&self, event: BusEvent);
}

/// Broadcast bus backed by a Tokio broadcast channel
///
/// Each listener owns its receiver, so listeners can come and go while an
/// event is being published without affecting delivery to the others.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl EventBus {
    /// Create a bus with the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    /// Create a bus buffering up to `capacity` events per lagging listener
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Start listening; drop the receiver to stop
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Number of live listeners
    pub fn listener_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl BusPublisher for EventBus {
    fn publish(&self, event: BusEvent) {
        let kind = event.kind;
        // No listeners is fine
        match self.sender.send(event) {
            Ok(listeners) => trace!(%kind, listeners, "bus event published"),
            Err(_) => trace!(%kind, "bus event published with no listeners"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(kind: BusEventKind) -> BusEvent {
        BusEvent {
            kind,
            payload: PushPayload::default(),
        }
    }

    #[tokio::test]
    async fn test_every_listener_receives() {
        let bus = EventBus::new();
        let mut first = bus.subscribe();
        let mut second = bus.subscribe();

        bus.publish(event(BusEventKind::SseNoteUpdated));

        assert_eq!(first.recv().await.unwrap().kind, BusEventKind::SseNoteUpdated);
        assert_eq!(second.recv().await.unwrap().kind, BusEventKind::SseNoteUpdated);
    }

    #[test]
    fn test_publish_without_listeners() {
        let bus = EventBus::new();
        bus.publish(event(BusEventKind::SseTaskUpdated));
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_listener_churn() {
        let bus = EventBus::new();
        let mut stays = bus.subscribe();
        let leaves = bus.subscribe();

        drop(leaves);
        bus.publish(event(BusEventKind::SseTaskUpdated));
        let mut late = bus.subscribe();
        bus.publish(event(BusEventKind::SseTaskColumnUpdated));

        assert_eq!(stays.recv().await.unwrap().kind, BusEventKind::SseTaskUpdated);
        assert_eq!(stays.recv().await.unwrap().kind, BusEventKind::SseTaskColumnUpdated);
        // Late listeners only see events published after they joined
        assert_eq!(late.recv().await.unwrap().kind, BusEventKind::SseTaskColumnUpdated);
    }
}
