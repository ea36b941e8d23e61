//! DailyNotes push client
//!
//! Keeps notes and tasks in sync through the server-push stream: parses the
//! live event stream, reconnects with bounded exponential backoff, fans
//! events out to handlers and to a process-wide bus, and remembers local
//! edits so their server echoes can be skipped.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use dnotes_client::{handler, EventBus, FrameKind, PushClient, SharedCredential, StreamConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let token = SharedCredential::with_token("jwt-from-sign-in");
//!     let bus = EventBus::new();
//!     let client = PushClient::builder(StreamConfig::from_env()?)
//!         .credentials(Arc::new(token))
//!         .bus(Arc::new(bus.clone()))
//!         .build()?;
//!
//!     // Direct handler; capture the dedup guard, not the client, so the
//!     // handler does not keep the connection alive
//!     let on_task = handler({
//!         let dedup = client.dedup().clone();
//!         move |payload| {
//!             let local = payload
//!                 .entity_id()
//!                 .is_some_and(|id| dedup.was_recently_updated(id));
//!             if !local {
//!                 println!("task changed remotely: {:?}", payload.task_name);
//!             }
//!         }
//!     });
//!     client.on(FrameKind::TaskUpdated, &on_task);
//!
//!     // Decoupled listener
//!     let mut events = bus.subscribe();
//!     client.connect();
//!     while let Ok(event) = events.recv().await {
//!         println!("{}: {:?}", event.kind, event.payload);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Testing
//!
//! The `testing` module provides a mock push endpoint and a scripted
//! transport:
//!
//! ```rust,ignore
//! use dnotes_client::testing::{PushScript, TestServer};
//!
//! let script = PushScript::new("jwt").chunk("event: note_updated\ndata: {}\n\n");
//! let server = TestServer::start(script.router()).await?;
//! let client = PushClient::new(server.stream_config()?, Arc::new(SharedCredential::with_token("jwt")))?;
//! ```

pub mod backoff;
pub mod bus;
mod client;
pub mod config;
mod credential;
pub mod dedup;
mod error;
pub mod router;
mod session;
pub mod streaming;
pub mod testing;
pub mod transport;

pub use backoff::ReconnectPolicy;
pub use bus::{BusEvent, BusPublisher, EventBus};
pub use client::{ConnectionState, PushClient, PushClientBuilder, WeakPushClient};
pub use config::{BaseSource, ConfigError, EndpointConfig, StreamConfig};
pub use credential::{CredentialSource, SharedCredential};
pub use dedup::DedupGuard;
pub use error::{DnotesClientError, Result};
pub use router::{handler, Dispatch, DropReason, EventRouter, Handler};
pub use session::StreamSession;
pub use streaming::{BusEventKind, Frame, FrameKind, FrameParser, PushPayload, StreamError};
pub use transport::{HttpTransport, Transport};
