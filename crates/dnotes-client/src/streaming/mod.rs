//! Push stream wire format
//!
//! The server keeps one long-lived `GET /sse` response open and writes
//! blank-line delimited events to it:
//!
//! ```text
//! : heartbeat
//! event: task_updated
//! data: {"task_uuid":"t-1","task_name":"Ship it","session_id":"1718000000000-3fa85f64a"}
//!
//! ```
//!
//! [`FrameParser`] turns arbitrarily fragmented bytes into [`Frame`]s, which
//! the [`EventRouter`](crate::EventRouter) decodes and fans out.
//!
//! # Example
//!
//! ```
//! use dnotes_client::streaming::FrameParser;
//!
//! let mut parser = FrameParser::new();
//! assert!(parser.feed_str("data: {\"note_uuid\":").is_empty());
//!
//! let frames = parser.feed_str("\"abc\"}\n\n");
//! assert_eq!(frames[0].event_type, "message");
//! ```

mod parser;
mod types;

pub use parser::FrameParser;
pub use types::{
    BusEventKind, Frame, FrameKind, PushPayload, StreamError, StreamResult, DEFAULT_EVENT_TYPE,
};
