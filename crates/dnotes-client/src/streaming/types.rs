//! Types for the push stream

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::StreamSession;

/// Event type used when a frame carries no `event:` line
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// One decoded unit of the push protocol
///
/// The data is kept raw; it is decoded into a [`PushPayload`] when the frame
/// is routed so that a malformed payload only drops this frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Event type from the `event:` line, `"message"` when absent
    pub event_type: String,
    /// Raw data from the last `data:` line
    pub data: String,
}

impl Frame {
    /// Create a frame from an event type and a data string
    pub fn new(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
        }
    }

    /// The typed kind of this frame
    pub fn kind(&self) -> FrameKind {
        FrameKind::from(self.event_type.as_str())
    }

    /// Decode the data as a JSON payload object
    pub fn decode(&self) -> Result<PushPayload, serde_json::Error> {
        serde_json::from_str(&self.data)
    }
}

/// Known event types of the push stream
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// Server acknowledgement sent right after the stream opens
    Connected,
    /// Untyped frame (no `event:` line)
    Message,
    /// A note was created, edited or deleted
    NoteUpdated,
    /// A task changed (name, completion, ordering)
    TaskUpdated,
    /// A task moved to another kanban column
    TaskColumnUpdated,
    /// Any other event type, passed through to direct handlers only
    Other(String),
}

impl FrameKind {
    /// Wire name of this kind
    pub fn as_str(&self) -> &str {
        match self {
            Self::Connected => "connected",
            Self::Message => DEFAULT_EVENT_TYPE,
            Self::NoteUpdated => "note_updated",
            Self::TaskUpdated => "task_updated",
            Self::TaskColumnUpdated => "task_column_updated",
            Self::Other(name) => name,
        }
    }

    /// Bus event this kind is republished as, if any
    pub fn bus_event(&self) -> Option<BusEventKind> {
        match self {
            Self::NoteUpdated => Some(BusEventKind::SseNoteUpdated),
            Self::TaskUpdated => Some(BusEventKind::SseTaskUpdated),
            Self::TaskColumnUpdated => Some(BusEventKind::SseTaskColumnUpdated),
            Self::Connected | Self::Message | Self::Other(_) => None,
        }
    }
}

impl From<&str> for FrameKind {
    fn from(name: &str) -> Self {
        match name {
            "connected" => Self::Connected,
            DEFAULT_EVENT_TYPE => Self::Message,
            "note_updated" => Self::NoteUpdated,
            "task_updated" => Self::TaskUpdated,
            "task_column_updated" => Self::TaskColumnUpdated,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Renamed event keys published on the process-wide bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BusEventKind {
    #[serde(rename = "sseNoteUpdated")]
    SseNoteUpdated,
    #[serde(rename = "sseTaskUpdated")]
    SseTaskUpdated,
    #[serde(rename = "sseTaskColumnUpdated")]
    SseTaskColumnUpdated,
}

impl BusEventKind {
    /// Bus key of this event
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SseNoteUpdated => "sseNoteUpdated",
            Self::SseTaskUpdated => "sseTaskUpdated",
            Self::SseTaskColumnUpdated => "sseTaskColumnUpdated",
        }
    }
}

impl fmt::Display for BusEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a push frame
///
/// Every field is optional; which ones are set depends on the event type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushPayload {
    /// Note identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note_uuid: Option<String>,

    /// Task identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_uuid: Option<String>,

    /// Task display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_name: Option<String>,

    /// Column label the task moved from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_column: Option<String>,

    /// Column label the task moved to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_column: Option<String>,

    /// Column label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,

    /// Whether the note's date changed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_changed: Option<bool>,

    /// Note title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    /// Session that originated the change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl PushPayload {
    /// Identifier of the entity this payload refers to (note first, then task)
    pub fn entity_id(&self) -> Option<&str> {
        self.note_uuid.as_deref().or(self.task_uuid.as_deref())
    }

    /// Whether the change was made by the given session
    pub fn originated_from(&self, session: &StreamSession) -> bool {
        self.session_id.as_deref() == Some(session.id())
    }
}

/// Errors that can occur on the push stream
#[derive(Debug, Error)]
pub enum StreamError {
    /// HTTP/connection error
    #[error("Connection error: {0}")]
    Connection(#[from] reqwest::Error),

    /// Stream URL could not be built
    #[error("Invalid stream URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Server returned an error
    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    /// Credential could not be used as a header value
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    /// Stream was closed by the server
    #[error("Stream closed")]
    Closed,

    /// Stream was cancelled by `disconnect()`
    #[error("Stream cancelled")]
    Cancelled,
}

/// Result type for streaming operations
pub type StreamResult<T> = std::result::Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_kind_round_trips_known_names() {
        for name in [
            "connected",
            "message",
            "note_updated",
            "task_updated",
            "task_column_updated",
        ] {
            let kind = FrameKind::from(name);
            assert!(!matches!(kind, FrameKind::Other(_)), "{name}");
            assert_eq!(kind.as_str(), name);
        }
    }

    #[test]
    fn test_unknown_kind_passes_through() {
        let kind = FrameKind::from("calendar_synced");
        assert_eq!(kind, FrameKind::Other("calendar_synced".into()));
        assert_eq!(kind.to_string(), "calendar_synced");
        assert_eq!(kind.bus_event(), None);
    }

    #[test]
    fn test_bus_mapping() {
        assert_eq!(
            FrameKind::NoteUpdated.bus_event(),
            Some(BusEventKind::SseNoteUpdated)
        );
        assert_eq!(
            FrameKind::TaskUpdated.bus_event(),
            Some(BusEventKind::SseTaskUpdated)
        );
        assert_eq!(
            FrameKind::TaskColumnUpdated.bus_event(),
            Some(BusEventKind::SseTaskColumnUpdated)
        );
        assert_eq!(FrameKind::Connected.bus_event(), None);
        assert_eq!(BusEventKind::SseTaskColumnUpdated.as_str(), "sseTaskColumnUpdated");
    }

    #[test]
    fn test_decode_payload() {
        let frame = Frame::new(
            "task_column_updated",
            r#"{"task_uuid":"t1","task_name":"Ship","old_column":"todo","new_column":"done","session_id":"s-1"}"#,
        );
        let payload = frame.decode().unwrap();
        assert_eq!(payload.task_uuid.as_deref(), Some("t1"));
        assert_eq!(payload.new_column.as_deref(), Some("done"));
        assert_eq!(payload.entity_id(), Some("t1"));
        assert_eq!(payload.note_uuid, None);
    }

    #[test]
    fn test_decode_rejects_non_object() {
        assert!(Frame::new("message", "42").decode().is_err());
        assert!(Frame::new("message", "{not json").decode().is_err());
    }

    #[test]
    fn test_entity_id_prefers_note() {
        let payload = PushPayload {
            note_uuid: Some("n1".into()),
            task_uuid: Some("t1".into()),
            ..Default::default()
        };
        assert_eq!(payload.entity_id(), Some("n1"));
    }
}
