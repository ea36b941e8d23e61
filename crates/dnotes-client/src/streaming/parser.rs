//! Push stream parser
//!
//! Decodes the line-oriented server-push wire format into [`Frame`]s.
//! Only the last `data:` line before a terminating blank line is kept.

use bytes::Bytes;
use tracing::{trace, warn};

use super::types::{Frame, DEFAULT_EVENT_TYPE};

/// Default limit for a single line, terminator excluded
pub const DEFAULT_MAX_LINE: usize = 1024 * 1024;

/// Push stream parser state
#[derive(Debug)]
pub struct FrameParser {
    /// Buffer for the incomplete trailing line
    buffer: Vec<u8>,
    /// Most bytes buffered while waiting for a line terminator
    max_line: usize,
    /// Skipping the rest of an oversized line
    discarding: bool,
    pending: PendingFrame,
}

/// Fields of the event being accumulated
#[derive(Debug, Default)]
struct PendingFrame {
    data: String,
    event_type: Option<String>,
}

impl FrameParser {
    /// Create a new parser
    pub fn new() -> Self {
        Self::with_max_line(DEFAULT_MAX_LINE)
    }

    /// Create a parser that buffers at most `max_line` bytes of an unfinished
    /// line; a longer line is skipped up to its terminator
    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_line,
            discarding: false,
            pending: PendingFrame::default(),
        }
    }

    /// Feed bytes into the parser and extract any complete frames
    pub fn feed(&mut self, bytes: Bytes) -> Vec<Frame> {
        let mut frames = Vec::new();

        self.buffer.extend_from_slice(&bytes);

        let mut start = 0;
        while let Some(offset) = self.buffer[start..].iter().position(|&b| b == b'\n') {
            let end = start + offset;
            let line = &self.buffer[start..end];
            start = end + 1;

            if self.discarding {
                // Tail of an oversized line
                self.discarding = false;
                continue;
            }

            // Handle \r\n line endings
            let line = line.strip_suffix(b"\r").unwrap_or(line);

            if let Some(frame) = self.pending.process_line(line) {
                frames.push(frame);
            }
        }
        self.buffer.drain(..start);

        if self.buffer.len() > self.max_line {
            warn!(
                buffered = self.buffer.len(),
                max_line = self.max_line,
                "push stream line too long, skipping it"
            );
            self.buffer.clear();
            self.discarding = true;
        }

        frames
    }

    /// Feed a text chunk (convenience for replay and tests)
    pub fn feed_str(&mut self, chunk: &str) -> Vec<Frame> {
        self.feed(Bytes::copy_from_slice(chunk.as_bytes()))
    }

    /// Number of bytes waiting for a line terminator
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingFrame {
    fn process_line(&mut self, line: &[u8]) -> Option<Frame> {
        if line.is_empty() {
            return self.finish();
        }

        if line.starts_with(b":") {
            trace!("push stream heartbeat/comment");
            return None;
        }

        let line = String::from_utf8_lossy(line);

        if let Some(value) = line.strip_prefix("event:") {
            self.event_type = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("data:") {
            self.data = value.trim().to_string();
        } else {
            trace!("push stream ignored line: {}", line);
        }

        None
    }

    fn finish(&mut self) -> Option<Frame> {
        // A blank line alone never finalizes an event
        if self.data.is_empty() {
            return None;
        }

        let data = std::mem::take(&mut self.data);
        let event_type = self
            .event_type
            .take()
            .unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_string());

        Some(Frame { event_type, data })
    }
}
