//! Replay command - decode a captured push stream offline

use anyhow::{Context, Result};
use bytes::Bytes;
use dnotes_client::{Dispatch, EventBus, EventRouter, FrameParser};
use std::path::Path;
use std::sync::Arc;

use crate::output::{describe_dispatch, summarize, FrameRow, OutputContext};

/// Size of the pieces the capture is fed in, to mimic network chunking
const CHUNK_SIZE: usize = 4096;

/// Parse and route a captured stream file, printing one row per frame
pub fn replay(file: &Path, ctx: &OutputContext) -> Result<()> {
    let capture = std::fs::read(file)
        .with_context(|| format!("Failed to read capture: {}", file.display()))?;

    let rows = replay_bytes(&capture);
    let dropped = rows
        .iter()
        .filter(|row| row.outcome.starts_with("dropped"))
        .count();

    ctx.print(&rows);
    ctx.info(&format!(
        "{} frame(s), {} dropped",
        rows.len(),
        dropped
    ));
    Ok(())
}

/// Route every frame in `capture` through a fresh router
pub fn replay_bytes(capture: &[u8]) -> Vec<FrameRow> {
    let router = EventRouter::new(Arc::new(EventBus::new()));
    let mut parser = FrameParser::new();

    capture
        .chunks(CHUNK_SIZE)
        .flat_map(|chunk| parser.feed(Bytes::copy_from_slice(chunk)))
        .enumerate()
        .map(|(index, frame)| {
            let outcome = router.dispatch(&frame);
            let bus = match &outcome {
                Dispatch::Delivered {
                    broadcast: Some(kind),
                    ..
                } => kind.to_string(),
                _ => String::new(),
            };
            let payload = frame.decode().map(|p| summarize(&p)).unwrap_or_default();
            FrameRow {
                index: index + 1,
                event: frame.event_type,
                outcome: describe_dispatch(&outcome),
                bus,
                payload,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_replay_capture() {
        let capture = b": heartbeat\n\
event: connected\ndata: {}\n\n\
event: task_column_updated\ndata: {\"task_uuid\":\"t-1\",\"new_column\":\"done\"}\n\n\
event: note_updated\ndata: nope\n\n\
data: {\"note_uuid\":\"n-9\"}\n\n";

        let rows = replay_bytes(capture);
        let events: Vec<&str> = rows.iter().map(|r| r.event.as_str()).collect();

        assert_eq!(
            events,
            vec!["connected", "task_column_updated", "note_updated", "message"]
        );
        assert_eq!(rows[1].bus, "sseTaskColumnUpdated");
        assert_eq!(rows[1].payload, "task=t-1 to=done");
        assert!(rows[2].outcome.starts_with("dropped"));
        assert_eq!(rows[3].outcome, "delivered to 0");
        assert_eq!(rows[3].bus, "");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let ctx = OutputContext::new(crate::output::OutputFormat::Json, true, true);
        let err = replay(Path::new("/definitely/not/here.sse"), &ctx).unwrap_err();
        assert!(err.to_string().contains("Failed to read capture"));
    }
}
