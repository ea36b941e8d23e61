//! Tail command - follow the live push stream

use anyhow::{bail, Result};
use dnotes_client::{
    handler, ConnectionState, FrameKind, Handler, PushClient, PushPayload, SharedCredential,
    StreamConfig,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::output::{escape_csv, summarize, OutputContext, OutputFormat, TailRow};

/// Kinds followed when no `--events` filter is given
const DEFAULT_KINDS: [FrameKind; 5] = [
    FrameKind::Connected,
    FrameKind::Message,
    FrameKind::NoteUpdated,
    FrameKind::TaskUpdated,
    FrameKind::TaskColumnUpdated,
];

/// Follow the push stream until Ctrl+C
pub async fn tail(
    config: StreamConfig,
    token: Option<String>,
    events: &[String],
    ctx: &OutputContext,
) -> Result<()> {
    let Some(token) = token else {
        bail!("No token available; pass --token or set DNOTES_TOKEN");
    };

    let url = config.endpoint.stream_url()?;
    let client = PushClient::new(config, Arc::new(SharedCredential::with_token(token)))?;

    let kinds: Vec<FrameKind> = if events.is_empty() {
        DEFAULT_KINDS.to_vec()
    } else {
        events.iter().map(|e| FrameKind::from(e.as_str())).collect()
    };

    // Handlers only forward; printing happens on this task
    let (tx, mut rx) = mpsc::unbounded_channel::<(FrameKind, PushPayload)>();
    let handlers: Vec<(FrameKind, Handler)> = kinds
        .into_iter()
        .map(|kind| {
            let tx = tx.clone();
            let tagged = kind.clone();
            let h = handler(move |payload| {
                let _ = tx.send((tagged.clone(), payload.clone()));
            });
            client.on(kind.clone(), &h);
            (kind, h)
        })
        .collect();

    ctx.info(&format!("Following {} (session {})", url, client.session_id()));
    ctx.info("Press Ctrl+C to stop");

    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    if ctx.format == OutputFormat::Csv {
        println!("time,event,payload");
    }

    client.connect();
    let mut last_state = client.state();

    while running.load(Ordering::SeqCst) {
        tokio::select! {
            Some((kind, payload)) = rx.recv() => {
                print_event(&kind, payload, ctx);
            }
            _ = tokio::time::sleep(tokio::time::Duration::from_millis(100)) => {
                let state = client.state();
                if state != last_state {
                    report_state(state, &client, ctx);
                    last_state = state;
                }
            }
        }
    }

    ctx.info("\nStopping...");
    for (kind, h) in &handlers {
        client.off(kind, h);
    }
    client.disconnect();
    ctx.success("Disconnected");

    Ok(())
}

fn report_state(state: ConnectionState, client: &PushClient, ctx: &OutputContext) {
    match state {
        ConnectionState::Open => ctx.success("Stream open"),
        ConnectionState::Closed => {
            let attempts = client.attempts();
            let max = client.config().reconnect.max_attempts;
            if attempts >= max {
                ctx.warn("Stream closed; reconnect budget exhausted");
            } else {
                ctx.warn(&format!("Stream closed; reconnect {attempts}/{max} scheduled"));
            }
        }
        ConnectionState::Connecting => ctx.info("Connecting..."),
        ConnectionState::Idle => {}
    }
}

fn print_event(kind: &FrameKind, payload: PushPayload, ctx: &OutputContext) {
    let time = chrono::Local::now().format("%H:%M:%S").to_string();
    match ctx.format {
        OutputFormat::Table => {
            println!("[{}] {:<20} {}", time, kind.as_str(), summarize(&payload));
        }
        OutputFormat::Json => {
            if let Ok(json) = serde_json::to_string(&TailRow::new(time, kind, payload)) {
                println!("{}", json);
            }
        }
        OutputFormat::Csv => {
            println!("{},{},{}", time, kind.as_str(), escape_csv(&summarize(&payload)));
        }
    }
}
