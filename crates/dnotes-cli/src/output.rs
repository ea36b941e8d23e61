//! Output formatting for dnotes-cli (table, json, csv)

use clap::ValueEnum;
use colored::Colorize;
use dnotes_client::{Dispatch, DropReason, FrameKind, PushPayload};
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum OutputFormat {
    /// ASCII table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
    /// CSV format
    Csv,
}

/// Context for output rendering
pub struct OutputContext {
    pub format: OutputFormat,
    pub quiet: bool,
}

impl OutputContext {
    pub fn new(format: OutputFormat, no_color: bool, quiet: bool) -> Self {
        if no_color {
            colored::control::set_override(false);
        }
        Self { format, quiet }
    }

    /// Print a success message (unless in quiet mode)
    pub fn success(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", msg.green());
        }
    }

    /// Print an info message (unless in quiet mode)
    pub fn info(&self, msg: &str) {
        if !self.quiet {
            eprintln!("{}", msg);
        }
    }

    /// Print a warning message
    pub fn warn(&self, msg: &str) {
        eprintln!("{}", msg.yellow());
    }

    /// Print data in the configured format
    pub fn print<T: Tabled + Serialize>(&self, data: &[T]) {
        match self.format {
            OutputFormat::Table => {
                if data.is_empty() {
                    if !self.quiet {
                        println!("No frames");
                    }
                } else {
                    println!("{}", Table::new(data));
                }
            }
            OutputFormat::Json => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(data).unwrap_or_else(|_| "[]".to_string())
                );
            }
            OutputFormat::Csv => print_csv(data),
        }
    }

    /// Print key-value pairs
    pub fn print_kv(&self, pairs: &[(&str, String)]) {
        match self.format {
            OutputFormat::Table => {
                for (key, value) in pairs {
                    println!("{}: {}", key.bold(), value);
                }
            }
            OutputFormat::Json => {
                let map: serde_json::Map<String, serde_json::Value> = pairs
                    .iter()
                    .map(|(k, v)| (k.to_string(), serde_json::Value::String(v.clone())))
                    .collect();
                println!(
                    "{}",
                    serde_json::to_string_pretty(&map).unwrap_or_else(|_| "{}".to_string())
                );
            }
            OutputFormat::Csv => {
                let keys: Vec<&str> = pairs.iter().map(|(k, _)| *k).collect();
                println!("{}", keys.join(","));
                let values: Vec<String> = pairs.iter().map(|(_, v)| escape_csv(v)).collect();
                println!("{}", values.join(","));
            }
        }
    }
}

/// Print data as CSV
fn print_csv<T: Serialize>(data: &[T]) {
    let Some(first) = data.first() else {
        return;
    };

    let first = serde_json::to_value(first).unwrap_or_default();
    if let serde_json::Value::Object(map) = &first {
        let headers: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
        println!("{}", headers.join(","));

        for item in data {
            if let Ok(serde_json::Value::Object(row)) = serde_json::to_value(item) {
                let values: Vec<String> = headers
                    .iter()
                    .map(|h| {
                        row.get(*h)
                            .map(|v| match v {
                                serde_json::Value::String(s) => escape_csv(s),
                                other => escape_csv(&other.to_string()),
                            })
                            .unwrap_or_default()
                    })
                    .collect();
                println!("{}", values.join(","));
            }
        }
    }
}

/// Escape a value for CSV output
pub fn escape_csv(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Short `key=value` summary of the fields set in a payload
pub fn summarize(payload: &PushPayload) -> String {
    let fields: [(&str, Option<String>); 9] = [
        ("note", payload.note_uuid.clone()),
        ("task", payload.task_uuid.clone()),
        ("name", payload.task_name.clone()),
        ("from", payload.old_column.clone()),
        ("to", payload.new_column.clone()),
        ("column", payload.column.clone()),
        ("date_changed", payload.date_changed.map(|b| b.to_string())),
        ("title", payload.title.clone()),
        ("session", payload.session_id.clone()),
    ];

    fields
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| format!("{key}={v}")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Human-readable outcome of routing one frame
pub fn describe_dispatch(outcome: &Dispatch) -> String {
    match outcome {
        Dispatch::Delivered {
            handlers, failed, ..
        } if *failed > 0 => format!("delivered to {handlers} ({failed} failed)"),
        Dispatch::Delivered { handlers, .. } => format!("delivered to {handlers}"),
        Dispatch::Dropped(DropReason::MalformedPayload(e)) => format!("dropped: {e}"),
    }
}

// =============================================================================
// Display types for various commands
// =============================================================================

/// Frame display for replay command
#[derive(Debug, Tabled, Serialize)]
pub struct FrameRow {
    #[tabled(rename = "#")]
    pub index: usize,
    #[tabled(rename = "Event")]
    pub event: String,
    #[tabled(rename = "Outcome")]
    pub outcome: String,
    #[tabled(rename = "Bus")]
    pub bus: String,
    #[tabled(rename = "Payload")]
    pub payload: String,
}

/// Live event display for tail command
#[derive(Debug, Serialize)]
pub struct TailRow {
    pub time: String,
    pub event: String,
    #[serde(flatten)]
    pub payload: PushPayload,
}

impl TailRow {
    pub fn new(time: String, kind: &FrameKind, payload: PushPayload) -> Self {
        Self {
            time,
            event: kind.to_string(),
            payload,
        }
    }
}
