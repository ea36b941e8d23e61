//! dnotes - command-line tool for the DailyNotes push stream
//!
//! Follows the live stream, replays captured streams offline and shows the
//! resolved stream endpoint.

mod commands;
mod config;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::Config;
use crate::output::{OutputContext, OutputFormat};

#[derive(Parser)]
#[command(name = "dnotes")]
#[command(author, version, about = "DailyNotes push stream CLI")]
#[command(propagate_version = true)]
struct Cli {
    /// API base URL (the stream lives at <server>/sse)
    #[arg(short, long, env = "DNOTES_API_URL")]
    server: Option<String>,

    /// Bearer token
    #[arg(short, long, env = "DNOTES_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Configuration file path
    #[arg(short, long, env = "DNOTES_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum)]
    output: Option<OutputFormat>,

    /// Disable colored output
    #[arg(long)]
    no_color: bool,

    /// Minimal output (for scripting)
    #[arg(short, long)]
    quiet: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow the live push stream (reconnects with backoff)
    Tail {
        /// Event types to follow, comma separated (default: all known)
        #[arg(long, value_delimiter = ',')]
        events: Vec<String>,
    },

    /// Parse and route a captured stream file
    Replay {
        /// File holding raw stream bytes
        file: PathBuf,
    },

    /// Show the resolved stream endpoint and client settings
    Endpoint,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();

    // Load config file
    let config = if let Some(config_path) = &cli.config {
        Config::load_from(config_path)?
    } else {
        Config::load().unwrap_or_default()
    };

    let merged = config.merge_with_args(
        cli.server.as_deref(),
        cli.token.as_deref(),
        cli.no_color,
        |key| std::env::var(key).ok(),
    )?;

    let format = cli
        .output
        .or_else(|| {
            config
                .output
                .as_deref()
                .and_then(|s| OutputFormat::from_str(s, true).ok())
        })
        .unwrap_or_default();

    let ctx = OutputContext::new(format, merged.no_color, cli.quiet);
    debug!(
        base = %merged.stream.endpoint.base_source(),
        signed_in = merged.token.is_some(),
        "configuration resolved"
    );

    match &cli.command {
        Commands::Tail { events } => {
            commands::tail(merged.stream, merged.token, events, &ctx).await?;
        }

        Commands::Replay { file } => {
            commands::replay(file, &ctx)?;
        }

        Commands::Endpoint => {
            commands::endpoint(&merged.stream, &ctx)?;
        }
    }

    Ok(())
}
