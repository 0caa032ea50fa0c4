//! Terminal interface for the DeepResearch engine.
//!
//! Drives research runs with live progress, inspects stored sessions,
//! and compares completed runs.

mod commands;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// DeepResearch: multi-stage research runs powered by Gemini
#[derive(Parser, Debug)]
#[command(name = "deepresearch", version, about, long_about = None)]
struct Cli {
    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// List stored research sessions, newest first
    List {
        /// Emit raw JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show one session in full
    Show {
        /// Session id
        id: String,
        /// Emit raw JSON instead of a rendered report
        #[arg(long)]
        json: bool,
    },
    /// Start a new research run
    Start {
        /// Research query
        query: String,
        /// Extend a previous session, carrying its findings as context
        #[arg(short, long)]
        parent: Option<String>,
        /// Use the offline mock collaborator instead of Gemini
        #[arg(long)]
        mock: bool,
    },
    /// Continue a stored session with a follow-up query
    Continue {
        /// Parent session id
        id: String,
        /// Follow-up query
        query: String,
        /// Use the offline mock collaborator instead of Gemini
        #[arg(long)]
        mock: bool,
    },
    /// Attach a local document to a session
    Upload {
        /// Session id
        id: String,
        /// File to attach
        path: PathBuf,
    },
    /// Compare two completed sessions
    Compare {
        /// First session id
        id_a: String,
        /// Second session id
        id_b: String,
        /// Emit raw JSON instead of rendered output
        #[arg(long)]
        json: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a default configuration file in the workspace
    Init,
    /// Show the effective merged configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    // Human-readable layer for stderr (always active)
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_filter(EnvFilter::new(filter));

    // JSON file layer for structured logging
    let log_dir = directories::ProjectDirs::from("dev", "deepresearch", "deepresearch")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "deepresearch.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    // Resolve workspace
    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace).await
}
