//! Deepdive CLI: terminal interface for deep research jobs.
//!
//! `deepdive research` runs a single query to completion; with no
//! subcommand an interactive REPL manages one background job at a time.

mod commands;
mod observer;
mod repl;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Deepdive: cancellable deep research with cited reports
#[derive(Parser, Debug)]
#[command(name = "deepdive", version, about, long_about = None)]
struct Cli {
    /// LLM model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Maximum supervisor iterations
    #[arg(long)]
    max_iterations: Option<usize>,

    /// Workspace directory
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Only print errors on stderr
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Research one query and print the report
    Research {
        /// What to research
        query: String,

        /// Skip the clarification question and research the query as given
        #[arg(short, long)]
        yes: bool,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Subcommand, Debug)]
enum ConfigAction {
    /// Create a workspace configuration file with the defaults
    Init,
    /// Show the merged configuration
    Show,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)));

    let log_dir = deepdive_core::config::log_dir().unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "deepdive.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    if let Some(Commands::Config { action }) = cli.command {
        return commands::handle_config(action, &workspace);
    }

    let mut config = deepdive_core::config::load_config(Some(&workspace), None)
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    if let Some(model) = cli.model {
        config.llm.model = model;
    }
    if let Some(max_iterations) = cli.max_iterations {
        config.research.max_iterations = max_iterations.max(1);
    }

    match cli.command {
        Some(Commands::Research { query, yes }) => repl::run_single_query(&query, yes, config).await,
        _ => repl::run_interactive(config).await,
    }
}
