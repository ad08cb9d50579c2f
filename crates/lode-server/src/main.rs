//! Lode CLI: record assistant terminal sessions, serve the query
//! protocol, and manage extracted gems.

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use lode_core::{
    ExtractionConfig, ExtractionPipeline, GemStore, HistoryStore, HostedSummarizer,
    LocalSummarizer, SessionRecorder, Summarizer,
};
use lode_server::config::Config;
use lode_server::logging::{self, LogConfig, LogFormat};
use lode_server::rpc::RpcServer;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;

#[derive(Parser, Debug)]
#[command(name = "lode")]
#[command(about = "Session history capture and query server for AI coding assistants")]
#[command(version)]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override database path from config
    #[arg(long, value_name = "FILE")]
    db_path: Option<PathBuf>,

    /// Enable verbose logging (INFO level for most targets)
    #[arg(short, long)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Enable trace logging (TRACE level for everything)
    #[arg(long)]
    trace: bool,

    /// Quiet mode (WARN and ERROR only)
    #[arg(short, long)]
    quiet: bool,

    /// Set log level for specific targets (e.g., "store=debug").
    /// Can be specified multiple times. Targets are prefixed with "lode::" automatically.
    #[arg(long = "log", value_name = "TARGET=LEVEL")]
    log_overrides: Vec<String>,

    /// Log output format
    #[arg(long = "log-format", value_name = "FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the JSON-RPC query protocol over stdin/stdout
    Serve,
    /// Record a session from piped stdin
    Record {
        /// Assistant tool being recorded
        #[arg(long, default_value = "claude")]
        tool: String,
        /// Full command line that produced the stream
        #[arg(long, default_value = "")]
        command: String,
    },
    /// Print database statistics
    Stats,
    /// Manage extracted gems in the current project
    Gems {
        #[command(subcommand)]
        action: GemAction,
    },
}

#[derive(Subcommand, Debug)]
enum GemAction {
    /// List pending and committed gems
    List,
    /// Accept a pending gem into the committed set
    Accept { id: String },
    /// Discard a pending gem
    Reject { id: String },
    /// Search committed gems by substring
    Search { query: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = LogConfig::from_cli(
        cli.verbose,
        cli.debug,
        cli.trace,
        cli.quiet,
        cli.log_overrides,
        cli.log_format,
    );
    logging::init(&log_config);

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(db_path) = cli.db_path {
        config.db_path = db_path;
    }

    let problems = config.validate();
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("config error: {problem}");
        }
        bail!("invalid configuration ({} problems)", problems.len());
    }

    match cli.command {
        Command::Serve => serve(&config),
        Command::Record { tool, command } => record(&config, tool, command).await,
        Command::Stats => stats(&config),
        Command::Gems { action } => gems(action),
    }
}

fn serve(config: &Config) -> Result<()> {
    let store = Arc::new(HistoryStore::open(&config.db_path)?);
    tracing::info!(
        target: "lode::startup",
        "Serving query protocol over stdio (db: {})",
        config.db_path.display()
    );

    let server = RpcServer::new(store);
    let stdin = std::io::stdin();
    let stdout = std::io::stdout();
    server.run(stdin.lock(), stdout.lock())
}

async fn record(config: &Config, tool: String, command: String) -> Result<()> {
    let store = Arc::new(HistoryStore::open(&config.db_path)?);
    let cwd = std::env::current_dir()?;

    let pipeline = if config.extraction.enabled {
        let summarizer = build_summarizer(config)?;
        Some(Arc::new(ExtractionPipeline::new(
            Some(summarizer),
            GemStore::new(&cwd),
            ExtractionConfig {
                client: tool.clone(),
                token_threshold: config.extraction.token_threshold,
                overlap_tokens: config.extraction.overlap_tokens,
                diff: git_diff(),
            },
        )))
    } else {
        None
    };

    let recorder_config = lode_core::RecorderConfig {
        tool,
        command,
        cwd: cwd.display().to_string(),
        dedup_window: Duration::from_millis(config.dedup_window_ms),
        sync_interval: Duration::from_secs(config.sync_interval_secs),
        retention_days: config.retention_days,
        max_db_bytes: config.max_db_bytes,
    };
    let mut recorder = SessionRecorder::start(store, pipeline, recorder_config)?;

    let mut stdin = tokio::io::stdin();
    let mut buf = [0u8; 8192];
    loop {
        let n = stdin.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        recorder.write(&buf[..n]);
    }

    let session_id = recorder.stop().await;
    println!("{session_id}");
    Ok(())
}

fn build_summarizer(config: &Config) -> Result<Arc<dyn Summarizer>> {
    let e = &config.extraction;
    match e.backend.as_str() {
        "local" => Ok(Arc::new(LocalSummarizer::new(
            e.base_url.clone(),
            e.model.clone(),
        ))),
        "hosted" => Ok(Arc::new(HostedSummarizer::new(
            e.base_url.clone(),
            e.model.clone(),
            e.api_key.clone(),
        )?)),
        other => bail!("unknown extraction backend '{other}'"),
    }
}

fn stats(config: &Config) -> Result<()> {
    let store = HistoryStore::open(&config.db_path)?;
    let stats = store.get_stats()?;

    println!("database: {}", config.db_path.display());
    println!("size: {} bytes", stats.db_bytes);
    println!("sessions: {}", stats.session_count);
    println!("tool uses: {}", stats.tool_use_count);
    println!("file touches: {}", stats.file_touch_count);
    if let Some(oldest) = stats.oldest_session {
        println!("oldest session: {}", oldest.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    if let Some(newest) = stats.newest_session {
        println!("newest session: {}", newest.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    Ok(())
}

fn gems(action: GemAction) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let store = GemStore::new(&cwd);

    match action {
        GemAction::List => {
            let pending = store.pending_gems();
            let committed = store.committed_gems();
            if !pending.is_empty() {
                println!("Pending:");
                for gem in &pending {
                    print_gem(gem);
                }
            }
            if !committed.is_empty() {
                println!("Committed:");
                for gem in &committed {
                    print_gem(gem);
                }
            }
            if pending.is_empty() && committed.is_empty() {
                println!("No gems recorded for this project.");
            }
        }
        GemAction::Accept { id } => {
            let commit = git_head();
            let gem = store.accept_gem(&id, commit.as_deref())?;
            println!("Accepted: {}", gem.title);
        }
        GemAction::Reject { id } => {
            let gem = store.reject_gem(&id)?;
            println!("Rejected: {}", gem.title);
        }
        GemAction::Search { query } => {
            let hits = store.search_gems(&query);
            if hits.is_empty() {
                println!("No matches.");
            }
            for gem in &hits {
                print_gem(gem);
            }
        }
    }
    Ok(())
}

fn print_gem(gem: &lode_types::Gem) {
    println!(
        "  {} [{}] {} - {}",
        lode_types::short_id(&gem.id),
        gem.gem_type.as_str(),
        gem.title,
        gem.summary
    );
}

/// Best-effort HEAD commit of the current directory.
fn git_head() -> Option<String> {
    let output = std::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Best-effort uncommitted diff, passed to the summarizer as context.
fn git_diff() -> String {
    std::process::Command::new("git")
        .args(["diff", "--stat"])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| String::from_utf8_lossy(&o.stdout).into_owned())
        .unwrap_or_default()
}
