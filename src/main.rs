//! `stagepi-streams` command line

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use serde::Serialize;

use stagepi_streams::logging::{init_logging, LogLevel};
use stagepi_streams::{AppConfig, StreamConfig, StreamPatch, StreamService};

#[derive(Debug, Parser)]
#[command(name = "stagepi-streams")]
#[command(about = "Reconcile AES67 streams with their supervised processes")]
struct Cli {
    /// Configuration file (TOML); defaults apply when omitted
    #[arg(long, short, env = "STAGEPI_STREAMS_CONFIG")]
    config: Option<PathBuf>,

    /// Provider namespace to operate on
    #[arg(long)]
    provider: Option<String>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Converge all processes onto the registry and print the report
    Reconcile,
    /// Reconcile, then keep running until interrupted and stop every stream
    Run,
    /// Print the configured streams
    List,
    /// Add a stream from a JSON document
    Add {
        /// File holding the stream document (`-` for stdin)
        file: PathBuf,
    },
    /// Merge a partial JSON document into a stream
    Update {
        /// Stream ID
        id: String,
        /// File holding the partial document (`-` for stdin)
        file: PathBuf,
    },
    /// Delete a stream and its unit
    Remove {
        /// Stream ID
        id: String,
    },
    /// Replace every stream with the list in a JSON document
    Replace {
        /// File holding `{"streams": [...]}` or a bare array (`-` for stdin)
        file: PathBuf,
    },
    /// Print runtime status of one or all streams
    Status {
        /// Stream ID; all streams when omitted
        id: Option<String>,
    },
    /// Stop every configured stream, keeping definitions
    StopAll,
}

#[derive(Serialize)]
struct StreamList<'a> {
    streams: &'a [StreamConfig],
}

#[derive(serde::Deserialize)]
#[serde(untagged)]
enum ReplaceDocument {
    Wrapped { streams: Vec<StreamConfig> },
    Bare(Vec<StreamConfig>),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::from_file(path)?,
        None => AppConfig::default(),
    };
    if let Some(provider) = &cli.provider {
        config.registry.default_provider = provider.clone();
    }
    if let Some(level) = &cli.log_level {
        config.log.level = parse_level(level)?;
    }

    init_logging(&config.log).context("failed to install log subscriber")?;

    let service = StreamService::from_config(&config)?;
    run(&service, cli.command).await
}

async fn run(service: &StreamService, command: Command) -> anyhow::Result<()> {
    match command {
        Command::Reconcile => {
            let report = service.initialize().await?;
            print_json(&report)?;
            if !report.is_clean() {
                bail!("{} stream(s) failed to converge", report.failures.len());
            }
        }
        Command::Run => {
            let report = service.initialize().await?;
            print_json(&report)?;

            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for shutdown signal")?;
            tracing::info!("Shutdown requested");
            service.shutdown().await;
        }
        Command::List => {
            let streams = service.list().await?;
            print_json(&StreamList { streams: &streams })?;
        }
        Command::Add { file } => {
            let config = StreamConfig::from_json(&read_input(&file)?)?;
            let created = service.create(config).await?;
            print_json(&created)?;
        }
        Command::Update { id, file } => {
            let patch = StreamPatch::from_json(&read_input(&file)?)?;
            let updated = service.update(&id, patch).await?;
            print_json(&updated)?;
        }
        Command::Remove { id } => {
            let streams = service.delete(&id).await?;
            print_json(&StreamList { streams: &streams })?;
        }
        Command::Replace { file } => {
            let document: ReplaceDocument = serde_json::from_slice(&read_input(&file)?)
                .context("expected {\"streams\": [...]} or a JSON array of streams")?;
            let configs = match document {
                ReplaceDocument::Wrapped { streams } => streams,
                ReplaceDocument::Bare(streams) => streams,
            };

            let (streams, report) = service.replace_all(configs).await?;
            print_json(&StreamList { streams: &streams })?;
            if !report.is_clean() {
                print_json(&report)?;
                bail!("{} stream(s) failed to converge", report.failures.len());
            }
        }
        Command::Status { id: Some(id) } => {
            print_json(&service.status(&id).await?)?;
        }
        Command::Status { id: None } => {
            print_json(&service.status_all().await?)?;
        }
        Command::StopAll => {
            service.shutdown().await;
        }
    }

    Ok(())
}

fn parse_level(level: &str) -> anyhow::Result<LogLevel> {
    Ok(match level.to_ascii_lowercase().as_str() {
        "trace" => LogLevel::Trace,
        "debug" => LogLevel::Debug,
        "info" => LogLevel::Info,
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        other => bail!("unknown log level '{}'", other),
    })
}

fn read_input(path: &Path) -> anyhow::Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut std::io::stdin(), &mut buf)?;
        return Ok(buf);
    }
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
