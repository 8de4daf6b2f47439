use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use replicore_core::config::Config;
use replicore_core::core_replication::{IncomingReplicationProcessor, ProcessorBuilder};
use replicore_core::logging::{init_logging_with_config, LogLevel};
use replicore_core::metrics::MetricsCollector;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

mod process_sandbox;
mod wire;

use process_sandbox::ProcessSandbox;
use wire::{group_by_source, GroupedRecords, ReplayReport, WireConflict};

#[derive(Parser, Debug)]
#[command(name = "replicore")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (TOML); REPLICORE_* variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process a replication batch file and print the resulting state
    Replay {
        /// JSON array of {source, item} records
        batch: PathBuf,

        /// Directory that relative script ids are resolved against
        #[arg(long)]
        scripts_dir: Option<PathBuf>,
    },
    /// Inspect or create configuration files
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write a default configuration file
    Init { path: PathBuf },
    /// Print the effective configuration
    Show,
}

fn expand(path: &Path) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    let expanded = shellexpand::full(&raw).with_context(|| format!("cannot expand {}", raw))?;
    Ok(PathBuf::from(expanded.as_ref()))
}

fn load_config(path: Option<&PathBuf>) -> Result<Config> {
    let mut config = match path {
        Some(path) => {
            let path = expand(path)?;
            Config::from_file(&path).with_context(|| format!("loading {}", path.display()))?
        }
        None => Config::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())?;
    config.validate()?;
    Ok(config)
}

async fn replay(config: &Config, batch: PathBuf, scripts_dir: Option<PathBuf>) -> Result<ReplayReport> {
    let batch = expand(&batch)?;
    let contents =
        std::fs::read_to_string(&batch).with_context(|| format!("reading {}", batch.display()))?;
    let records: Vec<serde_json::Value> =
        serde_json::from_str(&contents).with_context(|| format!("parsing {}", batch.display()))?;
    let GroupedRecords { groups, unreadable } = group_by_source(records);
    for skipped in &unreadable {
        warn!(index = skipped.index, reason = %skipped.reason, "Skipped record without a readable source");
    }

    let scripts_dir = scripts_dir.map(|dir| expand(&dir)).transpose()?;
    let collector = Arc::new(MetricsCollector::new());
    let mut builder = ProcessorBuilder::from_config(config).sandbox(Arc::new(ProcessSandbox::new(scripts_dir)));
    if config.metrics.enabled {
        builder = builder.metrics(collector.clone());
    }
    let processor: Arc<IncomingReplicationProcessor> = Arc::new(builder.build());

    info!(sources = groups.len(), policy = %processor.policy(), "Replaying batch file");

    // One task per source: sources race each other, items of one source stay in order
    let mut handles = Vec::with_capacity(groups.len());
    for (source, items) in groups {
        let processor = processor.clone();
        handles.push(tokio::spawn(async move { processor.process_deliveries(items, source).await }));
    }
    let mut batches = Vec::with_capacity(handles.len());
    for handle in handles {
        batches.push(handle.await.context("batch task panicked")?);
    }

    let conflicts = processor.conflict_sets()?;
    if !conflicts.is_empty() {
        warn!(count = conflicts.len(), "Unresolved conflicts remain");
    }

    Ok(ReplayReport {
        batches,
        unreadable,
        conflicts: conflicts.iter().map(WireConflict::from).collect(),
        tombstones: processor.tombstones().await?,
        status: processor.status()?,
        metrics: config.metrics.enabled.then(|| collector.snapshot()),
    })
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(args.config.as_ref())?;

    let mut log_config = config.logging.to_log_config();
    if let Some(level) = &args.log_level {
        log_config.level = level.parse::<LogLevel>().unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', using 'info'", level);
            LogLevel::Info
        });
    }
    if args.json_logs {
        log_config = log_config.json_format(true);
    }
    init_logging_with_config(log_config)?;

    match args.command {
        Command::Replay { batch, scripts_dir } => {
            let report = replay(&config, batch, scripts_dir).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Config { action: ConfigAction::Init { path } } => {
            let path = expand(&path)?;
            Config::default().save_to_file(&path)?;
            info!(path = %path.display(), "Wrote default configuration");
        }
        Command::Config { action: ConfigAction::Show } => {
            println!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
