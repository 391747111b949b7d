//! Command-line interface for dispatch-relay.
//!
//! Runs the service, drives individual pipeline stages by hand and
//! inspects the delivery queue.

use std::io::{self, IsTerminal, Read};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config;
use crate::core::PipelineError;
use crate::domain::DeliveryOutcome;
use crate::service::{self, Services};

pub mod queue;

/// dispatch-relay - Reliable dispatch-event delivery pipeline
#[derive(Parser, Debug)]
#[command(name = "dispatch-relay")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the admission endpoint, watcher, trigger and sweep timer
    Serve {
        /// Address to bind to (overrides config)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Submit a dispatch event and convert it
    Submit {
        /// Input file (reads from stdin if not provided)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Deliver the artifact right away
        #[arg(long)]
        deliver: bool,
    },

    /// Convert a stored raw event and queue the artifact
    Convert {
        /// Raw event key, e.g. dispatch_101_SO123456.json
        event_key: String,
    },

    /// Deliver one queued artifact
    Deliver {
        /// Artifact name, e.g. dispatch_101_SO123456.csv
        artifact: String,
    },

    /// Attempt every queued artifact once
    Sweep,

    /// Inspect and maintain the delivery queue
    Queue {
        #[command(subcommand)]
        command: queue::QueueCommands,
    },

    /// Show resolved configuration (debug)
    Config,

    /// Check that required settings are present
    Preflight,
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Serve { bind } => serve(bind).await,
            Commands::Submit { input, deliver } => submit(input, deliver).await,
            Commands::Convert { event_key } => convert(&event_key).await,
            Commands::Deliver { artifact } => deliver(&artifact).await,
            Commands::Sweep => sweep().await,
            Commands::Queue { command } => queue::execute(command).await,
            Commands::Config => show_config(),
            Commands::Preflight => preflight(),
        }
    }
}

async fn serve(bind: Option<String>) -> Result<()> {
    let mut cfg = config::config()?.clone();
    if let Some(bind) = bind {
        cfg.server.bind = bind;
    }
    service::serve(&cfg).await
}

/// Admit an event from a file or stdin, then convert it
async fn submit(input_file: Option<PathBuf>, deliver_now: bool) -> Result<()> {
    let raw = if let Some(path) = input_file {
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read input file: {}", path.display()))?
    } else if !io::stdin().is_terminal() {
        let mut buffer = String::new();
        io::stdin()
            .read_to_string(&mut buffer)
            .context("Failed to read from stdin")?;
        buffer
    } else {
        anyhow::bail!("No input provided. Use --input <file> or pipe to stdin");
    };

    let services = Services::new(config::config()?);

    let key = match services.gate.submit(&raw).await {
        Ok(key) => key,
        Err(PipelineError::Validation { missing_fields }) => {
            eprintln!("Validation failed. Missing fields:");
            for field in &missing_fields {
                eprintln!("  - {}", field);
            }
            std::process::exit(2);
        }
        Err(e) => return Err(e.into()),
    };
    println!("Stored {}", key);

    let artifact = services.converter.convert(&key).await?;
    println!("Queued {} ({} rows)", artifact.name, artifact.row_count());

    if deliver_now {
        let outcome = services.orchestrator()?.process_artifact(&artifact.name).await;
        report_outcome(&artifact.name, &outcome)?;
    }

    Ok(())
}

async fn convert(event_key: &str) -> Result<()> {
    let services = Services::new(config::config()?);
    let artifact = services.converter.convert(event_key).await?;

    println!("Queued {} ({} rows, {} bytes)", artifact.name, artifact.row_count(), artifact.size_bytes);
    println!("Digest: {}", artifact.digest());
    Ok(())
}

async fn deliver(artifact: &str) -> Result<()> {
    let services = Services::new(config::config()?);
    let outcome = services.orchestrator()?.process_artifact(artifact).await;
    report_outcome(artifact, &outcome)
}

fn report_outcome(artifact: &str, outcome: &DeliveryOutcome) -> Result<()> {
    match outcome {
        DeliveryOutcome::Delivered => println!("✅ {} delivered and archived", artifact),
        DeliveryOutcome::Skipped => println!("ℹ️  {} already terminal at the endpoint, dequeued", artifact),
        DeliveryOutcome::NotQueued => println!("ℹ️  {} is not queued", artifact),
        DeliveryOutcome::Leased => println!("⏳ {} is being delivered by another invocation", artifact),
        DeliveryOutcome::DeadLettered { attempts } => {
            println!("⚠️  {} dead-lettered after {} attempts", artifact, attempts)
        }
        DeliveryOutcome::DeliveryFailed { error } | DeliveryOutcome::StorageFailed { error } => {
            anyhow::bail!("{} retained in queue: {}", artifact, error)
        }
    }
    Ok(())
}

async fn sweep() -> Result<()> {
    let services = Services::new(config::config()?);
    let report = services.orchestrator()?.sweep().await;

    println!("Sweep Results:");
    println!("  Delivered:      {}", report.delivered);
    println!("  Skipped:        {}", report.skipped);
    println!("  Failed:         {}", report.failed);
    println!("  Dead-lettered:  {}", report.dead_lettered);
    println!("  Leased:         {}", report.leased);
    println!("  Total:          {}", report.attempted());

    if report.failed > 0 {
        println!();
        println!("⚠️  {} artifact(s) retained for the next sweep", report.failed);
    }
    Ok(())
}

fn show_config() -> Result<()> {
    let cfg = config::config()?;

    println!("╔═══════════════════════════════════════════════════════════════╗");
    println!("  dispatch-relay Configuration");
    println!("╚═══════════════════════════════════════════════════════════════╝");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:   {}", cfg.home.display());
    println!("  Blobs:  {}", cfg.blob_dir().display());
    println!("  Queue:  {}", cfg.queue_dir().display());
    println!();
    println!("Namespaces:");
    println!("  Raw events:   {}", cfg.namespaces.raw);
    println!("  Archive:      {}", cfg.namespaces.archive);
    println!("  Dead letter:  {}", cfg.namespaces.dead_letter);
    println!("  Skipped:      {}", cfg.namespaces.skipped);
    println!("  Abandoned:    {}", cfg.namespaces.abandoned);
    println!();
    println!("Endpoint:");
    println!("  Kind:          {:?}", cfg.endpoint.kind);
    if let Some(root) = &cfg.endpoint.root {
        println!("  Root:          {}", root.display());
    }
    if let Some(url) = &cfg.endpoint.url {
        println!("  URL:           {}", url);
    }
    println!("  Upload folder: {}", cfg.endpoint.remote_folder);
    println!("  Processed:     {}", cfg.endpoint.processed_namespace);
    println!("  Failed:        {}", cfg.endpoint.failed_namespace);
    println!("  Timeout:       {}s", cfg.endpoint.timeout_seconds);
    println!();
    println!("Delivery:");
    println!("  Topic:         {}", cfg.delivery.topic);
    println!("  Sweep every:   {}s", cfg.delivery.sweep_interval_seconds);
    println!(
        "  Lease:         {}",
        cfg.delivery
            .lease_seconds
            .map(|s| format!("{}s", s))
            .unwrap_or_else(|| "disabled".to_string())
    );
    println!(
        "  Max attempts:  {}",
        cfg.delivery
            .max_attempts
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unlimited".to_string())
    );
    println!("  Compact after: {} superseded lines", cfg.delivery.compact_after_lines);
    println!();
    println!("Server:");
    println!("  Bind:          {}", cfg.server.bind);
    println!();
    println!("Container type overrides:");
    if cfg.container_types.is_empty() {
        println!("  (using defaults)");
    } else {
        let mut overrides: Vec<_> = cfg.container_types.iter().collect();
        overrides.sort();
        for (k, v) in overrides {
            println!("  {}: {}", k, v);
        }
    }

    Ok(())
}

fn preflight() -> Result<()> {
    let report = config::config()?.preflight();
    if report.passed() {
        println!("✓ {}", report.message());
        Ok(())
    } else {
        anyhow::bail!(report.message())
    }
}
