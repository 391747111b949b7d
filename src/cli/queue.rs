//! Queue inspection CLI commands.
//!
//! - `dispatch-relay queue status` - Show pending/leased/failing counts
//! - `dispatch-relay queue list` - List queued artifacts
//! - `dispatch-relay queue compact` - Rewrite the topic log

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;

use crate::config;
use crate::storage::DurableQueue;

/// Queue subcommands
#[derive(Subcommand, Debug)]
pub enum QueueCommands {
    /// Show queue status
    Status,

    /// List queued artifacts, oldest first
    List {
        /// Maximum number of entries to show
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Drop superseded records from the topic log
    Compact,
}

/// Execute a queue command
pub async fn execute(command: QueueCommands) -> Result<()> {
    let cfg = config::config()?;
    let queue = DurableQueue::new(cfg.queue_dir());
    let topic = cfg.delivery.topic.as_str();

    match command {
        QueueCommands::Status => execute_status(&queue, topic).await,
        QueueCommands::List { limit } => execute_list(&queue, topic, limit).await,
        QueueCommands::Compact => execute_compact(&queue, topic).await,
    }
}

async fn execute_status(queue: &DurableQueue, topic: &str) -> Result<()> {
    let status = queue.status(topic).await?;

    println!();
    println!("Delivery Queue Status ({})", topic);
    println!("══════════════════════════════════════════════════════════════");
    println!();
    println!("  Pending:  {}", status.pending);
    println!("  Leased:   {}", status.leased);
    println!("  Failing:  {}", status.failing);
    println!("  Total:    {}", status.total());
    if let Some(oldest) = status.oldest {
        let age = Utc::now() - oldest;
        println!("  Oldest:   {} ({}m ago)", oldest.format("%Y-%m-%d %H:%M:%S"), age.num_minutes());
    }
    println!();

    Ok(())
}

async fn execute_list(queue: &DurableQueue, topic: &str, limit: usize) -> Result<()> {
    let entries = queue.list(topic).await?;

    if entries.is_empty() {
        println!("Queue is empty");
        return Ok(());
    }

    println!(
        "{:<40} {:<20} {:<9} {:<10}",
        "ARTIFACT", "ENQUEUED", "ATTEMPTS", "SIZE"
    );
    println!("{}", "-".repeat(82));

    for entry in entries.iter().take(limit) {
        println!(
            "{:<40} {:<20} {:<9} {:<10}",
            truncate(&entry.key, 40),
            entry.enqueued_at.format("%Y-%m-%d %H:%M:%S"),
            entry.attempts,
            format!("{}B", entry.payload.len())
        );
        if let Some(error) = &entry.last_error {
            println!("    last error: {}", error);
        }
    }

    if entries.len() > limit {
        println!("... and {} more", entries.len() - limit);
    }

    Ok(())
}

async fn execute_compact(queue: &DurableQueue, topic: &str) -> Result<()> {
    let kept = queue.compact(topic).await?;
    println!("Compacted {}: {} live entr{}", topic, kept, if kept == 1 { "y" } else { "ies" });
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
