//! `sluice inspect` command implementation
//!
//! Lists the lease records of one source, as a table or as JSON.

use chrono::{DateTime, Utc};
use clap::Args;
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use std::path::Path;

use sluice_coordination::{PartitionRecord, PartitionStatus, PartitionStore};

use crate::commands::{connect_postgres, coordinator_config};
use crate::error::Result;

#[derive(Args, Debug, Clone)]
pub struct InspectArgs {
    /// Source identifier whose partitions to list
    #[arg(short, long)]
    pub source: String,

    /// Partition prefix the source was scoped with
    #[arg(long)]
    pub prefix: Option<String>,

    /// PostgreSQL connection URL
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Print records as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(config_path: Option<&Path>, args: &InspectArgs) -> Result<()> {
    let mut config = coordinator_config(config_path, Some(&args.source))?;
    if let Some(ref prefix) = args.prefix {
        config.partition_prefix = Some(prefix.clone());
    }
    let namespace = config.namespace()?;

    let store = connect_postgres(args.database_url.as_deref()).await?;
    let records = store.list(&namespace).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&records)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("No partitions found in namespace '{}'.", namespace);
        return Ok(());
    }

    println!("{} {}", "Namespace:".cyan().bold(), namespace);
    println!("{}", render_records(&records, Utc::now()));
    Ok(())
}

pub(crate) fn render_records(records: &[PartitionRecord], now: DateTime<Utc>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            "Partition", "Status", "Owner", "Version", "Lease", "Reopen", "Closed", "Progress",
        ]);

    for record in records {
        table.add_row(vec![
            record.partition_key.clone(),
            status_label(record.status),
            record.owner.clone().unwrap_or_else(|| "-".to_string()),
            record.version.to_string(),
            relative(record.ownership_timeout, now),
            relative(record.reopen_at, now),
            record.closed_count.to_string(),
            record
                .progress_state
                .as_deref()
                .map(|state| truncate(state, 40))
                .unwrap_or_else(|| "-".to_string()),
        ]);
    }
    table
}

fn status_label(status: PartitionStatus) -> String {
    match status {
        PartitionStatus::Unassigned => status.as_str().yellow().to_string(),
        PartitionStatus::Assigned => status.as_str().green().to_string(),
        PartitionStatus::Closed => status.as_str().blue().to_string(),
        PartitionStatus::Completed => status.as_str().dimmed().to_string(),
    }
}

/// `in 42s` / `3s ago` relative to `now`
fn relative(at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> String {
    let Some(at) = at else {
        return "-".to_string();
    };
    let seconds = (at - now).num_seconds();
    if seconds >= 0 {
        format!("in {}s", seconds)
    } else {
        format!("{}s ago", -seconds)
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}
