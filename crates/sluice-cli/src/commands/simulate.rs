//! `sluice simulate` command implementation
//!
//! Starts several coordinators in this process, all sharing one store, and
//! lets each run a poll loop plus a worker until every partition is completed.
//! Workers checkpoint each partition a few times, close every even-numbered
//! partition once and complete everything else. Optionally the first node
//! "crashes" while holding a partition, which the others recover once its
//! lease runs out.

use clap::{Args, ValueEnum};
use colored::Colorize;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, Table};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use sluice_coordination::{
    AdmissionMode, InMemoryPartitionStore, PartitionRecord, PartitionStatus, PartitionStore,
    PollLoop, SourceCoordinator, SourcePartition, StaticSupplier, StatsSnapshot,
    MIN_POLL_INTERVAL,
};

use crate::commands::inspect::render_records;
use crate::commands::{connect_postgres, coordinator_config};
use crate::error::{CliError, Result};

/// Checkpoints written per partition before it is closed or completed
const BATCHES_PER_PARTITION: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Memory,
    Postgres,
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Number of coordinators
    #[arg(short, long, default_value_t = 3)]
    pub nodes: usize,

    /// Number of partitions to process
    #[arg(short, long, default_value_t = 12)]
    pub partitions: usize,

    /// Partition store backend
    #[arg(long, value_enum, default_value_t = StoreKind::Memory)]
    pub store: StoreKind,

    /// PostgreSQL connection URL (postgres store only)
    #[arg(long, env = "DATABASE_URL")]
    pub database_url: Option<String>,

    /// Source identifier; a fresh one is generated when omitted
    #[arg(long)]
    pub source: Option<String>,

    /// Interval between partition passes
    #[arg(long, default_value_t = 100)]
    pub poll_interval_ms: u64,

    /// Lease duration
    #[arg(long, default_value_t = 3)]
    pub lease_secs: u64,

    /// Admission mode (disabled, fixed, identity-hash, per-call)
    #[arg(long)]
    pub admission: Option<AdmissionMode>,

    /// Seed for admission decisions
    #[arg(long)]
    pub seed: Option<u64>,

    /// Stop the first node while it holds a partition
    #[arg(long)]
    pub crash_first_node: bool,

    /// Give up if partitions are still open after this long
    #[arg(long, default_value_t = 60)]
    pub timeout_secs: u64,
}

/// Progress checkpoint saved by simulated workers
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
struct Progress {
    batches: u32,
}

struct Node {
    coordinator: Arc<SourceCoordinator>,
    stop: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

pub async fn run(config_path: Option<&Path>, args: &SimulateArgs) -> Result<()> {
    if args.nodes == 0 {
        return Err(CliError::config("simulate needs at least one node"));
    }
    if args.partitions == 0 {
        return Err(CliError::config("simulate needs at least one partition"));
    }

    let generated_source;
    let source = match args.source.as_deref() {
        Some(source) => Some(source),
        None if config_path.is_none() => {
            generated_source = format!("sim-{}", &Uuid::new_v4().simple().to_string()[..8]);
            Some(generated_source.as_str())
        }
        None => None,
    };
    let mut template = coordinator_config(config_path, source)?
        .with_lease_duration(Duration::from_secs(args.lease_secs));
    if let Some(mode) = args.admission {
        template = template.with_admission_mode(mode);
    }

    let store: Arc<dyn PartitionStore> = match args.store {
        StoreKind::Memory => Arc::new(InMemoryPartitionStore::new()),
        StoreKind::Postgres => {
            let store = connect_postgres(args.database_url.as_deref()).await?;
            store.migrate().await?;
            Arc::new(store)
        }
    };

    let keys: Vec<String> = (0..args.partitions).map(|i| format!("part-{:04}", i)).collect();
    let supplier = Arc::new(StaticSupplier::new(keys.clone()));
    let poll_interval = Duration::from_millis(args.poll_interval_ms).max(MIN_POLL_INTERVAL);
    let shutdown = CancellationToken::new();

    let mut nodes = Vec::with_capacity(args.nodes);
    for i in 0..args.nodes {
        let mut config = template.clone().with_owner_id(format!("node-{}", i));
        if let Some(seed) = args.seed {
            config = config.with_admission_seed(seed.wrapping_add(i as u64));
        }
        let coordinator = Arc::new(SourceCoordinator::new(config, store.clone())?);
        let stop = shutdown.child_token();

        let poller = PollLoop::new(coordinator.clone(), supplier.clone(), poll_interval)
            .spawn(stop.clone());
        let worker = tokio::spawn(run_worker(
            coordinator.clone(),
            stop.clone(),
            poll_interval / 2,
            args.crash_first_node && i == 0,
        ));

        nodes.push(Node {
            coordinator,
            stop,
            tasks: vec![poller, worker],
        });
    }

    println!(
        "{} {} nodes, {} partitions, namespace '{}'",
        "Simulating:".cyan().bold(),
        args.nodes,
        args.partitions,
        nodes[0].coordinator.namespace()
    );

    let started = Instant::now();
    let outcome = wait_for_completion(
        &nodes[0].coordinator,
        args.partitions,
        poll_interval,
        Duration::from_secs(args.timeout_secs),
    )
    .await;

    shutdown.cancel();
    let mut handles = Vec::new();
    for node in &mut nodes {
        node.stop.cancel();
        handles.append(&mut node.tasks);
    }
    for joined in join_all(handles).await {
        if let Err(e) = joined {
            warn!(error = %e, "Simulation task panicked");
        }
    }

    let records = outcome?;
    let elapsed = started.elapsed();

    println!("{}", render_nodes(&nodes));
    println!("{}", render_records(&records, chrono::Utc::now()));
    println!("{}", status_summary(&records));

    let completions: u64 = nodes
        .iter()
        .map(|node| node.coordinator.stats().partitions_completed)
        .sum();
    if completions != args.partitions as u64 {
        return Err(CliError::simulation(format!(
            "{} completions recorded for {} partitions",
            completions, args.partitions
        )));
    }

    println!(
        "{} All {} partitions completed in {:.2}s",
        "Done:".green().bold(),
        args.partitions,
        elapsed.as_secs_f64()
    );
    Ok(())
}

/// Poll the store until every partition is completed or `timeout` passes
async fn wait_for_completion(
    observer: &SourceCoordinator,
    expected: usize,
    interval: Duration,
    timeout: Duration,
) -> Result<Vec<PartitionRecord>> {
    let deadline = Instant::now() + timeout;
    loop {
        let records = observer.list_partitions().await?;
        let completed = records
            .iter()
            .filter(|record| record.status == PartitionStatus::Completed)
            .count();
        debug!(completed, expected, "Simulation progress");

        if completed == expected {
            return Ok(records);
        }
        if Instant::now() >= deadline {
            return Err(CliError::simulation(format!(
                "only {} of {} partitions completed within {}s",
                completed,
                expected,
                timeout.as_secs()
            )));
        }
        tokio::time::sleep(interval).await;
    }
}

async fn run_worker(
    coordinator: Arc<SourceCoordinator>,
    stop: CancellationToken,
    idle: Duration,
    crash: bool,
) {
    loop {
        let Some(partition) = coordinator.get_next_partition() else {
            tokio::select! {
                _ = stop.cancelled() => return,
                _ = tokio::time::sleep(idle) => continue,
            }
        };

        if crash {
            warn!(
                owner = %coordinator.owner_id(),
                partition_key = %partition.key(),
                "Simulating a crash while holding a partition"
            );
            stop.cancel();
            return;
        }

        if let Err(e) = process_partition(&coordinator, &partition, &stop).await {
            warn!(partition_key = %partition.key(), error = %e, "Partition processing failed");
        }
        if stop.is_cancelled() {
            return;
        }
    }
}

async fn process_partition(
    coordinator: &SourceCoordinator,
    partition: &SourcePartition,
    stop: &CancellationToken,
) -> sluice_coordination::Result<()> {
    let mut progress: Progress = partition.progress_state()?.unwrap_or_default();

    while progress.batches < BATCHES_PER_PARTITION {
        tokio::select! {
            _ = partition.lease_lost() => {
                info!(partition_key = %partition.key(), "Lease lost, abandoning partition");
                return Ok(());
            }
            _ = stop.cancelled() => return Ok(()),
            _ = tokio::time::sleep(Duration::from_millis(10)) => {}
        }
        progress.batches += 1;
        coordinator
            .save_state_for_partition(partition.key(), &progress)
            .await?;
    }

    if partition.is_lease_lost() {
        return Ok(());
    }
    if partition.closed_count() == 0 && ends_with_even_digit(partition.key()) {
        coordinator
            .close_partition(partition.key(), Duration::ZERO)
            .await
    } else {
        coordinator.complete_partition(partition.key()).await
    }
}

fn ends_with_even_digit(key: &str) -> bool {
    key.chars()
        .last()
        .and_then(|c| c.to_digit(10))
        .is_some_and(|digit| digit % 2 == 0)
}

/// `completed: 10, closed: 0, ...` over all statuses
fn status_summary(records: &[PartitionRecord]) -> String {
    PartitionStatus::ALL
        .iter()
        .map(|status| {
            let count = records.iter().filter(|r| r.status == *status).count();
            format!("{}: {}", status, count)
        })
        .collect::<Vec<_>>()
        .join(", ")
}

fn render_nodes(nodes: &[Node]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_header(vec![
            "Node", "Passes", "Acquired", "Renewed", "Relinquished", "Saves", "Closed",
            "Completed", "Lost", "Conflicts",
        ]);

    let mut total = StatsSnapshot::default();
    for node in nodes {
        let stats = node.coordinator.stats();
        table.add_row(stats_row(node.coordinator.owner_id(), &stats));
        total = total + stats;
    }
    table.add_row(stats_row("total", &total));
    table
}

fn stats_row(label: &str, stats: &StatsSnapshot) -> Vec<String> {
    vec![
        label.to_string(),
        stats.passes.to_string(),
        stats.partitions_acquired.to_string(),
        stats.leases_renewed.to_string(),
        stats.partitions_relinquished.to_string(),
        stats.state_saves.to_string(),
        stats.partitions_closed.to_string(),
        stats.partitions_completed.to_string(),
        stats.leases_lost.to_string(),
        stats.version_conflicts.to_string(),
    ]
}
