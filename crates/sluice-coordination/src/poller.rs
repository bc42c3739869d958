//! Periodic partition passes
//!
//! [`PollLoop`] asks a [`PartitionSupplier`] for the current candidate keys on
//! every tick and runs a `create_partitions` pass with them. When the shutdown
//! token fires it gives up all local partitions and returns.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::coordinator::{PassSummary, SourceCoordinator};

/// Shortest tick accepted; a zero period would make the ticker panic
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Source of candidate partition keys
#[async_trait]
pub trait PartitionSupplier: Send + Sync {
    async fn candidate_keys(&self) -> anyhow::Result<Vec<String>>;
}

/// Supplier returning a fixed key list
#[derive(Debug, Clone, Default)]
pub struct StaticSupplier {
    keys: Vec<String>,
}

impl StaticSupplier {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            keys: keys.into_iter().map(Into::into).collect(),
        }
    }
}

#[async_trait]
impl PartitionSupplier for StaticSupplier {
    async fn candidate_keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.keys.clone())
    }
}

pub struct PollLoop {
    coordinator: Arc<SourceCoordinator>,
    supplier: Arc<dyn PartitionSupplier>,
    interval: Duration,
}

impl PollLoop {
    /// Intervals below [`MIN_POLL_INTERVAL`] are raised to it.
    pub fn new(
        coordinator: Arc<SourceCoordinator>,
        supplier: Arc<dyn PartitionSupplier>,
        interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            supplier,
            interval: interval.max(MIN_POLL_INTERVAL),
        }
    }

    /// One pass with freshly supplied keys; `None` if the supplier failed
    pub async fn poll_once(&self) -> Option<PassSummary> {
        match self.supplier.candidate_keys().await {
            Ok(keys) => Some(self.coordinator.create_partitions(&keys).await),
            Err(e) => {
                warn!(owner = %self.coordinator.owner_id(), error = %e, "Partition supplier failed, skipping pass");
                None
            }
        }
    }

    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            owner = %self.coordinator.owner_id(),
            interval_ms = self.interval.as_millis() as u64,
            "Partition poll loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Some(summary) = self.poll_once().await {
                        debug!(
                            owner = %self.coordinator.owner_id(),
                            acquired = summary.acquired,
                            errors = summary.errors,
                            "Poll tick finished"
                        );
                    }
                }
            }
        }

        self.coordinator.give_up_partitions();
        info!(owner = %self.coordinator.owner_id(), "Partition poll loop stopped");
    }

    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }
}
