//! Source coordinator facade
//!
//! The single entry point a data source talks to. A typical source loop:
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use sluice_coordination::{CoordinatorConfig, InMemoryPartitionStore, SourceCoordinator};
//!
//! # async fn run() -> sluice_coordination::Result<()> {
//! let config = CoordinatorConfig::new("orders").with_owner_id("node-a");
//! let coordinator = SourceCoordinator::new(config, Arc::new(InMemoryPartitionStore::new()))?;
//!
//! coordinator.create_partitions(&["2026-01", "2026-02"]).await;
//! while let Some(partition) = coordinator.get_next_partition() {
//!     // ... read the partition, stopping early if partition.is_lease_lost()
//!     coordinator.save_state_for_partition(partition.key(), &serde_json::json!({"offset": 10})).await?;
//!     coordinator.close_partition(partition.key(), Duration::from_secs(3600)).await?;
//! }
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::client::{RetryPolicy, StoreClient};
use crate::config::CoordinatorConfig;
use crate::error::{CoordinationError, Result};
use crate::gate::AdmissionGate;
use crate::lease::{LeaseOutcome, LeaseProtocol};
use crate::manager::PartitionManager;
use crate::partition::{deadline_after, PartitionRecord, PartitionStatus, SourcePartition};
use crate::stats::{CoordinatorStats, Counter, StatsSnapshot};
use crate::store::PartitionStore;

/// Attempts at a read-modify-write of an owned record before giving up on a
/// run of version conflicts
const MAX_OWNED_UPDATE_ATTEMPTS: u32 = 3;

/// Per-outcome counts of one `create_partitions` pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassSummary {
    pub evaluated: usize,
    pub created: usize,
    pub acquired: usize,
    pub renewed: usize,
    pub relinquished: usize,
    pub conflicts: usize,
    pub skipped: usize,
    pub errors: usize,
}

impl PassSummary {
    fn record(&mut self, outcome: LeaseOutcome) {
        match outcome {
            LeaseOutcome::Created => self.created += 1,
            LeaseOutcome::Acquired => self.acquired += 1,
            LeaseOutcome::Renewed => self.renewed += 1,
            LeaseOutcome::Relinquished => self.relinquished += 1,
            LeaseOutcome::Conflict => self.conflicts += 1,
            LeaseOutcome::Skipped(_) => self.skipped += 1,
        }
    }
}

pub struct SourceCoordinator {
    namespace: String,
    owner_id: String,
    lease_duration: Duration,
    max_closed_count: Option<u32>,
    client: Arc<StoreClient>,
    manager: Arc<PartitionManager>,
    stats: Arc<CoordinatorStats>,
    protocol: LeaseProtocol,
    pass_lock: Mutex<()>,
}

impl SourceCoordinator {
    /// Build a coordinator; malformed configuration is rejected here and
    /// nowhere else.
    pub fn new(config: CoordinatorConfig, store: Arc<dyn PartitionStore>) -> Result<Self> {
        config.validate()?;

        let namespace = config.namespace()?;
        let owner_id = config.resolve_owner_id()?;
        let lease_duration = config.lease_duration();
        deadline_after(Utc::now(), lease_duration)?;

        let client = Arc::new(StoreClient::new(store, RetryPolicy::from(&config.retry)));
        let manager = Arc::new(PartitionManager::new());
        let stats = Arc::new(CoordinatorStats::new());
        let gate = AdmissionGate::new(&config.admission, &owner_id);

        info!(
            namespace = %namespace,
            owner = %owner_id,
            lease_secs = lease_duration.as_secs(),
            admission_mode = %gate.mode(),
            admission_share = ?gate.share(),
            "Source coordinator initialized"
        );

        let protocol = LeaseProtocol::new(
            client.clone(),
            manager.clone(),
            stats.clone(),
            gate,
            namespace.clone(),
            owner_id.clone(),
            lease_duration,
        );

        Ok(Self {
            namespace,
            owner_id,
            lease_duration,
            max_closed_count: config.max_closed_count,
            client,
            manager,
            stats,
            protocol,
            pass_lock: Mutex::new(()),
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn manager(&self) -> &PartitionManager {
        &self.manager
    }

    /// Run one assignment pass over the candidate keys, in order.
    ///
    /// Per-key failures are logged and counted; the pass always continues
    /// with the next key. A pass started while another is running on this
    /// coordinator returns immediately with an empty summary.
    pub async fn create_partitions<K>(&self, keys: &[K]) -> PassSummary
    where
        K: AsRef<str> + Sync,
    {
        let Ok(_pass) = self.pass_lock.try_lock() else {
            debug!(owner = %self.owner_id, "Partition pass already running, skipping");
            return PassSummary::default();
        };

        self.stats.incr(Counter::Passes);
        let mut summary = PassSummary::default();
        let mut seen = HashSet::new();

        for key in keys {
            let key: &str = key.as_ref();
            if !seen.insert(key) {
                continue;
            }
            summary.evaluated += 1;

            match self.protocol.evaluate(key).await {
                Ok(outcome) => summary.record(outcome),
                Err(e) => {
                    summary.errors += 1;
                    self.stats.incr(Counter::StoreErrors);
                    error!(partition_key = %key, error = %e, "Failed to evaluate partition");
                }
            }
        }

        debug!(
            owner = %self.owner_id,
            evaluated = summary.evaluated,
            acquired = summary.acquired,
            renewed = summary.renewed,
            queued = self.manager.queued_len(),
            "Partition pass finished"
        );

        summary
    }

    /// Next queued partition, if any
    pub fn get_next_partition(&self) -> Option<SourcePartition> {
        let next = self.manager.next_partition();
        if next.is_none() {
            self.stats.incr(Counter::EmptyPolls);
        }
        next
    }

    /// Mark a partition permanently done
    pub async fn complete_partition(&self, key: &str) -> Result<()> {
        let Some(record) = self
            .update_owned(key, "complete", |record| Ok(record.completed()))
            .await?
        else {
            return Ok(());
        };

        self.manager.release(key);
        self.stats.incr(Counter::PartitionsCompleted);
        info!(partition_key = %key, version = record.version, "Completed partition");
        Ok(())
    }

    /// Release a partition until `reopen_after` has elapsed
    pub async fn close_partition(&self, key: &str, reopen_after: Duration) -> Result<()> {
        let reopen_at = deadline_after(Utc::now(), reopen_after)?;
        let max_closed_count = self.max_closed_count;

        let Some(record) = self
            .update_owned(key, "close", |record| {
                Ok(record.closed(reopen_at, max_closed_count))
            })
            .await?
        else {
            return Ok(());
        };

        self.manager.release(key);
        if record.status == PartitionStatus::Completed {
            self.stats.incr(Counter::PartitionsCompleted);
            info!(
                partition_key = %key,
                closed_count = record.closed_count,
                "Closed partition reached its close limit and is now completed"
            );
        } else {
            self.stats.incr(Counter::PartitionsClosed);
            info!(
                partition_key = %key,
                closed_count = record.closed_count,
                %reopen_at,
                "Closed partition"
            );
        }
        Ok(())
    }

    /// Persist progress for a held partition and extend its lease
    pub async fn save_state_for_partition<S>(&self, key: &str, state: &S) -> Result<()>
    where
        S: Serialize + ?Sized,
    {
        let serialized = serde_json::to_string(state)?;
        self.save_raw_state_for_partition(key, Some(serialized)).await
    }

    /// Persist an already serialized progress state
    pub async fn save_raw_state_for_partition(
        &self,
        key: &str,
        state: Option<String>,
    ) -> Result<()> {
        let lease_until = self.lease_deadline()?;

        let saved = self
            .update_owned(key, "save_state", |record| {
                Ok(record.with_progress_state(state.clone(), lease_until))
            })
            .await?;

        if saved.is_some() {
            self.stats.incr(Counter::StateSaves);
            debug!(partition_key = %key, "Saved partition progress");
        }
        Ok(())
    }

    /// Push the lease of a held partition out by `duration` from now
    pub async fn extend_lease(&self, key: &str, duration: Duration) -> Result<()> {
        let lease_until = deadline_after(Utc::now(), duration)?;

        let extended = self
            .update_owned(key, "extend_lease", |record| {
                Ok(record.with_lease_until(lease_until))
            })
            .await?;

        if extended.is_some() {
            self.stats.incr(Counter::LeasesExtended);
            debug!(partition_key = %key, %lease_until, "Extended partition lease");
        }
        Ok(())
    }

    /// Hand one held partition back so another process can take it at once
    pub async fn give_up_partition(&self, key: &str) -> Result<()> {
        let released = self
            .update_owned(key, "give_up", |record| Ok(record.relinquished()))
            .await?;

        self.manager.revoke(key);
        if released.is_some() {
            self.stats.incr(Counter::PartitionsGivenUp);
            info!(partition_key = %key, "Gave up partition");
        }
        Ok(())
    }

    /// Forget every local partition without touching the store.
    ///
    /// The leases expire on their own; tokens of in-flight partitions are
    /// cancelled.
    pub fn give_up_partitions(&self) {
        let dropped = self.manager.revoke_all();
        self.stats.add(Counter::PartitionsGivenUp, dropped as u64);
        if dropped > 0 {
            info!(owner = %self.owner_id, dropped, "Gave up all local partitions");
        }
    }

    /// All records in this coordinator's namespace
    pub async fn list_partitions(&self) -> Result<Vec<PartitionRecord>> {
        self.client.list_partitions(&self.namespace).await
    }

    fn lease_deadline(&self) -> Result<DateTime<Utc>> {
        deadline_after(Utc::now(), self.lease_duration)
    }

    /// Re-read `key` and write `mutate(record)` while this process holds it.
    ///
    /// Returns the written record, or `None` if the record is gone, no longer
    /// held by this process, or kept losing version races. In every `None`
    /// case the key is dropped locally and its lease token cancelled, so a
    /// later pass can re-adopt a record still leased to this process.
    async fn update_owned<F>(
        &self,
        key: &str,
        operation: &'static str,
        mutate: F,
    ) -> Result<Option<PartitionRecord>>
    where
        F: Fn(&PartitionRecord) -> Result<PartitionRecord> + Send + Sync,
    {
        for attempt in 1..=MAX_OWNED_UPDATE_ATTEMPTS {
            let Some(record) = self.client.get_partition(&self.namespace, key).await? else {
                self.stats.incr(Counter::NotFound);
                self.manager.revoke(key);
                warn!(partition_key = %key, operation, "Partition record not found");
                return Ok(None);
            };

            if !record.is_held_by(&self.owner_id) {
                self.stats.incr(Counter::NotOwned);
                if self.manager.revoke(key) {
                    self.stats.incr(Counter::LeasesLost);
                }
                warn!(
                    partition_key = %key,
                    operation,
                    owner = ?record.owner,
                    status = %record.status,
                    "Partition is not held by this process"
                );
                return Ok(None);
            }

            let next = mutate(&record)?;
            match self.client.try_update_partition(&record, &next).await {
                Ok(true) => return Ok(Some(next)),
                Ok(false) => {
                    self.stats.incr(Counter::VersionConflicts);
                    debug!(partition_key = %key, operation, attempt, "Version conflict, re-reading");
                }
                Err(CoordinationError::Store(e)) => {
                    self.stats.incr(Counter::StoreErrors);
                    return Err(CoordinationError::Store(e));
                }
                Err(e) => return Err(e),
            }
        }

        if self.manager.revoke(key) {
            self.stats.incr(Counter::LeasesLost);
        }
        warn!(
            partition_key = %key,
            operation,
            attempts = MAX_OWNED_UPDATE_ATTEMPTS,
            "Giving up after repeated version conflicts, dropped partition locally"
        );
        Ok(None)
    }
}
