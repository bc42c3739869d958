//! Lease assignment for a single candidate key
//!
//! Each pass evaluates every candidate key once:
//!
//! 1. No record: create a placeholder owned by this process.
//! 2. Record owned by this process: renew it (or acquire the placeholder) if
//!    the admission gate agrees, otherwise give it back.
//! 3. Record owned elsewhere or by nobody: if it is eligible and the gate
//!    agrees, take it over with a version-gated write and queue it locally.
//!
//! Losing any write race is not an error; the key is simply looked at again on
//! the next pass.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::client::StoreClient;
use crate::error::Result;
use crate::gate::AdmissionGate;
use crate::manager::PartitionManager;
use crate::partition::{deadline_after, Eligibility, PartitionRecord, PartitionStatus};
use crate::stats::{CoordinatorStats, Counter};

/// What one evaluation did to a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOutcome {
    /// Placeholder record created
    Created,
    /// Lease taken and partition queued
    Acquired,
    /// Own lease extended
    Renewed,
    /// Own lease (or placeholder) handed back
    Relinquished,
    /// Another process wrote first
    Conflict,
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Completed,
    AwaitingReopen,
    LeasedElsewhere,
    /// Admission gate declined
    Declined,
}

pub struct LeaseProtocol {
    client: Arc<StoreClient>,
    manager: Arc<PartitionManager>,
    stats: Arc<CoordinatorStats>,
    gate: AdmissionGate,
    namespace: String,
    owner_id: String,
    lease_duration: Duration,
}

impl LeaseProtocol {
    pub fn new(
        client: Arc<StoreClient>,
        manager: Arc<PartitionManager>,
        stats: Arc<CoordinatorStats>,
        gate: AdmissionGate,
        namespace: impl Into<String>,
        owner_id: impl Into<String>,
        lease_duration: Duration,
    ) -> Self {
        Self {
            client,
            manager,
            stats,
            gate,
            namespace: namespace.into(),
            owner_id: owner_id.into(),
            lease_duration,
        }
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    /// Run the assignment protocol for one key
    pub async fn evaluate(&self, key: &str) -> Result<LeaseOutcome> {
        let Some(record) = self.client.get_partition(&self.namespace, key).await? else {
            return self.create_placeholder(key).await;
        };

        let now = Utc::now();
        let own_record = record.is_owned_by(&self.owner_id)
            && matches!(
                record.status,
                PartitionStatus::Unassigned | PartitionStatus::Assigned
            );

        if own_record {
            return self.evaluate_own(record, now).await;
        }

        if self.manager.revoke(key) {
            self.stats.incr(Counter::LeasesLost);
            warn!(
                partition_key = %key,
                owner = ?record.owner,
                status = %record.status,
                "Lease lost to another process"
            );
        }

        match record.eligibility(now) {
            Eligibility::Eligible => {}
            Eligibility::Completed => return Ok(LeaseOutcome::Skipped(SkipReason::Completed)),
            Eligibility::AwaitingReopen(reopen_at) => {
                debug!(partition_key = %key, %reopen_at, "Partition closed until reopen time");
                return Ok(LeaseOutcome::Skipped(SkipReason::AwaitingReopen));
            }
            Eligibility::Leased(timeout) => {
                debug!(partition_key = %key, owner = ?record.owner, %timeout, "Partition leased elsewhere");
                return Ok(LeaseOutcome::Skipped(SkipReason::LeasedElsewhere));
            }
        }

        if !self.gate.admits() {
            debug!(partition_key = %key, "Admission gate declined acquisition");
            return Ok(LeaseOutcome::Skipped(SkipReason::Declined));
        }

        self.acquire(&record, now).await
    }

    async fn create_placeholder(&self, key: &str) -> Result<LeaseOutcome> {
        let record = PartitionRecord::placeholder(&self.namespace, key, &self.owner_id);
        if self.client.try_create_partition(&record).await? {
            self.stats.incr(Counter::PartitionsCreated);
            debug!(partition_key = %key, owner = %self.owner_id, "Created partition record");
            Ok(LeaseOutcome::Created)
        } else {
            self.stats.incr(Counter::VersionConflicts);
            Ok(LeaseOutcome::Conflict)
        }
    }

    async fn evaluate_own(&self, record: PartitionRecord, now: DateTime<Utc>) -> Result<LeaseOutcome> {
        let admitted = self.gate.admits();
        match (record.status, admitted) {
            (PartitionStatus::Unassigned, true) => self.acquire(&record, now).await,
            (PartitionStatus::Assigned, true) => self.renew(&record, now).await,
            _ => self.relinquish(&record).await,
        }
    }

    async fn acquire(&self, record: &PartitionRecord, now: DateTime<Utc>) -> Result<LeaseOutcome> {
        let lease_until = deadline_after(now, self.lease_duration)?;
        let next = record.acquired_by(&self.owner_id, lease_until);

        if !self.client.try_update_partition(record, &next).await? {
            self.stats.incr(Counter::VersionConflicts);
            return Ok(LeaseOutcome::Conflict);
        }

        self.manager.queue_partition(&next);
        self.stats.incr(Counter::PartitionsAcquired);
        info!(
            partition_key = %next.partition_key,
            owner = %self.owner_id,
            version = next.version,
            previous_owner = ?record.owner,
            "Acquired partition"
        );
        Ok(LeaseOutcome::Acquired)
    }

    async fn renew(&self, record: &PartitionRecord, now: DateTime<Utc>) -> Result<LeaseOutcome> {
        let lease_until = deadline_after(now, self.lease_duration)?;
        let next = record.renewed(lease_until);

        if !self.client.try_update_partition(record, &next).await? {
            self.stats.incr(Counter::VersionConflicts);
            if self.manager.revoke(&record.partition_key) {
                self.stats.incr(Counter::LeasesLost);
                warn!(partition_key = %record.partition_key, "Lease renewal lost a version race");
            }
            return Ok(LeaseOutcome::Conflict);
        }

        self.stats.incr(Counter::LeasesRenewed);
        if self.manager.queue_partition(&next) {
            info!(
                partition_key = %next.partition_key,
                version = next.version,
                "Re-adopted partition already leased to this owner"
            );
        } else {
            debug!(partition_key = %next.partition_key, %lease_until, "Renewed lease");
        }
        Ok(LeaseOutcome::Renewed)
    }

    async fn relinquish(&self, record: &PartitionRecord) -> Result<LeaseOutcome> {
        let next = record.relinquished();
        let updated = self.client.try_update_partition(record, &next).await?;

        // Either way this process no longer holds the lease.
        self.manager.revoke(&record.partition_key);

        if !updated {
            self.stats.incr(Counter::VersionConflicts);
            return Ok(LeaseOutcome::Conflict);
        }

        self.stats.incr(Counter::PartitionsRelinquished);
        info!(
            partition_key = %record.partition_key,
            version = next.version,
            "Relinquished partition"
        );
        Ok(LeaseOutcome::Relinquished)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::client::RetryPolicy;
    use crate::config::AdmissionConfig;
    use crate::gate::AdmissionMode;
    use crate::store::{InMemoryPartitionStore, PartitionStore};
    use chrono::Duration as ChronoDuration;

    const NS: &str = "orders|PARTITION";
    const LEASE: Duration = Duration::from_secs(600);

    struct Fixture {
        store: Arc<InMemoryPartitionStore>,
        client: Arc<StoreClient>,
        manager: Arc<PartitionManager>,
        stats: Arc<CoordinatorStats>,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryPartitionStore::new());
            let client = Arc::new(StoreClient::new(store.clone(), RetryPolicy::default()));
            Self {
                store,
                client,
                manager: Arc::new(PartitionManager::new()),
                stats: Arc::new(CoordinatorStats::new()),
            }
        }

        fn protocol(&self, owner: &str, gate: AdmissionGate) -> LeaseProtocol {
            LeaseProtocol::new(
                self.client.clone(),
                self.manager.clone(),
                self.stats.clone(),
                gate,
                NS,
                owner,
                LEASE,
            )
        }

        async fn record(&self, key: &str) -> PartitionRecord {
            self.store.get(NS, key).await.unwrap().unwrap()
        }
    }

    fn never() -> AdmissionGate {
        AdmissionGate::new(
            &AdmissionConfig {
                mode: AdmissionMode::Fixed,
                share: Some(0),
                seed: None,
            },
            "",
        )
    }

    #[tokio::test]
    async fn test_first_sight_creates_placeholder_then_acquires() {
        let fx = Fixture::new();
        let protocol = fx.protocol("node-a", AdmissionGate::always());

        assert_eq!(protocol.evaluate("p1").await.unwrap(), LeaseOutcome::Created);
        assert_eq!(fx.manager.queued_len(), 0);

        assert_eq!(protocol.evaluate("p1").await.unwrap(), LeaseOutcome::Acquired);
        let record = fx.record("p1").await;
        assert_eq!(record.status, PartitionStatus::Assigned);
        assert_eq!(record.version, 1);
        assert_eq!(fx.manager.queued_len(), 1);
    }

    #[tokio::test]
    async fn test_declined_placeholder_is_released() {
        let fx = Fixture::new();
        fx.protocol("node-a", AdmissionGate::always())
            .evaluate("p1")
            .await
            .unwrap();

        let outcome = fx.protocol("node-a", never()).evaluate("p1").await.unwrap();
        assert_eq!(outcome, LeaseOutcome::Relinquished);

        let record = fx.record("p1").await;
        assert_eq!(record.status, PartitionStatus::Unassigned);
        assert!(record.owner.is_none());
        assert_eq!(record.version, 1);
    }

    #[tokio::test]
    async fn test_declined_renewal_cancels_lease_token() {
        let fx = Fixture::new();
        let eager = fx.protocol("node-a", AdmissionGate::always());
        eager.evaluate("p1").await.unwrap();
        eager.evaluate("p1").await.unwrap();
        let partition = fx.manager.next_partition().unwrap();

        let reluctant = fx.protocol("node-a", never());
        assert_eq!(reluctant.evaluate("p1").await.unwrap(), LeaseOutcome::Relinquished);

        assert!(partition.is_lease_lost());
        assert!(!fx.manager.is_tracked("p1"));
        let record = fx.record("p1").await;
        assert_eq!(record.status, PartitionStatus::Unassigned);
        assert!(record.ownership_timeout.is_none());
    }

    #[tokio::test]
    async fn test_renewal_extends_timeout_without_duplicating_queue() {
        let fx = Fixture::new();
        let protocol = fx.protocol("node-a", AdmissionGate::always());
        protocol.evaluate("p1").await.unwrap();
        protocol.evaluate("p1").await.unwrap();
        let before = fx.record("p1").await;

        assert_eq!(protocol.evaluate("p1").await.unwrap(), LeaseOutcome::Renewed);
        let after = fx.record("p1").await;
        assert_eq!(after.version, before.version + 1);
        assert!(after.ownership_timeout >= before.ownership_timeout);
        assert_eq!(fx.manager.queued_len(), 1);
    }

    #[tokio::test]
    async fn test_untracked_own_lease_is_readopted() {
        let fx = Fixture::new();
        let now = Utc::now();
        let mut record = PartitionRecord::placeholder(NS, "p1", "node-a")
            .acquired_by("node-a", now + ChronoDuration::minutes(5));
        record.version = 9;
        fx.store.seed(record).await;

        let protocol = fx.protocol("node-a", AdmissionGate::always());
        assert_eq!(protocol.evaluate("p1").await.unwrap(), LeaseOutcome::Renewed);
        assert_eq!(fx.manager.queued_len(), 1);
        assert_eq!(fx.record("p1").await.version, 10);
    }

    #[tokio::test]
    async fn test_gate_declines_foreign_acquisition() {
        let fx = Fixture::new();
        fx.store
            .seed(PartitionRecord::placeholder(NS, "p1", "node-b").relinquished())
            .await;

        let outcome = fx.protocol("node-a", never()).evaluate("p1").await.unwrap();
        assert_eq!(outcome, LeaseOutcome::Skipped(SkipReason::Declined));
        assert_eq!(fx.record("p1").await.version, 1);
    }

    #[tokio::test]
    async fn test_observing_foreign_owner_revokes_local_copy() {
        let fx = Fixture::new();
        let protocol = fx.protocol("node-a", AdmissionGate::always());
        protocol.evaluate("p1").await.unwrap();
        protocol.evaluate("p1").await.unwrap();
        let partition = fx.manager.next_partition().unwrap();

        let mut taken = fx.record("p1").await;
        taken.owner = Some("node-b".to_string());
        taken.ownership_timeout = Some(Utc::now() + ChronoDuration::minutes(5));
        taken.version += 1;
        fx.store.seed(taken).await;

        let outcome = protocol.evaluate("p1").await.unwrap();
        assert_eq!(outcome, LeaseOutcome::Skipped(SkipReason::LeasedElsewhere));
        assert!(partition.is_lease_lost());
        assert_eq!(fx.stats.get(Counter::LeasesLost), 1);
    }
}
