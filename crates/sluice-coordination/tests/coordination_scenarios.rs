//! Multi-process coordination scenarios against the in-memory store
//!
//! Each coordinator stands in for a separate process; they share nothing but
//! the store.

mod common;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Barrier, Notify, Semaphore};

use common::{coordinator, greedy_config, NAMESPACE};
use sluice_coordination::{
    CoordinationError, CoordinatorConfig, InMemoryPartitionStore, PartitionRecord,
    PartitionStatus, PartitionStore, SourceCoordinator, StoreResult,
};

async fn record(store: &InMemoryPartitionStore, key: &str) -> PartitionRecord {
    store
        .get(NAMESPACE, key)
        .await
        .unwrap()
        .expect("record should exist")
}

/// Create the placeholder and acquire it in two passes
async fn acquire(coordinator: &SourceCoordinator, key: &str) {
    coordinator.create_partitions(&[key]).await;
    coordinator.create_partitions(&[key]).await;
    assert!(coordinator.manager().is_tracked(key), "{} not acquired", key);
}

fn assigned(owner: &str, version: i64, timeout: chrono::DateTime<Utc>) -> PartitionRecord {
    let mut record = PartitionRecord::placeholder(NAMESPACE, "p1", owner)
        .acquired_by(owner, timeout);
    record.version = version;
    record
}

// ============================================================================
// Store wrappers
// ============================================================================

/// Holds every `get` until two callers have arrived
struct RendezvousStore {
    inner: InMemoryPartitionStore,
    barrier: Barrier,
    armed: AtomicBool,
}

#[async_trait]
impl PartitionStore for RendezvousStore {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<PartitionRecord>> {
        if self.armed.load(Ordering::SeqCst) {
            self.barrier.wait().await;
        }
        self.inner.get(namespace, key).await
    }

    async fn create_if_absent(&self, record: &PartitionRecord) -> StoreResult<bool> {
        self.inner.create_if_absent(record).await
    }

    async fn replace_if_version(&self, expected: i64, record: &PartitionRecord) -> StoreResult<bool> {
        self.inner.replace_if_version(expected, record).await
    }

    async fn list(&self, namespace: &str) -> StoreResult<Vec<PartitionRecord>> {
        self.inner.list(namespace).await
    }
}

/// Logs every successful replace as (expected version, written record)
#[derive(Default)]
struct RecordingStore {
    inner: InMemoryPartitionStore,
    replaced: Mutex<Vec<(i64, PartitionRecord)>>,
}

#[async_trait]
impl PartitionStore for RecordingStore {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<PartitionRecord>> {
        self.inner.get(namespace, key).await
    }

    async fn create_if_absent(&self, record: &PartitionRecord) -> StoreResult<bool> {
        self.inner.create_if_absent(record).await
    }

    async fn replace_if_version(&self, expected: i64, record: &PartitionRecord) -> StoreResult<bool> {
        let replaced = self.inner.replace_if_version(expected, record).await?;
        if replaced {
            self.replaced
                .lock()
                .unwrap()
                .push((expected, record.clone()));
        }
        Ok(replaced)
    }

    async fn list(&self, namespace: &str) -> StoreResult<Vec<PartitionRecord>> {
        self.inner.list(namespace).await
    }
}

/// Parks `get` calls until permits are added
struct ParkedStore {
    inner: InMemoryPartitionStore,
    permits: Semaphore,
    entered: Notify,
}

#[async_trait]
impl PartitionStore for ParkedStore {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<PartitionRecord>> {
        self.entered.notify_one();
        self.permits.acquire().await.unwrap().forget();
        self.inner.get(namespace, key).await
    }

    async fn create_if_absent(&self, record: &PartitionRecord) -> StoreResult<bool> {
        self.inner.create_if_absent(record).await
    }

    async fn replace_if_version(&self, expected: i64, record: &PartitionRecord) -> StoreResult<bool> {
        self.inner.replace_if_version(expected, record).await
    }

    async fn list(&self, namespace: &str) -> StoreResult<Vec<PartitionRecord>> {
        self.inner.list(namespace).await
    }
}

/// While armed, moves the stored version on before every replace so the
/// replace always loses
#[derive(Default)]
struct ContendedStore {
    inner: InMemoryPartitionStore,
    armed: AtomicBool,
}

#[async_trait]
impl PartitionStore for ContendedStore {
    async fn get(&self, namespace: &str, key: &str) -> StoreResult<Option<PartitionRecord>> {
        self.inner.get(namespace, key).await
    }

    async fn create_if_absent(&self, record: &PartitionRecord) -> StoreResult<bool> {
        self.inner.create_if_absent(record).await
    }

    async fn replace_if_version(&self, expected: i64, record: &PartitionRecord) -> StoreResult<bool> {
        if self.armed.load(Ordering::SeqCst) {
            if let Some(stored) = self.inner.get(&record.namespace, &record.partition_key).await? {
                let mut bumped = stored.clone();
                bumped.version += 1;
                self.inner.replace_if_version(stored.version, &bumped).await?;
            }
        }
        self.inner.replace_if_version(expected, record).await
    }

    async fn list(&self, namespace: &str) -> StoreResult<Vec<PartitionRecord>> {
        self.inner.list(namespace).await
    }
}

// ============================================================================
// Creation and acquisition
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_discovery_has_one_creator() {
    let store = Arc::new(RendezvousStore {
        inner: InMemoryPartitionStore::new(),
        barrier: Barrier::new(2),
        armed: AtomicBool::new(true),
    });
    let a = coordinator("node-a", store.clone());
    let b = coordinator("node-b", store.clone());

    let (sa, sb) = tokio::join!(a.create_partitions(&["p1"]), b.create_partitions(&["p1"]));

    assert_eq!(sa.created + sb.created, 1);
    assert_eq!(sa.conflicts + sb.conflicts, 1);
    assert_eq!(sa.acquired + sb.acquired, 0);

    store.armed.store(false, Ordering::SeqCst);
    let stored = store.get(NAMESPACE, "p1").await.unwrap().unwrap();
    let winner = if sa.created == 1 { "node-a" } else { "node-b" };
    assert_eq!(stored.version, 0);
    assert_eq!(stored.status, PartitionStatus::Unassigned);
    assert_eq!(stored.owner.as_deref(), Some(winner));
    assert_eq!(a.manager().tracked_len() + b.manager().tracked_len(), 0);
}

#[tokio::test]
async fn test_expired_lease_is_taken_over() {
    let store = Arc::new(InMemoryPartitionStore::new());
    store
        .seed(assigned("node-a", 3, Utc::now() - ChronoDuration::seconds(1)))
        .await;

    let b = coordinator("node-b", store.clone());
    let summary = b.create_partitions(&["p1"]).await;
    assert_eq!(summary.acquired, 1);

    let stored = record(&store, "p1").await;
    assert_eq!(stored.owner.as_deref(), Some("node-b"));
    assert_eq!(stored.status, PartitionStatus::Assigned);
    assert_eq!(stored.version, 4);
    assert!(stored.ownership_timeout.unwrap() > Utc::now());
    assert_eq!(b.get_next_partition().unwrap().key(), "p1");
}

#[tokio::test]
async fn test_live_lease_is_left_alone() {
    let store = Arc::new(InMemoryPartitionStore::new());
    let seeded = assigned("node-a", 3, Utc::now() + ChronoDuration::minutes(5));
    store.seed(seeded.clone()).await;

    let b = coordinator("node-b", store.clone());
    let summary = b.create_partitions(&["p1"]).await;
    assert_eq!(summary.skipped, 1);
    assert_eq!(record(&store, "p1").await, seeded);
    assert!(b.get_next_partition().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_each_key_ends_up_with_one_holder() {
    let store = Arc::new(RecordingStore::default());
    let keys: Vec<String> = (0..12).map(|i| format!("p{}", i)).collect();
    let nodes: Vec<Arc<SourceCoordinator>> = (0..4)
        .map(|i| Arc::new(coordinator(&format!("node-{}", i), store.clone())))
        .collect();

    for _ in 0..3 {
        let passes = nodes.iter().map(|node| {
            let node = node.clone();
            let keys = keys.clone();
            tokio::spawn(async move { node.create_partitions(&keys).await })
        });
        for pass in futures::future::join_all(passes).await {
            pass.unwrap();
        }
    }

    for key in &keys {
        let stored = store.get(NAMESPACE, key).await.unwrap().unwrap();
        assert_eq!(stored.status, PartitionStatus::Assigned);
        let holders: Vec<&str> = nodes
            .iter()
            .filter(|node| node.manager().is_tracked(key))
            .map(|node| node.owner_id())
            .collect();
        assert_eq!(holders, vec![stored.owner.as_deref().unwrap()], "key {}", key);
    }

    let replaced = store.replaced.lock().unwrap();
    for (expected, written) in replaced.iter() {
        assert_eq!(written.version, expected + 1);
    }
    // One acquisition per key and pre-acquisition version
    let mut acquisitions: Vec<(String, i64)> = replaced
        .iter()
        .filter(|(_, written)| written.status == PartitionStatus::Assigned)
        .map(|(expected, written)| (written.partition_key.clone(), *expected))
        .collect();
    let total = acquisitions.len();
    acquisitions.sort();
    acquisitions.dedup();
    assert_eq!(acquisitions.len(), total);
}

#[tokio::test]
async fn test_duplicate_keys_in_one_pass_are_evaluated_once() {
    let store = Arc::new(InMemoryPartitionStore::new());
    let a = coordinator("node-a", store.clone());

    let summary = a.create_partitions(&["p1", "p1", "p2", "p1"]).await;
    assert_eq!(summary.evaluated, 2);
    assert_eq!(summary.created, 2);

    a.create_partitions(&["p1", "p1"]).await;
    a.create_partitions(&["p1"]).await;
    assert_eq!(a.manager().queued_len(), 1);
    assert!(a.get_next_partition().is_some());
    assert!(a.get_next_partition().is_none());
}

#[tokio::test]
async fn test_overlapping_pass_is_skipped() {
    let store = Arc::new(ParkedStore {
        inner: InMemoryPartitionStore::new(),
        permits: Semaphore::new(0),
        entered: Notify::new(),
    });
    let a = Arc::new(coordinator("node-a", store.clone()));

    let first = {
        let a = a.clone();
        tokio::spawn(async move { a.create_partitions(&["p1"]).await })
    };
    store.entered.notified().await;

    let second = a.create_partitions(&["p1"]).await;
    assert_eq!(second.evaluated, 0);

    store.permits.add_permits(16);
    let first = first.await.unwrap();
    assert_eq!(first.evaluated, 1);
    assert_eq!(first.created, 1);
    assert_eq!(a.stats().passes, 1);
}

// ============================================================================
// Close and complete
// ============================================================================

#[tokio::test]
async fn test_closed_partition_waits_for_reopen() {
    let store = Arc::new(InMemoryPartitionStore::new());
    let a = coordinator("node-a", store.clone());
    let b = coordinator("node-b", store.clone());
    acquire(&a, "p1").await;
    let partition = a.get_next_partition().unwrap();
    let before = record(&store, "p1").await;

    a.close_partition("p1", Duration::from_secs(600)).await.unwrap();

    let closed = record(&store, "p1").await;
    assert_eq!(closed.status, PartitionStatus::Closed);
    assert!(closed.owner.is_none());
    assert_eq!(closed.closed_count, before.closed_count + 1);
    assert_eq!(closed.version, before.version + 1);
    let reopen_at = closed.reopen_at.unwrap();
    let expected = Utc::now() + ChronoDuration::minutes(10);
    assert!((expected - reopen_at).num_seconds().abs() <= 5);
    assert!(!a.manager().is_tracked("p1"));
    assert!(!partition.is_lease_lost());

    let summary = b.create_partitions(&["p1"]).await;
    assert_eq!(summary.skipped, 1);
    a.create_partitions(&["p1"]).await;
    assert_eq!(record(&store, "p1").await, closed);
}

#[tokio::test]
async fn test_closed_partition_reopens_for_anyone() {
    let store = Arc::new(InMemoryPartitionStore::new());
    let a = coordinator("node-a", store.clone());
    let b = coordinator("node-b", store.clone());
    acquire(&a, "p1").await;
    a.get_next_partition().unwrap();

    a.close_partition("p1", Duration::ZERO).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;

    let summary = b.create_partitions(&["p1"]).await;
    assert_eq!(summary.acquired, 1);

    let reopened = record(&store, "p1").await;
    assert_eq!(reopened.status, PartitionStatus::Assigned);
    assert_eq!(reopened.owner.as_deref(), Some("node-b"));
    assert!(reopened.reopen_at.is_none());
    assert_eq!(b.get_next_partition().unwrap().closed_count(), 1);
}

#[tokio::test]
async fn test_completed_partition_is_never_reacquired() {
    let store = Arc::new(InMemoryPartitionStore::new());
    let a = coordinator("node-a", store.clone());
    let b = coordinator("node-b", store.clone());
    acquire(&a, "p1").await;
    a.get_next_partition().unwrap();

    a.complete_partition("p1").await.unwrap();
    let completed = record(&store, "p1").await;
    assert_eq!(completed.status, PartitionStatus::Completed);
    assert!(completed.owner.is_none());
    assert!(completed.ownership_timeout.is_none());

    for _ in 0..3 {
        a.create_partitions(&["p1"]).await;
        b.create_partitions(&["p1"]).await;
    }
    assert_eq!(record(&store, "p1").await, completed);
    assert!(a.get_next_partition().is_none());
    assert!(b.get_next_partition().is_none());
}

#[tokio::test]
async fn test_close_limit_completes_partition() {
    let store = Arc::new(InMemoryPartitionStore::new());
    let a = SourceCoordinator::new(greedy_config("node-a").with_max_closed_count(2), store.clone())
        .unwrap();
    acquire(&a, "p1").await;
    a.get_next_partition().unwrap();

    a.close_partition("p1", Duration::ZERO).await.unwrap();
    assert_eq!(record(&store, "p1").await.status, PartitionStatus::Closed);

    tokio::time::sleep(Duration::from_millis(5)).await;
    a.create_partitions(&["p1"]).await;
    a.get_next_partition().unwrap();
    a.close_partition("p1", Duration::ZERO).await.unwrap();

    let stored = record(&store, "p1").await;
    assert_eq!(stored.status, PartitionStatus::Completed);
    assert_eq!(stored.closed_count, 2);
    assert_eq!(a.stats().partitions_completed, 1);
    assert_eq!(a.stats().partitions_closed, 1);
}

#[tokio::test]
async fn test_complete_losing_every_version_race_drops_partition_for_readoption() {
    let store = Arc::new(ContendedStore::default());
    let a = coordinator("node-a", store.clone());
    acquire(&a, "p1").await;
    let partition = a.get_next_partition().unwrap();

    store.armed.store(true, Ordering::SeqCst);
    a.complete_partition("p1").await.unwrap();
    store.armed.store(false, Ordering::SeqCst);

    assert!(!a.manager().is_tracked("p1"));
    assert!(partition.is_lease_lost());
    assert_eq!(a.stats().leases_lost, 1);
    assert_eq!(a.stats().partitions_completed, 0);
    let stored = record(&store.inner, "p1").await;
    assert_eq!(stored.status, PartitionStatus::Assigned);
    assert_eq!(stored.owner.as_deref(), Some("node-a"));

    // The next pass re-adopts the still leased record, and the work can finish.
    a.create_partitions(&["p1"]).await;
    let readopted = a.get_next_partition().expect("partition should be queued again");
    assert_eq!(readopted.key(), "p1");

    a.complete_partition("p1").await.unwrap();
    assert_eq!(record(&store.inner, "p1").await.status, PartitionStatus::Completed);
    assert!(!a.manager().is_tracked("p1"));
}

#[tokio::test]
async fn test_close_losing_every_version_race_drops_partition() {
    let store = Arc::new(ContendedStore::default());
    let a = coordinator("node-a", store.clone());
    acquire(&a, "p1").await;

    store.armed.store(true, Ordering::SeqCst);
    a.close_partition("p1", Duration::from_secs(600)).await.unwrap();
    store.armed.store(false, Ordering::SeqCst);

    assert!(!a.manager().is_tracked("p1"));
    assert_eq!(a.stats().partitions_closed, 0);

    a.create_partitions(&["p1"]).await;
    assert!(a.manager().is_tracked("p1"));
}

#[tokio::test]
async fn test_completing_unknown_partition_is_a_no_op() {
    let store = Arc::new(InMemoryPartitionStore::new());
    let a = coordinator("node-a", store.clone());

    a.complete_partition("missing").await.unwrap();
    assert!(store.is_empty().await);
    assert_eq!(a.stats().not_found, 1);
}

// ============================================================================
// Progress state and leases
// ============================================================================

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Offset {
    offset: u64,
}

#[tokio::test]
async fn test_saved_state_survives_handover() {
    let store = Arc::new(InMemoryPartitionStore::new());
    let a = coordinator("node-a", store.clone());
    let b = coordinator("node-b", store.clone());
    acquire(&a, "p1").await;
    let partition = a.get_next_partition().unwrap();
    assert_eq!(partition.progress_state::<Offset>().unwrap(), None);
    let before = record(&store, "p1").await;

    a.save_state_for_partition("p1", &Offset { offset: 42 }).await.unwrap();

    let saved = record(&store, "p1").await;
    assert_eq!(saved.version, before.version + 1);
    assert_eq!(saved.status, PartitionStatus::Assigned);
    assert_eq!(saved.owner.as_deref(), Some("node-a"));
    assert!(saved.ownership_timeout >= before.ownership_timeout);

    a.give_up_partition("p1").await.unwrap();
    assert!(partition.is_lease_lost());

    b.create_partitions(&["p1"]).await;
    let resumed = b.get_next_partition().unwrap();
    assert_eq!(
        resumed.progress_state::<Offset>().unwrap(),
        Some(Offset { offset: 42 })
    );
}

#[tokio::test]
async fn test_non_owner_writes_are_ignored() {
    let store = Arc::new(InMemoryPartitionStore::new());
    let a = coordinator("node-a", store.clone());
    let b = coordinator("node-b", store.clone());
    acquire(&a, "p1").await;
    let held = record(&store, "p1").await;

    b.save_state_for_partition("p1", &Offset { offset: 7 }).await.unwrap();
    b.complete_partition("p1").await.unwrap();
    b.close_partition("p1", Duration::ZERO).await.unwrap();
    b.extend_lease("p1", Duration::from_secs(60)).await.unwrap();

    assert_eq!(record(&store, "p1").await, held);
    assert_eq!(b.stats().not_owned, 4);
}

#[tokio::test]
async fn test_taken_over_partition_cancels_local_lease() {
    let store = Arc::new(InMemoryPartitionStore::new());
    let a = coordinator("node-a", store.clone());
    acquire(&a, "p1").await;
    let partition = a.get_next_partition().unwrap();

    let mut stolen = record(&store, "p1").await;
    stolen.owner = Some("node-b".to_string());
    stolen.version += 1;
    store.seed(stolen).await;

    a.save_state_for_partition("p1", &Offset { offset: 1 }).await.unwrap();
    assert!(partition.is_lease_lost());
    assert!(!a.manager().is_tracked("p1"));
    assert_eq!(a.stats().leases_lost, 1);
}

#[tokio::test]
async fn test_extend_lease_moves_timeout() {
    let store = Arc::new(InMemoryPartitionStore::new());
    let a = coordinator("node-a", store.clone());
    acquire(&a, "p1").await;

    a.extend_lease("p1", Duration::from_secs(7200)).await.unwrap();
    let stored = record(&store, "p1").await;
    assert!(stored.ownership_timeout.unwrap() > Utc::now() + ChronoDuration::minutes(110));
    assert_eq!(a.stats().leases_extended, 1);
}

#[tokio::test]
async fn test_lease_token_fires_on_relinquish() {
    let store = Arc::new(InMemoryPartitionStore::new());
    let a = coordinator("node-a", store.clone());
    acquire(&a, "p1").await;
    let partition = a.get_next_partition().unwrap();

    let waiter = tokio::spawn(async move { partition.lease_lost().await });
    a.give_up_partition("p1").await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), waiter)
        .await
        .expect("lease token was not cancelled")
        .unwrap();
}

// ============================================================================
// Giving up
// ============================================================================

#[tokio::test]
async fn test_give_up_partitions_is_local_only() {
    let store = Arc::new(InMemoryPartitionStore::new());
    let a = coordinator("node-a", store.clone());
    a.create_partitions(&["p1", "p2"]).await;
    a.create_partitions(&["p1", "p2"]).await;
    let in_flight = a.get_next_partition().unwrap();
    let before = store.list(NAMESPACE).await.unwrap();

    a.give_up_partitions();

    assert!(in_flight.is_lease_lost());
    assert_eq!(a.manager().tracked_len(), 0);
    assert!(a.get_next_partition().is_none());
    assert_eq!(store.list(NAMESPACE).await.unwrap(), before);
    assert_eq!(a.stats().partitions_given_up, 2);

    // Still leased to node-a in the store, so the next pass adopts both again
    let summary = a.create_partitions(&["p1", "p2"]).await;
    assert_eq!(summary.renewed, 2);
    assert_eq!(a.manager().queued_len(), 2);
}

#[tokio::test]
async fn test_give_up_partition_frees_it_immediately() {
    let store = Arc::new(InMemoryPartitionStore::new());
    let a = coordinator("node-a", store.clone());
    let b = coordinator("node-b", store.clone());
    acquire(&a, "p1").await;

    a.give_up_partition("p1").await.unwrap();
    let released = record(&store, "p1").await;
    assert_eq!(released.status, PartitionStatus::Unassigned);
    assert!(released.owner.is_none());

    assert_eq!(b.create_partitions(&["p1"]).await.acquired, 1);
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_malformed_config_is_rejected_at_construction() {
    let store: Arc<dyn PartitionStore> = Arc::new(InMemoryPartitionStore::new());

    let cases = [
        CoordinatorConfig::new(""),
        CoordinatorConfig::new("orders").with_owner_id("node a"),
        CoordinatorConfig::new("orders|eu"),
        CoordinatorConfig::new("orders").with_lease_duration(Duration::ZERO),
        CoordinatorConfig::new("orders").with_admission_share(9),
    ];
    for config in cases {
        let err = SourceCoordinator::new(config, store.clone()).err();
        assert!(
            matches!(err, Some(CoordinationError::Config(_)) | Some(CoordinationError::Common(_))),
            "unexpected result {:?}",
            err
        );
    }
}

#[test]
fn test_prefixed_source_gets_its_own_namespace() {
    let store: Arc<dyn PartitionStore> = Arc::new(InMemoryPartitionStore::new());
    let config = CoordinatorConfig::new("orders").with_partition_prefix("eu");
    let coordinator = SourceCoordinator::new(config, store).unwrap();

    assert_eq!(coordinator.namespace(), "eu|orders|PARTITION");
    assert!(coordinator.owner_id().starts_with("eu|orders:"));
}
