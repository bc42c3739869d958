//! Coordination counters
//!
//! Lock-free counters updated by the coordinator. No exporter is attached;
//! callers read a [`StatsSnapshot`] and report it however they like.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Passes,
    PartitionsCreated,
    PartitionsAcquired,
    LeasesRenewed,
    PartitionsRelinquished,
    PartitionsCompleted,
    PartitionsClosed,
    StateSaves,
    LeasesExtended,
    PartitionsGivenUp,
    LeasesLost,
    EmptyPolls,
    NotFound,
    NotOwned,
    VersionConflicts,
    StoreErrors,
}

const COUNTER_COUNT: usize = Counter::StoreErrors as usize + 1;

#[derive(Debug, Default)]
pub struct CoordinatorStats {
    counters: [AtomicU64; COUNTER_COUNT],
}

impl CoordinatorStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn incr(&self, counter: Counter) {
        self.add(counter, 1);
    }

    pub fn add(&self, counter: Counter, amount: u64) {
        self.counters[counter as usize].fetch_add(amount, Ordering::Relaxed);
    }

    pub fn get(&self, counter: Counter) -> u64 {
        self.counters[counter as usize].load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            passes: self.get(Counter::Passes),
            partitions_created: self.get(Counter::PartitionsCreated),
            partitions_acquired: self.get(Counter::PartitionsAcquired),
            leases_renewed: self.get(Counter::LeasesRenewed),
            partitions_relinquished: self.get(Counter::PartitionsRelinquished),
            partitions_completed: self.get(Counter::PartitionsCompleted),
            partitions_closed: self.get(Counter::PartitionsClosed),
            state_saves: self.get(Counter::StateSaves),
            leases_extended: self.get(Counter::LeasesExtended),
            partitions_given_up: self.get(Counter::PartitionsGivenUp),
            leases_lost: self.get(Counter::LeasesLost),
            empty_polls: self.get(Counter::EmptyPolls),
            not_found: self.get(Counter::NotFound),
            not_owned: self.get(Counter::NotOwned),
            version_conflicts: self.get(Counter::VersionConflicts),
            store_errors: self.get(Counter::StoreErrors),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub passes: u64,
    pub partitions_created: u64,
    pub partitions_acquired: u64,
    pub leases_renewed: u64,
    pub partitions_relinquished: u64,
    pub partitions_completed: u64,
    pub partitions_closed: u64,
    pub state_saves: u64,
    pub leases_extended: u64,
    pub partitions_given_up: u64,
    pub leases_lost: u64,
    pub empty_polls: u64,
    pub not_found: u64,
    pub not_owned: u64,
    pub version_conflicts: u64,
    pub store_errors: u64,
}

impl std::ops::Add for StatsSnapshot {
    type Output = StatsSnapshot;

    fn add(self, other: StatsSnapshot) -> StatsSnapshot {
        StatsSnapshot {
            passes: self.passes + other.passes,
            partitions_created: self.partitions_created + other.partitions_created,
            partitions_acquired: self.partitions_acquired + other.partitions_acquired,
            leases_renewed: self.leases_renewed + other.leases_renewed,
            partitions_relinquished: self.partitions_relinquished + other.partitions_relinquished,
            partitions_completed: self.partitions_completed + other.partitions_completed,
            partitions_closed: self.partitions_closed + other.partitions_closed,
            state_saves: self.state_saves + other.state_saves,
            leases_extended: self.leases_extended + other.leases_extended,
            partitions_given_up: self.partitions_given_up + other.partitions_given_up,
            leases_lost: self.leases_lost + other.leases_lost,
            empty_polls: self.empty_polls + other.empty_polls,
            not_found: self.not_found + other.not_found,
            not_owned: self.not_owned + other.not_owned,
            version_conflicts: self.version_conflicts + other.version_conflicts,
            store_errors: self.store_errors + other.store_errors,
        }
    }
}
