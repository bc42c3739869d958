//! Local bookkeeping of partitions this process holds
//!
//! Acquired partitions wait in a FIFO queue until the data source asks for
//! one. Every tracked partition, queued or in flight, carries the lease token
//! handed out with it.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::partition::{PartitionRecord, SourcePartition};

#[derive(Debug)]
struct TrackedPartition {
    progress_state: Option<String>,
    closed_count: i64,
    lease: CancellationToken,
}

#[derive(Debug, Default)]
struct ManagerState {
    queue: VecDeque<String>,
    tracked: HashMap<String, TrackedPartition>,
}

#[derive(Debug, Default)]
pub struct PartitionManager {
    state: Mutex<ManagerState>,
}

impl PartitionManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, ManagerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a freshly acquired partition.
    ///
    /// Returns `false` without touching the queue when the key is already
    /// tracked, whether queued or in flight.
    pub fn queue_partition(&self, record: &PartitionRecord) -> bool {
        let mut state = self.state();
        if state.tracked.contains_key(&record.partition_key) {
            return false;
        }

        state.tracked.insert(
            record.partition_key.clone(),
            TrackedPartition {
                progress_state: record.progress_state.clone(),
                closed_count: record.closed_count,
                lease: CancellationToken::new(),
            },
        );
        state.queue.push_back(record.partition_key.clone());
        true
    }

    /// Pop the oldest queued partition; it stays tracked while in flight.
    pub fn next_partition(&self) -> Option<SourcePartition> {
        let mut state = self.state();
        let key = state.queue.pop_front()?;
        let tracked = state.tracked.get(&key)?;
        Some(SourcePartition::new(
            key.clone(),
            tracked.progress_state.clone(),
            tracked.closed_count,
            tracked.lease.clone(),
        ))
    }

    /// Stop tracking a partition that was completed or closed.
    pub fn release(&self, key: &str) -> bool {
        let mut state = self.state();
        state.queue.retain(|queued| queued != key);
        state.tracked.remove(key).is_some()
    }

    /// Stop tracking a partition whose lease is gone and cancel its token.
    pub fn revoke(&self, key: &str) -> bool {
        let mut state = self.state();
        state.queue.retain(|queued| queued != key);
        match state.tracked.remove(key) {
            Some(tracked) => {
                tracked.lease.cancel();
                true
            }
            None => false,
        }
    }

    /// Drop every tracked partition, cancelling their tokens.
    ///
    /// Returns how many partitions were dropped.
    pub fn revoke_all(&self) -> usize {
        let mut state = self.state();
        state.queue.clear();
        let dropped = state.tracked.len();
        for (_, tracked) in state.tracked.drain() {
            tracked.lease.cancel();
        }
        dropped
    }

    pub fn is_tracked(&self, key: &str) -> bool {
        self.state().tracked.contains_key(key)
    }

    pub fn tracked_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.state().tracked.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn queued_len(&self) -> usize {
        self.state().queue.len()
    }

    pub fn tracked_len(&self) -> usize {
        self.state().tracked.len()
    }
}
