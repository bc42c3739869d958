//! Partition records and their lifecycle
//!
//! A [`PartitionRecord`] is the durable lease row for one unit of work. Every
//! mutation produces a new record with `version` advanced by exactly one; the
//! store only accepts it if the stored version still equals the previous one.
//! [`validate_transition`] is applied to every write before it reaches the
//! store.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::{CoordinationError, Result};

/// Lifecycle status of a partition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    /// Free to be acquired
    Unassigned,
    /// Leased to one owner
    Assigned,
    /// Released by its owner; acquirable again once `reopen_at` passes
    Closed,
    /// Permanently done
    Completed,
}

impl PartitionStatus {
    pub const ALL: [PartitionStatus; 4] = [
        PartitionStatus::Unassigned,
        PartitionStatus::Assigned,
        PartitionStatus::Closed,
        PartitionStatus::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PartitionStatus::Unassigned => "unassigned",
            PartitionStatus::Assigned => "assigned",
            PartitionStatus::Closed => "closed",
            PartitionStatus::Completed => "completed",
        }
    }

    /// Allowed status changes for a single write.
    ///
    /// `Unassigned -> Unassigned` releases a creation placeholder and
    /// `Assigned -> Assigned` covers renewals and progress saves.
    pub fn can_transition_to(self, next: PartitionStatus) -> bool {
        use PartitionStatus::*;
        matches!(
            (self, next),
            (Unassigned, Unassigned)
                | (Unassigned, Assigned)
                | (Assigned, Assigned)
                | (Assigned, Unassigned)
                | (Assigned, Closed)
                | (Assigned, Completed)
                | (Closed, Assigned)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == PartitionStatus::Completed
    }
}

impl std::fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PartitionStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unassigned" => Ok(PartitionStatus::Unassigned),
            "assigned" => Ok(PartitionStatus::Assigned),
            "closed" => Ok(PartitionStatus::Closed),
            "completed" => Ok(PartitionStatus::Completed),
            other => Err(format!("unknown partition status '{}'", other)),
        }
    }
}

/// Whether a record owned by someone else (or nobody) may be acquired now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Eligibility {
    Eligible,
    /// Completed partitions are never acquired again
    Completed,
    /// Closed, or carrying a reopen time still in the future
    AwaitingReopen(DateTime<Utc>),
    /// Assigned with an unexpired lease
    Leased(DateTime<Utc>),
}

/// Durable lease record for one partition (maps to `source_partitions`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionRecord {
    /// `{scoped_source}|PARTITION`
    pub namespace: String,
    pub partition_key: String,
    pub owner: Option<String>,
    pub version: i64,
    pub status: PartitionStatus,
    pub ownership_timeout: Option<DateTime<Utc>>,
    pub reopen_at: Option<DateTime<Utc>>,
    pub closed_count: i64,
    /// Source-defined checkpoint, serialized JSON
    pub progress_state: Option<String>,
}

impl PartitionRecord {
    /// Record written by the first process to discover a key.
    ///
    /// The creator is recorded as owner while the status stays `Unassigned`;
    /// this is the only state in which an owner accompanies a non-assigned
    /// record.
    pub fn placeholder(
        namespace: impl Into<String>,
        partition_key: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            partition_key: partition_key.into(),
            owner: Some(owner.into()),
            version: 0,
            status: PartitionStatus::Unassigned,
            ownership_timeout: None,
            reopen_at: None,
            closed_count: 0,
            progress_state: None,
        }
    }

    pub fn is_owned_by(&self, owner_id: &str) -> bool {
        self.owner.as_deref() == Some(owner_id)
    }

    /// Owned by `owner_id` and actively leased
    pub fn is_held_by(&self, owner_id: &str) -> bool {
        self.status == PartitionStatus::Assigned && self.is_owned_by(owner_id)
    }

    pub fn is_placeholder(&self) -> bool {
        self.status == PartitionStatus::Unassigned && self.owner.is_some() && self.version == 0
    }

    pub fn eligibility(&self, now: DateTime<Utc>) -> Eligibility {
        if self.status == PartitionStatus::Completed {
            return Eligibility::Completed;
        }
        if let Some(reopen_at) = self.reopen_at {
            if reopen_at > now {
                return Eligibility::AwaitingReopen(reopen_at);
            }
        }
        match (self.status, self.ownership_timeout) {
            (PartitionStatus::Assigned, Some(timeout)) if timeout > now => {
                Eligibility::Leased(timeout)
            }
            _ => Eligibility::Eligible,
        }
    }

    fn next_version(&self) -> Self {
        let mut next = self.clone();
        next.version = self.version + 1;
        next
    }

    pub fn acquired_by(&self, owner_id: &str, lease_until: DateTime<Utc>) -> Self {
        let mut next = self.next_version();
        next.status = PartitionStatus::Assigned;
        next.owner = Some(owner_id.to_string());
        next.ownership_timeout = Some(lease_until);
        next.reopen_at = None;
        next
    }

    pub fn renewed(&self, lease_until: DateTime<Utc>) -> Self {
        let mut next = self.next_version();
        next.ownership_timeout = Some(lease_until);
        next
    }

    pub fn relinquished(&self) -> Self {
        let mut next = self.next_version();
        next.status = PartitionStatus::Unassigned;
        next.owner = None;
        next.ownership_timeout = None;
        next
    }

    /// Close the partition until `reopen_at`.
    ///
    /// Reaching `max_closed_count` completes the partition instead.
    pub fn closed(&self, reopen_at: DateTime<Utc>, max_closed_count: Option<u32>) -> Self {
        let mut next = self.next_version();
        next.closed_count = self.closed_count + 1;
        next.owner = None;
        next.ownership_timeout = None;
        match max_closed_count {
            Some(max) if next.closed_count >= i64::from(max) => {
                next.status = PartitionStatus::Completed;
                next.reopen_at = None;
            }
            _ => {
                next.status = PartitionStatus::Closed;
                next.reopen_at = Some(reopen_at);
            }
        }
        next
    }

    pub fn completed(&self) -> Self {
        let mut next = self.next_version();
        next.status = PartitionStatus::Completed;
        next.owner = None;
        next.ownership_timeout = None;
        next.reopen_at = None;
        next
    }

    /// Store new progress and push the lease out to `lease_until`.
    pub fn with_progress_state(
        &self,
        progress_state: Option<String>,
        lease_until: DateTime<Utc>,
    ) -> Self {
        let mut next = self.next_version();
        next.progress_state = progress_state;
        next.ownership_timeout = Some(lease_until);
        next
    }

    pub fn with_lease_until(&self, lease_until: DateTime<Utc>) -> Self {
        let mut next = self.next_version();
        next.ownership_timeout = Some(lease_until);
        next
    }

    /// Check the structural invariants every stored record must satisfy.
    pub fn validate(&self) -> Result<()> {
        let fail = |reason: &str| {
            Err(CoordinationError::invalid_record(
                self.partition_key.clone(),
                reason.to_string(),
            ))
        };

        if self.partition_key.is_empty() {
            return fail("partition key must not be empty");
        }
        if self.version < 0 {
            return fail("version must not be negative");
        }
        if self.closed_count < 0 {
            return fail("closed count must not be negative");
        }
        if self.owner.is_some()
            && self.status != PartitionStatus::Assigned
            && !self.is_placeholder()
        {
            return fail("only assigned records or creation placeholders may carry an owner");
        }
        if self.status == PartitionStatus::Assigned && self.owner.is_none() {
            return fail("assigned records must have an owner");
        }
        if self.ownership_timeout.is_some() && self.status != PartitionStatus::Assigned {
            return fail("only assigned records may carry an ownership timeout");
        }
        if self.reopen_at.is_some() && self.status != PartitionStatus::Closed {
            return fail("only closed records may carry a reopen time");
        }
        Ok(())
    }
}

/// Validate a write of `next` over `previous`.
pub fn validate_transition(previous: &PartitionRecord, next: &PartitionRecord) -> Result<()> {
    let key = &previous.partition_key;

    if previous.namespace != next.namespace || previous.partition_key != next.partition_key {
        return Err(CoordinationError::invalid_transition(
            key.clone(),
            format!(
                "record identity changed to '{}/{}'",
                next.namespace, next.partition_key
            ),
        ));
    }
    if next.version != previous.version + 1 {
        return Err(CoordinationError::invalid_transition(
            key.clone(),
            format!(
                "version must advance by one ({} -> {})",
                previous.version, next.version
            ),
        ));
    }
    if !previous.status.can_transition_to(next.status) {
        return Err(CoordinationError::invalid_transition(
            key.clone(),
            format!("{} -> {} is not allowed", previous.status, next.status),
        ));
    }
    if next.progress_state != previous.progress_state
        && !(previous.status == PartitionStatus::Assigned
            && next.status == PartitionStatus::Assigned)
    {
        return Err(CoordinationError::invalid_transition(
            key.clone(),
            "progress state may only change while assigned",
        ));
    }
    next.validate()
}

/// `now + duration`, rejecting durations chrono cannot represent
pub fn deadline_after(now: DateTime<Utc>, duration: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(duration)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| CoordinationError::Duration(format!("{:?} after {}", duration, now)))
}

/// A partition handed to the data source for processing.
///
/// The lease token is cancelled when this process stops holding the lease
/// (relinquished, taken over, given up). Completing or closing the partition
/// leaves it untouched.
#[derive(Debug, Clone)]
pub struct SourcePartition {
    key: String,
    progress_state: Option<String>,
    closed_count: i64,
    lease: CancellationToken,
}

impl SourcePartition {
    pub(crate) fn new(
        key: String,
        progress_state: Option<String>,
        closed_count: i64,
        lease: CancellationToken,
    ) -> Self {
        Self {
            key,
            progress_state,
            closed_count,
            lease,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Progress state as of the read that acquired this partition
    pub fn raw_progress_state(&self) -> Option<&str> {
        self.progress_state.as_deref()
    }

    /// Deserialize the progress state saved by a previous owner
    pub fn progress_state<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.progress_state
            .as_deref()
            .map(serde_json::from_str)
            .transpose()
            .map_err(CoordinationError::from)
    }

    pub fn closed_count(&self) -> i64 {
        self.closed_count
    }

    pub fn lease_token(&self) -> CancellationToken {
        self.lease.clone()
    }

    pub fn is_lease_lost(&self) -> bool {
        self.lease.is_cancelled()
    }

    /// Resolves once the lease on this partition is lost
    pub async fn lease_lost(&self) {
        self.lease.cancelled().await
    }
}
