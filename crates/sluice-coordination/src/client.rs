//! Store access for the coordinator
//!
//! [`StoreClient`] wraps a [`PartitionStore`] with two guarantees: every write
//! is checked against the record invariants and transition table before it
//! leaves the process, and transient store failures are retried with bounded
//! exponential backoff.

use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::config::RetryConfig;
use crate::error::{CoordinationError, Result, StoreResult};
use crate::partition::{validate_transition, PartitionRecord, PartitionStatus};
use crate::store::PartitionStore;

/// Bounded exponential backoff with jitter
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.base_delay(),
            max_delay: config.max_delay(),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based): doubles from
    /// `base_delay`, capped at `max_delay`, plus up to 25% jitter.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(20);
        let capped = self
            .base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay);
        let jitter_ms = (capped.as_millis() / 4) as u64;
        if jitter_ms == 0 {
            return capped;
        }
        capped + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

pub struct StoreClient {
    store: Arc<dyn PartitionStore>,
    retry: RetryPolicy,
}

impl StoreClient {
    pub fn new(store: Arc<dyn PartitionStore>, retry: RetryPolicy) -> Self {
        Self { store, retry }
    }

    pub fn store(&self) -> &Arc<dyn PartitionStore> {
        &self.store
    }

    pub async fn get_partition(
        &self,
        namespace: &str,
        partition_key: &str,
    ) -> Result<Option<PartitionRecord>> {
        self.with_retry("get", partition_key, || {
            let store = Arc::clone(&self.store);
            let namespace = namespace.to_string();
            let partition_key = partition_key.to_string();
            async move { store.get(&namespace, &partition_key).await }
        })
        .await
    }

    /// Create a placeholder record; `false` if the key already exists.
    pub async fn try_create_partition(&self, record: &PartitionRecord) -> Result<bool> {
        record.validate()?;
        if record.version != 0 || record.status != PartitionStatus::Unassigned {
            return Err(CoordinationError::invalid_record(
                record.partition_key.clone(),
                "new records must be unassigned at version 0",
            ));
        }

        let created = self
            .with_retry("create", &record.partition_key, || {
                let store = Arc::clone(&self.store);
                let record = record.clone();
                async move { store.create_if_absent(&record).await }
            })
            .await?;

        if !created {
            debug!(partition_key = %record.partition_key, "Partition already exists");
        }
        Ok(created)
    }

    /// Replace `previous` with `next`; `false` if the stored version moved on.
    pub async fn try_update_partition(
        &self,
        previous: &PartitionRecord,
        next: &PartitionRecord,
    ) -> Result<bool> {
        validate_transition(previous, next)?;

        let expected_version = previous.version;
        let updated = self
            .with_retry("update", &next.partition_key, || {
                let store = Arc::clone(&self.store);
                let next = next.clone();
                async move { store.replace_if_version(expected_version, &next).await }
            })
            .await?;

        if !updated {
            debug!(
                partition_key = %next.partition_key,
                expected_version,
                "Version conflict on partition update"
            );
        }
        Ok(updated)
    }

    pub async fn list_partitions(&self, namespace: &str) -> Result<Vec<PartitionRecord>> {
        self.with_retry("list", namespace, || {
            let store = Arc::clone(&self.store);
            let namespace = namespace.to_string();
            async move { store.list(&namespace).await }
        })
        .await
    }

    async fn with_retry<T, F, Fut>(&self, operation: &'static str, key: &str, mut call: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() && attempt < self.retry.max_attempts => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        operation,
                        partition_key = %key,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Store call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    error!(
                        operation,
                        partition_key = %key,
                        attempt,
                        error = %e,
                        "Store call failed"
                    );
                    return Err(e.into());
                }
            }
        }
    }
}
