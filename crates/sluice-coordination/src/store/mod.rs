//! Partition store contract
//!
//! A store keeps one [`PartitionRecord`] per `(namespace, partition_key)` and
//! offers two atomic writes: create-if-absent and replace-if-version. Both
//! report contention by returning `false`; errors are reserved for failures of
//! the store itself.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::partition::PartitionRecord;

pub mod memory;
pub mod postgres;

pub use memory::InMemoryPartitionStore;
pub use postgres::{DbConfig, PgPartitionStore};

#[async_trait]
pub trait PartitionStore: Send + Sync {
    /// Current record for a key, if any
    async fn get(&self, namespace: &str, partition_key: &str)
        -> StoreResult<Option<PartitionRecord>>;

    /// Insert `record` unless a record with the same key exists.
    ///
    /// Returns `false` when the key is already present.
    async fn create_if_absent(&self, record: &PartitionRecord) -> StoreResult<bool>;

    /// Replace the stored record only if its version equals `expected_version`.
    ///
    /// Returns `false` when the record is missing or its version moved on.
    async fn replace_if_version(
        &self,
        expected_version: i64,
        record: &PartitionRecord,
    ) -> StoreResult<bool>;

    /// All records of a namespace, ordered by partition key
    async fn list(&self, namespace: &str) -> StoreResult<Vec<PartitionRecord>>;
}
