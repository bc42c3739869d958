//! Process-local partition store
//!
//! Backs tests and the simulator. Every operation takes the map lock for its
//! whole duration, which makes create-if-absent and replace-if-version atomic.

use async_trait::async_trait;
use std::collections::BTreeMap;
use tokio::sync::RwLock;

use super::PartitionStore;
use crate::error::StoreResult;
use crate::partition::PartitionRecord;

type RecordKey = (String, String);

#[derive(Debug, Default)]
pub struct InMemoryPartitionStore {
    records: RwLock<BTreeMap<RecordKey, PartitionRecord>>,
}

impl InMemoryPartitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or overwrite a record without any version check.
    ///
    /// Intended for preparing fixtures; coordinators never call it.
    pub async fn seed(&self, record: PartitionRecord) {
        let key = (record.namespace.clone(), record.partition_key.clone());
        self.records.write().await.insert(key, record);
    }

    /// Every record across all namespaces, ordered by namespace then key
    pub async fn snapshot(&self) -> Vec<PartitionRecord> {
        self.records.read().await.values().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl PartitionStore for InMemoryPartitionStore {
    async fn get(
        &self,
        namespace: &str,
        partition_key: &str,
    ) -> StoreResult<Option<PartitionRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&(namespace.to_string(), partition_key.to_string()))
            .cloned())
    }

    async fn create_if_absent(&self, record: &PartitionRecord) -> StoreResult<bool> {
        let mut records = self.records.write().await;
        let key = (record.namespace.clone(), record.partition_key.clone());
        if records.contains_key(&key) {
            return Ok(false);
        }
        records.insert(key, record.clone());
        Ok(true)
    }

    async fn replace_if_version(
        &self,
        expected_version: i64,
        record: &PartitionRecord,
    ) -> StoreResult<bool> {
        let mut records = self.records.write().await;
        let key = (record.namespace.clone(), record.partition_key.clone());
        match records.get_mut(&key) {
            Some(stored) if stored.version == expected_version => {
                *stored = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list(&self, namespace: &str) -> StoreResult<Vec<PartitionRecord>> {
        let records = self.records.read().await;
        Ok(records
            .iter()
            .filter(|((ns, _), _)| ns == namespace)
            .map(|(_, record)| record.clone())
            .collect())
    }
}
