//! In-process backend. Per-key exclusion comes from the map's shard locks:
//! every operation on a key runs while holding that key's entry.

use async_trait::async_trait;
use dashmap::DashMap;
use std::time::SystemTime;
use tracing::{debug, instrument};

use super::sequence::{median_of, validate_batch};
use super::{validate_key, KeyRecord, KeyStore};
use crate::error::{StoreError, StoreResult};

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: DashMap<String, KeyRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sample count for `key`, if present. Does not refresh the access time.
    pub fn size(&self, key: &str) -> Option<usize> {
        self.records.get(key).map(|record| record.samples.len())
    }

    /// Last-access time for `key`, if present. Does not refresh it.
    pub fn last_accessed(&self, key: &str) -> Option<SystemTime> {
        self.records.get(key).map(|record| record.last_accessed)
    }
}

#[async_trait]
impl KeyStore for MemoryStore {
    fn name(&self) -> &'static str {
        "in_memory"
    }

    #[instrument(skip(self, values), fields(samples = values.len()))]
    async fn append(&self, key: &str, values: &[f64]) -> StoreResult<usize> {
        validate_key(key)?;
        // Validate before touching the map so a rejected batch never creates a key.
        validate_batch(values)?;

        let mut record = self.records.entry(key.to_string()).or_default();
        let count = record.samples.append(values)?;
        record.touch();
        Ok(count)
    }

    #[instrument(skip(self))]
    async fn median(&self, key: &str) -> StoreResult<f64> {
        let snapshot = {
            let mut record = self
                .records
                .get_mut(key)
                .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))?;
            if record.samples.is_empty() {
                return Err(StoreError::EmptySequence(key.to_string()));
            }
            record.touch();
            record.samples.export()
        };
        median_of(snapshot, key)
    }

    #[instrument(skip(self))]
    async fn export(&self, key: &str) -> StoreResult<Vec<f64>> {
        let mut record = self
            .records
            .get_mut(key)
            .ok_or_else(|| StoreError::KeyNotFound(key.to_string()))?;
        record.touch();
        Ok(record.samples.export())
    }

    #[instrument(skip(self))]
    async fn clear(&self, key: &str) -> StoreResult<()> {
        if self.records.remove(key).is_some() {
            debug!("cleared key");
        }
        Ok(())
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.records.len())
    }

    async fn access_times(&self) -> StoreResult<Vec<(String, SystemTime)>> {
        Ok(self
            .records
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().last_accessed))
            .collect())
    }

    async fn evict(&self, keys: &[String], cutoff: SystemTime) -> StoreResult<usize> {
        let mut evicted = 0;
        for key in keys {
            match self
                .records
                .remove_if(key, |_, record| record.last_accessed < cutoff)
            {
                Some(_) => evicted += 1,
                None => debug!(key = %key, "skipped eviction: key gone or touched since scan"),
            }
        }
        Ok(evicted)
    }
}
