//! Expiring key-partitioned sample store.
//!
//! Two interchangeable backends implement [`KeyStore`]: an in-process map
//! ([`memory::MemoryStore`]) and a directory of append-only CSV files
//! ([`file::FileStore`]). Both refresh a key's last-access time on every
//! successful append, median or export, and both re-check that time inside
//! the key's critical section before the reclaimer evicts it.

pub mod file;
pub mod memory;
pub mod sequence;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::SystemTime;

use crate::error::{StoreError, StoreResult};
use crate::settings::{BackendKind, StoreConfig};

pub use file::FileStore;
pub use memory::MemoryStore;
pub use sequence::SampleSequence;

/// Longest accepted key, in bytes. Keeps hex-encoded file names under common
/// file-system name limits.
pub const MAX_KEY_LENGTH: usize = 120;

/// One key's samples plus the wall-clock time it was last touched.
#[derive(Debug, Clone)]
pub struct KeyRecord {
    pub samples: SampleSequence,
    pub last_accessed: SystemTime,
}

impl KeyRecord {
    pub fn new() -> Self {
        Self {
            samples: SampleSequence::new(),
            last_accessed: SystemTime::now(),
        }
    }

    pub fn touch(&mut self) {
        self.last_accessed = SystemTime::now();
    }
}

impl Default for KeyRecord {
    fn default() -> Self {
        Self::new()
    }
}

/// Storage contract shared by every backend.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn name(&self) -> &'static str;

    /// Appends `values` to `key`, creating the key on first use. Returns the
    /// key's new total sample count.
    async fn append(&self, key: &str, values: &[f64]) -> StoreResult<usize>;

    async fn median(&self, key: &str) -> StoreResult<f64>;

    /// Samples of `key` in insertion order.
    async fn export(&self, key: &str) -> StoreResult<Vec<f64>>;

    /// Removes `key`. Removing an absent key is not an error.
    async fn clear(&self, key: &str) -> StoreResult<()>;

    /// Number of live keys.
    async fn len(&self) -> StoreResult<usize>;

    /// Every key with its last-access time, as seen at one point in time.
    async fn access_times(&self) -> StoreResult<Vec<(String, SystemTime)>>;

    /// Removes each of `keys` whose last-access time is still older than
    /// `cutoff`, checked under the same lock as the removal. Keys touched
    /// since the scan, or already gone, are skipped. Returns how many keys
    /// were removed.
    async fn evict(&self, keys: &[String], cutoff: SystemTime) -> StoreResult<usize>;
}

/// Checks a client-supplied key before it reaches a backend.
pub fn validate_key(key: &str) -> StoreResult<()> {
    if key.is_empty() {
        return Err(StoreError::InvalidInput("key must not be empty".to_string()));
    }
    if key.len() > MAX_KEY_LENGTH {
        return Err(StoreError::InvalidInput(format!(
            "key is {} bytes, limit is {MAX_KEY_LENGTH}",
            key.len()
        )));
    }
    Ok(())
}

/// Builds the backend selected by `config`.
pub fn build(config: &StoreConfig) -> anyhow::Result<Arc<dyn KeyStore>> {
    match config.backend {
        BackendKind::InMemory => Ok(Arc::new(MemoryStore::new())),
        BackendKind::File => {
            let dir = config
                .data_dir
                .clone()
                .ok_or_else(|| anyhow::anyhow!("file backend requires store.data_dir"))?;
            Ok(Arc::new(FileStore::open(dir)?))
        }
    }
}
