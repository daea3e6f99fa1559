//! Durable backend: one append-only CSV file per key.
//!
//! Layout: `<data_dir>/<hex(key)>.csv`, a `value` header line followed by one
//! sample per line. Appends only ever add lines. The file's modification time
//! is the key's last-access time, so reads set it explicitly. A single
//! store-wide lock serialises every file operation; all I/O runs on the
//! blocking pool.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt::Write as _;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind as IoErrorKind, Write as _};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, error, info, instrument, warn};

use super::sequence::{median_of, validate_batch};
use super::{validate_key, KeyStore};
use crate::error::{StoreError, StoreResult};

const HEADER: &str = "value";
const EXTENSION: &str = "csv";

#[derive(Clone)]
pub struct FileStore {
    inner: Arc<Inner>,
}

struct Inner {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl FileStore {
    /// Opens (creating if needed) a store rooted at `dir`.
    pub fn open(dir: impl Into<PathBuf>) -> StoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| StoreError::storage(format!("create data dir {}", dir.display()), e))?;
        info!(dir = %dir.display(), "file store opened");
        Ok(Self {
            inner: Arc::new(Inner {
                dir,
                lock: Mutex::new(()),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.dir
    }

    async fn run<T, F>(&self, op: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&Inner) -> StoreResult<T> + Send + 'static,
    {
        let inner = self.inner.clone();
        tokio::task::spawn_blocking(move || op(&inner))
            .await
            .map_err(|e| StoreError::Internal(format!("file store task failed: {e}")))?
    }
}

impl Inner {
    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{EXTENSION}", encode_key(key)))
    }

    fn append(&self, key: &str, values: &[f64]) -> StoreResult<usize> {
        let path = self.path_for(key);
        let _guard = self.lock.lock();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::storage(format!("open {}", path.display()), e))?;
        let prev_len = file
            .metadata()
            .map_err(|e| StoreError::storage(format!("stat {}", path.display()), e))?
            .len();

        let mut buf = String::new();
        if prev_len == 0 {
            buf.push_str(HEADER);
            buf.push('\n');
        }
        for value in values {
            let _ = writeln!(buf, "{value}");
        }
        if let Err(e) = file.write_all(buf.as_bytes()) {
            truncate_to(&file, prev_len, &path);
            return Err(StoreError::storage(format!("append to {}", path.display()), e));
        }
        // The batch has landed and the write itself moved the mtime forward.
        if let Err(e) = stamp(&file, &path) {
            warn!(key = %key, error = %e, "could not stamp mtime after append");
        }

        Ok(read_samples(&path, key)?.len())
    }

    /// Reads every sample of `key` and refreshes its mtime. With
    /// `require_samples`, an empty file fails before the mtime changes.
    fn read(&self, key: &str, require_samples: bool) -> StoreResult<Vec<f64>> {
        let path = self.path_for(key);
        let _guard = self.lock.lock();
        let samples = read_samples(&path, key)?;
        if require_samples && samples.is_empty() {
            return Err(StoreError::EmptySequence(key.to_string()));
        }
        touch(&path)?;
        Ok(samples)
    }

    fn clear(&self, key: &str) -> StoreResult<()> {
        let path = self.path_for(key);
        let _guard = self.lock.lock();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == IoErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::storage(format!("remove {}", path.display()), e)),
        }
    }

    fn access_times(&self) -> StoreResult<Vec<(String, SystemTime)>> {
        let _guard = self.lock.lock();
        let entries = fs::read_dir(&self.dir)
            .map_err(|e| StoreError::storage(format!("list {}", self.dir.display()), e))?;

        let mut times = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(key) = key_from_path(&path) else {
                continue;
            };
            match entry.metadata().and_then(|meta| meta.modified()) {
                Ok(modified) => times.push((key, modified)),
                Err(e) => debug!(path = %path.display(), error = %e, "skipping unreadable entry"),
            }
        }
        Ok(times)
    }

    fn evict(&self, keys: &[String], cutoff: SystemTime) -> usize {
        let _guard = self.lock.lock();
        let mut evicted = 0;
        for key in keys {
            let path = self.path_for(key);
            let modified = match fs::metadata(&path).and_then(|meta| meta.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    debug!(key = %key, error = %e, "skipped eviction");
                    continue;
                }
            };
            if modified >= cutoff {
                debug!(key = %key, "skipped eviction: touched since scan");
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => evicted += 1,
                Err(e) => debug!(key = %key, error = %e, "eviction failed"),
            }
        }
        evicted
    }
}

#[async_trait]
impl KeyStore for FileStore {
    fn name(&self) -> &'static str {
        "file"
    }

    #[instrument(skip(self, values), fields(samples = values.len()))]
    async fn append(&self, key: &str, values: &[f64]) -> StoreResult<usize> {
        validate_key(key)?;
        validate_batch(values)?;
        let key = key.to_string();
        let values = values.to_vec();
        self.run(move |inner| inner.append(&key, &values)).await
    }

    #[instrument(skip(self))]
    async fn median(&self, key: &str) -> StoreResult<f64> {
        ensure_addressable(key)?;
        let owned = key.to_string();
        let samples = self.run(move |inner| inner.read(&owned, true)).await?;
        median_of(samples, key)
    }

    #[instrument(skip(self))]
    async fn export(&self, key: &str) -> StoreResult<Vec<f64>> {
        ensure_addressable(key)?;
        let key = key.to_string();
        self.run(move |inner| inner.read(&key, false)).await
    }

    #[instrument(skip(self))]
    async fn clear(&self, key: &str) -> StoreResult<()> {
        if validate_key(key).is_err() {
            // no file can exist for a key we would never have written
            return Ok(());
        }
        let key = key.to_string();
        self.run(move |inner| inner.clear(&key)).await
    }

    async fn len(&self) -> StoreResult<usize> {
        Ok(self.run(|inner| inner.access_times()).await?.len())
    }

    async fn access_times(&self) -> StoreResult<Vec<(String, SystemTime)>> {
        self.run(|inner| inner.access_times()).await
    }

    async fn evict(&self, keys: &[String], cutoff: SystemTime) -> StoreResult<usize> {
        let keys = keys.to_vec();
        self.run(move |inner| Ok(inner.evict(&keys, cutoff))).await
    }
}

/// Reads of a key that could never have been written report it as missing.
fn ensure_addressable(key: &str) -> StoreResult<()> {
    validate_key(key).map_err(|_| StoreError::KeyNotFound(key.to_string()))
}

fn read_samples(path: &Path, key: &str) -> StoreResult<Vec<f64>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == IoErrorKind::NotFound => {
            return Err(StoreError::KeyNotFound(key.to_string()))
        }
        Err(e) => return Err(StoreError::storage(format!("read {}", path.display()), e)),
    };

    content
        .lines()
        .enumerate()
        .map(|(n, line)| (n, line.trim()))
        .filter(|(n, line)| !line.is_empty() && !(*n == 0 && *line == HEADER))
        .map(|(n, line)| {
            line.parse::<f64>().map_err(|_| {
                StoreError::Internal(format!(
                    "corrupt sample on line {} of {}",
                    n + 1,
                    path.display()
                ))
            })
        })
        .collect()
}

/// Cuts a partially written batch back off the end of a key file, so the
/// next append starts on a fresh line.
fn truncate_to(file: &File, len: u64, path: &Path) {
    if let Err(e) = file.set_len(len) {
        error!(path = %path.display(), error = %e, "failed to roll back partial append");
    }
}

/// Refreshes the modification time of an existing key file.
fn touch(path: &Path) -> StoreResult<()> {
    let file = OpenOptions::new()
        .append(true)
        .open(path)
        .map_err(|e| StoreError::storage(format!("open {}", path.display()), e))?;
    stamp(&file, path)
}

fn stamp(file: &File, path: &Path) -> StoreResult<()> {
    file.set_modified(SystemTime::now())
        .map_err(|e| StoreError::storage(format!("set mtime on {}", path.display()), e))
}

fn encode_key(key: &str) -> String {
    key.bytes().map(|b| format!("{b:02x}")).collect()
}

fn decode_key(encoded: &str) -> Option<String> {
    if encoded.is_empty() || encoded.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..encoded.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(encoded.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

fn key_from_path(path: &Path) -> Option<String> {
    if path.extension()? != EXTENSION || !path.is_file() {
        return None;
    }
    decode_key(path.file_stem()?.to_str()?)
}
