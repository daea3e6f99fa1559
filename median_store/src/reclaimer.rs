//! Background reclamation of idle keys.
//!
//! Each sweep snapshots every key's last-access time, picks the keys idle for
//! longer than the TTL, and hands them to [`KeyStore::evict`] together with
//! the cutoff so the store can re-check each key under its own lock. A key
//! touched between the scan and the eviction therefore survives.

use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::error::StoreResult;
use crate::store::KeyStore;

/// Outcome of a single sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: usize,
    pub expired: usize,
    pub evicted: usize,
}

pub struct Reclaimer {
    store: Arc<dyn KeyStore>,
    ttl: Duration,
    interval: Duration,
}

impl Reclaimer {
    pub fn new(store: Arc<dyn KeyStore>, ttl: Duration, interval: Duration) -> Self {
        Self {
            store,
            ttl,
            interval,
        }
    }

    pub async fn sweep(&self) -> StoreResult<SweepReport> {
        self.sweep_at(SystemTime::now()).await
    }

    /// Sweep as if the current time were `now`.
    pub async fn sweep_at(&self, now: SystemTime) -> StoreResult<SweepReport> {
        // A TTL reaching back before the epoch cannot expire anything.
        let Some(cutoff) = now.checked_sub(self.ttl) else {
            return Ok(SweepReport::default());
        };

        let times = self.store.access_times().await?;
        let expired: Vec<String> = times
            .iter()
            .filter(|(_, last_accessed)| *last_accessed < cutoff)
            .map(|(key, _)| key.clone())
            .collect();

        let evicted = if expired.is_empty() {
            0
        } else {
            self.store.evict(&expired, cutoff).await?
        };

        Ok(SweepReport {
            scanned: times.len(),
            expired: expired.len(),
            evicted,
        })
    }

    /// Run sweeps every interval until `shutdown` flips to `true` or its
    /// sender is dropped. The first sweep happens one interval after start.
    pub fn spawn(self, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                ttl_secs = self.ttl.as_secs_f64(),
                interval_secs = self.interval.as_secs_f64(),
                backend = self.store.name(),
                "reclaimer started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match self.sweep().await {
                            Ok(report) if report.evicted > 0 => info!(
                                scanned = report.scanned,
                                expired = report.expired,
                                evicted = report.evicted,
                                "sweep evicted idle keys"
                            ),
                            Ok(report) => debug!(
                                scanned = report.scanned,
                                expired = report.expired,
                                "sweep complete"
                            ),
                            Err(e) => warn!(error = %e, "sweep failed; retrying next interval"),
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            info!("reclaimer shutting down");
                            break;
                        }
                    }
                }
            }
        })
    }
}
