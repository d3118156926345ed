//! Expiry sweeper.
//!
//! A background task that periodically soft-deletes files past their expiry
//! and removes their stored bytes. Each pass is idempotent: the soft-delete
//! transition fires at most once per file, and byte removals that fail are
//! retried on later passes via the purge backlog.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::SweeperConfig;
use crate::file::{FileRepository, FileStorage};
use crate::Result;

/// Outcome of one sweep pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Files soft-deleted this pass.
    pub expired: usize,
    /// Byte removals confirmed this pass (new and retried).
    pub purged: usize,
    /// Byte removals that failed and stay in the backlog.
    pub failed: usize,
}

impl SweepStats {
    pub fn is_empty(&self) -> bool {
        *self == SweepStats::default()
    }
}

/// Periodic file expiry worker.
pub struct ExpirySweeper {
    pool: SqlitePool,
    storage: FileStorage,
    config: SweeperConfig,
}

impl ExpirySweeper {
    pub fn new(pool: SqlitePool, storage: FileStorage, config: SweeperConfig) -> Self {
        Self {
            pool,
            storage,
            config,
        }
    }

    /// Run the sweep loop until the task is dropped.
    pub async fn run(self) {
        let mut ticker = interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            "Expiry sweeper running every {}s, batch size {}",
            self.config.interval_secs, self.config.batch_size
        );

        loop {
            ticker.tick().await;
            match self.sweep_once(Utc::now()).await {
                Ok(stats) if stats.is_empty() => debug!("Sweep pass: nothing to do"),
                Ok(stats) => info!(
                    "Sweep pass: {} expired, {} purged, {} removal failures",
                    stats.expired, stats.purged, stats.failed
                ),
                Err(e) => warn!("Sweep pass failed: {}", e),
            }
        }
    }

    /// One sweep pass at the given time.
    ///
    /// The backlog of unremoved bytes is retried first, then newly expired
    /// files are transitioned, so a fresh failure is not retried within the
    /// same pass.
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<SweepStats> {
        let repo = FileRepository::new(&self.pool);
        let mut stats = SweepStats::default();

        for record in repo.list_unpurged(self.config.batch_size).await? {
            match self.storage.remove(&record.stored_name) {
                Ok(_) => {
                    repo.mark_purged(&record.id, now).await?;
                    stats.purged += 1;
                }
                Err(e) => {
                    warn!("Retried removal of {} failed: {}", record.stored_name, e);
                    stats.failed += 1;
                }
            }
        }

        for record in repo.list_expired(now, self.config.batch_size).await? {
            if !repo.soft_delete(&record.id, now, "expired", None).await? {
                // Deleted concurrently since the listing; nothing to do.
                continue;
            }
            stats.expired += 1;

            match self.storage.remove(&record.stored_name) {
                Ok(_) => {
                    repo.mark_purged(&record.id, now).await?;
                    stats.purged += 1;
                }
                Err(e) => {
                    warn!(
                        "Removal of expired file {} failed, keeping in backlog: {}",
                        record.stored_name, e
                    );
                    stats.failed += 1;
                }
            }
        }

        Ok(stats)
    }
}
