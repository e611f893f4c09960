//! Backup Retention Manager
//!
//! Produces coupled (tar archive, ZFS snapshot) backups of the Incus data
//! directory and enforces the fixed-age retention window over both halves.
//!
//! The backup cycle is a fixed sequence:
//!
//! ```text
//! Idle -> ServiceStopping -> Archiving -> Snapshotting
//!      -> ServiceResuming -> Pruning -> Idle
//! ```
//!
//! A stop failure aborts before archiving. Once the service has been
//! stopped, the resume step runs unconditionally; an archive or snapshot
//! failure is surfaced only after the service is back up. There is no
//! transactional undo: a partial archive is left in place (it may still be
//! diagnostically useful) and is only ever removed by retention pruning.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::domain::backup::{
    self, is_expired, parse_timestamp, snapshot_timestamp, BackupRecord, DEFAULT_RETENTION_DAYS,
};
use crate::domain::ports::{ArchiveStore, ServiceController, SnapshotEngine};
use crate::error::{Error, Result};

// =============================================================================
// Configuration
// =============================================================================

/// Settings for one backup workflow instance.
#[derive(Debug, Clone)]
pub struct BackupConfig {
    /// Mountpoint of the sink filesystem holding `incus-backups/`.
    pub sink_mountpoint: PathBuf,
    /// Pool containing the Incus dataset.
    pub pool: String,
    /// Dataset to snapshot, relative to the pool.
    pub dataset: String,
    /// Paths archived into the tarball, rooted at `/`.
    pub source_paths: Vec<PathBuf>,
    /// Age in days past which archives and snapshots are pruned.
    pub retention_days: i64,
    /// Service unit quiesced around backup and restore.
    pub service_unit: String,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            sink_mountpoint: PathBuf::from("/tank"),
            pool: "tank".to_string(),
            dataset: "incus".to_string(),
            source_paths: vec![PathBuf::from("/var/lib/incus")],
            retention_days: DEFAULT_RETENTION_DAYS,
            service_unit: "incus".to_string(),
        }
    }
}

/// Which backup a restore should use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RestoreSelector {
    Latest,
    Timestamp(String),
}

impl From<&str> for RestoreSelector {
    fn from(s: &str) -> Self {
        if s.eq_ignore_ascii_case("latest") {
            RestoreSelector::Latest
        } else {
            RestoreSelector::Timestamp(s.to_string())
        }
    }
}

// =============================================================================
// Manager
// =============================================================================

/// Orchestrates the backup cycle, listing, restore, and retention pruning.
pub struct BackupManager {
    config: BackupConfig,
    snapshots: Arc<dyn SnapshotEngine>,
    archives: Arc<dyn ArchiveStore>,
    service: Arc<dyn ServiceController>,
}

impl BackupManager {
    pub fn new(
        config: BackupConfig,
        snapshots: Arc<dyn SnapshotEngine>,
        archives: Arc<dyn ArchiveStore>,
        service: Arc<dyn ServiceController>,
    ) -> Self {
        Self {
            config,
            snapshots,
            archives,
            service,
        }
    }

    /// Run one full backup cycle and return the new record.
    pub async fn run(&self) -> Result<BackupRecord> {
        self.run_at(Utc::now()).await
    }

    /// Backup cycle with an explicit clock, for tests.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<BackupRecord> {
        let record = BackupRecord::at(
            now,
            &self.config.sink_mountpoint,
            &self.config.pool,
            &self.config.dataset,
        );
        info!(backup = %record, "starting backup cycle");

        // No archive is written while the service is live.
        self.service.stop(&self.config.service_unit).await?;

        let cycle = self.archive_then_snapshot(&record).await;

        // Resume is not skippable; a failed backup must never leave the
        // service down.
        let resume = self.service.start(&self.config.service_unit).await;

        // The cycle error wins when both fail, but a service left down must
        // never be invisible.
        if let (Err(_), Err(resume_err)) = (&cycle, &resume) {
            warn!(
                unit = %self.config.service_unit,
                error = %resume_err,
                "service also failed to resume and may still be down"
            );
        }
        cycle?;
        resume?;

        self.prune_expired_at(now).await?;
        info!(backup = %record, "backup cycle complete");
        Ok(record)
    }

    /// Archive first, snapshot strictly after, so a restore can use either
    /// half independently. A snapshot failure keeps the finished archive.
    async fn archive_then_snapshot(&self, record: &BackupRecord) -> Result<()> {
        self.archives
            .create_archive(&record.archive_path, &self.config.source_paths)
            .await?;
        info!(archive = %record.archive_path.display(), "archive written");

        if let Err(err) = self.snapshots.create_snapshot(&record.snapshot_name).await {
            warn!(
                snapshot = %record.snapshot_name,
                archive = %record.archive_path.display(),
                "snapshot failed; archive kept and remains restorable"
            );
            return Err(err);
        }
        info!(snapshot = %record.snapshot_name, "snapshot created");
        Ok(())
    }

    /// All backups under the sink, ascending by timestamp. Directories whose
    /// names are not backup timestamps are not ours and are skipped.
    pub async fn list(&self) -> Result<Vec<BackupRecord>> {
        let mut records: Vec<BackupRecord> = self
            .archives
            .list_entries(&self.config.sink_mountpoint)
            .await?
            .into_iter()
            .filter_map(|entry| {
                if parse_timestamp(&entry.name).is_none() {
                    warn!(entry = %entry.name, "skipping non-backup directory");
                    return None;
                }
                Some(BackupRecord {
                    archive_path: backup::archive_path(&self.config.sink_mountpoint, &entry.name),
                    snapshot_name: backup::snapshot_name(
                        &self.config.pool,
                        &self.config.dataset,
                        &entry.name,
                    ),
                    timestamp: entry.name,
                })
            })
            .collect();
        records.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(records)
    }

    /// Restore one backup by extracting its archive back over `/`.
    ///
    /// Archive-based only: the paired snapshot is informational and any
    /// rollback from it happens outside this tool. The quiesce/resume
    /// contract matches the backup cycle; nothing is auto-deleted.
    pub async fn restore(&self, selector: &RestoreSelector) -> Result<BackupRecord> {
        let records = self.list().await?;
        let record = match selector {
            RestoreSelector::Latest => records.into_iter().last(),
            RestoreSelector::Timestamp(ts) => {
                records.into_iter().find(|r| &r.timestamp == ts)
            }
        }
        .ok_or_else(|| Error::BackupNotFound {
            timestamp: match selector {
                RestoreSelector::Latest => "latest".to_string(),
                RestoreSelector::Timestamp(ts) => ts.clone(),
            },
            mountpoint: self.config.sink_mountpoint.display().to_string(),
        })?;

        info!(backup = %record, "restoring from archive");
        self.service.stop(&self.config.service_unit).await?;
        let outcome = self.archives.extract_archive(&record.archive_path).await;
        let resume = self.service.start(&self.config.service_unit).await;
        if let (Err(_), Err(resume_err)) = (&outcome, &resume) {
            warn!(
                unit = %self.config.service_unit,
                error = %resume_err,
                "service also failed to resume and may still be down"
            );
        }
        outcome?;
        resume?;
        info!(backup = %record, "restore complete");
        Ok(record)
    }

    /// Prune archives and snapshots older than the retention window.
    pub async fn prune_expired(&self) -> Result<()> {
        self.prune_expired_at(Utc::now()).await
    }

    /// Retention pruning with an explicit clock, for tests.
    ///
    /// Two independent passes: expired backup directories (by filesystem
    /// modification age) and expired snapshots (by embedded timestamp). An
    /// entry that fails to delete is logged and skipped so one stuck entry
    /// never blocks the rest, and a failure in one pass does not stop the
    /// other.
    pub async fn prune_expired_at(&self, now: DateTime<Utc>) -> Result<()> {
        let archive_pass = self.prune_archives(now).await;
        let snapshot_pass = self.prune_snapshots(now).await;
        archive_pass?;
        snapshot_pass
    }

    async fn prune_archives(&self, now: DateTime<Utc>) -> Result<()> {
        let entries = self
            .archives
            .list_entries(&self.config.sink_mountpoint)
            .await?;
        for entry in entries {
            if !is_expired(entry.modified, now, self.config.retention_days) {
                continue;
            }
            info!(backup = %entry.name, "pruning expired archive directory");
            if let Err(err) = self.archives.remove_entry(&entry.path).await {
                warn!(backup = %entry.name, %err, "failed to remove archive directory");
            }
        }
        Ok(())
    }

    async fn prune_snapshots(&self, now: DateTime<Utc>) -> Result<()> {
        let snapshots = self
            .snapshots
            .list_snapshots(&self.config.pool, &self.config.dataset)
            .await?;
        for snapshot in snapshots {
            let Some(suffix) =
                snapshot_timestamp(&snapshot, &self.config.pool, &self.config.dataset)
            else {
                // Not created by this tool; leave it alone.
                continue;
            };
            let Some(created) = parse_timestamp(suffix) else {
                // Malformed suffixes are skipped, never treated as
                // infinitely old or infinitely new.
                warn!(%snapshot, "skipping snapshot with malformed timestamp");
                continue;
            };
            if !is_expired(created, now, self.config.retention_days) {
                continue;
            }
            info!(%snapshot, "pruning expired snapshot");
            if let Err(err) = self.snapshots.destroy_snapshot(&snapshot).await {
                warn!(%snapshot, %err, "failed to destroy snapshot");
            }
        }
        Ok(())
    }
}
