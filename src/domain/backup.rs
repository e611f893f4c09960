//! Backup Model
//!
//! Value objects for the coupled (archive, snapshot) backups of the Incus
//! data directory, plus the retention-window arithmetic. Timestamps use the
//! `YYYYMMDD-HHMMSS` form so that directory names sort lexicographically in
//! creation order.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Directory under the sink mountpoint holding all backups.
pub const BACKUP_DIR_NAME: &str = "incus-backups";

/// Prefix of the snapshot suffix: `<pool>/<dataset>@incus-backup-<ts>`.
pub const SNAPSHOT_PREFIX: &str = "incus-backup-";

/// Timestamp layout shared by directory names and snapshot suffixes.
pub const TIMESTAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// Default retention window in days, for both archives and snapshots.
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

// =============================================================================
// Timestamps
// =============================================================================

/// Format a point in time as a backup timestamp string.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a backup timestamp string. Returns `None` for anything malformed;
/// callers skip such entries rather than guessing an age.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// True when a backup created at `created` has outlived the retention
/// window at time `now`. The boundary is strict: a backup exactly
/// `retention_days` old is kept.
pub fn is_expired(created: DateTime<Utc>, now: DateTime<Utc>, retention_days: i64) -> bool {
    now.signed_duration_since(created) > Duration::days(retention_days)
}

// =============================================================================
// Backup Record
// =============================================================================

/// One completed backup: a tar archive and a ZFS snapshot created as a pair
/// and linked by timestamp. The two halves expire independently.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    /// Creation time in `YYYYMMDD-HHMMSS` form; doubles as the directory
    /// name and the snapshot suffix.
    pub timestamp: String,
    /// Tarball path under `<mountpoint>/incus-backups/<timestamp>/`.
    pub archive_path: PathBuf,
    /// Full snapshot name, `<pool>/<dataset>@incus-backup-<timestamp>`.
    pub snapshot_name: String,
}

impl BackupRecord {
    /// Derive the record for a backup taken at `at`.
    pub fn at(
        at: DateTime<Utc>,
        sink_mountpoint: &Path,
        pool: &str,
        dataset: &str,
    ) -> Self {
        let timestamp = format_timestamp(at);
        Self {
            archive_path: archive_path(sink_mountpoint, &timestamp),
            snapshot_name: snapshot_name(pool, dataset, &timestamp),
            timestamp,
        }
    }

    /// Directory holding this backup's archive.
    pub fn directory(&self) -> &Path {
        self.archive_path.parent().unwrap_or(Path::new("/"))
    }
}

impl std::fmt::Display for BackupRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.timestamp)
    }
}

/// `<mountpoint>/incus-backups/<ts>/incus-full-<ts>.tar.gz`
pub fn archive_path(sink_mountpoint: &Path, timestamp: &str) -> PathBuf {
    sink_mountpoint
        .join(BACKUP_DIR_NAME)
        .join(timestamp)
        .join(format!("incus-full-{}.tar.gz", timestamp))
}

/// `<pool>/<dataset>@incus-backup-<ts>`
pub fn snapshot_name(pool: &str, dataset: &str, timestamp: &str) -> String {
    format!("{}/{}@{}{}", pool, dataset, SNAPSHOT_PREFIX, timestamp)
}

/// Extract the timestamp embedded in a snapshot name, if the snapshot
/// follows the backup naming pattern for the given pool and dataset.
pub fn snapshot_timestamp<'a>(snapshot: &'a str, pool: &str, dataset: &str) -> Option<&'a str> {
    let suffix = snapshot.strip_prefix(&format!("{}/{}@", pool, dataset))?;
    suffix.strip_prefix(SNAPSHOT_PREFIX)
}
