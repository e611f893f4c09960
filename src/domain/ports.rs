//! Domain Ports (Port/Adapter Pattern)
//!
//! The planner and backup manager talk to the outside world only through
//! these traits. The production adapters shell out to `lsblk`, `zpool`,
//! `zfs`, `tar`, and `systemctl`; tests swap in in-memory implementations.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::device::BlockDevice;
use crate::domain::topology::{PoolPlan, VdevGroup};
use crate::error::Result;

// =============================================================================
// Device Enumeration Port
// =============================================================================

/// Port for listing candidate block devices.
#[async_trait]
pub trait DeviceEnumerator: Send + Sync {
    /// List whole-disk candidates, deduplicated by canonical path, with
    /// partitions and optical media excluded. Implementations fail open:
    /// when the preferred source is unavailable they fall back to a coarser
    /// listing instead of erroring out.
    async fn enumerate(&self) -> Result<Vec<BlockDevice>>;

    /// Resolve an operator-supplied identifier (by-id name, basename, or
    /// absolute path) into an enumerated device.
    async fn resolve(&self, id: &str) -> Result<BlockDevice>;
}

// =============================================================================
// Pool Engine Port
// =============================================================================

/// Health of a pool as reported by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PoolHealth {
    Online,
    Degraded,
    Faulted,
    Offline,
    Removed,
    Unavail,
}

impl std::fmt::Display for PoolHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolHealth::Online => write!(f, "ONLINE"),
            PoolHealth::Degraded => write!(f, "DEGRADED"),
            PoolHealth::Faulted => write!(f, "FAULTED"),
            PoolHealth::Offline => write!(f, "OFFLINE"),
            PoolHealth::Removed => write!(f, "REMOVED"),
            PoolHealth::Unavail => write!(f, "UNAVAIL"),
        }
    }
}

/// Summary of one pool from `zpool list`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStatus {
    pub name: String,
    pub size_bytes: u64,
    pub allocated_bytes: u64,
    pub free_bytes: u64,
    pub health: PoolHealth,
}

/// Port for the pool half of the storage engine (`zpool`).
///
/// The planner validates a whole [`PoolPlan`] before calling [`create`];
/// engine failures are surfaced verbatim and never retried, since pool
/// creation is not idempotent against partial failure.
///
/// [`create`]: PoolEngine::create
#[async_trait]
pub trait PoolEngine: Send + Sync {
    /// Names of all currently imported pools.
    async fn list_pools(&self) -> Result<Vec<String>>;

    /// Submit a validated plan as a single creation invocation.
    async fn create(&self, plan: &PoolPlan) -> Result<()>;

    /// Status of one pool.
    async fn status(&self, name: &str) -> Result<PoolStatus>;

    async fn destroy(&self, name: &str) -> Result<()>;

    async fn export(&self, name: &str) -> Result<()>;

    async fn import(&self, name: &str) -> Result<()>;

    async fn scrub(&self, name: &str) -> Result<()>;

    /// Attach an additional vdev group to an existing pool.
    async fn add_vdev(&self, name: &str, group: &VdevGroup) -> Result<()>;

    /// Detach a device from an existing pool.
    async fn remove_device(&self, name: &str, device: &Path) -> Result<()>;
}

// =============================================================================
// Snapshot Engine Port
// =============================================================================

/// Port for the dataset half of the storage engine (`zfs`), limited to the
/// snapshot operations the backup cycle needs.
#[async_trait]
pub trait SnapshotEngine: Send + Sync {
    /// Create `<pool>/<dataset>@<suffix>`-style snapshot by full name.
    async fn create_snapshot(&self, name: &str) -> Result<()>;

    /// List snapshot names under `<pool>/<dataset>`.
    async fn list_snapshots(&self, pool: &str, dataset: &str) -> Result<Vec<String>>;

    /// Destroy a snapshot by full name.
    async fn destroy_snapshot(&self, name: &str) -> Result<()>;
}

// =============================================================================
// Archive Store Port
// =============================================================================

/// A backup directory found on disk, with its filesystem modification time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// Directory basename; a well-formed entry is a backup timestamp.
    pub name: String,
    pub path: PathBuf,
    pub modified: DateTime<Utc>,
}

/// Port for durable archive storage (`tar` + the sink filesystem).
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Write one tar archive spanning `sources`, rooted at `/` and
    /// preserving permissions and ownership, to `archive_path`. Creates the
    /// parent directory first.
    async fn create_archive(&self, archive_path: &Path, sources: &[PathBuf]) -> Result<()>;

    /// Extract an archive back to `/`, overwriting in place.
    async fn extract_archive(&self, archive_path: &Path) -> Result<()>;

    /// List the entries of `<mountpoint>/incus-backups`, unordered. A
    /// missing backup directory is an empty listing, not an error.
    async fn list_entries(&self, sink_mountpoint: &Path) -> Result<Vec<ArchiveEntry>>;

    /// Remove one backup directory recursively.
    async fn remove_entry(&self, path: &Path) -> Result<()>;
}

// =============================================================================
// Service Controller Port
// =============================================================================

/// Port for quiescing the producing service around backup and restore.
///
/// The backup cycle's contract: no archive is written while the service is
/// live, and the resume call runs unconditionally once the service has been
/// stopped, whatever happened in between.
#[async_trait]
pub trait ServiceController: Send + Sync {
    async fn stop(&self, unit: &str) -> Result<()>;

    async fn start(&self, unit: &str) -> Result<()>;
}
