//! Block Device Model
//!
//! Value objects describing candidate disks for pool construction. Devices
//! are identified by their stable `/dev/disk/by-id` name where one exists,
//! and always carry the resolved canonical device node. Two entries with the
//! same canonical path are the same physical device.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

// =============================================================================
// Usage Flags
// =============================================================================

/// Existing usage detected on a device.
///
/// Usage flags are informational: they are surfaced as warnings when a device
/// is selected for a pool, but never block selection on their own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageFlag {
    /// Device (or one of its partitions) appears in the mount table
    Mounted,
    /// Device carries a ZFS member label
    InZfsPool,
    /// Device is part of an MD RAID array
    InRaid,
    /// Device is an LVM physical volume
    InLvm,
    /// Device carries some filesystem signature
    HasFilesystem,
}

impl std::fmt::Display for UsageFlag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UsageFlag::Mounted => write!(f, "mounted"),
            UsageFlag::InZfsPool => write!(f, "in ZFS pool"),
            UsageFlag::InRaid => write!(f, "in RAID array"),
            UsageFlag::InLvm => write!(f, "in LVM volume group"),
            UsageFlag::HasFilesystem => write!(f, "has filesystem"),
        }
    }
}

// =============================================================================
// Block Device
// =============================================================================

/// A candidate block device for pool membership.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockDevice {
    /// Stable identifier: by-id symlink name when available, else the
    /// device basename (e.g. `sda`).
    pub id: String,
    /// Fully resolved device node (e.g. `/dev/sda`).
    pub canonical_path: PathBuf,
    /// Total capacity in bytes.
    pub size_bytes: u64,
    /// Device model string, if the enumerator reported one.
    pub model: Option<String>,
    /// Existing usage detected on the device.
    pub usage: BTreeSet<UsageFlag>,
}

impl BlockDevice {
    pub fn new(id: impl Into<String>, canonical_path: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            canonical_path: canonical_path.into(),
            size_bytes: 0,
            model: None,
            usage: BTreeSet::new(),
        }
    }

    /// Capacity in GiB, for display.
    pub fn size_gib(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }

    /// True when no existing usage was detected.
    pub fn is_unused(&self) -> bool {
        self.usage.is_empty()
    }

    /// One-line usage summary for warnings, e.g. `mounted, in LVM volume group`.
    pub fn usage_summary(&self) -> String {
        self.usage
            .iter()
            .map(|f| f.to_string())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl PartialEq for BlockDevice {
    fn eq(&self, other: &Self) -> bool {
        self.canonical_path == other.canonical_path
    }
}

impl Eq for BlockDevice {}

impl std::fmt::Display for BlockDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

// =============================================================================
// Deduplication
// =============================================================================

/// Collapse a device list so each canonical path appears exactly once.
///
/// The first entry for a given canonical path wins; enumeration order places
/// by-id names ahead of raw device nodes, so stable identifiers are kept in
/// preference to their aliases.
pub fn dedup_by_canonical_path(devices: Vec<BlockDevice>) -> Vec<BlockDevice> {
    let mut seen: BTreeSet<PathBuf> = BTreeSet::new();
    devices
        .into_iter()
        .filter(|d| seen.insert(d.canonical_path.clone()))
        .collect()
}

/// Resolve an operator-supplied device identifier to a device path.
///
/// Accepts a stable by-id name (resolved under `/dev/disk/by-id/`), a raw
/// basename (resolved under `/dev/`), or an absolute path taken as-is.
pub fn resolve_device_path(id: &str) -> PathBuf {
    let p = Path::new(id);
    if p.is_absolute() {
        return p.to_path_buf();
    }
    let by_id = Path::new("/dev/disk/by-id").join(id);
    if by_id.exists() {
        by_id
    } else {
        Path::new("/dev").join(id)
    }
}
