//! Device Enumeration Adapter
//!
//! Implements [`DeviceEnumerator`] over `lsblk --json` plus the
//! `/dev/disk/by-id` symlink farm. Whole disks only: partitions and optical
//! media never appear in the listing. Enumeration fails open: when `lsblk`
//! is unavailable the adapter falls back to a coarser `/sys/block` scan
//! rather than erroring out.

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::adapters::execute::execute_stdout;
use crate::domain::device::{dedup_by_canonical_path, BlockDevice, UsageFlag};
use crate::domain::ports::DeviceEnumerator;
use crate::error::{Error, Result};

const LSBLK: &str = "lsblk";
const BY_ID_DIR: &str = "/dev/disk/by-id";
const SYS_BLOCK: &str = "/sys/block";

// =============================================================================
// lsblk JSON Shapes
// =============================================================================

#[derive(Debug, Deserialize)]
struct LsblkReport {
    #[serde(default)]
    blockdevices: Vec<LsblkDevice>,
}

#[derive(Debug, Deserialize)]
struct LsblkDevice {
    name: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    mountpoint: Option<String>,
    #[serde(default)]
    fstype: Option<String>,
    #[serde(default)]
    children: Vec<LsblkDevice>,
}

impl LsblkDevice {
    /// Usage flags for a whole disk, folding in its partitions: a disk with
    /// a mounted partition counts as mounted.
    fn classify(&self) -> std::collections::BTreeSet<UsageFlag> {
        let mut flags = std::collections::BTreeSet::new();
        self.classify_into(&mut flags);
        flags
    }

    fn classify_into(&self, flags: &mut std::collections::BTreeSet<UsageFlag>) {
        if self.mountpoint.is_some() {
            flags.insert(UsageFlag::Mounted);
        }
        match self.fstype.as_deref() {
            Some("zfs_member") => {
                flags.insert(UsageFlag::InZfsPool);
            }
            Some("linux_raid_member") => {
                flags.insert(UsageFlag::InRaid);
            }
            Some("LVM2_member") => {
                flags.insert(UsageFlag::InLvm);
            }
            Some(other) if !other.is_empty() => {
                flags.insert(UsageFlag::HasFilesystem);
            }
            _ => {}
        }
        for child in &self.children {
            child.classify_into(flags);
        }
    }
}

// =============================================================================
// Adapter
// =============================================================================

/// Production device enumerator backed by `lsblk` and `/dev/disk/by-id`.
pub struct LsblkEnumerator {
    lsblk_program: String,
    by_id_dir: PathBuf,
    sys_block_dir: PathBuf,
}

impl Default for LsblkEnumerator {
    fn default() -> Self {
        Self {
            lsblk_program: LSBLK.to_string(),
            by_id_dir: PathBuf::from(BY_ID_DIR),
            sys_block_dir: PathBuf::from(SYS_BLOCK),
        }
    }
}

impl LsblkEnumerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enumerator with explicit sources, for alternate roots and tests.
    pub fn with_paths(
        lsblk_program: impl Into<String>,
        by_id_dir: impl Into<PathBuf>,
        sys_block_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            lsblk_program: lsblk_program.into(),
            by_id_dir: by_id_dir.into(),
            sys_block_dir: sys_block_dir.into(),
        }
    }

    /// Map canonical device path -> stable by-id name. The first symlink
    /// (alphabetically) wins when several ids alias one device; partition
    /// links are skipped.
    fn by_id_index(&self) -> BTreeMap<PathBuf, String> {
        let mut index = BTreeMap::new();
        let entries = match std::fs::read_dir(&self.by_id_dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!(dir = %self.by_id_dir.display(), %err, "no by-id directory");
                return index;
            }
        };
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.contains("-part") {
                continue;
            }
            let Ok(canonical) = std::fs::canonicalize(entry.path()) else {
                continue;
            };
            index.entry(canonical).or_insert(name);
        }
        index
    }

    async fn enumerate_via_lsblk(&self) -> Result<Vec<BlockDevice>> {
        let stdout = execute_stdout(Command::new(&self.lsblk_program).args([
            "--json",
            "--bytes",
            "--output",
            "NAME,TYPE,SIZE,MODEL,MOUNTPOINT,FSTYPE",
        ]))
        .await?;

        let report: LsblkReport =
            serde_json::from_str(&stdout).map_err(|err| Error::Parse {
                what: "lsblk --json output".to_string(),
                detail: err.to_string(),
            })?;

        let by_id = self.by_id_index();
        let devices = report
            .blockdevices
            .iter()
            .filter(|d| d.kind == "disk")
            .map(|d| {
                let canonical = PathBuf::from("/dev").join(&d.name);
                let id = by_id
                    .get(&canonical)
                    .cloned()
                    .unwrap_or_else(|| d.name.clone());
                BlockDevice {
                    id,
                    canonical_path: canonical,
                    size_bytes: d.size.unwrap_or(0),
                    model: d.model.clone().filter(|m| !m.trim().is_empty()),
                    usage: d.classify(),
                }
            })
            .collect();
        Ok(dedup_by_canonical_path(devices))
    }

    /// Coarse fallback listing from `/sys/block`: no usage classification,
    /// size from the 512-byte sector count, virtual and optical devices
    /// excluded by name.
    fn enumerate_via_sysfs(&self) -> Result<Vec<BlockDevice>> {
        let mut devices = Vec::new();
        let by_id = self.by_id_index();
        for entry in std::fs::read_dir(&self.sys_block_dir)?.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with("loop")
                || name.starts_with("ram")
                || name.starts_with("sr")
                || name.starts_with("zram")
                || name.starts_with("dm-")
                || name.starts_with("md")
            {
                continue;
            }
            let canonical = PathBuf::from("/dev").join(&name);
            let sectors: u64 = std::fs::read_to_string(entry.path().join("size"))
                .ok()
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(0);
            let model = std::fs::read_to_string(entry.path().join("device/model"))
                .ok()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty());
            let id = by_id
                .get(&canonical)
                .cloned()
                .unwrap_or_else(|| name.clone());
            devices.push(BlockDevice {
                id,
                canonical_path: canonical,
                size_bytes: sectors * 512,
                model,
                usage: Default::default(),
            });
        }
        devices.sort_by(|a, b| a.canonical_path.cmp(&b.canonical_path));
        Ok(dedup_by_canonical_path(devices))
    }
}

#[async_trait]
impl DeviceEnumerator for LsblkEnumerator {
    async fn enumerate(&self) -> Result<Vec<BlockDevice>> {
        match self.enumerate_via_lsblk().await {
            Ok(devices) => Ok(devices),
            Err(err) => {
                warn!(%err, "lsblk enumeration failed, falling back to /sys/block");
                self.enumerate_via_sysfs()
            }
        }
    }

    async fn resolve(&self, id: &str) -> Result<BlockDevice> {
        let path = crate::domain::device::resolve_device_path(id);
        let canonical = std::fs::canonicalize(&path)
            .map_err(|_| Error::DeviceNotFound { id: id.to_string() })?;

        // Prefer the enumerated entry so size, model, and usage come along.
        if let Ok(devices) = self.enumerate().await {
            if let Some(device) = devices.into_iter().find(|d| d.canonical_path == canonical) {
                return Ok(BlockDevice {
                    id: id.to_string(),
                    ..device
                });
            }
        }
        Ok(BlockDevice::new(id, canonical))
    }
}
