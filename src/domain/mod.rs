//! Domain Layer
//!
//! Pure decision logic and value objects: block devices, pool topologies,
//! backup records, and the ports the planner and backup manager depend on.
//! Nothing in this module spawns a process.

pub mod backup;
pub mod device;
pub mod ports;
pub mod topology;

#[cfg(test)]
mod proptest;

pub use backup::{BackupRecord, DEFAULT_RETENTION_DAYS};
pub use device::{dedup_by_canonical_path, resolve_device_path, BlockDevice, UsageFlag};
pub use ports::{
    ArchiveEntry, ArchiveStore, DeviceEnumerator, PoolEngine, PoolHealth, PoolStatus,
    ServiceController, SnapshotEngine,
};
pub use topology::{
    partition_into_mirror_groups, PoolPlan, UnevenPolicy, VdevGroup, VdevKind,
};
