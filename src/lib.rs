//! Incus Storage Manager
//!
//! Non-interactive replacement for the ZFS/Incus provisioning shell scripts:
//! plans and validates pool topologies before a single `zpool create`
//! invocation, and manages coupled (tar archive, ZFS snapshot) backups of
//! the Incus data directory with a fixed-age retention window.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        Domain Layer                         │
//! │   devices · vdev groups · pool plans · backup records       │
//! │                       ports (traits)                        │
//! └─────────────────────────────────────────────────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    Infrastructure Layer                     │
//! │     lsblk │ zpool │ zfs │ tar │ systemctl  (adapters)       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`domain`] - Value objects, validation logic, and ports
//! - [`adapters`] - Shell-out implementations of the ports
//! - [`planner`] - Pool topology planning and submission
//! - [`backup`] - Backup cycle and retention pruning
//! - [`error`] - Error types

pub mod adapters;
pub mod backup;
pub mod domain;
pub mod error;
pub mod planner;

// Re-export commonly used types
pub use backup::{BackupConfig, BackupManager, RestoreSelector};
pub use domain::{BackupRecord, BlockDevice, PoolPlan, UnevenPolicy, VdevGroup, VdevKind};
pub use error::{Error, Result};
pub use planner::{PoolCreateRequest, PoolPlanner, VdevSpec};
