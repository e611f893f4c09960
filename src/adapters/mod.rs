//! Infrastructure Adapters
//!
//! Concrete implementations of the domain ports, each shelling out to one
//! external binary through the shared [`execute`] helper.

pub mod archive;
pub mod execute;
pub mod lsblk;
pub mod systemd;
pub mod zfs;
pub mod zpool;

pub use archive::TarArchiveStore;
pub use lsblk::LsblkEnumerator;
pub use systemd::SystemdController;
pub use zfs::ZfsCli;
pub use zpool::ZpoolCli;
