//! Snapshot Engine Adapter
//!
//! Implements [`SnapshotEngine`] over the `zfs` binary: snapshot creation,
//! listing, and destruction for the backup cycle.

use async_trait::async_trait;
use tokio::process::Command;

use crate::adapters::execute::{execute, execute_stdout};
use crate::domain::ports::SnapshotEngine;
use crate::error::Result;

const ZFS: &str = "zfs";

/// Production snapshot engine shelling out to `zfs`.
#[derive(Default)]
pub struct ZfsCli;

impl ZfsCli {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl SnapshotEngine for ZfsCli {
    async fn create_snapshot(&self, name: &str) -> Result<()> {
        execute(Command::new(ZFS).args(["snapshot", name])).await?;
        Ok(())
    }

    async fn list_snapshots(&self, pool: &str, dataset: &str) -> Result<Vec<String>> {
        let target = format!("{}/{}", pool, dataset);
        let stdout = execute_stdout(Command::new(ZFS).args([
            "list",
            "-H",
            "-t",
            "snapshot",
            "-o",
            "name",
            "-d",
            "1",
            &target,
        ]))
        .await?;
        Ok(stdout
            .lines()
            .map(|l| l.trim().to_string())
            .filter(|l| !l.is_empty())
            .collect())
    }

    async fn destroy_snapshot(&self, name: &str) -> Result<()> {
        execute(Command::new(ZFS).args(["destroy", name])).await?;
        Ok(())
    }
}
