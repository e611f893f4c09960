//! Service Controller Adapter
//!
//! Implements [`ServiceController`] over `systemctl`, used to quiesce the
//! Incus service around backup and restore.

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::adapters::execute::execute;
use crate::domain::ports::ServiceController;
use crate::error::Result;

const SYSTEMCTL: &str = "systemctl";

/// Production service controller shelling out to `systemctl`.
#[derive(Default)]
pub struct SystemdController;

impl SystemdController {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ServiceController for SystemdController {
    async fn stop(&self, unit: &str) -> Result<()> {
        info!(%unit, "stopping service");
        execute(Command::new(SYSTEMCTL).args(["stop", unit])).await?;
        Ok(())
    }

    async fn start(&self, unit: &str) -> Result<()> {
        info!(%unit, "starting service");
        execute(Command::new(SYSTEMCTL).args(["start", unit])).await?;
        Ok(())
    }
}
