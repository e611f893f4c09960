//! Pool Engine Adapter
//!
//! Implements [`PoolEngine`] over the `zpool` binary. Each operation is a
//! single invocation; the adapter never retries, and engine failures carry
//! the full command line and stderr back to the caller.

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use crate::adapters::execute::{execute, execute_stdout};
use crate::domain::ports::{PoolEngine, PoolHealth, PoolStatus};
use crate::domain::topology::{PoolPlan, VdevGroup};
use crate::error::{Error, Result};

const ZPOOL: &str = "zpool";

/// Production pool engine shelling out to `zpool`.
#[derive(Default)]
pub struct ZpoolCli;

impl ZpoolCli {
    pub fn new() -> Self {
        Self
    }
}

fn parse_health(s: &str) -> Result<PoolHealth> {
    match s {
        "ONLINE" => Ok(PoolHealth::Online),
        "DEGRADED" => Ok(PoolHealth::Degraded),
        "FAULTED" => Ok(PoolHealth::Faulted),
        "OFFLINE" => Ok(PoolHealth::Offline),
        "REMOVED" => Ok(PoolHealth::Removed),
        "UNAVAIL" => Ok(PoolHealth::Unavail),
        other => Err(Error::Parse {
            what: "zpool health".to_string(),
            detail: format!("unrecognized health '{}'", other),
        }),
    }
}

/// Parse one line of `zpool list -Hpo name,size,allocated,free,health`.
fn parse_status_line(line: &str) -> Result<PoolStatus> {
    let expected = |field: &str| Error::Parse {
        what: "zpool list output".to_string(),
        detail: format!("missing '{}' column", field),
    };
    let numeric = |field: &str, value: &str| -> Result<u64> {
        value.parse().map_err(|_| Error::Parse {
            what: "zpool list output".to_string(),
            detail: format!("non-numeric '{}' column: {}", field, value),
        })
    };

    let mut columns = line.split_whitespace();
    let name = columns.next().ok_or_else(|| expected("name"))?.to_string();
    let size_bytes = numeric("size", columns.next().ok_or_else(|| expected("size"))?)?;
    let allocated_bytes =
        numeric("allocated", columns.next().ok_or_else(|| expected("allocated"))?)?;
    let free_bytes = numeric("free", columns.next().ok_or_else(|| expected("free"))?)?;
    let health = parse_health(columns.next().ok_or_else(|| expected("health"))?)?;

    Ok(PoolStatus {
        name,
        size_bytes,
        allocated_bytes,
        free_bytes,
        health,
    })
}

#[async_trait]
impl PoolEngine for ZpoolCli {
    async fn list_pools(&self) -> Result<Vec<String>> {
        let stdout =
            execute_stdout(Command::new(ZPOOL).args(["list", "-Hpo", "name"])).await?;
        Ok(stdout.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
    }

    async fn create(&self, plan: &PoolPlan) -> Result<()> {
        let args = plan.render_create_args();
        info!(pool = %plan.name, "creating pool: zpool {}", args.join(" "));
        execute(Command::new(ZPOOL).args(&args)).await?;
        Ok(())
    }

    async fn status(&self, name: &str) -> Result<PoolStatus> {
        let result = execute_stdout(Command::new(ZPOOL).args([
            "list",
            "-Hpo",
            "name,size,allocated,free,health",
            name,
        ]))
        .await;
        match result {
            Ok(stdout) => parse_status_line(stdout.trim()),
            Err(Error::CommandFailed { stderr, .. }) if stderr.contains("no such pool") => {
                Err(Error::PoolNotFound {
                    name: name.to_string(),
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn destroy(&self, name: &str) -> Result<()> {
        execute(Command::new(ZPOOL).args(["destroy", name])).await?;
        Ok(())
    }

    async fn export(&self, name: &str) -> Result<()> {
        execute(Command::new(ZPOOL).args(["export", name])).await?;
        Ok(())
    }

    async fn import(&self, name: &str) -> Result<()> {
        execute(Command::new(ZPOOL).args(["import", name])).await?;
        Ok(())
    }

    async fn scrub(&self, name: &str) -> Result<()> {
        execute(Command::new(ZPOOL).args(["scrub", name])).await?;
        Ok(())
    }

    async fn add_vdev(&self, name: &str, group: &VdevGroup) -> Result<()> {
        let mut args = vec!["add".to_string(), name.to_string()];
        if let Some(keyword) = group.kind.keyword() {
            args.push(keyword.to_string());
        }
        for device in &group.members {
            args.push(device.canonical_path.display().to_string());
        }
        info!(pool = %name, "adding vdev: zpool {}", args.join(" "));
        execute(Command::new(ZPOOL).args(&args)).await?;
        Ok(())
    }

    async fn remove_device(&self, name: &str, device: &Path) -> Result<()> {
        execute(Command::new(ZPOOL).args(["remove", name]).arg(device)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn status_line_parses_all_columns() {
        let status =
            parse_status_line("tank\t3985729650688\t1024\t3985729649664\tONLINE").unwrap();
        assert_eq!(status.name, "tank");
        assert_eq!(status.size_bytes, 3985729650688);
        assert_eq!(status.allocated_bytes, 1024);
        assert_eq!(status.health, PoolHealth::Online);
    }

    #[test]
    fn degraded_and_unavail_health_values_parse() {
        assert_eq!(parse_health("DEGRADED").unwrap(), PoolHealth::Degraded);
        assert_eq!(parse_health("UNAVAIL").unwrap(), PoolHealth::Unavail);
    }

    #[test]
    fn missing_column_names_the_field() {
        let err = parse_status_line("tank 1024").unwrap_err();
        assert_matches!(err, Error::Parse { detail, .. } if detail.contains("allocated"));
    }

    #[test]
    fn garbage_health_is_a_parse_error() {
        assert_matches!(parse_health("SHINY"), Err(Error::Parse { .. }));
    }
}
