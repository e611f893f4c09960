//! Archive Store Adapter
//!
//! Implements [`ArchiveStore`] over `tar` and the sink filesystem. Archives
//! are written with paths relative to `/` and permissions preserved, so a
//! restore can extract them straight back over the live tree.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::process::Command;
use tracing::debug;

use crate::adapters::execute::execute;
use crate::domain::backup::BACKUP_DIR_NAME;
use crate::domain::ports::{ArchiveEntry, ArchiveStore};
use crate::error::Result;

const TAR: &str = "tar";

/// Production archive store shelling out to `tar`.
#[derive(Default)]
pub struct TarArchiveStore;

impl TarArchiveStore {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ArchiveStore for TarArchiveStore {
    async fn create_archive(&self, archive_path: &Path, sources: &[PathBuf]) -> Result<()> {
        if let Some(parent) = archive_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut cmd = Command::new(TAR);
        cmd.args(["--gzip", "--create", "--preserve-permissions", "--file"])
            .arg(archive_path)
            .args(["--directory", "/"]);
        // Archive members are stored relative to / so extraction lands in
        // place without a strip-components dance.
        for source in sources {
            let relative = source.strip_prefix("/").unwrap_or(source);
            cmd.arg(relative);
        }
        execute(&mut cmd).await?;
        Ok(())
    }

    async fn extract_archive(&self, archive_path: &Path) -> Result<()> {
        execute(
            Command::new(TAR)
                .args([
                    "--gzip",
                    "--extract",
                    "--preserve-permissions",
                    "--same-owner",
                    "--overwrite",
                    "--file",
                ])
                .arg(archive_path)
                .args(["--directory", "/"]),
        )
        .await?;
        Ok(())
    }

    async fn list_entries(&self, sink_mountpoint: &Path) -> Result<Vec<ArchiveEntry>> {
        let backups_dir = sink_mountpoint.join(BACKUP_DIR_NAME);
        let mut entries = Vec::new();
        let mut dir = match tokio::fs::read_dir(&backups_dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(dir = %backups_dir.display(), "no backup directory yet");
                return Ok(entries);
            }
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = dir.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_dir() {
                continue;
            }
            let modified: DateTime<Utc> = metadata.modified()?.into();
            entries.push(ArchiveEntry {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                modified,
            });
        }
        Ok(entries)
    }

    async fn remove_entry(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_dir_all(path).await?;
        Ok(())
    }
}
