//! Backup Retention Manager Integration Tests
//!
//! Exercises the backup cycle ordering, the unconditional service-resume
//! contract, listing, restore selection, and the two independent retention
//! pruning passes, all over in-memory ports sharing one event log.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};

use incus_storage::backup::{BackupConfig, BackupManager, RestoreSelector};
use incus_storage::domain::ports::{
    ArchiveEntry, ArchiveStore, ServiceController, SnapshotEngine,
};
use incus_storage::error::{Error, Result};

// =============================================================================
// Shared Event Log
// =============================================================================

type EventLog = Arc<Mutex<Vec<String>>>;

fn log(events: &EventLog, event: impl Into<String>) {
    events.lock().unwrap().push(event.into());
}

// =============================================================================
// Mock Ports
// =============================================================================

struct MockService {
    events: EventLog,
    fail_stop: bool,
    fail_start: bool,
}

#[async_trait]
impl ServiceController for MockService {
    async fn stop(&self, unit: &str) -> Result<()> {
        log(&self.events, format!("stop {unit}"));
        if self.fail_stop {
            return Err(Error::CommandFailed {
                program: format!("systemctl stop {unit}"),
                status: "exit status: 1".to_string(),
                stderr: "unit busy".to_string(),
            });
        }
        Ok(())
    }

    async fn start(&self, unit: &str) -> Result<()> {
        log(&self.events, format!("start {unit}"));
        if self.fail_start {
            return Err(Error::CommandFailed {
                program: format!("systemctl start {unit}"),
                status: "exit status: 1".to_string(),
                stderr: "unit wedged".to_string(),
            });
        }
        Ok(())
    }
}

struct MockSnapshots {
    events: EventLog,
    existing: Mutex<Vec<String>>,
    fail_create: bool,
}

#[async_trait]
impl SnapshotEngine for MockSnapshots {
    async fn create_snapshot(&self, name: &str) -> Result<()> {
        log(&self.events, format!("snapshot {name}"));
        if self.fail_create {
            return Err(Error::CommandFailed {
                program: format!("zfs snapshot {name}"),
                status: "exit status: 1".to_string(),
                stderr: "out of space".to_string(),
            });
        }
        self.existing.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn list_snapshots(&self, _pool: &str, _dataset: &str) -> Result<Vec<String>> {
        Ok(self.existing.lock().unwrap().clone())
    }

    async fn destroy_snapshot(&self, name: &str) -> Result<()> {
        log(&self.events, format!("destroy {name}"));
        self.existing.lock().unwrap().retain(|s| s != name);
        Ok(())
    }
}

struct MockArchives {
    events: EventLog,
    entries: Mutex<Vec<ArchiveEntry>>,
    fail_create: bool,
    fail_remove: bool,
}

impl MockArchives {
    fn new(events: EventLog) -> Self {
        Self {
            events,
            entries: Mutex::new(Vec::new()),
            fail_create: false,
            fail_remove: false,
        }
    }

    fn seed_entry(&self, name: &str, modified: DateTime<Utc>) {
        self.entries.lock().unwrap().push(ArchiveEntry {
            name: name.to_string(),
            path: PathBuf::from("/tank/incus-backups").join(name),
            modified,
        });
    }

    fn entry_names(&self) -> Vec<String> {
        self.entries.lock().unwrap().iter().map(|e| e.name.clone()).collect()
    }
}

#[async_trait]
impl ArchiveStore for MockArchives {
    async fn create_archive(&self, archive_path: &Path, _sources: &[PathBuf]) -> Result<()> {
        log(&self.events, format!("archive {}", archive_path.display()));
        if self.fail_create {
            return Err(Error::CommandFailed {
                program: "tar".to_string(),
                status: "exit status: 2".to_string(),
                stderr: "no space left on device".to_string(),
            });
        }
        let dir = archive_path.parent().unwrap();
        self.entries.lock().unwrap().push(ArchiveEntry {
            name: dir.file_name().unwrap().to_string_lossy().into_owned(),
            path: dir.to_path_buf(),
            modified: Utc::now(),
        });
        Ok(())
    }

    async fn extract_archive(&self, archive_path: &Path) -> Result<()> {
        log(&self.events, format!("extract {}", archive_path.display()));
        Ok(())
    }

    async fn list_entries(&self, _sink_mountpoint: &Path) -> Result<Vec<ArchiveEntry>> {
        Ok(self.entries.lock().unwrap().clone())
    }

    async fn remove_entry(&self, path: &Path) -> Result<()> {
        log(&self.events, format!("remove {}", path.display()));
        if self.fail_remove {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                "immutable",
            )));
        }
        self.entries.lock().unwrap().retain(|e| e.path != path);
        Ok(())
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    events: EventLog,
    snapshots: Arc<MockSnapshots>,
    archives: Arc<MockArchives>,
    manager: BackupManager,
}

fn harness(configure: impl FnOnce(&mut MockService, &mut MockSnapshots, &mut MockArchives)) -> Harness {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let mut service = MockService {
        events: events.clone(),
        fail_stop: false,
        fail_start: false,
    };
    let mut snapshots = MockSnapshots {
        events: events.clone(),
        existing: Mutex::new(Vec::new()),
        fail_create: false,
    };
    let mut archives = MockArchives::new(events.clone());
    configure(&mut service, &mut snapshots, &mut archives);

    let service = Arc::new(service);
    let snapshots = Arc::new(snapshots);
    let archives = Arc::new(archives);
    let manager = BackupManager::new(
        BackupConfig::default(),
        snapshots.clone(),
        archives.clone(),
        service,
    );
    Harness {
        events,
        snapshots,
        archives,
        manager,
    }
}

fn events_of(h: &Harness) -> Vec<String> {
    h.events.lock().unwrap().clone()
}

fn at(y: i32, mo: u32, d: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, 12, 0, 0).unwrap()
}

// =============================================================================
// Backup Cycle
// =============================================================================

mod cycle {
    use super::*;

    #[tokio::test]
    async fn full_cycle_orders_stop_archive_snapshot_start() {
        let h = harness(|_, _, _| {});
        let now = at(2025, 3, 10);

        let record = h.manager.run_at(now).await.unwrap();
        assert_eq!(record.timestamp, "20250310-120000");
        assert_eq!(
            record.snapshot_name,
            "tank/incus@incus-backup-20250310-120000"
        );

        let events = events_of(&h);
        assert_eq!(events[0], "stop incus");
        assert!(events[1].starts_with("archive /tank/incus-backups/20250310-120000/"));
        assert_eq!(events[2], "snapshot tank/incus@incus-backup-20250310-120000");
        assert_eq!(events[3], "start incus");
    }

    #[tokio::test]
    async fn stop_failure_aborts_before_archiving() {
        let h = harness(|service, _, _| service.fail_stop = true);

        let err = h.manager.run_at(at(2025, 3, 10)).await.unwrap_err();
        assert_matches!(err, Error::CommandFailed { .. });

        let events = events_of(&h);
        assert_eq!(events, vec!["stop incus"]);
        assert!(h.archives.entry_names().is_empty());
    }

    #[tokio::test]
    async fn archive_failure_still_resumes_service_and_skips_snapshot() {
        let h = harness(|_, _, archives| archives.fail_create = true);

        let err = h.manager.run_at(at(2025, 3, 10)).await.unwrap_err();
        assert_matches!(err, Error::CommandFailed { stderr, .. }
            if stderr.contains("no space left"));

        let events = events_of(&h);
        assert_eq!(events[0], "stop incus");
        assert!(events[1].starts_with("archive "));
        // No snapshot after a failed archive; resume is the next event.
        assert_eq!(events[2], "start incus");
        assert!(h.snapshots.existing.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_failure_keeps_archive_and_resumes_service() {
        let h = harness(|_, snapshots, _| snapshots.fail_create = true);

        let err = h.manager.run_at(at(2025, 3, 10)).await.unwrap_err();
        assert_matches!(err, Error::CommandFailed { .. });

        let events = events_of(&h);
        assert!(events.iter().any(|e| e == "start incus"));
        // The finished archive is a valid backup and must not be deleted.
        assert_eq!(h.archives.entry_names(), vec!["20250310-120000"]);
    }

    #[tokio::test]
    async fn archive_and_resume_both_failing_surfaces_the_archive_error() {
        let h = harness(|service, _, archives| {
            archives.fail_create = true;
            service.fail_start = true;
        });

        // The archive failure is the primary error; the resume failure is
        // logged, not swallowed into the returned error.
        let err = h.manager.run_at(at(2025, 3, 10)).await.unwrap_err();
        assert_matches!(err, Error::CommandFailed { stderr, .. }
            if stderr.contains("no space left"));

        // Resume was still attempted even though it also failed.
        let events = events_of(&h);
        assert_eq!(events.last().unwrap(), "start incus");
    }

    #[tokio::test]
    async fn resume_failure_is_surfaced_after_a_good_backup() {
        let h = harness(|service, _, _| service.fail_start = true);

        let err = h.manager.run_at(at(2025, 3, 10)).await.unwrap_err();
        assert_matches!(err, Error::CommandFailed { stderr, .. } if stderr.contains("wedged"));
        // Archive and snapshot both completed before the resume failure.
        assert_eq!(h.archives.entry_names(), vec!["20250310-120000"]);
        assert_eq!(h.snapshots.existing.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn successful_cycle_prunes_expired_predecessors() {
        let h = harness(|_, _, _| {});
        let now = at(2025, 3, 10);
        h.archives.seed_entry("20250301-120000", now - Duration::days(9));
        h.archives.seed_entry("20250308-120000", now - Duration::days(2));

        h.manager.run_at(now).await.unwrap();

        let names = h.archives.entry_names();
        assert!(!names.contains(&"20250301-120000".to_string()));
        assert!(names.contains(&"20250308-120000".to_string()));
        assert!(names.contains(&"20250310-120000".to_string()));
    }
}

// =============================================================================
// Retention Pruning
// =============================================================================

mod retention {
    use super::*;

    #[tokio::test]
    async fn archive_pruning_is_strictly_older_than_window() {
        let h = harness(|_, _, _| {});
        let now = at(2025, 6, 1);
        for age in [3, 6, 7, 8, 100] {
            let created = now - Duration::days(age);
            h.archives
                .seed_entry(&created.format("%Y%m%d-%H%M%S").to_string(), created);
        }

        h.manager.prune_expired_at(now).await.unwrap();

        let mut names = h.archives.entry_names();
        names.sort();
        // Ages 3, 6, and 7 days survive; 8 and 100 are pruned.
        assert_eq!(
            names,
            vec!["20250525-120000", "20250526-120000", "20250529-120000"]
        );
    }

    #[tokio::test]
    async fn snapshot_pruning_parses_embedded_timestamps() {
        let h = harness(|_, _, _| {});
        let now = at(2025, 6, 1);
        {
            let mut existing = h.snapshots.existing.lock().unwrap();
            existing.push("tank/incus@incus-backup-20250520-120000".to_string()); // 12 days
            existing.push("tank/incus@incus-backup-20250530-120000".to_string()); // 2 days
        }

        h.manager.prune_expired_at(now).await.unwrap();

        assert_eq!(
            *h.snapshots.existing.lock().unwrap(),
            vec!["tank/incus@incus-backup-20250530-120000".to_string()]
        );
    }

    #[tokio::test]
    async fn malformed_and_foreign_snapshots_are_left_alone() {
        let h = harness(|_, _, _| {});
        {
            let mut existing = h.snapshots.existing.lock().unwrap();
            existing.push("tank/incus@incus-backup-not-a-timestamp".to_string());
            existing.push("tank/incus@manual-before-upgrade".to_string());
        }

        h.manager.prune_expired_at(at(2025, 6, 1)).await.unwrap();

        assert_eq!(h.snapshots.existing.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn stuck_archive_removal_does_not_block_snapshot_pruning() {
        let h = harness(|_, _, archives| archives.fail_remove = true);
        let now = at(2025, 6, 1);
        h.archives.seed_entry("20250501-120000", now - Duration::days(31));
        h.snapshots
            .existing
            .lock()
            .unwrap()
            .push("tank/incus@incus-backup-20250501-120000".to_string());

        h.manager.prune_expired_at(now).await.unwrap();

        // The directory is stuck but the snapshot pass still ran.
        assert_eq!(h.archives.entry_names(), vec!["20250501-120000"]);
        assert!(h.snapshots.existing.lock().unwrap().is_empty());
    }
}

// =============================================================================
// Listing and Restore
// =============================================================================

mod listing_and_restore {
    use super::*;

    #[tokio::test]
    async fn list_sorts_ascending_and_skips_non_backup_directories() {
        let h = harness(|_, _, _| {});
        let now = at(2025, 6, 1);
        h.archives.seed_entry("20250530-120000", now);
        h.archives.seed_entry("20250510-120000", now);
        h.archives.seed_entry("lost+found", now);

        let records = h.manager.list().await.unwrap();
        let timestamps: Vec<&str> = records.iter().map(|r| r.timestamp.as_str()).collect();
        assert_eq!(timestamps, vec!["20250510-120000", "20250530-120000"]);
    }

    #[tokio::test]
    async fn restore_latest_extracts_the_newest_archive() {
        let h = harness(|_, _, _| {});
        let now = at(2025, 6, 1);
        h.archives.seed_entry("20250510-120000", now);
        h.archives.seed_entry("20250530-120000", now);

        let record = h.manager.restore(&RestoreSelector::Latest).await.unwrap();
        assert_eq!(record.timestamp, "20250530-120000");

        let events = events_of(&h);
        assert_eq!(events[0], "stop incus");
        assert!(events[1].contains("incus-full-20250530-120000.tar.gz"));
        assert_eq!(events[2], "start incus");
    }

    #[tokio::test]
    async fn restore_by_timestamp_picks_the_exact_backup() {
        let h = harness(|_, _, _| {});
        let now = at(2025, 6, 1);
        h.archives.seed_entry("20250510-120000", now);
        h.archives.seed_entry("20250530-120000", now);

        let record = h
            .manager
            .restore(&RestoreSelector::from("20250510-120000"))
            .await
            .unwrap();
        assert_eq!(record.timestamp, "20250510-120000");
    }

    #[tokio::test]
    async fn restore_of_missing_backup_names_the_timestamp() {
        let h = harness(|_, _, _| {});

        let err = h
            .manager
            .restore(&RestoreSelector::from("20990101-000000"))
            .await
            .unwrap_err();
        assert_matches!(
            err,
            Error::BackupNotFound { timestamp, .. } if timestamp == "20990101-000000"
        );
        assert!(events_of(&h).is_empty(), "service must not be touched");
    }

    #[tokio::test]
    async fn restore_resumes_service_even_when_extraction_fails() {
        struct FailingExtract {
            inner: MockArchives,
        }

        #[async_trait]
        impl ArchiveStore for FailingExtract {
            async fn create_archive(&self, path: &Path, sources: &[PathBuf]) -> Result<()> {
                self.inner.create_archive(path, sources).await
            }

            async fn extract_archive(&self, path: &Path) -> Result<()> {
                self.inner.extract_archive(path).await?;
                Err(Error::CommandFailed {
                    program: "tar".to_string(),
                    status: "exit status: 2".to_string(),
                    stderr: "corrupt archive".to_string(),
                })
            }

            async fn list_entries(&self, mountpoint: &Path) -> Result<Vec<ArchiveEntry>> {
                self.inner.list_entries(mountpoint).await
            }

            async fn remove_entry(&self, path: &Path) -> Result<()> {
                self.inner.remove_entry(path).await
            }
        }

        let events: EventLog = Arc::new(Mutex::new(Vec::new()));
        let service = Arc::new(MockService {
            events: events.clone(),
            fail_stop: false,
            fail_start: false,
        });
        let snapshots = Arc::new(MockSnapshots {
            events: events.clone(),
            existing: Mutex::new(Vec::new()),
            fail_create: false,
        });
        let archives = FailingExtract {
            inner: MockArchives::new(events.clone()),
        };
        archives.inner.seed_entry("20250510-120000", at(2025, 6, 1));

        let manager = BackupManager::new(
            BackupConfig::default(),
            snapshots,
            Arc::new(archives),
            service,
        );

        let err = manager.restore(&RestoreSelector::Latest).await.unwrap_err();
        assert_matches!(err, Error::CommandFailed { stderr, .. } if stderr.contains("corrupt"));

        let events = events.lock().unwrap().clone();
        assert_eq!(events.last().unwrap(), "start incus");
    }
}
