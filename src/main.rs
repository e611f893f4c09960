//! Incus Storage Manager CLI
//!
//! Command-line front-end over the planner and backup manager. Every
//! workflow takes a fully-formed request from flags, with no interactive
//! prompts, and runs as a single sequence of blocking external commands.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{error, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use incus_storage::adapters::{
    LsblkEnumerator, SystemdController, TarArchiveStore, ZfsCli, ZpoolCli,
};
use incus_storage::backup::{BackupConfig, BackupManager, RestoreSelector};
use incus_storage::error::{Error, Result};
use incus_storage::planner::{PoolCreateRequest, PoolPlanner, VdevSpec};
use incus_storage::UnevenPolicy;

// =============================================================================
// CLI Arguments
// =============================================================================

/// Incus Storage Manager - ZFS pool planning and backup retention
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON", global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inspect candidate block devices
    Device {
        #[command(subcommand)]
        command: DeviceCommand,
    },
    /// Plan and manage ZFS pools
    Pool {
        #[command(subcommand)]
        command: PoolCommand,
    },
    /// Back up and restore the Incus data directory
    Backup {
        #[command(subcommand)]
        command: BackupCommand,
    },
}

#[derive(Subcommand, Debug)]
enum DeviceCommand {
    /// List whole-disk candidates, deduplicated by canonical path
    List {
        /// Include devices with detected existing usage
        #[arg(long)]
        all: bool,
        /// Emit the listing as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand, Debug)]
enum PoolCommand {
    /// Validate a topology and submit one zpool create invocation
    Create(CreateArgs),
    /// List imported pools
    List,
    /// Show status of one pool
    Status { name: String },
    /// Destroy a pool
    Destroy { name: String },
    /// Export a pool
    Export { name: String },
    /// Import a pool
    Import { name: String },
    /// Start a scrub
    Scrub { name: String },
    /// Attach an additional vdev group to a pool
    AddDevice {
        name: String,
        /// Vdev spec, KIND:dev[,dev...] (e.g. mirror:sdc,sdd)
        #[arg(long)]
        vdev: String,
    },
    /// Detach a device from a pool
    RemoveDevice { name: String, device: String },
}

#[derive(clap::Args, Debug)]
struct CreateArgs {
    /// Pool name; must not collide with an existing pool
    name: String,

    /// Data vdev spec, KIND:dev[,dev...]; repeat for multiple groups
    #[arg(long = "vdev")]
    vdevs: Vec<String>,

    /// Partition --devices into consecutive mirror groups of this size
    #[arg(long)]
    mirror_size: Option<usize>,

    /// Devices for --mirror-size partitioning
    #[arg(long, value_delimiter = ',')]
    devices: Vec<String>,

    /// How to handle a device count that does not divide evenly
    #[arg(long, value_enum, default_value_t = UnevenPolicy::Fold)]
    uneven_policy: UnevenPolicy,

    /// Cache (L2ARC) devices
    #[arg(long, value_delimiter = ',')]
    cache: Vec<String>,

    /// Log (SLOG) devices; two or more are mirrored
    #[arg(long, value_delimiter = ',')]
    log: Vec<String>,

    /// Hot spare devices
    #[arg(long, value_delimiter = ',')]
    spare: Vec<String>,

    /// Engine option as key=value (e.g. -o ashift=12); repeatable
    #[arg(short = 'o', long = "option")]
    options: Vec<String>,

    /// Print the rendered zpool create invocation without running it
    #[arg(long)]
    dry_run: bool,
}

#[derive(clap::Args, Debug, Clone)]
struct BackupTargetArgs {
    /// Mountpoint of the filesystem holding incus-backups/
    #[arg(long, env = "INCUS_BACKUP_MOUNTPOINT", default_value = "/tank")]
    mountpoint: PathBuf,

    /// Pool containing the Incus dataset
    #[arg(long, env = "INCUS_BACKUP_POOL", default_value = "tank")]
    pool: String,

    /// Dataset to snapshot, relative to the pool
    #[arg(long, env = "INCUS_BACKUP_DATASET", default_value = "incus")]
    dataset: String,

    /// Service unit quiesced around backup and restore
    #[arg(long, env = "INCUS_SERVICE_UNIT", default_value = "incus")]
    unit: String,
}

#[derive(Subcommand, Debug)]
enum BackupCommand {
    /// Run one backup cycle: stop, archive, snapshot, resume, prune
    Run {
        #[command(flatten)]
        target: BackupTargetArgs,

        /// Path archived into the tarball; repeatable
        #[arg(long = "source", default_values_os_t = vec![PathBuf::from("/var/lib/incus")])]
        sources: Vec<PathBuf>,

        /// Age in days past which archives and snapshots are pruned
        #[arg(long, default_value_t = 7)]
        retention_days: i64,
    },
    /// List backups, ascending by timestamp
    List {
        #[command(flatten)]
        target: BackupTargetArgs,

        /// Emit the listing as JSON
        #[arg(long)]
        json: bool,
    },
    /// Restore a backup archive over / (by timestamp, or 'latest')
    Restore {
        id: String,

        #[command(flatten)]
        target: BackupTargetArgs,
    },
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(&cli);

    if let Err(err) = run(cli).await {
        error!("{err}");
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Device { command } => run_device(command).await,
        Command::Pool { command } => run_pool(command).await,
        Command::Backup { command } => run_backup(command).await,
    }
}

fn planner() -> PoolPlanner {
    PoolPlanner::new(Arc::new(LsblkEnumerator::new()), Arc::new(ZpoolCli::new()))
}

fn backup_manager(target: &BackupTargetArgs, sources: Vec<PathBuf>, retention_days: i64) -> BackupManager {
    let config = BackupConfig {
        sink_mountpoint: target.mountpoint.clone(),
        pool: target.pool.clone(),
        dataset: target.dataset.clone(),
        source_paths: sources,
        retention_days,
        service_unit: target.unit.clone(),
    };
    BackupManager::new(
        config,
        Arc::new(ZfsCli::new()),
        Arc::new(TarArchiveStore::new()),
        Arc::new(SystemdController::new()),
    )
}

// =============================================================================
// Subcommand Handlers
// =============================================================================

async fn run_device(command: DeviceCommand) -> Result<()> {
    match command {
        DeviceCommand::List { all, json } => {
            let mut devices = planner().list_devices().await?;
            if !all {
                devices.retain(|d| d.is_unused());
            }
            if json {
                println!("{}", serde_json::to_string_pretty(&devices).map_err(to_parse_error)?);
                return Ok(());
            }
            for device in devices {
                let model = device.model.as_deref().unwrap_or("-");
                let usage = if device.is_unused() {
                    "unused".to_string()
                } else {
                    device.usage_summary()
                };
                println!(
                    "{:<40} {:>8.1} GiB  {:<24} {}",
                    device.id,
                    device.size_gib(),
                    model,
                    usage
                );
            }
            Ok(())
        }
    }
}

async fn run_pool(command: PoolCommand) -> Result<()> {
    let planner = planner();
    match command {
        PoolCommand::Create(args) => {
            let request = PoolCreateRequest {
                name: args.name,
                vdevs: args
                    .vdevs
                    .iter()
                    .map(|s| parse_vdev_spec(s))
                    .collect::<Result<Vec<_>>>()?,
                mirror_size: args.mirror_size,
                mirror_devices: args.devices,
                uneven_policy: args.uneven_policy,
                cache_devices: args.cache,
                log_devices: args.log,
                spare_devices: args.spare,
                options: args.options,
            };
            if args.dry_run {
                let plan = planner.plan(&request).await?;
                println!("zpool {}", plan.render_create_args().join(" "));
            } else {
                let plan = planner.create(&request).await?;
                println!("created {}", plan);
            }
            Ok(())
        }
        PoolCommand::List => {
            for name in planner.list_pools().await? {
                println!("{name}");
            }
            Ok(())
        }
        PoolCommand::Status { name } => {
            let status = planner.status(&name).await?;
            println!("pool:      {}", status.name);
            println!("health:    {}", status.health);
            println!("size:      {}", status.size_bytes);
            println!("allocated: {}", status.allocated_bytes);
            println!("free:      {}", status.free_bytes);
            Ok(())
        }
        PoolCommand::Destroy { name } => planner.destroy(&name).await,
        PoolCommand::Export { name } => planner.export(&name).await,
        PoolCommand::Import { name } => planner.import(&name).await,
        PoolCommand::Scrub { name } => planner.scrub(&name).await,
        PoolCommand::AddDevice { name, vdev } => {
            let spec = parse_vdev_spec(&vdev)?;
            planner.add_vdev(&name, &spec).await
        }
        PoolCommand::RemoveDevice { name, device } => {
            planner.remove_device(&name, &device).await
        }
    }
}

async fn run_backup(command: BackupCommand) -> Result<()> {
    match command {
        BackupCommand::Run {
            target,
            sources,
            retention_days,
        } => {
            let manager = backup_manager(&target, sources, retention_days);
            let record = manager.run().await?;
            println!("backup complete: {}", record.timestamp);
            println!("archive:  {}", record.archive_path.display());
            println!("snapshot: {}", record.snapshot_name);
            Ok(())
        }
        BackupCommand::List { target, json } => {
            let manager = backup_manager(&target, vec![], incus_storage::domain::DEFAULT_RETENTION_DAYS);
            let records = manager.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&records).map_err(to_parse_error)?);
                return Ok(());
            }
            for record in records {
                println!("{}  {}", record.timestamp, record.archive_path.display());
            }
            Ok(())
        }
        BackupCommand::Restore { id, target } => {
            let manager = backup_manager(&target, vec![], incus_storage::domain::DEFAULT_RETENTION_DAYS);
            let record = manager.restore(&RestoreSelector::from(id.as_str())).await?;
            println!("restored {}", record.timestamp);
            Ok(())
        }
    }
}

/// Parse `KIND:dev[,dev...]` into a vdev spec.
fn parse_vdev_spec(raw: &str) -> Result<VdevSpec> {
    let (kind, devices) = raw.split_once(':').ok_or_else(|| Error::Parse {
        what: "vdev spec".to_string(),
        detail: format!("'{}' is not of the form KIND:dev[,dev...]", raw),
    })?;
    Ok(VdevSpec {
        kind: kind.parse()?,
        device_ids: devices
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect(),
    })
}

fn to_parse_error(err: serde_json::Error) -> Error {
    Error::Parse {
        what: "JSON output".to_string(),
        detail: err.to_string(),
    }
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(cli: &Cli) {
    let level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());

    if cli.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }
}
