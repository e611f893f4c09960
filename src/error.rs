//! Error types for the Incus Storage Manager

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Incus Storage Manager
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Validation Errors (always raised before any external command runs)
    // =========================================================================
    /// Pool name collides with an existing pool
    #[error("pool '{name}' already exists")]
    PoolNameTaken { name: String },

    /// Vdev group has fewer members than its kind requires
    #[error("{kind} requires at least {required} disks, got {supplied}")]
    TooFewDevices {
        kind: crate::domain::VdevKind,
        required: usize,
        supplied: usize,
    },

    /// A device was assigned to more than one role in the same plan
    #[error("device '{device}' assigned to both {first} and {second}")]
    DeviceRoleConflict {
        device: String,
        first: String,
        second: String,
    },

    /// Pool option is not a key=value pair
    #[error("malformed pool option '{option}', expected key=value")]
    MalformedOption { option: String },

    /// Mirror group size below the mirror minimum
    #[error("mirror group size must be at least 2, got {size}")]
    InvalidMirrorGroupSize { size: usize },

    /// Uneven device count rejected by the strict partition policy
    #[error(
        "{device_count} devices do not divide into mirror groups of {group_size}; \
         change the group size or use the fold policy"
    )]
    UnevenMirrorGroups {
        device_count: usize,
        group_size: usize,
    },

    /// A plan must contain at least one data vdev
    #[error("pool plan for '{name}' has no data vdevs")]
    EmptyPlan { name: String },

    // =========================================================================
    // External Command Errors (surfaced verbatim, never retried)
    // =========================================================================
    /// An external binary returned a non-zero status
    #[error("command '{program}' failed with status {status}: {stderr}")]
    CommandFailed {
        program: String,
        status: String,
        stderr: String,
    },

    /// An external binary could not be spawned at all
    #[error("failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    // =========================================================================
    // Not-Found Errors
    // =========================================================================
    /// Referenced pool does not exist
    #[error("pool '{name}' not found")]
    PoolNotFound { name: String },

    /// Referenced block device does not exist
    #[error("device '{id}' not found under /dev/disk/by-id or /dev")]
    DeviceNotFound { id: String },

    /// Referenced backup does not exist
    #[error("backup '{timestamp}' not found under {mountpoint}")]
    BackupNotFound {
        timestamp: String,
        mountpoint: String,
    },

    // =========================================================================
    // Infrastructure Errors
    // =========================================================================
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Output of an external command could not be parsed
    #[error("failed to parse {what}: {detail}")]
    Parse { what: String, detail: String },
}

impl Error {
    /// True for errors caught during plan validation, before any external call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::PoolNameTaken { .. }
                | Error::TooFewDevices { .. }
                | Error::DeviceRoleConflict { .. }
                | Error::MalformedOption { .. }
                | Error::InvalidMirrorGroupSize { .. }
                | Error::UnevenMirrorGroups { .. }
                | Error::EmptyPlan { .. }
        )
    }
}
