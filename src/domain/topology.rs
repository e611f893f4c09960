//! Pool Topology Model
//!
//! Value objects for ZFS pool layouts: vdev kinds, redundancy groups, and the
//! full `PoolPlan` submitted to the storage engine. The plan is built
//! field-by-field, validated as a whole, and only then rendered into a single
//! `zpool create` argument sequence; a plan is never partially submitted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::device::BlockDevice;
use crate::error::{Error, Result};

// =============================================================================
// Vdev Kinds
// =============================================================================

/// Redundancy scheme of a vdev group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VdevKind {
    /// No redundancy; devices are striped directly into the pool
    Stripe,
    /// N-way mirror
    Mirror,
    /// Single-parity raidz
    Raidz,
    /// Double-parity raidz
    Raidz2,
    /// Triple-parity raidz
    Raidz3,
}

impl VdevKind {
    /// Minimum member count the storage engine accepts for this kind.
    pub fn min_members(&self) -> usize {
        match self {
            VdevKind::Stripe => 1,
            VdevKind::Mirror => 2,
            VdevKind::Raidz => 3,
            VdevKind::Raidz2 => 4,
            VdevKind::Raidz3 => 5,
        }
    }

    /// Keyword preceding the member devices in the creation grammar.
    /// Stripe has no keyword: bare devices are striped implicitly.
    pub fn keyword(&self) -> Option<&'static str> {
        match self {
            VdevKind::Stripe => None,
            VdevKind::Mirror => Some("mirror"),
            VdevKind::Raidz => Some("raidz"),
            VdevKind::Raidz2 => Some("raidz2"),
            VdevKind::Raidz3 => Some("raidz3"),
        }
    }
}

impl std::fmt::Display for VdevKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VdevKind::Stripe => write!(f, "stripe"),
            VdevKind::Mirror => write!(f, "mirror"),
            VdevKind::Raidz => write!(f, "raidz"),
            VdevKind::Raidz2 => write!(f, "raidz2"),
            VdevKind::Raidz3 => write!(f, "raidz3"),
        }
    }
}

impl std::str::FromStr for VdevKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "stripe" => Ok(VdevKind::Stripe),
            "mirror" => Ok(VdevKind::Mirror),
            "raidz" | "raidz1" => Ok(VdevKind::Raidz),
            "raidz2" => Ok(VdevKind::Raidz2),
            "raidz3" => Ok(VdevKind::Raidz3),
            other => Err(Error::Parse {
                what: "vdev kind".to_string(),
                detail: format!(
                    "'{}' is not one of stripe, mirror, raidz, raidz2, raidz3",
                    other
                ),
            }),
        }
    }
}

// =============================================================================
// Vdev Group
// =============================================================================

/// One redundancy unit within a pool: a kind plus its member devices.
///
/// Member order is irrelevant to the storage engine but preserved for
/// display and for deterministic rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VdevGroup {
    pub kind: VdevKind,
    pub members: Vec<BlockDevice>,
}

impl VdevGroup {
    /// Build a group, enforcing the per-kind minimum member count.
    pub fn new(kind: VdevKind, members: Vec<BlockDevice>) -> Result<Self> {
        let required = kind.min_members();
        if members.len() < required {
            return Err(Error::TooFewDevices {
                kind,
                required,
                supplied: members.len(),
            });
        }
        Ok(Self { kind, members })
    }
}

impl std::fmt::Display for VdevGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<&str> = self.members.iter().map(|d| d.id.as_str()).collect();
        write!(f, "{} [{}]", self.kind, ids.join(", "))
    }
}

// =============================================================================
// Mirror Group Partitioning
// =============================================================================

/// How to handle a device count that does not divide evenly into mirror
/// groups of the requested size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum UnevenPolicy {
    /// The trailing group keeps the remainder. A single leftover device is
    /// merged into the previous group so no group falls below the mirror
    /// minimum of 2.
    #[default]
    Fold,
    /// Refuse the split and ask the operator to change the group size.
    Reject,
}

impl std::fmt::Display for UnevenPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnevenPolicy::Fold => write!(f, "fold"),
            UnevenPolicy::Reject => write!(f, "reject"),
        }
    }
}

/// Split an ordered device list into consecutive mirror groups of
/// `group_size` for the multi-mirror topology.
///
/// Uneven counts are an explicit operator choice, never silent truncation:
/// under [`UnevenPolicy::Fold`] the remainder stays in play (trailing group
/// of `remainder` devices, or folded into the previous group when the
/// remainder is a lone device); under [`UnevenPolicy::Reject`] the split
/// fails with a validation error.
pub fn partition_into_mirror_groups(
    devices: Vec<BlockDevice>,
    group_size: usize,
    policy: UnevenPolicy,
) -> Result<Vec<VdevGroup>> {
    if group_size < VdevKind::Mirror.min_members() {
        return Err(Error::InvalidMirrorGroupSize { size: group_size });
    }
    let device_count = devices.len();
    if device_count < group_size {
        return Err(Error::TooFewDevices {
            kind: VdevKind::Mirror,
            required: group_size,
            supplied: device_count,
        });
    }
    let remainder = device_count % group_size;
    if remainder != 0 && policy == UnevenPolicy::Reject {
        return Err(Error::UnevenMirrorGroups {
            device_count,
            group_size,
        });
    }

    let mut groups: Vec<Vec<BlockDevice>> = Vec::with_capacity(device_count / group_size + 1);
    let mut remaining = devices.into_iter().peekable();
    while remaining.peek().is_some() {
        groups.push(remaining.by_ref().take(group_size).collect());
    }
    // Fold a lone trailing device into the previous group; mirror groups of
    // one are not valid and the device must not be dropped.
    if groups.len() > 1 && groups.last().map(Vec::len) == Some(1) {
        let lone = groups.pop().unwrap().pop().unwrap();
        groups.last_mut().unwrap().push(lone);
    }

    groups
        .into_iter()
        .map(|members| VdevGroup::new(VdevKind::Mirror, members))
        .collect()
}

// =============================================================================
// Pool Plan
// =============================================================================

/// The complete topology submitted to the storage engine in one creation
/// call: data vdevs plus optional cache, log, and spare devices, and opaque
/// `key=value` tuning options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolPlan {
    pub name: String,
    pub data_vdevs: Vec<VdevGroup>,
    pub cache_devices: Vec<BlockDevice>,
    pub log_devices: Vec<BlockDevice>,
    pub spare_devices: Vec<BlockDevice>,
    /// Engine-level tuning flags (ashift, compression, ...). Passed through
    /// unchanged; only `key=value` shape is validated.
    pub options: BTreeMap<String, String>,
}

impl PoolPlan {
    /// Assemble and validate a full plan.
    ///
    /// Validation order is fixed and short-circuits on the first failure:
    /// name collision, then per-group minimum member counts, then cross-role
    /// device reuse, then option well-formedness. Every failure names the
    /// offending pool, group, or device.
    pub fn assemble(
        name: impl Into<String>,
        existing_pools: &[String],
        data_vdevs: Vec<VdevGroup>,
        cache_devices: Vec<BlockDevice>,
        log_devices: Vec<BlockDevice>,
        spare_devices: Vec<BlockDevice>,
        raw_options: &[String],
    ) -> Result<Self> {
        let name = name.into();

        if existing_pools.iter().any(|p| p == &name) {
            return Err(Error::PoolNameTaken { name });
        }
        if data_vdevs.is_empty() {
            return Err(Error::EmptyPlan { name });
        }
        for group in &data_vdevs {
            let required = group.kind.min_members();
            if group.members.len() < required {
                return Err(Error::TooFewDevices {
                    kind: group.kind,
                    required,
                    supplied: group.members.len(),
                });
            }
        }

        Self::check_role_disjointness(&data_vdevs, &cache_devices, &log_devices, &spare_devices)?;

        let mut options = BTreeMap::new();
        for raw in raw_options {
            match raw.split_once('=') {
                Some((key, value)) if !key.is_empty() && !value.is_empty() => {
                    options.insert(key.to_string(), value.to_string());
                }
                _ => {
                    return Err(Error::MalformedOption {
                        option: raw.clone(),
                    });
                }
            }
        }

        Ok(Self {
            name,
            data_vdevs,
            cache_devices,
            log_devices,
            spare_devices,
            options,
        })
    }

    /// Reject any device that appears in more than one role across the plan.
    fn check_role_disjointness(
        data_vdevs: &[VdevGroup],
        cache: &[BlockDevice],
        log: &[BlockDevice],
        spare: &[BlockDevice],
    ) -> Result<()> {
        let mut claimed: BTreeMap<std::path::PathBuf, String> = BTreeMap::new();
        let mut claim = |device: &BlockDevice, role: String| -> Result<()> {
            if let Some(first) = claimed.get(&device.canonical_path) {
                return Err(Error::DeviceRoleConflict {
                    device: device.id.clone(),
                    first: first.clone(),
                    second: role,
                });
            }
            claimed.insert(device.canonical_path.clone(), role);
            Ok(())
        };

        for (i, group) in data_vdevs.iter().enumerate() {
            for device in &group.members {
                claim(device, format!("data vdev #{} ({})", i + 1, group.kind))?;
            }
        }
        for device in cache {
            claim(device, "cache".to_string())?;
        }
        for device in log {
            claim(device, "log".to_string())?;
        }
        for device in spare {
            claim(device, "spare".to_string())?;
        }
        Ok(())
    }

    /// Every device referenced by the plan, in render order.
    pub fn all_devices(&self) -> Vec<&BlockDevice> {
        self.data_vdevs
            .iter()
            .flat_map(|g| g.members.iter())
            .chain(self.cache_devices.iter())
            .chain(self.log_devices.iter())
            .chain(self.spare_devices.iter())
            .collect()
    }

    /// Render the plan into the argument sequence for a single `zpool create`
    /// invocation.
    ///
    /// The ordering is a contract with the engine's argument grammar and is
    /// preserved exactly: options, data vdevs (kind keyword first, omitted
    /// for stripe), `cache` devices, `log` devices (with a `mirror` keyword
    /// when more than one log device is given), then `spare` devices.
    pub fn render_create_args(&self) -> Vec<String> {
        let mut args = vec!["create".to_string()];
        for (key, value) in &self.options {
            args.push("-o".to_string());
            args.push(format!("{}={}", key, value));
        }
        args.push(self.name.clone());
        for group in &self.data_vdevs {
            if let Some(keyword) = group.kind.keyword() {
                args.push(keyword.to_string());
            }
            for device in &group.members {
                args.push(device.canonical_path.display().to_string());
            }
        }
        if !self.cache_devices.is_empty() {
            args.push("cache".to_string());
            for device in &self.cache_devices {
                args.push(device.canonical_path.display().to_string());
            }
        }
        if !self.log_devices.is_empty() {
            args.push("log".to_string());
            if self.log_devices.len() > 1 {
                args.push("mirror".to_string());
            }
            for device in &self.log_devices {
                args.push(device.canonical_path.display().to_string());
            }
        }
        if !self.spare_devices.is_empty() {
            args.push("spare".to_string());
            for device in &self.spare_devices {
                args.push(device.canonical_path.display().to_string());
            }
        }
        args
    }
}

impl std::fmt::Display for PoolPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "pool '{}':", self.name)?;
        for group in &self.data_vdevs {
            write!(f, " {}", group)?;
        }
        Ok(())
    }
}
