//! Pool Topology Planner
//!
//! Turns a fully-formed, non-interactive creation request into one validated
//! [`PoolPlan`] and submits it to the pool engine as a single invocation.
//! All validation happens before any engine call; a plan that fails
//! validation is never partially submitted, and an engine failure discards
//! the plan without retry.

use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::device::BlockDevice;
use crate::domain::ports::{DeviceEnumerator, PoolEngine, PoolStatus};
use crate::domain::topology::{
    partition_into_mirror_groups, PoolPlan, UnevenPolicy, VdevGroup, VdevKind,
};
use crate::error::Result;

// =============================================================================
// Creation Request
// =============================================================================

/// One data-vdev specification: a kind plus operator-supplied device ids.
#[derive(Debug, Clone)]
pub struct VdevSpec {
    pub kind: VdevKind,
    pub device_ids: Vec<String>,
}

/// A complete, non-interactive pool creation request. The interactive
/// wizards of the original tooling are a presentation concern layered on
/// top of this struct, not part of the planner.
#[derive(Debug, Clone, Default)]
pub struct PoolCreateRequest {
    pub name: String,
    /// Explicit vdev groups.
    pub vdevs: Vec<VdevSpec>,
    /// Alternative to `vdevs`: partition `mirror_devices` into consecutive
    /// mirror groups of `mirror_size`.
    pub mirror_size: Option<usize>,
    pub mirror_devices: Vec<String>,
    pub uneven_policy: UnevenPolicy,
    pub cache_devices: Vec<String>,
    pub log_devices: Vec<String>,
    pub spare_devices: Vec<String>,
    /// Raw `key=value` engine options, validated for shape only.
    pub options: Vec<String>,
}

// =============================================================================
// Planner
// =============================================================================

/// Orchestrates device resolution, plan assembly, and submission.
pub struct PoolPlanner {
    devices: Arc<dyn DeviceEnumerator>,
    engine: Arc<dyn PoolEngine>,
}

impl PoolPlanner {
    pub fn new(devices: Arc<dyn DeviceEnumerator>, engine: Arc<dyn PoolEngine>) -> Self {
        Self { devices, engine }
    }

    /// Enumerate candidate devices, deduplicated by canonical path.
    pub async fn list_devices(&self) -> Result<Vec<BlockDevice>> {
        self.devices.enumerate().await
    }

    /// Assemble and validate the plan for a request without submitting it.
    pub async fn plan(&self, request: &PoolCreateRequest) -> Result<PoolPlan> {
        let existing = self.engine.list_pools().await?;

        let mut data_vdevs = Vec::new();
        for spec in &request.vdevs {
            let members = self.resolve_all(&spec.device_ids).await?;
            data_vdevs.push(VdevGroup::new(spec.kind, members)?);
        }
        if let Some(group_size) = request.mirror_size {
            let members = self.resolve_all(&request.mirror_devices).await?;
            data_vdevs.extend(partition_into_mirror_groups(
                members,
                group_size,
                request.uneven_policy,
            )?);
        }

        let cache = self.resolve_all(&request.cache_devices).await?;
        let log = self.resolve_all(&request.log_devices).await?;
        let spare = self.resolve_all(&request.spare_devices).await?;

        let plan = PoolPlan::assemble(
            request.name.clone(),
            &existing,
            data_vdevs,
            cache,
            log,
            spare,
            &request.options,
        )?;

        // Existing usage warns but never blocks; choosing a busy disk is the
        // operator's call.
        for device in plan.all_devices() {
            if !device.is_unused() {
                warn!(device = %device.id, usage = %device.usage_summary(), "device is in use");
            }
        }

        Ok(plan)
    }

    /// Validate and submit a creation request as one engine invocation.
    pub async fn create(&self, request: &PoolCreateRequest) -> Result<PoolPlan> {
        let plan = self.plan(request).await?;
        self.engine.create(&plan).await?;
        info!(pool = %plan.name, "pool created");
        Ok(plan)
    }

    pub async fn status(&self, name: &str) -> Result<PoolStatus> {
        self.engine.status(name).await
    }

    pub async fn list_pools(&self) -> Result<Vec<String>> {
        self.engine.list_pools().await
    }

    pub async fn destroy(&self, name: &str) -> Result<()> {
        self.engine.destroy(name).await
    }

    pub async fn export(&self, name: &str) -> Result<()> {
        self.engine.export(name).await
    }

    pub async fn import(&self, name: &str) -> Result<()> {
        self.engine.import(name).await
    }

    pub async fn scrub(&self, name: &str) -> Result<()> {
        self.engine.scrub(name).await
    }

    /// Attach a new vdev group to an existing pool.
    pub async fn add_vdev(&self, name: &str, spec: &VdevSpec) -> Result<()> {
        let members = self.resolve_all(&spec.device_ids).await?;
        let group = VdevGroup::new(spec.kind, members)?;
        self.engine.add_vdev(name, &group).await
    }

    /// Detach one device from an existing pool.
    pub async fn remove_device(&self, name: &str, device_id: &str) -> Result<()> {
        let device = self.devices.resolve(device_id).await?;
        self.engine.remove_device(name, &device.canonical_path).await
    }

    async fn resolve_all(&self, ids: &[String]) -> Result<Vec<BlockDevice>> {
        let mut devices = Vec::with_capacity(ids.len());
        for id in ids {
            devices.push(self.devices.resolve(id).await?);
        }
        Ok(devices)
    }
}
