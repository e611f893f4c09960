//! Property-Based Tests for the Topology and Retention Logic
//!
//! Uses proptest to verify the partitioning, validation, and retention
//! invariants across a wide range of inputs.
//!
//! # Test Properties
//!
//! 1. **No device lost, no device invented**: partitioning preserves the
//!    device multiset and its order.
//! 2. **Mirror minimum**: every produced group has at least 2 members.
//! 3. **Render determinism**: identical plans render identical arguments.
//! 4. **Retention boundary**: expiry is strictly age > window.

#![cfg(test)]

use chrono::{Duration, TimeZone, Utc};
use proptest::prelude::*;

use super::backup::{format_timestamp, is_expired, parse_timestamp};
use super::device::BlockDevice;
use super::topology::{partition_into_mirror_groups, PoolPlan, UnevenPolicy, VdevGroup, VdevKind};

// =============================================================================
// Strategies
// =============================================================================

/// Strategy for device lists large enough to mirror at all.
fn device_list_strategy() -> impl Strategy<Value = Vec<BlockDevice>> {
    (2usize..=24).prop_map(|n| {
        (0..n)
            .map(|i| BlockDevice::new(format!("disk{}", i), format!("/dev/disk{}", i)))
            .collect()
    })
}

/// Strategy for (devices, group_size) pairs with a feasible group size.
fn partition_input_strategy() -> impl Strategy<Value = (Vec<BlockDevice>, usize)> {
    device_list_strategy().prop_flat_map(|devices| {
        let n = devices.len();
        (Just(devices), 2usize..=n)
    })
}

// =============================================================================
// Partitioning Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn fold_partition_preserves_devices_in_order((devices, group_size) in partition_input_strategy()) {
        let before: Vec<String> = devices.iter().map(|d| d.id.clone()).collect();
        let groups = partition_into_mirror_groups(devices, group_size, UnevenPolicy::Fold).unwrap();
        let after: Vec<String> = groups
            .iter()
            .flat_map(|g| g.members.iter().map(|d| d.id.clone()))
            .collect();
        prop_assert_eq!(before, after);
    }

    #[test]
    fn fold_partition_never_yields_undersized_group((devices, group_size) in partition_input_strategy()) {
        let groups = partition_into_mirror_groups(devices, group_size, UnevenPolicy::Fold).unwrap();
        for group in &groups {
            prop_assert!(group.members.len() >= VdevKind::Mirror.min_members());
            prop_assert_eq!(group.kind, VdevKind::Mirror);
        }
    }

    #[test]
    fn reject_partition_agrees_with_divisibility((devices, group_size) in partition_input_strategy()) {
        let even = devices.len() % group_size == 0;
        let result = partition_into_mirror_groups(devices, group_size, UnevenPolicy::Reject);
        prop_assert_eq!(result.is_ok(), even);
        if let Ok(groups) = result {
            prop_assert!(groups.iter().all(|g| g.members.len() == group_size));
        }
    }
}

// =============================================================================
// Plan Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn render_is_deterministic_for_any_partition((devices, group_size) in partition_input_strategy()) {
        let build = |devices: Vec<BlockDevice>| {
            let groups =
                partition_into_mirror_groups(devices, group_size, UnevenPolicy::Fold).unwrap();
            PoolPlan::assemble("tank", &[], groups, vec![], vec![], vec![], &[])
                .unwrap()
                .render_create_args()
        };
        prop_assert_eq!(build(devices.clone()), build(devices));
    }

    #[test]
    fn duplicate_device_across_roles_always_fails(n in 2usize..=8, dup_index in 0usize..8) {
        let devices: Vec<BlockDevice> = (0..n)
            .map(|i| BlockDevice::new(format!("disk{}", i), format!("/dev/disk{}", i)))
            .collect();
        let dup = devices[dup_index % n].clone();
        let group = VdevGroup::new(VdevKind::Stripe, devices).unwrap();
        let result = PoolPlan::assemble(
            "tank",
            &[],
            vec![group],
            vec![dup],
            vec![],
            vec![],
            &[],
        );
        let is_role_conflict = matches!(
            result,
            Err(crate::error::Error::DeviceRoleConflict { .. })
        );
        prop_assert!(is_role_conflict);
    }
}

// =============================================================================
// Retention Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn expiry_is_strictly_greater_than_window(age_hours in 0i64..24 * 30, window_days in 0i64..15) {
        let now = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let created = now - Duration::hours(age_hours);
        let expired = is_expired(created, now, window_days);
        prop_assert_eq!(expired, age_hours > window_days * 24);
    }

    #[test]
    fn timestamp_format_round_trips(secs in 0i64..4_000_000_000) {
        let at = Utc.timestamp_opt(secs, 0).unwrap();
        let formatted = format_timestamp(at);
        prop_assert_eq!(parse_timestamp(&formatted), Some(at));
    }
}
