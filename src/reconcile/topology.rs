//! Pool Topology Selection
//!
//! Maps the requested redundancy and the number of unused disks to the
//! layout a new pool is actually created with. A wrong downgrade silently
//! reduces fault tolerance, so the rules are kept in one pure function.

use crate::appliance::types::VdevType;
use tracing::warn;

/// Pick the effective vdev layout for `disk_count` unused disks.
pub fn select_topology(requested: VdevType, disk_count: usize, min_disks_for_mirror: usize) -> VdevType {
    if disk_count <= 1 || disk_count < min_disks_for_mirror {
        return VdevType::Stripe;
    }

    match requested {
        VdevType::Raidz1 if disk_count < 3 => VdevType::Mirror,
        VdevType::Raidz2 if disk_count < 4 => {
            if disk_count >= 3 {
                VdevType::Raidz1
            } else {
                VdevType::Mirror
            }
        }
        VdevType::Raidz3 if disk_count < 5 => {
            if disk_count >= 4 {
                VdevType::Raidz2
            } else if disk_count >= 3 {
                VdevType::Raidz1
            } else {
                VdevType::Mirror
            }
        }
        other => other,
    }
}

/// Same as [`select_topology`], logging any downgrade
pub fn select_topology_logged(
    requested: VdevType,
    disk_count: usize,
    min_disks_for_mirror: usize,
) -> VdevType {
    let effective = select_topology(requested, disk_count, min_disks_for_mirror);
    if effective != requested {
        warn!(
            "Only {} unused disk(s): creating {} instead of requested {} (tolerates {} failure(s))",
            disk_count,
            effective,
            requested,
            effective.fault_tolerance()
        );
    }
    effective
}
