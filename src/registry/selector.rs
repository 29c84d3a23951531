//! Round-robin selection over the healthy instances of a service group
//!
//! The cursor is always reduced modulo the number of instances that are
//! healthy at the time of the call, never the full group size. Instances
//! entering or leaving the healthy set therefore reshuffle the rotation
//! without the cursor being adjusted.

use super::store::{InstanceRecord, ServiceGroup};

/// Select the next healthy instance and advance the group's cursor
///
/// Returns `None` when no instance of the group is healthy. The caller must
/// hold exclusive access to the group for the whole call.
pub fn next_healthy(group: &mut ServiceGroup) -> Option<InstanceRecord> {
    let healthy: Vec<&InstanceRecord> = group.instances.iter().filter(|i| i.healthy).collect();
    if healthy.is_empty() {
        return None;
    }

    let count = healthy.len();
    let index = group.cursor % count;
    let selected = healthy[index].clone();
    group.cursor = (index + 1) % count;

    Some(selected)
}
