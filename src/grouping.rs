// src/grouping.rs

use crate::config::GroupingMode;
use crate::data_types::Address;

/// A set of workers sharing one address. Worker ids are contiguous across
/// the groups of a batch, which keeps their nonce ranges disjoint.
#[derive(Debug, Clone)]
pub struct WorkerGroup {
    pub address: Address,
    pub worker_ids: Vec<usize>,
}

fn min_workers_per_address(
    mode: GroupingMode,
    total_workers: usize,
    workers_per_address: usize,
) -> usize {
    match mode {
        GroupingMode::Grouped => workers_per_address.max(1),
        GroupingMode::AllOnOne => total_workers,
        GroupingMode::Auto => {
            if total_workers <= 4 {
                total_workers
            } else {
                (total_workers / 4).clamp(3, 5)
            }
        }
    }
}

/// Split `total_workers` across the leading addresses of `addresses`.
/// Workers are distributed evenly; the first `total mod groups` groups get
/// one extra. Falls back to a single all-workers group when the pool cannot
/// fill even one group.
pub fn calculate_worker_groups(
    addresses: &[Address],
    total_workers: usize,
    mode: GroupingMode,
    workers_per_address: usize,
) -> Vec<WorkerGroup> {
    if addresses.is_empty() || total_workers == 0 {
        return Vec::new();
    }

    let min_per_address = min_workers_per_address(mode, total_workers, workers_per_address);
    let max_groups = if min_per_address == 0 {
        0
    } else {
        total_workers / min_per_address
    };
    let group_count = max_groups.min(addresses.len());

    if group_count == 0 {
        return vec![WorkerGroup {
            address: addresses[0].clone(),
            worker_ids: (0..total_workers).collect(),
        }];
    }

    let base = total_workers / group_count;
    let remainder = total_workers % group_count;

    let mut groups = Vec::with_capacity(group_count);
    let mut next_id = 0;
    for (i, address) in addresses.iter().take(group_count).enumerate() {
        let size = base + usize::from(i < remainder);
        groups.push(WorkerGroup {
            address: address.clone(),
            worker_ids: (next_id..next_id + size).collect(),
        });
        next_id += size;
    }
    groups
}
