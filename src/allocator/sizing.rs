use std::{collections::BTreeMap, convert::Infallible};

use log::{debug, trace};
use rand::RngCore;

use diskplan_api::{
    constants::{
        LUKS2_HEADER_SIZE, LVM_EXTENT_SIZE, LVM_METADATA_SIZE, PARTITION_GRAIN,
        ROOT_MOUNT_POINT_PATH, SECTOR_SIZE,
    },
    disk::{
        container_payload_mut, EntityMut, LvmVolumeGroup, PartitionTable, Payload, WalkOrder,
    },
    error::LayoutError,
    primitives::{
        bytes::{align_up, ByteCount},
        path::has_path_prefix,
    },
};

use crate::idgen::IdGenerator;

/// Minimum size per mountpoint.
pub(super) type Minimums = BTreeMap<String, u64>;

/// Raises the minimum of `mountpoint` to `size`.
pub(super) fn raise(minimums: &mut Minimums, mountpoint: &str, size: u64) {
    let entry = minimums.entry(mountpoint.to_owned()).or_default();
    *entry = (*entry).max(size);
}

/// Charges every required directory size to the mountpoint that holds the
/// directory. Sizes charged to the same mountpoint add up.
pub(super) fn charge_required_sizes(
    table: &PartitionTable,
    required_sizes: &BTreeMap<String, ByteCount>,
    minimums: &mut Minimums,
) {
    let mountpoints = table.mountpoints();
    let mut charged: BTreeMap<&str, u64> = BTreeMap::new();

    for (directory, size) in required_sizes {
        let holder = mountpoints
            .iter()
            .filter(|mountpoint| has_path_prefix(directory, mountpoint))
            .max_by_key(|mountpoint| mountpoint.len());

        match holder {
            Some(holder) => {
                trace!("Charging {size} for '{directory}' to '{holder}'");
                *charged.entry(holder).or_default() += size.bytes();
            }
            None => trace!("No mountpoint holds '{directory}'"),
        }
    }

    for (mountpoint, size) in charged {
        raise(minimums, mountpoint, size);
    }
}

fn luks_overhead(payload: Option<&Payload>) -> u64 {
    match payload {
        Some(Payload::Luks(_)) => LUKS2_HEADER_SIZE,
        _ => 0,
    }
}

/// Space a payload needs. A btrfs volume never shrinks below its recorded
/// size.
fn requirement(payload: &Payload) -> u64 {
    match payload {
        Payload::Btrfs(btrfs) => btrfs.size.bytes().max(btrfs.required_size()),
        Payload::Luks(luks) => requirement(&luks.payload) + LUKS2_HEADER_SIZE,
        other => other.required_size(),
    }
}

/// Grows every entity to its minimum, children first. Logical volumes end
/// up on whole extents and partitions on the partition grain. Nothing
/// shrinks.
pub(super) fn resize(table: &mut PartitionTable, minimums: &Minimums) {
    let result = table.walk_mut(WalkOrder::PostOrder, |entity| {
        match entity {
            EntityMut::Subvolume(subvol) => {
                if let Some(min) = minimums.get(&subvol.mountpoint) {
                    subvol.size = ByteCount(subvol.size.bytes().max(*min));
                }
            }
            EntityMut::LogicalVolume(lv) => {
                let mut size = lv.size.bytes();
                if let Some(payload) = lv.payload.as_ref() {
                    size = size.max(requirement(payload));
                }
                if let Some(min) = lv.mountpoint().and_then(|mp| minimums.get(mp)) {
                    size = size.max(min + luks_overhead(lv.payload.as_ref()));
                }
                lv.size = ByteCount(align_up(size, LVM_EXTENT_SIZE));
            }
            EntityMut::Btrfs(btrfs) => {
                btrfs.size = ByteCount(btrfs.size.bytes().max(btrfs.required_size()));
            }
            EntityMut::Partition(index, partition) => {
                let mut size = partition.size.bytes();
                if let Some(payload) = partition.payload.as_ref() {
                    size = size.max(requirement(payload));
                }
                if let Some(min) = partition.mountpoint().and_then(|mp| minimums.get(mp)) {
                    size = size.max(min + luks_overhead(partition.payload.as_ref()));
                }
                let size = align_up(size, PARTITION_GRAIN);
                if size != partition.size.bytes() {
                    trace!(
                        "Resizing partition {} from {} to {}",
                        index + 1,
                        partition.size,
                        ByteCount(size)
                    );
                }
                partition.size = ByteCount(size);
            }
            EntityMut::Filesystem(_)
            | EntityMut::VolumeGroup(_)
            | EntityMut::Swap(_)
            | EntityMut::Luks(_) => {}
        }
        Ok::<(), Infallible>(())
    });

    if let Err(never) = result {
        match never {}
    }
}

/// Partition that absorbs free space: the one holding `/`, else the last.
fn growth_index(table: &PartitionTable) -> Option<usize> {
    table
        .partition_index_of(ROOT_MOUNT_POINT_PATH)
        .or_else(|| table.partitions.len().checked_sub(1))
}

/// Grows the growth partition until the partitions add up to `target`
/// bytes, then sets the table size. A larger table is left alone.
pub(super) fn grow(table: &mut PartitionTable, target: u64) -> Result<(), LayoutError> {
    let natural = table.partitions_size();
    let target = align_up(target, SECTOR_SIZE);

    if target > natural {
        let index = growth_index(table).ok_or_else(|| {
            LayoutError::InvalidTable("partition table has no partition to grow".to_owned())
        })?;
        let delta = target - natural;
        debug!(
            "Growing partition {} by {} to reach {}",
            index + 1,
            ByteCount(delta),
            ByteCount(target)
        );

        let partition = &mut table.partitions[index];
        partition.size = ByteCount(partition.size.bytes() + delta);
        let inner = partition.size.bytes() - luks_overhead(partition.payload.as_ref());

        if let Some(Payload::LvmVolumeGroup(vg)) = container_payload_mut(partition) {
            grow_root_lv(vg, inner);
        }
    }

    table.size = ByteCount(table.partitions_size());
    Ok(())
}

/// Hands every free extent of a physical volume of `pv_size` bytes to the
/// root logical volume.
fn grow_root_lv(vg: &mut LvmVolumeGroup, pv_size: u64) {
    let used = vg.required_size() - LVM_METADATA_SIZE;
    let free = LvmVolumeGroup::usable_size(pv_size).saturating_sub(used);

    if let Some(root) = vg
        .logical_volumes
        .iter_mut()
        .find(|lv| lv.mountpoint() == Some(ROOT_MOUNT_POINT_PATH))
    {
        trace!("Growing logical volume '{}' by {}", root.name, ByteCount(free));
        root.size = ByteCount(align_up(root.size.bytes(), LVM_EXTENT_SIZE) + free);
    }
}

/// Sets every btrfs volume to the size of the device holding it.
fn sync_btrfs_sizes(table: &mut PartitionTable) {
    for partition in table.partitions.iter_mut() {
        let inner = partition.size.bytes() - luks_overhead(partition.payload.as_ref());
        if let Some(Payload::Btrfs(btrfs)) = container_payload_mut(partition) {
            btrfs.size = ByteCount(inner);
        }
    }
}

/// Sizes, grows and identifies an assembled table, then checks the result.
pub(super) fn finalize<R: RngCore>(
    mut table: PartitionTable,
    minimums: &Minimums,
    target: u64,
    ids: &mut IdGenerator<R>,
) -> Result<PartitionTable, LayoutError> {
    resize(&mut table, minimums);
    grow(&mut table, target)?;
    sync_btrfs_sizes(&mut table);
    ids.generate(&mut table);
    table.validate()?;

    for (index, partition) in table.partitions.iter().enumerate() {
        if let Some(offset) = table.start_offset(index) {
            debug!(
                "Partition {} ({}) starts at {} with {}",
                index + 1,
                partition.partition_type,
                ByteCount(offset),
                partition.size
            );
        }
    }
    debug!("Disk image needs {}", ByteCount(table.image_size()));
    Ok(table)
}
