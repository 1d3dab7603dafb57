//! Conversions of the root filesystem into a volume group or a btrfs volume.

use log::debug;

use diskplan_api::{
    constants::{
        BOOT_MOUNT_POINT_PATH, DEFAULT_VOLUME_GROUP_DESCRIPTION, DEFAULT_VOLUME_GROUP_NAME,
        LUKS2_HEADER_SIZE, LVM_EXTENT_SIZE, ROOT_MOUNT_POINT_PATH,
    },
    disk::{
        container_payload_mut, Btrfs, LvmLogicalVolume, LvmVolumeGroup, PartitionTable, Payload,
    },
    error::LayoutError,
    primitives::bytes::{align_up, ByteCount},
};
use sysdefs::{filesystems::FilesystemType, partition_types::PartitionType};

use super::{boot_partition, insert_partition};

/// Adds a plain `/boot` partition unless the table has one. Boot loaders
/// cannot read the kernel from a volume group or a btrfs subvolume.
fn ensure_boot_partition(table: &mut PartitionTable, default_fs_type: FilesystemType) {
    if table.contains_mountpoint(BOOT_MOUNT_POINT_PATH) {
        return;
    }

    debug!("Adding a /boot partition");
    insert_partition(table, boot_partition(default_fs_type));
}

fn root_index(table: &PartitionTable) -> Result<usize, LayoutError> {
    table
        .partition_index_of(ROOT_MOUNT_POINT_PATH)
        .ok_or_else(|| LayoutError::InvalidTable("partition table has no root filesystem".into()))
}

/// Moves the root filesystem into a logical volume of a new volume group
/// that takes over the root partition. Tables that already have a volume
/// group are left alone.
pub(super) fn ensure_lvm(
    table: &mut PartitionTable,
    default_fs_type: FilesystemType,
) -> Result<(), LayoutError> {
    if table.volume_group_index().is_some() {
        return Ok(());
    }

    ensure_boot_partition(table, default_fs_type);

    let index = root_index(table)?;
    let partition = &mut table.partitions[index];
    let is_luks = matches!(partition.payload, Some(Payload::Luks(_)));
    let inner = if is_luks {
        partition.size.bytes().saturating_sub(LUKS2_HEADER_SIZE)
    } else {
        partition.size.bytes()
    };

    let Some(payload) = container_payload_mut(partition) else {
        return Err(LayoutError::InvalidTable(
            "root partition has no payload".into(),
        ));
    };
    let Payload::Filesystem(filesystem) = payload else {
        return Err(LayoutError::UnsupportedCombination(format!(
            "cannot convert {} holding the root filesystem to lvm",
            payload.kind()
        )));
    };

    debug!("Moving the root filesystem of partition {} into a volume group", index + 1);
    let filesystem = filesystem.clone();
    let mut vg = LvmVolumeGroup::new(DEFAULT_VOLUME_GROUP_NAME, DEFAULT_VOLUME_GROUP_DESCRIPTION);
    let name = vg.generate_lv_name(ROOT_MOUNT_POINT_PATH)?;
    let size = LvmVolumeGroup::usable_size(inner).max(align_up(filesystem.min_size(), LVM_EXTENT_SIZE));
    vg.logical_volumes.push(LvmLogicalVolume {
        name,
        size: ByteCount(size),
        payload: Some(Payload::Filesystem(filesystem)),
    });
    *payload = Payload::LvmVolumeGroup(vg);

    if !is_luks {
        partition.partition_type = PartitionType::Lvm;
    }

    Ok(())
}

/// Turns the root filesystem into a btrfs volume with a `root` subvolume.
/// Tables that already have a btrfs volume are left alone.
pub(super) fn ensure_btrfs(
    table: &mut PartitionTable,
    default_fs_type: FilesystemType,
) -> Result<(), LayoutError> {
    if table.btrfs_index().is_some() {
        return Ok(());
    }

    ensure_boot_partition(table, default_fs_type);

    let index = root_index(table)?;
    let partition = &mut table.partitions[index];
    let size = partition.size.bytes();

    let Some(payload) = container_payload_mut(partition) else {
        return Err(LayoutError::InvalidTable(
            "root partition has no payload".into(),
        ));
    };
    let Payload::Filesystem(filesystem) = payload else {
        return Err(LayoutError::UnsupportedCombination(format!(
            "cannot convert {} holding the root filesystem to btrfs",
            payload.kind()
        )));
    };

    debug!("Moving the root filesystem of partition {} into a btrfs volume", index + 1);
    let mut btrfs = Btrfs {
        uuid: filesystem.uuid.clone(),
        label: filesystem.label.clone(),
        size: ByteCount(size),
        subvolumes: Vec::new(),
    };
    btrfs.create_subvolume(ROOT_MOUNT_POINT_PATH, 0)?;
    *payload = Payload::Btrfs(btrfs);

    Ok(())
}
