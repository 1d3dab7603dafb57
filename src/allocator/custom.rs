use std::collections::BTreeMap;

use log::{debug, info};
use rand::RngCore;

use diskplan_api::{
    config::default_required_sizes,
    constants::{
        BIOS_BOOT_PARTITION_SIZE, BOOT_MOUNT_POINT_PATH, DEFAULT_BTRFS_COMPRESSION,
        DEFAULT_ROOT_SIZE, DEFAULT_VOLUME_GROUP_DESCRIPTION, DEFAULT_VOLUME_GROUP_NAME,
        ESP_MOUNT_POINT_PATH, LVM_EXTENT_SIZE, ROOT_MOUNT_POINT_PATH,
    },
    customizations::{FilesystemCustomization, PartitioningCustomization},
    disk::{
        Btrfs, BtrfsSubvolume, Filesystem, LvmLogicalVolume, LvmVolumeGroup, Partition,
        PartitionTable, PartitionTableType, Payload,
    },
    error::LayoutError,
    platform::Platform,
    primitives::bytes::{align_up, ByteCount},
};
use sysdefs::{filesystems::FilesystemType, partition_types::PartitionType};

use crate::idgen::IdGenerator;

use super::{boot_partition, esp_partition, plain_partition, sizing};

/// Knobs of [`new_custom_partition_table`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomOptions {
    /// Boot mode decides the boot partitions, architecture the root and
    /// `/usr` partition types.
    pub platform: Platform,

    pub table_type: PartitionTableType,

    pub default_fs_type: FilesystemType,

    /// Minimum directory sizes. `None` means the distribution defaults.
    pub required_sizes: Option<BTreeMap<String, ByteCount>>,
}

impl Default for CustomOptions {
    fn default() -> Self {
        Self {
            platform: Platform::default(),
            table_type: PartitionTableType::Gpt,
            default_fs_type: FilesystemType::Xfs,
            required_sizes: None,
        }
    }
}

/// Builds a whole table out of a partitioning customization.
///
/// The table starts with the boot partitions the boot mode needs, followed
/// by the requested plain filesystems, a `/boot` partition when a volume
/// group or btrfs volume is requested, and the volume group or btrfs volume
/// itself. A root filesystem is added when none was requested. Partitions
/// grow to the customization's minimum disk size.
pub fn new_custom_partition_table<R: RngCore>(
    partitioning: &PartitioningCustomization,
    options: &CustomOptions,
    ids: &mut IdGenerator<R>,
) -> Result<PartitionTable, LayoutError> {
    partitioning.validate()?;

    let requested = partitioning.mountpoints();
    let has_root = requested.contains(&ROOT_MOUNT_POINT_PATH);
    let boot_mode = options.platform.boot_mode;
    let arch = options.platform.arch;
    let mut table = PartitionTable::new(options.table_type);

    if boot_mode.is_legacy() && options.table_type == PartitionTableType::Gpt {
        table.partitions.push(Partition::new(
            BIOS_BOOT_PARTITION_SIZE,
            PartitionType::BiosBoot,
            None,
        ));
    }

    if options.platform.boots_uefi() && !requested.contains(&ESP_MOUNT_POINT_PATH) {
        table.partitions.push(esp_partition(0));
    }

    let plain: &[FilesystemCustomization] = partitioning
        .plain
        .as_ref()
        .map(|plain| plain.filesystems.as_slice())
        .unwrap_or_default();
    for custom in plain {
        table
            .partitions
            .push(plain_partition(custom, options.default_fs_type, arch));
    }

    let vg_customization = partitioning
        .lvm
        .as_ref()
        .and_then(|lvm| lvm.volume_groups.first());
    let btrfs_customization = partitioning
        .btrfs
        .as_ref()
        .and_then(|btrfs| btrfs.volumes.first());

    if (vg_customization.is_some() || btrfs_customization.is_some())
        && !requested.contains(&BOOT_MOUNT_POINT_PATH)
    {
        table.partitions.push(boot_partition(options.default_fs_type));
    }

    if let Some(vg_customization) = vg_customization {
        let name = if vg_customization.name.is_empty() {
            DEFAULT_VOLUME_GROUP_NAME.to_owned()
        } else {
            vg_customization.name.clone()
        };
        let mut vg = LvmVolumeGroup::new(name, DEFAULT_VOLUME_GROUP_DESCRIPTION);

        // Explicit names first so that generated ones cannot take them
        for lv in vg_customization.logical_volumes.iter() {
            let custom = &lv.filesystem;
            let mut filesystem = Filesystem::new(
                custom.fs_type.unwrap_or(options.default_fs_type),
                custom.mountpoint.as_str(),
            );
            filesystem.label = custom.label.clone();
            let size = align_up(
                custom.min_size.bytes().max(filesystem.min_size()),
                LVM_EXTENT_SIZE,
            );
            vg.logical_volumes.push(LvmLogicalVolume {
                name: lv.name.clone(),
                size: ByteCount(size),
                payload: Some(Payload::Filesystem(filesystem)),
            });
        }
        for index in 0..vg.logical_volumes.len() {
            if vg.logical_volumes[index].name.is_empty() {
                let mountpoint = vg_customization.logical_volumes[index]
                    .filesystem
                    .mountpoint
                    .as_str();
                vg.logical_volumes[index].name = vg.generate_lv_name(mountpoint)?;
            }
        }

        if !has_root {
            vg.create_logical_volume(
                ROOT_MOUNT_POINT_PATH,
                options.default_fs_type,
                DEFAULT_ROOT_SIZE,
            )?;
        }

        debug!(
            "Adding volume group '{}' with {} logical volume(s)",
            vg.name,
            vg.logical_volumes.len()
        );
        table.partitions.push(Partition::new(
            vg_customization.min_size.bytes(),
            PartitionType::Lvm,
            Some(Payload::LvmVolumeGroup(vg)),
        ));
    } else if let Some(volume) = btrfs_customization {
        let mut btrfs = Btrfs {
            subvolumes: volume
                .subvolumes
                .iter()
                .map(|subvol| BtrfsSubvolume {
                    name: subvol.name.clone(),
                    mountpoint: subvol.mountpoint.clone(),
                    size: ByteCount(0),
                    compress: Some(DEFAULT_BTRFS_COMPRESSION.to_owned()),
                })
                .collect(),
            ..Default::default()
        };

        if !has_root {
            btrfs.create_subvolume(ROOT_MOUNT_POINT_PATH, DEFAULT_ROOT_SIZE)?;
        }

        debug!(
            "Adding btrfs volume with {} subvolume(s)",
            btrfs.subvolumes.len()
        );
        table.partitions.push(Partition::new(
            volume.min_size.bytes(),
            PartitionType::LinuxGeneric,
            Some(Payload::Btrfs(btrfs)),
        ));
    } else if !has_root {
        table.partitions.push(plain_partition(
            &FilesystemCustomization::new(ROOT_MOUNT_POINT_PATH, DEFAULT_ROOT_SIZE),
            options.default_fs_type,
            arch,
        ));
    }

    if options.table_type == PartitionTableType::Dos && boot_mode.is_legacy() {
        let boot_index = table
            .partition_index_of(BOOT_MOUNT_POINT_PATH)
            .or_else(|| table.partition_index_of(ROOT_MOUNT_POINT_PATH));
        if let Some(index) = boot_index {
            table.partitions[index].bootable = true;
        }
    }

    let mut minimums = sizing::Minimums::new();
    let lvs = partitioning
        .lvm
        .iter()
        .flat_map(|lvm| lvm.volume_groups.iter())
        .flat_map(|vg| vg.logical_volumes.iter())
        .map(|lv| &lv.filesystem);
    for custom in plain.iter().chain(lvs) {
        sizing::raise(&mut minimums, &custom.mountpoint, custom.min_size.bytes());
    }
    let required_sizes = options
        .required_sizes
        .clone()
        .unwrap_or_else(default_required_sizes);
    sizing::charge_required_sizes(&table, &required_sizes, &mut minimums);

    let table = sizing::finalize(table, &minimums, partitioning.min_size.bytes(), ids)?;
    info!(
        "Built custom partition table with {} partitions, {} in total",
        table.partitions.len(),
        table.size
    );
    Ok(table)
}
