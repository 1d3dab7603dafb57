use std::collections::HashSet;

use log::trace;

use crate::{
    constants::{BOOT_MOUNT_POINT_PATH, ESP_MOUNT_POINT_PATH, SECTOR_SIZE},
    error::LayoutError,
    primitives::{
        bytes::ByteCount,
        path::{clean_path, is_absolute},
    },
};

use super::{Entity, PartitionTable, WalkOrder};

/// Mountpoints that must live on a plain partition.
pub const PLAIN_ONLY_MOUNTPOINTS: [&str; 2] = [BOOT_MOUNT_POINT_PATH, ESP_MOUNT_POINT_PATH];

/// Checks that a mountpoint is non-empty, absolute and canonical. The error
/// message does not name the kind of entity that carries the mountpoint.
pub fn check_mountpoint(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("mountpoint is empty".to_owned());
    }

    if !is_absolute(path) {
        return Err(format!("mountpoint {path:?} is not an absolute path"));
    }

    let clean = clean_path(path);
    if clean != path {
        return Err(format!(
            "mountpoint {path:?} is not a canonical path (did you mean {clean:?}?)"
        ));
    }

    Ok(())
}

impl PartitionTable {
    /// Checks the structural invariants of the table: valid and unique
    /// mountpoints, unique names, at most one volume group and one btrfs
    /// volume, `/boot` and `/boot/efi` only on plain partitions, sector
    /// aligned partitions that fit the table.
    ///
    /// Sizes of nested entities are not compared against their containers,
    /// templates are routinely undersized until allocation grows them.
    pub fn validate_structure(&self) -> Result<(), LayoutError> {
        for (index, partition) in self.partitions.iter().enumerate() {
            if partition.size.bytes() % SECTOR_SIZE != 0 {
                return Err(LayoutError::InvalidTable(format!(
                    "size {} of partition {} is not a multiple of the {SECTOR_SIZE} byte sector size",
                    partition.size.bytes(),
                    index + 1
                )));
            }
        }

        let total = self.partitions_size();
        if self.size.bytes() != 0 && total > self.size.bytes() {
            return Err(LayoutError::InvalidTable(format!(
                "partitions need {} but the table only has {}",
                ByteCount(total),
                self.size
            )));
        }

        let mut mountpoints = HashSet::new();
        let mut volume_groups = 0;
        let mut btrfs_volumes = 0;

        self.walk(WalkOrder::PreOrder, |entity, ancestors| {
            match entity {
                Entity::VolumeGroup(vg) => {
                    volume_groups += 1;
                    if volume_groups > 1 {
                        return Err(LayoutError::UnsupportedCombination(
                            "multiple LVM volume groups are not yet supported".to_owned(),
                        ));
                    }

                    let mut names = HashSet::new();
                    for lv in vg.logical_volumes.iter().filter(|lv| !lv.name.is_empty()) {
                        if !names.insert(lv.name.as_str()) {
                            return Err(LayoutError::DuplicateName(format!(
                                "duplicate lvm logical volume name {:?} in volume group {:?}",
                                lv.name, vg.name
                            )));
                        }
                    }
                }
                Entity::Btrfs(btrfs) => {
                    btrfs_volumes += 1;
                    if btrfs_volumes > 1 {
                        return Err(LayoutError::UnsupportedCombination(
                            "multiple btrfs volumes are not yet supported".to_owned(),
                        ));
                    }

                    let mut names = HashSet::new();
                    for subvol in btrfs.subvolumes.iter() {
                        if subvol.name.is_empty() {
                            return Err(LayoutError::InvalidTable(
                                "btrfs subvolume with empty name".to_owned(),
                            ));
                        }
                        if !names.insert(subvol.name.as_str()) {
                            return Err(LayoutError::DuplicateName(format!(
                                "duplicate btrfs subvolume name {:?}",
                                subvol.name
                            )));
                        }
                    }
                }
                _ => {}
            }

            let Some(mountpoint) = entity.mountpoint() else {
                return Ok(());
            };
            trace!("Checking mountpoint '{mountpoint}' of {}", entity.kind());

            check_mountpoint(mountpoint).map_err(|e| {
                LayoutError::InvalidMountpoint(format!("invalid {}: {e}", entity.kind()))
            })?;

            if !mountpoints.insert(mountpoint) {
                return Err(LayoutError::DuplicateName(format!(
                    "duplicate mountpoint {mountpoint:?}"
                )));
            }

            if PLAIN_ONLY_MOUNTPOINTS.contains(&mountpoint) {
                let container = ancestors.iter().find_map(|a| match a {
                    Entity::LogicalVolume(_) => Some("logical volume"),
                    Entity::Btrfs(_) => Some("btrfs subvolume"),
                    _ => None,
                });
                if let Some(container) = container {
                    return Err(LayoutError::InvalidMountpoint(format!(
                        "invalid mountpoint {mountpoint:?} for {container}"
                    )));
                }
            }

            Ok(())
        })
    }

    /// Checks the structure and that every payload fits the device holding
    /// it. Allocated tables always pass.
    pub fn validate(&self) -> Result<(), LayoutError> {
        self.validate_structure()?;

        self.walk(WalkOrder::PreOrder, |entity, _| {
            let (what, available, payload) = match entity {
                Entity::Partition(index, partition) => (
                    format!("partition {}", index + 1),
                    partition.size.bytes(),
                    partition.payload.as_ref(),
                ),
                Entity::LogicalVolume(lv) => (
                    format!("logical volume {:?}", lv.name),
                    lv.size.bytes(),
                    lv.payload.as_ref(),
                ),
                _ => return Ok(()),
            };

            if available == 0 {
                return Err(LayoutError::InvalidTable(format!("{what} has no size")));
            }

            if let Some(payload) = payload {
                let required = payload.required_size();
                if required > available {
                    return Err(LayoutError::InvalidTable(format!(
                        "{what} is too small for its {}: needs {} but has {}",
                        payload.kind(),
                        ByteCount(required),
                        ByteCount(available)
                    )));
                }
            }
            Ok(())
        })
    }
}
