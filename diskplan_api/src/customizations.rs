//! User requested filesystem and partitioning customizations.

use std::collections::HashSet;

use regex::Regex;
use serde::{Deserialize, Serialize};

use sysdefs::filesystems::FilesystemType;

use crate::{
    constants::{BOOT_MOUNT_POINT_PATH, ESP_MOUNT_POINT_PATH},
    disk::validation::{check_mountpoint, PLAIN_ONLY_MOUNTPOINTS},
    error::LayoutError,
    primitives::bytes::ByteCount,
};

/// Customizations document: plain mountpoint requests and, optionally, a
/// full partitioning request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Customizations {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filesystem: Vec<FilesystemCustomization>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partitioning: Option<PartitioningCustomization>,
}

/// A mountpoint with a minimum size.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilesystemCustomization {
    pub mountpoint: String,

    #[serde(default, rename = "minsize")]
    pub min_size: ByteCount,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Filesystem type; the distribution default when absent.
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub fs_type: Option<FilesystemType>,
}

impl FilesystemCustomization {
    pub fn new(mountpoint: impl Into<String>, min_size: u64) -> Self {
        FilesystemCustomization {
            mountpoint: mountpoint.into(),
            min_size: ByteCount(min_size),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PartitioningCustomization {
    /// Minimum size of the whole disk.
    #[serde(default, rename = "minsize")]
    pub min_size: ByteCount,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plain: Option<PlainFilesystemCustomization>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lvm: Option<LvmCustomization>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub btrfs: Option<BtrfsCustomization>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlainFilesystemCustomization {
    #[serde(default)]
    pub filesystems: Vec<FilesystemCustomization>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LvmCustomization {
    #[serde(default)]
    pub volume_groups: Vec<VgCustomization>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VgCustomization {
    /// Volume group name; generated when empty.
    #[serde(default)]
    pub name: String,

    /// Size of the partition that holds the volume group.
    #[serde(default, rename = "minsize")]
    pub min_size: ByteCount,

    #[serde(default)]
    pub logical_volumes: Vec<LvCustomization>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LvCustomization {
    /// Logical volume name; generated from the mountpoint when empty.
    #[serde(default)]
    pub name: String,

    #[serde(flatten)]
    pub filesystem: FilesystemCustomization,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BtrfsCustomization {
    #[serde(default)]
    pub volumes: Vec<BtrfsVolumeCustomization>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BtrfsVolumeCustomization {
    /// Size of the partition that holds the volume.
    #[serde(default, rename = "minsize")]
    pub min_size: ByteCount,

    #[serde(default)]
    pub subvolumes: Vec<BtrfsSubvolumeCustomization>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BtrfsSubvolumeCustomization {
    pub name: String,
    pub mountpoint: String,
}

/// Filesystem types allowed on the boot mountpoints. `None` always passes
/// and means the distribution default.
fn check_filesystem_type(path: &str, fs_type: Option<FilesystemType>) -> Result<(), String> {
    let allowed: &[FilesystemType] = match path {
        BOOT_MOUNT_POINT_PATH => &[FilesystemType::Xfs, FilesystemType::Ext4],
        ESP_MOUNT_POINT_PATH => &[FilesystemType::Vfat],
        _ => return Ok(()),
    };

    match fs_type {
        Some(fs_type) if !allowed.contains(&fs_type) => Err(format!(
            "unsupported filesystem type for {path:?}: {fs_type}"
        )),
        _ => Ok(()),
    }
}

/// Characters lvm accepts in volume group and logical volume names. Names
/// may not start with a hyphen.
const LVM_NAME_PATTERN: &str = r"^[a-zA-Z0-9+_.][a-zA-Z0-9+_.-]*$";

/// Checks a volume group or logical volume name. Empty names are generated
/// later and always pass.
fn check_lvm_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Ok(());
    }

    let re = Regex::new(LVM_NAME_PATTERN).map_err(|e| e.to_string())?;
    if !re.is_match(name) || name == "." || name == ".." {
        return Err(format!("invalid lvm name {name:?}"));
    }

    Ok(())
}

impl PartitioningCustomization {
    /// Every requested mountpoint: plain filesystems, then logical volumes,
    /// then btrfs subvolumes.
    pub fn mountpoints(&self) -> Vec<&str> {
        let plain = self
            .plain
            .iter()
            .flat_map(|plain| plain.filesystems.iter())
            .map(|fs| fs.mountpoint.as_str());
        let lvm = self
            .lvm
            .iter()
            .flat_map(|lvm| lvm.volume_groups.iter())
            .flat_map(|vg| vg.logical_volumes.iter())
            .map(|lv| lv.filesystem.mountpoint.as_str());
        let btrfs = self
            .btrfs
            .iter()
            .flat_map(|btrfs| btrfs.volumes.iter())
            .flat_map(|vol| vol.subvolumes.iter())
            .map(|subvol| subvol.mountpoint.as_str());
        plain.chain(lvm).chain(btrfs).collect()
    }

    /// Checks for customization combinations that cannot be laid out,
    /// regardless of distribution policy. Every violation is reported.
    pub fn validate(&self) -> Result<(), LayoutError> {
        let mut errors = Vec::new();

        if self.btrfs.is_some() && self.lvm.is_some() {
            errors.push(LayoutError::UnsupportedCombination(
                "btrfs and lvm partitioning cannot be combined".to_owned(),
            ));
        }

        if self.btrfs.as_ref().is_some_and(|b| b.volumes.len() > 1) {
            errors.push(LayoutError::UnsupportedCombination(
                "multiple btrfs volumes are not yet supported".to_owned(),
            ));
        }

        if self.lvm.as_ref().is_some_and(|l| l.volume_groups.len() > 1) {
            errors.push(LayoutError::UnsupportedCombination(
                "multiple LVM volume groups are not yet supported".to_owned(),
            ));
        }

        let mut mountpoints = HashSet::new();
        let mut check_duplicate = |mountpoint: &str, errors: &mut Vec<LayoutError>| {
            // Invalid mountpoints are reported on their own, not as duplicates
            if !mountpoint.is_empty() && !mountpoints.insert(mountpoint.to_owned()) {
                errors.push(LayoutError::DuplicateName(format!(
                    "duplicate mountpoint {mountpoint:?} in partitioning customizations"
                )));
            }
        };

        for fs in self.plain.iter().flat_map(|p| p.filesystems.iter()) {
            if let Err(e) = check_mountpoint(&fs.mountpoint) {
                errors.push(LayoutError::InvalidMountpoint(format!(
                    "invalid plain filesystem customization: {e}"
                )));
            }
            check_duplicate(&fs.mountpoint, &mut errors);
            if let Err(e) = check_filesystem_type(&fs.mountpoint, fs.fs_type) {
                errors.push(LayoutError::UnsupportedCombination(format!(
                    "invalid plain filesystem customization: {e}"
                )));
            }
            if fs.fs_type == Some(FilesystemType::Btrfs) {
                errors.push(LayoutError::UnsupportedCombination(
                    "btrfs filesystem defined under plain partitioning customization: please use \
                     the \"btrfs\" customization to define btrfs volumes and subvolumes"
                        .to_owned(),
                ));
            }
        }

        let mut vg_names = HashSet::new();
        for vg in self.lvm.iter().flat_map(|l| l.volume_groups.iter()) {
            if !vg.name.is_empty() && !vg_names.insert(vg.name.as_str()) {
                errors.push(LayoutError::DuplicateName(format!(
                    "duplicate volume group name {:?} in partitioning customizations",
                    vg.name
                )));
            }
            if let Err(e) = check_lvm_name(&vg.name) {
                errors.push(LayoutError::InvalidTable(format!(
                    "invalid volume group customization: {e}"
                )));
            }

            let mut lv_names = HashSet::new();
            for lv in vg.logical_volumes.iter() {
                let mountpoint = lv.filesystem.mountpoint.as_str();
                if !lv.name.is_empty() && !lv_names.insert(lv.name.as_str()) {
                    errors.push(LayoutError::DuplicateName(format!(
                        "duplicate lvm logical volume name {:?} in volume group {:?} in partitioning customizations",
                        lv.name, vg.name
                    )));
                }
                if let Err(e) = check_lvm_name(&lv.name) {
                    errors.push(LayoutError::InvalidTable(format!(
                        "invalid logical volume customization: {e}"
                    )));
                }
                if let Err(e) = check_mountpoint(mountpoint) {
                    errors.push(LayoutError::InvalidMountpoint(format!(
                        "invalid logical volume customization: {e}"
                    )));
                }
                check_duplicate(mountpoint, &mut errors);
                if PLAIN_ONLY_MOUNTPOINTS.contains(&mountpoint) {
                    errors.push(LayoutError::InvalidMountpoint(format!(
                        "invalid mountpoint {mountpoint:?} for logical volume"
                    )));
                }
            }
        }

        for vol in self.btrfs.iter().flat_map(|b| b.volumes.iter()) {
            let mut subvol_names = HashSet::new();
            for subvol in vol.subvolumes.iter() {
                if subvol.name.is_empty() {
                    errors.push(LayoutError::InvalidTable(
                        "btrfs subvolume with empty name in partitioning customizations"
                            .to_owned(),
                    ));
                } else if !subvol_names.insert(subvol.name.as_str()) {
                    errors.push(LayoutError::DuplicateName(format!(
                        "duplicate btrfs subvolume name {:?} in partitioning customizations",
                        subvol.name
                    )));
                }
                if let Err(e) = check_mountpoint(&subvol.mountpoint) {
                    errors.push(LayoutError::InvalidMountpoint(format!(
                        "invalid btrfs subvolume customization: {e}"
                    )));
                }
                check_duplicate(&subvol.mountpoint, &mut errors);
                if PLAIN_ONLY_MOUNTPOINTS.contains(&subvol.mountpoint.as_str()) {
                    errors.push(LayoutError::InvalidMountpoint(format!(
                        "invalid mountpoint {:?} for btrfs subvolume",
                        subvol.mountpoint
                    )));
                }
            }
        }

        match LayoutError::collect(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Checks a list of plain mountpoint requests for invalid and repeated
/// mountpoints. Every violation is reported.
pub fn validate_filesystem_customizations(
    filesystems: &[FilesystemCustomization],
) -> Result<(), LayoutError> {
    let mut errors = Vec::new();
    let mut seen = HashSet::new();
    for fs in filesystems {
        if let Err(e) = check_mountpoint(&fs.mountpoint) {
            errors.push(LayoutError::InvalidMountpoint(format!(
                "invalid filesystem customization: {e}"
            )));
        } else if !seen.insert(fs.mountpoint.as_str()) {
            errors.push(LayoutError::DuplicateName(format!(
                "duplicate mountpoint {:?} in filesystem customizations",
                fs.mountpoint
            )));
        }
    }

    match LayoutError::collect(errors) {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
