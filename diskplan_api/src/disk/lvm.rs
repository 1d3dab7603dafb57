use serde::{Deserialize, Serialize};

use sysdefs::filesystems::FilesystemType;

use crate::{
    constants::{LVM_EXTENT_SIZE, LVM_METADATA_SIZE, ROOT_MOUNT_POINT_PATH},
    error::LayoutError,
    primitives::bytes::{align_down, align_up, ByteCount},
};

use super::payload::{Filesystem, Payload};

/// An LVM volume group spanning the partition (or encrypted container) that
/// holds it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct LvmVolumeGroup {
    #[serde(default)]
    pub name: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default)]
    pub logical_volumes: Vec<LvmLogicalVolume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct LvmLogicalVolume {
    #[serde(default)]
    pub name: String,

    pub size: ByteCount,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_yaml::with::singleton_map"
    )]
    pub payload: Option<Payload>,
}

impl LvmLogicalVolume {
    /// Mountpoint of the filesystem in this volume, looking through an
    /// encrypted container.
    pub fn mountpoint(&self) -> Option<&str> {
        self.payload.as_ref().and_then(Payload::mountpoint)
    }
}

/// Derives a logical volume base name from a mountpoint: `/` becomes `root`,
/// other paths lose their leading slash and use `_` as separator.
fn lv_base_name(mountpoint: &str) -> String {
    if mountpoint == ROOT_MOUNT_POINT_PATH {
        "root".to_owned()
    } else {
        mountpoint.trim_start_matches('/').replace('/', "_")
    }
}

impl LvmVolumeGroup {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        LvmVolumeGroup {
            name: name.into(),
            description: description.into(),
            logical_volumes: Vec::new(),
        }
    }

    /// Generates an unused logical volume name for `mountpoint`, for example
    /// `rootlv` for `/` or `var_loglv` for `/var/log`. Collisions get a two
    /// digit suffix.
    pub fn generate_lv_name(&self, mountpoint: &str) -> Result<String, LayoutError> {
        let base = format!("{}lv", lv_base_name(mountpoint));
        let taken = |name: &str| self.logical_volumes.iter().any(|lv| lv.name == name);

        if !taken(&base) {
            return Ok(base);
        }

        (0..100)
            .map(|i| format!("{base}{i:02}"))
            .find(|candidate| !taken(candidate))
            .ok_or_else(|| {
                LayoutError::DuplicateName(format!(
                    "could not create logical volume name for {mountpoint} in volume group {}",
                    self.name
                ))
            })
    }

    /// Appends a logical volume holding a `fs_type` filesystem mounted at
    /// `mountpoint`. The size is rounded up to whole extents.
    pub fn create_logical_volume(
        &mut self,
        mountpoint: &str,
        fs_type: FilesystemType,
        size: u64,
    ) -> Result<&mut LvmLogicalVolume, LayoutError> {
        let name = self.generate_lv_name(mountpoint)?;
        let filesystem = Filesystem::new(fs_type, mountpoint);
        let size = align_up(size.max(filesystem.min_size()), LVM_EXTENT_SIZE);

        self.logical_volumes.push(LvmLogicalVolume {
            name,
            size: ByteCount(size),
            payload: Some(Payload::Filesystem(filesystem)),
        });

        let index = self.logical_volumes.len() - 1;
        Ok(&mut self.logical_volumes[index])
    }

    /// Sum of all logical volumes plus the metadata area.
    pub fn required_size(&self) -> u64 {
        self.logical_volumes
            .iter()
            .map(|lv| align_up(lv.size.bytes(), LVM_EXTENT_SIZE))
            .sum::<u64>()
            + LVM_METADATA_SIZE
    }

    /// Space left for logical volumes on a physical volume of `pv_size`
    /// bytes, in whole extents.
    pub fn usable_size(pv_size: u64) -> u64 {
        align_down(pv_size.saturating_sub(LVM_METADATA_SIZE), LVM_EXTENT_SIZE)
    }
}
