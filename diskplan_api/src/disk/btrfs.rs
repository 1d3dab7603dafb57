use serde::{Deserialize, Serialize};

use sysdefs::osuuid::OsUuid;

use crate::{
    constants::{
        BTRFS_MIN_VOLUME_SIZE, DEFAULT_BTRFS_COMPRESSION, ROOT_MOUNT_POINT_PATH,
        ROOT_SUBVOLUME_NAME,
    },
    error::LayoutError,
    primitives::bytes::ByteCount,
};

/// A btrfs volume. Its size tracks the device holding it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Btrfs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<OsUuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default)]
    pub size: ByteCount,

    #[serde(default)]
    pub subvolumes: Vec<BtrfsSubvolume>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct BtrfsSubvolume {
    pub name: String,

    pub mountpoint: String,

    /// Space the subvolume is expected to use.
    #[serde(default)]
    pub size: ByteCount,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress: Option<String>,
}

impl Btrfs {
    /// Appends a subvolume mounted at `mountpoint`. The subvolume is named
    /// after the mountpoint, except for `/` which becomes `root`.
    pub fn create_subvolume(
        &mut self,
        mountpoint: &str,
        size: u64,
    ) -> Result<&mut BtrfsSubvolume, LayoutError> {
        let name = if mountpoint == ROOT_MOUNT_POINT_PATH {
            ROOT_SUBVOLUME_NAME.to_owned()
        } else {
            mountpoint.to_owned()
        };

        if self.subvolumes.iter().any(|subvol| subvol.name == name) {
            return Err(LayoutError::DuplicateName(format!(
                "duplicate btrfs subvolume name {name:?}"
            )));
        }

        self.subvolumes.push(BtrfsSubvolume {
            name,
            mountpoint: mountpoint.to_owned(),
            size: ByteCount(size),
            compress: Some(DEFAULT_BTRFS_COMPRESSION.to_owned()),
        });

        let index = self.subvolumes.len() - 1;
        Ok(&mut self.subvolumes[index])
    }

    /// Subvolumes share the volume, so the volume needs the sum of their
    /// expected usage, but never less than the btrfs floor.
    pub fn required_size(&self) -> u64 {
        self.subvolumes
            .iter()
            .map(|subvol| subvol.size.bytes())
            .sum::<u64>()
            .max(BTRFS_MIN_VOLUME_SIZE)
    }
}
