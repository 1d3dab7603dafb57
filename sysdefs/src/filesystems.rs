use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIs, EnumIter, EnumString, IntoStaticStr};

/// Block device filesystems that can be laid out in a disk image.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumIs,
    EnumIter,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum FilesystemType {
    Vfat,
    Ext4,
    Xfs,
    Btrfs,
}

impl FilesystemType {
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// FAT filesystems are identified by a 32-bit volume serial rather than a
    /// UUID.
    pub fn uses_volume_serial(self) -> bool {
        self.is_vfat()
    }

    /// Default number of the fsck pass for a filesystem mounted at
    /// `mountpoint`.
    pub fn default_pass_no(self, mountpoint: &str) -> u32 {
        match (self, mountpoint) {
            // xfs and btrfs have no boot time fsck
            (FilesystemType::Xfs | FilesystemType::Btrfs, _) => 0,
            (_, "/") => 1,
            _ => 2,
        }
    }
}
