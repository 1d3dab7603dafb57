use serde::{Deserialize, Serialize};

use sysdefs::{filesystems::FilesystemType, osuuid::OsUuid};

use crate::constants::{DEFAULT_FSTAB_OPTIONS, DEFAULT_LUKS_CIPHER, LUKS2_HEADER_SIZE};

use super::{btrfs::Btrfs, lvm::LvmVolumeGroup};

/// Contents of a partition, a logical volume or an encrypted container.
///
/// Documents spell a payload as a map with a single key naming the kind, so
/// fields holding one use `serde_yaml::with::singleton_map`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Payload {
    Filesystem(Filesystem),
    LvmVolumeGroup(LvmVolumeGroup),
    Btrfs(Btrfs),
    Swap(Swap),
    Luks(Luks),
}

impl Payload {
    /// Short name of the payload kind, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Filesystem(_) => "filesystem",
            Payload::LvmVolumeGroup(_) => "lvm-volume-group",
            Payload::Btrfs(_) => "btrfs",
            Payload::Swap(_) => "swap",
            Payload::Luks(_) => "luks",
        }
    }

    /// Mountpoint of the filesystem this payload is, looking through an
    /// encrypted container.
    pub fn mountpoint(&self) -> Option<&str> {
        match self {
            Payload::Filesystem(fs) => Some(&fs.mountpoint),
            Payload::Luks(luks) => luks.payload.mountpoint(),
            _ => None,
        }
    }

    /// Space the payload needs from the device that holds it, excluding any
    /// slack the device may have.
    pub fn required_size(&self) -> u64 {
        match self {
            Payload::Filesystem(fs) => fs.min_size(),
            Payload::LvmVolumeGroup(vg) => vg.required_size(),
            Payload::Btrfs(btrfs) => btrfs.required_size(),
            Payload::Swap(_) => 0,
            Payload::Luks(luks) => luks.required_size(),
        }
    }
}

fn default_fstab_options() -> String {
    DEFAULT_FSTAB_OPTIONS.to_owned()
}

fn is_zero(value: &u32) -> bool {
    *value == 0
}

/// A plain filesystem with its fstab entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Filesystem {
    #[serde(rename = "type")]
    pub fs_type: FilesystemType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<OsUuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    pub mountpoint: String,

    #[serde(default = "default_fstab_options")]
    pub fstab_options: String,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub fstab_freq: u32,

    #[serde(default, skip_serializing_if = "is_zero")]
    pub fstab_pass_no: u32,
}

impl Filesystem {
    /// Creates a filesystem with default fstab settings for `mountpoint`.
    pub fn new(fs_type: FilesystemType, mountpoint: impl Into<String>) -> Self {
        let mountpoint = mountpoint.into();
        Filesystem {
            fs_type,
            uuid: None,
            label: None,
            fstab_pass_no: fs_type.default_pass_no(&mountpoint),
            mountpoint,
            fstab_options: default_fstab_options(),
            fstab_freq: 0,
        }
    }

    /// Smallest device that can hold the filesystem.
    pub fn min_size(&self) -> u64 {
        match self.fs_type {
            FilesystemType::Xfs => crate::constants::XFS_MIN_SIZE,
            FilesystemType::Ext4 => crate::constants::EXT4_MIN_SIZE,
            FilesystemType::Btrfs => crate::constants::BTRFS_MIN_VOLUME_SIZE,
            FilesystemType::Vfat => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Swap {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<OsUuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default = "default_fstab_options")]
    pub fstab_options: String,
}

impl Default for Swap {
    fn default() -> Self {
        Swap {
            uuid: None,
            label: None,
            fstab_options: default_fstab_options(),
        }
    }
}

fn default_cipher() -> String {
    DEFAULT_LUKS_CIPHER.to_owned()
}

/// A LUKS2 encrypted container wrapping exactly one payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Luks {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<OsUuid>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    #[serde(default = "default_cipher")]
    pub cipher: String,

    #[serde(with = "serde_yaml::with::singleton_map")]
    pub payload: Box<Payload>,
}

impl Luks {
    pub fn required_size(&self) -> u64 {
        self.payload.required_size() + LUKS2_HEADER_SIZE
    }
}
