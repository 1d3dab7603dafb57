use std::collections::BTreeMap;

use maplit::btreemap;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString, IntoStaticStr};

use sysdefs::filesystems::FilesystemType;

use crate::{
    constants::{ROOT_MOUNT_POINT_PATH, USR_MOUNT_POINT_PATH},
    disk::PartitionTable,
    error::ConfigError,
    pathpolicy::{PathPolicies, MOUNTPOINT_POLICIES},
    platform::Platform,
    primitives::{bytes::ByteCount, bytes::GIBIBYTE, path::is_canonical},
};

/// How new mountpoints are placed on the disk.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    IntoStaticStr,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PartitioningMode {
    /// Plain partitions only. Never converts the table.
    Raw,

    /// Logical volumes. The root filesystem is moved into a volume group when
    /// the template has none.
    Lvm,

    /// Like `lvm`, but the table is only converted when a requested
    /// mountpoint is not already part of it.
    #[default]
    AutoLvm,

    /// Btrfs subvolumes. The root filesystem is moved into a btrfs volume.
    Btrfs,
}

/// Minimum sizes of directories, charged to whatever holds them. Without
/// them an image could be built with a root filesystem too small to hold its
/// packages.
pub fn default_required_sizes() -> BTreeMap<String, ByteCount> {
    btreemap! {
        ROOT_MOUNT_POINT_PATH.to_owned() => ByteCount(GIBIBYTE),
        USR_MOUNT_POINT_PATH.to_owned() => ByteCount(2 * GIBIBYTE),
    }
}

fn default_mountpoint_policy() -> PathPolicies {
    MOUNTPOINT_POLICIES.clone()
}

fn default_fs_type() -> FilesystemType {
    FilesystemType::Xfs
}

/// What a distribution supplies for one image type: the partition table
/// template, the disk size and the rules customizations must follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ImageProfile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub base_partition_table: PartitionTable,

    /// Minimum size of the disk image's partition area.
    #[serde(default)]
    pub min_size: ByteCount,

    #[serde(default)]
    pub partitioning_mode: PartitioningMode,

    #[serde(default = "default_required_sizes")]
    pub required_sizes: BTreeMap<String, ByteCount>,

    #[serde(default = "default_mountpoint_policy")]
    pub mountpoint_policy: PathPolicies,

    #[serde(default)]
    pub platform: Platform,

    /// Filesystem used for new mountpoints.
    #[serde(default = "default_fs_type")]
    pub default_fs_type: FilesystemType,
}

impl ImageProfile {
    /// Checks the profile on its own, before any customization is applied.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_fs_type == FilesystemType::Vfat {
            return Err(ConfigError::InvalidProfile(
                "vfat cannot be the default filesystem".to_owned(),
            ));
        }

        if let Some(dir) = self.required_sizes.keys().find(|dir| !is_canonical(dir)) {
            return Err(ConfigError::InvalidProfile(format!(
                "required size directory {dir:?} is not a canonical path"
            )));
        }

        self.base_partition_table
            .validate_structure()
            .map_err(|e| ConfigError::InvalidProfile(format!("base partition table: {e}")))
    }
}
