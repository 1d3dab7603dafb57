//! The partition table data model.

use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;
use uuid::Uuid;

use sysdefs::{osuuid::OsUuid, partition_types::PartitionType};

use crate::{
    constants::{GPT_FOOTER_SIZE, GPT_HEADER_SIZE},
    primitives::bytes::ByteCount,
};

pub mod btrfs;
pub mod lvm;
pub mod payload;
pub mod validation;
pub mod walk;

pub use btrfs::{Btrfs, BtrfsSubvolume};
pub use lvm::{LvmLogicalVolume, LvmVolumeGroup};
pub use payload::{Filesystem, Luks, Payload, Swap};
pub use walk::{Entity, EntityMut, WalkOrder};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum PartitionTableType {
    #[default]
    Gpt,
    Dos,
}

/// A partition table: the root of a disk layout.
///
/// `size` is the space available to partitions. Partition offsets are not
/// stored; they follow from the sizes of the preceding partitions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct PartitionTable {
    /// Disk identifier. A UUID for GPT, an 8 digit hex identifier for DOS.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<OsUuid>,

    #[serde(default, rename = "type")]
    pub table_type: PartitionTableType,

    #[serde(default)]
    pub size: ByteCount,

    #[serde(default)]
    pub partitions: Vec<Partition>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Partition {
    pub size: ByteCount,

    #[serde(rename = "type")]
    pub partition_type: PartitionType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uuid: Option<Uuid>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub bootable: bool,

    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "serde_yaml::with::singleton_map"
    )]
    pub payload: Option<Payload>,
}

impl Partition {
    pub fn new(size: u64, partition_type: PartitionType, payload: Option<Payload>) -> Self {
        Partition {
            size: ByteCount(size),
            partition_type,
            uuid: None,
            bootable: false,
            payload,
        }
    }

    /// Mountpoint of the filesystem in this partition, looking through an
    /// encrypted container.
    pub fn mountpoint(&self) -> Option<&str> {
        self.payload.as_ref()?.mountpoint()
    }
}

impl PartitionTable {
    pub fn new(table_type: PartitionTableType) -> Self {
        PartitionTable {
            uuid: None,
            table_type,
            size: ByteCount(0),
            partitions: Vec::new(),
        }
    }

    /// Byte offset of partition `index` from the first usable byte of the
    /// disk. Returns `None` when the index is out of range.
    pub fn start_offset(&self, index: usize) -> Option<u64> {
        if index >= self.partitions.len() {
            return None;
        }
        Some(
            GPT_HEADER_SIZE
                + self.partitions[..index]
                    .iter()
                    .map(|p| p.size.bytes())
                    .sum::<u64>(),
        )
    }

    /// Sum of all partition sizes.
    pub fn partitions_size(&self) -> u64 {
        self.partitions.iter().map(|p| p.size.bytes()).sum()
    }

    /// Size of the disk image holding this table, including the areas
    /// reserved for the partition table headers.
    pub fn image_size(&self) -> u64 {
        GPT_HEADER_SIZE + self.size.bytes() + GPT_FOOTER_SIZE
    }

    /// Every mountpoint in the table, in traversal order.
    pub fn mountpoints(&self) -> Vec<&str> {
        let mut mountpoints = Vec::new();
        let _ = self.walk(WalkOrder::PreOrder, |entity, _| {
            mountpoints.extend(entity.mountpoint());
            Ok::<_, ()>(())
        });
        mountpoints
    }

    pub fn contains_mountpoint(&self, mountpoint: &str) -> bool {
        self.mountpoints().contains(&mountpoint)
    }

    /// Index of the partition holding `mountpoint`, directly or through any
    /// container.
    pub fn partition_index_of(&self, mountpoint: &str) -> Option<usize> {
        let mut found = None;
        let _ = self.walk(WalkOrder::PreOrder, |entity, ancestors| {
            if entity.mountpoint() == Some(mountpoint) {
                if let Some(Entity::Partition(index, _)) = ancestors.first() {
                    found = Some(*index);
                }
                return Err(());
            }
            Ok(())
        });
        found
    }

    /// Index of the partition holding an LVM volume group, if any.
    pub fn volume_group_index(&self) -> Option<usize> {
        self.partitions
            .iter()
            .position(|p| matches!(container_payload(p), Some(Payload::LvmVolumeGroup(_))))
    }

    /// Index of the partition holding a btrfs volume, if any.
    pub fn btrfs_index(&self) -> Option<usize> {
        self.partitions
            .iter()
            .position(|p| matches!(container_payload(p), Some(Payload::Btrfs(_))))
    }
}

/// The payload of a partition with an encrypted container unwrapped.
pub fn container_payload(partition: &Partition) -> Option<&Payload> {
    match partition.payload.as_ref()? {
        Payload::Luks(luks) => Some(&*luks.payload),
        other => Some(other),
    }
}

/// Mutable counterpart of [`container_payload`].
pub fn container_payload_mut(partition: &mut Partition) -> Option<&mut Payload> {
    match partition.payload.as_mut()? {
        Payload::Luks(luks) => Some(&mut *luks.payload),
        other => Some(other),
    }
}
