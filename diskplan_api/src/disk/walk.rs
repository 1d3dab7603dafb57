//! Generic traversal of a partition table. Every algorithm that needs to
//! look at nested payloads goes through [`PartitionTable::walk`] or
//! [`PartitionTable::walk_mut`] instead of recursing by hand.

use super::{
    btrfs::{Btrfs, BtrfsSubvolume},
    lvm::{LvmLogicalVolume, LvmVolumeGroup},
    payload::{Filesystem, Luks, Payload, Swap},
    Partition, PartitionTable,
};

/// Whether a node is visited before or after its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOrder {
    PreOrder,
    PostOrder,
}

/// Read-only view of one node of the table. Partitions carry their
/// zero-based position in the table.
#[derive(Debug, Clone, Copy)]
pub enum Entity<'a> {
    Partition(usize, &'a Partition),
    Filesystem(&'a Filesystem),
    VolumeGroup(&'a LvmVolumeGroup),
    LogicalVolume(&'a LvmLogicalVolume),
    Btrfs(&'a Btrfs),
    Subvolume(&'a BtrfsSubvolume),
    Swap(&'a Swap),
    Luks(&'a Luks),
}

/// Mutable view of one node of the table.
#[derive(Debug)]
pub enum EntityMut<'a> {
    Partition(usize, &'a mut Partition),
    Filesystem(&'a mut Filesystem),
    VolumeGroup(&'a mut LvmVolumeGroup),
    LogicalVolume(&'a mut LvmLogicalVolume),
    Btrfs(&'a mut Btrfs),
    Subvolume(&'a mut BtrfsSubvolume),
    Swap(&'a mut Swap),
    Luks(&'a mut Luks),
}

impl<'a> Entity<'a> {
    fn from_payload(payload: &'a Payload) -> Self {
        match payload {
            Payload::Filesystem(fs) => Entity::Filesystem(fs),
            Payload::LvmVolumeGroup(vg) => Entity::VolumeGroup(vg),
            Payload::Btrfs(btrfs) => Entity::Btrfs(btrfs),
            Payload::Swap(swap) => Entity::Swap(swap),
            Payload::Luks(luks) => Entity::Luks(luks),
        }
    }

    /// Mountpoint of a mountable node: a filesystem or a btrfs subvolume.
    pub fn mountpoint(&self) -> Option<&'a str> {
        match *self {
            Entity::Filesystem(fs) => Some(&fs.mountpoint),
            Entity::Subvolume(subvol) => Some(&subvol.mountpoint),
            _ => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Entity::Partition(..) => "partition",
            Entity::Filesystem(_) => "filesystem",
            Entity::VolumeGroup(_) => "lvm-volume-group",
            Entity::LogicalVolume(_) => "lvm-logical-volume",
            Entity::Btrfs(_) => "btrfs",
            Entity::Subvolume(_) => "btrfs-subvolume",
            Entity::Swap(_) => "swap",
            Entity::Luks(_) => "luks",
        }
    }

    fn children(&self) -> Vec<Entity<'a>> {
        match *self {
            Entity::Partition(_, partition) => {
                partition.payload.iter().map(Entity::from_payload).collect()
            }
            Entity::VolumeGroup(vg) => vg
                .logical_volumes
                .iter()
                .map(Entity::LogicalVolume)
                .collect(),
            Entity::LogicalVolume(lv) => lv.payload.iter().map(Entity::from_payload).collect(),
            Entity::Btrfs(btrfs) => btrfs.subvolumes.iter().map(Entity::Subvolume).collect(),
            Entity::Luks(luks) => vec![Entity::from_payload(&luks.payload)],
            Entity::Filesystem(_) | Entity::Subvolume(_) | Entity::Swap(_) => Vec::new(),
        }
    }
}

impl PartitionTable {
    /// Visits every node of the table in partition order. The visitor
    /// receives the node and its ancestors, outermost first. The first error
    /// returned by the visitor stops the walk.
    pub fn walk<'a, E, F>(&'a self, order: WalkOrder, mut visitor: F) -> Result<(), E>
    where
        F: FnMut(Entity<'a>, &[Entity<'a>]) -> Result<(), E>,
    {
        let mut ancestors = Vec::new();
        for (index, partition) in self.partitions.iter().enumerate() {
            walk_entity(
                Entity::Partition(index, partition),
                order,
                &mut ancestors,
                &mut visitor,
            )?;
        }
        Ok(())
    }

    /// Visits every node of the table mutably. Post-order lets a container
    /// see the final state of its children.
    pub fn walk_mut<E, F>(&mut self, order: WalkOrder, mut visitor: F) -> Result<(), E>
    where
        F: FnMut(EntityMut<'_>) -> Result<(), E>,
    {
        for (index, partition) in self.partitions.iter_mut().enumerate() {
            if order == WalkOrder::PreOrder {
                visitor(EntityMut::Partition(index, &mut *partition))?;
            }
            if let Some(payload) = partition.payload.as_mut() {
                walk_payload_mut(payload, order, &mut visitor)?;
            }
            if order == WalkOrder::PostOrder {
                visitor(EntityMut::Partition(index, &mut *partition))?;
            }
        }
        Ok(())
    }
}

fn walk_entity<'a, E, F>(
    entity: Entity<'a>,
    order: WalkOrder,
    ancestors: &mut Vec<Entity<'a>>,
    visitor: &mut F,
) -> Result<(), E>
where
    F: FnMut(Entity<'a>, &[Entity<'a>]) -> Result<(), E>,
{
    if order == WalkOrder::PreOrder {
        visitor(entity, ancestors)?;
    }

    ancestors.push(entity);
    for child in entity.children() {
        walk_entity(child, order, ancestors, visitor)?;
    }
    ancestors.pop();

    if order == WalkOrder::PostOrder {
        visitor(entity, ancestors)?;
    }
    Ok(())
}

fn walk_payload_mut<E, F>(payload: &mut Payload, order: WalkOrder, visitor: &mut F) -> Result<(), E>
where
    F: FnMut(EntityMut<'_>) -> Result<(), E>,
{
    let pre = order == WalkOrder::PreOrder;
    match payload {
        Payload::Filesystem(fs) => visitor(EntityMut::Filesystem(fs)),
        Payload::Swap(swap) => visitor(EntityMut::Swap(swap)),
        Payload::LvmVolumeGroup(vg) => {
            if pre {
                visitor(EntityMut::VolumeGroup(&mut *vg))?;
            }
            for lv in vg.logical_volumes.iter_mut() {
                if pre {
                    visitor(EntityMut::LogicalVolume(&mut *lv))?;
                }
                if let Some(inner) = lv.payload.as_mut() {
                    walk_payload_mut(inner, order, visitor)?;
                }
                if !pre {
                    visitor(EntityMut::LogicalVolume(&mut *lv))?;
                }
            }
            if !pre {
                visitor(EntityMut::VolumeGroup(&mut *vg))?;
            }
            Ok(())
        }
        Payload::Btrfs(btrfs) => {
            if pre {
                visitor(EntityMut::Btrfs(&mut *btrfs))?;
            }
            for subvol in btrfs.subvolumes.iter_mut() {
                visitor(EntityMut::Subvolume(subvol))?;
            }
            if !pre {
                visitor(EntityMut::Btrfs(&mut *btrfs))?;
            }
            Ok(())
        }
        Payload::Luks(luks) => {
            if pre {
                visitor(EntityMut::Luks(&mut *luks))?;
            }
            walk_payload_mut(&mut luks.payload, order, visitor)?;
            if !pre {
                visitor(EntityMut::Luks(&mut *luks))?;
            }
            Ok(())
        }
    }
}
