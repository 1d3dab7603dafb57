//! Builds finished partition tables: from a template merged with requested
//! mountpoints, or from scratch out of a partitioning customization.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use rand::RngCore;

use diskplan_api::{
    config::{default_required_sizes, ImageProfile, PartitioningMode},
    constants::{
        BOOT_MOUNT_POINT_PATH, BOOT_PARTITION_SIZE, ESP_FSTAB_OPTIONS, ESP_LABEL,
        ESP_MOUNT_POINT_PATH, ESP_PARTITION_SIZE, PARTITION_GRAIN, ROOT_MOUNT_POINT_PATH,
        USR_MOUNT_POINT_PATH,
    },
    customizations::{validate_filesystem_customizations, FilesystemCustomization},
    disk::{
        container_payload_mut, validation::PLAIN_ONLY_MOUNTPOINTS, Filesystem, Partition,
        PartitionTable, Payload,
    },
    error::LayoutError,
    primitives::bytes::{align_up, ByteCount},
};
use sysdefs::{
    arch::SystemArchitecture, filesystems::FilesystemType, partition_types::PartitionType,
};

use crate::idgen::IdGenerator;

mod convert;
mod custom;
mod sizing;

pub use custom::{new_custom_partition_table, CustomOptions};

/// Knobs of [`build`] that come from the image profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOptions {
    pub mode: PartitioningMode,

    /// Minimum directory sizes. `None` means the distribution defaults.
    pub required_sizes: Option<BTreeMap<String, ByteCount>>,

    /// Filesystem of new mountpoints without an explicit type.
    pub default_fs_type: FilesystemType,

    pub arch: SystemArchitecture,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            mode: PartitioningMode::default(),
            required_sizes: None,
            default_fs_type: FilesystemType::Xfs,
            arch: SystemArchitecture::default(),
        }
    }
}

impl From<&ImageProfile> for BuildOptions {
    fn from(profile: &ImageProfile) -> Self {
        Self {
            mode: profile.partitioning_mode,
            required_sizes: Some(profile.required_sizes.clone()),
            default_fs_type: profile.default_fs_type,
            arch: profile.platform.arch,
        }
    }
}

/// Builds a finished table out of `base` and the requested mountpoints.
///
/// `base` is not modified. Mountpoints it already has are grown to their
/// requested size, new ones are added as plain partitions, logical volumes
/// or btrfs subvolumes depending on `options.mode` and on what the template
/// holds. The partitions then grow to `target_min_size` and identifiers are
/// drawn from `ids`.
pub fn build<R: RngCore>(
    base: &PartitionTable,
    customizations: &[FilesystemCustomization],
    target_min_size: u64,
    options: &BuildOptions,
    ids: &mut IdGenerator<R>,
) -> Result<PartitionTable, LayoutError> {
    validate_filesystem_customizations(customizations)?;
    base.validate_structure()?;

    let mut table = base.clone();
    let new_mountpoints: Vec<&FilesystemCustomization> = customizations
        .iter()
        .filter(|custom| !table.contains_mountpoint(&custom.mountpoint))
        .collect();
    let needs_container = new_mountpoints
        .iter()
        .any(|custom| !PLAIN_ONLY_MOUNTPOINTS.contains(&custom.mountpoint.as_str()));
    debug!(
        "Building partition table in {} mode with {} new mountpoint(s)",
        options.mode,
        new_mountpoints.len()
    );

    let has_lvm = table.volume_group_index().is_some();
    let has_btrfs = table.btrfs_index().is_some();
    match options.mode {
        PartitioningMode::Raw if has_lvm => {
            return Err(LayoutError::UnsupportedCombination(
                "partitioning mode raw is not supported for a partition table with lvm".into(),
            ));
        }
        PartitioningMode::Raw => {}
        PartitioningMode::Lvm | PartitioningMode::AutoLvm => {
            if options.mode == PartitioningMode::Lvm || needs_container {
                if has_btrfs {
                    return Err(LayoutError::UnsupportedCombination(format!(
                        "partitioning mode {} is not supported for a partition table with btrfs",
                        options.mode
                    )));
                }
                convert::ensure_lvm(&mut table, options.default_fs_type)?;
            }
        }
        PartitioningMode::Btrfs => {
            if has_lvm {
                return Err(LayoutError::UnsupportedCombination(
                    "partitioning mode btrfs is not supported for a partition table with lvm"
                        .into(),
                ));
            }
            convert::ensure_btrfs(&mut table, options.default_fs_type)?;
        }
    }

    for custom in new_mountpoints {
        // Conversions may have added /boot already
        if table.contains_mountpoint(&custom.mountpoint) {
            continue;
        }
        create_mountpoint(&mut table, custom, options)?;
    }

    let mut minimums = sizing::Minimums::new();
    for custom in customizations {
        sizing::raise(&mut minimums, &custom.mountpoint, custom.min_size.bytes());
    }
    let required_sizes = options
        .required_sizes
        .clone()
        .unwrap_or_else(default_required_sizes);
    sizing::charge_required_sizes(&table, &required_sizes, &mut minimums);

    let target = target_min_size.max(base.size.bytes());
    let table = sizing::finalize(table, &minimums, target, ids)?;
    info!(
        "Built partition table with {} partitions, {} in total",
        table.partitions.len(),
        table.size
    );
    Ok(table)
}

/// Adds a new mountpoint in the place `options.mode` and the table call for.
fn create_mountpoint(
    table: &mut PartitionTable,
    custom: &FilesystemCustomization,
    options: &BuildOptions,
) -> Result<(), LayoutError> {
    let mountpoint = custom.mountpoint.as_str();
    let fs_type = custom.fs_type.unwrap_or(options.default_fs_type);

    if options.mode != PartitioningMode::Raw && !PLAIN_ONLY_MOUNTPOINTS.contains(&mountpoint) {
        if let Some(index) = table.volume_group_index() {
            if let Some(Payload::LvmVolumeGroup(vg)) =
                container_payload_mut(&mut table.partitions[index])
            {
                let lv = vg.create_logical_volume(mountpoint, fs_type, custom.min_size.bytes())?;
                debug!("Created logical volume '{}' for '{mountpoint}'", lv.name);
                if let Some(Payload::Filesystem(fs)) = lv.payload.as_mut() {
                    fs.label = custom.label.clone();
                }
                return Ok(());
            }
        }

        if let Some(index) = table.btrfs_index() {
            if let Some(Payload::Btrfs(btrfs)) = container_payload_mut(&mut table.partitions[index])
            {
                if custom.fs_type.is_some_and(|t| t != FilesystemType::Btrfs) {
                    warn!("Ignoring filesystem type {fs_type} of btrfs subvolume '{mountpoint}'");
                }
                let subvol = btrfs.create_subvolume(mountpoint, custom.min_size.bytes())?;
                debug!("Created btrfs subvolume '{}' for '{mountpoint}'", subvol.name);
                return Ok(());
            }
        }
    }

    debug!("Creating plain partition for '{mountpoint}'");
    insert_partition(
        table,
        plain_partition(custom, options.default_fs_type, options.arch),
    );
    Ok(())
}

/// Inserts a partition right before the one holding `/`, or at the end.
fn insert_partition(table: &mut PartitionTable, partition: Partition) {
    let index = table
        .partition_index_of(ROOT_MOUNT_POINT_PATH)
        .unwrap_or(table.partitions.len());
    table.partitions.insert(index, partition);
}

/// A partition holding one filesystem. The partition type follows the
/// mountpoint.
fn plain_partition(
    custom: &FilesystemCustomization,
    default_fs_type: FilesystemType,
    arch: SystemArchitecture,
) -> Partition {
    let mountpoint = custom.mountpoint.as_str();
    if mountpoint == ESP_MOUNT_POINT_PATH {
        return esp_partition(custom.min_size.bytes());
    }

    let partition_type = match mountpoint {
        ROOT_MOUNT_POINT_PATH => arch.root_partition_type(),
        USR_MOUNT_POINT_PATH => arch.usr_partition_type(),
        BOOT_MOUNT_POINT_PATH => PartitionType::Xbootldr,
        _ => PartitionType::LinuxGeneric,
    };

    let mut filesystem = Filesystem::new(custom.fs_type.unwrap_or(default_fs_type), mountpoint);
    filesystem.label = custom.label.clone();
    let size = align_up(
        custom.min_size.bytes().max(filesystem.min_size()),
        PARTITION_GRAIN,
    );

    Partition::new(size, partition_type, Some(Payload::Filesystem(filesystem)))
}

/// An EFI system partition of at least `min_size` bytes.
fn esp_partition(min_size: u64) -> Partition {
    let mut filesystem = Filesystem::new(FilesystemType::Vfat, ESP_MOUNT_POINT_PATH);
    filesystem.label = Some(ESP_LABEL.to_owned());
    filesystem.fstab_options = ESP_FSTAB_OPTIONS.to_owned();

    Partition::new(
        align_up(min_size.max(ESP_PARTITION_SIZE), PARTITION_GRAIN),
        PartitionType::Esp,
        Some(Payload::Filesystem(filesystem)),
    )
}

/// A `/boot` partition. Boot loaders read xfs and ext4 only, anything else
/// falls back to xfs.
fn boot_partition(default_fs_type: FilesystemType) -> Partition {
    let fs_type = match default_fs_type {
        FilesystemType::Ext4 => FilesystemType::Ext4,
        _ => FilesystemType::Xfs,
    };
    let mut custom = FilesystemCustomization::new(BOOT_MOUNT_POINT_PATH, BOOT_PARTITION_SIZE);
    custom.fs_type = Some(fs_type);
    plain_partition(&custom, fs_type, SystemArchitecture::default())
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use diskplan_api::{
        disk::LvmVolumeGroup,
        primitives::bytes::{GIBIBYTE, MEBIBYTE},
    };

    use super::*;

    fn base() -> PartitionTable {
        serde_yaml::from_str(indoc! {r#"
            type: gpt
            partitions:
              - size: 1M
                type: bios-boot
                bootable: true
              - size: 200M
                type: esp
                payload:
                  filesystem:
                    type: vfat
                    mountpoint: /boot/efi
                    label: ESP
                    fstabOptions: defaults,uid=0,gid=0,umask=077,shortname=winnt
                    fstabPassNo: 2
              - size: 500M
                type: xbootldr
                payload:
                  filesystem:
                    type: xfs
                    mountpoint: /boot
              - size: 2G
                type: root-x86-64
                payload:
                  filesystem:
                    type: xfs
                    mountpoint: /
        "#})
        .unwrap()
    }

    fn options(mode: PartitioningMode) -> BuildOptions {
        BuildOptions {
            mode,
            ..Default::default()
        }
    }

    #[test]
    fn test_no_customizations() {
        let base = base();
        let table = build(
            &base,
            &[],
            GIBIBYTE,
            &options(PartitioningMode::AutoLvm),
            &mut IdGenerator::from_seed(0),
        )
        .unwrap();

        // Nothing converted, nothing shrunk
        assert_eq!(table.partitions.len(), 4);
        assert_eq!(table.partitions[3].partition_type, PartitionType::RootAmd64);
        assert_eq!(table.partitions[3].size, ByteCount(3 * GIBIBYTE));
        assert_eq!(table.size.bytes(), table.partitions_size());
        assert_eq!(
            table.size,
            ByteCount(MEBIBYTE + 200 * MEBIBYTE + 500 * MEBIBYTE + 3 * GIBIBYTE)
        );
    }

    #[test]
    fn test_base_unmodified() {
        let base = base();
        let before = base.clone();
        build(
            &base,
            &[FilesystemCustomization::new("/var", GIBIBYTE)],
            10 * GIBIBYTE,
            &options(PartitioningMode::Lvm),
            &mut IdGenerator::from_seed(0),
        )
        .unwrap();
        assert_eq!(base, before);
    }

    #[test]
    fn test_raw_mode() {
        let table = build(
            &base(),
            &[FilesystemCustomization::new("/data", 5 * GIBIBYTE)],
            10 * GIBIBYTE,
            &options(PartitioningMode::Raw),
            &mut IdGenerator::from_seed(0),
        )
        .unwrap();

        let mountpoints: Vec<_> = table
            .partitions
            .iter()
            .map(|p| p.mountpoint().unwrap_or("-"))
            .collect();
        assert_eq!(mountpoints, vec!["-", "/boot/efi", "/boot", "/data", "/"]);
        assert_eq!(table.partitions[3].size, ByteCount(5 * GIBIBYTE));
        assert_eq!(table.partitions[3].partition_type, PartitionType::LinuxGeneric);
        assert_eq!(table.size, ByteCount(10 * GIBIBYTE));
        assert_eq!(
            table.partitions[4].size,
            ByteCount(10 * GIBIBYTE - 5 * GIBIBYTE - 701 * MEBIBYTE)
        );
    }

    #[test]
    fn test_lvm_mode() {
        let table = build(
            &base(),
            &[FilesystemCustomization::new("/foo", 2 * GIBIBYTE)],
            10 * GIBIBYTE,
            &options(PartitioningMode::Lvm),
            &mut IdGenerator::from_seed(0),
        )
        .unwrap();

        assert_eq!(table.partitions.len(), 4);
        assert_eq!(table.size, ByteCount(10 * GIBIBYTE));
        let root = &table.partitions[3];
        assert_eq!(root.partition_type, PartitionType::Lvm);
        assert_eq!(root.size, ByteCount(10 * GIBIBYTE - 701 * MEBIBYTE));

        let Some(Payload::LvmVolumeGroup(vg)) = &root.payload else {
            panic!("expected volume group");
        };
        let names: Vec<_> = vg.logical_volumes.iter().map(|lv| lv.name.as_str()).collect();
        assert_eq!(names, vec!["rootlv", "foolv"]);
        assert_eq!(vg.logical_volumes[1].size, ByteCount(2 * GIBIBYTE));
        assert_eq!(
            vg.logical_volumes[0].size,
            ByteCount(LvmVolumeGroup::usable_size(root.size.bytes()) - 2 * GIBIBYTE)
        );
    }

    #[test]
    fn test_auto_lvm_converts_only_for_new_mountpoints() {
        let existing = build(
            &base(),
            &[FilesystemCustomization::new("/", 4 * GIBIBYTE)],
            0,
            &options(PartitioningMode::AutoLvm),
            &mut IdGenerator::from_seed(0),
        )
        .unwrap();
        assert!(existing.volume_group_index().is_none());
        assert_eq!(existing.partitions[3].size, ByteCount(4 * GIBIBYTE));

        let converted = build(
            &base(),
            &[FilesystemCustomization::new("/home", GIBIBYTE)],
            0,
            &options(PartitioningMode::AutoLvm),
            &mut IdGenerator::from_seed(0),
        )
        .unwrap();
        assert_eq!(converted.volume_group_index(), Some(3));
    }

    #[test]
    fn test_boot_stays_plain() {
        let mut base = base();
        base.partitions.remove(2);
        let table = build(
            &base,
            &[FilesystemCustomization::new("/boot", 600 * MEBIBYTE)],
            0,
            &options(PartitioningMode::AutoLvm),
            &mut IdGenerator::from_seed(0),
        )
        .unwrap();
        assert!(table.volume_group_index().is_none());
        assert_eq!(table.partitions[2].mountpoint(), Some("/boot"));
        assert_eq!(table.partitions[2].partition_type, PartitionType::Xbootldr);
        assert_eq!(table.partitions[2].size, ByteCount(600 * MEBIBYTE));
    }

    #[test]
    fn test_btrfs_mode() {
        let table = build(
            &base(),
            &[FilesystemCustomization::new("/home", GIBIBYTE)],
            8 * GIBIBYTE,
            &options(PartitioningMode::Btrfs),
            &mut IdGenerator::from_seed(0),
        )
        .unwrap();

        let index = table.btrfs_index().unwrap();
        let Some(Payload::Btrfs(btrfs)) = &table.partitions[index].payload else {
            panic!("expected btrfs");
        };
        let names: Vec<_> = btrfs.subvolumes.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["root", "/home"]);
        assert_eq!(btrfs.size, table.partitions[index].size);
        assert_eq!(table.size, ByteCount(8 * GIBIBYTE));
    }

    #[test]
    fn test_unsupported_combinations() {
        let lvm = build(
            &base(),
            &[],
            0,
            &options(PartitioningMode::Lvm),
            &mut IdGenerator::from_seed(0),
        )
        .unwrap();

        for mode in [PartitioningMode::Raw, PartitioningMode::Btrfs] {
            let err = build(&lvm, &[], 0, &options(mode), &mut IdGenerator::from_seed(0))
                .unwrap_err();
            assert!(matches!(err, LayoutError::UnsupportedCombination(_)), "{mode}");
        }

        let btrfs = build(
            &base(),
            &[],
            0,
            &options(PartitioningMode::Btrfs),
            &mut IdGenerator::from_seed(0),
        )
        .unwrap();
        let err = build(
            &btrfs,
            &[FilesystemCustomization::new("/var", GIBIBYTE)],
            0,
            &options(PartitioningMode::AutoLvm),
            &mut IdGenerator::from_seed(0),
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "partitioning mode auto-lvm is not supported for a partition table with btrfs"
        );
    }

    #[test]
    fn test_invalid_customizations() {
        let err = build(
            &base(),
            &[
                FilesystemCustomization::new("/data", GIBIBYTE),
                FilesystemCustomization::new("/data", GIBIBYTE),
            ],
            0,
            &options(PartitioningMode::Raw),
            &mut IdGenerator::from_seed(0),
        )
        .unwrap_err();
        assert_eq!(
            err,
            LayoutError::DuplicateName(
                r#"duplicate mountpoint "/data" in filesystem customizations"#.into()
            )
        );

        let err = build(
            &base(),
            &[FilesystemCustomization::new("/home/../data", GIBIBYTE)],
            0,
            &options(PartitioningMode::Raw),
            &mut IdGenerator::from_seed(0),
        )
        .unwrap_err();
        assert!(matches!(err, LayoutError::InvalidMountpoint(_)));
    }

    #[test]
    fn test_deterministic() {
        let customizations = [FilesystemCustomization::new("/var/log", GIBIBYTE)];
        let build_with = |seed| {
            build(
                &base(),
                &customizations,
                10 * GIBIBYTE,
                &options(PartitioningMode::Lvm),
                &mut IdGenerator::from_seed(seed),
            )
            .unwrap()
        };
        assert_eq!(build_with(42), build_with(42));
        assert_ne!(build_with(42), build_with(43));
    }
}
