//! Translates a finished partition table into the devices and mounts that
//! the boot configuration and filesystem stages of an image pipeline use.

use std::collections::{BTreeMap, HashSet};

use log::{debug, trace};
use serde::{Deserialize, Serialize};

use diskplan_api::{
    constants::{DISK_DEVICE_NAME, ROOT_MOUNT_POINT_PATH},
    disk::{Entity, LvmLogicalVolume, PartitionTable, Payload, WalkOrder},
    error::LayoutError,
    platform::Platform,
};
use sysdefs::filesystems::FilesystemType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    #[serde(rename = "org.osbuild.loopback")]
    Loopback,
    #[serde(rename = "org.osbuild.lvm2.lv")]
    Lvm2Lv,
}

fn is_false(value: &bool) -> bool {
    !*value
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoopbackDeviceOptions {
    pub filename: String,

    /// Let the kernel create devices for the partitions of the image.
    #[serde(default, skip_serializing_if = "is_false")]
    pub partscan: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Lvm2LvDeviceOptions {
    pub volume: String,

    /// Number of the partition holding the volume group, counted from 1.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vg_partnum: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceOptions {
    Loopback(LoopbackDeviceOptions),
    Lvm2Lv(Lvm2LvDeviceOptions),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "type")]
    pub device_type: DeviceType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,

    pub options: DeviceOptions,
}

impl Device {
    /// Loopback device over the whole disk image.
    pub fn loopback(filename: impl Into<String>) -> Self {
        Device {
            device_type: DeviceType::Loopback,
            parent: None,
            options: DeviceOptions::Loopback(LoopbackDeviceOptions {
                filename: filename.into(),
                partscan: true,
            }),
        }
    }

    /// Logical volume `volume` of the volume group on partition `partnum`.
    pub fn lvm2_lv(volume: impl Into<String>, partnum: usize) -> Self {
        Device {
            device_type: DeviceType::Lvm2Lv,
            parent: Some(DISK_DEVICE_NAME.to_owned()),
            options: DeviceOptions::Lvm2Lv(Lvm2LvDeviceOptions {
                volume: volume.into(),
                vg_partnum: Some(partnum),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MountType {
    #[serde(rename = "org.osbuild.xfs")]
    Xfs,
    #[serde(rename = "org.osbuild.ext4")]
    Ext4,
    #[serde(rename = "org.osbuild.fat")]
    Fat,
    #[serde(rename = "org.osbuild.btrfs")]
    Btrfs,
}

impl From<FilesystemType> for MountType {
    fn from(fs_type: FilesystemType) -> Self {
        match fs_type {
            FilesystemType::Xfs => MountType::Xfs,
            FilesystemType::Ext4 => MountType::Ext4,
            FilesystemType::Vfat => MountType::Fat,
            FilesystemType::Btrfs => MountType::Btrfs,
        }
    }
}

/// btrfs specific mount options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MountOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subvol: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compress: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub name: String,

    #[serde(rename = "type")]
    pub mount_type: MountType,

    /// Name of the device the filesystem lives on.
    pub source: String,

    pub target: String,

    /// Partition of `source` holding the filesystem, counted from 1. Only set
    /// for filesystems directly on a partition of the disk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<usize>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<MountOptions>,
}

/// Devices and mounts of one disk image, as handed to the pipeline builder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlattenedLayout {
    pub mounts: Vec<Mount>,
    pub devices: BTreeMap<String, Device>,
}

/// Name of the mount of `mountpoint`: `-` for `/`, the path with dashes for
/// separators otherwise.
pub fn mount_name(mountpoint: &str) -> String {
    if mountpoint == ROOT_MOUNT_POINT_PATH {
        return "-".to_owned();
    }
    mountpoint.trim_start_matches('/').replace('/', "-")
}

/// Device name of a logical volume: after its mountpoint, or after its name
/// when it has none.
fn lv_device_name(lv: &LvmLogicalVolume) -> String {
    format!("lv-for-{}", lv.mountpoint().unwrap_or(&lv.name))
}

/// Flattens `table` into the devices and mounts needed to mount the disk
/// image `filename`. Mounts are sorted by target.
///
/// Fails with `UnsupportedPayload` on entities that cannot be mounted where
/// they sit, such as encrypted containers, logical volumes without a
/// filesystem or swap, and btrfs filesystems outside a btrfs volume. Fails
/// with `MissingRequiredMount`
/// when a mountpoint the platform boots from is absent.
pub fn flatten(
    filename: &str,
    table: &PartitionTable,
    platform: &Platform,
) -> Result<(BTreeMap<String, Device>, Vec<Mount>), LayoutError> {
    let mut devices = BTreeMap::from([(DISK_DEVICE_NAME.to_owned(), Device::loopback(filename))]);
    let mut mounts = Vec::new();

    table.walk(WalkOrder::PreOrder, |entity, ancestors| {
        match (entity, ancestors) {
            (Entity::Filesystem(fs), _) if fs.fs_type == FilesystemType::Btrfs => {
                return Err(LayoutError::UnsupportedPayload(format!(
                    "btrfs filesystem at {:?} must be mounted through a subvolume",
                    fs.mountpoint
                )));
            }
            (Entity::Filesystem(fs), [Entity::Partition(index, _)]) => {
                trace!("Mounting partition {} at '{}'", index + 1, fs.mountpoint);
                mounts.push(Mount {
                    name: mount_name(&fs.mountpoint),
                    mount_type: fs.fs_type.into(),
                    source: DISK_DEVICE_NAME.to_owned(),
                    target: fs.mountpoint.clone(),
                    partition: Some(index + 1),
                    options: None,
                });
            }
            (Entity::LogicalVolume(lv), [Entity::Partition(index, _), Entity::VolumeGroup(_)]) => {
                match lv.payload {
                    Some(Payload::Filesystem(_)) | Some(Payload::Swap(_)) => {}
                    Some(ref other) => {
                        return Err(LayoutError::UnsupportedPayload(format!(
                            "{} is not supported in logical volume {:?}",
                            other.kind(),
                            lv.name
                        )));
                    }
                    None => {
                        return Err(LayoutError::UnsupportedPayload(format!(
                            "logical volume {:?} holds neither a filesystem nor swap",
                            lv.name
                        )));
                    }
                }
                devices.insert(lv_device_name(lv), Device::lvm2_lv(&lv.name, index + 1));
            }
            (Entity::Filesystem(fs), [.., Entity::LogicalVolume(lv)]) => {
                mounts.push(Mount {
                    name: mount_name(&fs.mountpoint),
                    mount_type: fs.fs_type.into(),
                    source: lv_device_name(lv),
                    target: fs.mountpoint.clone(),
                    partition: None,
                    options: None,
                });
            }
            (Entity::Subvolume(subvol), [Entity::Partition(index, _), Entity::Btrfs(_)]) => {
                mounts.push(Mount {
                    name: mount_name(&subvol.mountpoint),
                    mount_type: MountType::Btrfs,
                    source: DISK_DEVICE_NAME.to_owned(),
                    target: subvol.mountpoint.clone(),
                    partition: Some(index + 1),
                    options: Some(MountOptions {
                        subvol: Some(subvol.name.clone()),
                        compress: subvol.compress.clone(),
                    }),
                });
            }
            (Entity::Partition(..), _)
            | (Entity::Swap(_), _)
            | (Entity::VolumeGroup(_), [Entity::Partition(..)])
            | (Entity::Btrfs(_), [Entity::Partition(..)]) => {}
            (entity, ancestors) => {
                let holder = ancestors.last().map_or("partition table", |a| a.kind());
                return Err(LayoutError::UnsupportedPayload(format!(
                    "{} is not supported in {holder}",
                    entity.kind()
                )));
            }
        }
        Ok(())
    })?;

    mounts.sort_by(|a, b| a.target.cmp(&b.target));

    let targets: HashSet<&str> = mounts.iter().map(|m| m.target.as_str()).collect();
    let missing: Vec<String> = platform
        .required_mountpoints()
        .into_iter()
        .filter(|mountpoint| !targets.contains(mountpoint))
        .map(str::to_owned)
        .collect();
    if !missing.is_empty() {
        return Err(LayoutError::MissingRequiredMount { missing });
    }

    debug!(
        "Flattened partition table into {} device(s) and {} mount(s)",
        devices.len(),
        mounts.len()
    );
    Ok((devices, mounts))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use serde_json::json;

    use diskplan_api::platform::BootMode;

    use super::*;

    fn parse(yaml: &str) -> PartitionTable {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn plain_table() -> PartitionTable {
        parse(indoc! {r#"
            type: gpt
            partitions:
              - size: 1M
                type: bios-boot
              - size: 200M
                type: esp
                payload:
                  filesystem:
                    type: vfat
                    mountpoint: /boot/efi
              - size: 4G
                type: root-x86-64
                payload:
                  filesystem:
                    type: ext4
                    mountpoint: /
        "#})
    }

    #[test]
    fn test_mount_name() {
        assert_eq!(mount_name("/"), "-");
        assert_eq!(mount_name("/boot/efi"), "boot-efi");
        assert_eq!(mount_name("/var/log"), "var-log");
    }

    #[test]
    fn test_plain() {
        let (devices, mounts) =
            flatten("disk.raw", &plain_table(), &Platform::default()).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(
            serde_json::to_value(&devices).unwrap(),
            json!({
                "disk": {
                    "type": "org.osbuild.loopback",
                    "options": {"filename": "disk.raw", "partscan": true},
                },
            })
        );
        assert_eq!(
            serde_json::to_value(&mounts).unwrap(),
            json!([
                {"name": "-", "type": "org.osbuild.ext4", "source": "disk", "target": "/", "partition": 3},
                {"name": "boot-efi", "type": "org.osbuild.fat", "source": "disk", "target": "/boot/efi", "partition": 2},
            ])
        );
    }

    #[test]
    fn test_btrfs() {
        let table = parse(indoc! {r#"
            type: gpt
            partitions:
              - size: 10G
                type: linux-generic
                payload:
                  btrfs:
                    subvolumes:
                      - name: root
                        mountpoint: /
                        compress: zstd:1
                      - name: var
                        mountpoint: /var
        "#});
        let platform = Platform {
            boot_mode: BootMode::Legacy,
            ..Default::default()
        };
        let (devices, mounts) = flatten("disk.raw", &table, &platform).unwrap();
        assert_eq!(devices.len(), 1);
        assert_eq!(mounts.len(), 2);
        assert_eq!(mounts[0].partition, Some(1));
        assert_eq!(
            mounts[0].options,
            Some(MountOptions {
                subvol: Some("root".into()),
                compress: Some("zstd:1".into()),
            })
        );
        assert_eq!(mounts[1].name, "var");
        assert_eq!(
            mounts[1].options.as_ref().unwrap().subvol.as_deref(),
            Some("var")
        );
        assert!(mounts[1].options.as_ref().unwrap().compress.is_none());
    }

    #[test]
    fn test_luks_unsupported() {
        let table = parse(indoc! {r#"
            type: gpt
            partitions:
              - size: 4G
                type: root-x86-64
                payload:
                  luks:
                    payload:
                      filesystem:
                        type: xfs
                        mountpoint: /
        "#});
        assert_eq!(
            flatten("disk.raw", &table, &Platform::default()).unwrap_err(),
            LayoutError::UnsupportedPayload("luks is not supported in partition".into())
        );
    }

    #[test]
    fn test_unsupported_lv_payload() {
        let table = parse(indoc! {r#"
            type: gpt
            partitions:
              - size: 4G
                type: lvm
                payload:
                  lvm-volume-group:
                    name: rootvg
                    logicalVolumes:
                      - name: datalv
                        size: 1G
                        payload:
                          btrfs: {}
        "#});
        assert_eq!(
            flatten("disk.raw", &table, &Platform::default())
                .unwrap_err()
                .to_string(),
            r#"btrfs is not supported in logical volume "datalv""#
        );
    }

    #[test]
    fn test_lv_without_payload() {
        let table = parse(indoc! {r#"
            type: gpt
            partitions:
              - size: 4G
                type: lvm
                payload:
                  lvm-volume-group:
                    name: rootvg
                    logicalVolumes:
                      - name: rootlv
                        size: 2G
                        payload:
                          filesystem:
                            type: xfs
                            mountpoint: /
                      - name: emptylv
                        size: 1G
        "#});
        assert_eq!(
            flatten("disk.raw", &table, &Platform::default()).unwrap_err(),
            LayoutError::UnsupportedPayload(
                r#"logical volume "emptylv" holds neither a filesystem nor swap"#.into()
            )
        );
    }

    #[test]
    fn test_bare_btrfs_filesystem_rejected() {
        let table = parse(indoc! {r#"
            type: gpt
            partitions:
              - size: 4G
                type: root-x86-64
                payload:
                  filesystem:
                    type: btrfs
                    mountpoint: /
        "#});
        let platform = Platform {
            boot_mode: BootMode::Legacy,
            ..Default::default()
        };
        assert_eq!(
            flatten("disk.raw", &table, &platform).unwrap_err(),
            LayoutError::UnsupportedPayload(
                r#"btrfs filesystem at "/" must be mounted through a subvolume"#.into()
            )
        );
    }

    #[test]
    fn test_missing_required_mounts() {
        let mut table = plain_table();
        table.partitions.remove(1);
        let platform = Platform {
            boot_mode: BootMode::Uefi,
            ..Default::default()
        };
        assert_eq!(
            flatten("disk.raw", &table, &platform).unwrap_err(),
            LayoutError::MissingRequiredMount {
                missing: vec!["/boot/efi".into()],
            }
        );

        table.partitions.pop();
        assert_eq!(
            flatten("disk.raw", &table, &platform)
                .unwrap_err()
                .to_string(),
            "required mounts for boot configuration [/ /boot/efi] missing"
        );

        // Legacy boot needs no ESP
        let platform = Platform {
            boot_mode: BootMode::Legacy,
            ..Default::default()
        };
        let mut table = plain_table();
        table.partitions.remove(1);
        flatten("disk.raw", &table, &platform).unwrap();
    }
}
