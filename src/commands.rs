//! Execution of the command line subcommands.

use log::{debug, info};
use rand::RngCore;

use diskplan_api::{
    config::ImageProfile,
    customizations::{validate_filesystem_customizations, Customizations},
    disk::PartitionTable,
    error::{ConfigError, DiskPlanError, DiskPlanResultExt, LayoutError},
    pathpolicy::{
        check_mountpoints_policy, check_partitioning_policy, PathPolicies, MOUNTPOINT_POLICIES,
    },
    platform::Platform,
};

use crate::{
    allocator::{self, BuildOptions, CustomOptions},
    cli::{Commands, DocumentKind},
    documents::{load_customizations, load_partition_table, load_profile, write_output},
    flatten::{flatten, FlattenedLayout},
    idgen::{resolve_seed, IdGenerator},
};

pub fn run(command: &Commands) -> Result<(), DiskPlanError> {
    match command {
        Commands::Build {
            profile,
            customizations,
            seed,
            output,
            format,
        } => {
            let profile = load_profile(profile)?;
            let customizations = match customizations {
                Some(path) => load_customizations(path)?,
                None => Customizations::default(),
            };
            let mut ids = IdGenerator::from_seed(resolve_seed(*seed)?);
            let table = build_table(&profile, &customizations, &mut ids)?;
            write_output(&table, *format, output.as_deref())
        }

        Commands::Custom {
            customizations,
            boot_mode,
            uefi_vendor,
            table_type,
            arch,
            fs_type,
            seed,
            output,
            format,
        } => {
            let customizations = load_customizations(customizations)?;
            let Some(partitioning) = customizations.partitioning else {
                return Err(DiskPlanError::new(ConfigError::MissingPartitioning))
                    .message("The custom command needs a partitioning section");
            };
            check_partitioning_policy(&partitioning, &MOUNTPOINT_POLICIES)
                .message("Partitioning customizations violate the mountpoint policy")?;

            let options = CustomOptions {
                platform: Platform {
                    arch: (*arch).into(),
                    boot_mode: (*boot_mode).into(),
                    uefi_vendor: uefi_vendor.clone(),
                },
                table_type: (*table_type).into(),
                default_fs_type: (*fs_type).into(),
                required_sizes: None,
            };
            let mut ids = IdGenerator::from_seed(resolve_seed(*seed)?);
            let table = allocator::new_custom_partition_table(&partitioning, &options, &mut ids)
                .message("Failed to create partition table from partitioning customizations")?;
            write_output(&table, *format, output.as_deref())
        }

        Commands::Flatten {
            table,
            image,
            boot_mode,
            uefi_vendor,
            output,
            format,
        } => {
            let table = load_partition_table(table)?;
            table.validate().message("Partition table is invalid")?;

            let platform = Platform {
                boot_mode: (*boot_mode).into(),
                uefi_vendor: uefi_vendor.clone(),
                ..Default::default()
            };
            let (devices, mounts) = flatten(image, &table, &platform)
                .message("Failed to flatten partition table")?;
            write_output(&FlattenedLayout { mounts, devices }, *format, output.as_deref())
        }

        Commands::Check {
            customizations,
            profile,
        } => {
            let customizations = load_customizations(customizations)?;
            let policy = match profile {
                Some(path) => load_profile(path)?.mountpoint_policy,
                None => MOUNTPOINT_POLICIES.clone(),
            };
            check_customizations(&customizations, &policy)
                .message("Customizations failed the policy check")?;
            info!("Customizations passed the policy check");
            Ok(())
        }

        Commands::Validate { path, kind } => {
            match kind {
                DocumentKind::Table => {
                    load_partition_table(path)?
                        .validate()
                        .message("Partition table is invalid")?;
                }
                DocumentKind::Profile => {
                    load_profile(path)?;
                }
                DocumentKind::Customizations => {
                    validate_customizations(&load_customizations(path)?)
                        .message("Customizations are invalid")?;
                }
            }
            info!("'{}' is valid", path.display());
            Ok(())
        }
    }
}

/// Builds the partition table of one image. A partitioning section replaces
/// the profile's base table; otherwise the plain mountpoint requests are
/// merged into it.
pub fn build_table<R: RngCore>(
    profile: &ImageProfile,
    customizations: &Customizations,
    ids: &mut IdGenerator<R>,
) -> Result<PartitionTable, DiskPlanError> {
    let Some(partitioning) = &customizations.partitioning else {
        check_mountpoints_policy(&customizations.filesystem, &profile.mountpoint_policy)
            .message("Filesystem customizations violate the mountpoint policy")?;
        return allocator::build(
            &profile.base_partition_table,
            &customizations.filesystem,
            profile.min_size.bytes(),
            &BuildOptions::from(profile),
            ids,
        )
        .message("Failed to build partition table");
    };

    if !customizations.filesystem.is_empty() {
        return Err(DiskPlanError::new(LayoutError::UnsupportedCombination(
            "filesystem and partitioning customizations cannot be combined".into(),
        )))
        .message("Invalid customizations");
    }

    check_partitioning_policy(partitioning, &profile.mountpoint_policy)
        .message("Partitioning customizations violate the mountpoint policy")?;

    debug!("Replacing the base partition table with partitioning customizations");
    let options = CustomOptions {
        platform: profile.platform.clone(),
        table_type: profile.base_partition_table.table_type,
        default_fs_type: profile.default_fs_type,
        required_sizes: Some(profile.required_sizes.clone()),
    };
    allocator::new_custom_partition_table(partitioning, &options, ids)
        .message("Failed to create partition table from partitioning customizations")
}

/// Structural checks of both customization sections, all violations at once.
fn validate_customizations(customizations: &Customizations) -> Result<(), LayoutError> {
    let mut errors = Vec::new();
    errors.extend(validate_filesystem_customizations(&customizations.filesystem).err());
    if let Some(partitioning) = &customizations.partitioning {
        errors.extend(partitioning.validate().err());
    }
    LayoutError::collect(errors).map_or(Ok(()), Err)
}

/// Structural and policy checks, all violations at once.
fn check_customizations(
    customizations: &Customizations,
    policy: &PathPolicies,
) -> Result<(), LayoutError> {
    let mut errors = Vec::new();
    errors.extend(validate_customizations(customizations).err());
    errors.extend(check_mountpoints_policy(&customizations.filesystem, policy).err());
    if let Some(partitioning) = &customizations.partitioning {
        errors.extend(check_partitioning_policy(partitioning, policy).err());
    }
    LayoutError::collect(errors).map_or(Ok(()), Err)
}

#[cfg(test)]
mod tests {
    use std::{
        fs,
        path::{Path, PathBuf},
    };

    use indoc::indoc;
    use tempfile::tempdir;

    use diskplan_api::{
        disk::Payload,
        error::ErrorKind,
        primitives::bytes::{ByteCount, GIBIBYTE},
    };

    use crate::cli::{ArchArg, BootModeArg, FsTypeArg, OutputFormat, TableTypeArg};

    use super::*;

    const PROFILE: &str = indoc! {r#"
        name: minimal-raw
        minSize: 4G
        partitioningMode: auto-lvm
        platform:
          bootMode: uefi
        basePartitionTable:
          type: gpt
          partitions:
            - size: 200M
              type: esp
              payload:
                filesystem:
                  type: vfat
                  mountpoint: /boot/efi
            - size: 2G
              type: root-x86-64
              payload:
                filesystem:
                  type: xfs
                  mountpoint: /
    "#};

    fn write(dir: &Path, name: &str, contents: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, contents).unwrap();
        path
    }

    /// Path of a file in the same directory as `sibling`.
    fn beside(sibling: &Path, name: &str) -> PathBuf {
        sibling.with_file_name(name)
    }

    #[test]
    fn test_build_and_flatten() {
        let dir = tempdir().unwrap();
        let profile = write(dir.path(), "profile.yaml", PROFILE);
        let customizations = write(
            dir.path(),
            "blueprint.yaml",
            indoc! {r#"
                filesystem:
                  - mountpoint: /var/log
                    minsize: 1G
            "#},
        );
        let table_path = beside(&profile, "table.yaml");

        run(&Commands::Build {
            profile,
            customizations: Some(customizations),
            seed: Some(42),
            output: Some(table_path.clone()),
            format: OutputFormat::Yaml,
        })
        .unwrap();

        let table = load_partition_table(&table_path).unwrap();
        table.validate().unwrap();
        assert!(table.contains_mountpoint("/var/log"));
        assert!(table.contains_mountpoint("/boot"));
        assert!(table.volume_group_index().is_some());
        assert!(table.size >= ByteCount(4 * GIBIBYTE));

        let layout_path = beside(&table_path, "layout.json");
        run(&Commands::Flatten {
            table: table_path,
            image: "image.raw".into(),
            boot_mode: BootModeArg::Uefi,
            uefi_vendor: None,
            output: Some(layout_path.clone()),
            format: OutputFormat::Json,
        })
        .unwrap();

        let layout: FlattenedLayout =
            serde_json::from_str(&fs::read_to_string(layout_path).unwrap()).unwrap();
        let targets: Vec<&str> = layout.mounts.iter().map(|m| m.target.as_str()).collect();
        assert_eq!(targets, ["/", "/boot", "/boot/efi", "/var/log"]);
        assert!(layout.devices.contains_key("disk"));
        assert!(layout.devices.contains_key("lv-for-/"));
        assert!(layout.devices.contains_key("lv-for-/var/log"));
    }

    #[test]
    fn test_yaml_and_json_documents_agree() {
        let dir = tempdir().unwrap();
        let yaml_profile = write(dir.path(), "profile.yaml", PROFILE);
        let json_profile = write(
            dir.path(),
            "profile.json",
            r#"{
                "name": "minimal-raw",
                "minSize": "4G",
                "partitioningMode": "auto-lvm",
                "platform": {"bootMode": "uefi"},
                "basePartitionTable": {
                    "type": "gpt",
                    "partitions": [
                        {"size": "200M", "type": "esp",
                         "payload": {"filesystem": {"type": "vfat", "mountpoint": "/boot/efi"}}},
                        {"size": "2G", "type": "root-x86-64",
                         "payload": {"filesystem": {"type": "xfs", "mountpoint": "/"}}}
                    ]
                }
            }"#,
        );
        let profile = load_profile(&yaml_profile).unwrap();
        assert_eq!(load_profile(&json_profile).unwrap(), profile);
        let built = build_table(
            &profile,
            &Customizations::default(),
            &mut IdGenerator::from_seed(3),
        )
        .unwrap();
        assert!(built.contains_mountpoint("/boot/efi"));

        let yaml_table = write(
            dir.path(),
            "table.yaml",
            indoc! {r#"
                type: gpt
                partitions:
                  - size: 200M
                    type: esp
                    payload:
                      filesystem:
                        type: vfat
                        mountpoint: /boot/efi
                  - size: 1G
                    type: xbootldr
                    payload:
                      filesystem:
                        type: xfs
                        mountpoint: /boot
                  - size: 8G
                    type: lvm
                    payload:
                      lvm-volume-group:
                        name: rootvg
                        logicalVolumes:
                          - name: rootlv
                            size: 4G
                            payload:
                              filesystem:
                                type: xfs
                                mountpoint: /
                          - name: swaplv
                            size: 1G
                            payload:
                              swap: {}
            "#},
        );
        let json_table = write(
            dir.path(),
            "table.json",
            r#"{"type": "gpt", "partitions": [
                {"size": "200M", "type": "esp",
                 "payload": {"filesystem": {"type": "vfat", "mountpoint": "/boot/efi"}}},
                {"size": "1G", "type": "xbootldr",
                 "payload": {"filesystem": {"type": "xfs", "mountpoint": "/boot"}}},
                {"size": "8G", "type": "lvm",
                 "payload": {"lvm-volume-group": {"name": "rootvg", "logicalVolumes": [
                    {"name": "rootlv", "size": "4G",
                     "payload": {"filesystem": {"type": "xfs", "mountpoint": "/"}}},
                    {"name": "swaplv", "size": "1G", "payload": {"swap": {}}}
                 ]}}}
            ]}"#,
        );
        assert_eq!(
            load_partition_table(&yaml_table).unwrap(),
            load_partition_table(&json_table).unwrap()
        );

        let mut layouts = Vec::new();
        for table in [yaml_table, json_table] {
            let output = beside(&table, "layout.json");
            run(&Commands::Flatten {
                table,
                image: "disk.raw".into(),
                boot_mode: BootModeArg::Uefi,
                uefi_vendor: Some("fedora".into()),
                output: Some(output.clone()),
                format: OutputFormat::Json,
            })
            .unwrap();
            layouts.push(fs::read_to_string(output).unwrap());
        }
        assert_eq!(layouts[0], layouts[1]);

        let layout: FlattenedLayout = serde_json::from_str(&layouts[0]).unwrap();
        let devices: Vec<&str> = layout.devices.keys().map(String::as_str).collect();
        assert_eq!(devices, ["disk", "lv-for-/", "lv-for-swaplv"]);
        let targets: Vec<&str> = layout.mounts.iter().map(|m| m.target.as_str()).collect();
        assert_eq!(targets, ["/", "/boot", "/boot/efi"]);
    }

    #[test]
    fn test_build_is_reproducible() {
        let profile: ImageProfile = serde_yaml::from_str(PROFILE).unwrap();
        let customizations = Customizations::default();

        let first = build_table(&profile, &customizations, &mut IdGenerator::from_seed(5)).unwrap();
        let second =
            build_table(&profile, &customizations, &mut IdGenerator::from_seed(5)).unwrap();
        assert_eq!(first, second);
        assert!(first.uuid.is_some());
    }

    #[test]
    fn test_build_rejects_policy_violations() {
        let profile: ImageProfile = serde_yaml::from_str(PROFILE).unwrap();
        let customizations: Customizations = serde_yaml::from_str(indoc! {r#"
            filesystem:
              - mountpoint: /proc
                minsize: 1G
        "#})
        .unwrap();

        let e = build_table(&profile, &customizations, &mut IdGenerator::from_seed(1))
            .unwrap_err();
        assert!(matches!(
            e.kind(),
            ErrorKind::Layout(LayoutError::PolicyViolation(_))
        ));
    }

    #[test]
    fn test_build_with_partitioning() {
        let profile: ImageProfile = serde_yaml::from_str(PROFILE).unwrap();
        let customizations: Customizations = serde_yaml::from_str(indoc! {r#"
            partitioning:
              lvm:
                volume_groups:
                  - name: datavg
                    minsize: 8G
                    logical_volumes:
                      - name: homelv
                        mountpoint: /home
                        minsize: 2G
        "#})
        .unwrap();

        let table = build_table(&profile, &customizations, &mut IdGenerator::from_seed(1)).unwrap();
        let index = table.volume_group_index().unwrap();
        let Some(Payload::LvmVolumeGroup(vg)) = &table.partitions[index].payload else {
            panic!("expected volume group");
        };
        assert_eq!(vg.name, "datavg");
        assert!(table.contains_mountpoint("/boot/efi"));

        let mut mixed = customizations.clone();
        mixed.filesystem.push(diskplan_api::customizations::FilesystemCustomization::new(
            "/var", GIBIBYTE,
        ));
        let e = build_table(&profile, &mixed, &mut IdGenerator::from_seed(1)).unwrap_err();
        assert!(matches!(
            e.kind(),
            ErrorKind::Layout(LayoutError::UnsupportedCombination(_))
        ));
    }

    #[test]
    fn test_custom() {
        let dir = tempdir().unwrap();
        let customizations = write(
            dir.path(),
            "blueprint.json",
            r#"{"partitioning": {"plain": {"filesystems": [{"mountpoint": "/data", "minsize": "1G"}]}}}"#,
        );
        let output = beside(&customizations, "table.json");

        run(&Commands::Custom {
            customizations,
            boot_mode: BootModeArg::Legacy,
            uefi_vendor: None,
            table_type: TableTypeArg::Dos,
            arch: ArchArg::Amd64,
            fs_type: FsTypeArg::Ext4,
            seed: Some(9),
            output: Some(output.clone()),
            format: OutputFormat::Json,
        })
        .unwrap();

        let table = load_partition_table(&output).unwrap();
        assert!(table.contains_mountpoint("/data"));
        assert!(table.contains_mountpoint("/"));
        assert!(!table.contains_mountpoint("/boot/efi"));
    }

    #[test]
    fn test_custom_without_partitioning() {
        let dir = tempdir().unwrap();
        let customizations = write(dir.path(), "blueprint.yaml", "filesystem: []\n");
        let e = run(&Commands::Custom {
            customizations,
            boot_mode: BootModeArg::default(),
            uefi_vendor: None,
            table_type: TableTypeArg::default(),
            arch: ArchArg::default(),
            fs_type: FsTypeArg::default(),
            seed: Some(1),
            output: None,
            format: OutputFormat::Yaml,
        })
        .unwrap_err();
        assert_eq!(e.kind(), &ErrorKind::Config(ConfigError::MissingPartitioning));
    }

    #[test]
    fn test_check_collects_everything() {
        let customizations: Customizations = serde_yaml::from_str(indoc! {r#"
            filesystem:
              - mountpoint: /proc
              - mountpoint: /var/
              - mountpoint: /srv
              - mountpoint: /srv
        "#})
        .unwrap();

        let e = check_customizations(&customizations, &MOUNTPOINT_POLICIES).unwrap_err();
        assert!(e.flatten().len() >= 3, "{e}");

        let clean: Customizations = serde_yaml::from_str(indoc! {r#"
            filesystem:
              - mountpoint: /srv
        "#})
        .unwrap();
        check_customizations(&clean, &MOUNTPOINT_POLICIES).unwrap();
    }

    #[test]
    fn test_validate_command() {
        let dir = tempdir().unwrap();
        let profile = write(dir.path(), "profile.yaml", PROFILE);
        run(&Commands::Validate {
            path: profile.clone(),
            kind: DocumentKind::Profile,
        })
        .unwrap();

        // A profile is not a partition table
        let e = run(&Commands::Validate {
            path: profile,
            kind: DocumentKind::Table,
        })
        .unwrap_err();
        assert_eq!(e.kind(), &ErrorKind::Config(ConfigError::ParsePartitionTable));
    }
}
