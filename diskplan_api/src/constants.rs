use const_format::formatcp;

use crate::primitives::bytes::MEBIBYTE;

// Block of path constants specific to mount points

/// Root volume mount point path.
pub const ROOT_MOUNT_POINT_PATH: &str = "/";

/// Boot directory name.
pub const BOOT_DIRECTORY: &str = "boot";

/// Boot volume mount point path.
pub const BOOT_MOUNT_POINT_PATH: &str = formatcp!("/{BOOT_DIRECTORY}");

/// ESP volume mount point path.
pub const ESP_MOUNT_POINT_PATH: &str = formatcp!("{BOOT_MOUNT_POINT_PATH}/efi");

/// /usr mount point path.
pub const USR_MOUNT_POINT_PATH: &str = "/usr";

// Block of defaults used when synthesizing partitions

/// Name of the volume group created when converting a table to LVM.
pub const DEFAULT_VOLUME_GROUP_NAME: &str = "rootvg";

/// Description of the volume group created when converting a table to LVM.
pub const DEFAULT_VOLUME_GROUP_DESCRIPTION: &str = "created via diskplan";

/// Name of the btrfs subvolume mounted at `/`.
pub const ROOT_SUBVOLUME_NAME: &str = "root";

/// Compression applied to btrfs subvolumes created by the allocator.
pub const DEFAULT_BTRFS_COMPRESSION: &str = "zstd:1";

/// Label of a synthesized EFI system partition.
pub const ESP_LABEL: &str = "EFI-SYSTEM";

/// fstab options of a synthesized EFI system partition.
pub const ESP_FSTAB_OPTIONS: &str = "defaults,uid=0,gid=0,umask=077,shortname=winnt";

/// Default fstab options.
pub const DEFAULT_FSTAB_OPTIONS: &str = "defaults";

/// Encryption cipher of LUKS containers that do not name one.
pub const DEFAULT_LUKS_CIPHER: &str = "aes-xts-plain64";

// Block of sizing constants

/// Logical sector size of generated images.
pub const SECTOR_SIZE: u64 = 512;

/// Partition boundaries and sizes are multiples of the grain.
pub const PARTITION_GRAIN: u64 = MEBIBYTE;

/// Space reserved in front of the first partition (protective MBR, GPT header
/// and entries, alignment gap).
pub const GPT_HEADER_SIZE: u64 = MEBIBYTE;

/// Space reserved after the last partition for the backup GPT.
pub const GPT_FOOTER_SIZE: u64 = MEBIBYTE;

/// LVM physical extent size. Logical volumes are multiples of it.
pub const LVM_EXTENT_SIZE: u64 = 4 * MEBIBYTE;

/// Metadata area reserved on every LVM physical volume.
pub const LVM_METADATA_SIZE: u64 = MEBIBYTE;

/// Space taken by a LUKS2 header.
pub const LUKS2_HEADER_SIZE: u64 = 16 * MEBIBYTE;

/// Smallest btrfs volume that `mkfs.btrfs` accepts comfortably.
pub const BTRFS_MIN_VOLUME_SIZE: u64 = 256 * MEBIBYTE;

/// Smallest xfs filesystem that `mkfs.xfs` creates.
pub const XFS_MIN_SIZE: u64 = 300 * MEBIBYTE;

/// Size of a synthesized BIOS boot partition.
pub const BIOS_BOOT_PARTITION_SIZE: u64 = MEBIBYTE;

/// Size of a synthesized EFI system partition.
pub const ESP_PARTITION_SIZE: u64 = 200 * MEBIBYTE;

/// Size of a synthesized /boot partition.
pub const BOOT_PARTITION_SIZE: u64 = 1024 * MEBIBYTE;

/// Size of a synthesized root filesystem when nothing else dictates one.
pub const DEFAULT_ROOT_SIZE: u64 = 2 * 1024 * MEBIBYTE;

/// Smallest ext4 filesystem worth creating.
pub const EXT4_MIN_SIZE: u64 = 16 * MEBIBYTE;

/// Environment variable that seeds identifier generation.
pub const RNG_SEED_ENV: &str = "DISKPLAN_RNG_SEED";

/// Name of the loopback device backing the disk image in flattened output.
pub const DISK_DEVICE_NAME: &str = "disk";
