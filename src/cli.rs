use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
};

use clap::{Parser, Subcommand};
use log::LevelFilter;

use diskplan_api::{disk::PartitionTableType, platform::BootMode};
use sysdefs::{arch::SystemArchitecture, filesystems::FilesystemType};

use crate::DISKPLAN_VERSION;

#[derive(Parser, Debug)]
#[clap(version = DISKPLAN_VERSION)]
pub struct Cli {
    /// Logging verbosity [OFF, ERROR, WARN, INFO, DEBUG, TRACE]
    #[arg(global = true, short, long, default_value_t = LevelFilter::Info)]
    pub verbosity: LevelFilter,

    /// Also write every log record, at trace level, as JSON lines to this file
    #[arg(global = true, long)]
    pub log_file: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(clap::ValueEnum, Copy, Clone, Debug, Eq, PartialEq)]
pub enum OutputFormat {
    Yaml,
    Json,
}

#[derive(clap::ValueEnum, Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum BootModeArg {
    Legacy,
    Uefi,
    #[default]
    Hybrid,
    None,
}

impl From<BootModeArg> for BootMode {
    fn from(value: BootModeArg) -> Self {
        match value {
            BootModeArg::Legacy => BootMode::Legacy,
            BootModeArg::Uefi => BootMode::Uefi,
            BootModeArg::Hybrid => BootMode::Hybrid,
            BootModeArg::None => BootMode::None,
        }
    }
}

#[derive(clap::ValueEnum, Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum TableTypeArg {
    #[default]
    Gpt,
    Dos,
}

impl From<TableTypeArg> for PartitionTableType {
    fn from(value: TableTypeArg) -> Self {
        match value {
            TableTypeArg::Gpt => PartitionTableType::Gpt,
            TableTypeArg::Dos => PartitionTableType::Dos,
        }
    }
}

#[derive(clap::ValueEnum, Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum ArchArg {
    #[default]
    Amd64,
    Aarch64,
}

impl From<ArchArg> for SystemArchitecture {
    fn from(value: ArchArg) -> Self {
        match value {
            ArchArg::Amd64 => SystemArchitecture::Amd64,
            ArchArg::Aarch64 => SystemArchitecture::Aarch64,
        }
    }
}

#[derive(clap::ValueEnum, Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum FsTypeArg {
    #[default]
    Xfs,
    Ext4,
}

impl From<FsTypeArg> for FilesystemType {
    fn from(value: FsTypeArg) -> Self {
        match value {
            FsTypeArg::Xfs => FilesystemType::Xfs,
            FsTypeArg::Ext4 => FilesystemType::Ext4,
        }
    }
}

/// What `validate` loads.
#[derive(clap::ValueEnum, Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum DocumentKind {
    #[default]
    Table,
    Profile,
    Customizations,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a partition table from an image profile and customizations
    Build {
        /// The image profile supplying the base table and the rules
        #[clap(index = 1)]
        profile: PathBuf,

        /// Blueprint customizations, YAML or JSON
        #[clap(short, long)]
        customizations: Option<PathBuf>,

        /// Seed for generated identifiers [default: $DISKPLAN_RNG_SEED or random]
        #[clap(long)]
        seed: Option<u64>,

        /// Where to write the table [default: stdout]
        #[clap(short, long)]
        output: Option<PathBuf>,

        #[clap(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },

    /// Build a whole partition table from partitioning customizations
    Custom {
        /// Blueprint customizations with a partitioning section
        #[clap(index = 1)]
        customizations: PathBuf,

        #[clap(long, value_enum, default_value_t)]
        boot_mode: BootModeArg,

        /// Vendor directory of the EFI boot loader; implies an ESP
        #[clap(long)]
        uefi_vendor: Option<String>,

        #[clap(long, value_enum, default_value_t)]
        table_type: TableTypeArg,

        #[clap(long, value_enum, default_value_t)]
        arch: ArchArg,

        /// Filesystem of mountpoints without an explicit type
        #[clap(long, value_enum, default_value_t)]
        fs_type: FsTypeArg,

        /// Seed for generated identifiers [default: $DISKPLAN_RNG_SEED or random]
        #[clap(long)]
        seed: Option<u64>,

        /// Where to write the table [default: stdout]
        #[clap(short, long)]
        output: Option<PathBuf>,

        #[clap(long, value_enum, default_value_t = OutputFormat::Yaml)]
        format: OutputFormat,
    },

    /// Turn a partition table into pipeline devices and mounts
    Flatten {
        /// The finished partition table
        #[clap(index = 1)]
        table: PathBuf,

        /// File name of the disk image the loopback device opens
        #[clap(long, default_value = "disk.raw")]
        image: String,

        /// Boot mode deciding the mandatory mounts
        #[clap(long, value_enum, default_value_t)]
        boot_mode: BootModeArg,

        /// Vendor directory of the EFI boot loader; makes `/boot/efi` mandatory
        #[clap(long)]
        uefi_vendor: Option<String>,

        /// Where to write the devices and mounts [default: stdout]
        #[clap(short, long)]
        output: Option<PathBuf>,

        #[clap(long, value_enum, default_value_t = OutputFormat::Json)]
        format: OutputFormat,
    },

    /// Check customizations against a mountpoint policy
    Check {
        /// Blueprint customizations, YAML or JSON
        #[clap(index = 1)]
        customizations: PathBuf,

        /// Image profile whose policy applies [default: the built-in policy]
        #[clap(short, long)]
        profile: Option<PathBuf>,
    },

    /// Validate a partition table, an image profile or customizations
    Validate {
        #[clap(index = 1)]
        path: PathBuf,

        #[clap(long, value_enum, default_value_t)]
        kind: DocumentKind,
    },
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Build { .. } => "build",
            Commands::Custom { .. } => "custom",
            Commands::Flatten { .. } => "flatten",
            Commands::Check { .. } => "check",
            Commands::Validate { .. } => "validate",
        }
    }
}

impl Display for Commands {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build() {
        let cli = Cli::try_parse_from([
            "diskplan",
            "build",
            "profile.yaml",
            "-c",
            "blueprint.json",
            "--seed",
            "13",
            "-v",
            "trace",
        ])
        .unwrap();
        assert_eq!(cli.verbosity, LevelFilter::Trace);
        assert_eq!(cli.command.to_string(), "build");
        let Commands::Build {
            profile,
            customizations,
            seed,
            output,
            format,
        } = cli.command
        else {
            panic!("expected build");
        };
        assert_eq!(profile, PathBuf::from("profile.yaml"));
        assert_eq!(customizations, Some(PathBuf::from("blueprint.json")));
        assert_eq!(seed, Some(13));
        assert_eq!(output, None);
        assert_eq!(format, OutputFormat::Yaml);
    }

    #[test]
    fn test_parse_flatten() {
        let cli = Cli::try_parse_from([
            "diskplan",
            "--log-file",
            "run.log",
            "flatten",
            "table.yaml",
            "--boot-mode",
            "legacy",
            "--uefi-vendor",
            "azurelinux",
        ])
        .unwrap();
        assert_eq!(cli.log_file, Some(PathBuf::from("run.log")));
        let Commands::Flatten {
            image,
            boot_mode,
            uefi_vendor,
            format,
            ..
        } = cli.command
        else {
            panic!("expected flatten");
        };
        assert_eq!(image, "disk.raw");
        assert_eq!(BootMode::from(boot_mode), BootMode::Legacy);
        assert_eq!(uefi_vendor.as_deref(), Some("azurelinux"));
        assert_eq!(format, OutputFormat::Json);
    }

    #[test]
    fn test_parse_custom_defaults() {
        let cli = Cli::try_parse_from(["diskplan", "custom", "blueprint.yaml"]).unwrap();
        let Commands::Custom {
            boot_mode,
            table_type,
            arch,
            fs_type,
            ..
        } = cli.command
        else {
            panic!("expected custom");
        };
        assert_eq!(BootMode::from(boot_mode), BootMode::Hybrid);
        assert_eq!(PartitionTableType::from(table_type), PartitionTableType::Gpt);
        assert_eq!(SystemArchitecture::from(arch), SystemArchitecture::Amd64);
        assert_eq!(FilesystemType::from(fs_type), FilesystemType::Xfs);
    }

    #[test]
    fn test_invalid_seed_rejected() {
        assert!(Cli::try_parse_from(["diskplan", "build", "p.yaml", "--seed", "abc"]).is_err());
    }
}
