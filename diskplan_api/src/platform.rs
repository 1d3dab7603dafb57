use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

use sysdefs::arch::SystemArchitecture;

use crate::constants::{ESP_MOUNT_POINT_PATH, ROOT_MOUNT_POINT_PATH};

/// Firmware interface the image boots with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum BootMode {
    /// BIOS only.
    Legacy,
    /// UEFI only.
    Uefi,
    /// Both BIOS and UEFI.
    #[default]
    Hybrid,
    /// The image is not booted directly, for example a container disk.
    None,
}

impl BootMode {
    pub fn is_uefi(self) -> bool {
        matches!(self, BootMode::Uefi | BootMode::Hybrid)
    }

    pub fn is_legacy(self) -> bool {
        matches!(self, BootMode::Legacy | BootMode::Hybrid)
    }
}

/// Target platform of an image.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct Platform {
    #[serde(default)]
    pub arch: SystemArchitecture,

    #[serde(default)]
    pub boot_mode: BootMode,

    /// Vendor directory of the EFI boot loader, e.g. `fedora`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uefi_vendor: Option<String>,
}

impl Platform {
    /// Whether an EFI boot loader is installed: the boot mode includes UEFI
    /// or a vendor directory for the loader is set.
    pub fn boots_uefi(&self) -> bool {
        self.boot_mode.is_uefi() || self.uefi_vendor.is_some()
    }

    /// Mountpoints that must exist for the boot configuration to work.
    /// Sorted.
    pub fn required_mountpoints(&self) -> Vec<&'static str> {
        let mut required = vec![ROOT_MOUNT_POINT_PATH];
        if self.boots_uefi() {
            required.push(ESP_MOUNT_POINT_PATH);
        }
        required.sort_unstable();
        required
    }
}
