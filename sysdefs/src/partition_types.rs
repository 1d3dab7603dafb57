use std::{fmt::Display, str::FromStr};

use anyhow::{bail, Error};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

#[cfg(test)]
use strum_macros::EnumIter;

/// Partition type GUIDs understood by the layout engine.
///
/// Most entries come from the Discoverable Partitions Specification. BIOS
/// boot and LVM are the legacy well-known GUIDs used by image builders.
#[derive(Debug, Clone, PartialEq, Eq, Copy, Hash)]
#[cfg_attr(test, derive(EnumIter))]
pub enum PartitionType {
    /// BIOS boot partition, holds the second stage of a legacy boot loader
    BiosBoot,

    /// EFI System Partition
    Esp,

    /// Extended Boot Loader Partition
    Xbootldr,

    /// Swap partition
    Swap,

    /// Home (/home/) partition
    Home,

    /// Server data (/srv/) partition
    Srv,

    /// Variable data (/var/) partition
    Var,

    /// Temporary data (/var/tmp/) partition
    Tmp,

    /// Generic Linux file system partition
    LinuxGeneric,

    /// Linux LVM physical volume
    Lvm,

    /// Root file system partition in AMD64
    RootAmd64,
    /// /usr/ file system partition in AMD64
    UsrAmd64,

    /// Root file system partition in ARM64
    RootArm64,
    /// /usr/ file system partition in ARM64
    UsrArm64,

    /// Any other type, kept verbatim
    Unknown(Uuid),
}

impl PartitionType {
    pub fn to_str(&self) -> &'static str {
        match self {
            PartitionType::BiosBoot => "bios-boot",
            PartitionType::Esp => "esp",
            PartitionType::Xbootldr => "xbootldr",
            PartitionType::Swap => "swap",
            PartitionType::Home => "home",
            PartitionType::Srv => "srv",
            PartitionType::Var => "var",
            PartitionType::Tmp => "tmp",
            PartitionType::LinuxGeneric => "linux-generic",
            PartitionType::Lvm => "lvm",
            PartitionType::RootAmd64 => "root-x86-64",
            PartitionType::UsrAmd64 => "usr-x86-64",
            PartitionType::RootArm64 => "root-arm64",
            PartitionType::UsrArm64 => "usr-arm64",
            PartitionType::Unknown(_) => "unknown",
        }
    }

    pub fn try_from_str(val: &str) -> Result<Self, Error> {
        Ok(match val {
            "bios-boot" => PartitionType::BiosBoot,
            "esp" => PartitionType::Esp,
            "xbootldr" => PartitionType::Xbootldr,
            "swap" => PartitionType::Swap,
            "home" => PartitionType::Home,
            "srv" => PartitionType::Srv,
            "var" => PartitionType::Var,
            "tmp" => PartitionType::Tmp,
            "linux-generic" => PartitionType::LinuxGeneric,
            "lvm" => PartitionType::Lvm,
            "root-x86-64" => PartitionType::RootAmd64,
            "usr-x86-64" => PartitionType::UsrAmd64,
            "root-arm64" => PartitionType::RootArm64,
            "usr-arm64" => PartitionType::UsrArm64,
            _ => bail!("Unknown partition type: {}", val),
        })
    }

    pub fn to_uuid(&self) -> Uuid {
        Uuid::from_u128(match self {
            PartitionType::BiosBoot => 0x21686148_6449_6e6f_744e_656564454649u128,
            PartitionType::Esp => 0xc12a7328_f81f_11d2_ba4b_00a0c93ec93bu128,
            PartitionType::Xbootldr => 0xbc13c2ff_59e6_4262_a352_b275fd6f7172u128,
            PartitionType::Swap => 0x0657fd6d_a4ab_43c4_84e5_0933c84b4f4fu128,
            PartitionType::Home => 0x933ac7e1_2eb4_4f13_b844_0e14e2aef915u128,
            PartitionType::Srv => 0x3b8f8425_20e0_4f3b_907f_1a25a76f98e8u128,
            PartitionType::Var => 0x4d21b016_b534_45c2_a9fb_5c16e091fd2du128,
            PartitionType::Tmp => 0x7ec6f557_3bc5_4aca_b293_16ef5df639d1u128,
            PartitionType::LinuxGeneric => 0x0fc63daf_8483_4772_8e79_3d69d8477de4u128,
            PartitionType::Lvm => 0xe6d6d379_f507_44c2_a23c_238f2a3df928u128,
            PartitionType::RootAmd64 => 0x4f68bce3_e8cd_4db1_96e7_fbcaf984b709u128,
            PartitionType::UsrAmd64 => 0x8484680c_9521_48c6_9c11_b0720656f69eu128,
            PartitionType::RootArm64 => 0xb921b045_1df0_41c3_af44_4c6f280d3faeu128,
            PartitionType::UsrArm64 => 0xb0e01050_ee5f_4390_949a_9101b17104e9u128,
            PartitionType::Unknown(uuid) => return *uuid,
        })
    }

    pub fn from_uuid(val: &Uuid) -> Self {
        match val.as_u128() {
            0x21686148_6449_6e6f_744e_656564454649u128 => PartitionType::BiosBoot,
            0xc12a7328_f81f_11d2_ba4b_00a0c93ec93bu128 => PartitionType::Esp,
            0xbc13c2ff_59e6_4262_a352_b275fd6f7172u128 => PartitionType::Xbootldr,
            0x0657fd6d_a4ab_43c4_84e5_0933c84b4f4fu128 => PartitionType::Swap,
            0x933ac7e1_2eb4_4f13_b844_0e14e2aef915u128 => PartitionType::Home,
            0x3b8f8425_20e0_4f3b_907f_1a25a76f98e8u128 => PartitionType::Srv,
            0x4d21b016_b534_45c2_a9fb_5c16e091fd2du128 => PartitionType::Var,
            0x7ec6f557_3bc5_4aca_b293_16ef5df639d1u128 => PartitionType::Tmp,
            0x0fc63daf_8483_4772_8e79_3d69d8477de4u128 => PartitionType::LinuxGeneric,
            0xe6d6d379_f507_44c2_a23c_238f2a3df928u128 => PartitionType::Lvm,
            0x4f68bce3_e8cd_4db1_96e7_fbcaf984b709u128 => PartitionType::RootAmd64,
            0x8484680c_9521_48c6_9c11_b0720656f69eu128 => PartitionType::UsrAmd64,
            0xb921b045_1df0_41c3_af44_4c6f280d3faeu128 => PartitionType::RootArm64,
            0xb0e01050_ee5f_4390_949a_9101b17104e9u128 => PartitionType::UsrArm64,
            _ => PartitionType::Unknown(*val),
        }
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }

    /// Returns whether a partition of this type holds a root file system for
    /// any architecture.
    pub fn is_root(&self) -> bool {
        matches!(self, Self::RootAmd64 | Self::RootArm64)
    }
}

impl Display for PartitionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PartitionType::Unknown(uuid) => write!(f, "{}", uuid.hyphenated()),
            known => write!(f, "{}", known.to_str()),
        }
    }
}

impl<'de> Deserialize<'de> for PartitionType {
    fn deserialize<D>(deserializer: D) -> Result<PartitionType, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = String::deserialize(deserializer)?;

        if let Ok(parsed_uuid) = Uuid::from_str(&value) {
            Ok(PartitionType::from_uuid(&parsed_uuid))
        } else {
            PartitionType::try_from_str(&value).map_err(serde::de::Error::custom)
        }
    }
}

impl Serialize for PartitionType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn test_uuid_roundtrip() {
        for partition_type in PartitionType::iter().filter(|pt| !pt.is_unknown()) {
            let uuid = partition_type.to_uuid();
            assert_eq!(
                partition_type,
                PartitionType::from_uuid(&uuid),
                "Round-trip failed for partition type {}",
                partition_type.to_str()
            );
        }
    }

    #[test]
    fn test_unknown_uuid() {
        let odd = Uuid::from_u128(0x00000000_0000_0000_0000_000000000001u128);
        let partition_type = PartitionType::from_uuid(&odd);
        assert_eq!(partition_type, PartitionType::Unknown(odd));
        assert_eq!(partition_type.to_uuid(), odd);
        assert_eq!(
            partition_type.to_string(),
            "00000000-0000-0000-0000-000000000001"
        );
    }

    #[test]
    fn test_deserialize_name_or_guid() {
        let by_name: PartitionType = serde_json::from_str("\"bios-boot\"").unwrap();
        assert_eq!(by_name, PartitionType::BiosBoot);

        let by_guid: PartitionType =
            serde_json::from_str("\"C12A7328-F81F-11D2-BA4B-00A0C93EC93B\"").unwrap();
        assert_eq!(by_guid, PartitionType::Esp);

        let err = serde_json::from_str::<PartitionType>("\"floppy\"").unwrap_err();
        assert!(err.to_string().contains("Unknown partition type: floppy"));
    }

    #[test]
    fn test_serialize_uses_name() {
        assert_eq!(
            serde_json::to_string(&PartitionType::Lvm).unwrap(),
            "\"lvm\""
        );
        let odd = Uuid::from_u128(0x2u128);
        assert_eq!(
            serde_json::to_string(&PartitionType::Unknown(odd)).unwrap(),
            "\"00000000-0000-0000-0000-000000000002\""
        );
    }
}
