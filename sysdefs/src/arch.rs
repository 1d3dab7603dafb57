use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};
use strum_macros::{EnumIter, IntoStaticStr};

use crate::partition_types::PartitionType;

/// Architecture an image is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr, EnumIter, Default)]
pub enum SystemArchitecture {
    /// 64-bit x86
    #[default]
    #[strum(serialize = "x86_64")]
    Amd64,

    /// 64-bit ARM
    #[strum(serialize = "aarch64")]
    Aarch64,
}

impl SystemArchitecture {
    /// Returns the canonical name of the architecture, as used in image
    /// manifests.
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Returns the architecture specific root partition type.
    pub fn root_partition_type(&self) -> PartitionType {
        match self {
            SystemArchitecture::Amd64 => PartitionType::RootAmd64,
            SystemArchitecture::Aarch64 => PartitionType::RootArm64,
        }
    }

    /// Returns the architecture specific /usr partition type.
    pub fn usr_partition_type(&self) -> PartitionType {
        match self {
            SystemArchitecture::Amd64 => PartitionType::UsrAmd64,
            SystemArchitecture::Aarch64 => PartitionType::UsrArm64,
        }
    }
}

impl<'de> Deserialize<'de> for SystemArchitecture {
    fn deserialize<D>(deserializer: D) -> Result<SystemArchitecture, D::Error>
    where
        D: Deserializer<'de>,
    {
        Ok(match &*String::deserialize(deserializer)?.to_lowercase() {
            "x64" | "amd64" | "x86_64" => SystemArchitecture::Amd64,
            "arm64" | "aarch64" => SystemArchitecture::Aarch64,
            arch => {
                return Err(D::Error::custom(format!(
                    "unknown system architecture '{arch}'",
                )))
            }
        })
    }
}

impl Serialize for SystemArchitecture {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}
