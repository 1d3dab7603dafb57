use std::fmt::Display;

use serde::{Deserialize, Serialize, Serializer};
use uuid::Uuid;

/// A volume identifier: either a proper UUID or a relaxed string for
/// filesystems that use another scheme, such as the `XXXX-XXXX` volume
/// serial of FAT.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OsUuid {
    Uuid(Uuid),
    Relaxed(String),
}

impl OsUuid {
    /// Builds a FAT volume serial (`XXXX-XXXX`) from the first four bytes of
    /// `bytes`.
    pub fn volume_serial(bytes: &[u8; 16]) -> Self {
        Self::Relaxed(format!(
            "{:02X}{:02X}-{:02X}{:02X}",
            bytes[0], bytes[1], bytes[2], bytes[3]
        ))
    }

    /// Provides the UUID stored in this enum, if it is a proper UUID.
    pub fn as_uuid(&self) -> Option<Uuid> {
        match self {
            OsUuid::Uuid(uuid) => Some(*uuid),
            OsUuid::Relaxed(_) => None,
        }
    }

    pub fn is_uuid(&self) -> bool {
        matches!(self, OsUuid::Uuid(_))
    }
}

impl From<&str> for OsUuid {
    fn from(value: &str) -> Self {
        match Uuid::parse_str(value) {
            Ok(uuid) => Self::Uuid(uuid),
            Err(_) => Self::Relaxed(value.to_string()),
        }
    }
}

impl From<String> for OsUuid {
    fn from(value: String) -> Self {
        value.as_str().into()
    }
}

impl From<Uuid> for OsUuid {
    fn from(value: Uuid) -> Self {
        Self::Uuid(value)
    }
}

impl Display for OsUuid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OsUuid::Uuid(uuid) => write!(f, "{}", uuid.hyphenated()),
            OsUuid::Relaxed(s) => write!(f, "{s}"),
        }
    }
}

impl<'de> Deserialize<'de> for OsUuid {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(String::deserialize(deserializer)?.as_str().into())
    }
}

impl Serialize for OsUuid {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_string().serialize(serializer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_uuid_or_serial() {
        let parsed = OsUuid::from("6264d520-3fb9-423f-8ab8-7a0a8e3d3562");
        assert!(parsed.is_uuid());
        assert_eq!(
            parsed.as_uuid().unwrap(),
            Uuid::from_u128(0x6264d520_3fb9_423f_8ab8_7a0a8e3d3562)
        );

        let serial = OsUuid::from("7B77-95E7");
        assert_eq!(serial, OsUuid::Relaxed("7B77-95E7".into()));
        assert!(serial.as_uuid().is_none());
        assert_eq!(serial.to_string(), "7B77-95E7");
    }

    #[test]
    fn test_volume_serial() {
        let mut bytes = [0u8; 16];
        bytes[..4].copy_from_slice(&[0x7b, 0x77, 0x95, 0xe7]);
        assert_eq!(OsUuid::volume_serial(&bytes).to_string(), "7B77-95E7");
    }

    #[test]
    fn test_serde() {
        let uuid: OsUuid = serde_json::from_str("\"fac7f1fb-3e8d-4137-a512-961de09a5549\"").unwrap();
        assert_eq!(
            serde_json::to_string(&uuid).unwrap(),
            "\"fac7f1fb-3e8d-4137-a512-961de09a5549\""
        );
    }
}
