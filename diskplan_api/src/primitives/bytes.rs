use std::{fmt::Display, num::ParseIntError, str::FromStr};

pub const KIBIBYTE: u64 = 1 << 10;
pub const MEBIBYTE: u64 = 1 << 20;
pub const GIBIBYTE: u64 = 1 << 30;
pub const TEBIBYTE: u64 = 1 << 40;

pub const KILOBYTE: u64 = 1_000;
pub const MEGABYTE: u64 = 1_000_000;
pub const GIGABYTE: u64 = 1_000_000_000;
pub const TERABYTE: u64 = 1_000_000_000_000;

/// Rounds `value` up to the next multiple of `alignment`. An alignment of zero
/// leaves the value untouched.
pub const fn align_up(value: u64, alignment: u64) -> u64 {
    if alignment == 0 || value % alignment == 0 {
        value
    } else {
        (value / alignment + 1) * alignment
    }
}

/// Rounds `value` down to the previous multiple of `alignment`.
pub const fn align_down(value: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        value
    } else {
        value - value % alignment
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ByteCountError {
    #[error("unknown data size units in string: {0}")]
    UnknownUnits(String),

    #[error("invalid number in data size '{input}': {source}")]
    InvalidNumber {
        input: String,
        source: ParseIntError,
    },

    #[error("data size overflows 64 bits: {0}")]
    Overflow(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ByteCount(pub u64);

impl From<u64> for ByteCount {
    fn from(x: u64) -> Self {
        ByteCount(x)
    }
}

impl ByteCount {
    pub fn bytes(self) -> u64 {
        self.0
    }

    pub fn to_human_readable(&self) -> String {
        match self.0.trailing_zeros() {
            _ if self.0 == 0 => "0".to_owned(),
            0..=9 => format!("{}", self.0),
            10..=19 => format!("{}K", self.0 >> 10),
            20..=29 => format!("{}M", self.0 >> 20),
            30..=39 => format!("{}G", self.0 >> 30),
            _ => format!("{}T", self.0 >> 40),
        }
    }

    /// Parses a size such as `1024`, `20K`, `500 MiB` or `1 GB`. Single letter
    /// suffixes and the `iB` suffixes are powers of 1024, the `B` suffixes are
    /// powers of 1000.
    pub fn from_human_readable(s: &str) -> Result<Self, ByteCountError> {
        let s = s.trim();
        let split = s
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(s.len());
        let (number, unit) = (&s[..split], s[split..].trim());

        let multiplier = match unit {
            "" | "B" => 1,
            "K" | "KiB" => KIBIBYTE,
            "M" | "MiB" => MEBIBYTE,
            "G" | "GiB" => GIBIBYTE,
            "T" | "TiB" => TEBIBYTE,
            "kB" | "KB" => KILOBYTE,
            "MB" => MEGABYTE,
            "GB" => GIGABYTE,
            "TB" => TERABYTE,
            _ => return Err(ByteCountError::UnknownUnits(s.to_owned())),
        };

        let value = number
            .parse::<u64>()
            .map_err(|source| ByteCountError::InvalidNumber {
                input: s.to_owned(),
                source,
            })?;

        value
            .checked_mul(multiplier)
            .map(ByteCount)
            .ok_or_else(|| ByteCountError::Overflow(s.to_owned()))
    }
}

impl Display for ByteCount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_human_readable())
    }
}

impl FromStr for ByteCount {
    type Err = ByteCountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_human_readable(s)
    }
}

impl<'de> serde::Deserialize<'de> for ByteCount {
    fn deserialize<D>(deserializer: D) -> Result<ByteCount, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Size may be provided as a string (e.g. "1K") or as a pure number
        // (e.g. 1024).
        let value = serde_yaml::Value::deserialize(deserializer)?;

        match value {
            serde_yaml::Value::String(s) => {
                ByteCount::from_str(s.as_str()).map_err(serde::de::Error::custom)
            }
            serde_yaml::Value::Number(n) => {
                let n = n.as_u64().ok_or_else(|| {
                    serde::de::Error::custom("invalid byte count size, expected unsigned integer")
                })?;
                Ok(ByteCount(n))
            }
            _ => Err(serde::de::Error::custom("invalid byte count size")),
        }
    }
}

impl serde::Serialize for ByteCount {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        if self.0 & 0x3FF != 0 || self.0 == 0 {
            serializer.serialize_u64(self.0)
        } else {
            serializer.serialize_str(self.to_human_readable().as_str())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_string() {
        assert_eq!(ByteCount::from_str("1").unwrap(), ByteCount(1));
        assert_eq!(ByteCount::from_str("20K").unwrap(), ByteCount(20 * KIBIBYTE));
        assert_eq!(ByteCount::from_str("30M").unwrap(), ByteCount(30 * MEBIBYTE));
        assert_eq!(ByteCount::from_str("40G").unwrap(), ByteCount(40 * GIBIBYTE));
        assert_eq!(ByteCount::from_str("50T").unwrap(), ByteCount(50 * TEBIBYTE));

        assert_eq!(
            ByteCount::from_str("500 MiB").unwrap(),
            ByteCount(500 * MEBIBYTE)
        );
        assert_eq!(ByteCount::from_str("1 GB").unwrap(), ByteCount(GIGABYTE));
        assert_eq!(ByteCount::from_str("2kB").unwrap(), ByteCount(2000));
        assert_eq!(ByteCount::from_str(" 1024 ").unwrap(), ByteCount(1024));
        assert_eq!(ByteCount::from_str("1 K").unwrap(), ByteCount(1024));

        assert_eq!(
            ByteCount::from_str("1.0K").unwrap_err().to_string(),
            "unknown data size units in string: 1.0K"
        );
        assert_eq!(
            ByteCount::from_str("10 XiB").unwrap_err().to_string(),
            "unknown data size units in string: 10 XiB"
        );
        assert!(matches!(
            ByteCount::from_str("X10K").unwrap_err(),
            ByteCountError::UnknownUnits(_)
        ));
        assert!(matches!(
            ByteCount::from_str("G").unwrap_err(),
            ByteCountError::InvalidNumber { .. }
        ));
        assert!(matches!(
            ByteCount::from_str("99999999T").unwrap_err(),
            ByteCountError::Overflow(_)
        ));
    }

    #[test]
    fn test_to_string() {
        assert_eq!(ByteCount(0).to_string(), "0");
        assert_eq!(ByteCount(1000).to_string(), "1000");
        assert_eq!(ByteCount(2 * KIBIBYTE).to_string(), "2K");
        assert_eq!(ByteCount(200 * MEBIBYTE).to_string(), "200M");
        assert_eq!(ByteCount(10 * GIBIBYTE).to_string(), "10G");
        assert_eq!(ByteCount(3 * TEBIBYTE).to_string(), "3T");
    }

    #[test]
    fn test_serde() {
        let parsed: Vec<ByteCount> = serde_yaml::from_str("[1024, \"2G\", 100]").unwrap();
        assert_eq!(
            parsed,
            vec![ByteCount(1024), ByteCount(2 * GIBIBYTE), ByteCount(100)]
        );

        assert_eq!(
            serde_yaml::to_string(&vec![ByteCount(1024), ByteCount(100)]).unwrap(),
            "- 1K\n- 100\n"
        );

        let err = serde_yaml::from_str::<ByteCount>("\"12 parsecs\"").unwrap_err();
        assert!(err.to_string().contains("unknown data size units"));
        assert!(serde_yaml::from_str::<ByteCount>("-5").is_err());
    }

    #[test]
    fn test_alignment() {
        assert_eq!(align_up(0, MEBIBYTE), 0);
        assert_eq!(align_up(1, MEBIBYTE), MEBIBYTE);
        assert_eq!(align_up(MEBIBYTE, MEBIBYTE), MEBIBYTE);
        assert_eq!(align_up(MEBIBYTE + 1, 512), MEBIBYTE + 512);
        assert_eq!(align_down(MEBIBYTE + 1, 512), MEBIBYTE);
        assert_eq!(align_up(7, 0), 7);
        assert_eq!(align_down(7, 0), 7);
    }
}
