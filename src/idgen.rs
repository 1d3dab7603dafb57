//! Deterministic identifiers for partition tables.

use std::{convert::Infallible, env};

use log::{debug, info, trace};
use rand::{rngs::StdRng, RngCore, SeedableRng};
use uuid::{Builder, Uuid};

use diskplan_api::{
    constants::RNG_SEED_ENV,
    disk::{EntityMut, PartitionTable, PartitionTableType, WalkOrder},
    error::ConfigError,
};
use sysdefs::osuuid::OsUuid;

/// Produces identifiers from a random source. Every identifier slot of a
/// table consumes exactly one draw, in walk order, whether or not the slot
/// is already filled. Identifiers therefore depend only on the seed and the
/// position of the entity in the table.
///
/// One generator belongs to one build; sharing it between concurrent builds
/// makes their identifiers depend on scheduling.
pub struct IdGenerator<R: RngCore> {
    rng: R,
}

impl IdGenerator<StdRng> {
    pub fn from_seed(seed: u64) -> Self {
        Self::new(StdRng::seed_from_u64(seed))
    }
}

impl<R: RngCore> IdGenerator<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }

    fn draw(&mut self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        self.rng.fill_bytes(&mut bytes);
        bytes
    }

    /// A random (version 4) UUID.
    pub fn uuid(&mut self) -> Uuid {
        Builder::from_random_bytes(self.draw()).into_uuid()
    }

    /// Fills every missing identifier of `table`. Existing identifiers are
    /// kept.
    pub fn generate(&mut self, table: &mut PartitionTable) {
        let table_bytes = self.draw();
        if table.uuid.is_none() {
            table.uuid = Some(match table.table_type {
                PartitionTableType::Gpt => Builder::from_random_bytes(table_bytes).into_uuid().into(),
                // DOS disk identifiers are 32 bit
                PartitionTableType::Dos => OsUuid::Relaxed(format!(
                    "{:02x}{:02x}{:02x}{:02x}",
                    table_bytes[0], table_bytes[1], table_bytes[2], table_bytes[3]
                )),
            });
        }

        let is_gpt = table.table_type == PartitionTableType::Gpt;
        let result = table.walk_mut(WalkOrder::PreOrder, |entity| {
            match entity {
                EntityMut::Partition(index, partition) => {
                    let uuid = self.uuid();
                    if is_gpt && partition.uuid.is_none() {
                        trace!("Assigning UUID {uuid} to partition {}", index + 1);
                        partition.uuid = Some(uuid);
                    }
                }
                EntityMut::Filesystem(fs) => {
                    let bytes = self.draw();
                    if fs.uuid.is_none() {
                        fs.uuid = Some(if fs.fs_type.uses_volume_serial() {
                            OsUuid::volume_serial(&bytes)
                        } else {
                            Builder::from_random_bytes(bytes).into_uuid().into()
                        });
                    }
                }
                EntityMut::Btrfs(btrfs) => {
                    let uuid = self.uuid();
                    btrfs.uuid.get_or_insert(uuid.into());
                }
                EntityMut::Swap(swap) => {
                    let uuid = self.uuid();
                    swap.uuid.get_or_insert(uuid.into());
                }
                EntityMut::Luks(luks) => {
                    let uuid = self.uuid();
                    luks.uuid.get_or_insert(uuid.into());
                }
                EntityMut::VolumeGroup(_)
                | EntityMut::LogicalVolume(_)
                | EntityMut::Subvolume(_) => {}
            }
            Ok::<(), Infallible>(())
        });

        if let Err(never) = result {
            match never {}
        }
    }
}

/// Picks the identifier seed: `explicit` when given, else the value of
/// `DISKPLAN_RNG_SEED`, else a random seed.
pub fn resolve_seed(explicit: Option<u64>) -> Result<u64, ConfigError> {
    choose_seed(explicit, env::var(RNG_SEED_ENV).ok())
}

fn choose_seed(explicit: Option<u64>, from_env: Option<String>) -> Result<u64, ConfigError> {
    if let Some(seed) = explicit {
        return Ok(seed);
    }

    if let Some(value) = from_env {
        return match value.trim().parse() {
            Ok(seed) => {
                debug!("Using seed {seed} from ${RNG_SEED_ENV}");
                Ok(seed)
            }
            Err(_) => Err(ConfigError::InvalidSeed { value }),
        };
    }

    let seed = rand::random();
    info!("Using random seed {seed}; pass it with --seed to reproduce this build");
    Ok(seed)
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use diskplan_api::disk::Payload;

    use super::*;

    fn table() -> PartitionTable {
        serde_yaml::from_str(indoc! {r#"
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
                      - name: swaplv
                        size: 512M
                        payload:
                          swap: {}
        "#})
        .unwrap()
    }

    #[test]
    fn test_deterministic() {
        let mut first = table();
        IdGenerator::from_seed(13).generate(&mut first);
        let mut second = table();
        IdGenerator::from_seed(13).generate(&mut second);
        assert_eq!(first, second);

        let mut other = table();
        IdGenerator::from_seed(14).generate(&mut other);
        assert_ne!(first, other);
    }

    #[test]
    fn test_fills_every_slot() {
        let mut table = table();
        IdGenerator::from_seed(0).generate(&mut table);

        assert!(table.uuid.as_ref().unwrap().is_uuid());
        assert!(table.partitions.iter().all(|p| p.uuid.is_some()));

        let Some(Payload::Filesystem(esp)) = &table.partitions[1].payload else {
            panic!("expected esp filesystem");
        };
        let serial = esp.uuid.as_ref().unwrap().to_string();
        assert_eq!(serial.len(), 9);
        assert_eq!(&serial[4..5], "-");
        assert_eq!(serial, serial.to_uppercase());

        let Some(Payload::LvmVolumeGroup(vg)) = &table.partitions[2].payload else {
            panic!("expected volume group");
        };
        for lv in &vg.logical_volumes {
            match lv.payload.as_ref().unwrap() {
                Payload::Filesystem(fs) => assert!(fs.uuid.as_ref().unwrap().is_uuid()),
                Payload::Swap(swap) => assert!(swap.uuid.is_some()),
                other => panic!("unexpected payload {}", other.kind()),
            }
        }
    }

    #[test]
    fn test_existing_identifiers_keep_positions() {
        let mut generated = table();
        IdGenerator::from_seed(7).generate(&mut generated);

        // Prefill the first partition: every other identifier stays the same
        let mut prefilled = table();
        let fixed = Uuid::from_u128(0x1234);
        prefilled.partitions[0].uuid = Some(fixed);
        IdGenerator::from_seed(7).generate(&mut prefilled);

        assert_eq!(prefilled.partitions[0].uuid, Some(fixed));
        assert_eq!(prefilled.partitions[1..], generated.partitions[1..]);
        assert_eq!(prefilled.uuid, generated.uuid);
    }

    #[test]
    fn test_dos_table() {
        let mut table = table();
        table.table_type = PartitionTableType::Dos;
        IdGenerator::from_seed(1).generate(&mut table);

        let id = table.uuid.unwrap().to_string();
        assert_eq!(id.len(), 8);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(table.partitions.iter().all(|p| p.uuid.is_none()));
    }

    #[test]
    fn test_choose_seed() {
        assert_eq!(choose_seed(Some(3), Some("9".into())), Ok(3));
        assert_eq!(choose_seed(None, Some(" 9\n".into())), Ok(9));
        assert_eq!(
            choose_seed(None, Some("nine".into())),
            Err(ConfigError::InvalidSeed {
                value: "nine".into()
            })
        );
        assert!(choose_seed(None, None).is_ok());
    }
}
