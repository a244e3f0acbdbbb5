//! # Translation Granule Geometry
//!
//! How many entries each level of a table holds, how large a region one entry
//! covers, and how strictly each level must be aligned. All of it follows from
//! the granule and the table's `TnSZ` (the region translated is `2^(64 - TnSZ)`
//! bytes).
//!
//! For the 4 KiB granule every level resolves 9 VA bits on top of the 12 bit
//! page offset, and `TnSZ` picks where the walk starts:
//!
//! | `TnSZ`   | root level | bits resolved at the root |
//! |----------|-----------:|---------------------------|
//! | 12..=15  | -1         | 52-bit VA, not walkable   |
//! | 16..=24  | 0          | 9 ..= 1                   |
//! | 25..=33  | 1          | 9 ..= 1                   |
//! | 34..=42  | 2          | 9 ..= 1                   |
//! | 43..=48  | 3          | 9 ..= 4                   |
//!
//! Non-root levels always have 512 entries. A root with fewer entries only
//! needs to be aligned to its own size, but never to less than 64 bytes.

use bitfield_struct::bitfield;
use kernel_memory_addresses::{PageSize, Size1G, Size4K};
use log::error;

/// Size in bytes of one descriptor.
pub const DESCRIPTOR_SIZE: usize = 8;

/// Error raised for an invalid table geometry.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GeometryError {
    #[error("TnSZ {tnsz} is outside the range a 4 KiB granule can translate")]
    UnsupportedTnsz { tnsz: u8 },
    #[error("root level {root_level} cannot resolve the VA bits left by TnSZ {tnsz}")]
    RootLevelMismatch { tnsz: u8, root_level: i8 },
    #[error("translation level {level} does not exist")]
    LevelOutOfRange { level: i8 },
    #[error("the {kib} KiB translation granule is not implemented")]
    GranuleNotImplemented { kib: u32 },
}

/// Translation granule selected in `TCR_EL1.TG0` / `TG1`.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum GranuleSize {
    Kb4,
    Kb16,
    Kb64,
}

impl GranuleSize {
    #[must_use]
    pub const fn kib(self) -> u32 {
        match self {
            Self::Kb4 => 4,
            Self::Kb16 => 16,
            Self::Kb64 => 64,
        }
    }

    /// `TCR_EL1.TG0` encoding.
    #[must_use]
    pub const fn tg0(self) -> u8 {
        match self {
            Self::Kb4 => 0b00,
            Self::Kb16 => 0b10,
            Self::Kb64 => 0b01,
        }
    }

    /// `TCR_EL1.TG1` encoding, which differs from [`tg0`](Self::tg0).
    #[must_use]
    pub const fn tg1(self) -> u8 {
        match self {
            Self::Kb4 => 0b10,
            Self::Kb16 => 0b01,
            Self::Kb64 => 0b11,
        }
    }

    /// The geometry implementation for this granule.
    ///
    /// # Errors
    /// Only the 4 KiB granule is implemented; the others are reported with
    /// [`GeometryError::GranuleNotImplemented`].
    pub fn geometry(self) -> Result<&'static dyn Granule, GeometryError> {
        match self {
            Self::Kb4 => Ok(&Granule4K),
            Self::Kb16 | Self::Kb64 => {
                error!(target: "paging", "{} KiB granule geometry is not implemented", self.kib());
                Err(GeometryError::GranuleNotImplemented { kib: self.kib() })
            }
        }
    }
}

/// Per-granule table geometry.
pub trait Granule {
    /// Level at which leaves are page descriptors.
    fn page_level(&self) -> i8;

    /// Root level of a table translating `2^(64 - tnsz)` bytes.
    ///
    /// # Errors
    /// [`GeometryError::UnsupportedTnsz`] if the granule cannot translate it.
    fn root_level(&self, tnsz: u8) -> Result<i8, GeometryError>;

    /// Number of entries in a table at `level`; `0` above the root.
    ///
    /// # Errors
    /// [`GeometryError::RootLevelMismatch`] if the root level leaves no (or
    /// too many) VA bits to resolve, [`GeometryError::LevelOutOfRange`] below
    /// the page level.
    fn entries_per_level(&self, config: &TableConfig, level: i8) -> Result<usize, GeometryError>;

    /// Bytes of VA space one entry at `level` covers.
    ///
    /// # Errors
    /// [`GeometryError::LevelOutOfRange`] for levels that have no entry size.
    fn entry_size(&self, level: i8) -> Result<u64, GeometryError>;

    /// Required alignment, in bytes, of a table at `level`.
    ///
    /// # Errors
    /// Propagates [`entries_per_level`](Self::entries_per_level).
    fn level_alignment(&self, config: &TableConfig, level: i8) -> Result<usize, GeometryError>;

    /// Shift that moves the VA bits resolved at `level` down to bit 0.
    fn index_shift(&self, level: i8) -> u32;

    /// Highest (coarsest) level that may hold a block descriptor.
    fn first_block_level(&self) -> i8;
}

/// The 4 KiB translation granule.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Granule4K;

impl Granule4K {
    pub const PAGE_LEVEL: i8 = Size4K::LEVEL;
    pub const ENTRIES: usize = 512;
    const PAGE_SHIFT: u32 = Size4K::SHIFT;
    const BITS_PER_LEVEL: u32 = 9;
}

impl Granule for Granule4K {
    fn page_level(&self) -> i8 {
        Self::PAGE_LEVEL
    }

    fn root_level(&self, tnsz: u8) -> Result<i8, GeometryError> {
        match tnsz {
            12..=15 => Ok(-1),
            16..=24 => Ok(0),
            25..=33 => Ok(1),
            34..=42 => Ok(2),
            43..=48 => Ok(3),
            _ => {
                error!(target: "paging", "TnSZ {tnsz} is not supported by the 4 KiB granule");
                Err(GeometryError::UnsupportedTnsz { tnsz })
            }
        }
    }

    #[allow(clippy::cast_possible_wrap)]
    fn entries_per_level(&self, config: &TableConfig, level: i8) -> Result<usize, GeometryError> {
        if level > Self::PAGE_LEVEL {
            return Err(GeometryError::LevelOutOfRange { level });
        }
        let root_level = config.root_level();
        if level > root_level {
            return Ok(Self::ENTRIES);
        }
        if level < root_level {
            return Ok(0);
        }

        let levels_below = i32::from(Self::PAGE_LEVEL - level);
        let bits = 64
            - i32::from(config.tnsz())
            - Self::PAGE_SHIFT as i32
            - Self::BITS_PER_LEVEL as i32 * levels_below;
        if bits <= 0 || bits > Self::BITS_PER_LEVEL as i32 {
            error!(
                target: "paging",
                "root level {root_level} does not fit TnSZ {} ({bits} bits left to resolve)",
                config.tnsz()
            );
            return Err(GeometryError::RootLevelMismatch {
                tnsz: config.tnsz(),
                root_level,
            });
        }
        Ok(1 << bits)
    }

    fn entry_size(&self, level: i8) -> Result<u64, GeometryError> {
        match level {
            0..=3 => Ok(1 << self.index_shift(level)),
            _ => Err(GeometryError::LevelOutOfRange { level }),
        }
    }

    fn level_alignment(&self, config: &TableConfig, level: i8) -> Result<usize, GeometryError> {
        if level == config.root_level() {
            let count = self.entries_per_level(config, level)?;
            Ok((count * DESCRIPTOR_SIZE).max(64))
        } else {
            Ok(Self::ENTRIES * DESCRIPTOR_SIZE)
        }
    }

    #[allow(clippy::cast_sign_loss)]
    fn index_shift(&self, level: i8) -> u32 {
        let levels_below = (Self::PAGE_LEVEL - level).max(0) as u32;
        Self::PAGE_SHIFT + Self::BITS_PER_LEVEL * levels_below
    }

    fn first_block_level(&self) -> i8 {
        Size1G::LEVEL
    }
}

/// Table flags.
#[bitfield(u32)]
#[derive(PartialEq, Eq, Hash)]
pub struct TableFlags {
    /// Table descriptors restrict everything below them.
    pub hierarchy_enabled: bool,
    /// The table describes the secure address space.
    pub secure: bool,
    /// The table translates the top of the address space (`TTBR1_EL1`)
    /// rather than the bottom (`TTBR0_EL1`).
    pub high_half: bool,
    #[bits(29)]
    __reserved: u32,
}

/// Shape of one translation table.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct TableConfig {
    root_level: i8,
    page_level: i8,
    granule: GranuleSize,
    tnsz: u8,
    flags: TableFlags,
}

impl TableConfig {
    /// Configuration for a 4 KiB-granule table translating `2^(64 - tnsz)` bytes.
    ///
    /// # Errors
    /// [`GeometryError::UnsupportedTnsz`] for `tnsz` outside `12..=48`.
    pub fn new_4kb(tnsz: u8, flags: TableFlags) -> Result<Self, GeometryError> {
        let root_level = Granule4K.root_level(tnsz)?;
        Ok(Self {
            root_level,
            page_level: Granule4K::PAGE_LEVEL,
            granule: GranuleSize::Kb4,
            tnsz,
            flags,
        })
    }

    /// Unvalidated configuration; the geometry queries report inconsistencies.
    #[must_use]
    pub const fn from_raw_parts(
        root_level: i8,
        page_level: i8,
        granule: GranuleSize,
        tnsz: u8,
        flags: TableFlags,
    ) -> Self {
        Self {
            root_level,
            page_level,
            granule,
            tnsz,
            flags,
        }
    }

    #[must_use]
    pub const fn root_level(&self) -> i8 {
        self.root_level
    }

    #[must_use]
    pub const fn page_level(&self) -> i8 {
        self.page_level
    }

    #[must_use]
    pub const fn granule(&self) -> GranuleSize {
        self.granule
    }

    #[must_use]
    pub const fn tnsz(&self) -> u8 {
        self.tnsz
    }

    #[must_use]
    pub const fn flags(&self) -> TableFlags {
        self.flags
    }

    #[must_use]
    pub const fn hierarchy_enabled(&self) -> bool {
        self.flags.hierarchy_enabled()
    }

    #[must_use]
    pub const fn high_half(&self) -> bool {
        self.flags.high_half()
    }

    /// Size in bytes of the translated region.
    #[must_use]
    pub const fn region_size(&self) -> u128 {
        1u128 << (64 - self.tnsz as u32)
    }

    /// Lowest virtual address the table translates: `0` for a low table,
    /// `2^64 - 2^(64 - TnSZ)` for a high one.
    #[must_use]
    pub fn va_base(&self) -> u64 {
        if self.high_half() {
            u64::MAX
                .checked_shl(64 - u32::from(self.tnsz))
                .unwrap_or(0)
        } else {
            0
        }
    }

    /// # Errors
    /// See [`GranuleSize::geometry`].
    pub fn geometry(&self) -> Result<&'static dyn Granule, GeometryError> {
        self.granule.geometry()
    }

    /// # Errors
    /// See [`Granule::entries_per_level`].
    pub fn entries_per_level(&self, level: i8) -> Result<usize, GeometryError> {
        self.geometry()?.entries_per_level(self, level)
    }

    /// # Errors
    /// See [`Granule::entry_size`].
    pub fn entry_size(&self, level: i8) -> Result<u64, GeometryError> {
        self.geometry()?.entry_size(level)
    }

    /// # Errors
    /// See [`Granule::level_alignment`].
    pub fn level_alignment(&self, level: i8) -> Result<usize, GeometryError> {
        self.geometry()?.level_alignment(self, level)
    }

    /// Bytes needed for the table array at `level`.
    ///
    /// # Errors
    /// See [`Granule::entries_per_level`].
    pub fn level_bytes(&self, level: i8) -> Result<usize, GeometryError> {
        Ok(self.entries_per_level(level)? * DESCRIPTOR_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(tnsz: u8) -> TableConfig {
        TableConfig::new_4kb(tnsz, TableFlags::new().with_hierarchy_enabled(true)).unwrap()
    }

    #[test]
    fn root_level_by_tnsz() {
        assert_eq!(config(12).root_level(), -1);
        assert_eq!(config(16).root_level(), 0);
        assert_eq!(config(24).root_level(), 0);
        assert_eq!(config(25).root_level(), 1);
        assert_eq!(config(33).root_level(), 1);
        assert_eq!(config(34).root_level(), 2);
        assert_eq!(config(42).root_level(), 2);
        assert_eq!(config(43).root_level(), 3);
        assert_eq!(config(48).root_level(), 3);
        assert_eq!(
            TableConfig::new_4kb(11, TableFlags::new()),
            Err(GeometryError::UnsupportedTnsz { tnsz: 11 })
        );
        assert_eq!(
            TableConfig::new_4kb(49, TableFlags::new()),
            Err(GeometryError::UnsupportedTnsz { tnsz: 49 })
        );
        assert_eq!(config(30).page_level(), 3);
    }

    #[test]
    fn root_covers_the_translated_region() {
        for tnsz in 16..=48u8 {
            let cfg = config(tnsz);
            let root = cfg.root_level();
            let entries = cfg.entries_per_level(root).unwrap() as u128;
            let size = u128::from(cfg.entry_size(root).unwrap());
            assert_eq!(entries * size, cfg.region_size(), "tnsz {tnsz}");
        }
    }

    #[test]
    fn high_tables_start_below_the_top() {
        assert_eq!(config(25).va_base(), 0);
        let high = TableConfig::new_4kb(25, TableFlags::new().with_high_half(true)).unwrap();
        assert!(high.high_half());
        assert_eq!(high.va_base(), 0xFFFF_FF80_0000_0000);
        let high = TableConfig::new_4kb(48, TableFlags::new().with_high_half(true)).unwrap();
        assert_eq!(high.va_base(), 0xFFFF_FFFF_FFFF_0000);
    }

    #[test]
    fn entries_above_and_below_root() {
        let cfg = config(25);
        assert_eq!(cfg.entries_per_level(0), Ok(0));
        assert_eq!(cfg.entries_per_level(1), Ok(512));
        assert_eq!(cfg.entries_per_level(2), Ok(512));
        assert_eq!(cfg.entries_per_level(3), Ok(512));
        assert_eq!(
            cfg.entries_per_level(4),
            Err(GeometryError::LevelOutOfRange { level: 4 })
        );

        let cfg = config(32);
        assert_eq!(cfg.entries_per_level(1), Ok(4));
    }

    #[test]
    fn sizes_and_alignment() {
        let cfg = config(32);
        assert_eq!(cfg.entry_size(0), Ok(1 << 39));
        assert_eq!(cfg.entry_size(1), Ok(1 << 30));
        assert_eq!(cfg.entry_size(2), Ok(1 << 21));
        assert_eq!(cfg.entry_size(3), Ok(1 << 12));
        assert_eq!(
            cfg.entry_size(-1),
            Err(GeometryError::LevelOutOfRange { level: -1 })
        );
        // Four root entries need 32 bytes, but roots align to at least 64.
        assert_eq!(cfg.level_alignment(1), Ok(64));
        assert_eq!(cfg.level_alignment(2), Ok(4096));
        assert_eq!(config(25).level_alignment(1), Ok(4096));
    }

    #[test]
    fn leaf_sizes_match_their_levels() {
        use kernel_memory_addresses::Size2M;

        let cfg = config(16);
        assert_eq!(cfg.entry_size(Size4K::LEVEL), Ok(Size4K::SIZE));
        assert_eq!(cfg.entry_size(Size2M::LEVEL), Ok(Size2M::SIZE));
        assert_eq!(cfg.entry_size(Size1G::LEVEL), Ok(Size1G::SIZE));
        assert_eq!(Granule4K.first_block_level(), Size1G::LEVEL);
    }

    #[test]
    fn root_level_mismatch_is_reported() {
        let cfg = TableConfig::from_raw_parts(3, 3, GranuleSize::Kb4, 10, TableFlags::new());
        assert_eq!(
            cfg.entries_per_level(3),
            Err(GeometryError::RootLevelMismatch {
                tnsz: 10,
                root_level: 3
            })
        );
        let cfg = TableConfig::from_raw_parts(1, 3, GranuleSize::Kb4, 40, TableFlags::new());
        assert!(cfg.entries_per_level(1).is_err());
    }

    #[test]
    fn other_granules_are_not_implemented() {
        let cfg = TableConfig::from_raw_parts(1, 3, GranuleSize::Kb16, 25, TableFlags::new());
        assert_eq!(
            cfg.entries_per_level(1),
            Err(GeometryError::GranuleNotImplemented { kib: 16 })
        );
        assert_eq!(
            GranuleSize::Kb64.geometry().err(),
            Some(GeometryError::GranuleNotImplemented { kib: 64 })
        );
    }

    #[test]
    fn tcr_granule_encodings_differ_per_register() {
        assert_eq!((GranuleSize::Kb4.tg0(), GranuleSize::Kb4.tg1()), (0b00, 0b10));
        assert_eq!((GranuleSize::Kb16.tg0(), GranuleSize::Kb16.tg1()), (0b10, 0b01));
        assert_eq!((GranuleSize::Kb64.tg0(), GranuleSize::Kb64.tg1()), (0b01, 0b11));
    }
}
