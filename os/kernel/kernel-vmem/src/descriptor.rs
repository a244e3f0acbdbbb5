//! # `AArch64` Translation Descriptors (4 KiB granule)
//!
//! Every slot of a translation table is a 64-bit descriptor. Bit 0 says whether
//! the slot is valid at all; bit 1 disambiguates the remaining layout:
//!
//! ```text
//!               bit 1 = 1                bit 1 = 0
//! L0..L2   ->   TableDescriptor          BlockDescriptor (L1, L2 only)
//! L3       ->   PageDescriptor           reserved, treated as invalid
//! ```
//!
//! - [`TableDescriptor`]: points at the next-level table and carries the
//!   hierarchical restrictions (`APTable`, `PXNTable`, `UXNTable`, `NSTable`).
//! - [`BlockDescriptor`]: maps a 1 GiB (L1) or 2 MiB (L2) region.
//! - [`PageDescriptor`]: maps a 4 KiB page at L3.
//! - [`Descriptor`]: decoded view of a [`RawDescriptor`], given its level.
//!
//! ## Output addresses
//!
//! Tables and pages store bits `[47:12]` of the output address in place. Blocks
//! store bits `[47:17]` in place; a 2 MiB or 1 GiB block base simply has the
//! low bits of that window clear, so one encoding serves both block sizes.
//! All setters reject addresses that are misaligned for their descriptor or that
//! need more than 48 bits, instead of truncating them.

use core::fmt;

use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// Width of the output address every descriptor kind can hold.
pub const OUTPUT_ADDRESS_BITS: u32 = 48;

/// Error returned when an address does not fit a descriptor's address field.
#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DescriptorError {
    #[error("address {address:#x} is not aligned to {alignment:#x}")]
    Misaligned { address: u64, alignment: u64 },
    #[error("address {address:#x} does not fit into a 48-bit output address")]
    NotRepresentable { address: u64 },
}

const fn check_output_address(pa: PhysicalAddress, alignment: u64) -> Result<u64, DescriptorError> {
    let address = pa.as_u64();
    if !pa.is_aligned_to(alignment) {
        return Err(DescriptorError::Misaligned { address, alignment });
    }
    if address >> OUTPUT_ADDRESS_BITS != 0 {
        return Err(DescriptorError::NotRepresentable { address });
    }
    Ok(address)
}

/// An undecoded 64-bit table slot.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct RawDescriptor(u64);

impl RawDescriptor {
    /// The all-zero descriptor; faults on any access.
    pub const INVALID: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    #[must_use]
    pub const fn into_bits(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.0 & 1 != 0
    }

    /// Bit 1: "table" above the page level, "page" at the page level.
    #[inline]
    #[must_use]
    pub const fn is_table_or_page(self) -> bool {
        self.0 & 0b10 != 0
    }
}

impl fmt::Debug for RawDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RawDescriptor({:#018x})", self.0)
    }
}

/// Table descriptor: points at the next-level translation table.
///
/// The four hierarchical bits restrict everything mapped below this entry
/// when hierarchical permissions are enabled. Zero means "no restriction".
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct TableDescriptor {
    /// Bit 0 - valid.
    pub valid: bool,

    /// Bit 1 - must be 1 for a table descriptor.
    pub is_table: bool,

    /// Bits 2-11 - ignored by hardware.
    #[bits(10)]
    pub sw_use_low: u16,

    /// Bits 12-47 - next-level table address `[47:12]`.
    #[bits(36)]
    address_data: u64,

    #[bits(3)]
    __res0: u8,

    /// Bits 51-58 - ignored by hardware.
    #[bits(8)]
    pub sw_use_high: u8,

    /// Bit 59 - `PXNTable`.
    pub priv_exec_never: bool,

    /// Bit 60 - `UXNTable` (`XNTable`).
    pub unpriv_exec_never: bool,

    /// Bit 61 - `APTable[0]`.
    pub user: bool,

    /// Bit 62 - `APTable[1]`: no writes below this entry.
    pub readonly: bool,

    /// Bit 63 - `NSTable`.
    pub non_secure: bool,
}

impl TableDescriptor {
    /// Alignment required of a next-level table address.
    pub const ADDRESS_ALIGNMENT: u64 = 1 << 12;

    /// A valid table descriptor pointing at `next`, with no hierarchical restrictions.
    ///
    /// # Errors
    /// See [`try_with_address`](Self::try_with_address).
    pub const fn pointing_to(next: PhysicalAddress) -> Result<Self, DescriptorError> {
        Self::new().with_valid(true).with_is_table(true).try_with_address(next)
    }

    #[inline]
    #[must_use]
    pub const fn address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.address_data() << 12)
    }

    /// # Errors
    /// Fails if `pa` is not 4 KiB aligned or needs more than 48 bits.
    #[inline]
    pub const fn try_set_address(&mut self, pa: PhysicalAddress) -> Result<(), DescriptorError> {
        match check_output_address(pa, Self::ADDRESS_ALIGNMENT) {
            Ok(address) => {
                self.set_address_data(address >> 12);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// # Errors
    /// Fails if `pa` is not 4 KiB aligned or needs more than 48 bits.
    #[inline]
    pub const fn try_with_address(mut self, pa: PhysicalAddress) -> Result<Self, DescriptorError> {
        match self.try_set_address(pa) {
            Ok(()) => Ok(self),
            Err(e) => Err(e),
        }
    }
}

/// Block descriptor: maps a 1 GiB (L1) or 2 MiB (L2) region.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct BlockDescriptor {
    /// Bit 0 - valid.
    pub valid: bool,

    /// Bit 1 - must be 0 for a block descriptor.
    pub is_table: bool,

    /// Bits 2-4 - `AttrIndx`: index into `MAIR_EL1`.
    #[bits(3)]
    pub mair_index: u8,

    /// Bit 5 - NS.
    pub non_secure: bool,

    /// Bit 6 - `AP[1]`: EL0 accessible.
    pub user: bool,

    /// Bit 7 - `AP[2]`: read-only.
    pub readonly: bool,

    /// Bits 8-9 - SH.
    #[bits(2)]
    pub shareability: u8,

    /// Bit 10 - AF. Accessing a block with AF clear faults.
    pub access_flag: bool,

    /// Bit 11 - nG.
    pub non_global: bool,

    #[bits(4)]
    __res0_low: u8,

    /// Bit 16 - nT (block translation, FEAT_BBM).
    pub no_translation: bool,

    /// Bits 17-47 - output address `[47:17]`.
    #[bits(31)]
    address_data: u64,

    #[bits(2)]
    __res0_high: u8,

    /// Bit 50 - GP (BTI guarded).
    pub guarded: bool,

    /// Bit 51 - DBM.
    pub hw_dirty_update: bool,

    /// Bit 52 - contiguous hint.
    pub contiguous: bool,

    /// Bit 53 - PXN.
    pub priv_exec_never: bool,

    /// Bit 54 - UXN.
    pub unpriv_exec_never: bool,

    /// Bits 55-58 - ignored by hardware.
    #[bits(4)]
    pub sw_use: u8,

    /// Bits 59-62 - PBHA.
    #[bits(4)]
    __pbha: u8,

    /// Bit 63 - ignored by hardware.
    pub sw_use_top: bool,
}

impl BlockDescriptor {
    const ADDRESS_SHIFT: u32 = 17;

    #[inline]
    #[must_use]
    pub const fn address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.address_data() << Self::ADDRESS_SHIFT)
    }

    /// Stores the output address of a block of `block_size` bytes.
    ///
    /// # Errors
    /// Fails if `pa` is not aligned to `block_size` or needs more than 48 bits.
    #[inline]
    pub const fn try_set_address(
        &mut self,
        pa: PhysicalAddress,
        block_size: u64,
    ) -> Result<(), DescriptorError> {
        match check_output_address(pa, block_size) {
            Ok(address) => {
                self.set_address_data(address >> Self::ADDRESS_SHIFT);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// # Errors
    /// See [`try_set_address`](Self::try_set_address).
    #[inline]
    pub const fn try_with_address(
        mut self,
        pa: PhysicalAddress,
        block_size: u64,
    ) -> Result<Self, DescriptorError> {
        match self.try_set_address(pa, block_size) {
            Ok(()) => Ok(self),
            Err(e) => Err(e),
        }
    }
}

/// Page descriptor: maps a 4 KiB page at level 3.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct PageDescriptor {
    /// Bit 0 - valid.
    pub valid: bool,

    /// Bit 1 - must be 1 for a page descriptor.
    pub reserved: bool,

    #[bits(3)]
    pub mair_index: u8,

    pub non_secure: bool,

    pub user: bool,

    pub readonly: bool,

    #[bits(2)]
    pub shareability: u8,

    pub access_flag: bool,

    pub non_global: bool,

    /// Bits 12-47 - output address `[47:12]`.
    #[bits(36)]
    address_data: u64,

    #[bits(2)]
    __res0: u8,

    pub guarded: bool,

    pub hw_dirty_update: bool,

    pub contiguous: bool,

    pub priv_exec_never: bool,

    pub unpriv_exec_never: bool,

    #[bits(4)]
    pub sw_use: u8,

    #[bits(4)]
    __pbha: u8,

    pub sw_use_top: bool,
}

impl PageDescriptor {
    pub const ADDRESS_ALIGNMENT: u64 = 1 << 12;

    #[inline]
    #[must_use]
    pub const fn address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.address_data() << 12)
    }

    /// # Errors
    /// Fails if `pa` is not 4 KiB aligned or needs more than 48 bits.
    #[inline]
    pub const fn try_set_address(&mut self, pa: PhysicalAddress) -> Result<(), DescriptorError> {
        match check_output_address(pa, Self::ADDRESS_ALIGNMENT) {
            Ok(address) => {
                self.set_address_data(address >> 12);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// # Errors
    /// Fails if `pa` is not 4 KiB aligned or needs more than 48 bits.
    #[inline]
    pub const fn try_with_address(mut self, pa: PhysicalAddress) -> Result<Self, DescriptorError> {
        match self.try_set_address(pa) {
            Ok(()) => Ok(self),
            Err(e) => Err(e),
        }
    }
}

/// Decoded view of a table slot.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Descriptor {
    /// Faults on access. Keeps the raw bits for diagnostics.
    Invalid(RawDescriptor),
    Table(TableDescriptor),
    Block(BlockDescriptor),
    Page(PageDescriptor),
}

impl Descriptor {
    /// Decodes `raw` as found at `level` of a table whose leaves sit at `page_level`.
    ///
    /// Blocks are only legal on the two levels directly above the page level;
    /// a valid non-table descriptor anywhere higher (L0 for the 4 KiB granule)
    /// decodes as [`Descriptor::Invalid`], and so does a page-level slot with
    /// bit 1 clear.
    #[must_use]
    pub const fn decode(raw: RawDescriptor, level: i8, page_level: i8) -> Self {
        if !raw.is_valid() {
            return Self::Invalid(raw);
        }
        let bits = raw.into_bits();
        if level == page_level {
            if raw.is_table_or_page() {
                Self::Page(PageDescriptor::from_bits(bits))
            } else {
                Self::Invalid(raw)
            }
        } else if raw.is_table_or_page() {
            Self::Table(TableDescriptor::from_bits(bits))
        } else if level + 2 >= page_level {
            Self::Block(BlockDescriptor::from_bits(bits))
        } else {
            Self::Invalid(raw)
        }
    }

    #[must_use]
    pub const fn encode(self) -> RawDescriptor {
        RawDescriptor::from_bits(match self {
            Self::Invalid(raw) => raw.into_bits(),
            Self::Table(d) => d.into_bits(),
            Self::Block(d) => d.into_bits(),
            Self::Page(d) => d.into_bits(),
        })
    }

    /// Output address of a block or page, next-level address of a table.
    #[must_use]
    pub const fn address(&self) -> Option<PhysicalAddress> {
        match self {
            Self::Invalid(_) => None,
            Self::Table(d) => Some(d.address()),
            Self::Block(d) => Some(d.address()),
            Self::Page(d) => Some(d.address()),
        }
    }

    #[must_use]
    pub const fn is_leaf(&self) -> bool {
        matches!(self, Self::Block(_) | Self::Page(_))
    }
}

impl From<TableDescriptor> for RawDescriptor {
    fn from(value: TableDescriptor) -> Self {
        Self(value.into_bits())
    }
}

impl From<BlockDescriptor> for RawDescriptor {
    fn from(value: BlockDescriptor) -> Self {
        Self(value.into_bits())
    }
}

impl From<PageDescriptor> for RawDescriptor {
    fn from(value: PageDescriptor) -> Self {
        Self(value.into_bits())
    }
}
