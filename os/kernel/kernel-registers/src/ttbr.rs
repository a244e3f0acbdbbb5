use crate::system_register;
use bitfield_struct::bitfield;
use kernel_memory_addresses::PhysicalAddress;

/// `TTBRn_EL1` - Translation Table Base Register.
///
/// Holds the physical base address of a root translation table plus the
/// ASID tag. Both base registers share this layout; [`Ttbr0El1`] and
/// [`Ttbr1El1`] pick the register that is accessed.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct Ttbr {
    /// Bit 0 - `CnP`: common not private.
    pub cnp: bool,

    /// Bits 1-47 - `BADDR[47:1]`.
    #[bits(47)]
    baddr: u64,

    /// Bits 48-63 - ASID.
    #[bits(16)]
    pub asid: u16,
}

impl Ttbr {
    /// Points the register at a root table.
    ///
    /// The root table must be aligned to its own size, and at least to
    /// 64 bytes.
    #[must_use]
    pub const fn from_root(root: PhysicalAddress) -> Self {
        debug_assert!(root.as_u64() & 0x3F == 0, "root table must be 64-byte aligned");
        Self::new().with_baddr(root.as_u64() >> 1)
    }

    /// The physical base of the root table.
    #[must_use]
    pub const fn root(&self) -> PhysicalAddress {
        PhysicalAddress::new(self.baddr() << 1)
    }
}

/// Accessor for `TTBR0_EL1` (lower virtual address range).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[repr(transparent)]
pub struct Ttbr0El1(pub Ttbr);

/// Accessor for `TTBR1_EL1` (upper virtual address range).
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
#[repr(transparent)]
pub struct Ttbr1El1(pub Ttbr);

impl Ttbr0El1 {
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(Ttbr::from_bits(bits))
    }

    #[must_use]
    pub const fn into_bits(self) -> u64 {
        self.0.into_bits()
    }
}

impl Ttbr1El1 {
    #[must_use]
    pub const fn from_bits(bits: u64) -> Self {
        Self(Ttbr::from_bits(bits))
    }

    #[must_use]
    pub const fn into_bits(self) -> u64 {
        self.0.into_bits()
    }
}

system_register!(load store Ttbr0El1, "ttbr0_el1");
system_register!(load store Ttbr1El1, "ttbr1_el1");
