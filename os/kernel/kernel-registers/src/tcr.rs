use crate::system_register;
use bitfield_struct::bitfield;

/// `TCR_EL1` - Translation Control Register (EL1).
///
/// Selects, for each of the two translation table base registers, the size of
/// the translated region (`TnSZ`), the granule, and the cacheability and
/// shareability of table walks.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct TcrEl1 {
    /// Bits 0-5 - `T0SZ`: the TTBR0 region spans `2^(64 - T0SZ)` bytes.
    #[bits(6)]
    pub t0sz: u8,

    #[bits(1)]
    __res0_6: u8,

    /// Bit 7 - `EPD0`: disable walks through TTBR0 on a TLB miss.
    pub epd0: bool,

    /// Bits 8-9 - `IRGN0`: inner cacheability of TTBR0 walks.
    #[bits(2)]
    pub irgn0: u8,

    /// Bits 10-11 - `ORGN0`: outer cacheability of TTBR0 walks.
    #[bits(2)]
    pub orgn0: u8,

    /// Bits 12-13 - `SH0`: shareability of TTBR0 walks.
    #[bits(2)]
    pub sh0: u8,

    /// Bits 14-15 - `TG0`: TTBR0 granule (`0b00` 4K, `0b01` 64K, `0b10` 16K).
    #[bits(2)]
    pub tg0: u8,

    /// Bits 16-21 - `T1SZ`.
    #[bits(6)]
    pub t1sz: u8,

    /// Bit 22 - `A1`: ASID comes from TTBR1 rather than TTBR0.
    pub a1: bool,

    /// Bit 23 - `EPD1`.
    pub epd1: bool,

    #[bits(2)]
    pub irgn1: u8,

    #[bits(2)]
    pub orgn1: u8,

    #[bits(2)]
    pub sh1: u8,

    /// Bits 30-31 - `TG1`: TTBR1 granule (`0b10` 4K, `0b01` 16K, `0b11` 64K).
    #[bits(2)]
    pub tg1: u8,

    /// Bits 32-34 - `IPS`: intermediate physical address size, `PARange` encoded.
    #[bits(3)]
    pub ips: u8,

    #[bits(1)]
    __res0_35: u8,

    /// Bit 36 - `AS`: 16 bit ASIDs.
    pub asid16: bool,

    pub tbi0: bool,

    pub tbi1: bool,

    /// Bit 39 - `HA`: hardware access flag update.
    pub ha: bool,

    /// Bit 40 - `HD`: hardware dirty state update.
    pub hd: bool,

    /// Bit 41 - `HPD0`: hierarchical permissions disabled for TTBR0.
    pub hpd0: bool,

    /// Bit 42 - `HPD1`.
    pub hpd1: bool,

    #[bits(21)]
    __bits_43_63: u32,
}

impl TcrEl1 {
    /// `IRGN`/`ORGN`: write-back read-allocate write-allocate cacheable.
    pub const WALK_WRITE_BACK: u8 = 0b01;
    /// `IRGN`/`ORGN`: write-back read-allocate, no write-allocate.
    pub const WALK_WRITE_BACK_NO_WRITE_ALLOCATE: u8 = 0b11;
    /// `SH`: outer shareable.
    pub const OUTER_SHAREABLE: u8 = 0b10;
    /// `SH`: inner shareable.
    pub const INNER_SHAREABLE: u8 = 0b11;
}

system_register!(load store TcrEl1, "tcr_el1");
