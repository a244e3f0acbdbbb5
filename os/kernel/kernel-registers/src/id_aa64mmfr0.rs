use crate::system_register;
use bitfield_struct::bitfield;

/// `ID_AA64MMFR0_EL1` - `AArch64` Memory Model Feature Register 0.
///
/// Read-only. Reports the implemented physical address size and which
/// translation granules the core supports.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct IdAa64Mmfr0El1 {
    /// Bits 0-3 - `PARange`: implemented physical address size.
    #[bits(4)]
    pub pa_range: u8,

    /// Bits 4-7 - `ASIDBits`: `0b0000` for 8 bits, `0b0010` for 16 bits.
    #[bits(4)]
    pub asid_bits: u8,

    #[bits(4)]
    pub big_end: u8,

    #[bits(4)]
    pub sns_mem: u8,

    #[bits(4)]
    pub big_end_el0: u8,

    /// Bits 20-23 - `TGran16`.
    #[bits(4)]
    pub tgran16: u8,

    /// Bits 24-27 - `TGran64`.
    #[bits(4)]
    pub tgran64: u8,

    /// Bits 28-31 - `TGran4`: `0b1111` means the 4 KiB granule is missing.
    #[bits(4)]
    pub tgran4: u8,

    #[bits(4)]
    pub tgran16_2: u8,

    #[bits(4)]
    pub tgran64_2: u8,

    #[bits(4)]
    pub tgran4_2: u8,

    #[bits(4)]
    pub exs: u8,

    #[bits(8)]
    __res0: u8,

    #[bits(4)]
    pub fgt: u8,

    #[bits(4)]
    pub ecv: u8,
}

impl IdAa64Mmfr0El1 {
    const TGRAN4_NOT_IMPLEMENTED: u8 = 0b1111;

    /// Physical address width in bits, or `None` for a reserved encoding.
    #[must_use]
    pub const fn pa_bits(&self) -> Option<u8> {
        match self.pa_range() {
            0b0000 => Some(32),
            0b0001 => Some(36),
            0b0010 => Some(40),
            0b0011 => Some(42),
            0b0100 => Some(44),
            0b0101 => Some(48),
            0b0110 => Some(52),
            _ => None,
        }
    }

    #[must_use]
    pub const fn supports_4kb_granule(&self) -> bool {
        self.tgran4() != Self::TGRAN4_NOT_IMPLEMENTED
    }
}

/// Encoding of a physical address width in `PARange` / `TCR_EL1.IPS` form.
///
/// Widths that are not architecturally defined round down to the next
/// defined one.
#[must_use]
pub const fn pa_range_for_bits(bits: u8) -> u8 {
    match bits {
        52.. => 0b0110,
        48..=51 => 0b0101,
        44..=47 => 0b0100,
        42..=43 => 0b0011,
        40..=41 => 0b0010,
        36..=39 => 0b0001,
        _ => 0b0000,
    }
}

system_register!(load IdAa64Mmfr0El1, "id_aa64mmfr0_el1");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_pa_range() {
        let reg = IdAa64Mmfr0El1::new().with_pa_range(0b0101);
        assert_eq!(reg.pa_bits(), Some(48));
        let reg = IdAa64Mmfr0El1::from_bits(0x0000_0000_0000_0002);
        assert_eq!(reg.pa_bits(), Some(40));
        let reg = IdAa64Mmfr0El1::new().with_pa_range(0b0111);
        assert_eq!(reg.pa_bits(), None);
    }

    #[test]
    fn tgran4_field_position() {
        let reg = IdAa64Mmfr0El1::from_bits(0xF000_0000);
        assert_eq!(reg.tgran4(), 0b1111);
        assert!(!reg.supports_4kb_granule());
        assert!(IdAa64Mmfr0El1::new().supports_4kb_granule());
    }

    #[test]
    fn pa_range_encoding_matches_decoding() {
        for range in 0..=6u8 {
            let bits = IdAa64Mmfr0El1::new().with_pa_range(range).pa_bits();
            assert_eq!(bits.map(pa_range_for_bits), Some(range));
        }
        assert_eq!(pa_range_for_bits(39), 0b0001);
    }
}
