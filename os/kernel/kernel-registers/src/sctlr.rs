use crate::system_register;
use bitfield_struct::bitfield;

/// `SCTLR_EL1` - System Control Register (EL1).
///
/// Only the low control bits are broken out; the rest is carried through
/// unchanged on read-modify-write.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct SctlrEl1 {
    /// Bit 0 - M: stage 1 address translation enable.
    pub mmu_enable: bool,

    /// Bit 1 - A: alignment check enable.
    pub alignment_check: bool,

    /// Bit 2 - C: data cache enable.
    pub data_cache: bool,

    /// Bit 3 - SA: stack alignment check at EL1.
    pub stack_alignment_check: bool,

    pub stack_alignment_check_el0: bool,

    #[bits(7)]
    __bits_5_11: u8,

    /// Bit 12 - I: instruction cache enable.
    pub instruction_cache: bool,

    #[bits(6)]
    __bits_13_18: u8,

    /// Bit 19 - WXN: writable implies execute-never.
    pub write_execute_never: bool,

    #[bits(44)]
    __bits_20_63: u64,
}

system_register!(load store SctlrEl1, "sctlr_el1");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mmu_enable_is_bit_zero() {
        assert_eq!(SctlrEl1::new().with_mmu_enable(true).into_bits(), 1);
        let reg = SctlrEl1::from_bits(0x30D0_1805);
        assert!(reg.mmu_enable());
        assert!(reg.data_cache());
        assert!(reg.instruction_cache());
        assert_eq!(reg.with_mmu_enable(false).into_bits(), 0x30D0_1804);
    }
}
