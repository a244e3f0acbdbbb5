use crate::system_register;
use bitfield_struct::bitfield;

/// `ID_AA64MMFR1_EL1` - `AArch64` Memory Model Feature Register 1.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct IdAa64Mmfr1El1 {
    /// Bits 0-3 - `HAFDBS`: hardware access flag and dirty state updates.
    #[bits(4)]
    pub hafdbs: u8,

    #[bits(4)]
    pub vmid_bits: u8,

    #[bits(4)]
    pub vh: u8,

    /// Bits 12-15 - `HPDS`: hierarchical permission disables in `TCR_EL1`.
    #[bits(4)]
    pub hpds: u8,

    #[bits(4)]
    pub lo: u8,

    #[bits(4)]
    pub pan: u8,

    #[bits(4)]
    pub spec_sei: u8,

    #[bits(4)]
    pub xnx: u8,

    #[bits(32)]
    __rest: u32,
}

impl IdAa64Mmfr1El1 {
    /// Whether `TCR_EL1.HPD{0,1}` may switch hierarchical permissions off.
    #[must_use]
    pub const fn hierarchical_disable_supported(&self) -> bool {
        self.hpds() != 0
    }
}

system_register!(load IdAa64Mmfr1El1, "id_aa64mmfr1_el1");
