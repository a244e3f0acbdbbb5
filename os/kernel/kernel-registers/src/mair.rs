use crate::system_register;
use bitfield_struct::bitfield;

/// `MAIR_EL1` - Memory Attribute Indirection Register.
///
/// Eight one-byte memory attribute encodings; leaf descriptors select one
/// through their `AttrIndx` field.
#[bitfield(u64)]
#[derive(PartialEq, Eq)]
pub struct MairEl1 {
    pub attr0: u8,
    pub attr1: u8,
    pub attr2: u8,
    pub attr3: u8,
    pub attr4: u8,
    pub attr5: u8,
    pub attr6: u8,
    pub attr7: u8,
}

impl MairEl1 {
    /// Device-nGnRnE memory.
    pub const DEVICE_NGNRNE: u8 = 0x00;
    /// Normal memory, inner and outer non-cacheable.
    pub const NORMAL_NON_CACHEABLE: u8 = 0x44;
    /// Normal memory, inner and outer write-back read/write-allocate.
    pub const NORMAL_WRITE_BACK: u8 = 0xFF;

    /// Attribute byte at `index` (`0..8`).
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn attr(&self, index: u8) -> u8 {
        (self.into_bits() >> ((index as u64 & 7) * 8)) as u8
    }

    /// Replaces the attribute byte at `index` (`0..8`).
    #[must_use]
    pub const fn with_attr(self, index: u8, value: u8) -> Self {
        let shift = (index as u64 & 7) * 8;
        let bits = (self.into_bits() & !(0xFF << shift)) | ((value as u64) << shift);
        Self::from_bits(bits)
    }
}

system_register!(load store MairEl1, "mair_el1");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indexed_attributes_match_fields() {
        let mair = MairEl1::new()
            .with_attr(1, MairEl1::NORMAL_WRITE_BACK)
            .with_attr(2, MairEl1::DEVICE_NGNRNE)
            .with_attr(7, MairEl1::NORMAL_NON_CACHEABLE);
        assert_eq!(mair.attr1(), 0xFF);
        assert_eq!(mair.attr2(), 0x00);
        assert_eq!(mair.attr7(), 0x44);
        assert_eq!(mair.attr(1), 0xFF);
        assert_eq!(mair.into_bits(), 0x4400_0000_0000_FF00);
    }
}
