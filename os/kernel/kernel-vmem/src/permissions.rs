//! # Mapping Permissions
//!
//! [`Permissions`] is the level-independent view of the attribute bits a leaf
//! descriptor carries. It is what region initializers hand to the range
//! driller, what a block split copies into its children, and what the dumper
//! and the translator accumulate while walking down a table.
//!
//! Folding a descriptor into an accumulated set ORs its restrictive bits
//! (`non_secure`, `user`, `readonly`, `priv_exec_never`, `unpriv_exec_never`)
//! so a child can only ever add restrictions; the remaining attributes are
//! taken from the leaf as-is.

use core::fmt;

use crate::descriptor::{BlockDescriptor, Descriptor, PageDescriptor, TableDescriptor};

/// Index into `MAIR_EL1` selecting a memory type.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Hash)]
pub struct MairIndex(u8);

impl MairIndex {
    /// Slot 0 is left unprogrammed.
    pub const UNDEFINED: Self = Self(0);
    /// Normal write-back cacheable memory.
    pub const NORMAL: Self = Self(1);
    /// Device-nGnRnE memory.
    pub const DEVICE: Self = Self(2);

    /// Wraps a raw 3-bit `AttrIndx` value.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0b111)
    }

    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self.0
    }
}

impl fmt::Debug for MairIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::UNDEFINED => f.write_str("MairIndex::UNDEFINED"),
            Self::NORMAL => f.write_str("MairIndex::NORMAL"),
            Self::DEVICE => f.write_str("MairIndex::DEVICE"),
            Self(other) => write!(f, "MairIndex({other})"),
        }
    }
}

/// Shareability domain (`SH[1:0]`).
#[repr(u8)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum Shareability {
    #[default]
    NonShareable = 0b00,
    /// Architecturally reserved; kept so decoding never loses bits.
    Reserved = 0b01,
    OuterShareable = 0b10,
    InnerShareable = 0b11,
}

impl Shareability {
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0b00 => Self::NonShareable,
            0b01 => Self::Reserved,
            0b10 => Self::OuterShareable,
            _ => Self::InnerShareable,
        }
    }

    #[must_use]
    pub const fn into_bits(self) -> u8 {
        self as u8
    }
}

/// Attribute set of a leaf mapping.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
#[allow(clippy::struct_excessive_bools)]
pub struct Permissions {
    pub non_secure: bool,
    pub user: bool,
    pub readonly: bool,
    pub priv_exec_never: bool,
    pub unpriv_exec_never: bool,
    pub mair_index: MairIndex,
    pub shareability: Shareability,
    pub access_flag: bool,
    pub non_global: bool,
    pub hw_dirty_update: bool,
    /// Never written back into block descriptors.
    pub contiguous: bool,
    pub guarded: bool,
}

impl Permissions {
    /// Nothing restricted, nothing selected.
    pub const OPEN: Self = Self {
        non_secure: false,
        user: false,
        readonly: false,
        priv_exec_never: false,
        unpriv_exec_never: false,
        mair_index: MairIndex::UNDEFINED,
        shareability: Shareability::NonShareable,
        access_flag: false,
        non_global: false,
        hw_dirty_update: false,
        contiguous: false,
        guarded: false,
    };

    /// The attributes of a single block, without any inherited restrictions.
    #[must_use]
    pub const fn of_block(desc: BlockDescriptor) -> Self {
        let mut perm = Self::OPEN;
        perm.add_from_block(desc);
        perm
    }

    /// The attributes of a single page, without any inherited restrictions.
    #[must_use]
    pub const fn of_page(desc: PageDescriptor) -> Self {
        let mut perm = Self::OPEN;
        perm.add_from_page(desc);
        perm
    }

    /// Folds a block descriptor into the accumulated set.
    pub const fn add_from_block(&mut self, desc: BlockDescriptor) {
        self.non_secure |= desc.non_secure();
        self.user |= desc.user();
        self.readonly |= desc.readonly();
        self.priv_exec_never |= desc.priv_exec_never();
        self.unpriv_exec_never |= desc.unpriv_exec_never();
        self.mair_index = MairIndex::from_bits(desc.mair_index());
        self.shareability = Shareability::from_bits(desc.shareability());
        self.access_flag = desc.access_flag();
        self.non_global = desc.non_global();
        self.hw_dirty_update = desc.hw_dirty_update();
        self.contiguous = desc.contiguous();
        self.guarded = desc.guarded();
    }

    /// Folds a page descriptor into the accumulated set.
    pub const fn add_from_page(&mut self, desc: PageDescriptor) {
        self.non_secure |= desc.non_secure();
        self.user |= desc.user();
        self.readonly |= desc.readonly();
        self.priv_exec_never |= desc.priv_exec_never();
        self.unpriv_exec_never |= desc.unpriv_exec_never();
        self.mair_index = MairIndex::from_bits(desc.mair_index());
        self.shareability = Shareability::from_bits(desc.shareability());
        self.access_flag = desc.access_flag();
        self.non_global = desc.non_global();
        self.hw_dirty_update = desc.hw_dirty_update();
        self.contiguous = desc.contiguous();
        self.guarded = desc.guarded();
    }

    /// Folds a leaf of either kind; tables and invalid slots leave `self` untouched.
    pub const fn add_from_leaf(&mut self, desc: Descriptor) {
        match desc {
            Descriptor::Block(block) => self.add_from_block(block),
            Descriptor::Page(page) => self.add_from_page(page),
            Descriptor::Table(_) | Descriptor::Invalid(_) => {}
        }
    }

    /// Folds the hierarchical restrictions of a table descriptor.
    ///
    /// `NSTable` is not folded; it only affects the security state of the
    /// next-level table fetch.
    pub const fn accumulate_table(&mut self, desc: TableDescriptor) {
        self.user |= desc.user();
        self.readonly |= desc.readonly();
        self.priv_exec_never |= desc.priv_exec_never();
        self.unpriv_exec_never |= desc.unpriv_exec_never();
    }

    /// Writes the attributes into a block descriptor. The contiguous hint is
    /// always cleared; nothing here maintains the contiguous-run invariant.
    #[must_use]
    pub const fn write_to_block(self, desc: BlockDescriptor) -> BlockDescriptor {
        desc.with_non_secure(self.non_secure)
            .with_user(self.user)
            .with_readonly(self.readonly)
            .with_priv_exec_never(self.priv_exec_never)
            .with_unpriv_exec_never(self.unpriv_exec_never)
            .with_mair_index(self.mair_index.into_bits())
            .with_shareability(self.shareability.into_bits())
            .with_access_flag(self.access_flag)
            .with_non_global(self.non_global)
            .with_hw_dirty_update(self.hw_dirty_update)
            .with_contiguous(false)
            .with_guarded(self.guarded)
    }

    #[must_use]
    pub const fn write_to_page(self, desc: PageDescriptor) -> PageDescriptor {
        desc.with_non_secure(self.non_secure)
            .with_user(self.user)
            .with_readonly(self.readonly)
            .with_priv_exec_never(self.priv_exec_never)
            .with_unpriv_exec_never(self.unpriv_exec_never)
            .with_mair_index(self.mair_index.into_bits())
            .with_shareability(self.shareability.into_bits())
            .with_access_flag(self.access_flag)
            .with_non_global(self.non_global)
            .with_hw_dirty_update(self.hw_dirty_update)
            .with_contiguous(self.contiguous)
            .with_guarded(self.guarded)
    }

    /// Packed form, one bit per flag in declaration order (used by the dump).
    #[must_use]
    #[allow(clippy::cast_lossless)]
    pub const fn into_bits(self) -> u32 {
        (self.non_secure as u32)
            | (self.user as u32) << 1
            | (self.readonly as u32) << 2
            | (self.priv_exec_never as u32) << 3
            | (self.unpriv_exec_never as u32) << 4
            | (self.mair_index.into_bits() as u32) << 5
            | (self.shareability.into_bits() as u32) << 8
            | (self.access_flag as u32) << 10
            | (self.non_global as u32) << 11
            | (self.hw_dirty_update as u32) << 12
            | (self.contiguous as u32) << 13
            | (self.guarded as u32) << 14
    }
}
