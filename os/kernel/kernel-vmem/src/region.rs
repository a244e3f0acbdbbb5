//! # Region Initializers
//!
//! Identity maps of the kinds of memory the boot tables contain. Each kind
//! fixes the attributes and the rounding of its range:
//!
//! | Kind     | Access | Exec                 | Memory type | Rounding |
//! |----------|--------|----------------------|-------------|----------|
//! | Device   | RW     | never                | Device      | out      |
//! | Normal   | RW     | never                | Normal      | in       |
//! | Text     | RO     | EL1 only             | Normal      | out      |
//! | Rodata   | RO     | never                | Normal      | in       |
//!
//! All kinds are kernel-only, global, outer shareable, and have the access
//! flag set so the first touch does not fault.

use log::{debug, info};

use crate::page_table::PageTable;
use crate::permissions::{MairIndex, Permissions, Shareability};
use crate::range::{DrilledRange, Rounding};
use crate::{BootAllocator, PagingError, PhysMapper, PhysicalAddress, VirtualAddress};

const KERNEL_BASE: Permissions = Permissions {
    shareability: Shareability::OuterShareable,
    access_flag: true,
    ..Permissions::OPEN
};

/// Kind of memory a region initializer maps.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum RegionKind {
    Device,
    Normal,
    Text,
    Rodata,
}

impl RegionKind {
    #[must_use]
    pub const fn permissions(self) -> Permissions {
        match self {
            Self::Device => Permissions {
                priv_exec_never: true,
                unpriv_exec_never: true,
                mair_index: MairIndex::DEVICE,
                ..KERNEL_BASE
            },
            Self::Normal => Permissions {
                priv_exec_never: true,
                unpriv_exec_never: true,
                mair_index: MairIndex::NORMAL,
                ..KERNEL_BASE
            },
            Self::Text => Permissions {
                readonly: true,
                unpriv_exec_never: true,
                mair_index: MairIndex::NORMAL,
                ..KERNEL_BASE
            },
            Self::Rodata => Permissions {
                readonly: true,
                priv_exec_never: true,
                unpriv_exec_never: true,
                mair_index: MairIndex::NORMAL,
                ..KERNEL_BASE
            },
        }
    }

    /// Device and text round outward so nothing they need is left unmapped;
    /// normal and read-only data round inward so they never claim a partial
    /// neighbour page.
    #[must_use]
    pub const fn rounding(self) -> Rounding {
        match self {
            Self::Device | Self::Text => Rounding::Out,
            Self::Normal | Self::Rodata => Rounding::In,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Device => "device",
            Self::Normal => "normal",
            Self::Text => "text",
            Self::Rodata => "rodata",
        }
    }
}

impl<M: PhysMapper> PageTable<'_, M> {
    /// Maps `[va, va + size)` to `pa` with the attributes and rounding of `kind`.
    ///
    /// # Errors
    /// See [`drill_range`](Self::drill_range).
    pub fn init_region<A: BootAllocator>(
        &mut self,
        alloc: &mut A,
        kind: RegionKind,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: u64,
    ) -> Result<DrilledRange, PagingError> {
        let done = self.drill_range(alloc, va, pa, size, kind.permissions(), kind.rounding())?;
        info!(
            target: "paging",
            "mapped {} region [{}, {}) ({} leaves)",
            kind.name(),
            done.start,
            done.end,
            done.leaves
        );
        Ok(done)
    }

    /// # Errors
    /// See [`drill_range`](Self::drill_range).
    pub fn init_device<A: BootAllocator>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: u64,
    ) -> Result<DrilledRange, PagingError> {
        self.init_region(alloc, RegionKind::Device, va, pa, size)
    }

    /// # Errors
    /// See [`drill_range`](Self::drill_range).
    pub fn init_normal<A: BootAllocator>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: u64,
    ) -> Result<DrilledRange, PagingError> {
        self.init_region(alloc, RegionKind::Normal, va, pa, size)
    }

    /// # Errors
    /// See [`drill_range`](Self::drill_range).
    pub fn init_text<A: BootAllocator>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: u64,
    ) -> Result<DrilledRange, PagingError> {
        self.init_region(alloc, RegionKind::Text, va, pa, size)
    }

    /// # Errors
    /// See [`drill_range`](Self::drill_range).
    pub fn init_rodata<A: BootAllocator>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        pa: PhysicalAddress,
        size: u64,
    ) -> Result<DrilledRange, PagingError> {
        self.init_region(alloc, RegionKind::Rodata, va, pa, size)
    }

    /// Gives the table an all-invalid root, discarding whatever it mapped.
    ///
    /// Used for a translation base register that must exist but should fault
    /// on every access.
    ///
    /// # Errors
    /// [`PagingError::OutOfMemory`] if the root cannot be allocated.
    pub fn init_invalid<A: BootAllocator>(&mut self, alloc: &mut A) -> Result<(), PagingError> {
        self.free(alloc)?;
        let root = self.ensure_root(alloc)?;
        debug!(target: "paging", "table at {root} maps nothing");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::HeapAllocator;
    use crate::{Descriptor, IdentityMapper, TableFlags};

    fn table() -> PageTable<'static, IdentityMapper> {
        PageTable::create_4kb(&IdentityMapper, 25, TableFlags::new().with_hierarchy_enabled(true))
            .unwrap()
    }

    #[test]
    fn device_gigabyte_is_one_block() {
        let mut alloc = HeapAllocator::default();
        let mut t = table();
        let done = t
            .init_device(&mut alloc, VirtualAddress::new(0), PhysicalAddress::new(0), 0x4000_0000)
            .unwrap();
        assert_eq!(done.leaves, 1);
        assert_eq!(t.config().root_level(), 1);
        let Some(Descriptor::Block(block)) = t.lookup(VirtualAddress::new(0), 1) else {
            panic!("expected a 1 GiB block");
        };
        assert!(block.valid());
        assert_eq!(block.mair_index(), 2);
        assert!(block.priv_exec_never() && block.unpriv_exec_never());
        assert!(block.access_flag());
        assert_eq!(block.shareability(), 0b10);
        for index in 1..512u64 {
            assert!(matches!(
                t.lookup(VirtualAddress::new(index << 30), 1),
                Some(Descriptor::Invalid(_))
            ));
        }
    }

    #[test]
    fn normal_rounds_in() {
        let mut alloc = HeapAllocator::default();
        let mut t = table();
        let done = t
            .init_normal(
                &mut alloc,
                VirtualAddress::new(0x1000),
                PhysicalAddress::new(0x1000),
                0x1FFF,
            )
            .unwrap();
        assert_eq!((done.start.as_u64(), done.end.as_u64(), done.leaves), (0x1000, 0x2000, 1));
        assert!(t.translate(VirtualAddress::new(0x2000)).is_none());
        let hit = t.translate(VirtualAddress::new(0x1FFF)).unwrap();
        assert_eq!(hit.permissions, RegionKind::Normal.permissions());
    }

    #[test]
    fn text_rounds_out_and_stays_executable() {
        let mut alloc = HeapAllocator::default();
        let mut t = table();
        let done = t
            .init_text(
                &mut alloc,
                VirtualAddress::new(0x4008_0800),
                PhysicalAddress::new(0x4008_0800),
                0x1000,
            )
            .unwrap();
        assert_eq!((done.start.as_u64(), done.end.as_u64()), (0x4008_0000, 0x4008_2000));
        let perm = t.translate(VirtualAddress::new(0x4008_1FFF)).unwrap().permissions;
        assert!(perm.readonly);
        assert!(!perm.priv_exec_never);
        assert!(perm.unpriv_exec_never);
    }

    #[test]
    fn invalid_table_has_an_empty_root() {
        let mut alloc = HeapAllocator::default();
        let mut t = table();
        t.init_device(&mut alloc, VirtualAddress::new(0), PhysicalAddress::new(0), 0x20_0000)
            .unwrap();
        t.init_invalid(&mut alloc).unwrap();
        assert!(t.root().is_some());
        assert_eq!(alloc.live(), 1);
        assert!(t.translate(VirtualAddress::new(0)).is_none());
    }
}
