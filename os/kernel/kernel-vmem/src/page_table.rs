//! # Translation Table Lifecycle
//!
//! A [`PageTable`] owns the root of one translation tree (what one `TTBRn_EL1`
//! points at) together with the [`TableConfig`] describing its shape. Table
//! levels are allocated lazily through a [`BootAllocator`], zero filled, and
//! reached through the [`PhysMapper`].
//!
//! ## Invariants & Notes
//!
//! - Every table array reachable from the root was allocated by this table and
//!   is aligned to [`TableConfig::level_alignment`] for its level.
//! - Every table array has [`TableConfig::entries_per_level`] entries.
//! - [`Slot`]s are only created by walking this table, so they always point
//!   into one of its arrays while the table is alive.

use log::{debug, error, trace};

use crate::descriptor::{BlockDescriptor, Descriptor, PageDescriptor, RawDescriptor};
use crate::geometry::{DESCRIPTOR_SIZE, TableConfig, TableFlags};
use crate::permissions::Permissions;
use crate::{BootAllocator, PagingError, PhysMapper, PhysicalAddress, VirtualAddress};

/// One descriptor slot inside a table array, together with its level.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Slot {
    address: PhysicalAddress,
    level: i8,
}

impl Slot {
    #[must_use]
    pub const fn address(self) -> PhysicalAddress {
        self.address
    }

    #[must_use]
    pub const fn level(self) -> i8 {
        self.level
    }
}

/// Result of a software walk of one virtual address.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Translation {
    pub pa: PhysicalAddress,
    /// Level of the leaf that maps the address.
    pub level: i8,
    pub descriptor: Descriptor,
    /// Effective permissions, including hierarchical restrictions when the
    /// table has them enabled.
    pub permissions: Permissions,
}

/// A translation table rooted at a lazily allocated root level.
pub struct PageTable<'m, M: PhysMapper> {
    config: TableConfig,
    root: Option<PhysicalAddress>,
    mapper: &'m M,
}

impl<'m, M: PhysMapper> PageTable<'m, M> {
    /// A 4 KiB-granule table translating `2^(64 - tnsz)` bytes.
    ///
    /// No memory is allocated until the first walk.
    ///
    /// # Errors
    /// Propagates [`TableConfig::new_4kb`].
    pub fn create_4kb(mapper: &'m M, tnsz: u8, flags: TableFlags) -> Result<Self, PagingError> {
        let config = TableConfig::new_4kb(tnsz, flags)?;
        debug!(
            target: "paging",
            "created 4 KiB granule table: TnSZ {tnsz}, root level {}, page level {}",
            config.root_level(),
            config.page_level()
        );
        Ok(Self::with_config(mapper, config))
    }

    #[must_use]
    pub const fn with_config(mapper: &'m M, config: TableConfig) -> Self {
        Self {
            config,
            root: None,
            mapper,
        }
    }

    #[must_use]
    pub const fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Physical address of the root array, once allocated.
    #[must_use]
    pub const fn root(&self) -> Option<PhysicalAddress> {
        self.root
    }

    #[must_use]
    pub const fn mapper(&self) -> &'m M {
        self.mapper
    }

    /// Allocates and zero fills one table array for `level`.
    pub(crate) fn allocate_level<A: BootAllocator>(
        &self,
        alloc: &mut A,
        level: i8,
    ) -> Result<PhysicalAddress, PagingError> {
        let bytes = self.config.level_bytes(level)?;
        let alignment = self.config.level_alignment(level)?;

        let Some(pa) = alloc.allocate(bytes, alignment) else {
            error!(target: "paging", "out of memory allocating a level {level} table ({bytes} bytes)");
            return Err(PagingError::OutOfMemory { level });
        };

        let alignment = alignment as u64;
        if !pa.is_aligned_to(alignment) {
            error!(target: "paging", "allocator returned {pa} for a table needing {alignment:#x} alignment");
            // SAFETY: just allocated with this size, never published.
            unsafe { alloc.free(pa, bytes) };
            return Err(PagingError::MisalignedAllocation {
                address: pa.as_u64(),
                alignment,
            });
        }

        // SAFETY: freshly allocated, sized and aligned for `bytes / 8` descriptors.
        let entries = unsafe {
            self.mapper
                .phys_to_slice_mut::<RawDescriptor>(pa, bytes / DESCRIPTOR_SIZE)
        };
        entries.fill(RawDescriptor::INVALID);

        trace!(target: "paging", "allocated level {level} table at {pa}");
        Ok(pa)
    }

    /// # Safety
    /// `pa` must come from [`allocate_level`](Self::allocate_level) for the same
    /// level, and no descriptor may reference it anymore.
    pub(crate) unsafe fn free_level<A: BootAllocator>(
        &self,
        alloc: &mut A,
        pa: PhysicalAddress,
        level: i8,
    ) -> Result<(), PagingError> {
        let bytes = self.config.level_bytes(level)?;
        trace!(target: "paging", "freeing level {level} table at {pa}");
        unsafe { alloc.free(pa, bytes) };
        Ok(())
    }

    pub(crate) fn ensure_root<A: BootAllocator>(
        &mut self,
        alloc: &mut A,
    ) -> Result<PhysicalAddress, PagingError> {
        if let Some(root) = self.root {
            return Ok(root);
        }
        let root = self.allocate_level(alloc, self.config.root_level())?;
        self.root = Some(root);
        Ok(root)
    }

    /// The slot at `level` inside the array at `table` that translates `va`.
    pub(crate) fn slot_in(
        &self,
        table: PhysicalAddress,
        level: i8,
        va: VirtualAddress,
    ) -> Result<Slot, PagingError> {
        let entries = self.config.entries_per_level(level)?;
        let shift = self.config.geometry()?.index_shift(level);
        let index = va.table_index(shift, entries);
        Ok(Self::slot_at(table, level, index))
    }

    pub(crate) const fn slot_at(table: PhysicalAddress, level: i8, index: usize) -> Slot {
        Slot {
            address: PhysicalAddress::new(table.as_u64() + (index * DESCRIPTOR_SIZE) as u64),
            level,
        }
    }

    /// A valid leaf for `level` mapping `pa` with `permissions`.
    pub(crate) fn leaf_descriptor(
        &self,
        pa: PhysicalAddress,
        level: i8,
        permissions: Permissions,
    ) -> Result<RawDescriptor, PagingError> {
        if level == self.config.page_level() {
            let page = PageDescriptor::new().with_valid(true).with_reserved(true);
            Ok(permissions.write_to_page(page).try_with_address(pa)?.into())
        } else {
            let size = self.config.entry_size(level)?;
            let block = BlockDescriptor::new().with_valid(true);
            Ok(permissions.write_to_block(block).try_with_address(pa, size)?.into())
        }
    }

    pub(crate) fn load(&self, slot: Slot) -> RawDescriptor {
        // SAFETY: slots only point into arrays owned by this table.
        unsafe { *self.mapper.phys_to_mut::<RawDescriptor>(slot.address) }
    }

    pub(crate) fn store(&mut self, slot: Slot, raw: RawDescriptor) {
        // SAFETY: slots only point into arrays owned by this table.
        unsafe { *self.mapper.phys_to_mut::<RawDescriptor>(slot.address) = raw };
    }

    pub(crate) fn decode(&self, slot: Slot) -> Descriptor {
        Descriptor::decode(self.load(slot), slot.level, self.config.page_level())
    }

    /// Reads the descriptor in `slot`.
    ///
    /// # Safety
    /// `slot` must have been returned by [`drill`](Self::drill) on this table,
    /// and the table must not have been freed since.
    #[must_use]
    pub unsafe fn read_slot(&self, slot: Slot) -> RawDescriptor {
        self.load(slot)
    }

    /// Overwrites the descriptor in `slot`.
    ///
    /// # Safety
    /// As for [`read_slot`](Self::read_slot). In addition, replacing a table
    /// descriptor orphans the subtree below it.
    pub unsafe fn write_slot(&mut self, slot: Slot, raw: RawDescriptor) {
        self.store(slot, raw);
    }

    /// Checks that `va` lies inside the region this table translates: the
    /// bits above `64 - TnSZ` must be all zero for a low table and all one for
    /// a high table.
    ///
    /// # Errors
    /// [`PagingError::NonCanonical`] otherwise.
    pub fn check_canonical(&self, va: VirtualAddress) -> Result<(), PagingError> {
        let bits = 64 - u32::from(self.config.tnsz());
        let upper = va.as_u64().checked_shr(bits).unwrap_or(0);
        let expected = if self.config.high_half() {
            u64::MAX.checked_shr(bits).unwrap_or(0)
        } else {
            0
        };
        if upper == expected {
            Ok(())
        } else {
            Err(PagingError::NonCanonical(va.as_u64()))
        }
    }

    /// Decoded descriptor at `level` on the path of `va`, without allocating
    /// or splitting anything.
    ///
    /// Returns `None` if the walk stops above `level` (missing root, invalid
    /// slot, or a leaf).
    #[must_use]
    pub fn lookup(&self, va: VirtualAddress, level: i8) -> Option<Descriptor> {
        let mut table = self.root?;
        let mut current = self.config.root_level();
        if current < 0 || level < current || level > self.config.page_level() {
            return None;
        }
        loop {
            let slot = self.slot_in(table, current, va).ok()?;
            let desc = self.decode(slot);
            if current == level {
                return Some(desc);
            }
            match desc {
                Descriptor::Table(next) => table = next.address(),
                _ => return None,
            }
            current += 1;
        }
    }

    /// Software walk of `va`, the way the MMU would translate it.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<Translation> {
        let mut table = self.root?;
        let mut level = self.config.root_level();
        if level < 0 || self.check_canonical(va).is_err() {
            return None;
        }

        let mut permissions = Permissions::OPEN;
        while level <= self.config.page_level() {
            let slot = self.slot_in(table, level, va).ok()?;
            let descriptor = self.decode(slot);
            match descriptor {
                Descriptor::Table(next) => {
                    if self.config.hierarchy_enabled() {
                        permissions.accumulate_table(next);
                    }
                    table = next.address();
                    level += 1;
                }
                Descriptor::Block(_) | Descriptor::Page(_) => {
                    permissions.add_from_leaf(descriptor);
                    let size = self.config.entry_size(level).ok()?;
                    let base = descriptor.address()?;
                    return Some(Translation {
                        pa: base + (va.as_u64() & (size - 1)),
                        level,
                        descriptor,
                        permissions,
                    });
                }
                Descriptor::Invalid(_) => return None,
            }
        }
        None
    }

    /// Frees every table array of the tree, leaving the table without a root.
    ///
    /// The table must not be live in any `TTBRn_EL1`.
    ///
    /// # Errors
    /// Propagates geometry errors of a misconfigured table.
    pub fn free<A: BootAllocator>(&mut self, alloc: &mut A) -> Result<(), PagingError> {
        let Some(root) = self.root.take() else {
            return Ok(());
        };
        debug!(target: "paging", "tearing down table rooted at {root}");
        self.free_subtree(alloc, root, self.config.root_level())
    }

    /// Frees the array at `table` and everything below it.
    pub(crate) fn free_subtree<A: BootAllocator>(
        &self,
        alloc: &mut A,
        table: PhysicalAddress,
        level: i8,
    ) -> Result<(), PagingError> {
        if level < self.config.page_level() {
            for index in 0..self.config.entries_per_level(level)? {
                let slot = Self::slot_at(table, level, index);
                if let Descriptor::Table(next) = self.decode(slot) {
                    self.free_subtree(alloc, next.address(), level + 1)?;
                }
            }
        }
        // SAFETY: the caller discards the only descriptor referencing `table`.
        unsafe { self.free_level(alloc, table, level) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IdentityMapper;
    use crate::test_support::HeapAllocator;

    fn flags() -> TableFlags {
        TableFlags::new().with_hierarchy_enabled(true)
    }

    #[test]
    fn root_is_allocated_lazily_and_zeroed() {
        let mut alloc = HeapAllocator::default();
        let mut table = PageTable::create_4kb(&IdentityMapper, 32, flags()).unwrap();
        assert_eq!(table.root(), None);
        assert!(table.translate(VirtualAddress::new(0)).is_none());

        let root = table.ensure_root(&mut alloc).unwrap();
        assert_eq!(table.ensure_root(&mut alloc).unwrap(), root);
        assert_eq!(alloc.allocations, 1);
        assert!(root.is_aligned_to(64));
        for index in 0..4 {
            let slot = PageTable::<IdentityMapper>::slot_at(root, 1, index);
            assert_eq!(table.load(slot), RawDescriptor::INVALID);
        }
    }

    #[test]
    fn out_of_memory_names_the_level() {
        let mut alloc = HeapAllocator::with_limit(0);
        let mut table = PageTable::create_4kb(&IdentityMapper, 25, flags()).unwrap();
        assert_eq!(
            table.ensure_root(&mut alloc),
            Err(PagingError::OutOfMemory { level: 1 })
        );
        assert_eq!(table.root(), None);
    }

    #[test]
    fn canonical_addresses() {
        let low = PageTable::create_4kb(&IdentityMapper, 25, flags()).unwrap();
        assert!(low.check_canonical(VirtualAddress::new(0x7F_FFFF_FFFF)).is_ok());
        assert_eq!(
            low.check_canonical(VirtualAddress::new(0x80_0000_0000)),
            Err(PagingError::NonCanonical(0x80_0000_0000))
        );
        assert_eq!(
            low.check_canonical(VirtualAddress::new(0xFFFF_FF80_0000_0000)),
            Err(PagingError::NonCanonical(0xFFFF_FF80_0000_0000))
        );

        let high =
            PageTable::create_4kb(&IdentityMapper, 25, flags().with_high_half(true)).unwrap();
        assert!(high.check_canonical(VirtualAddress::new(0xFFFF_FF80_0000_0000)).is_ok());
        assert!(high.check_canonical(VirtualAddress::new(u64::MAX)).is_ok());
        assert_eq!(
            high.check_canonical(VirtualAddress::new(0x1000)),
            Err(PagingError::NonCanonical(0x1000))
        );
        assert_eq!(
            high.check_canonical(VirtualAddress::new(0xFFFF_FF7F_FFFF_FFFF)),
            Err(PagingError::NonCanonical(0xFFFF_FF7F_FFFF_FFFF))
        );
    }

    #[test]
    fn high_addresses_never_reach_a_low_table() {
        let mut alloc = HeapAllocator::default();
        let mut table = PageTable::create_4kb(&IdentityMapper, 25, flags()).unwrap();
        table
            .init_device(&mut alloc, VirtualAddress::new(0), PhysicalAddress::new(0), 1 << 30)
            .unwrap();
        let before = table.translate(VirtualAddress::new(0x1000)).unwrap();

        assert_eq!(
            table.init_normal(
                &mut alloc,
                VirtualAddress::new(0xFFFF_FF80_0000_0000),
                PhysicalAddress::new(0x8000_0000),
                1 << 30,
            ),
            Err(PagingError::NonCanonical(0xFFFF_FF80_0000_0000))
        );
        assert_eq!(
            table.drill(&mut alloc, VirtualAddress::new(0xFFFF_FF80_0000_0000), 2),
            Err(PagingError::NonCanonical(0xFFFF_FF80_0000_0000))
        );
        assert_eq!(table.translate(VirtualAddress::new(0x1000)), Some(before));
        assert!(table.translate(VirtualAddress::new(0xFFFF_FF80_0000_1000)).is_none());
        table.free(&mut alloc).unwrap();
    }

    #[test]
    fn free_releases_every_level() {
        let mut alloc = HeapAllocator::default();
        let mut table = PageTable::create_4kb(&IdentityMapper, 25, flags()).unwrap();
        table
            .drill(&mut alloc, VirtualAddress::new(0x4020_3000), 3)
            .unwrap();
        table
            .drill(&mut alloc, VirtualAddress::new(0x8000_0000), 3)
            .unwrap();
        // root, two L2 arrays, two L3 arrays
        assert_eq!(alloc.live(), 5);

        table.free(&mut alloc).unwrap();
        assert_eq!(alloc.live(), 0);
        assert_eq!(table.root(), None);
        table.free(&mut alloc).unwrap();
        assert_eq!(alloc.frees, 5);
    }
}
