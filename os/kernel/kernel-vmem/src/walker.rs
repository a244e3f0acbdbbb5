//! # Table Walker
//!
//! [`PageTable::drill`] walks from the root down to a requested level,
//! allocating missing levels and splitting blocks that are in the way, and
//! hands back the slot at that level. [`PageTable::block_to_table`] is the
//! split itself: the replacement table maps exactly what the block mapped.

use log::{error, trace};

use crate::descriptor::{BlockDescriptor, Descriptor, RawDescriptor, TableDescriptor};
use crate::geometry::GeometryError;
use crate::page_table::{PageTable, Slot};
use crate::permissions::Permissions;
use crate::{BootAllocator, PagingError, PhysMapper, PhysicalAddress, VirtualAddress};

impl<M: PhysMapper> PageTable<'_, M> {
    /// Descends to `level` along the path of `va` and returns the slot there.
    ///
    /// Allocates the root on first use. Every slot passed on the way that is
    /// not a table descriptor is turned into one with
    /// [`block_to_table`](Self::block_to_table), so existing blocks keep their
    /// mappings and invalid slots get an empty next level.
    ///
    /// # Errors
    /// - [`PagingError::UnsupportedRootLevel`] for tables rooted above level 0.
    /// - [`GeometryError::LevelOutOfRange`] if `level` is not between the root
    ///   and the page level.
    /// - [`PagingError::NonCanonical`] if `va` is outside the translated region.
    /// - [`PagingError::OutOfMemory`] if a level cannot be allocated; levels
    ///   linked before the failure stay in place.
    pub fn drill<A: BootAllocator>(
        &mut self,
        alloc: &mut A,
        va: VirtualAddress,
        level: i8,
    ) -> Result<Slot, PagingError> {
        let root_level = self.config().root_level();
        let page_level = self.config().page_level();
        if root_level < 0 {
            error!(target: "paging", "cannot walk a table with root level {root_level}");
            return Err(PagingError::UnsupportedRootLevel { root_level });
        }
        if level < root_level || level > page_level {
            error!(
                target: "paging",
                "drill to level {level} outside [{root_level}, {page_level}]"
            );
            return Err(GeometryError::LevelOutOfRange { level }.into());
        }
        self.check_canonical(va)?;

        let mut table = self.ensure_root(alloc)?;
        let mut current = root_level;
        loop {
            let slot = self.slot_in(table, current, va)?;
            if current == level {
                return Ok(slot);
            }
            let next = match self.decode(slot) {
                Descriptor::Table(next) => next,
                _ => {
                    self.block_to_table(alloc, slot)?;
                    TableDescriptor::from_bits(self.load(slot).into_bits())
                }
            };
            table = next.address();
            current += 1;
        }
    }

    /// Replaces the descriptor in `slot` with a table descriptor pointing at a
    /// freshly allocated next level.
    ///
    /// A valid block is split into blocks (or pages) one level down that reuse
    /// its attributes and tile its output range. An invalid slot gets an
    /// all-invalid next level. The new table descriptor carries no
    /// hierarchical restrictions. A slot that already holds a table is left
    /// alone.
    ///
    /// # Errors
    /// - [`PagingError::CannotSplitPage`] for slots at the page level.
    /// - [`PagingError::OutOfMemory`] if the next level cannot be allocated;
    ///   the slot is unchanged in that case.
    pub fn block_to_table<A: BootAllocator>(
        &mut self,
        alloc: &mut A,
        slot: Slot,
    ) -> Result<(), PagingError> {
        let level = slot.level();
        let page_level = self.config().page_level();
        if level >= page_level {
            error!(target: "paging", "cannot split a level {level} descriptor");
            return Err(PagingError::CannotSplitPage { level });
        }

        let block = match self.decode(slot) {
            Descriptor::Table(_) => return Ok(()),
            Descriptor::Block(block) => Some(block),
            Descriptor::Invalid(_) | Descriptor::Page(_) => None,
        };

        let child_level = level + 1;
        let child = self.allocate_level(alloc, child_level)?;
        let linked = self
            .fill_split_level(child, child_level, block)
            .and_then(|()| TableDescriptor::pointing_to(child).map_err(PagingError::from));

        match linked {
            Ok(table) => {
                trace!(
                    target: "paging",
                    "level {level} slot {} now points at level {child_level} table {child}",
                    slot.address()
                );
                self.store(slot, RawDescriptor::from(table));
                Ok(())
            }
            Err(e) => {
                // SAFETY: `child` was never linked into the tree.
                unsafe { self.free_level(alloc, child, child_level)? };
                Err(e)
            }
        }
    }

    /// Writes the children of a split `block` into the zeroed array at `child`.
    fn fill_split_level(
        &mut self,
        child: PhysicalAddress,
        child_level: i8,
        block: Option<BlockDescriptor>,
    ) -> Result<(), PagingError> {
        let Some(block) = block else {
            return Ok(());
        };

        let permissions = Permissions::of_block(block);
        let child_size = self.config().entry_size(child_level)?;
        let base = block.address();

        for index in 0..self.config().entries_per_level(child_level)? {
            let raw = self.leaf_descriptor(base + index as u64 * child_size, child_level, permissions)?;
            self.store(Self::slot_at(child, child_level, index), raw);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::HeapAllocator;
    use crate::{IdentityMapper, MairIndex, Shareability, TableFlags};

    fn table(tnsz: u8) -> PageTable<'static, IdentityMapper> {
        PageTable::create_4kb(&IdentityMapper, tnsz, TableFlags::new().with_hierarchy_enabled(true))
            .unwrap()
    }

    fn device() -> Permissions {
        Permissions {
            priv_exec_never: true,
            unpriv_exec_never: true,
            mair_index: MairIndex::DEVICE,
            shareability: Shareability::OuterShareable,
            access_flag: true,
            ..Permissions::OPEN
        }
    }

    #[test]
    fn drill_allocates_missing_levels() {
        let mut alloc = HeapAllocator::default();
        let mut table = table(25);
        let slot = table
            .drill(&mut alloc, VirtualAddress::new(0x4020_3000), 3)
            .unwrap();
        assert_eq!(slot.level(), 3);
        assert_eq!(alloc.allocations, 3);
        assert!(matches!(
            table.lookup(VirtualAddress::new(0x4020_3000), 1),
            Some(Descriptor::Table(t)) if t.into_bits() >> 59 == 0
        ));
        assert_eq!(
            table.lookup(VirtualAddress::new(0x4020_3000), 3),
            Some(Descriptor::Invalid(RawDescriptor::INVALID))
        );

        // Walking the same path again allocates nothing.
        let again = table
            .drill(&mut alloc, VirtualAddress::new(0x4020_3000), 3)
            .unwrap();
        assert_eq!(again, slot);
        assert_eq!(alloc.allocations, 3);
    }

    #[test]
    fn drill_rejects_bad_requests() {
        let mut alloc = HeapAllocator::default();
        let mut t = table(25);
        assert_eq!(
            t.drill(&mut alloc, VirtualAddress::new(0), 0),
            Err(PagingError::Geometry(GeometryError::LevelOutOfRange { level: 0 }))
        );
        assert_eq!(
            t.drill(&mut alloc, VirtualAddress::new(0), 4),
            Err(PagingError::Geometry(GeometryError::LevelOutOfRange { level: 4 }))
        );
        assert_eq!(
            t.drill(&mut alloc, VirtualAddress::new(1 << 40), 2),
            Err(PagingError::NonCanonical(1 << 40))
        );
        let mut t = table(12);
        assert_eq!(
            t.drill(&mut alloc, VirtualAddress::new(0), 3),
            Err(PagingError::UnsupportedRootLevel { root_level: -1 })
        );
        assert_eq!(alloc.allocations, 0);
    }

    #[test]
    fn split_preserves_translation() {
        let mut alloc = HeapAllocator::default();
        let mut t = table(25);
        let slot = t.drill(&mut alloc, VirtualAddress::new(0x4000_0000), 1).unwrap();
        let block = device()
            .write_to_block(BlockDescriptor::new().with_valid(true))
            .try_with_address(PhysicalAddress::new(0x4000_0000), 1 << 30)
            .unwrap();
        t.store(slot, RawDescriptor::from(block));

        let samples = [0x4000_0000, 0x4000_1234, 0x4020_0000, 0x7FFF_FFFF];
        let before: Vec<_> = samples
            .iter()
            .map(|&va| t.translate(VirtualAddress::new(va)).unwrap())
            .collect();

        t.block_to_table(&mut alloc, slot).unwrap();
        assert!(matches!(t.decode(slot), Descriptor::Table(_)));

        for index in 0..512u64 {
            let va = VirtualAddress::new(0x4000_0000 + index * (1 << 21));
            let Some(Descriptor::Block(child)) = t.lookup(va, 2) else {
                panic!("child {index} is not a block");
            };
            assert_eq!(child.address().as_u64(), va.as_u64());
            assert_eq!(Permissions::of_block(child), device());
        }

        for (&va, before) in samples.iter().zip(&before) {
            let after = t.translate(VirtualAddress::new(va)).unwrap();
            assert_eq!(after.pa, before.pa);
            assert_eq!(after.permissions, before.permissions);
            assert_eq!(after.level, 2);
        }
    }

    #[test]
    fn split_into_pages() {
        let mut alloc = HeapAllocator::default();
        let mut t = table(25);
        let slot = t.drill(&mut alloc, VirtualAddress::new(0x20_0000), 2).unwrap();
        let block = device()
            .write_to_block(BlockDescriptor::new().with_valid(true))
            .try_with_address(PhysicalAddress::new(0x1_0020_0000), 1 << 21)
            .unwrap();
        t.store(slot, RawDescriptor::from(block));

        let page_slot = t.drill(&mut alloc, VirtualAddress::new(0x20_5000), 3).unwrap();
        let Descriptor::Page(page) = t.decode(page_slot) else {
            panic!("split did not produce pages");
        };
        assert_eq!(page.address().as_u64(), 0x1_0020_5000);
        assert!(page.reserved());
        assert_eq!(Permissions::of_page(page), device());
    }

    #[test]
    fn pages_cannot_be_split() {
        let mut alloc = HeapAllocator::default();
        let mut t = table(25);
        let slot = t.drill(&mut alloc, VirtualAddress::new(0x1000), 3).unwrap();
        let allocations = alloc.allocations;
        assert_eq!(
            t.block_to_table(&mut alloc, slot),
            Err(PagingError::CannotSplitPage { level: 3 })
        );
        assert_eq!(alloc.allocations, allocations);
    }

    #[test]
    fn failed_split_leaves_slot_unchanged() {
        let mut alloc = HeapAllocator::with_limit(1);
        let mut t = table(25);
        let slot = t.drill(&mut alloc, VirtualAddress::new(0), 1).unwrap();
        assert_eq!(
            t.drill(&mut alloc, VirtualAddress::new(0), 3),
            Err(PagingError::OutOfMemory { level: 2 })
        );
        assert_eq!(t.load(slot), RawDescriptor::INVALID);
    }
}
