//! # Virtual Memory Support
//!
//! `AArch64` stage 1 translation tables for a kernel that identity maps
//! physical memory at boot and then turns on the MMU on every core.
//!
//! ## What you get
//! - Typed [descriptors](descriptor) for tables, blocks, and pages.
//! - [Granule geometry](geometry): entries per level, entry sizes, alignment.
//! - A [`PageTable`] that allocates its levels lazily through a
//!   [`BootAllocator`] and reaches them through a [`PhysMapper`].
//! - The walker ([`PageTable::drill`]) which splits blocks on the way down,
//!   and the [range driller](range) covering a region with the largest
//!   blocks that fit.
//! - [Region initializers](region) for device, normal, text, and read-only memory.
//! - [MMU bring-up](mmu): build the boot tables once, then program and
//!   enable the MMU on each core.
//! - A [dumper](dump) that prints every live mapping.
//!
//! ## `AArch64` 4 KiB Granule Walk
//!
//! With a 48-bit region (`TnSZ = 16`) the virtual address splits into:
//!
//! ```text
//! | 47‒39 | 38‒30 | 29‒21 | 20‒12 | 11‒0   |
//! |  L0   |  L1   |  L2   |  L3   | Offset |
//! ```
//!
//! ```text
//!  TTBRn → L0 → L1 → L2 → L3 → 4 KiB page
//!               │     └──────► block descriptor → 2 MiB
//!               └────────────► block descriptor → 1 GiB
//! ```
//!
//! A smaller region (larger `TnSZ`) starts the walk further down and shrinks
//! the root table; see [`geometry`] for the exact mapping.
//!
//! ### Leaf vs. non-leaf descriptors
//!
//! - A **table descriptor** points to the next level and may restrict
//!   everything below it (hierarchical permissions).
//! - A **block descriptor** (L1, L2) or **page descriptor** (L3) is a leaf
//!   and carries the output address and the memory attributes.
//!
//! Changing a table that is live on some core requires TLB maintenance,
//! which this crate does not perform.

#![cfg_attr(not(test), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod descriptor;
pub mod dump;
mod error;
pub mod geometry;
pub mod mmu;
mod page_table;
pub mod permissions;
pub mod range;
pub mod region;
mod walker;

#[cfg(test)]
mod test_support;

pub use crate::descriptor::{
    BlockDescriptor, Descriptor, DescriptorError, PageDescriptor, RawDescriptor, TableDescriptor,
};
pub use crate::dump::{DumpOptions, dump_page_table, log_page_table};
pub use crate::error::PagingError;
pub use crate::geometry::{Granule, Granule4K, GranuleSize, GeometryError, TableConfig, TableFlags};
pub use crate::mmu::{
    DeviceTree, IoMapping, KernelLayout, MemoryRegion, MmuContext, PagingConfig, SystemRegisters,
    arch_paging_init, per_cpu_paging_init,
};
pub use crate::page_table::{PageTable, Slot, Translation};
pub use crate::permissions::{MairIndex, Permissions, Shareability};
pub use crate::range::{DrillPlan, DrillRun, DrilledRange, Rounding};
pub use crate::region::RegionKind;

pub use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};

/// Source of physically contiguous memory for table levels.
///
/// During boot this is the boot memory allocator; table arrays are never
/// larger than one page and must be aligned as requested.
pub trait BootAllocator {
    /// Allocates `size` bytes aligned to `align`. Contents are unspecified.
    fn allocate(&mut self, size: usize, align: usize) -> Option<PhysicalAddress>;

    /// Returns memory obtained from [`allocate`](Self::allocate).
    ///
    /// # Safety
    /// `pa` and `size` must match an earlier allocation that is not in use anymore.
    unsafe fn free(&mut self, pa: PhysicalAddress, size: usize);
}

/// Converts physical addresses to pointers usable in the current address space.
///
/// Before the MMU is enabled, and under the boot identity map, this is the
/// identity ([`IdentityMapper`]).
pub trait PhysMapper {
    /// # Safety
    /// `pa` must refer to live memory suitable for a `T`, and the caller must
    /// not create aliasing mutable references to it.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;

    /// # Safety
    /// As for [`phys_to_mut`](Self::phys_to_mut), for `len` consecutive values.
    unsafe fn phys_to_slice_mut<'a, T>(&self, pa: PhysicalAddress, len: usize) -> &'a mut [T] {
        unsafe {
            let first = core::ptr::from_mut(self.phys_to_mut::<T>(pa));
            core::slice::from_raw_parts_mut(first, len)
        }
    }
}

/// Physical addresses are used as pointers unchanged.
#[derive(Copy, Clone, Debug, Default)]
pub struct IdentityMapper;

impl PhysMapper for IdentityMapper {
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
        #[allow(clippy::cast_possible_truncation)]
        let ptr = pa.as_u64() as usize as *mut T;
        unsafe { &mut *ptr }
    }
}
